//! Line-oriented scrollback: a circular buffer of committed lines plus the
//! current uncommitted tail. Raw PTY bytes go in; `\n` commits a line,
//! `\r` is dropped wherever it appears.

use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 2000;

pub struct Scrollback {
    inner: Mutex<Inner>,
}

struct Inner {
    lines: Vec<String>,
    capacity: usize,
    head: usize, // next write position
    count: usize,
    partial: Vec<u8>,
}

impl Scrollback {
    /// `capacity == 0` falls back to the tmux default of 2000 lines.
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { DEFAULT_CAPACITY } else { capacity };
        Scrollback {
            inner: Mutex::new(Inner {
                lines: vec![String::new(); capacity],
                capacity,
                head: 0,
                count: 0,
                partial: Vec::new(),
            }),
        }
    }

    pub fn write(&self, data: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        for &b in data {
            match b {
                b'\n' => inner.commit_line(),
                b'\r' => {}
                _ => inner.partial.push(b),
            }
        }
    }

    /// The newest `n` committed lines, oldest first. The partial tail is
    /// never included.
    pub fn last(&self, n: usize) -> Vec<String> {
        self.inner.lock().unwrap().last(n)
    }

    /// Like `last`, but the partial tail becomes the final element when it
    /// is non-empty. This is what capture-style consumers want: the line
    /// being typed counts even without a trailing newline.
    pub fn last_with_partial(&self, n: usize) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        if n == 0 {
            return Vec::new();
        }
        if inner.partial.is_empty() {
            return inner.last(n);
        }
        let mut result = inner.last(n - 1);
        result.push(String::from_utf8_lossy(&inner.partial).into_owned());
        result
    }

    /// Resize the ring, keeping the newest `min(count, n)` lines and the
    /// partial tail. `n == 0` and no-op resizes are ignored.
    pub fn set_capacity(&self, n: usize) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if n == 0 || n == inner.capacity {
            return;
        }
        let keep = inner.last(n.min(inner.count));
        inner.capacity = n;
        inner.lines = vec![String::new(); n];
        inner.head = 0;
        inner.count = 0;
        for line in keep {
            inner.lines[inner.head] = line;
            inner.head = (inner.head + 1) % inner.capacity;
            inner.count += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }
}

impl Inner {
    fn commit_line(&mut self) {
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        let head = self.head;
        self.lines[head] = line;
        self.head = (head + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }
    }

    fn last(&self, n: usize) -> Vec<String> {
        let n = n.min(self.count);
        if n == 0 {
            return Vec::new();
        }
        let start = (self.head + self.capacity - n) % self.capacity;
        (0..n)
            .map(|i| self.lines[(start + i) % self.capacity].clone())
            .collect()
    }
}
