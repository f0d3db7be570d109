//! Process-pipe backend for non-Windows builds.
//!
//! A development stand-in, not a terminal: the child gets plain pipes, so
//! no ANSI processing or window size exists on its side. It delivers
//! stdout+stderr through one reader and accepts stdin, which is all the
//! daemon logic needs to be exercised off-Windows.

use std::io::{self, PipeReader, PipeWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::Duration;

use super::{ExitFlag, Terminal};

const REAP_INTERVAL: Duration = Duration::from_millis(50);

pub struct ExecTerminal {
    child: Mutex<Child>,
    stdin: Mutex<Option<PipeWriter>>,
    stdout: Mutex<PipeReader>,
    exit: Arc<ExitFlag>,
    close_once: Once,
}

impl ExecTerminal {
    /// `cols`/`rows` are accepted for interface compatibility but unused.
    pub fn spawn(_cols: u16, _rows: u16, command: &str, workdir: &Path) -> io::Result<Arc<Self>> {
        // One pipe per direction; stdout and stderr share the write end so
        // the reader sees them merged, like a console would.
        let (out_read, out_write) = io::pipe()?;
        let (in_read, in_write) = io::pipe()?;

        let shell = default_shell();
        let mut cmd = Command::new(shell);
        if !command.is_empty() {
            cmd.arg("-c").arg(command);
        }
        if !workdir.as_os_str().is_empty() {
            cmd.current_dir(workdir);
        }
        cmd.stdin(Stdio::from(in_read))
            .stdout(Stdio::from(out_write.try_clone()?))
            .stderr(Stdio::from(out_write));

        let child = cmd.spawn()?;
        // The child-side pipe ends were moved into `cmd` and are dropped
        // with it, so the reader sees EOF once the child exits.

        let term = Arc::new(ExecTerminal {
            child: Mutex::new(child),
            stdin: Mutex::new(Some(in_write)),
            stdout: Mutex::new(out_read),
            exit: Arc::new(ExitFlag::new()),
            close_once: Once::new(),
        });

        let reaper = term.clone();
        thread::spawn(move || loop {
            {
                let mut child = reaper.child.lock().unwrap();
                match child.try_wait() {
                    Ok(Some(status)) => {
                        reaper.exit.signal(status.code().unwrap_or(-1));
                        break;
                    }
                    Ok(None) => {}
                    Err(_) => {
                        reaper.exit.signal(-1);
                        break;
                    }
                }
            }
            thread::sleep(REAP_INTERVAL);
        });

        Ok(term)
    }
}

fn default_shell() -> String {
    which::which("bash")
        .or_else(|_| which::which("sh"))
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "sh".to_string())
}

impl Terminal for ExecTerminal {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.stdout.lock().unwrap().read(buf)
    }

    fn write(&self, data: &[u8]) -> io::Result<usize> {
        match &mut *self.stdin.lock().unwrap() {
            Some(w) => w.write(data),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed")),
        }
    }

    fn resize(&self, _cols: u16, _rows: u16) -> io::Result<()> {
        Ok(())
    }

    fn wait(&self) -> i32 {
        self.exit.wait()
    }

    fn exit_code(&self) -> Option<i32> {
        self.exit.get()
    }

    fn close(&self) {
        self.close_once.call_once(|| {
            // Dropping stdin gives well-behaved children their EOF; kill
            // covers the rest. The reaper records the exit code.
            self.stdin.lock().unwrap().take();
            let _ = self.child.lock().unwrap().kill();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_command_and_reports_exit() {
        let term = ExecTerminal::spawn(80, 24, "exit 3", Path::new("")).unwrap();
        assert_eq!(term.wait(), 3);
        assert_eq!(term.exit_code(), Some(3));
    }

    #[test]
    fn merges_stdout_and_stderr() {
        let term =
            ExecTerminal::spawn(80, 24, "echo out; echo err 1>&2", Path::new("")).unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match term.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        let text = String::from_utf8_lossy(&data);
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[test]
    fn echoes_stdin() {
        let term = ExecTerminal::spawn(80, 24, "cat", Path::new("")).unwrap();
        term.write(b"hello\n").unwrap();
        let mut buf = [0u8; 64];
        let n = term.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello\n");
        term.close();
        term.wait();
    }

    #[test]
    fn close_is_idempotent() {
        let term = ExecTerminal::spawn(80, 24, "sleep 10", Path::new("")).unwrap();
        term.close();
        term.close();
        // kill → no clean exit code
        assert_eq!(term.wait(), -1);
    }

    #[test]
    fn respects_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let term = ExecTerminal::spawn(80, 24, "pwd", dir.path()).unwrap();
        let mut data = Vec::new();
        let mut buf = [0u8; 256];
        loop {
            match term.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => data.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        let text = String::from_utf8_lossy(&data);
        let dir_name = dir.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(text.contains(&dir_name));
    }
}
