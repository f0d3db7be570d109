//! Virtual terminal screen: a rows×cols char grid maintained by parsing
//! the raw VT/ANSI byte stream coming out of the pseudo-console.
//!
//! Full-screen TUIs rewrite cells in place, so capture has to come from a
//! live grid; the raw byte history contains overlapping writes that no
//! amount of escape stripping can reconcile. Parsing is delegated to
//! `vte`; all grid semantics (cursor, scroll region, alternate buffer,
//! line/char edits) live here. SGR and friends are parsed and dropped.

use std::sync::RwLock;

use vte::{Params, Perform};

pub struct Screen {
    inner: RwLock<Inner>,
}

struct Inner {
    parser: vte::Parser,
    term: Term,
}

struct Term {
    cols: usize,
    rows: usize,
    main: Grid,
    alt: Grid,
    in_alt: bool,
}

struct Grid {
    cells: Vec<Vec<char>>,
    row: usize,
    col: usize,
    saved_row: usize,
    saved_col: usize,
    scroll_top: usize,
    scroll_bottom: usize,
}

impl Grid {
    fn new(cols: usize, rows: usize) -> Self {
        Grid {
            cells: vec![blank_row(cols); rows],
            row: 0,
            col: 0,
            saved_row: 0,
            saved_col: 0,
            scroll_top: 0,
            scroll_bottom: rows - 1,
        }
    }
}

fn blank_row(cols: usize) -> Vec<char> {
    vec![' '; cols]
}

impl Screen {
    pub fn new(cols: usize, rows: usize) -> Self {
        assert!(cols > 0 && rows > 0);
        Screen {
            inner: RwLock::new(Inner {
                parser: vte::Parser::new(),
                term: Term {
                    cols,
                    rows,
                    main: Grid::new(cols, rows),
                    alt: Grid::new(cols, rows),
                    in_alt: false,
                },
            }),
        }
    }

    /// Feed raw terminal output. Escape state and incomplete UTF-8 carry
    /// over between calls.
    pub fn write(&self, data: &[u8]) {
        let mut inner = self.inner.write().unwrap();
        let Inner { parser, term } = &mut *inner;
        for &b in data {
            parser.advance(term, b);
        }
    }

    /// The last `min(max_lines, rows)` rows of the active grid, trailing
    /// spaces trimmed. `max_lines == 0` returns every row.
    pub fn capture(&self, max_lines: usize) -> Vec<String> {
        let inner = self.inner.read().unwrap();
        let term = &inner.term;
        let g = if term.in_alt { &term.alt } else { &term.main };
        let n = if max_lines == 0 { term.rows } else { max_lines.min(term.rows) };
        g.cells[term.rows - n..]
            .iter()
            .map(|row| {
                let line: String = row.iter().collect();
                line.trim_end_matches(' ').to_string()
            })
            .collect()
    }

    /// Cursor position of the active grid. The internal column can sit one
    /// past the right margin while a wrap is pending; the reported value
    /// is clamped into the grid.
    pub fn cursor(&self) -> (usize, usize) {
        let inner = self.inner.read().unwrap();
        let term = &inner.term;
        let g = if term.in_alt { &term.alt } else { &term.main };
        (g.row, g.col.min(term.cols - 1))
    }

    pub fn size(&self) -> (usize, usize) {
        let inner = self.inner.read().unwrap();
        (inner.term.cols, inner.term.rows)
    }
}

impl Term {
    fn grid(&self) -> &Grid {
        if self.in_alt {
            &self.alt
        } else {
            &self.main
        }
    }

    fn grid_mut(&mut self) -> &mut Grid {
        if self.in_alt {
            &mut self.alt
        } else {
            &mut self.main
        }
    }

    fn linefeed(&mut self) {
        let rows = self.rows;
        let at_bottom = {
            let g = self.grid();
            g.row == g.scroll_bottom
        };
        if at_bottom {
            self.scroll_up(1);
        } else if self.grid().row < rows - 1 {
            self.grid_mut().row += 1;
        }
    }

    fn reverse_index(&mut self) {
        let at_top = {
            let g = self.grid();
            g.row == g.scroll_top
        };
        if at_top {
            self.scroll_down(1);
        } else if self.grid().row > 0 {
            self.grid_mut().row -= 1;
        }
    }

    fn scroll_up(&mut self, n: usize) {
        let cols = self.cols;
        let g = self.grid_mut();
        let (top, bottom) = (g.scroll_top, g.scroll_bottom);
        let span = bottom - top + 1;
        let n = n.min(span);
        if n == 0 {
            return;
        }
        g.cells[top..=bottom].rotate_left(n);
        for r in bottom + 1 - n..=bottom {
            g.cells[r] = blank_row(cols);
        }
    }

    fn scroll_down(&mut self, n: usize) {
        let cols = self.cols;
        let g = self.grid_mut();
        let (top, bottom) = (g.scroll_top, g.scroll_bottom);
        let span = bottom - top + 1;
        let n = n.min(span);
        if n == 0 {
            return;
        }
        g.cells[top..=bottom].rotate_right(n);
        for r in top..top + n {
            g.cells[r] = blank_row(cols);
        }
    }

    // IL/DL reuse region scrolling with scroll_top narrowed to the cursor
    // row; both leave the cursor in column 0.
    fn insert_lines(&mut self, n: usize) {
        let (row, top, bottom) = {
            let g = self.grid();
            (g.row, g.scroll_top, g.scroll_bottom)
        };
        if row < top || row > bottom {
            return;
        }
        self.grid_mut().scroll_top = row;
        self.scroll_down(n);
        let g = self.grid_mut();
        g.scroll_top = top;
        g.col = 0;
    }

    fn delete_lines(&mut self, n: usize) {
        let (row, top, bottom) = {
            let g = self.grid();
            (g.row, g.scroll_top, g.scroll_bottom)
        };
        if row < top || row > bottom {
            return;
        }
        self.grid_mut().scroll_top = row;
        self.scroll_up(n);
        let g = self.grid_mut();
        g.scroll_top = top;
        g.col = 0;
    }

    fn insert_chars(&mut self, n: usize) {
        let cols = self.cols;
        let g = self.grid_mut();
        let col = g.col.min(cols);
        let n = n.min(cols - col);
        if n == 0 {
            return;
        }
        let row = &mut g.cells[g.row];
        row[col..].rotate_right(n);
        for c in &mut row[col..col + n] {
            *c = ' ';
        }
    }

    fn delete_chars(&mut self, n: usize) {
        let cols = self.cols;
        let g = self.grid_mut();
        let col = g.col.min(cols);
        let n = n.min(cols - col);
        if n == 0 {
            return;
        }
        let row = &mut g.cells[g.row];
        row[col..].rotate_left(n);
        for c in &mut row[cols - n..] {
            *c = ' ';
        }
    }

    fn erase_display(&mut self, mode: usize) {
        let cols = self.cols;
        let rows = self.rows;
        let g = self.grid_mut();
        match mode {
            0 => {
                let (row, col) = (g.row, g.col);
                for c in &mut g.cells[row][col.min(cols)..] {
                    *c = ' ';
                }
                for r in row + 1..rows {
                    g.cells[r] = blank_row(cols);
                }
            }
            1 => {
                let (row, col) = (g.row, g.col);
                for r in 0..row {
                    g.cells[r] = blank_row(cols);
                }
                for c in &mut g.cells[row][..cols.min(col + 1)] {
                    *c = ' ';
                }
            }
            2 | 3 => {
                for r in 0..rows {
                    g.cells[r] = blank_row(cols);
                }
            }
            _ => {}
        }
    }

    fn erase_line(&mut self, mode: usize) {
        let cols = self.cols;
        let g = self.grid_mut();
        let (row, col) = (g.row, g.col);
        match mode {
            0 => {
                for c in &mut g.cells[row][col.min(cols)..] {
                    *c = ' ';
                }
            }
            1 => {
                for c in &mut g.cells[row][..cols.min(col + 1)] {
                    *c = ' ';
                }
            }
            2 => g.cells[row] = blank_row(cols),
            _ => {}
        }
    }

    fn set_private_mode(&mut self, params: &[usize], set: bool) {
        for &p in params {
            match p {
                // Alternate screen buffer. Entering clears the alternate
                // grid; leaving restores the untouched main grid.
                47 | 1047 | 1049 => {
                    if set && !self.in_alt {
                        self.in_alt = true;
                        self.alt = Grid::new(self.cols, self.rows);
                    } else if !set && self.in_alt {
                        self.in_alt = false;
                    }
                }
                _ => {}
            }
        }
    }
}

/// Param at `idx`; empty or 0 substitutes `default`.
fn param(params: &Params, idx: usize, default: usize) -> usize {
    params
        .iter()
        .nth(idx)
        .and_then(|p| p.first())
        .copied()
        .map(|v| v as usize)
        .filter(|&v| v != 0)
        .unwrap_or(default)
}

impl Perform for Term {
    fn print(&mut self, c: char) {
        let cols = self.cols;
        if self.grid().col >= cols {
            // Deferred wrap: the previous print filled the last column.
            self.grid_mut().col = 0;
            self.linefeed();
        }
        let g = self.grid_mut();
        let (row, col) = (g.row, g.col);
        g.cells[row][col] = c;
        g.col += 1;
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\r' => self.grid_mut().col = 0,
            b'\n' => self.linefeed(),
            0x08 => {
                let g = self.grid_mut();
                if g.col > 0 {
                    g.col -= 1;
                }
            }
            b'\t' => {
                let cols = self.cols;
                let g = self.grid_mut();
                g.col = (g.col / 8 + 1) * 8;
                if g.col >= cols {
                    g.col = cols - 1;
                }
            }
            0x07 => {} // BEL
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        let cols = self.cols;
        let rows = self.rows;
        let private = intermediates.first() == Some(&b'?');
        match action {
            'H' | 'f' => {
                let row = param(params, 0, 1);
                let col = param(params, 1, 1);
                let g = self.grid_mut();
                g.row = (row - 1).min(rows - 1);
                g.col = (col - 1).min(cols - 1);
            }
            'A' => {
                let n = param(params, 0, 1);
                let g = self.grid_mut();
                g.row = g.row.saturating_sub(n).max(g.scroll_top);
            }
            'B' => {
                let n = param(params, 0, 1);
                let g = self.grid_mut();
                g.row = (g.row + n).min(g.scroll_bottom);
            }
            'C' => {
                let n = param(params, 0, 1);
                let g = self.grid_mut();
                g.col = (g.col + n).min(cols - 1);
            }
            'D' => {
                let n = param(params, 0, 1);
                let g = self.grid_mut();
                g.col = g.col.saturating_sub(n);
            }
            'E' => {
                let n = param(params, 0, 1);
                let g = self.grid_mut();
                g.row = (g.row + n).min(g.scroll_bottom);
                g.col = 0;
            }
            'F' => {
                let n = param(params, 0, 1);
                let g = self.grid_mut();
                g.row = g.row.saturating_sub(n).max(g.scroll_top);
                g.col = 0;
            }
            'G' => {
                let col = param(params, 0, 1);
                self.grid_mut().col = (col - 1).min(cols - 1);
            }
            'd' => {
                let row = param(params, 0, 1);
                self.grid_mut().row = (row - 1).min(rows - 1);
            }
            'J' => self.erase_display(param_or_zero(params, 0)),
            'K' => self.erase_line(param_or_zero(params, 0)),
            'X' => {
                let n = param(params, 0, 1);
                let g = self.grid_mut();
                let (row, col) = (g.row, g.col);
                for i in 0..n {
                    if col + i < cols {
                        g.cells[row][col + i] = ' ';
                    }
                }
            }
            'L' => self.insert_lines(param(params, 0, 1)),
            'M' => self.delete_lines(param(params, 0, 1)),
            '@' => self.insert_chars(param(params, 0, 1)),
            'P' => self.delete_chars(param(params, 0, 1)),
            'S' => self.scroll_up(param(params, 0, 1)),
            'T' => self.scroll_down(param(params, 0, 1)),
            'r' => {
                let top = param(params, 0, 1);
                let bottom = param(params, 1, rows);
                let top = (top - 1).min(rows - 1);
                let bottom = (bottom - 1).min(rows - 1);
                if top > bottom {
                    return;
                }
                let g = self.grid_mut();
                g.scroll_top = top;
                g.scroll_bottom = bottom;
                g.row = top;
                g.col = 0;
            }
            'h' | 'l' if private => {
                let ps: Vec<usize> = params
                    .iter()
                    .filter_map(|p| p.first())
                    .map(|&v| v as usize)
                    .collect();
                self.set_private_mode(&ps, action == 'h');
            }
            's' => {
                let g = self.grid_mut();
                g.saved_row = g.row;
                g.saved_col = g.col;
            }
            'u' => {
                let g = self.grid_mut();
                g.row = g.saved_row;
                g.col = g.saved_col;
            }
            // SGR / DSR / DA / DECSCUSR and everything else: no visible state.
            _ => {}
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, byte: u8) {
        match byte {
            b'7' => {
                let g = self.grid_mut();
                g.saved_row = g.row;
                g.saved_col = g.col;
            }
            b'8' => {
                let g = self.grid_mut();
                g.row = g.saved_row;
                g.col = g.saved_col;
            }
            b'M' => self.reverse_index(),
            // Charset designations and the rest carry no grid state.
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}
    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}
    fn put(&mut self, _byte: u8) {}
    fn unhook(&mut self) {}
}

/// Like `param` but a missing value means 0 (ED/EL select-mode semantics).
fn param_or_zero(params: &Params, idx: usize) -> usize {
    params
        .iter()
        .nth(idx)
        .and_then(|p| p.first())
        .copied()
        .unwrap_or(0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn screen(cols: usize, rows: usize) -> Screen {
        Screen::new(cols, rows)
    }

    #[test]
    fn clear_then_home_then_text() {
        let s = screen(120, 40);
        s.write(b"\x1b[2J\x1b[HHELLO");
        let rows = s.capture(0);
        assert_eq!(rows.len(), 40);
        assert_eq!(rows[0], "HELLO");
        assert_eq!(rows[39], "");
    }

    #[test]
    fn plain_lines() {
        let s = screen(80, 24);
        s.write(b"line one\r\nline two");
        let rows = s.capture(0);
        assert_eq!(rows[0], "line one");
        assert_eq!(rows[1], "line two");
        assert_eq!(s.cursor(), (1, 8));
    }

    #[test]
    fn cursor_up_and_erase_line() {
        let s = screen(80, 24);
        s.write(b"AAA\r\nBBB\x1b[A\x1b[2K Z");
        let rows = s.capture(0);
        assert_eq!(rows[0], "    Z");
        assert_eq!(rows[1], "BBB");
    }

    #[test]
    fn osc_title_is_discarded() {
        let s = screen(80, 24);
        s.write(b"\x1b]0;window title\x07Hi");
        assert_eq!(s.capture(0)[0], "Hi");
    }

    #[test]
    fn osc_with_st_terminator() {
        let s = screen(80, 24);
        s.write(b"\x1b]2;title\x1b\\ok");
        assert_eq!(s.capture(0)[0], "ok");
    }

    #[test]
    fn capture_limits_to_last_rows() {
        let s = screen(20, 5);
        s.write(b"a\r\nb\r\nc\r\nd\r\ne");
        assert_eq!(s.capture(2), vec!["d", "e"]);
        assert_eq!(s.capture(99).len(), 5);
    }

    #[test]
    fn capture_has_no_trailing_spaces() {
        let s = screen(10, 3);
        s.write(b"ab   \r\ncd");
        for line in s.capture(0) {
            assert!(!line.ends_with(' '));
        }
    }

    #[test]
    fn wrap_at_right_margin() {
        let s = screen(5, 4);
        s.write(b"abcdefg");
        let rows = s.capture(0);
        assert_eq!(rows[0], "abcde");
        assert_eq!(rows[1], "fg");
    }

    #[test]
    fn deferred_wrap_cursor_stays_in_grid() {
        let s = screen(5, 4);
        s.write(b"abcde");
        // The fifth char fills the last column; the wrap is pending.
        let (row, col) = s.cursor();
        assert_eq!(row, 0);
        assert!(col < 5);
    }

    #[test]
    fn linefeed_scrolls_at_bottom() {
        let s = screen(10, 3);
        s.write(b"one\r\ntwo\r\nthree\r\nfour");
        let rows = s.capture(0);
        assert_eq!(rows, vec!["two", "three", "four"]);
    }

    #[test]
    fn utf8_split_across_writes() {
        let s = screen(20, 3);
        s.write(b"caf\xc3");
        s.write(b"\xa9 ok");
        assert_eq!(s.capture(0)[0], "café ok");
    }

    #[test]
    fn backspace_and_overwrite() {
        let s = screen(20, 3);
        s.write(b"abc\x08X");
        assert_eq!(s.capture(0)[0], "abX");
    }

    #[test]
    fn tab_advances_to_next_stop() {
        let s = screen(20, 3);
        s.write(b"a\tb");
        assert_eq!(s.capture(0)[0], "a       b");
    }

    #[test]
    fn tab_clamps_at_right_margin() {
        let s = screen(10, 3);
        s.write(b"\t\t\tx");
        let (_, col) = s.cursor();
        assert!(col < 10);
    }

    #[test]
    fn cursor_position_is_clamped() {
        let s = screen(10, 5);
        s.write(b"\x1b[99;99H");
        assert_eq!(s.cursor(), (4, 9));
        s.write(b"\x1b[0;0H");
        assert_eq!(s.cursor(), (0, 0));
    }

    #[test]
    fn erase_display_below() {
        let s = screen(10, 4);
        s.write(b"aaa\r\nbbb\r\nccc\x1b[2;2H\x1b[J");
        let rows = s.capture(0);
        assert_eq!(rows[0], "aaa");
        assert_eq!(rows[1], "b");
        assert_eq!(rows[2], "");
    }

    #[test]
    fn erase_display_above() {
        let s = screen(10, 4);
        s.write(b"aaa\r\nbbb\r\nccc\x1b[2;2H\x1b[1J");
        let rows = s.capture(0);
        assert_eq!(rows[0], "");
        assert_eq!(rows[1], "  b");
        assert_eq!(rows[2], "ccc");
    }

    #[test]
    fn erase_line_right_and_left() {
        let s = screen(10, 2);
        s.write(b"abcdef\x1b[4G\x1b[K");
        assert_eq!(s.capture(0)[0], "abc");

        let s = screen(10, 2);
        s.write(b"abcdef\x1b[3G\x1b[1K");
        assert_eq!(s.capture(0)[0], "   def");
    }

    #[test]
    fn erase_chars_without_moving() {
        let s = screen(10, 2);
        s.write(b"abcdef\x1b[1;2H\x1b[3X");
        assert_eq!(s.capture(0)[0], "a   ef");
        assert_eq!(s.cursor(), (0, 1));
    }

    #[test]
    fn insert_and_delete_chars() {
        let s = screen(8, 2);
        s.write(b"abcdef\x1b[1;3H\x1b[2@");
        assert_eq!(s.capture(0)[0], "ab  cdef");

        let s = screen(8, 2);
        s.write(b"abcdef\x1b[1;2H\x1b[2P");
        assert_eq!(s.capture(0)[0], "adef");
    }

    #[test]
    fn insert_and_delete_lines() {
        let s = screen(10, 4);
        s.write(b"one\r\ntwo\r\nthree\x1b[2;1H\x1b[L");
        assert_eq!(s.capture(0), vec!["one", "", "two", "three"]);

        let s = screen(10, 4);
        s.write(b"one\r\ntwo\r\nthree\x1b[1;1H\x1b[M");
        assert_eq!(s.capture(0), vec!["two", "three", "", ""]);
    }

    #[test]
    fn scroll_region_confines_linefeed() {
        let s = screen(10, 5);
        // Region rows 2..4 (1-based); cursor homes to the region top.
        s.write(b"\x1b[2;4r");
        assert_eq!(s.cursor(), (1, 0));
        s.write(b"a\r\nb\r\nc\r\nd");
        assert_eq!(s.capture(0), vec!["", "b", "c", "d", ""]);
    }

    #[test]
    fn scroll_region_up_and_down_commands() {
        let s = screen(10, 4);
        s.write(b"one\r\ntwo\r\nthree\r\nfour\x1b[2S");
        assert_eq!(s.capture(0), vec!["three", "four", "", ""]);

        let s = screen(10, 4);
        s.write(b"one\r\ntwo\r\nthree\r\nfour\x1b[T");
        assert_eq!(s.capture(0), vec!["", "one", "two", "three"]);
    }

    #[test]
    fn inverted_scroll_region_is_ignored() {
        let s = screen(10, 10);
        s.write(b"\x1b[4;3H");
        s.write(b"\x1b[5;2r");
        assert_eq!(s.cursor(), (3, 2));
    }

    #[test]
    fn reverse_index_scrolls_down_at_top() {
        let s = screen(10, 3);
        s.write(b"one\r\ntwo\x1b[1;1H\x1bM");
        assert_eq!(s.capture(0), vec!["", "one", "two"]);
    }

    #[test]
    fn save_restore_cursor() {
        let s = screen(20, 5);
        s.write(b"abc\x1b7\r\nxxxx\x1b8Z");
        assert_eq!(s.capture(0)[0], "abcZ");

        let s = screen(20, 5);
        s.write(b"abc\x1b[s\r\nxxxx\x1b[uZ");
        assert_eq!(s.capture(0)[0], "abcZ");
    }

    #[test]
    fn alternate_grid_round_trip() {
        let s = screen(20, 5);
        s.write(b"main line\r\nsecond");
        let before = s.capture(0);

        s.write(b"\x1b[?1049h");
        // Entering must present a cleared alternate grid.
        assert_eq!(s.capture(0), vec![""; 5]);
        s.write(b"alt content");
        assert_eq!(s.capture(0)[0], "alt content");

        s.write(b"\x1b[?1049l");
        assert_eq!(s.capture(0), before);
    }

    #[test]
    fn alternate_mode_47_variant() {
        let s = screen(20, 3);
        s.write(b"keep me\x1b[?47htmp\x1b[?47l");
        assert_eq!(s.capture(0)[0], "keep me");
    }

    #[test]
    fn charset_designation_consumed() {
        let s = screen(20, 3);
        s.write(b"\x1b(Bhello\x1b)0world");
        assert_eq!(s.capture(0)[0], "helloworld");
    }

    #[test]
    fn sgr_and_friends_leave_no_state() {
        let s = screen(20, 3);
        s.write(b"\x1b[1;31mred\x1b[0m\x1b[6n\x1b[c plain");
        assert_eq!(s.capture(0)[0], "red plain");
    }

    #[test]
    fn cursor_stays_in_bounds_under_byte_soup() {
        let s = screen(13, 7);
        let soup: &[u8] = b"\x1b[99A\x1b[99B\x1b[99C\x1b[99D\x1b[0;0Hx\x1b[99;99Hy\
            \x1b[5;2r\x1b[2;6r\r\n\r\n\r\n\r\n\r\n\r\n\r\n\x1bM\x1bM\x1bM\
            \x1b[10L\x1b[10M\x1b[10@\x1b[10P\x1b[10X\x1b[10S\x1b[10T wrap wrap wrap wrap";
        s.write(soup);
        let (row, col) = s.cursor();
        assert!(row < 7);
        assert!(col < 13);
        let rows = s.capture(0);
        assert_eq!(rows.len(), 7);
    }
}
