//! The display buffer: one screen of EBCDIC characters with their display
//! attributes, a cursor, and the insert-cursor position set by the host.
//!
//! All cursor movement wraps. Moving right past the last column continues on
//! the next row, and past the last row back to row 0.

use log::trace;

use super::codes::{aid_for_function_key, function_key_for_aid};
use crate::ebcdic::{is_attribute, EBCDIC_BLANK};
use crate::error::{BufferError, BufferResult};

/// Standard 5250 screen
pub const DEFAULT_WIDTH: usize = 80;
pub const DEFAULT_HEIGHT: usize = 24;
/// 27x132 alternate screen
pub const ALT_WIDTH: usize = 132;
pub const ALT_HEIGHT: usize = 27;

/// Normal (green) display attribute
pub const ATTR_NORMAL: u8 = 0x20;

/// One screen position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    /// EBCDIC character, 0x00 for null
    pub ch: u8,
    /// Display attribute in effect at this position
    pub attr: u8,
}

impl Default for Cell {
    fn default() -> Self {
        Cell { ch: 0x00, attr: ATTR_NORMAL }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayBuffer {
    width: usize,
    height: usize,
    cells: Vec<Cell>,
    cur_y: usize,
    cur_x: usize,
    ic_y: usize,
    ic_x: usize,
    header_data: Vec<u8>,
}

impl Default for DisplayBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl DisplayBuffer {
    /// A cleared buffer. Zero dimensions are bumped to one.
    pub fn new(width: usize, height: usize) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            cells: vec![Cell::default(); width * height],
            cur_y: 0,
            cur_x: 0,
            ic_y: 0,
            ic_x: 0,
            header_data: Vec::new(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Resize and clear.
    pub fn set_size(&mut self, rows: usize, cols: usize) -> BufferResult<()> {
        if rows == 0 || cols == 0 {
            return Err(BufferError::InvalidSize { rows, cols });
        }
        self.width = cols;
        self.height = rows;
        self.cells = vec![Cell::default(); rows * cols];
        self.header_data.clear();
        self.cur_y = 0;
        self.cur_x = 0;
        self.ic_y = 0;
        self.ic_x = 0;
        Ok(())
    }

    /// Null every cell, reset attributes and put the cursor at (0,0).
    pub fn clear(&mut self) {
        self.cells.fill(Cell::default());
        self.cur_y = 0;
        self.cur_x = 0;
    }

    /// Independent copy for the save-screen stack
    pub fn copy(&self) -> DisplayBuffer {
        self.clone()
    }

    pub fn cursor(&self) -> (usize, usize) {
        (self.cur_y, self.cur_x)
    }

    pub fn cursor_y(&self) -> usize {
        self.cur_y
    }

    pub fn cursor_x(&self) -> usize {
        self.cur_x
    }

    /// Linear position of the cursor
    pub fn cursor_pos(&self) -> usize {
        self.cur_y * self.width + self.cur_x
    }

    /// Move the cursor. Out-of-range coordinates are clamped to the screen.
    pub fn cursor_set(&mut self, y: usize, x: usize) {
        self.cur_y = y.min(self.height - 1);
        self.cur_x = x.min(self.width - 1);
    }

    pub fn cursor_set_pos(&mut self, pos: usize) {
        let pos = pos % self.cells.len();
        self.cur_y = pos / self.width;
        self.cur_x = pos % self.width;
    }

    pub fn right(&mut self, n: usize) {
        let pos = (self.cursor_pos() + n) % self.cells.len();
        self.cursor_set_pos(pos);
    }

    pub fn left(&mut self) {
        let len = self.cells.len();
        let pos = (self.cursor_pos() + len - 1) % len;
        self.cursor_set_pos(pos);
    }

    pub fn up(&mut self) {
        self.cur_y = (self.cur_y + self.height - 1) % self.height;
    }

    pub fn down(&mut self) {
        self.cur_y = (self.cur_y + 1) % self.height;
    }

    pub fn insert_cursor(&self) -> (usize, usize) {
        (self.ic_y, self.ic_x)
    }

    pub fn set_ic(&mut self, y: usize, x: usize) {
        self.ic_y = y.min(self.height - 1);
        self.ic_x = x.min(self.width - 1);
    }

    pub fn goto_ic(&mut self) {
        self.cur_y = self.ic_y;
        self.cur_x = self.ic_x;
    }

    pub fn cell(&self, y: usize, x: usize) -> Cell {
        self.cells[y * self.width + x]
    }

    pub fn char_at(&self, y: usize, x: usize) -> u8 {
        self.cells[y * self.width + x].ch
    }

    pub fn char_at_pos(&self, pos: usize) -> u8 {
        self.cells[pos].ch
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn row(&self, y: usize) -> &[Cell] {
        &self.cells[y * self.width..(y + 1) * self.width]
    }

    /// Raw characters of one row
    pub fn row_bytes(&self, y: usize) -> Vec<u8> {
        self.row(y).iter().map(|c| c.ch).collect()
    }

    /// All characters, row-major
    pub fn chars(&self) -> Vec<u8> {
        self.cells.iter().map(|c| c.ch).collect()
    }

    /// Overwrite a character without moving the cursor.
    pub fn put_char_at_pos(&mut self, pos: usize, ch: u8) {
        let was_attr = is_attribute(self.cells[pos].ch);
        self.cells[pos].ch = ch;
        if was_attr || is_attribute(ch) {
            self.propagate_attribute(pos);
        }
    }

    /// Write at the cursor and advance with wrap.
    pub fn addch(&mut self, ch: u8) {
        let pos = self.cursor_pos();
        self.put_char_at_pos(pos, ch);
        self.right(1);
    }

    /// Delete the character at the cursor, pulling the next `shiftcount`
    /// characters left. Never crosses the end of the row.
    pub fn del(&mut self, shiftcount: usize) {
        let n = shiftcount.min(self.width - 1 - self.cur_x);
        let start = self.cursor_pos();
        for i in 0..n {
            self.cells[start + i].ch = self.cells[start + i + 1].ch;
        }
        self.cells[start + n].ch = 0x00;
        trace!("del at ({}, {}) shifting {n}", self.cur_y, self.cur_x);
        self.refresh_attributes();
    }

    /// Insert `ch` at the cursor, pushing the next `shiftcount` characters
    /// right, then advance the cursor.
    ///
    /// Returns `false` and leaves the buffer untouched when the character that
    /// would be pushed off the end is data.
    pub fn ins(&mut self, ch: u8, shiftcount: usize) -> bool {
        let n = shiftcount.min(self.width - 1 - self.cur_x);
        let start = self.cursor_pos();
        let last = self.cells[start + n].ch;
        if last != 0x00 && last != EBCDIC_BLANK {
            return false;
        }
        for i in (0..n).rev() {
            self.cells[start + i + 1].ch = self.cells[start + i].ch;
        }
        self.cells[start].ch = ch;
        self.refresh_attributes();
        self.right(1);
        true
    }

    /// Scroll rows `top..=bot` by `lines`: positive up, negative down.
    /// Exposed rows are nulled; scrolling by the whole region or more nulls
    /// all of it.
    pub fn roll(&mut self, top: usize, bot: usize, lines: i32) {
        if lines == 0 || top > bot || bot >= self.height {
            return;
        }
        let span = bot - top;
        let w = self.width;
        if lines.unsigned_abs() as usize > span {
            self.cells[top * w..(bot + 1) * w].fill(Cell::default());
        } else if lines > 0 {
            let n = lines as usize;
            self.cells.copy_within((top + n) * w..(bot + 1) * w, top * w);
            self.cells[(bot + 1 - n) * w..(bot + 1) * w].fill(Cell::default());
        } else {
            let n = lines.unsigned_abs() as usize;
            self.cells.copy_within(top * w..(bot + 1 - n) * w, (top + n) * w);
            self.cells[top * w..(top + n) * w].fill(Cell::default());
        }
        self.refresh_attributes();
    }

    /// Blank (EBCDIC space) every position from `start` to `end`, inclusive.
    pub fn erase_range(&mut self, start: usize, end: usize) {
        let end = end.min(self.cells.len() - 1);
        if start > end {
            return;
        }
        for cell in &mut self.cells[start..=end] {
            cell.ch = EBCDIC_BLANK;
        }
        self.refresh_attributes();
    }

    /// Recompute every cell's attribute from the attribute bytes on screen.
    pub fn refresh_attributes(&mut self) {
        let mut attr = ATTR_NORMAL;
        for cell in &mut self.cells {
            if is_attribute(cell.ch) {
                attr = cell.ch;
            }
            cell.attr = attr;
        }
    }

    fn propagate_attribute(&mut self, pos: usize) {
        let attr = if is_attribute(self.cells[pos].ch) {
            self.cells[pos].ch
        } else if pos == 0 {
            ATTR_NORMAL
        } else {
            self.cells[pos - 1].attr
        };
        self.cells[pos].attr = attr;
        for cell in &mut self.cells[pos + 1..] {
            if is_attribute(cell.ch) {
                break;
            }
            cell.attr = attr;
        }
    }

    /// Move to the start of the next word, wrapping.
    pub fn nextword(&mut self) {
        let mut found_blank = false;
        for _ in 1..self.cells.len() {
            self.right(1);
            let c = self.char_at(self.cur_y, self.cur_x);
            if c <= EBCDIC_BLANK {
                found_blank = true;
            }
            if found_blank && c > EBCDIC_BLANK {
                break;
            }
        }
    }

    /// Move to the start of the previous word, wrapping.
    pub fn prevword(&mut self) {
        let mut state = 0;
        for _ in 1..self.cells.len() {
            self.left();
            let c = self.char_at(self.cur_y, self.cur_x);
            match state {
                0 if c <= EBCDIC_BLANK => state = 1,
                1 if c > EBCDIC_BLANK => state = 2,
                2 if c <= EBCDIC_BLANK => {
                    self.right(1);
                    return;
                }
                _ => {}
            }
        }
    }

    /// Format table header from the last SOH order
    pub fn header_data(&self) -> &[u8] {
        &self.header_data
    }

    pub fn set_header_data(&mut self, data: &[u8]) {
        self.header_data = data.to_vec();
    }

    /// Row used for operator error messages
    pub fn msg_line(&self) -> usize {
        match self.header_data.get(3) {
            Some(&l) if l >= 1 && (l as usize) <= self.height => l as usize - 1,
            _ => self.height - 1,
        }
    }

    /// Whether field data goes with `aid`. The SOH header masks F1..F24
    /// in bytes 6, 5 and 4; a set bit keeps the data back.
    pub fn send_data_for_aid_key(&self, aid: u8) -> bool {
        if self.header_data.len() <= 6 {
            return true;
        }
        let Some(n) = function_key_for_aid(aid) else {
            return true;
        };
        debug_assert_eq!(aid_for_function_key(n), Some(aid));
        let byte = 6 - (n as usize - 1) / 8;
        let mask = 1u8 << ((n - 1) % 8);
        self.header_data[byte] & mask == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addch_wraps_to_next_row() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.cursor_set(0, 79);
        buf.addch(0xC1);
        assert_eq!(buf.char_at(0, 79), 0xC1);
        assert_eq!(buf.cursor(), (1, 0));
    }

    #[test]
    fn test_moves_wrap_at_corners() {
        let mut buf = DisplayBuffer::new(80, 24);
        buf.left();
        assert_eq!(buf.cursor(), (23, 79));
        buf.right(1);
        assert_eq!(buf.cursor(), (0, 0));
        buf.up();
        assert_eq!(buf.cursor(), (23, 0));
        buf.down();
        assert_eq!(buf.cursor(), (0, 0));
    }

    #[test]
    fn test_del_clips_to_row() {
        let mut buf = DisplayBuffer::new(4, 2);
        for ch in [0xC1, 0xC2, 0xC3, 0xC4, 0xC5] {
            buf.addch(ch);
        }
        buf.cursor_set(0, 1);
        buf.del(10);
        assert_eq!(buf.row_bytes(0), vec![0xC1, 0xC3, 0xC4, 0x00]);
        assert_eq!(buf.row_bytes(1)[0], 0xC5);
    }

    #[test]
    fn test_ins_rejects_when_full() {
        let mut buf = DisplayBuffer::new(4, 1);
        for ch in [0xC1, 0xC2, 0xC3, 0xC4] {
            buf.addch(ch);
        }
        buf.cursor_set(0, 0);
        assert!(!buf.ins(0xC9, 3));
        assert_eq!(buf.row_bytes(0), vec![0xC1, 0xC2, 0xC3, 0xC4]);
        assert_eq!(buf.cursor(), (0, 0));
    }

    #[test]
    fn test_ins_shifts_and_advances() {
        let mut buf = DisplayBuffer::new(4, 1);
        buf.addch(0xC1);
        buf.addch(0xC2);
        buf.cursor_set(0, 0);
        assert!(buf.ins(0xC9, 3));
        assert_eq!(buf.row_bytes(0), vec![0xC9, 0xC1, 0xC2, 0x00]);
        assert_eq!(buf.cursor(), (0, 1));
    }

    #[test]
    fn test_roll_up_and_down() {
        let mut buf = DisplayBuffer::new(2, 4);
        for y in 0..4 {
            buf.cursor_set(y, 0);
            buf.addch(0xF0 + y as u8);
        }
        buf.roll(0, 3, 1);
        let col: Vec<u8> = (0..4).map(|y| buf.char_at(y, 0)).collect();
        assert_eq!(col, vec![0xF1, 0xF2, 0xF3, 0x00]);
        buf.roll(0, 3, -2);
        let col: Vec<u8> = (0..4).map(|y| buf.char_at(y, 0)).collect();
        assert_eq!(col, vec![0x00, 0x00, 0xF1, 0xF2]);
    }

    #[test]
    fn test_roll_beyond_region_blanks_it() {
        let mut buf = DisplayBuffer::new(2, 4);
        for y in 0..4 {
            buf.cursor_set(y, 0);
            buf.addch(0xC1);
        }
        buf.roll(1, 2, 5);
        let col: Vec<u8> = (0..4).map(|y| buf.char_at(y, 0)).collect();
        assert_eq!(col, vec![0xC1, 0x00, 0x00, 0xC1]);
    }

    #[test]
    fn test_attribute_runs() {
        let mut buf = DisplayBuffer::new(10, 1);
        buf.cursor_set(0, 2);
        buf.addch(0x22);
        buf.addch(0xC1);
        buf.cursor_set(0, 6);
        buf.addch(0x20);
        assert_eq!(buf.cell(0, 1).attr, ATTR_NORMAL);
        assert_eq!(buf.cell(0, 3).attr, 0x22);
        assert_eq!(buf.cell(0, 5).attr, 0x22);
        assert_eq!(buf.cell(0, 7).attr, 0x20);
        buf.cursor_set(0, 2);
        buf.addch(0xC2);
        assert_eq!(buf.cell(0, 3).attr, ATTR_NORMAL);
    }

    #[test]
    fn test_msg_line_from_header() {
        let mut buf = DisplayBuffer::new(80, 24);
        assert_eq!(buf.msg_line(), 23);
        buf.set_header_data(&[0, 0, 0, 22]);
        assert_eq!(buf.msg_line(), 21);
        buf.set_header_data(&[0, 0, 0, 99]);
        assert_eq!(buf.msg_line(), 23);
    }

    #[test]
    fn test_aid_key_mask() {
        let mut buf = DisplayBuffer::new(80, 24);
        assert!(buf.send_data_for_aid_key(0x31));
        buf.set_header_data(&[0, 0, 0, 0, 0x00, 0x01, 0x01]);
        assert!(!buf.send_data_for_aid_key(0x31)); // F1
        assert!(buf.send_data_for_aid_key(0x32)); // F2
        assert!(!buf.send_data_for_aid_key(0x39)); // F9
        assert!(buf.send_data_for_aid_key(0xF1)); // Enter
    }

    #[test]
    fn test_words() {
        let mut buf = DisplayBuffer::new(12, 1);
        for ch in [0xC1, 0xC2, 0x40, 0x40, 0xC3, 0xC4, 0x40, 0xC5] {
            buf.addch(ch);
        }
        buf.cursor_set(0, 0);
        buf.nextword();
        assert_eq!(buf.cursor(), (0, 4));
        buf.nextword();
        assert_eq!(buf.cursor(), (0, 7));
        buf.prevword();
        assert_eq!(buf.cursor(), (0, 4));
    }

    #[test]
    fn test_set_size_rejects_zero() {
        let mut buf = DisplayBuffer::default();
        assert!(buf.set_size(0, 80).is_err());
        buf.set_size(27, 132).unwrap();
        assert_eq!((buf.height(), buf.width()), (27, 132));
    }
}
