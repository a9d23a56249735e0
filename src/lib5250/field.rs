//! Input fields and the format table.
//!
//! A field is defined by a Start Field order: a field format word (FFW),
//! optional field control words (FCWs), a display attribute and a length.
//! Fields are kept in row-major order and never overlap.

use log::debug;

use super::codes::{KBD_ALPHAONLY, KBD_DATA_DISALLOWED, KBD_NUMONLY, KBD_ONLY09};
use crate::error::{FieldError, FieldResult};

/// Field format word bits
pub const FFW_BYPASS: u16 = 0x2000;
pub const FFW_DUP_ENABLE: u16 = 0x1000;
pub const FFW_MODIFIED: u16 = 0x0800;
pub const FFW_TYPE_MASK: u16 = 0x0700;
pub const FFW_AUTO_ENTER: u16 = 0x0080;
pub const FFW_FER: u16 = 0x0040;
pub const FFW_MONOCASE: u16 = 0x0020;
pub const FFW_MANDATORY: u16 = 0x0008;
pub const FFW_ADJUST_MASK: u16 = 0x0007;

/// Field control word prefixes (high byte)
pub const FCW_RESEQUENCE: u8 = 0x80;
pub const FCW_CONTINUED: u8 = 0x86;
pub const FCW_CURSOR_PROGRESSION: u8 = 0x88;
pub const FCW_HIGHLIGHTED_ENTRY: u8 = 0x89;
pub const FCW_POINTER_AID: u8 = 0x8A;
pub const FCW_SELF_CHECK: u8 = 0xB1;

/// Continued-field low bytes
pub const CONTINUED_FIRST: u8 = 0x01;
pub const CONTINUED_LAST: u8 = 0x02;
pub const CONTINUED_MIDDLE: u8 = 0x03;
pub const CONTINUED_WORDWRAP: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    AlphaShift,
    AlphaOnly,
    NumShift,
    NumOnly,
    KataShift,
    DigitOnly,
    MagReader,
    SignedNum,
}

impl FieldType {
    pub fn from_ffw(ffw: u16) -> Self {
        match (ffw & FFW_TYPE_MASK) >> 8 {
            0 => FieldType::AlphaShift,
            1 => FieldType::AlphaOnly,
            2 => FieldType::NumShift,
            3 => FieldType::NumOnly,
            4 => FieldType::KataShift,
            5 => FieldType::DigitOnly,
            6 => FieldType::MagReader,
            _ => FieldType::SignedNum,
        }
    }
}

/// Mandatory-fill / adjust setting from the low FFW bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjust {
    None,
    RightZero,
    RightBlank,
    MandatoryFill,
}

impl Adjust {
    pub fn from_ffw(ffw: u16) -> Self {
        match ffw & FFW_ADJUST_MASK {
            5 => Adjust::RightZero,
            6 => Adjust::RightBlank,
            7 => Adjust::MandatoryFill,
            _ => Adjust::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfCheck {
    Mod10,
    Mod11,
}

/// One input field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub ffw: u16,
    pub attribute: u8,
    pub start_row: usize,
    pub start_col: usize,
    pub length: usize,
    /// Screen width the position was computed for
    pub width: usize,
    pub resequence: u8,
    pub progression_id: u8,
    pub highlight_attr: Option<u8>,
    pub pointer_aid: Option<u8>,
    pub self_check: Option<SelfCheck>,
    pub continued: Option<u8>,
}

impl Field {
    pub fn new(ffw: u16, attribute: u8, start_row: usize, start_col: usize, length: usize, width: usize) -> Self {
        Self {
            ffw,
            attribute,
            start_row,
            start_col,
            length,
            width,
            resequence: 0,
            progression_id: 0,
            highlight_attr: None,
            pointer_aid: None,
            self_check: None,
            continued: None,
        }
    }

    /// Record one field control word.
    pub fn apply_fcw(&mut self, fcw: u16) {
        let [kind, value] = fcw.to_be_bytes();
        match kind {
            FCW_RESEQUENCE => self.resequence = value,
            FCW_CURSOR_PROGRESSION => self.progression_id = value,
            FCW_HIGHLIGHTED_ENTRY => self.highlight_attr = Some(value),
            FCW_POINTER_AID => self.pointer_aid = Some(value),
            FCW_CONTINUED => self.continued = Some(value),
            FCW_SELF_CHECK => {
                self.self_check = match value {
                    0x40 => Some(SelfCheck::Mod11),
                    0xA0 => Some(SelfCheck::Mod10),
                    _ => None,
                }
            }
            _ => debug!("ignoring field control word 0x{fcw:04X}"),
        }
    }

    pub fn field_type(&self) -> FieldType {
        FieldType::from_ffw(self.ffw)
    }

    pub fn adjust(&self) -> Adjust {
        Adjust::from_ffw(self.ffw)
    }

    pub fn is_bypass(&self) -> bool {
        self.ffw & FFW_BYPASS != 0
    }

    pub fn is_dup_enabled(&self) -> bool {
        self.ffw & FFW_DUP_ENABLE != 0
    }

    pub fn is_modified(&self) -> bool {
        self.ffw & FFW_MODIFIED != 0
    }

    pub fn is_auto_enter(&self) -> bool {
        self.ffw & FFW_AUTO_ENTER != 0
    }

    pub fn is_fer(&self) -> bool {
        self.ffw & FFW_FER != 0
    }

    pub fn is_monocase(&self) -> bool {
        self.ffw & FFW_MONOCASE != 0
    }

    pub fn is_mandatory(&self) -> bool {
        self.ffw & FFW_MANDATORY != 0
    }

    pub fn is_signed(&self) -> bool {
        self.field_type() == FieldType::SignedNum
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.field_type(),
            FieldType::NumOnly | FieldType::DigitOnly | FieldType::SignedNum
        )
    }

    pub fn is_wordwrap(&self) -> bool {
        self.continued.map_or(false, |c| c & CONTINUED_WORDWRAP != 0)
    }

    /// Middle or last part of a continued entry field
    pub fn is_continued_tail(&self) -> bool {
        matches!(
            self.continued.map(|c| c & 0x03),
            Some(CONTINUED_LAST) | Some(CONTINUED_MIDDLE)
        )
    }

    pub fn start_pos(&self) -> usize {
        self.start_row * self.width + self.start_col
    }

    /// Linear position of the last cell
    pub fn end_pos(&self) -> usize {
        self.start_pos() + self.length.max(1) - 1
    }

    pub fn end_row(&self) -> usize {
        self.end_pos() / self.width
    }

    pub fn end_col(&self) -> usize {
        self.end_pos() % self.width
    }

    pub fn hit_test(&self, pos: usize) -> bool {
        pos >= self.start_pos() && pos <= self.end_pos()
    }

    /// Cells before `pos` within the field
    pub fn count_left(&self, pos: usize) -> usize {
        pos.saturating_sub(self.start_pos())
    }

    /// Cells after `pos` within the field
    pub fn count_right(&self, pos: usize) -> usize {
        self.end_pos().saturating_sub(pos)
    }

    /// Length available for data; signed fields keep the last cell for the sign.
    pub fn data_length(&self) -> usize {
        if self.is_signed() {
            self.length.saturating_sub(1)
        } else {
            self.length
        }
    }

    pub fn set_mdt(&mut self) {
        self.ffw |= FFW_MODIFIED;
    }

    pub fn clear_mdt(&mut self) {
        self.ffw &= !FFW_MODIFIED;
    }

    /// Whether the local character `ch` may be typed into this field.
    /// The error is the keyboard error code to show.
    pub fn valid_char(&self, ch: char) -> Result<(), u16> {
        let punct = matches!(ch, ',' | '.' | '-' | ' ');
        match self.field_type() {
            FieldType::AlphaShift | FieldType::NumShift | FieldType::KataShift => Ok(()),
            FieldType::AlphaOnly if ch.is_alphabetic() || punct => Ok(()),
            FieldType::AlphaOnly => Err(KBD_ALPHAONLY),
            FieldType::NumOnly if ch.is_ascii_digit() || punct => Ok(()),
            FieldType::NumOnly => Err(KBD_NUMONLY),
            FieldType::DigitOnly | FieldType::SignedNum if ch.is_ascii_digit() => Ok(()),
            FieldType::DigitOnly | FieldType::SignedNum => Err(KBD_ONLY09),
            FieldType::MagReader => Err(KBD_DATA_DISALLOWED),
        }
    }
}

/// The format table: every input field on the screen plus the current one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTable {
    fields: Vec<Field>,
    current: Option<usize>,
    master_mdt: bool,
}

impl FieldTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Field> {
        self.fields.get_mut(idx)
    }

    /// Drop every field and the master MDT.
    pub fn clear(&mut self) {
        self.fields.clear();
        self.current = None;
        self.master_mdt = false;
    }

    /// Add a field in row-major position, replacing any it overlaps.
    /// Returns its index.
    pub fn add(&mut self, field: Field) -> usize {
        let (start, end) = (field.start_pos(), field.end_pos());
        let current_start = self.current.and_then(|c| self.fields.get(c)).map(Field::start_pos);
        let before = self.fields.len();
        self.fields
            .retain(|f| f.end_pos() < start || f.start_pos() > end);
        if self.fields.len() != before {
            debug!("field at {start} replaced {} overlapping field(s)", before - self.fields.len());
        }
        if field.is_modified() {
            self.master_mdt = true;
        }
        let idx = self
            .fields
            .iter()
            .position(|f| f.start_pos() > start)
            .unwrap_or(self.fields.len());
        self.fields.insert(idx, field);
        // Follow the current field to its new index; it is gone if replaced
        self.current = current_start
            .filter(|&pos| pos < start || pos > end)
            .and_then(|pos| self.field_starting_at(pos));
        idx
    }

    /// Index of the field containing linear position `pos`
    pub fn field_at_pos(&self, pos: usize) -> Option<usize> {
        self.fields.iter().position(|f| f.hit_test(pos))
    }

    pub fn field_at(&self, y: usize, x: usize, width: usize) -> Option<usize> {
        self.field_at_pos(y * width + x)
    }

    /// Index of the field starting exactly at `pos`
    pub fn field_starting_at(&self, pos: usize) -> Option<usize> {
        self.fields.iter().position(|f| f.start_pos() == pos)
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn current_field(&self) -> Option<&Field> {
        self.current.and_then(|c| self.fields.get(c))
    }

    pub fn set_current(&mut self, idx: usize) -> FieldResult<&Field> {
        if idx >= self.fields.len() {
            return Err(FieldError::InvalidIndex { index: idx, count: self.fields.len() });
        }
        self.current = Some(idx);
        Ok(&self.fields[idx])
    }

    /// Advance the current field, wrapping. Bypass fields are not skipped.
    pub fn next_field(&mut self) -> Option<usize> {
        if self.fields.is_empty() {
            return None;
        }
        let next = match self.current {
            Some(c) => (c + 1) % self.fields.len(),
            None => 0,
        };
        self.current = Some(next);
        self.current
    }

    /// Step the current field back, wrapping.
    pub fn prev_field(&mut self) -> Option<usize> {
        if self.fields.is_empty() {
            return None;
        }
        let n = self.fields.len();
        let prev = match self.current {
            Some(c) => (c + n - 1) % n,
            None => n - 1,
        };
        self.current = Some(prev);
        self.current
    }

    pub fn first_non_bypass(&self) -> Option<usize> {
        self.fields.iter().position(|f| !f.is_bypass())
    }

    /// First non-bypass field starting after `pos`, wrapping
    pub fn next_non_bypass_after(&self, pos: usize) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| !f.is_bypass() && f.start_pos() > pos)
            .or_else(|| self.first_non_bypass())
    }

    /// Last non-bypass field starting before `pos`, wrapping
    pub fn prev_non_bypass_before(&self, pos: usize) -> Option<usize> {
        self.fields
            .iter()
            .rposition(|f| !f.is_bypass() && f.start_pos() < pos)
            .or_else(|| self.fields.iter().rposition(|f| !f.is_bypass()))
    }

    /// Entry number of a field, counting from 1. The middle and last parts
    /// of a continued field share the number of their first part.
    pub fn entry_id(&self, idx: usize) -> usize {
        self.fields
            .iter()
            .take(idx + 1)
            .filter(|f| !f.is_continued_tail())
            .count()
            .max(1)
    }

    /// First field of the entry numbered `id`; cursor progression FCWs name
    /// their target this way.
    pub fn find_entry(&self, id: usize) -> Option<usize> {
        if id == 0 {
            return None;
        }
        (0..self.fields.len()).find(|&i| self.entry_id(i) == id)
    }

    pub fn set_mdt(&mut self, idx: usize) {
        if let Some(f) = self.fields.get_mut(idx) {
            f.set_mdt();
            self.master_mdt = true;
        }
    }

    /// True once any field has been modified since the table was cleared
    pub fn master_mdt(&self) -> bool {
        self.master_mdt
    }

    /// Clear MDT on every field, or only on non-bypass ones.
    pub fn reset_mdt(&mut self, non_bypass_only: bool) {
        for f in &mut self.fields {
            if !non_bypass_only || !f.is_bypass() {
                f.clear_mdt();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(ffw: u16, row: usize, col: usize, len: usize) -> Field {
        Field::new(ffw, 0x24, row, col, len, 80)
    }

    #[test]
    fn test_ffw_decoding() {
        let f = field(0x2000 | 0x0300 | 0x0005, 0, 0, 5);
        assert!(f.is_bypass());
        assert_eq!(f.field_type(), FieldType::NumOnly);
        assert_eq!(f.adjust(), Adjust::RightZero);
        assert!(!f.is_mandatory());
        let f = field(0x0700 | FFW_MANDATORY | FFW_AUTO_ENTER, 0, 0, 5);
        assert!(f.is_signed());
        assert!(f.is_mandatory());
        assert!(f.is_auto_enter());
        assert_eq!(f.data_length(), 4);
    }

    #[test]
    fn test_positions_span_rows() {
        let f = field(0, 1, 75, 10);
        assert_eq!(f.start_pos(), 155);
        assert_eq!(f.end_pos(), 164);
        assert_eq!((f.end_row(), f.end_col()), (2, 4));
        assert!(f.hit_test(160));
        assert_eq!(f.count_left(160), 5);
        assert_eq!(f.count_right(160), 4);
    }

    #[test]
    fn test_valid_char() {
        assert_eq!(field(0x0300, 0, 0, 5).valid_char('A'), Err(KBD_NUMONLY));
        assert_eq!(field(0x0300, 0, 0, 5).valid_char('-'), Ok(()));
        assert_eq!(field(0x0100, 0, 0, 5).valid_char('7'), Err(KBD_ALPHAONLY));
        assert_eq!(field(0x0500, 0, 0, 5).valid_char('.'), Err(KBD_ONLY09));
        assert_eq!(field(0x0600, 0, 0, 5).valid_char('1'), Err(KBD_DATA_DISALLOWED));
        assert_eq!(field(0x0000, 0, 0, 5).valid_char('#'), Ok(()));
    }

    #[test]
    fn test_fcw() {
        let mut f = field(0, 0, 0, 5);
        f.apply_fcw(0x8803);
        f.apply_fcw(0x8680);
        f.apply_fcw(0xB140);
        assert_eq!(f.progression_id, 3);
        assert!(f.is_wordwrap());
        assert_eq!(f.self_check, Some(SelfCheck::Mod11));
    }

    #[test]
    fn test_add_keeps_scan_order_and_replaces_overlap() {
        let mut table = FieldTable::new();
        table.add(field(0, 5, 0, 10));
        table.add(field(0, 1, 0, 10));
        table.add(field(0, 3, 0, 10));
        let rows: Vec<usize> = table.iter().map(|f| f.start_row).collect();
        assert_eq!(rows, vec![1, 3, 5]);
        table.add(field(0x0300, 3, 5, 10));
        let rows: Vec<(usize, usize)> = table.iter().map(|f| (f.start_row, f.start_col)).collect();
        assert_eq!(rows, vec![(1, 0), (3, 5), (5, 0)]);
    }

    #[test]
    fn test_add_keeps_current_on_same_field() {
        let mut table = FieldTable::new();
        table.add(field(0, 5, 0, 5));
        table.add(field(0, 9, 0, 5));
        table.set_current(1).unwrap();
        // an earlier field shifts the current one up an index
        table.add(field(0, 1, 0, 5));
        assert_eq!(table.current(), Some(2));
        assert_eq!(table.get(2).unwrap().start_row, 9);
        // a later field leaves it alone
        table.add(field(0, 20, 0, 5));
        assert_eq!(table.current(), Some(2));
        // replacing it drops the current field
        table.add(field(0, 9, 2, 5));
        assert_eq!(table.current(), None);
    }

    #[test]
    fn test_navigation_is_circular_and_includes_bypass() {
        let mut table = FieldTable::new();
        table.add(field(0, 1, 0, 5));
        table.add(field(FFW_BYPASS, 2, 0, 5));
        table.add(field(0, 3, 0, 5));
        assert_eq!(table.next_field(), Some(0));
        assert_eq!(table.next_field(), Some(1));
        assert_eq!(table.next_field(), Some(2));
        assert_eq!(table.next_field(), Some(0));
        assert_eq!(table.prev_field(), Some(2));
        assert_eq!(table.next_non_bypass_after(81), Some(2));
        assert_eq!(table.next_non_bypass_after(241), Some(0));
        assert_eq!(table.prev_non_bypass_before(240), Some(0));
    }

    #[test]
    fn test_entry_ids_follow_continued_fields() {
        let mut table = FieldTable::new();
        table.add(field(0, 1, 0, 5));
        let mut first = field(0, 2, 0, 5);
        first.apply_fcw(0x8601);
        table.add(first);
        let mut last = field(0, 3, 0, 5);
        last.apply_fcw(0x8602);
        table.add(last);
        table.add(field(0, 4, 0, 5));
        let ids: Vec<usize> = (0..4).map(|i| table.entry_id(i)).collect();
        assert_eq!(ids, vec![1, 2, 2, 3]);
        assert_eq!(table.find_entry(2), Some(1));
        assert_eq!(table.find_entry(3), Some(3));
        assert_eq!(table.find_entry(0), None);
    }

    #[test]
    fn test_empty_table_has_no_current() {
        let mut table = FieldTable::new();
        assert_eq!(table.next_field(), None);
        assert_eq!(table.current(), None);
        assert!(table.set_current(0).is_err());
    }

    #[test]
    fn test_master_mdt() {
        let mut table = FieldTable::new();
        table.add(field(0, 1, 0, 5));
        assert!(!table.master_mdt());
        table.set_mdt(0);
        assert!(table.master_mdt());
        table.reset_mdt(false);
        assert!(!table.get(0).unwrap().is_modified());
        assert!(table.master_mdt());
        table.clear();
        assert!(!table.master_mdt());
    }
}
