//! Key dispatch.
//!
//! Turns operator keys into edits of the display buffer and field table, or
//! into an AID for the session to send. Field-edit violations never fail:
//! they put the keyboard into pre-help with an error code and ring the bell.

use log::{debug, trace};

use super::codes::*;
use super::display::{Display, Indicators, KeyState, KEY_QUEUE_SIZE};
use super::field::{Adjust, FieldType};
use super::macros::MacroAction;
use crate::ebcdic::EBCDIC_BLANK;
use crate::keyboard::Key;

impl Display {
    /// Take one key from the operator. Keys the current keyboard state does
    /// not accept go to the typeahead queue and are replayed once the host
    /// unlocks the keyboard.
    pub fn do_keys(&mut self, key: Key) {
        self.macros.record(key);
        let accept = match self.keystate {
            KeyState::Unlocked | KeyState::Hardware => true,
            KeyState::Locked => matches!(key, Key::SysReq | Key::Attention),
            KeyState::PreHelp => matches!(key, Key::Reset | Key::Help | Key::Attention),
            KeyState::PostHelp => matches!(key, Key::Reset | Key::Attention),
        };
        if accept {
            if !self.key_queue.is_empty() {
                trace!("dropping {} typeahead keys", self.key_queue.len());
                self.key_queue.clear();
            }
            self.do_key(key);
        } else if self.key_queue.len() >= KEY_QUEUE_SIZE {
            self.beep();
        } else {
            trace!("typeahead {key}");
            self.key_queue.push_back(key);
        }
        self.update();
    }

    /// Process one key against the current keyboard state.
    pub fn do_key(&mut self, key: Key) {
        match self.keystate {
            KeyState::Unlocked => {}
            KeyState::Hardware => {
                if key != Key::Reset {
                    self.beep();
                    return;
                }
            }
            KeyState::Locked => {
                if !matches!(key, Key::SysReq | Key::Print | Key::Attention) {
                    self.beep();
                    return;
                }
            }
            KeyState::PreHelp => {
                if !matches!(key, Key::Reset | Key::Help | Key::Print | Key::Attention) {
                    self.beep();
                    return;
                }
            }
            KeyState::PostHelp => {
                let releases = matches!(
                    key,
                    Key::Enter | Key::Tab | Key::BackTab | Key::RollUp | Key::RollDown | Key::F(_)
                );
                if self.uninhibited && releases {
                    self.uninhibit();
                    self.keystate = KeyState::Unlocked;
                } else if !matches!(key, Key::Reset | Key::Attention) {
                    self.beep();
                    return;
                }
            }
        }

        // Field exit required: only keys that leave or fix the field get through.
        let mut clear_fer_after = false;
        if self.indicators().contains(Indicators::FER) {
            match key {
                Key::Left | Key::Backspace => {
                    self.indicator_clear(Indicators::FER);
                    return;
                }
                Key::Up | Key::Down | Key::Right => self.indicator_clear(Indicators::FER),
                Key::Enter
                | Key::FieldExit
                | Key::FieldMinus
                | Key::FieldPlus
                | Key::Tab
                | Key::BackTab
                | Key::Reset
                | Key::Help => clear_fer_after = true,
                Key::F(_) if self.uninhibited => clear_fer_after = true,
                Key::Memo | Key::Exec => {}
                _ => {
                    self.keyboard_error(KBD_FER);
                    return;
                }
            }
        }

        match key {
            Key::Reset => {
                self.uninhibit();
                self.keystate = KeyState::Unlocked;
            }
            Key::Backspace => self.kf_backspace(),
            Key::Left => self.kf_left(),
            Key::Right => self.kf_right(),
            Key::Up => self.kf_up(),
            Key::Down => self.kf_down(),
            Key::Help => self.do_aidkey(AID_HELP),
            Key::Home => self.kf_home(),
            Key::End => self.kf_end(),
            Key::Delete => self.kf_delete(),
            Key::Insert => self.kf_insert(),
            Key::Tab => self.kf_tab(),
            Key::BackTab => self.kf_backtab(),
            Key::Enter => self.do_aidkey(AID_ENTER),
            Key::RollDown => self.do_aidkey(AID_ROLL_DOWN),
            Key::RollUp => self.do_aidkey(AID_ROLL_UP),
            Key::Clear => self.do_aidkey(AID_CLEAR),
            Key::FieldExit => self.kf_field_exit(),
            Key::FieldPlus => self.kf_field_plus(),
            Key::FieldMinus => self.kf_field_minus(),
            Key::TestReq => self.do_aidkey(AID_TESTREQ),
            Key::SysReq => self.do_aidkey(AID_SYSREQ),
            Key::Attention => {
                self.uninhibit();
                self.keystate = KeyState::Unlocked;
                self.do_aidkey(AID_ATTN);
            }
            Key::Print => self.do_aidkey(AID_PRINT),
            Key::Dup => self.kf_dup(),
            Key::NextWord => self.kf_nextword(),
            Key::PrevWord => self.kf_prevword(),
            Key::NextField => self.kf_nextfld(),
            Key::PrevField => self.kf_prevfld(),
            Key::FieldHome => self.kf_fieldhome(),
            Key::FieldEnd => self.kf_fieldend(),
            Key::NewLine => self.kf_newline(),
            Key::Memo | Key::Exec => self.kf_macro(key),
            Key::F(n) => {
                if self.macros.function_key(n) == MacroAction::Pass {
                    match aid_for_function_key(n) {
                        Some(aid) => self.do_aidkey(aid),
                        None => self.beep(),
                    }
                }
            }
            Key::Char(c) if (0x20..=0xFF).contains(&u32::from(c)) => self.interactive_addch(c),
            Key::Char(_) | Key::Quit => {}
        }

        if clear_fer_after {
            self.indicator_clear(Indicators::FER);
        }
    }

    /// Memo and Exec toggle recording and playback; the MACRO indicator
    /// follows.
    pub fn kf_macro(&mut self, key: Key) {
        let on = if key == Key::Memo { self.macros.memo() } else { self.macros.exec() };
        match on {
            Some(true) => self.indicator_set(Indicators::MACRO),
            Some(false) => self.indicator_clear(Indicators::MACRO),
            None => debug!("{key} ignored, {}", self.macros.status()),
        }
    }

    /// The non-bypass field under the cursor
    fn input_field(&mut self) -> Option<usize> {
        self.current_field()
            .filter(|&i| self.fields.get(i).map_or(false, |f| !f.is_bypass()))
    }

    /// Type a data character into the field under the cursor.
    pub fn interactive_addch(&mut self, ch: char) {
        let Some(idx) = self.input_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        let Some(field) = self.fields.get(idx).cloned() else {
            return;
        };

        let mut ch = ch;
        if field.is_monocase() && ch.is_alphabetic() {
            let mut upper = ch.to_uppercase();
            if let (Some(u), None) = (upper.next(), upper.next()) {
                if u32::from(u) <= 0xFF {
                    ch = u;
                }
            }
        }

        let num_field = matches!(
            field.field_type(),
            FieldType::NumOnly | FieldType::SignedNum
        );
        if self.sign_key_hack && num_field {
            match ch {
                '+' => return self.kf_field_plus(),
                '-' => return self.kf_field_minus(),
                _ => {}
            }
        }

        if let Err(code) = field.valid_char(ch) {
            self.keyboard_error(code);
            return;
        }
        let Some(remote) = self.char_map().to_remote_char(ch) else {
            self.keyboard_error(KBD_DATA_DISALLOWED);
            return;
        };

        let pos = self.buffer.cursor_pos();
        let end_of_field = pos == field.end_pos();
        if end_of_field && field.is_signed() {
            self.keyboard_error(KBD_SIGNPOS);
            return;
        }

        if self.indicators().contains(Indicators::INSERT) {
            let data = self.field_data(idx);
            let last = field.data_length().saturating_sub(1);
            if data.get(last).map_or(false, |&c| c != 0x00 && c != EBCDIC_BLANK) {
                self.keyboard_error(KBD_NOROOM);
                return;
            }
            let mut shift = field.count_right(pos);
            if field.is_signed() {
                shift = shift.saturating_sub(1);
            }
            if !self.buffer.ins(remote, shift) {
                self.keyboard_error(KBD_NOROOM);
                return;
            }
        } else {
            self.buffer.addch(remote);
        }
        self.set_field_mdt(idx);

        if end_of_field {
            if field.is_fer() {
                self.indicator_set(Indicators::FER);
                self.buffer.cursor_set(field.end_row(), field.end_col());
            } else {
                self.field_adjust(idx);
                if field.is_auto_enter() {
                    self.do_aidkey(AID_ENTER);
                    return;
                }
                self.buffer.left();
                self.set_cursor_next_field();
            }
        }
    }

    /// Right-justify a field's data, filling on the left with `fill`. The
    /// sign position of a signed field is left alone.
    pub fn shift_right(&mut self, idx: usize, fill: u8) {
        let Some(field) = self.fields.get(idx).cloned() else {
            return;
        };
        self.set_field_mdt(idx);
        let mut data = self.field_data(idx);
        if data.is_empty() {
            return;
        }
        let end = field.data_length().saturating_sub(1).min(data.len() - 1);
        let is_blank = |c: u8| c == 0x00 || c == EBCDIC_BLANK;

        let mut n = 0;
        while n <= end && is_blank(data[n]) {
            data[n] = fill;
            n += 1;
        }
        if n <= end {
            while is_blank(data[end]) {
                data.copy_within(0..end, 1);
                data[0] = fill;
            }
        }
        for (i, ch) in data.into_iter().enumerate().take(end + 1) {
            self.set_field_char(idx, i, ch);
        }
    }

    /// Apply the field's right-adjust setting. Signed fields always right
    /// adjust with blanks.
    pub fn field_adjust(&mut self, idx: usize) {
        let Some(field) = self.fields.get(idx) else {
            return;
        };
        let adjust = if field.is_signed() { Adjust::RightBlank } else { field.adjust() };
        match adjust {
            Adjust::RightZero => self.shift_right(idx, EBCDIC_ZERO),
            Adjust::RightBlank => self.shift_right(idx, EBCDIC_BLANK),
            Adjust::None | Adjust::MandatoryFill => {}
        }
        self.set_field_mdt(idx);
    }

    /// Null the field from the cursor to its end (sparing the sign position),
    /// then adjust it. Does not advance.
    pub fn field_pad_and_adjust(&mut self, idx: usize) {
        let Some(field) = self.fields.get(idx).cloned() else {
            return;
        };
        if !self.indicators().contains(Indicators::FER) {
            let from = field.count_left(self.buffer.cursor_pos());
            for i in from..field.data_length() {
                self.set_field_char(idx, i, 0x00);
            }
        }
        self.field_adjust(idx);
    }

    /// Finish a field: auto-enter fields send Enter, others move on.
    fn leave_field(&mut self, idx: usize) {
        if self.fields.get(idx).map_or(false, |f| f.is_auto_enter()) {
            self.do_aidkey(AID_ENTER);
        } else {
            self.set_cursor_next_logical_field();
        }
    }

    pub fn kf_field_exit(&mut self) {
        let Some(idx) = self.input_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        self.field_pad_and_adjust(idx);
        self.leave_field(idx);
    }

    pub fn kf_field_plus(&mut self) {
        let Some(idx) = self.input_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        self.field_pad_and_adjust(idx);
        if let Some(f) = self.fields.get(idx) {
            if let Some(last) = f.length.checked_sub(1).filter(|_| f.is_signed()) {
                self.set_field_char(idx, last, 0x00);
            }
        }
        self.leave_field(idx);
    }

    /// Field minus: mark a numeric field negative.
    pub fn kf_field_minus(&mut self) {
        let Some(idx) = self.input_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        let Some(field) = self.fields.get(idx).cloned() else {
            return;
        };
        let kind = field.field_type();
        let numeric = matches!(
            kind,
            FieldType::NumOnly | FieldType::SignedNum
        );
        if !numeric {
            if self.field_minus_in_char {
                self.kf_field_exit();
            } else {
                self.keyboard_error(KBD_FLDM_DISALLOWED);
            }
            return;
        }
        self.field_pad_and_adjust(idx);
        if let Some(last) = field.length.checked_sub(1) {
            if field.is_signed() {
                self.set_field_char(idx, last, EBCDIC_MINUS);
            } else {
                let cur = self.field_data(idx).get(last).copied().unwrap_or(0x00);
                self.set_field_char(idx, last, (cur & 0x0F) | 0xD0);
            }
        }
        self.set_field_mdt(idx);
        self.leave_field(idx);
    }

    /// Fill the rest of the field with DUP characters.
    pub fn kf_dup(&mut self) {
        let Some(idx) = self.input_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        let Some(field) = self.fields.get(idx).cloned() else {
            return;
        };
        self.set_field_mdt(idx);
        if !field.is_dup_enabled() {
            self.keyboard_error(KBD_DUP_DISALLOWED);
            return;
        }
        for i in field.count_left(self.buffer.cursor_pos())..field.length {
            self.set_field_char(idx, i, DUP_CHAR);
        }
        if field.is_fer() {
            self.indicator_set(Indicators::FER);
            self.buffer.cursor_set(field.end_row(), field.end_col());
        } else {
            self.field_adjust(idx);
            self.leave_field(idx);
        }
    }

    pub fn kf_up(&mut self) {
        self.buffer.up();
    }

    pub fn kf_down(&mut self) {
        self.buffer.down();
    }

    pub fn kf_left(&mut self) {
        self.buffer.left();
    }

    pub fn kf_right(&mut self) {
        self.buffer.right(1);
    }

    /// Move left; from the first position of a field, to the last position
    /// of the previous one.
    pub fn kf_backspace(&mut self) {
        let Some(idx) = self.current_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        let at_start = self
            .fields
            .get(idx)
            .map_or(false, |f| f.start_pos() == self.buffer.cursor_pos());
        if !at_start {
            self.buffer.left();
            return;
        }
        if let Some(prev) = self.prev_field() {
            self.set_cursor_field(Some(prev));
            let len = self.fields.get(prev).map_or(1, |f| f.length);
            if len > 1 {
                self.buffer.right(len - 1);
            }
        }
    }

    /// Delete under the cursor, pulling the rest of the field left.
    pub fn kf_delete(&mut self) {
        let Some(idx) = self.input_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        self.set_field_mdt(idx);
        let shift = self
            .fields
            .get(idx)
            .map_or(0, |f| f.count_right(self.buffer.cursor_pos()));
        self.buffer.del(shift);
    }

    pub fn kf_insert(&mut self) {
        if self.indicators().contains(Indicators::INSERT) {
            self.indicator_clear(Indicators::INSERT);
        } else {
            self.indicator_set(Indicators::INSERT);
        }
    }

    pub fn kf_tab(&mut self) {
        self.set_cursor_next_logical_field();
    }

    /// Start of this field, or of the previous one when already there.
    pub fn kf_backtab(&mut self) {
        match self.current_field() {
            Some(idx) => {
                let at_start = self
                    .fields
                    .get(idx)
                    .map_or(true, |f| f.count_left(self.buffer.cursor_pos()) == 0);
                if at_start {
                    self.set_cursor_prev_logical_field();
                } else {
                    self.set_cursor_field(Some(idx));
                }
            }
            None => self.set_cursor_prev_logical_field(),
        }
    }

    /// Bottom right corner of the screen
    pub fn kf_end(&mut self) {
        let (h, w) = (self.height(), self.width());
        self.buffer.cursor_set(h - 1, w - 1);
    }

    /// Top left corner of the screen
    pub fn kf_home(&mut self) {
        self.buffer.cursor_set(0, 0);
    }

    /// Start of the current input field, else the home position. Pressed at
    /// the home position it asks the host for the previous record.
    pub fn kf_fieldhome(&mut self) {
        let pos = self.buffer.cursor_pos();
        if let Some(idx) = self.input_field() {
            if let Some(f) = self.fields.get(idx) {
                if f.start_pos() != pos {
                    let (y, x) = (f.start_row, f.start_col);
                    self.buffer.cursor_set(y, x);
                    return;
                }
            }
        }
        let home = self.home_position();
        if home == self.buffer.cursor() {
            self.do_aidkey(AID_RECORD_BS);
        } else {
            self.buffer.cursor_set(home.0, home.1);
        }
    }

    /// Just past the last non-null character of the current input field.
    pub fn kf_fieldend(&mut self) {
        let Some(idx) = self.input_field() else {
            self.keyboard_error(KBD_PROTECT);
            return;
        };
        let Some(field) = self.fields.get(idx).cloned() else {
            return;
        };
        let data = self.field_data(idx);
        match data.iter().rposition(|&c| c != 0x00) {
            Some(last) if last + 1 < field.length => {
                self.buffer.cursor_set_pos(field.start_pos() + last + 1);
            }
            Some(_) => self.buffer.cursor_set(field.end_row(), field.end_col()),
            None => self.buffer.cursor_set(field.start_row, field.start_col),
        }
    }

    pub fn kf_nextword(&mut self) {
        self.buffer.nextword();
    }

    pub fn kf_prevword(&mut self) {
        self.buffer.prevword();
    }

    /// Scan forward to the next word or field start.
    pub fn kf_nextfld(&mut self) {
        let mut found_blank = false;
        for _ in 1..self.buffer.cells().len() {
            self.buffer.right(1);
            let pos = self.buffer.cursor_pos();
            let c = self.buffer.char_at_pos(pos);
            if c <= EBCDIC_BLANK {
                found_blank = true;
            }
            if found_blank && c > EBCDIC_BLANK {
                break;
            }
            if self.fields.field_starting_at(pos).is_some() {
                break;
            }
        }
    }

    /// Scan back to the previous word or field start.
    pub fn kf_prevfld(&mut self) {
        let mut state = 0;
        for _ in 1..self.buffer.cells().len() {
            self.buffer.left();
            let pos = self.buffer.cursor_pos();
            if self.fields.field_starting_at(pos).is_some() {
                return;
            }
            let c = self.buffer.char_at_pos(pos);
            match state {
                0 if c <= EBCDIC_BLANK => state = 1,
                1 if c > EBCDIC_BLANK => state = 2,
                2 if c <= EBCDIC_BLANK => {
                    self.buffer.right(1);
                    return;
                }
                _ => {}
            }
        }
    }

    /// Column 0 of the next row; on to the next field if that is not an
    /// input position.
    pub fn kf_newline(&mut self) {
        let y = self.buffer.cursor_y();
        self.buffer.cursor_set(y, 0);
        self.buffer.down();
        if self.input_field().is_none() {
            self.set_cursor_next_field();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib5250::field::{Field, FFW_AUTO_ENTER, FFW_BYPASS, FFW_DUP_ENABLE, FFW_FER};

    const NUM_ONLY: u16 = 0x0300;
    const SIGNED: u16 = 0x0700;
    const RIGHT_ZERO: u16 = 0x0005;

    fn display(fields: &[(u16, usize, usize, usize)]) -> Display {
        let mut d = Display::new();
        for &(ffw, y, x, len) in fields {
            d.fields_mut().add(Field::new(ffw, 0x24, y, x, len, 80));
        }
        d.set_cursor_home();
        d
    }

    fn type_str(d: &mut Display, s: &str) {
        for c in s.chars() {
            d.do_key(Key::Char(c));
        }
    }

    #[test]
    fn test_typing_fills_and_advances() {
        let mut d = display(&[(0, 1, 0, 3), (0, 2, 0, 3)]);
        type_str(&mut d, "ABC");
        assert_eq!(d.field_text(0), "ABC");
        assert_eq!(d.cursor(), (2, 0));
        assert!(d.fields().get(0).unwrap().is_modified());
        assert!(d.fields().master_mdt());
    }

    #[test]
    fn test_numeric_field_rejects_letters() {
        let mut d = display(&[(NUM_ONLY | RIGHT_ZERO, 1, 0, 5)]);
        d.do_key(Key::Char('A'));
        assert_eq!(d.field_data(0), vec![0; 5]);
        assert_eq!(d.keystate(), KeyState::PreHelp);
        assert_eq!(d.key_src(), KBD_NUMONLY);
        assert_eq!(d.beeps(), 1);
        d.do_key(Key::Char('4'));
        assert_eq!(d.field_data(0), vec![0; 5]);
        d.do_key(Key::Reset);
        type_str(&mut d, "42");
        d.do_key(Key::FieldExit);
        assert_eq!(d.field_data(0), vec![0xF0, 0xF0, 0xF0, 0xF4, 0xF2]);
    }

    #[test]
    fn test_typing_outside_field_is_protected() {
        let mut d = display(&[(FFW_BYPASS, 1, 0, 5)]);
        d.set_cursor(1, 0);
        d.do_key(Key::Char('x'));
        assert_eq!(d.key_src(), KBD_PROTECT);
        assert!(d.inhibited());
        assert_eq!(d.buffer().char_at(1, 0), 0x00);
    }

    #[test]
    fn test_insert_mode_shifts_and_reports_full() {
        let mut d = display(&[(0, 1, 0, 4)]);
        type_str(&mut d, "AB");
        d.set_cursor(1, 0);
        d.do_key(Key::Insert);
        d.do_key(Key::Char('X'));
        assert_eq!(d.field_text(0), "XAB ");
        d.do_key(Key::Char('Y'));
        assert_eq!(d.field_text(0), "XYAB");
        d.do_key(Key::Char('Z'));
        assert_eq!(d.key_src(), KBD_NOROOM);
        assert_eq!(d.field_text(0), "XYAB");
    }

    #[test]
    fn test_field_minus_on_numeric_field() {
        let mut d = display(&[(NUM_ONLY | RIGHT_ZERO, 1, 0, 3), (0, 2, 0, 3)]);
        type_str(&mut d, "7");
        d.do_key(Key::FieldMinus);
        assert_eq!(d.field_data(0), vec![0xF0, 0xF0, 0xD7]);
        assert_eq!(d.cursor(), (2, 0));
    }

    #[test]
    fn test_field_sign_keys_on_empty_field() {
        for key in [Key::FieldPlus, Key::FieldMinus] {
            let mut d = display(&[(SIGNED, 1, 0, 0), (0, 2, 0, 3)]);
            d.set_cursor(1, 0);
            d.do_key(key);
            assert_eq!(d.cursor(), (2, 0));
            assert_eq!(d.keystate(), KeyState::Unlocked);

            let mut d = display(&[(NUM_ONLY | RIGHT_ZERO, 1, 0, 0), (0, 2, 0, 3)]);
            d.set_cursor(1, 0);
            d.do_key(key);
            assert_eq!(d.cursor(), (2, 0));
        }
    }

    #[test]
    fn test_field_minus_in_character_field() {
        let mut d = display(&[(0, 1, 0, 3)]);
        d.do_key(Key::FieldMinus);
        assert_eq!(d.key_src(), KBD_FLDM_DISALLOWED);

        let mut d = display(&[(0, 1, 0, 3), (0, 2, 0, 3)]);
        d.set_field_minus_in_char(true);
        d.do_key(Key::FieldMinus);
        assert_eq!(d.keystate(), KeyState::Unlocked);
        assert_eq!(d.cursor(), (2, 0));
    }

    #[test]
    fn test_signed_field_protects_sign_position() {
        let mut d = display(&[(SIGNED, 1, 0, 4)]);
        type_str(&mut d, "123");
        assert_eq!(d.cursor(), (1, 3));
        d.do_key(Key::Char('4'));
        assert_eq!(d.key_src(), KBD_SIGNPOS);
        d.do_key(Key::Reset);
        d.set_cursor(1, 1);
        d.do_key(Key::FieldMinus);
        assert_eq!(d.field_data(0), vec![0x40, 0x40, 0xF1, EBCDIC_MINUS]);
    }

    #[test]
    fn test_sign_key_hack() {
        let mut d = display(&[(SIGNED, 1, 0, 4), (0, 2, 0, 3)]);
        d.set_sign_key_hack(true);
        type_str(&mut d, "5-");
        assert_eq!(d.field_data(0), vec![0x40, 0x40, 0xF5, EBCDIC_MINUS]);
        assert_eq!(d.cursor(), (2, 0));
    }

    #[test]
    fn test_auto_enter_sends_enter_when_read_pending() {
        let mut d = display(&[(FFW_AUTO_ENTER, 1, 0, 2)]);
        d.set_read_opcode(CMD_READ_MDT_FIELDS);
        type_str(&mut d, "OK");
        assert_eq!(d.take_aid(), Some(AID_ENTER));
    }

    #[test]
    fn test_fer_field_waits_for_exit() {
        let mut d = display(&[(FFW_FER, 1, 0, 2), (0, 2, 0, 2)]);
        type_str(&mut d, "AB");
        assert!(d.indicators().contains(Indicators::FER));
        assert_eq!(d.cursor(), (1, 1));
        d.do_key(Key::FieldExit);
        assert!(!d.indicators().contains(Indicators::FER));
        assert_eq!(d.field_text(0), "AB");
        assert_eq!(d.cursor(), (2, 0));

        let mut d = display(&[(FFW_FER, 1, 0, 2), (0, 2, 0, 2)]);
        type_str(&mut d, "ABC");
        assert_eq!(d.key_src(), KBD_FER);
        assert_eq!(d.field_text(0), "AB");
    }

    #[test]
    fn test_dup_fills_rest_of_field() {
        let mut d = display(&[(FFW_DUP_ENABLE, 1, 0, 4), (0, 2, 0, 2)]);
        type_str(&mut d, "A");
        d.do_key(Key::Dup);
        assert_eq!(d.field_data(0), vec![0xC1, DUP_CHAR, DUP_CHAR, DUP_CHAR]);
        assert_eq!(d.cursor(), (2, 0));

        let mut d = display(&[(0, 1, 0, 4)]);
        d.do_key(Key::Dup);
        assert_eq!(d.key_src(), KBD_DUP_DISALLOWED);
    }

    #[test]
    fn test_delete_pulls_field_left() {
        let mut d = display(&[(0, 1, 0, 4)]);
        type_str(&mut d, "ABC");
        d.set_cursor(1, 0);
        d.do_key(Key::Delete);
        assert_eq!(d.field_data(0), vec![0xC2, 0xC3, 0x00, 0x00]);
    }

    #[test]
    fn test_tab_and_backtab() {
        let mut d = display(&[(0, 1, 0, 4), (FFW_BYPASS, 2, 0, 4), (0, 3, 0, 4)]);
        d.do_key(Key::Tab);
        assert_eq!(d.cursor(), (3, 0));
        d.do_key(Key::Tab);
        assert_eq!(d.cursor(), (1, 0));
        d.set_cursor(3, 2);
        d.do_key(Key::BackTab);
        assert_eq!(d.cursor(), (3, 0));
        d.do_key(Key::BackTab);
        assert_eq!(d.cursor(), (1, 0));
    }

    #[test]
    fn test_home_and_end_go_to_corners() {
        let mut d = display(&[(0, 5, 5, 4)]);
        d.do_key(Key::End);
        assert_eq!(d.cursor(), (23, 79));
        d.do_key(Key::Home);
        assert_eq!(d.cursor(), (0, 0));
    }

    #[test]
    fn test_field_home_and_end() {
        let mut d = display(&[(0, 5, 5, 6)]);
        type_str(&mut d, "AB");
        d.do_key(Key::FieldHome);
        assert_eq!(d.cursor(), (5, 5));
        d.do_key(Key::FieldEnd);
        assert_eq!(d.cursor(), (5, 7));
        d.set_read_opcode(CMD_READ_INPUT_FIELDS);
        d.do_key(Key::FieldHome);
        d.do_key(Key::FieldHome);
        assert_eq!(d.take_aid(), Some(AID_RECORD_BS));
    }

    #[test]
    fn test_backspace_moves_to_previous_field_end() {
        let mut d = display(&[(0, 1, 0, 4), (0, 2, 0, 4)]);
        d.set_cursor(2, 0);
        d.do_key(Key::Backspace);
        assert_eq!(d.cursor(), (1, 3));
        d.do_key(Key::Backspace);
        assert_eq!(d.cursor(), (1, 2));
    }

    #[test]
    fn test_locked_keyboard_queues_typeahead() {
        let mut d = display(&[(0, 1, 0, 4)]);
        d.lock();
        d.do_keys(Key::Char('A'));
        d.do_keys(Key::Enter);
        assert_eq!(d.typeahead(), 2);
        assert_eq!(d.buffer().char_at(1, 0), 0x00);
        d.do_keys(Key::Attention);
        assert_eq!(d.typeahead(), 0);
        assert_eq!(d.take_aid(), Some(AID_ATTN));
    }

    #[test]
    fn test_post_help_only_takes_reset() {
        let mut d = display(&[(0, 1, 0, 4)]);
        d.set_keystate(KeyState::PostHelp);
        d.do_key(Key::Char('A'));
        assert_eq!(d.beeps(), 1);
        d.set_uninhibited(true);
        d.set_read_opcode(CMD_READ_INPUT_FIELDS);
        d.do_key(Key::Enter);
        assert_eq!(d.keystate(), KeyState::Unlocked);
        assert_eq!(d.take_aid(), Some(AID_ENTER));
    }

    #[test]
    fn test_function_keys_map_to_aids() {
        let mut d = display(&[]);
        d.set_read_opcode(CMD_READ_INPUT_FIELDS);
        d.do_key(Key::F(3));
        assert_eq!(d.take_aid(), Some(0x33));
        d.do_key(Key::F(24));
        assert_eq!(d.take_aid(), Some(0xBC));
        d.do_key(Key::RollUp);
        assert_eq!(d.take_aid(), Some(AID_ROLL_UP));
    }

    #[test]
    fn test_macro_records_and_replays() {
        let mut d = display(&[(0, 1, 0, 5), (0, 2, 0, 5)]);
        d.do_keys(Key::Memo);
        assert!(d.indicators().contains(Indicators::MACRO));
        d.do_keys(Key::F(5));
        assert!(!d.has_pending_aid());
        for key in [Key::Char('o'), Key::Char('k'), Key::Tab] {
            d.do_keys(key);
        }
        d.do_keys(Key::Memo);
        assert!(!d.indicators().contains(Indicators::MACRO));
        assert_eq!(d.macros().get(5), Some(&[Key::Char('o'), Key::Char('k'), Key::Tab][..]));
        assert_eq!(d.cursor(), (2, 0));

        d.do_keys(Key::Exec);
        d.do_keys(Key::F(5));
        assert!(d.indicators().contains(Indicators::MACRO));
        assert!(!d.has_pending_aid());
        while let Some(key) = d.getkey() {
            d.do_keys(key);
        }
        assert!(d.field_text(1).starts_with("ok"));
        assert_eq!(d.cursor(), (1, 0));
        assert!(!d.indicators().contains(Indicators::MACRO));
    }

    #[test]
    fn test_function_key_sends_aid_outside_macros() {
        let mut d = display(&[(0, 1, 0, 5)]);
        d.set_read_opcode(CMD_READ_INPUT_FIELDS);
        d.do_keys(Key::Exec);
        d.do_keys(Key::Exec);
        assert!(!d.indicators().contains(Indicators::MACRO));
        d.do_keys(Key::F(3));
        assert_eq!(d.take_aid(), Some(0x33));
    }

    #[test]
    fn test_monocase_uppercases() {
        let mut d = display(&[(crate::lib5250::field::FFW_MONOCASE, 1, 0, 4)]);
        type_str(&mut d, "ab");
        assert_eq!(d.field_text(0), "AB  ");
    }
}
