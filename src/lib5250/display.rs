//! The 5250 display: a [`DisplayBuffer`] and its [`FieldTable`] plus the
//! operator-visible state around them (indicators, keyboard state, typeahead).
//!
//! Key handling lives in [`dispatch`](super::dispatch); this module holds the
//! state those handlers operate on and the pieces the session drives directly.

use std::collections::VecDeque;
use std::ops::BitOr;

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::buffer::{DisplayBuffer, ALT_HEIGHT, ALT_WIDTH, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use super::codes::is_pseudo_aid;
use super::field::{Field, FieldTable};
use super::macros::Macros;
use super::stream::RecordStream;
use crate::ebcdic::CharMap;
use crate::error::{BufferError, BufferResult, TN5250Result};
use crate::keyboard::Key;
use crate::terminal::{ScreenView, Terminal};

/// Typeahead capacity while the keyboard is locked
pub const KEY_QUEUE_SIZE: usize = 50;

/// Operator indicator set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Indicators(u8);

impl Indicators {
    pub const INHIBIT: Indicators = Indicators(0x01);
    pub const MESSAGE_WAITING: Indicators = Indicators(0x02);
    pub const X_SYSTEM: Indicators = Indicators(0x04);
    pub const X_CLOCK: Indicators = Indicators(0x08);
    pub const INSERT: Indicators = Indicators(0x10);
    pub const FER: Indicators = Indicators(0x20);
    pub const MACRO: Indicators = Indicators(0x40);

    pub const fn empty() -> Self {
        Indicators(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when every indicator in `other` is on
    pub const fn contains(self, other: Indicators) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Indicators) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self, other: Indicators) {
        self.0 &= !other.0;
    }
}

impl BitOr for Indicators {
    type Output = Indicators;

    fn bitor(self, rhs: Indicators) -> Indicators {
        Indicators(self.0 | rhs.0)
    }
}

/// Keyboard state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Unlocked,
    /// X SYSTEM: waiting for the host
    Locked,
    Hardware,
    /// An operator error is showing; only Reset and Help get through
    PreHelp,
    /// Help was sent for the error; waiting for Reset
    PostHelp,
}

/// One saved screen
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub buffer: DisplayBuffer,
    pub fields: FieldTable,
}

/// Deepest the save stack gets; ids are a byte, so this keeps them distinct.
pub const MAX_SAVED_SCREENS: usize = 256;

/// Saved screens. Restores must name the most recent save.
///
/// Ids count up and wrap. Once [`MAX_SAVED_SCREENS`] are held the oldest is
/// dropped, so every id on the stack stays unique.
#[derive(Debug, Clone, Default)]
pub struct SaveStack {
    frames: VecDeque<(u8, Snapshot)>,
    next_id: u8,
}

impl SaveStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a snapshot; the returned id is what the host echoes back on restore.
    pub fn push(&mut self, snapshot: Snapshot) -> u8 {
        if self.frames.len() == MAX_SAVED_SCREENS {
            if let Some((old, _)) = self.frames.pop_front() {
                warn!("save stack full, dropping saved screen {old}");
            }
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.frames.push_back((id, snapshot));
        id
    }

    pub fn restore(&mut self, id: u8) -> BufferResult<Snapshot> {
        let top = match self.frames.back() {
            None => return Err(BufferError::EmptySaveStack),
            Some(&(top, _)) => top,
        };
        if id != top {
            return Err(BufferError::OutOfOrderRestore { expected: top, requested: id });
        }
        self.next_id = top;
        self.frames
            .pop_back()
            .map(|(_, snap)| snap)
            .ok_or(BufferError::EmptySaveStack)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.next_id = 0;
    }
}

/// What [`Display::waitevent`] saw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitEvent {
    /// `n` bytes of host data landed in the caller's buffer
    HostData(usize),
    /// A key is ready for [`Display::getkey`]
    Key,
    /// Typeahead produced an AID for the session
    Aid,
    /// The host closed the connection
    HostClosed,
    /// The key source went away
    KeysClosed,
}

enum Incoming {
    Host(std::io::Result<usize>),
    Key(Option<Key>),
}

pub struct Display {
    pub(crate) buffer: DisplayBuffer,
    pub(crate) fields: FieldTable,
    saved: SaveStack,
    indicators: Indicators,
    indicators_dirty: bool,
    pub(crate) keystate: KeyState,
    pub(crate) key_src: u16,
    pending_insert: bool,
    saved_msg_line: Option<Vec<u8>>,
    pub(crate) key_queue: VecDeque<Key>,
    next_key: Option<Key>,
    pending_aid: Option<u8>,
    read_opcode: u8,
    map: CharMap,
    pub(crate) macros: Macros,
    terminal: Option<Box<dyn Terminal>>,
    keys: Option<mpsc::UnboundedReceiver<Key>>,
    beeps: usize,
    pub(crate) sign_key_hack: bool,
    pub(crate) field_minus_in_char: bool,
    pub(crate) uninhibited: bool,
    destroyed: bool,
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

impl Display {
    pub fn new() -> Self {
        Self {
            buffer: DisplayBuffer::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            fields: FieldTable::new(),
            saved: SaveStack::new(),
            indicators: Indicators::empty(),
            indicators_dirty: false,
            keystate: KeyState::Unlocked,
            key_src: 0,
            pending_insert: false,
            saved_msg_line: None,
            key_queue: VecDeque::with_capacity(KEY_QUEUE_SIZE),
            next_key: None,
            pending_aid: None,
            read_opcode: 0,
            map: CharMap::default(),
            macros: Macros::new(),
            terminal: None,
            keys: None,
            beeps: 0,
            sign_key_hack: false,
            field_minus_in_char: false,
            uninhibited: false,
            destroyed: false,
        }
    }

    pub fn set_terminal(&mut self, terminal: Box<dyn Terminal>) {
        self.terminal = Some(terminal);
    }

    pub fn has_terminal(&self) -> bool {
        self.terminal.is_some()
    }

    /// Keys typed by the operator arrive on this channel.
    pub fn set_key_source(&mut self, keys: mpsc::UnboundedReceiver<Key>) {
        self.keys = Some(keys);
    }

    pub fn set_char_map(&mut self, map: CharMap) {
        self.map = map;
    }

    pub fn char_map(&self) -> &CharMap {
        &self.map
    }

    pub fn set_macros(&mut self, macros: Macros) {
        self.macros = macros;
    }

    pub fn macros(&self) -> &Macros {
        &self.macros
    }

    pub fn set_sign_key_hack(&mut self, on: bool) {
        self.sign_key_hack = on;
    }

    pub fn set_field_minus_in_char(&mut self, on: bool) {
        self.field_minus_in_char = on;
    }

    pub fn set_uninhibited(&mut self, on: bool) {
        self.uninhibited = on;
    }

    pub fn buffer(&self) -> &DisplayBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut DisplayBuffer {
        &mut self.buffer
    }

    pub fn fields(&self) -> &FieldTable {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut FieldTable {
        &mut self.fields
    }

    pub fn width(&self) -> usize {
        self.buffer.width()
    }

    pub fn height(&self) -> usize {
        self.buffer.height()
    }

    pub fn cursor(&self) -> (usize, usize) {
        self.buffer.cursor()
    }

    pub fn set_cursor(&mut self, y: usize, x: usize) {
        self.buffer.cursor_set(y, x);
    }

    pub fn addch(&mut self, ch: u8) {
        self.buffer.addch(ch);
    }

    // ---- indicators and keyboard state ----

    pub fn indicators(&self) -> Indicators {
        self.indicators
    }

    pub fn indicator_set(&mut self, inds: Indicators) {
        self.indicators.set(inds);
        self.indicators_dirty = true;
    }

    /// Clear indicators. Clearing INHIBIT puts back a message line saved by
    /// Write Error Code.
    pub fn indicator_clear(&mut self, inds: Indicators) {
        self.indicators.clear(inds);
        self.indicators_dirty = true;
        if inds.contains(Indicators::INHIBIT) {
            if let Some(line) = self.saved_msg_line.take() {
                let start = self.buffer.msg_line() * self.buffer.width();
                for (i, ch) in line.into_iter().enumerate() {
                    self.buffer.put_char_at_pos(start + i, ch);
                }
            }
        }
    }

    pub fn inhibit(&mut self) {
        self.indicator_set(Indicators::INHIBIT);
    }

    pub fn uninhibit(&mut self) {
        self.indicator_clear(Indicators::INHIBIT);
    }

    pub fn inhibited(&self) -> bool {
        self.indicators.contains(Indicators::INHIBIT)
    }

    pub fn keystate(&self) -> KeyState {
        self.keystate
    }

    pub fn set_keystate(&mut self, state: KeyState) {
        if self.keystate != state {
            trace!("keyboard {:?} -> {:?}", self.keystate, state);
        }
        self.keystate = state;
    }

    /// Error source code shown while in pre-help
    pub fn key_src(&self) -> u16 {
        self.key_src
    }

    /// Operator error: lock the keyboard in pre-help showing `code`.
    pub fn keyboard_error(&mut self, code: u16) {
        debug!("keyboard error 0x{code:04X}");
        self.keystate = KeyState::PreHelp;
        self.key_src = code;
        self.inhibit();
        self.beep();
    }

    /// Host unlock: clear X SYSTEM and accept keys again.
    pub fn unlock(&mut self) {
        self.indicator_clear(Indicators::X_SYSTEM);
        if self.keystate == KeyState::Locked {
            self.keystate = KeyState::Unlocked;
        }
    }

    pub fn lock(&mut self) {
        self.indicator_set(Indicators::X_SYSTEM);
        self.keystate = KeyState::Locked;
    }

    // ---- read state shared with the session ----

    /// Read command the host is waiting on, or 0
    pub fn read_opcode(&self) -> u8 {
        self.read_opcode
    }

    pub fn set_read_opcode(&mut self, opcode: u8) {
        self.read_opcode = opcode;
    }

    /// Queue an attention key for the session. Real AIDs only count while the
    /// host has a read outstanding; SysReq, Attn and TestReq always do.
    pub fn do_aidkey(&mut self, aid: u8) {
        if self.read_opcode != 0 || is_pseudo_aid(aid) {
            trace!("aid 0x{aid:02X} queued");
            self.pending_aid = Some(aid);
        } else {
            debug!("aid 0x{aid:02X} dropped, no read pending");
        }
    }

    pub fn take_aid(&mut self) -> Option<u8> {
        self.pending_aid.take()
    }

    pub fn has_pending_aid(&self) -> bool {
        self.pending_aid.is_some()
    }

    // ---- screen-level operations ----

    fn reset_unit(&mut self, rows: usize, cols: usize) {
        if let Err(e) = self.buffer.set_size(rows, cols) {
            warn!("clear unit: {e}");
        }
        self.fields.clear();
        self.lock();
        self.indicator_clear(Indicators::INSERT | Indicators::INHIBIT | Indicators::FER);
        self.pending_insert = false;
        self.buffer.set_ic(0, 0);
        self.saved_msg_line = None;
        self.saved.clear();
    }

    /// Clear to a 24x80 screen.
    pub fn clear_unit(&mut self) {
        self.reset_unit(DEFAULT_HEIGHT, DEFAULT_WIDTH);
    }

    /// Clear to a 27x132 screen.
    pub fn clear_unit_alternate(&mut self) {
        self.reset_unit(ALT_HEIGHT, ALT_WIDTH);
    }

    pub fn clear_format_table(&mut self) {
        self.fields.clear();
        self.buffer.set_header_data(&[]);
        self.buffer.cursor_set(0, 0);
        self.lock();
        self.indicator_clear(Indicators::INSERT);
    }

    pub fn set_pending_insert(&mut self, y: usize, x: usize) {
        self.pending_insert = true;
        self.buffer.set_ic(y, x);
    }

    pub fn pending_insert(&self) -> bool {
        self.pending_insert
    }

    pub fn clear_pending_insert(&mut self) {
        self.pending_insert = false;
    }

    /// The home position: a pending insert cursor, else the first input
    /// field, else the top left corner.
    pub fn home_position(&self) -> (usize, usize) {
        if self.pending_insert {
            return self.buffer.insert_cursor();
        }
        match self.fields.first_non_bypass().and_then(|i| self.fields.get(i)) {
            Some(f) => (f.start_row, f.start_col),
            None => (0, 0),
        }
    }

    pub fn set_cursor_home(&mut self) {
        let (y, x) = self.home_position();
        self.buffer.cursor_set(y, x);
    }

    /// Save the message line before Write Error Code overwrites it.
    pub fn save_msg_line(&mut self) {
        let l = self.buffer.msg_line();
        self.saved_msg_line = Some(self.buffer.row_bytes(l));
    }

    /// Write `msg` at the start of the message line.
    pub fn set_msg_line(&mut self, msg: &[u8]) {
        let w = self.buffer.width();
        let start = self.buffer.msg_line() * w;
        for i in 0..w {
            let ch = msg.get(i).copied().unwrap_or(0x00);
            self.buffer.put_char_at_pos(start + i, ch);
        }
    }

    /// Snapshot the screen and format table.
    pub fn push(&mut self) -> u8 {
        let id = self.saved.push(Snapshot {
            buffer: self.buffer.copy(),
            fields: self.fields.clone(),
        });
        debug!("screen saved as {id}");
        id
    }

    /// Bring back the snapshot saved as `id`; it must be the latest one.
    pub fn restore(&mut self, id: u8) -> BufferResult<()> {
        let snap = self.saved.restore(id)?;
        self.buffer = snap.buffer;
        self.fields = snap.fields;
        debug!("screen {id} restored");
        Ok(())
    }

    pub fn saved_depth(&self) -> usize {
        self.saved.depth()
    }

    // ---- fields ----

    /// Index of the field under the cursor; also becomes the table's current
    /// field.
    pub fn current_field(&mut self) -> Option<usize> {
        let idx = self.fields.field_at_pos(self.buffer.cursor_pos());
        if let Some(i) = idx {
            let _ = self.fields.set_current(i);
        }
        idx
    }

    pub fn field(&self, idx: usize) -> Option<&Field> {
        self.fields.get(idx)
    }

    /// Raw contents of a field
    pub fn field_data(&self, idx: usize) -> Vec<u8> {
        match self.fields.get(idx) {
            Some(f) => {
                let start = f.start_pos();
                (0..f.length)
                    .map(|i| self.buffer.char_at_pos((start + i) % self.buffer.cells().len()))
                    .collect()
            }
            None => Vec::new(),
        }
    }

    pub(crate) fn set_field_char(&mut self, idx: usize, offset: usize, ch: u8) {
        if let Some(f) = self.fields.get(idx) {
            if offset < f.length {
                let pos = (f.start_pos() + offset) % self.buffer.cells().len();
                self.buffer.put_char_at_pos(pos, ch);
            }
        }
    }

    /// Local text of a field, nulls as spaces
    pub fn field_text(&self, idx: usize) -> String {
        self.map.to_local_string(&self.field_data(idx))
    }

    pub fn set_field_mdt(&mut self, idx: usize) {
        self.fields.set_mdt(idx);
    }

    /// Put the cursor at the start of field `idx`. A bypass field hands off
    /// to the next non-bypass field; with none left the cursor goes home.
    pub fn set_cursor_field(&mut self, idx: Option<usize>) {
        let target = idx.and_then(|i| {
            let f = self.fields.get(i)?;
            if f.is_bypass() {
                self.fields.next_non_bypass_after(f.start_pos())
            } else {
                Some(i)
            }
        });
        match target.and_then(|i| self.fields.get(i).map(|f| (i, f.start_row, f.start_col))) {
            Some((i, y, x)) => {
                self.buffer.cursor_set(y, x);
                let _ = self.fields.set_current(i);
            }
            None => self.set_cursor_home(),
        }
    }

    /// Next non-bypass field after the one under the cursor, or after the
    /// cursor position when it is not in a field. Wraps.
    pub fn next_field(&self) -> Option<usize> {
        let pos = self.buffer.cursor_pos();
        let from = match self.fields.field_at_pos(pos) {
            Some(i) => self.fields.get(i).map_or(pos, Field::start_pos),
            None => pos,
        };
        self.fields.next_non_bypass_after(from)
    }

    /// Previous non-bypass field, wrapping.
    pub fn prev_field(&self) -> Option<usize> {
        let pos = self.buffer.cursor_pos();
        let from = match self.fields.field_at_pos(pos) {
            Some(i) => self.fields.get(i).map_or(pos, Field::start_pos),
            None => pos,
        };
        self.fields.prev_non_bypass_before(from)
    }

    /// Move to the next field, following a cursor progression id if the
    /// current field has one.
    pub fn set_cursor_next_field(&mut self) {
        let target = match self.current_field().and_then(|i| self.fields.get(i)) {
            Some(f) if f.progression_id != 0 => self
                .fields
                .find_entry(f.progression_id as usize)
                .filter(|&i| self.fields.get(i).map_or(false, |t| !t.is_bypass()))
                .or_else(|| self.next_field()),
            _ => self.next_field(),
        };
        self.set_cursor_field(target);
    }

    /// Like [`set_cursor_next_field`](Self::set_cursor_next_field) but skips
    /// the remaining parts of a continued entry field.
    pub fn set_cursor_next_logical_field(&mut self) {
        let Some(cur) = self.current_field() else {
            self.set_cursor_next_field();
            return;
        };
        let entry = self.fields.entry_id(cur);
        loop {
            self.set_cursor_next_field();
            match self.current_field() {
                Some(i) if i != cur && self.fields.entry_id(i) == entry => continue,
                _ => break,
            }
        }
    }

    pub fn set_cursor_prev_field(&mut self) {
        let target = self.prev_field();
        self.set_cursor_field(target);
    }

    /// Back to the first part of the previous entry field.
    pub fn set_cursor_prev_logical_field(&mut self) {
        self.set_cursor_prev_field();
        let Some(idx) = self.current_field() else {
            return;
        };
        let entry = self.fields.entry_id(idx);
        if let Some(first) = self.fields.find_entry(entry) {
            self.set_cursor_field(Some(first));
        }
    }

    // ---- keys and rendering ----

    /// Next key from a playing macro or the operator, if one is waiting
    pub fn getkey(&mut self) -> Option<Key> {
        if let Some((key, last)) = self.macros.next_key() {
            if last {
                self.indicator_clear(Indicators::MACRO);
            }
            if key.is_some() {
                return key;
            }
        }
        if let Some(k) = self.next_key.take() {
            return Some(k);
        }
        self.keys.as_mut().and_then(|rx| rx.try_recv().ok())
    }

    /// Queued typeahead
    pub fn typeahead(&self) -> usize {
        self.key_queue.len()
    }

    /// Wait for host data or a key, whichever comes first.
    ///
    /// Typeahead is replayed first once the keyboard is no longer locked, and
    /// a pending operator error is sent to the host as Help without waiting
    /// for the operator to ask. Host bytes are read into `buf`; the caller
    /// feeds them to the stream.
    pub async fn waitevent<T>(&mut self, stream: &mut RecordStream<T>, buf: &mut [u8]) -> TN5250Result<WaitEvent>
    where
        T: AsyncRead + AsyncWrite + Unpin,
    {
        let mut handled = false;
        loop {
            if self.keystate != KeyState::Locked {
                if let Some(key) = self.key_queue.pop_front() {
                    trace!("replaying typeahead {key}");
                    self.do_key(key);
                    handled = true;
                    if self.has_pending_aid() {
                        self.update();
                        return Ok(WaitEvent::Aid);
                    }
                    continue;
                }
            }
            if self.keystate == KeyState::PreHelp && self.read_opcode != 0 {
                self.do_key(Key::Help);
                handled = true;
                if self.has_pending_aid() {
                    self.update();
                    return Ok(WaitEvent::Aid);
                }
            }
            break;
        }
        if handled {
            self.update();
        }

        let incoming = tokio::select! {
            n = stream.read_available(buf) => Incoming::Host(n),
            key = next_key(&mut self.keys) => Incoming::Key(key),
        };
        match incoming {
            Incoming::Host(Ok(0)) => Ok(WaitEvent::HostClosed),
            Incoming::Host(Ok(n)) => Ok(WaitEvent::HostData(n)),
            Incoming::Host(Err(e)) => Err(e.into()),
            Incoming::Key(Some(key)) => {
                self.next_key = Some(key);
                Ok(WaitEvent::Key)
            }
            Incoming::Key(None) => {
                self.keys = None;
                Ok(WaitEvent::KeysClosed)
            }
        }
    }

    /// Repaint through the attached terminal.
    pub fn update(&mut self) {
        if let Some(term) = self.terminal.as_mut() {
            let view = ScreenView {
                buffer: &self.buffer,
                indicators: self.indicators,
                keystate: self.keystate,
                key_src: self.key_src,
                map: &self.map,
            };
            if let Err(e) = term.update(&view) {
                warn!("terminal update failed: {e}");
            }
        }
        self.indicators_dirty = false;
    }

    /// Repaint just the indicators if any changed since the last paint.
    pub fn update_indicators(&mut self) {
        if !self.indicators_dirty {
            return;
        }
        if let Some(term) = self.terminal.as_mut() {
            let view = ScreenView {
                buffer: &self.buffer,
                indicators: self.indicators,
                keystate: self.keystate,
                key_src: self.key_src,
                map: &self.map,
            };
            if let Err(e) = term.update_indicators(&view) {
                warn!("terminal indicator update failed: {e}");
            }
        }
        self.indicators_dirty = false;
    }

    pub fn beep(&mut self) {
        self.beeps += 1;
        if let Some(term) = self.terminal.as_mut() {
            term.beep();
        }
    }

    /// Times the bell has rung
    pub fn beeps(&self) -> usize {
        self.beeps
    }

    pub fn terminal_enhanced(&self) -> bool {
        self.terminal.as_ref().map_or(false, |t| t.enhanced())
    }

    /// Release the terminal. Safe to call more than once; only the first call
    /// reaches the terminal.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Some(mut term) = self.terminal.take() {
            term.destroy();
        }
        self.keys = None;
        debug!("display torn down");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn next_key(keys: &mut Option<mpsc::UnboundedReceiver<Key>>) -> Option<Key> {
    match keys {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib5250::field::FFW_BYPASS;

    fn display_with_fields() -> Display {
        let mut d = Display::new();
        d.fields.add(Field::new(FFW_BYPASS, 0x20, 1, 0, 10, 80));
        d.fields.add(Field::new(0, 0x24, 2, 10, 5, 80));
        d.fields.add(Field::new(0, 0x24, 4, 0, 5, 80));
        d
    }

    #[test]
    fn test_indicator_set_and_clear() {
        let mut inds = Indicators::empty();
        inds.set(Indicators::X_SYSTEM | Indicators::INSERT);
        assert!(inds.contains(Indicators::X_SYSTEM));
        assert!(!inds.contains(Indicators::X_SYSTEM | Indicators::FER));
        inds.clear(Indicators::X_SYSTEM);
        assert_eq!(inds.bits(), 0x10);
    }

    #[test]
    fn test_save_stack_is_lifo() {
        let mut stack = SaveStack::new();
        let snap = Snapshot { buffer: DisplayBuffer::new(4, 1), fields: FieldTable::new() };
        assert_eq!(stack.push(snap.clone()), 0);
        assert_eq!(stack.push(snap.clone()), 1);
        assert!(matches!(
            stack.restore(0),
            Err(BufferError::OutOfOrderRestore { expected: 1, requested: 0 })
        ));
        stack.restore(1).unwrap();
        stack.restore(0).unwrap();
        assert!(matches!(stack.restore(0), Err(BufferError::EmptySaveStack)));
    }

    #[test]
    fn test_save_stack_depth_is_capped() {
        let mut stack = SaveStack::new();
        let snap = Snapshot { buffer: DisplayBuffer::new(4, 1), fields: FieldTable::new() };
        let ids: Vec<u8> = (0..300).map(|_| stack.push(snap.clone())).collect();
        assert_eq!(stack.depth(), MAX_SAVED_SCREENS);
        assert_eq!(ids[255], 255);
        assert_eq!(ids[256], 0);
        // the newest 256 restore in reverse order
        for &id in ids[44..].iter().rev() {
            stack.restore(id).unwrap();
        }
        assert!(matches!(stack.restore(ids[43]), Err(BufferError::EmptySaveStack)));
    }

    #[test]
    fn test_restore_reuses_id() {
        let mut stack = SaveStack::new();
        let snap = Snapshot { buffer: DisplayBuffer::new(4, 1), fields: FieldTable::new() };
        let first = stack.push(snap.clone());
        let second = stack.push(snap.clone());
        stack.restore(second).unwrap();
        assert_eq!(stack.push(snap), second);
        assert_ne!(first, second);
    }

    #[test]
    fn test_clear_unit_drops_saved_screens() {
        let mut d = display_with_fields();
        d.push();
        d.push();
        assert_eq!(d.saved_depth(), 2);
        d.clear_unit();
        assert_eq!(d.saved_depth(), 0);
        d.push();
        d.clear_unit_alternate();
        assert_eq!(d.saved_depth(), 0);
        assert!(matches!(d.restore(0), Err(BufferError::EmptySaveStack)));
    }

    #[test]
    fn test_push_restore_brings_back_fields() {
        let mut d = display_with_fields();
        d.buffer.cursor_set(2, 10);
        d.addch(0xC1);
        let id = d.push();
        d.clear_format_table();
        assert!(d.fields().is_empty());
        d.restore(id).unwrap();
        assert_eq!(d.fields().len(), 3);
        assert_eq!(d.buffer().char_at(2, 10), 0xC1);
    }

    #[test]
    fn test_clear_unit_alternate_locks() {
        let mut d = Display::new();
        d.indicator_set(Indicators::INSERT | Indicators::FER);
        d.clear_unit_alternate();
        assert_eq!((d.height(), d.width()), (27, 132));
        assert_eq!(d.keystate(), KeyState::Locked);
        assert!(d.indicators().contains(Indicators::X_SYSTEM));
        assert!(!d.indicators().contains(Indicators::INSERT));
        assert!(!d.indicators().contains(Indicators::FER));
    }

    #[test]
    fn test_home_skips_bypass_fields() {
        let mut d = display_with_fields();
        d.set_cursor_home();
        assert_eq!(d.cursor(), (2, 10));
        d.set_pending_insert(5, 5);
        d.set_cursor_home();
        assert_eq!(d.cursor(), (5, 5));
    }

    #[test]
    fn test_set_cursor_field_skips_bypass() {
        let mut d = display_with_fields();
        d.set_cursor_field(Some(0));
        assert_eq!(d.cursor(), (2, 10));
        assert_eq!(d.fields().current(), Some(1));
        d.set_cursor_field(Some(2));
        assert_eq!(d.cursor(), (4, 0));

        let mut d = Display::new();
        d.fields.add(Field::new(FFW_BYPASS, 0x20, 3, 0, 10, 80));
        d.set_cursor_field(Some(0));
        assert_eq!(d.cursor(), (0, 0));
    }

    #[test]
    fn test_next_and_prev_field_wrap() {
        let mut d = display_with_fields();
        d.set_cursor(0, 0);
        d.set_cursor_next_field();
        assert_eq!(d.cursor(), (2, 10));
        d.set_cursor_next_field();
        assert_eq!(d.cursor(), (4, 0));
        d.set_cursor_next_field();
        assert_eq!(d.cursor(), (2, 10));
        d.set_cursor_prev_field();
        assert_eq!(d.cursor(), (4, 0));
    }

    #[test]
    fn test_progression_id_jumps() {
        let mut d = Display::new();
        let mut first = Field::new(0, 0x24, 1, 0, 5, 80);
        first.apply_fcw(0x8803);
        d.fields.add(first);
        d.fields.add(Field::new(0, 0x24, 2, 0, 5, 80));
        d.fields.add(Field::new(0, 0x24, 3, 0, 5, 80));
        d.set_cursor(1, 2);
        d.set_cursor_next_field();
        assert_eq!(d.cursor(), (3, 0));
    }

    #[test]
    fn test_msg_line_restored_on_uninhibit() {
        let mut d = Display::new();
        d.set_cursor(23, 0);
        d.addch(0xC1);
        d.save_msg_line();
        d.set_msg_line(&[0xC5, 0xD9, 0xD9]);
        d.inhibit();
        assert_eq!(d.buffer().char_at(23, 0), 0xC5);
        d.uninhibit();
        assert_eq!(d.buffer().char_at(23, 0), 0xC1);
        assert_eq!(d.buffer().char_at(23, 1), 0x00);
    }

    #[test]
    fn test_aid_needs_pending_read() {
        let mut d = Display::new();
        d.do_aidkey(0xF1);
        assert_eq!(d.take_aid(), None);
        d.do_aidkey(0x02);
        assert_eq!(d.take_aid(), Some(0x02));
        d.set_read_opcode(0x42);
        d.do_aidkey(0xF1);
        assert_eq!(d.take_aid(), Some(0xF1));
    }

    #[test]
    fn test_destroy_runs_once() {
        let mut d = Display::new();
        d.destroy();
        d.destroy();
        assert!(d.is_destroyed());
    }
}
