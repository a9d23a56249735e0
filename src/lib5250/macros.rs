//! Keyboard macros.
//!
//! `Memo` followed by a function key starts recording keystrokes into that
//! key's slot; the next `Memo` stops. `Exec` followed by a function key plays
//! the slot back. Slots persist in a plain text file:
//!
//! ```text
//! [M03]
//! WRKACTJOB[ENTER]
//! ```
//!
//! Data keys are written as themselves, other keys as `[NAME]`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::keyboard::Key;

/// Keystrokes one slot can hold
pub const MACRO_BUFSIZE: usize = 2000;

/// Longest line written to the macro file
const MAX_LINE: usize = 100;

/// Names older macro files use for keys we spell differently
const KEY_ALIASES: &[(&str, Key)] = &[
    ("ROLLDN", Key::RollDown),
    ("DUPLICATE", Key::Dup),
    ("ATTENTION", Key::Attention),
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum MacroState {
    Idle,
    /// Memo pressed; the next function key picks the slot
    SelectRecord,
    Recording { slot: u8, keys: Vec<Key> },
    /// Exec pressed; the next function key picks the slot
    SelectPlay,
    Playing { slot: u8, pos: usize },
}

/// What a function key meant to the macro recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroAction {
    /// Not taken; the key does its usual job
    Pass,
    /// Recording into the slot started
    Recording(u8),
    /// Playback of the slot started
    Playing(u8),
}

/// Recorded macros and the record/playback state
#[derive(Debug, Clone)]
pub struct Macros {
    slots: BTreeMap<u8, Vec<Key>>,
    state: MacroState,
    path: Option<PathBuf>,
}

impl Default for Macros {
    fn default() -> Self {
        Self::new()
    }
}

impl Macros {
    /// In-memory macros only
    pub fn new() -> Self {
        Self { slots: BTreeMap::new(), state: MacroState::Idle, path: None }
    }

    /// Macros backed by `path`, reloaded when a slot is picked and saved when
    /// a recording ends.
    pub fn with_file(path: impl Into<PathBuf>) -> Self {
        Self { path: Some(path.into()), ..Self::new() }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, MacroState::SelectRecord | MacroState::Recording { .. })
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, MacroState::SelectPlay | MacroState::Playing { .. })
    }

    pub fn get(&self, slot: u8) -> Option<&[Key]> {
        self.slots.get(&slot).map(Vec::as_slice)
    }

    pub fn set(&mut self, slot: u8, keys: Vec<Key>) {
        if keys.is_empty() {
            self.slots.remove(&slot);
        } else {
            self.slots.insert(slot, keys);
        }
    }

    /// Memo key: start waiting for a slot, or end the recording in progress.
    /// Returns whether the macro indicator should now be on. Ignored while
    /// playing.
    pub fn memo(&mut self) -> Option<bool> {
        match std::mem::replace(&mut self.state, MacroState::Idle) {
            MacroState::Idle => {
                self.state = MacroState::SelectRecord;
                Some(true)
            }
            MacroState::SelectRecord => Some(false),
            MacroState::Recording { slot, keys } => {
                debug!("macro F{slot} recorded, {} keys", keys.len());
                self.set(slot, keys);
                self.persist();
                Some(false)
            }
            playing => {
                self.state = playing;
                None
            }
        }
    }

    /// Exec key: start waiting for a slot, or cancel playback. Ignored while
    /// recording.
    pub fn exec(&mut self) -> Option<bool> {
        match self.state {
            MacroState::Idle => {
                self.state = MacroState::SelectPlay;
                Some(true)
            }
            MacroState::SelectPlay | MacroState::Playing { .. } => {
                self.state = MacroState::Idle;
                Some(false)
            }
            _ => None,
        }
    }

    /// Offer a function key to the recorder.
    pub fn function_key(&mut self, n: u8) -> MacroAction {
        if !(1..=24).contains(&n) {
            return MacroAction::Pass;
        }
        match self.state {
            MacroState::SelectRecord => {
                self.reload();
                self.state = MacroState::Recording { slot: n, keys: Vec::new() };
                MacroAction::Recording(n)
            }
            MacroState::SelectPlay => {
                self.reload();
                self.state = MacroState::Playing { slot: n, pos: 0 };
                MacroAction::Playing(n)
            }
            _ => MacroAction::Pass,
        }
    }

    /// Remember a key the operator pressed while recording.
    pub fn record(&mut self, key: Key) {
        if matches!(key, Key::Memo | Key::Exec) {
            return;
        }
        if let MacroState::Recording { slot, keys } = &mut self.state {
            if keys.len() < MACRO_BUFSIZE {
                keys.push(key);
            } else {
                warn!("macro F{slot} full, {key} not recorded");
            }
        }
    }

    /// Next key of the macro being played. The flag is true on the last key
    /// (or when the slot turns out empty), after which playback is over.
    pub fn next_key(&mut self) -> Option<(Option<Key>, bool)> {
        let MacroState::Playing { slot, pos } = self.state else {
            return None;
        };
        let keys = self.slots.get(&slot).map(Vec::as_slice).unwrap_or(&[]);
        let key = keys.get(pos).copied();
        let last = pos + 1 >= keys.len();
        self.state = if last {
            MacroState::Idle
        } else {
            MacroState::Playing { slot, pos: pos + 1 }
        };
        Some((key, last))
    }

    /// `R nnnn  Fnn` while recording, `P Fnn` while playing; empty when idle.
    pub fn status(&self) -> String {
        match &self.state {
            MacroState::Idle => String::new(),
            MacroState::SelectRecord => format!("R {MACRO_BUFSIZE:04}"),
            MacroState::Recording { slot, keys } => {
                format!("R {:04}  F{slot:02}", MACRO_BUFSIZE - keys.len())
            }
            MacroState::SelectPlay => "P".to_string(),
            MacroState::Playing { slot, .. } => format!("P F{slot:02}"),
        }
    }

    pub fn load(&mut self) -> ConfigResult<()> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let text = fs::read_to_string(&path).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        self.slots = parse_macros(&text);
        Ok(())
    }

    pub fn save(&self) -> ConfigResult<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        fs::write(path, format_macros(&self.slots)).map_err(|e| ConfigError::FileError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Pick up edits other sessions made; a missing file keeps what we have.
    fn reload(&mut self) {
        if self.path.as_ref().map_or(false, |p| p.exists()) {
            if let Err(e) = self.load() {
                warn!("macros: {e}");
            }
        }
    }

    fn persist(&self) {
        if let Err(e) = self.save() {
            warn!("macros: {e}");
        }
    }
}

/// `~/.tn5250macros`
pub fn default_macro_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tn5250macros"))
}

fn key_name(key: Key) -> String {
    key.to_string().to_ascii_uppercase()
}

fn parse_key_name(name: &str) -> Option<Key> {
    if name.chars().count() < 2 {
        return None;
    }
    KEY_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(name))
        .map(|(_, key)| *key)
        .or_else(|| name.parse::<Key>().ok())
        .filter(|key| !matches!(key, Key::Char(_) | Key::Quit))
}

/// Parse a macro file. Lines under a `[Mnn]` header (1..=24) append to that
/// slot; anything before the first header is ignored.
pub fn parse_macros(text: &str) -> BTreeMap<u8, Vec<Key>> {
    let mut slots: BTreeMap<u8, Vec<Key>> = BTreeMap::new();
    let mut current = None;
    for line in text.lines() {
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(n) = line
            .strip_prefix("[M")
            .and_then(|rest| rest.strip_suffix(']'))
            .and_then(|n| n.parse::<u8>().ok())
        {
            if (1..=24).contains(&n) {
                current = Some(n);
            }
            continue;
        }
        let Some(slot) = current else {
            continue;
        };
        if line.is_empty() {
            continue;
        }
        let keys = slots.entry(slot).or_default();
        let mut rest = line;
        while let Some(c) = rest.chars().next() {
            if c == '[' {
                if let Some(end) = rest.find(']') {
                    if let Some(key) = parse_key_name(&rest[1..end]) {
                        keys.push(key);
                        rest = &rest[end + 1..];
                        continue;
                    }
                }
            }
            keys.push(Key::Char(c));
            rest = &rest[c.len_utf8()..];
        }
    }
    slots
}

/// Inverse of [`parse_macros`]. Long macros wrap across lines.
pub fn format_macros(slots: &BTreeMap<u8, Vec<Key>>) -> String {
    let mut out = String::new();
    for (slot, keys) in slots {
        out.push_str(&format!("[M{slot:02}]\n"));
        let mut width = 0;
        for &key in keys {
            let text = match key {
                Key::Char(c) => c.to_string(),
                other => format!("[{}]", key_name(other)),
            };
            if width + text.len() > MAX_LINE {
                out.push('\n');
                width = 0;
            }
            width += text.len();
            out.push_str(&text);
        }
        out.push_str("\n\n");
    }
    out
}
