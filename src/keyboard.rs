//! Abstract 5250 keys.
//!
//! Rendering adapters translate whatever their input device produces into
//! [`Key`] values; the key dispatcher only ever sees these.

use std::fmt;
use std::str::FromStr;

use crate::error::TerminalError;

/// A key on a 5250 keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Data key, in local (ISO-8859-1) encoding
    Char(char),
    /// Command function key F1..=F24
    F(u8),
    Enter,
    Tab,
    BackTab,
    Up,
    Down,
    Left,
    Right,
    Backspace,
    Delete,
    Insert,
    Home,
    End,
    NewLine,
    FieldExit,
    FieldPlus,
    FieldMinus,
    Dup,
    Reset,
    Help,
    Print,
    SysReq,
    Attention,
    TestReq,
    Clear,
    RollUp,
    RollDown,
    NextWord,
    PrevWord,
    NextField,
    PrevField,
    FieldHome,
    FieldEnd,
    /// Start or stop recording a macro
    Memo,
    /// Play back a macro
    Exec,
    /// Ends the session loop
    Quit,
}

const NAMED_KEYS: &[(&str, Key)] = &[
    ("enter", Key::Enter),
    ("tab", Key::Tab),
    ("backtab", Key::BackTab),
    ("up", Key::Up),
    ("down", Key::Down),
    ("left", Key::Left),
    ("right", Key::Right),
    ("backspace", Key::Backspace),
    ("delete", Key::Delete),
    ("insert", Key::Insert),
    ("home", Key::Home),
    ("end", Key::End),
    ("newline", Key::NewLine),
    ("fieldexit", Key::FieldExit),
    ("fieldplus", Key::FieldPlus),
    ("fieldminus", Key::FieldMinus),
    ("dup", Key::Dup),
    ("reset", Key::Reset),
    ("help", Key::Help),
    ("print", Key::Print),
    ("sysreq", Key::SysReq),
    ("attn", Key::Attention),
    ("testreq", Key::TestReq),
    ("clear", Key::Clear),
    ("rollup", Key::RollUp),
    ("rolldown", Key::RollDown),
    ("pageup", Key::RollDown),
    ("pagedown", Key::RollUp),
    ("nextword", Key::NextWord),
    ("prevword", Key::PrevWord),
    ("nextfield", Key::NextField),
    ("prevfield", Key::PrevField),
    ("fieldhome", Key::FieldHome),
    ("fieldend", Key::FieldEnd),
    ("memo", Key::Memo),
    ("exec", Key::Exec),
    ("quit", Key::Quit),
];

impl Key {
    /// Keys that end an input cycle and go to the host
    pub fn is_aid(&self) -> bool {
        matches!(
            self,
            Key::F(_)
                | Key::Enter
                | Key::Help
                | Key::Print
                | Key::SysReq
                | Key::Attention
                | Key::TestReq
                | Key::Clear
                | Key::RollUp
                | Key::RollDown
        )
    }
}

impl FromStr for Key {
    type Err = TerminalError;

    /// Parses key names such as `enter`, `f3` or `fieldexit` (case-insensitive).
    /// A single character is a data key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            return Ok(Key::Char(c));
        }
        let lower = s.trim().to_ascii_lowercase();
        if let Some(n) = lower.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
            if (1..=24).contains(&n) {
                return Ok(Key::F(n));
            }
        }
        NAMED_KEYS
            .iter()
            .find(|(name, _)| *name == lower)
            .map(|(_, key)| *key)
            .ok_or_else(|| TerminalError::InputProcessing {
                input: s.to_string(),
                reason: "unknown key name".to_string(),
            })
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Char(c) => write!(f, "{c}"),
            Key::F(n) => write!(f, "F{n}"),
            other => {
                let name = NAMED_KEYS
                    .iter()
                    .find(|(_, key)| key == other)
                    .map(|(name, _)| *name)
                    .unwrap_or("?");
                write!(f, "{name}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("Enter".parse::<Key>().unwrap(), Key::Enter);
        assert_eq!("f24".parse::<Key>().unwrap(), Key::F(24));
        assert_eq!("x".parse::<Key>().unwrap(), Key::Char('x'));
        assert_eq!("fieldexit".parse::<Key>().unwrap(), Key::FieldExit);
        assert_eq!("MEMO".parse::<Key>().unwrap(), Key::Memo);
        assert!("f25".parse::<Key>().is_err());
        assert!("bogus".parse::<Key>().is_err());
    }

    #[test]
    fn test_aid_classification() {
        assert!(Key::F(1).is_aid());
        assert!(Key::Enter.is_aid());
        assert!(!Key::FieldExit.is_aid());
        assert!(!Key::Char('1').is_aid());
    }

    #[test]
    fn test_display() {
        assert_eq!(Key::F(7).to_string(), "F7");
        assert_eq!(Key::Attention.to_string(), "attn");
    }
}
