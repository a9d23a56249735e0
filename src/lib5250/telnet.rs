//! Telnet option negotiation for 5250 sessions (RFC 1205, RFC 1572, RFC 4777)

use std::collections::BTreeMap;

use log::{debug, trace};

use crate::error::{TelnetError, TelnetResult};

/// Telnet command bytes
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;
pub const EOR: u8 = 239;

/// Subnegotiation qualifiers
pub const IS: u8 = 0;
pub const SEND: u8 = 1;

/// NEW-ENVIRON item codes
pub const VAR: u8 = 0;
pub const VALUE: u8 = 1;
pub const ENV_ESC: u8 = 2;
pub const USERVAR: u8 = 3;

/// Terminal type sent when none is configured
pub const DEFAULT_TERMINAL_TYPE: &str = "IBM-3179-2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TelnetOption {
    Binary = 0,
    TerminalType = 24,
    EndOfRecord = 25,
    NewEnviron = 39,
}

impl TelnetOption {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(TelnetOption::Binary),
            24 => Some(TelnetOption::TerminalType),
            25 => Some(TelnetOption::EndOfRecord),
            39 => Some(TelnetOption::NewEnviron),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetCommand {
    Will = 251,
    Wont = 252,
    Do = 253,
    Dont = 254,
}

impl TelnetCommand {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            WILL => Some(TelnetCommand::Will),
            WONT => Some(TelnetCommand::Wont),
            DO => Some(TelnetCommand::Do),
            DONT => Some(TelnetCommand::Dont),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Enabled,
    Refused,
}

/// Answers the host's option negotiation and holds the environment
/// variables offered through NEW-ENVIRON.
#[derive(Debug, Clone)]
pub struct TelnetNegotiator {
    option_states: BTreeMap<TelnetOption, NegotiationState>,
    environment_vars: BTreeMap<String, String>,
}

impl Default for TelnetNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetNegotiator {
    pub fn new() -> Self {
        let mut environment_vars = BTreeMap::new();
        environment_vars.insert("TERM".to_string(), DEFAULT_TERMINAL_TYPE.to_string());
        Self {
            option_states: BTreeMap::new(),
            environment_vars,
        }
    }

    /// Reply to `IAC <verb> <option>`. `DONT` and `WONT` are never answered.
    pub fn process_command(&mut self, command: u8, option: u8) -> TelnetResult<Option<Vec<u8>>> {
        let telnet_command = TelnetCommand::from_u8(command)
            .ok_or(TelnetError::InvalidCommand { command: vec![IAC, command, option] })?;
        let known = TelnetOption::from_u8(option);

        let reply = match telnet_command {
            TelnetCommand::Do => {
                if let Some(opt) = known {
                    self.option_states.insert(opt, NegotiationState::Enabled);
                    WILL
                } else {
                    WONT
                }
            }
            TelnetCommand::Will => {
                if let Some(opt) = known {
                    self.option_states.insert(opt, NegotiationState::Enabled);
                    DO
                } else {
                    DONT
                }
            }
            TelnetCommand::Dont | TelnetCommand::Wont => {
                if let Some(opt) = known {
                    self.option_states.insert(opt, NegotiationState::Refused);
                }
                trace!("telnet: host refused option {option}");
                return Ok(None);
            }
        };
        debug!("telnet: {command} {option} -> {reply} {option}");
        Ok(Some(vec![IAC, reply, option]))
    }

    /// Reply to `IAC SB <sb> IAC SE`; `sb` starts with the option byte.
    pub fn process_subnegotiation(&mut self, sb: &[u8]) -> TelnetResult<Option<Vec<u8>>> {
        let Some((&option, rest)) = sb.split_first() else {
            return Ok(None);
        };
        match TelnetOption::from_u8(option) {
            Some(TelnetOption::TerminalType) => {
                if rest.first() != Some(&SEND) {
                    debug!("telnet: terminal type subnegotiation without SEND ignored: {rest:02X?}");
                    return Ok(None);
                }
                let term = self.terminal_type().to_string();
                debug!("telnet: sending terminal type {term}");
                let mut out = vec![IAC, SB, option, IS];
                push_escaped(&mut out, term.as_bytes());
                out.extend_from_slice(&[IAC, SE]);
                Ok(Some(out))
            }
            Some(TelnetOption::NewEnviron) => {
                let mut out = vec![IAC, SB, option, IS];
                for (name, value) in &self.environment_vars {
                    out.push(VAR);
                    push_escaped(&mut out, name.as_bytes());
                    out.push(VALUE);
                    push_escaped(&mut out, value.as_bytes());
                }
                out.extend_from_slice(&[IAC, SE]);
                debug!("telnet: sending {} environment variables", self.environment_vars.len());
                Ok(Some(out))
            }
            _ => {
                trace!("telnet: ignoring subnegotiation for option {option}");
                Ok(None)
            }
        }
    }

    pub fn option_state(&self, option: TelnetOption) -> Option<NegotiationState> {
        self.option_states.get(&option).copied()
    }

    pub fn terminal_type(&self) -> &str {
        self.environment_vars
            .get("TERM")
            .map(String::as_str)
            .unwrap_or(DEFAULT_TERMINAL_TYPE)
    }

    pub fn setenv(&mut self, name: &str, value: &str) {
        self.environment_vars.insert(name.to_string(), value.to_string());
    }

    pub fn getenv(&self, name: &str) -> Option<&str> {
        self.environment_vars.get(name).map(String::as_str)
    }

    pub fn unsetenv(&mut self, name: &str) {
        self.environment_vars.remove(name);
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment_vars
    }
}

fn push_escaped(out: &mut Vec<u8>, data: &[u8]) {
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
}
