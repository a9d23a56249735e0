//! Error types for the 5250 session engine.
//!
//! Fatal conditions (transport loss, broken record framing, failed negotiation)
//! travel as [`TN5250Error`]. Keyboard edit violations are not errors; they put
//! the display into the keyboard-error state and ring the bell instead.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Top-level error type for session operations
#[derive(Debug)]
pub enum TN5250Error {
    /// Transport errors
    Network(NetworkError),
    /// Telnet negotiation errors
    Telnet(TelnetError),
    /// 5250 record and data-stream errors
    Protocol(ProtocolError),
    /// Rendering adapter errors
    Terminal(TerminalError),
    /// Field table errors
    Field(FieldError),
    /// Display buffer errors
    Buffer(BufferError),
    /// Configuration errors
    Config(ConfigError),
}

/// Transport related errors
#[derive(Debug)]
pub enum NetworkError {
    /// Connection refused by remote host
    ConnectionRefused { host: String, port: u16 },
    /// Transport timed out; treated the same as a disconnect
    Timeout { seconds: u64 },
    /// Connection lost during operation
    ConnectionLost { reason: String },
    /// Invalid `host[:port]` address
    InvalidAddress { address: String },
}

/// Telnet negotiation errors
#[derive(Debug)]
pub enum TelnetError {
    /// Invalid IAC command sequence
    InvalidCommand { command: Vec<u8> },
    /// The host went away or misbehaved before the first record arrived
    NegotiationFailed { reason: String },
}

/// 5250 record and data-stream errors
#[derive(Debug)]
pub enum ProtocolError {
    /// Declared record length disagrees with the bytes framed by IAC EOR
    Framing { declared: usize, actual: usize },
    /// A command ran past the end of its record
    IncompleteData { expected: usize, received: usize },
    /// Host data the terminal must reject with a negative response
    NegativeResponse { code: u32 },
}

/// Rendering adapter errors
#[derive(Debug)]
pub enum TerminalError {
    /// Painting the screen failed
    DisplayRender { message: String },
    /// Unrecognised key name or input sequence
    InputProcessing { input: String, reason: String },
}

/// Field table errors
#[derive(Debug)]
pub enum FieldError {
    /// Field index outside the table
    InvalidIndex { index: usize, count: usize },
}

/// Display buffer errors
#[derive(Debug)]
pub enum BufferError {
    /// Restore of a saved screen that is not on top of the save stack
    OutOfOrderRestore { expected: u8, requested: u8 },
    /// Restore with nothing saved
    EmptySaveStack,
    /// Screen dimensions of zero
    InvalidSize { rows: usize, cols: usize },
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    /// Invalid configuration parameter
    InvalidParameter { parameter: String, value: String, reason: String },
    /// Missing required configuration
    MissingRequired { parameter: String },
    /// Configuration file error
    FileError { path: String, error: String },
}

impl fmt::Display for TN5250Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TN5250Error::Network(err) => write!(f, "Network error: {err}"),
            TN5250Error::Telnet(err) => write!(f, "Telnet error: {err}"),
            TN5250Error::Protocol(err) => write!(f, "Protocol error: {err}"),
            TN5250Error::Terminal(err) => write!(f, "Terminal error: {err}"),
            TN5250Error::Field(err) => write!(f, "Field error: {err}"),
            TN5250Error::Buffer(err) => write!(f, "Buffer error: {err}"),
            TN5250Error::Config(err) => write!(f, "Configuration error: {err}"),
        }
    }
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::ConnectionRefused { host, port } =>
                write!(f, "Connection refused to {host}:{port}"),
            NetworkError::Timeout { seconds } =>
                write!(f, "Transport timed out after {seconds}s"),
            NetworkError::ConnectionLost { reason } =>
                write!(f, "Connection lost: {reason}"),
            NetworkError::InvalidAddress { address } =>
                write!(f, "Invalid network address: {address}"),
        }
    }
}

impl fmt::Display for TelnetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelnetError::InvalidCommand { command } =>
                write!(f, "Invalid telnet command: {command:?}"),
            TelnetError::NegotiationFailed { reason } =>
                write!(f, "Negotiation failed: {reason}"),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Framing { declared, actual } =>
                write!(f, "Record framing error: header declares {declared} bytes, record holds {actual}"),
            ProtocolError::IncompleteData { expected, received } =>
                write!(f, "Incomplete data: expected {expected} bytes, received {received}"),
            ProtocolError::NegativeResponse { code } =>
                write!(f, "Data stream rejected with negative response 0x{code:08X}"),
        }
    }
}

impl fmt::Display for TerminalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalError::DisplayRender { message } =>
                write!(f, "Display rendering error: {message}"),
            TerminalError::InputProcessing { input, reason } =>
                write!(f, "Input processing error for '{input}': {reason}"),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::InvalidIndex { index, count } =>
                write!(f, "Field index {index} out of range for table of {count} fields"),
        }
    }
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferError::OutOfOrderRestore { expected, requested } =>
                write!(f, "Restore of saved screen {requested} while {expected} is on top"),
            BufferError::EmptySaveStack =>
                write!(f, "Restore requested with no saved screen"),
            BufferError::InvalidSize { rows, cols } =>
                write!(f, "Invalid screen size {rows}x{cols}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidParameter { parameter, value, reason } =>
                write!(f, "Invalid configuration parameter '{parameter}' = '{value}': {reason}"),
            ConfigError::MissingRequired { parameter } =>
                write!(f, "Missing required configuration parameter: {parameter}"),
            ConfigError::FileError { path, error } =>
                write!(f, "Configuration file error '{path}': {error}"),
        }
    }
}

impl StdError for TN5250Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TN5250Error::Network(err) => Some(err),
            TN5250Error::Telnet(err) => Some(err),
            TN5250Error::Protocol(err) => Some(err),
            TN5250Error::Terminal(err) => Some(err),
            TN5250Error::Field(err) => Some(err),
            TN5250Error::Buffer(err) => Some(err),
            TN5250Error::Config(err) => Some(err),
        }
    }
}

impl StdError for NetworkError {}
impl StdError for TelnetError {}
impl StdError for ProtocolError {}
impl StdError for TerminalError {}
impl StdError for FieldError {}
impl StdError for BufferError {}
impl StdError for ConfigError {}

impl From<NetworkError> for TN5250Error {
    fn from(err: NetworkError) -> Self {
        TN5250Error::Network(err)
    }
}

impl From<TelnetError> for TN5250Error {
    fn from(err: TelnetError) -> Self {
        TN5250Error::Telnet(err)
    }
}

impl From<ProtocolError> for TN5250Error {
    fn from(err: ProtocolError) -> Self {
        TN5250Error::Protocol(err)
    }
}

impl From<TerminalError> for TN5250Error {
    fn from(err: TerminalError) -> Self {
        TN5250Error::Terminal(err)
    }
}

impl From<FieldError> for TN5250Error {
    fn from(err: FieldError) -> Self {
        TN5250Error::Field(err)
    }
}

impl From<BufferError> for TN5250Error {
    fn from(err: BufferError) -> Self {
        TN5250Error::Buffer(err)
    }
}

impl From<ConfigError> for TN5250Error {
    fn from(err: ConfigError) -> Self {
        TN5250Error::Config(err)
    }
}

impl From<io::Error> for TN5250Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => TN5250Error::Network(NetworkError::ConnectionRefused {
                host: "unknown".to_string(),
                port: 0,
            }),
            io::ErrorKind::TimedOut => TN5250Error::Network(NetworkError::Timeout { seconds: 0 }),
            io::ErrorKind::ConnectionAborted | io::ErrorKind::ConnectionReset => {
                TN5250Error::Network(NetworkError::ConnectionLost {
                    reason: err.to_string(),
                })
            },
            _ => TN5250Error::Network(NetworkError::ConnectionLost {
                reason: format!("IO Error: {err}"),
            }),
        }
    }
}

impl TN5250Error {
    /// True for errors that mean the peer went away rather than misbehaved.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            TN5250Error::Network(NetworkError::ConnectionLost { .. })
                | TN5250Error::Network(NetworkError::Timeout { .. })
        )
    }
}

/// Result type alias for session operations
pub type TN5250Result<T> = Result<T, TN5250Error>;

/// Specialized result types for different components
pub type TelnetResult<T> = Result<T, TelnetError>;
pub type ProtocolResult<T> = Result<T, ProtocolError>;
pub type TerminalResult<T> = Result<T, TerminalError>;
pub type FieldResult<T> = Result<T, FieldError>;
pub type BufferResult<T> = Result<T, BufferError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
