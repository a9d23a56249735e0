//! 5250 protocol engine
//!
//! Layered bottom-up: telnet framing and records, the screen buffer and
//! format table, the display with its keyboard handling, and the session
//! state machine that ties them to a host connection.

pub mod buffer;
pub mod codes;
mod dispatch;
pub mod display;
pub mod field;
pub mod macros;
pub mod record;
pub mod session;
pub mod stream;
pub mod telnet;

// Re-exports for easy access
pub use buffer::DisplayBuffer;
pub use display::{Display, Indicators, KeyState, WaitEvent};
pub use field::{Field, FieldTable, FieldType};
pub use macros::Macros;
pub use record::{Record, RecordHeader};
pub use session::{Session, SessionEnd, SessionState};
pub use stream::RecordStream;
pub use telnet::TelnetNegotiator;
