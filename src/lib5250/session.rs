//! 5250 session: the protocol state machine between a [`RecordStream`] and a
//! [`Display`].
//!
//! Inbound records are decoded into display and format-table updates; AIDs
//! raised by the key dispatcher are encoded into outbound records. Replies
//! produced while decoding are queued and written once the record is done.

use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, trace, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use super::buffer::{ALT_HEIGHT, ALT_WIDTH, ATTR_NORMAL, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use super::codes::*;
use super::display::{Display, Indicators, KeyState, WaitEvent};
use super::field::{Field, CONTINUED_FIRST, CONTINUED_LAST};
use super::macros::{default_macro_path, Macros};
use super::record::*;
use super::stream::{RecordStream, READ_CHUNK};
use super::telnet::DEFAULT_TERMINAL_TYPE;
use crate::config::SessionConfig;
use crate::ebcdic::{is_displayable, CharMap, EBCDIC_BLANK};
use crate::error::{NetworkError, ProtocolError, ProtocolResult, TN5250Result, TelnetError};
use crate::keyboard::Key;

/// Telnet port used when `host` carries none
pub const DEFAULT_PORT: u16 = 23;
const DEFAULT_CONNECT_TIMEOUT: u64 = 30;
const QUERY_REPLY_LEN: usize = 67;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    /// Transport attached, nothing exchanged yet
    Connecting,
    /// Telnet options being exchanged; ends with the first 5250 record
    Negotiating,
    Interactive,
}

/// Why [`Session::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The host closed the connection or the transport failed
    Disconnected,
    /// The operator asked to quit
    Quit,
}

fn negative(code: u32) -> ProtocolError {
    ProtocolError::NegativeResponse { code }
}

pub struct Session<T> {
    config: SessionConfig,
    display: Display,
    stream: RecordStream<T>,
    state: SessionState,
    invited: bool,
    outbound: Vec<(RecordHeader, Vec<u8>)>,
    closed: bool,
}

impl Session<TcpStream> {
    /// Open a TCP connection to the configured `host` (`name` or
    /// `name:port`).
    pub async fn connect(config: SessionConfig) -> TN5250Result<Self> {
        let host = config.require_string("host")?;
        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| NetworkError::InvalidAddress { address: host.clone() })?;
                (name.to_string(), port)
            }
            None => (host.clone(), DEFAULT_PORT),
        };
        let secs = config
            .get_int_property("connect_timeout")
            .filter(|&s| s > 0)
            .map_or(DEFAULT_CONNECT_TIMEOUT, |s| s as u64);

        info!("connecting to {name}:{port}");
        let tcp = match tokio::time::timeout(
            Duration::from_secs(secs),
            TcpStream::connect((name.as_str(), port)),
        )
        .await
        {
            Ok(Ok(tcp)) => tcp,
            Ok(Err(e)) => {
                debug!("connect failed: {e}");
                return Err(NetworkError::ConnectionRefused { host: name, port }.into());
            }
            Err(_) => return Err(NetworkError::Timeout { seconds: secs }.into()),
        };
        tcp.set_nodelay(true)?;
        Session::new(config, tcp)
    }
}

impl<T> Session<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Attach a session to an already connected transport.
    pub fn new(config: SessionConfig, transport: T) -> TN5250Result<Self> {
        let mut stream = RecordStream::new(transport);
        for (key, value) in config.iter() {
            if let (Some(name), Some(value)) = (key.strip_prefix("env."), value.as_string()) {
                stream.setenv(name, value);
            }
        }

        let mut display = Display::new();
        display.set_char_map(CharMap::by_name(&config.get_string_property_or("map", "37"))?);
        display.set_sign_key_hack(config.get_boolean_property("sign_key_hack"));
        display.set_field_minus_in_char(config.get_boolean_property("field_minus_in_char"));
        display.set_uninhibited(config.get_boolean_property("uninhibited"));
        match config.get_string_property("macros").map(PathBuf::from).or_else(default_macro_path) {
            Some(path) => display.set_macros(Macros::with_file(path)),
            None => debug!("no home directory, macros kept in memory"),
        }

        match (config.get_int_property("width"), config.get_int_property("height")) {
            (None, None) => {}
            (Some(w), Some(h)) if w as usize == DEFAULT_WIDTH && h as usize == DEFAULT_HEIGHT => {}
            (Some(w), Some(h)) if w as usize == ALT_WIDTH && h as usize == ALT_HEIGHT => {
                display.buffer_mut().set_size(ALT_HEIGHT, ALT_WIDTH)?;
            }
            (w, h) => warn!("ignoring unsupported screen size {w:?}x{h:?}"),
        }

        Ok(Self {
            config,
            display,
            stream,
            state: SessionState::Connecting,
            invited: false,
            outbound: Vec::new(),
            closed: false,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn display(&self) -> &Display {
        &self.display
    }

    pub fn display_mut(&mut self) -> &mut Display {
        &mut self.display
    }

    pub fn stream(&self) -> &RecordStream<T> {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut RecordStream<T> {
        &mut self.stream
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the host has an outstanding invite
    pub fn invited(&self) -> bool {
        self.invited
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!("session {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Drive the session until the host goes away or the operator quits.
    /// Cleanup runs once whichever way the loop ends.
    pub async fn run(&mut self) -> TN5250Result<SessionEnd> {
        if self.closed {
            return Ok(SessionEnd::Disconnected);
        }
        self.set_state(SessionState::Negotiating);
        let result = self.main_loop().await;
        let negotiating = self.state == SessionState::Negotiating;
        self.disconnect().await;

        match result {
            Ok(SessionEnd::Disconnected) if negotiating => Err(TelnetError::NegotiationFailed {
                reason: "host closed the connection before the first record".to_string(),
            }
            .into()),
            Ok(end) => Ok(end),
            Err(e) if negotiating && e.is_disconnect() => {
                Err(TelnetError::NegotiationFailed { reason: e.to_string() }.into())
            }
            Err(e) if e.is_disconnect() => {
                info!("transport ended: {e}");
                Ok(SessionEnd::Disconnected)
            }
            Err(e) => Err(e),
        }
    }

    async fn main_loop(&mut self) -> TN5250Result<SessionEnd> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(aid) = self.display.take_aid() {
                self.handle_aidkey(aid).await?;
                continue;
            }
            match self.display.waitevent(&mut self.stream, &mut buf).await? {
                WaitEvent::HostData(n) => {
                    self.stream.receive_bytes(&buf[..n]).await?;
                    self.handle_receive().await?;
                }
                WaitEvent::Key => {
                    while let Some(key) = self.display.getkey() {
                        if key == Key::Quit {
                            info!("quit requested");
                            return Ok(SessionEnd::Quit);
                        }
                        self.display.do_keys(key);
                        if let Some(aid) = self.display.take_aid() {
                            self.handle_aidkey(aid).await?;
                        }
                    }
                }
                WaitEvent::Aid => {}
                WaitEvent::HostClosed => {
                    self.stream.discard_partial();
                    return Ok(SessionEnd::Disconnected);
                }
                WaitEvent::KeysClosed => debug!("key source closed"),
            }
        }
    }

    /// Tear down the display and the transport. Only the first call does
    /// anything.
    pub async fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stream.discard_partial();
        self.outbound.clear();
        self.display.destroy();
        if let Err(e) = self.stream.shutdown().await {
            debug!("transport shutdown: {e}");
        }
        self.set_state(SessionState::Disconnected);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Decode every complete record, send the replies, repaint.
    pub async fn handle_receive(&mut self) -> TN5250Result<()> {
        self.process_pending_records();
        self.flush_outbound().await?;
        self.display.update();
        Ok(())
    }

    /// Decode every complete record queued in the stream without touching
    /// the transport. Replies stay queued. Returns the number of records.
    pub fn process_pending_records(&mut self) -> usize {
        let mut count = 0;
        while let Some(mut record) = self.stream.get_record() {
            if self.state == SessionState::Negotiating || self.state == SessionState::Connecting {
                self.set_state(SessionState::Interactive);
            }
            self.process_record(&mut record);
            count += 1;
        }
        count
    }

    /// Apply one record's opcode, then its data-stream commands.
    pub fn process_record(&mut self, record: &mut Record) {
        let opcode = record.opcode();
        trace!("record opcode 0x{opcode:02X} flags 0x{:02X}", record.flags());
        match opcode {
            OP_PUT_GET | OP_INVITE => {
                self.invited = true;
                self.display.indicator_clear(Indicators::X_CLOCK);
            }
            OP_OUTPUT_ONLY => {
                // The SysReq menu refused a choice; two status bytes follow
                if record.flags() & FLAG_SRQ != 0 {
                    match record.get_bytes(2) {
                        Ok(status) => debug!("output only status {status:02X?}"),
                        Err(e) => debug!("output only: {e}"),
                    }
                }
            }
            OP_CANCEL_INVITE => {
                self.display.indicator_set(Indicators::X_CLOCK);
                self.queue(RecordHeader::new(OP_CANCEL_INVITE), Vec::new());
                self.invited = false;
            }
            OP_MESSAGE_ON => {
                self.display.indicator_set(Indicators::MESSAGE_WAITING);
                self.display.beep();
            }
            OP_MESSAGE_OFF => self.display.indicator_clear(Indicators::MESSAGE_WAITING),
            OP_NO_OP | OP_SAVE_SCR | OP_RESTORE_SCR | OP_READ_IMMED | OP_READ_SCR => {}
            other => warn!("unknown record opcode 0x{other:02X}"),
        }
        if !record.is_chain_end() {
            self.process_stream(record);
        }
    }

    /// Run the `ESC command` pairs of a record.
    fn process_stream(&mut self, record: &mut Record) {
        while !record.is_chain_end() {
            match record.get_byte() {
                Ok(ESC) => {}
                Ok(other) => {
                    debug!("expected ESC, got 0x{other:02X}; ignoring rest of record");
                    record.skip_to_end();
                    return;
                }
                Err(_) => return,
            }
            let command = match record.get_byte() {
                Ok(c) => c,
                Err(e) => {
                    warn!("record ends after ESC: {e}");
                    return;
                }
            };
            debug!("command 0x{command:02X}");
            match self.process_command(command, record) {
                Ok(()) => {}
                Err(ProtocolError::NegativeResponse { code }) => self.send_error(code, record),
                Err(e) => {
                    warn!("command 0x{command:02X}: {e}");
                    record.skip_to_end();
                }
            }
        }
    }

    fn process_command(&mut self, command: u8, record: &mut Record) -> ProtocolResult<()> {
        match command {
            CMD_CLEAR_UNIT => {
                self.display.clear_unit();
                self.display.set_read_opcode(0);
            }
            CMD_CLEAR_UNIT_ALTERNATE => {
                let param = record.get_byte()?;
                if param != 0x00 && param != 0x80 {
                    return Err(negative(NR_INVALID_CLEAR_UNIT_ALT));
                }
                self.display.clear_unit_alternate();
                self.display.set_read_opcode(0);
            }
            CMD_CLEAR_FORMAT_TABLE => {
                self.display.clear_format_table();
                self.display.set_read_opcode(0);
            }
            CMD_WRITE_TO_DISPLAY => self.write_to_display(record)?,
            CMD_WRITE_ERROR_CODE | CMD_WRITE_ERROR_CODE_WINDOW => self.write_error_code(command, record)?,
            CMD_READ_INPUT_FIELDS | CMD_READ_MDT_FIELDS | CMD_READ_MDT_FIELDS_ALT => {
                self.read_command(command, record)?
            }
            CMD_READ_SCREEN_IMMEDIATE => {
                let screen = self.display.buffer().chars();
                self.queue(RecordHeader::new(OP_NO_OP), screen);
            }
            CMD_READ_IMMEDIATE | CMD_READ_IMMEDIATE_ALT => {
                let old = self.display.read_opcode();
                self.display.set_read_opcode(command);
                self.send_fields(0);
                self.display.set_read_opcode(old);
            }
            CMD_READ_SCREEN_EXTENDED
            | CMD_READ_SCREEN_PRINT
            | CMD_READ_SCREEN_PRINT_EXTENDED
            | CMD_READ_SCREEN_PRINT_GRID
            | CMD_READ_SCREEN_PRINT_EXT_GRID => debug!("read screen to print 0x{command:02X} ignored"),
            CMD_SAVE_SCREEN => self.save_screen(),
            CMD_SAVE_PARTIAL_SCREEN => {
                // flag, top row, left column, depth, width: the whole screen is saved anyway
                record.get_bytes(5)?;
                self.save_screen();
            }
            CMD_RESTORE_SCREEN | CMD_RESTORE_PARTIAL_SCREEN => {
                let id = record.get_byte()?;
                if let Err(e) = self.display.restore(id) {
                    warn!("restore screen {id}: {e}");
                }
            }
            CMD_ROLL => self.roll(record)?,
            CMD_WRITE_STRUCTURED_FIELD => self.write_structured_field(record)?,
            CMD_PADDING => debug!("padding command ignored"),
            other => {
                warn!("unknown command 0x{other:02X}");
                return Err(negative(NR_INVALID_COMMAND));
            }
        }
        Ok(())
    }

    fn handle_cc1(&mut self, cc1: u8) {
        let policy = cc1 & 0xE0;
        if policy != CC1_NO_LOCK {
            self.display.lock();
        }
        let reset_all = matches!(policy, CC1_RESET_ALL_MDT | CC1_RESET_ALL_MDT_NULL_NON_BYPASS);
        let reset_non_bypass = matches!(
            policy,
            CC1_RESET_NON_BYPASS_MDT | CC1_RESET_MDT_NULL_NON_BYPASS | CC1_RESET_MDT_NULL_NON_BYPASS_MDT
        );
        let null_modified = matches!(policy, CC1_NULL_NON_BYPASS_MDT | CC1_RESET_MDT_NULL_NON_BYPASS_MDT);
        let null_all = matches!(policy, CC1_RESET_MDT_NULL_NON_BYPASS | CC1_RESET_ALL_MDT_NULL_NON_BYPASS);

        if null_modified || null_all {
            for idx in 0..self.display.fields().len() {
                let Some(f) = self.display.field(idx) else {
                    continue;
                };
                if f.is_bypass() || !(null_all || f.is_modified()) {
                    continue;
                }
                for i in 0..f.length {
                    self.display.set_field_char(idx, i, 0x00);
                }
            }
        }
        if reset_all {
            self.display.fields_mut().reset_mdt(false);
        } else if reset_non_bypass {
            self.display.fields_mut().reset_mdt(true);
        }
    }

    fn handle_cc2(&mut self, cc2: u8) {
        if cc2 & CC2_MESSAGE_ON != 0 {
            self.display.indicator_set(Indicators::MESSAGE_WAITING);
        } else if cc2 & CC2_MESSAGE_OFF != 0 {
            self.display.indicator_clear(Indicators::MESSAGE_WAITING);
        }
        if cc2 & CC2_ALARM != 0 {
            self.display.beep();
        }
        if cc2 & CC2_UNLOCK != 0 {
            self.display.unlock();
        }
    }

    fn write_to_display(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let cc1 = record.get_byte()?;
        let cc2 = record.get_byte()?;
        debug!("write to display cc 0x{cc1:02X}{cc2:02X}");
        let old = self.display.cursor();
        self.handle_cc1(cc1);

        let mut target = None;
        while let Some(order) = record.peek_byte() {
            if order == ESC {
                break;
            }
            record.get_byte()?;
            match order {
                SOH => self.start_of_header(record)?,
                RA => self.repeat_to_address(record)?,
                EA => self.erase_to_address(record)?,
                TD => self.transparent_data(record)?,
                SBA => self.set_buffer_address(record)?,
                WEA => self.write_extended_attribute(record)?,
                IC => {
                    let (y, x) = self.read_address(record)?;
                    self.display.set_pending_insert(y, x);
                    target = Some((y, x));
                }
                MC => target = Some(self.read_address(record)?),
                WDSF => self.write_display_structured_field(record)?,
                SF => self.start_of_field(record)?,
                ch if is_displayable(ch) => self.display.addch(ch),
                other => warn!("unknown order 0x{other:02X}"),
            }
        }

        let unlocking = cc2 & CC2_UNLOCK != 0;
        let ic_unlock = cc2 & CC2_IC_ULOCK != 0;
        match target {
            Some((y, x)) if !ic_unlock => self.display.set_cursor(y, x),
            _ if (unlocking && !ic_unlock) || record.opcode() == OP_RESTORE_SCR => self.display.set_cursor_home(),
            _ => self.display.set_cursor(old.0, old.1),
        }
        self.handle_cc2(cc2);
        Ok(())
    }

    /// A 1-based row/column pair, range checked, as a 0-based position
    fn read_address(&mut self, record: &mut Record) -> ProtocolResult<(usize, usize)> {
        let y = record.get_byte()? as usize;
        let x = record.get_byte()? as usize;
        if y == 0 || y > self.display.height() || x == 0 || x > self.display.width() {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        Ok((y - 1, x - 1))
    }

    fn set_buffer_address(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let (y, x) = self.read_address(record)?;
        trace!("SBA {y},{x}");
        self.display.set_cursor(y, x);
        Ok(())
    }

    fn start_of_header(&mut self, record: &mut Record) -> ProtocolResult<()> {
        self.display.fields_mut().clear();
        self.display.clear_pending_insert();
        if self.display.keystate() == KeyState::Unlocked {
            self.display.lock();
        } else {
            self.display.indicator_set(Indicators::X_SYSTEM);
        }
        let len = record.get_byte()? as usize;
        if len > 7 {
            return Err(negative(NR_INVALID_SOH_LENGTH));
        }
        let header = record.get_bytes(len)?;
        debug!("SOH {header:02X?}");
        self.display.buffer_mut().set_header_data(&header);
        Ok(())
    }

    fn repeat_to_address(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let row = record.get_byte()? as usize;
        let col = record.get_byte()? as usize;
        let ch = record.get_byte()?;
        let (w, h) = (self.display.width(), self.display.height());
        if row == 0 || row > h || col == 0 || col > w {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        let start = self.display.buffer().cursor_pos();
        let end = (row - 1) * w + (col - 1);
        if end < start {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        for _ in start..=end {
            self.display.addch(ch);
        }
        Ok(())
    }

    fn erase_to_address(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let row = record.get_byte()? as usize;
        let col = record.get_byte()? as usize;
        let len = record.get_byte()? as usize;
        let (w, h) = (self.display.width(), self.display.height());
        let start = self.display.buffer().cursor_pos();
        if row == 0 || row > h || col == 0 || col > w || !(2..=5).contains(&len) {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        let end = (row - 1) * w + (col - 1);
        if end < start {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        let types = record.get_bytes(len - 1)?;
        if types.last() == Some(&0xFF) {
            self.display.buffer_mut().erase_range(start, end);
        }
        let next = (end + 1) % (w * h);
        self.display.buffer_mut().cursor_set_pos(next);
        Ok(())
    }

    fn transparent_data(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let len = record.get_u16()? as usize;
        let size = self.display.width() * self.display.height();
        if self.display.buffer().cursor_pos() + len > size {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        for ch in record.get_bytes(len)? {
            self.display.addch(ch);
        }
        Ok(())
    }

    fn write_extended_attribute(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let kind = record.get_byte()?;
        let attr = record.get_byte()?;
        trace!("WEA type 0x{kind:02X} attr 0x{attr:02X}");
        if !matches!(kind, 0x01 | 0x03 | 0x05) {
            return Err(negative(NR_INVALID_EXT_ATTR_TYPE));
        }
        Ok(())
    }

    fn write_display_structured_field(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let len = record.get_u16()? as usize;
        let class = record.get_byte()?;
        if class != SF_CLASS_5250 {
            return Err(negative(NR_INVALID_SF_CLASS_TYPE));
        }
        let kind = record.get_byte()?;
        let skip = len.saturating_sub(4).min(record.remaining());
        debug!("WDSF type 0x{kind:02X}, {skip} bytes skipped");
        record.get_bytes(skip)?;
        Ok(())
    }

    fn start_of_field(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let mut c = record.get_byte()?;
        let mut input = None;
        if c & 0xE0 != 0x20 {
            if self.display.keystate() == KeyState::Unlocked {
                self.display.lock();
            } else {
                self.display.indicator_set(Indicators::X_SYSTEM);
            }
            let ffw = u16::from_be_bytes([c, record.get_byte()?]);
            let mut fcws = Vec::new();
            c = record.get_byte()?;
            while c & 0xE0 != 0x20 {
                fcws.push(u16::from_be_bytes([c, record.get_byte()?]));
                c = record.get_byte()?;
            }
            input = Some((ffw, fcws));
        }
        let attr = c;
        self.display.addch(attr);
        let length = record.get_u16()? as usize;

        let (w, h) = (self.display.width(), self.display.height());
        let (y, x) = self.display.cursor();
        if length == 0 || y * w + x + length > w * h {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        let Some((ffw, fcws)) = input else {
            trace!("output-only field at {y},{x} length {length}");
            return Ok(());
        };

        let idx = match self.display.fields().field_starting_at(y * w + x) {
            Some(i) => {
                debug!("SF updates field at {y},{x} ffw 0x{ffw:04X}");
                if let Some(f) = self.display.fields_mut().get_mut(i) {
                    f.ffw = ffw;
                    f.attribute = attr;
                }
                i
            }
            None => {
                let mut field = Field::new(ffw, attr, y, x, length, w);
                for fcw in fcws {
                    field.apply_fcw(fcw);
                }
                debug!("SF at {y},{x} length {length} ffw 0x{ffw:04X}");
                self.display.fields_mut().add(field)
            }
        };

        // Close the field with a normal attribute after its last cell
        if let Some(f) = self.display.field(idx) {
            let after = (f.end_pos() + 1) % (w * h);
            self.display.buffer_mut().put_char_at_pos(after, ATTR_NORMAL);
        }
        Ok(())
    }

    fn write_error_code(&mut self, command: u8, record: &mut Record) -> ProtocolResult<()> {
        if command == CMD_WRITE_ERROR_CODE_WINDOW {
            let window = record.get_bytes(2)?;
            trace!("error window {window:02X?}");
        }
        let mut end = self.display.cursor();
        self.display.save_msg_line();

        let mut msg = Vec::with_capacity(self.display.width());
        while let Some(c) = record.peek_byte() {
            if c == ESC {
                break;
            }
            record.get_byte()?;
            if c == IC {
                // Moves the cursor only; the insert cursor is untouched here
                end = self.read_address(record)?;
            } else if is_displayable(c) {
                msg.push(c);
            } else {
                warn!("unknown order 0x{c:02X} in error code");
            }
        }
        self.display.set_msg_line(&msg);
        self.display.set_cursor(end.0, end.1);
        self.display.set_keystate(KeyState::PostHelp);
        self.display.inhibit();
        Ok(())
    }

    fn read_command(&mut self, command: u8, record: &mut Record) -> ProtocolResult<()> {
        let cc1 = record.get_byte()?;
        self.handle_cc1(cc1);
        let cc2 = record.get_byte()?;
        self.handle_cc2(cc2);
        debug!("read 0x{command:02X} cc 0x{cc1:02X}{cc2:02X}");
        self.display.indicator_clear(Indicators::X_SYSTEM | Indicators::X_CLOCK);
        // Only a normally locked keyboard is released; an operator error stays
        if self.display.keystate() == KeyState::Locked {
            self.display.uninhibit();
            self.display.set_keystate(KeyState::Unlocked);
        }
        self.display.set_read_opcode(command);
        Ok(())
    }

    /// Snapshot the screen and tell the host how to bring it back.
    fn save_screen(&mut self) {
        let id = self.display.push();
        let mut data = vec![ESC, CMD_RESTORE_SCREEN, id];
        let read = self.display.read_opcode();
        if read != 0 {
            data.extend_from_slice(&[ESC, read, 0x00, 0x00]);
        }
        self.queue(RecordHeader::new(OP_SAVE_SCR), data);
    }

    fn roll(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let direction = record.get_byte()?;
        let top = record.get_byte()? as usize;
        let bot = record.get_byte()? as usize;
        let mut lines = i32::from(direction & 0x1F);
        if direction & 0x80 != 0 {
            lines = -lines;
        }
        debug!("roll {lines} lines, rows {top}..={bot}");
        if top == 0 || bot < top || bot > self.display.height() {
            return Err(negative(NR_INVALID_ROW_COL_ADDR));
        }
        if lines != 0 {
            self.display.buffer_mut().roll(top - 1, bot - 1, lines);
        }
        Ok(())
    }

    fn write_structured_field(&mut self, record: &mut Record) -> ProtocolResult<()> {
        let len = record.get_u16()? as usize;
        let class = record.get_byte()?;
        let kind = record.get_byte()?;
        let flags = record.get_byte()?;
        debug!("WSF class 0x{class:02X} type 0x{kind:02X} flags 0x{flags:02X}");
        if class != SF_CLASS_5250 || !KNOWN_SF_TYPES.contains(&kind) {
            return Err(negative(NR_INVALID_SF_CLASS_TYPE));
        }
        let skip = len.saturating_sub(5).min(record.remaining());
        record.get_bytes(skip)?;
        let reply = self.query_reply();
        self.queue(RecordHeader::new(OP_NO_OP), reply);
        Ok(())
    }

    /// The 5250 QUERY reply describing this workstation
    pub fn query_reply(&self) -> Vec<u8> {
        let enhanced = self.display.terminal_enhanced() && self.config.get_boolean_property("enhanced");
        let map = self.display.char_map();
        let term = self.stream.getenv("TERM").unwrap_or(DEFAULT_TERMINAL_TYPE);
        let (dev_type, dev_model) = parse_device(term);

        let mut out = vec![0u8; QUERY_REPLY_LEN];
        out[..7].copy_from_slice(&[0x00, 0x00, 0x88, 0x00, if enhanced { 0x40 } else { 0x3A }, 0xD9, 0x70]);
        out[7..13].copy_from_slice(&[0x80, 0x06, 0x00, 0x01, 0x01, 0x00]);
        out[29] = 0x01;
        for (i, b) in format!("{:04}", dev_type % 10_000).bytes().enumerate() {
            out[30 + i] = map.to_remote(b);
        }
        out[34] = map.to_remote(0x00);
        for (i, b) in format!("{:02}", dev_model % 100).bytes().enumerate() {
            out[35 + i] = map.to_remote(b);
        }
        out[37] = 0x02;
        out[40..44].copy_from_slice(&[0x00, 0x61, 0x50, 0x00]);
        out[44..46].copy_from_slice(&[0xFF, 0xFF]);
        out[49..53].copy_from_slice(&[0x23, 0x31, 0x00, 0x00]);
        if enhanced {
            out[53..55].copy_from_slice(&[0x02, 0x80]);
        }
        out
    }

    /// Answer host data we cannot accept; the rest of the record is dropped.
    fn send_error(&mut self, code: u32, record: &mut Record) {
        warn!("negative response 0x{code:08X}");
        self.queue(RecordHeader::with_flags(OP_NO_OP, FLAG_ERR), code.to_be_bytes().to_vec());
        record.skip_to_end();
    }

    /// Send what the pending read asked for, ended by `aid`.
    pub fn send_fields(&mut self, aid: u8) {
        let (y, x) = self.display.cursor();
        let mut out = vec![(y + 1) as u8, (x + 1) as u8, aid];
        let read = self.display.read_opcode();
        trace!("send fields aid 0x{aid:02X} for read 0x{read:02X}");

        let heads: Vec<usize> = (0..self.display.fields().len())
            .filter(|&i| self.display.field(i).map_or(false, |f| !f.is_continued_tail()))
            .collect();
        match read {
            CMD_READ_INPUT_FIELDS | CMD_READ_IMMEDIATE => {
                let wanted = self.display.fields().master_mdt()
                    && (read == CMD_READ_IMMEDIATE || self.display.buffer().send_data_for_aid_key(aid));
                if wanted {
                    for idx in heads {
                        self.append_field(&mut out, idx, read);
                    }
                }
            }
            CMD_READ_MDT_FIELDS | CMD_READ_MDT_FIELDS_ALT | CMD_READ_IMMEDIATE_ALT => {
                if self.display.buffer().send_data_for_aid_key(aid) {
                    for idx in heads {
                        if self.display.field(idx).map_or(false, Field::is_modified) {
                            self.append_field(&mut out, idx, read);
                        }
                    }
                }
            }
            other => warn!("sending fields with no read pending (0x{other:02X})"),
        }

        self.display.set_read_opcode(0);
        self.display.lock();
        self.display.indicator_clear(Indicators::INSERT);
        self.display.update();
        self.queue(RecordHeader::new(OP_PUT_GET), out);
    }

    /// Contents of a field, with the following parts of a continued entry
    /// field appended.
    fn entry_data(&self, idx: usize) -> Vec<u8> {
        let mut data = self.display.field_data(idx);
        let first = self
            .display
            .field(idx)
            .and_then(|f| f.continued)
            .map_or(false, |c| c & 0x03 == CONTINUED_FIRST);
        if first {
            let mut next = idx + 1;
            while let Some(f) = self.display.field(next).filter(|f| f.is_continued_tail()) {
                data.extend(self.display.field_data(next));
                if f.continued.map_or(false, |c| c & 0x03 == CONTINUED_LAST) {
                    break;
                }
                next += 1;
            }
        }
        data
    }

    fn append_field(&self, out: &mut Vec<u8>, idx: usize, read: u8) {
        let Some(field) = self.display.field(idx) else {
            return;
        };
        let data = self.entry_data(idx);
        let signed = field.is_signed();
        let negative = signed && data.len() >= 2 && data[data.len() - 1] == EBCDIC_MINUS;
        let zone_shift = |c: u8| if (0xF0..=0xF9).contains(&c) { 0xD0 | (c & 0x0F) } else { c };
        let blank = |c: u8| if c == 0x00 { EBCDIC_BLANK } else { c };

        match read {
            CMD_READ_INPUT_FIELDS | CMD_READ_IMMEDIATE => {
                let mut bytes: Vec<u8> = data.iter().map(|&c| blank(c)).collect();
                if negative {
                    let units = bytes.len() - 2;
                    bytes[units] = zone_shift(bytes[units]);
                }
                out.extend(bytes);
            }
            _ => {
                out.extend_from_slice(&[SBA, (field.start_row + 1) as u8, (field.start_col + 1) as u8]);
                let mut bytes = data;
                if signed {
                    bytes.pop();
                    if negative {
                        if let Some(last) = bytes.last_mut() {
                            *last = zone_shift(*last);
                        }
                    }
                }
                while bytes.last() == Some(&0x00) {
                    bytes.pop();
                }
                if read == CMD_READ_MDT_FIELDS {
                    bytes.iter_mut().for_each(|c| *c = blank(*c));
                }
                out.extend(bytes);
            }
        }
    }

    /// Act on an AID taken from the display.
    pub async fn handle_aidkey(&mut self, aid: u8) -> TN5250Result<()> {
        debug!("aid 0x{aid:02X}");
        match aid {
            AID_PRINT | AID_RECORD_BS => {
                let (y, x) = self.display.cursor();
                self.queue(RecordHeader::new(OP_NO_OP), vec![(y + 1) as u8, (x + 1) as u8, aid]);
            }
            AID_SYSREQ | AID_ATTN => {
                let flag = if aid == AID_SYSREQ { FLAG_SRQ } else { FLAG_ATN };
                self.display.indicator_set(Indicators::X_SYSTEM);
                if self.display.keystate() == KeyState::Unlocked {
                    self.display.set_keystate(KeyState::Locked);
                }
                self.send(RecordHeader::with_flags(OP_NO_OP, flag), &[]).await?;
                self.display.indicator_clear(Indicators::X_SYSTEM);
                if self.display.keystate() == KeyState::Locked {
                    self.display.set_keystate(KeyState::Unlocked);
                }
            }
            AID_TESTREQ => self.queue(RecordHeader::with_flags(OP_NO_OP, FLAG_TRQ), Vec::new()),
            AID_HELP if self.display.keystate() == KeyState::PreHelp => {
                let src = self.display.key_src().to_be_bytes().to_vec();
                self.queue(RecordHeader::with_flags(OP_NO_OP, FLAG_HLP), src);
                self.display.set_keystate(KeyState::PostHelp);
            }
            _ => self.send_fields(aid),
        }
        self.flush_outbound().await?;
        self.display.update();
        Ok(())
    }

    fn queue(&mut self, header: RecordHeader, data: Vec<u8>) {
        self.outbound.push((header, data));
    }

    /// Replies waiting to be written
    pub fn pending_replies(&self) -> &[(RecordHeader, Vec<u8>)] {
        &self.outbound
    }

    async fn send(&mut self, header: RecordHeader, data: &[u8]) -> TN5250Result<()> {
        self.flush_outbound().await?;
        self.stream.send(header, data).await
    }

    /// Write every queued reply in order.
    pub async fn flush_outbound(&mut self) -> TN5250Result<()> {
        for (header, data) in std::mem::take(&mut self.outbound) {
            self.stream.send(header, &data).await?;
        }
        Ok(())
    }
}

/// Device type and model from a terminal type such as `IBM-3179-2`. A
/// missing model is 1.
fn parse_device(term: &str) -> (u32, u32) {
    fn leading_number(s: &str) -> u32 {
        let digits: String = s.chars().take_while(char::is_ascii_digit).collect();
        digits.parse().unwrap_or(0)
    }
    let Some((_, rest)) = term.split_once('-') else {
        return (0, 1);
    };
    match rest.split_once('-') {
        Some((kind, model)) => (leading_number(kind), leading_number(model)),
        None => (leading_number(rest), 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    fn session() -> Session<DuplexStream> {
        let (client, _host) = duplex(4096);
        Session::new(SessionConfig::new(), client).unwrap()
    }

    fn record(opcode: u8, payload: &[u8]) -> Record {
        Record::from_bytes(RecordHeader::new(opcode).encode(payload)).unwrap()
    }

    fn run(s: &mut Session<DuplexStream>, opcode: u8, payload: &[u8]) {
        let mut rec = record(opcode, payload);
        s.process_record(&mut rec);
    }

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("IBM-3179-2"), (3179, 2));
        assert_eq!(parse_device("IBM-3477-FC"), (3477, 0));
        assert_eq!(parse_device("IBM-5251"), (5251, 1));
    }

    #[test]
    fn test_query_reply_layout() {
        let s = session();
        let reply = s.query_reply();
        assert_eq!(reply.len(), 67);
        assert_eq!(&reply[..7], &[0x00, 0x00, 0x88, 0x00, 0x3A, 0xD9, 0x70]);
        assert_eq!(&reply[30..34], &[0xF3, 0xF1, 0xF7, 0xF9]);
        assert_eq!(reply[34], 0x00);
        assert_eq!(&reply[35..37], &[0xF0, 0xF2]);
        assert_eq!(&reply[49..55], &[0x23, 0x31, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_write_to_display_with_field() {
        let mut s = session();
        // ESC WTD cc1=0 cc2=UNLOCK, SBA 2,10, SF ffw 0x0000 attr 0x24 len 5, text
        let payload = [
            ESC, CMD_WRITE_TO_DISPLAY, 0x00, CC2_UNLOCK, SBA, 2, 10, SF, 0x40, 0x00, 0x24, 0x00, 0x05,
            SBA, 1, 1, 0xC8, 0xC9,
        ];
        run(&mut s, OP_PUT_GET, &payload);
        assert!(s.invited());
        assert_eq!(s.display().fields().len(), 1);
        let f = s.display().field(0).unwrap();
        assert_eq!((f.start_row, f.start_col, f.length), (1, 10, 5));
        assert_eq!(s.display().buffer().char_at(1, 9), 0x24);
        assert_eq!(s.display().buffer().char_at(1, 15), ATTR_NORMAL);
        assert_eq!(s.display().buffer().char_at(0, 0), 0xC8);
        // unlocked with no MC: home is the field
        assert_eq!(s.display().cursor(), (1, 10));
        assert_eq!(s.display().keystate(), KeyState::Unlocked);
        assert!(s.pending_replies().is_empty());
    }

    #[test]
    fn test_bad_address_gets_negative_response() {
        let mut s = session();
        let payload = [ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00, SBA, 30, 1, 0xC1, ESC, CMD_CLEAR_UNIT];
        run(&mut s, OP_PUT_GET, &payload);
        let replies = s.pending_replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0.flags, FLAG_ERR);
        assert_eq!(replies[0].1, NR_INVALID_ROW_COL_ADDR.to_be_bytes().to_vec());
        assert_eq!(s.display().buffer().char_at(0, 0), 0x00);
    }

    #[test]
    fn test_unknown_command() {
        let mut s = session();
        run(&mut s, OP_PUT_GET, &[ESC, 0x99]);
        assert_eq!(s.pending_replies()[0].1, NR_INVALID_COMMAND.to_be_bytes().to_vec());
    }

    #[test]
    fn test_clear_unit_alternate_parameter() {
        let mut s = session();
        run(&mut s, OP_PUT_GET, &[ESC, CMD_CLEAR_UNIT_ALTERNATE, 0x00]);
        assert_eq!((s.display().width(), s.display().height()), (132, 27));
        run(&mut s, OP_PUT_GET, &[ESC, CMD_CLEAR_UNIT_ALTERNATE, 0x01]);
        assert_eq!(s.pending_replies()[0].1, NR_INVALID_CLEAR_UNIT_ALT.to_be_bytes().to_vec());
    }

    #[test]
    fn test_read_mdt_fields_sends_modified_data() {
        let mut s = session();
        let wtd = [ESC, CMD_WRITE_TO_DISPLAY, 0x00, CC2_UNLOCK, SBA, 5, 1, SF, 0x40, 0x00, 0x24, 0x00, 0x04];
        run(&mut s, OP_PUT_GET, &wtd);
        run(&mut s, OP_PUT_GET, &[ESC, CMD_READ_MDT_FIELDS, 0x00, 0x00]);
        assert_eq!(s.display().read_opcode(), CMD_READ_MDT_FIELDS);
        s.display_mut().do_key(Key::Char('O'));
        s.display_mut().do_key(Key::Char('K'));
        let aid = {
            s.display_mut().do_key(Key::Enter);
            s.display_mut().take_aid()
        };
        assert_eq!(aid, Some(AID_ENTER));
        s.send_fields(AID_ENTER);
        let (header, data) = &s.pending_replies()[0];
        assert_eq!(header.opcode, OP_PUT_GET);
        assert_eq!(data, &vec![5, 4, AID_ENTER, SBA, 5, 2, 0xD6, 0xD2]);
        assert_eq!(s.display().keystate(), KeyState::Locked);
        assert_eq!(s.display().read_opcode(), 0);
    }

    #[test]
    fn test_save_and_restore_screen() {
        let mut s = session();
        run(&mut s, OP_PUT_GET, &[ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00, 0xC1]);
        run(&mut s, OP_PUT_GET, &[ESC, CMD_SAVE_SCREEN]);
        assert_eq!(s.pending_replies()[0].1, vec![ESC, CMD_RESTORE_SCREEN, 0]);
        run(&mut s, OP_PUT_GET, &[ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00, SBA, 1, 1, 0xC2]);
        assert_eq!(s.display().buffer().char_at(0, 0), 0xC2);
        run(&mut s, OP_RESTORE_SCR, &[ESC, CMD_RESTORE_SCREEN, 0]);
        assert_eq!(s.display().buffer().char_at(0, 0), 0xC1);
        assert_eq!(s.display().saved_depth(), 0);
    }

    #[test]
    fn test_clear_unit_drops_saved_screens() {
        let mut s = session();
        run(&mut s, OP_PUT_GET, &[ESC, CMD_SAVE_SCREEN]);
        run(&mut s, OP_PUT_GET, &[ESC, CMD_SAVE_SCREEN]);
        assert_eq!(s.display().saved_depth(), 2);
        run(&mut s, OP_PUT_GET, &[ESC, CMD_CLEAR_UNIT]);
        assert_eq!(s.display().saved_depth(), 0);
    }

    #[test]
    fn test_zero_length_field_rejected() {
        let mut s = session();
        let payload = [
            ESC, CMD_WRITE_TO_DISPLAY, 0x00, CC2_UNLOCK, SBA, 2, 2, SF, 0x47, 0x00, 0x24, 0x00, 0x00,
        ];
        run(&mut s, OP_PUT_GET, &payload);
        let replies = s.pending_replies();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].1, NR_INVALID_ROW_COL_ADDR.to_be_bytes().to_vec());
        assert!(s.display().fields().is_empty());
    }

    #[test]
    fn test_roll_direction() {
        let mut s = session();
        run(&mut s, OP_PUT_GET, &[ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00, SBA, 2, 1, 0xC1]);
        run(&mut s, OP_PUT_GET, &[ESC, CMD_ROLL, 0x01, 1, 3]);
        assert_eq!(s.display().buffer().char_at(0, 0), 0xC1);
        run(&mut s, OP_PUT_GET, &[ESC, CMD_ROLL, 0x82, 1, 3]);
        assert_eq!(s.display().buffer().char_at(2, 0), 0xC1);
    }

    #[test]
    fn test_write_error_code_inhibits() {
        let mut s = session();
        run(&mut s, OP_PUT_GET, &[ESC, CMD_WRITE_ERROR_CODE, 0xC5, 0xD9, 0xD9]);
        assert_eq!(s.display().keystate(), KeyState::PostHelp);
        assert!(s.display().inhibited());
        assert_eq!(s.display().buffer().char_at(23, 0), 0xC5);
        s.display_mut().do_key(Key::Reset);
        assert_eq!(s.display().buffer().char_at(23, 0), 0x00);
    }

    #[test]
    fn test_cancel_invite_replies() {
        let mut s = session();
        run(&mut s, OP_INVITE, &[]);
        assert!(s.invited());
        run(&mut s, OP_CANCEL_INVITE, &[]);
        assert!(!s.invited());
        assert!(s.display().indicators().contains(Indicators::X_CLOCK));
        assert_eq!(s.pending_replies()[0].0.opcode, OP_CANCEL_INVITE);
    }

    #[test]
    fn test_erase_to_address() {
        let mut s = session();
        let mut payload = vec![ESC, CMD_WRITE_TO_DISPLAY, 0x00, 0x00];
        payload.extend_from_slice(&[0xC1, 0xC2, 0xC3, SBA, 1, 1, EA, 1, 2, 2, 0xFF]);
        run(&mut s, OP_PUT_GET, &payload);
        assert_eq!(s.display().buffer().char_at(0, 0), EBCDIC_BLANK);
        assert_eq!(s.display().buffer().char_at(0, 1), EBCDIC_BLANK);
        assert_eq!(s.display().buffer().char_at(0, 2), 0xC3);
    }
}
