//! Telnet record stream.
//!
//! Strips telnet escapes from the host byte stream, answers option
//! negotiation, and cuts the remaining data into [`Record`]s at `IAC EOR`.
//! Bytes of an unfinished record stay buffered across reads.

use std::collections::VecDeque;
use std::mem;

use log::{debug, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::record::{Record, RecordHeader};
use super::telnet::{TelnetNegotiator, DO, DONT, EOR, IAC, SB, SE, WILL, WONT};
use crate::error::{NetworkError, TN5250Result};

/// Size of a single transport read
pub const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    NoData,
    Data,
    HaveIac,
    HaveVerb(u8),
    HaveSb,
    HaveSbIac,
}

pub struct RecordStream<T> {
    transport: T,
    state: ReaderState,
    current: Vec<u8>,
    sb_buf: Vec<u8>,
    records: VecDeque<Record>,
    outbound: Vec<u8>,
    negotiator: TelnetNegotiator,
    records_received: u64,
}

impl<T> RecordStream<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: ReaderState::NoData,
            current: Vec::new(),
            sb_buf: Vec::new(),
            records: VecDeque::new(),
            outbound: Vec::new(),
            negotiator: TelnetNegotiator::new(),
            records_received: 0,
        }
    }

    /// Read whatever the transport has, frame it, and answer negotiation.
    ///
    /// Returns `Ok(false)` when the peer closed the connection; any partial
    /// record is dropped at that point.
    pub async fn handle_receive(&mut self) -> TN5250Result<bool> {
        let mut buf = [0u8; READ_CHUNK];
        let n = self.read_available(&mut buf).await?;
        if n == 0 {
            self.discard_partial();
            return Ok(false);
        }
        self.receive_bytes(&buf[..n]).await?;
        Ok(true)
    }

    /// A single transport read. Safe to cancel: no bytes are consumed unless
    /// this future completes.
    pub async fn read_available(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.transport.read(buf).await
    }

    /// Feed bytes obtained from [`read_available`](Self::read_available) and
    /// send any negotiation replies they provoked.
    pub async fn receive_bytes(&mut self, bytes: &[u8]) -> TN5250Result<()> {
        self.ingest(bytes)?;
        self.flush_replies().await
    }

    /// Run the telnet state machine over `bytes`. Negotiation replies are
    /// queued for [`flush_replies`](Self::flush_replies).
    pub fn ingest(&mut self, bytes: &[u8]) -> TN5250Result<()> {
        for &b in bytes {
            self.state = match self.state {
                ReaderState::NoData | ReaderState::Data => {
                    if b == IAC {
                        ReaderState::HaveIac
                    } else {
                        self.current.push(b);
                        ReaderState::Data
                    }
                }
                ReaderState::HaveIac => match b {
                    IAC => {
                        self.current.push(IAC);
                        ReaderState::Data
                    }
                    DO | DONT | WILL | WONT => ReaderState::HaveVerb(b),
                    SB => {
                        self.sb_buf.clear();
                        ReaderState::HaveSb
                    }
                    EOR => {
                        self.end_of_record()?;
                        ReaderState::NoData
                    }
                    other => {
                        warn!("unknown telnet escape 0x{other:02X}");
                        ReaderState::NoData
                    }
                },
                ReaderState::HaveVerb(verb) => {
                    if let Some(reply) = self.negotiator.process_command(verb, b)? {
                        self.outbound.extend_from_slice(&reply);
                    }
                    ReaderState::NoData
                }
                ReaderState::HaveSb => {
                    if b == IAC {
                        ReaderState::HaveSbIac
                    } else {
                        self.sb_buf.push(b);
                        ReaderState::HaveSb
                    }
                }
                ReaderState::HaveSbIac => match b {
                    IAC => {
                        self.sb_buf.push(IAC);
                        ReaderState::HaveSb
                    }
                    SE => {
                        let sb = mem::take(&mut self.sb_buf);
                        if let Some(reply) = self.negotiator.process_subnegotiation(&sb)? {
                            self.outbound.extend_from_slice(&reply);
                        }
                        ReaderState::NoData
                    }
                    _ => ReaderState::HaveSb,
                },
            };
        }
        Ok(())
    }

    fn end_of_record(&mut self) -> TN5250Result<()> {
        let bytes = mem::take(&mut self.current);
        if bytes.is_empty() {
            trace!("empty record ignored");
            return Ok(());
        }
        let record = Record::from_bytes(bytes)?;
        trace!(
            "record: opcode 0x{:02X} flags 0x{:02X} {} bytes",
            record.opcode(),
            record.flags(),
            record.len()
        );
        self.records.push_back(record);
        self.records_received += 1;
        Ok(())
    }

    /// Write queued negotiation replies to the transport.
    pub async fn flush_replies(&mut self) -> TN5250Result<()> {
        if self.outbound.is_empty() {
            return Ok(());
        }
        let out = mem::take(&mut self.outbound);
        self.transport.write_all(&out).await?;
        self.transport.flush().await?;
        Ok(())
    }

    /// Oldest complete record, if any
    pub fn get_record(&mut self) -> Option<Record> {
        self.records.pop_front()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Records framed since the stream was created
    pub fn records_received(&self) -> u64 {
        self.records_received
    }

    /// Bytes of an unfinished record currently buffered
    pub fn partial_len(&self) -> usize {
        self.current.len()
    }

    pub fn discard_partial(&mut self) {
        if !self.current.is_empty() {
            debug!("discarding {} bytes of an incomplete record", self.current.len());
        }
        self.current.clear();
        self.sb_buf.clear();
        self.state = ReaderState::NoData;
    }

    /// Frame and send one outbound record.
    pub async fn send(&mut self, header: RecordHeader, data: &[u8]) -> TN5250Result<()> {
        let out = escape_record(&header.encode(data));
        trace!(
            "send: opcode 0x{:02X} flags 0x{:02X} {} data bytes",
            header.opcode,
            header.flags,
            data.len()
        );
        self.flush_replies().await?;
        self.transport.write_all(&out).await.map_err(|e| NetworkError::ConnectionLost {
            reason: e.to_string(),
        })?;
        self.transport.flush().await?;
        Ok(())
    }

    pub fn setenv(&mut self, name: &str, value: &str) {
        self.negotiator.setenv(name, value);
    }

    pub fn getenv(&self, name: &str) -> Option<&str> {
        self.negotiator.getenv(name)
    }

    pub fn unsetenv(&mut self, name: &str) {
        self.negotiator.unsetenv(name);
    }

    pub fn negotiator(&self) -> &TelnetNegotiator {
        &self.negotiator
    }

    pub async fn shutdown(&mut self) -> TN5250Result<()> {
        self.transport.shutdown().await?;
        Ok(())
    }
}

/// Double every IAC and terminate with `IAC EOR`.
pub fn escape_record(record: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(record.len() + 4);
    for &b in record {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out.extend_from_slice(&[IAC, EOR]);
    out
}
