//! Framed 5250 records.
//!
//! A record is everything between two `IAC EOR` marks once telnet escaping has
//! been removed. Its GDS header is
//!
//! ```text
//! len_hi len_lo 0x12 0xA0 flow_hi flow_lo varhdr_len flags reserved opcode payload...
//! ```

use crate::error::{ProtocolError, ProtocolResult};

/// Fixed GDS header length
pub const HEADER_LEN: usize = 10;
const GDS_RECORD_TYPE: [u8; 2] = [0x12, 0xA0];
const VARIABLE_HEADER_LEN: u8 = 0x04;

/// Flow type for display data
pub const FLOW_DISPLAY: u16 = 0x0000;

/// Record header flags
pub const FLAG_ERR: u8 = 0x80;
pub const FLAG_ATN: u8 = 0x40;
pub const FLAG_SRQ: u8 = 0x04;
pub const FLAG_TRQ: u8 = 0x02;
pub const FLAG_HLP: u8 = 0x01;

/// Record opcodes
pub const OP_NO_OP: u8 = 0x00;
pub const OP_INVITE: u8 = 0x01;
pub const OP_OUTPUT_ONLY: u8 = 0x02;
pub const OP_PUT_GET: u8 = 0x03;
pub const OP_SAVE_SCR: u8 = 0x04;
pub const OP_RESTORE_SCR: u8 = 0x05;
pub const OP_READ_IMMED: u8 = 0x06;
pub const OP_READ_SCR: u8 = 0x08;
pub const OP_CANCEL_INVITE: u8 = 0x0A;
pub const OP_MESSAGE_ON: u8 = 0x0B;
pub const OP_MESSAGE_OFF: u8 = 0x0C;

/// Header of an outbound record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub flowtype: u16,
    pub flags: u8,
    pub opcode: u8,
}

impl RecordHeader {
    pub fn new(opcode: u8) -> Self {
        Self { flowtype: FLOW_DISPLAY, flags: 0, opcode }
    }

    pub fn with_flags(opcode: u8, flags: u8) -> Self {
        Self { flowtype: FLOW_DISPLAY, flags, opcode }
    }

    /// Serialize header and payload. Telnet escaping is the stream's job.
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let len = data.len() + HEADER_LEN;
        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out.extend_from_slice(&GDS_RECORD_TYPE);
        out.extend_from_slice(&self.flowtype.to_be_bytes());
        out.push(VARIABLE_HEADER_LEN);
        out.push(self.flags);
        out.push(0x00);
        out.push(self.opcode);
        out.extend_from_slice(data);
        out
    }
}

/// One inbound record with a read cursor over its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    data: Vec<u8>,
    cur: usize,
}

impl Record {
    /// Validate the GDS length and wrap the bytes.
    pub fn from_bytes(data: Vec<u8>) -> ProtocolResult<Record> {
        if data.len() < HEADER_LEN {
            return Err(ProtocolError::Framing {
                declared: declared_len(&data).unwrap_or(0),
                actual: data.len(),
            });
        }
        let declared = declared_len(&data).unwrap_or(0);
        if declared != data.len() {
            return Err(ProtocolError::Framing { declared, actual: data.len() });
        }
        let start = 6 + data[6] as usize;
        if start > data.len() {
            return Err(ProtocolError::Framing { declared, actual: data.len() });
        }
        Ok(Record { data, cur: start })
    }

    pub fn flowtype(&self) -> u16 {
        u16::from_be_bytes([self.data[4], self.data[5]])
    }

    pub fn flags(&self) -> u8 {
        self.data[7]
    }

    pub fn opcode(&self) -> u8 {
        self.data[9]
    }

    pub fn header(&self) -> RecordHeader {
        RecordHeader {
            flowtype: self.flowtype(),
            flags: self.flags(),
            opcode: self.opcode(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Payload bytes, independent of the read cursor
    pub fn payload(&self) -> &[u8] {
        &self.data[6 + self.data[6] as usize..]
    }

    /// Next payload byte; running off the end is a truncated command.
    pub fn get_byte(&mut self) -> ProtocolResult<u8> {
        match self.data.get(self.cur) {
            Some(&b) => {
                self.cur += 1;
                Ok(b)
            }
            None => Err(ProtocolError::IncompleteData {
                expected: self.cur + 1,
                received: self.data.len(),
            }),
        }
    }

    pub fn get_u16(&mut self) -> ProtocolResult<u16> {
        let hi = self.get_byte()?;
        let lo = self.get_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn get_bytes(&mut self, n: usize) -> ProtocolResult<Vec<u8>> {
        if self.remaining() < n {
            return Err(ProtocolError::IncompleteData {
                expected: self.cur + n,
                received: self.data.len(),
            });
        }
        let out = self.data[self.cur..self.cur + n].to_vec();
        self.cur += n;
        Ok(out)
    }

    pub fn peek_byte(&self) -> Option<u8> {
        self.data.get(self.cur).copied()
    }

    pub fn unget_byte(&mut self) {
        let start = 6 + self.data[6] as usize;
        if self.cur > start {
            self.cur -= 1;
        }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cur)
    }

    /// True once the payload is consumed
    pub fn is_chain_end(&self) -> bool {
        self.cur >= self.data.len()
    }

    pub fn skip_to_end(&mut self) {
        self.cur = self.data.len();
    }
}

fn declared_len(data: &[u8]) -> Option<usize> {
    match data {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo]) as usize),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        RecordHeader::with_flags(OP_PUT_GET, FLAG_SRQ).encode(&[0x04, 0x40])
    }

    #[test]
    fn test_header_layout() {
        let bytes = sample();
        assert_eq!(bytes, vec![0x00, 0x0C, 0x12, 0xA0, 0x00, 0x00, 0x04, 0x04, 0x00, 0x03, 0x04, 0x40]);
        let rec = Record::from_bytes(bytes).unwrap();
        assert_eq!(rec.opcode(), OP_PUT_GET);
        assert_eq!(rec.flags(), FLAG_SRQ);
        assert_eq!(rec.flowtype(), FLOW_DISPLAY);
        assert_eq!(rec.payload(), &[0x04, 0x40]);
    }

    #[test]
    fn test_length_mismatch_is_framing_error() {
        let mut bytes = sample();
        bytes.push(0x00);
        match Record::from_bytes(bytes) {
            Err(ProtocolError::Framing { declared: 12, actual: 13 }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            Record::from_bytes(vec![0x00, 0x03, 0x12]),
            Err(ProtocolError::Framing { .. })
        ));
    }

    #[test]
    fn test_cursor_reads_and_truncation() {
        let mut rec = Record::from_bytes(sample()).unwrap();
        assert_eq!(rec.get_byte().unwrap(), 0x04);
        rec.unget_byte();
        assert_eq!(rec.get_u16().unwrap(), 0x0440);
        assert!(rec.is_chain_end());
        assert!(matches!(rec.get_byte(), Err(ProtocolError::IncompleteData { .. })));
        rec.unget_byte();
        rec.unget_byte();
        rec.unget_byte();
        assert_eq!(rec.remaining(), 2);
    }
}
