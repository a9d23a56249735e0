//! 5250 data-stream constants.

/// Escape byte introducing every command in a record
pub const ESC: u8 = 0x04;

/// 5250 commands
pub const CMD_CLEAR_UNIT: u8 = 0x40;
pub const CMD_CLEAR_UNIT_ALTERNATE: u8 = 0x20;
pub const CMD_CLEAR_FORMAT_TABLE: u8 = 0x50;
pub const CMD_WRITE_TO_DISPLAY: u8 = 0x11;
pub const CMD_WRITE_ERROR_CODE: u8 = 0x21;
pub const CMD_WRITE_ERROR_CODE_WINDOW: u8 = 0x22;
pub const CMD_READ_INPUT_FIELDS: u8 = 0x42;
pub const CMD_READ_MDT_FIELDS: u8 = 0x52;
pub const CMD_READ_MDT_FIELDS_ALT: u8 = 0x82;
pub const CMD_READ_SCREEN_IMMEDIATE: u8 = 0x62;
pub const CMD_READ_SCREEN_EXTENDED: u8 = 0x64;
pub const CMD_READ_SCREEN_PRINT: u8 = 0x66;
pub const CMD_READ_SCREEN_PRINT_EXTENDED: u8 = 0x68;
pub const CMD_READ_SCREEN_PRINT_GRID: u8 = 0x6A;
pub const CMD_READ_SCREEN_PRINT_EXT_GRID: u8 = 0x6C;
pub const CMD_READ_IMMEDIATE: u8 = 0x72;
pub const CMD_READ_IMMEDIATE_ALT: u8 = 0x83;
pub const CMD_SAVE_SCREEN: u8 = 0x02;
pub const CMD_SAVE_PARTIAL_SCREEN: u8 = 0x03;
pub const CMD_RESTORE_SCREEN: u8 = 0x12;
pub const CMD_RESTORE_PARTIAL_SCREEN: u8 = 0x13;
pub const CMD_ROLL: u8 = 0x23;
pub const CMD_WRITE_STRUCTURED_FIELD: u8 = 0xF3;
/// Seen from some hosts between commands; carries no data
pub const CMD_PADDING: u8 = 0x0A;

/// Write-to-display orders
pub const SOH: u8 = 0x01; // Start of header
pub const RA: u8 = 0x02; // Repeat to address
pub const EA: u8 = 0x03; // Erase to address
pub const TD: u8 = 0x10; // Transparent data
pub const SBA: u8 = 0x11; // Set buffer address
pub const WEA: u8 = 0x12; // Write extended attribute
pub const IC: u8 = 0x13; // Insert cursor
pub const MC: u8 = 0x14; // Move cursor
pub const WDSF: u8 = 0x15; // Write to display structured field
pub const SF: u8 = 0x1D; // Start of field

/// Control character byte 1 (`cc1 & 0xE0`)
pub const CC1_NO_LOCK: u8 = 0x00;
pub const CC1_RESET_NON_BYPASS_MDT: u8 = 0x40;
pub const CC1_RESET_ALL_MDT: u8 = 0x60;
pub const CC1_NULL_NON_BYPASS_MDT: u8 = 0x80;
pub const CC1_RESET_MDT_NULL_NON_BYPASS: u8 = 0xA0;
pub const CC1_RESET_MDT_NULL_NON_BYPASS_MDT: u8 = 0xC0;
pub const CC1_RESET_ALL_MDT_NULL_NON_BYPASS: u8 = 0xE0;

/// Control character byte 2 flags
pub const CC2_MESSAGE_ON: u8 = 0x01;
pub const CC2_MESSAGE_OFF: u8 = 0x02;
pub const CC2_ALARM: u8 = 0x04;
pub const CC2_UNLOCK: u8 = 0x08;
pub const CC2_IC_ULOCK: u8 = 0x40;

/// Structured field class for 5250
pub const SF_CLASS_5250: u8 = 0xD9;

/// Write structured field types accepted by the terminal
pub const DEFINE_AUDIT_WINDOW_TABLE: u8 = 0x30;
pub const DEFINE_COMMAND_KEY_FUNCTION: u8 = 0x31;
pub const READ_TEXT_SCREEN: u8 = 0x32;
pub const DEFINE_PENDING_OPERATIONS: u8 = 0x33;
pub const DEFINE_TEXT_SCREEN_FORMAT: u8 = 0x34;
pub const DEFINE_SCALE_TIME: u8 = 0x35;
pub const WRITE_TEXT_SCREEN: u8 = 0x36;
pub const DEFINE_SPECIAL_CHARACTERS: u8 = 0x37;
pub const PENDING_DATA: u8 = 0x38;
pub const DEFINE_OPERATOR_ERROR_MSGS: u8 = 0x39;
pub const DEFINE_PITCH_TABLE: u8 = 0x3A;
pub const DEFINE_FAKE_DP_CMD_KEY_FUNC: u8 = 0x3B;
pub const PASS_THROUGH: u8 = 0x3F;
pub const SF_5250_QUERY: u8 = 0x70;
pub const SF_5250_QUERY_STATION_STATE: u8 = 0x72;

pub const KNOWN_SF_TYPES: &[u8] = &[
    DEFINE_AUDIT_WINDOW_TABLE,
    DEFINE_COMMAND_KEY_FUNCTION,
    READ_TEXT_SCREEN,
    DEFINE_PENDING_OPERATIONS,
    DEFINE_TEXT_SCREEN_FORMAT,
    DEFINE_SCALE_TIME,
    WRITE_TEXT_SCREEN,
    DEFINE_SPECIAL_CHARACTERS,
    PENDING_DATA,
    DEFINE_OPERATOR_ERROR_MSGS,
    DEFINE_PITCH_TABLE,
    DEFINE_FAKE_DP_CMD_KEY_FUNC,
    PASS_THROUGH,
    SF_5250_QUERY,
    SF_5250_QUERY_STATION_STATE,
];

/// Negative response codes
pub const NR_INVALID_COMMAND: u32 = 0x1003_0101;
pub const NR_INVALID_CLEAR_UNIT_ALT: u32 = 0x1003_0105;
pub const NR_INVALID_SF_CLASS_TYPE: u32 = 0x1005_0111;
pub const NR_INVALID_ROW_COL_ADDR: u32 = 0x1005_0122;
pub const NR_INVALID_EXT_ATTR_TYPE: u32 = 0x1005_012C;
pub const NR_INVALID_SOH_LENGTH: u32 = 0x1005_012B;

/// Attention identifiers
pub const AID_F1: u8 = 0x31;
pub const AID_F13: u8 = 0xB1;
pub const AID_CLEAR: u8 = 0xBD;
pub const AID_ENTER: u8 = 0xF1;
pub const AID_HELP: u8 = 0xF3;
pub const AID_ROLL_DOWN: u8 = 0xF4;
pub const AID_ROLL_UP: u8 = 0xF5;
pub const AID_PRINT: u8 = 0xF6;
pub const AID_RECORD_BS: u8 = 0xF8;
// Pseudo-AIDs: never sent as a byte, they select a record flag instead
pub const AID_SYSREQ: u8 = 0x01;
pub const AID_ATTN: u8 = 0x02;
pub const AID_TESTREQ: u8 = 0x03;

/// F1..=F24 to AID byte
pub fn aid_for_function_key(n: u8) -> Option<u8> {
    match n {
        1..=12 => Some(AID_F1 + (n - 1)),
        13..=24 => Some(AID_F13 + (n - 13)),
        _ => None,
    }
}

/// AID byte back to F1..=F24
pub fn function_key_for_aid(aid: u8) -> Option<u8> {
    match aid {
        0x31..=0x3C => Some(aid - AID_F1 + 1),
        0xB1..=0xBC => Some(aid - AID_F13 + 13),
        _ => None,
    }
}

pub fn is_pseudo_aid(aid: u8) -> bool {
    matches!(aid, AID_SYSREQ | AID_ATTN | AID_TESTREQ)
}

/// Keyboard error source codes shown to the operator
pub const KBD_PROTECT: u16 = 0x05;
pub const KBD_ALPHAONLY: u16 = 0x08;
pub const KBD_NUMONLY: u16 = 0x09;
pub const KBD_DATA_DISALLOWED: u16 = 0x0E;
pub const KBD_ONLY09: u16 = 0x10;
pub const KBD_SIGNPOS: u16 = 0x11;
pub const KBD_NOROOM: u16 = 0x12;
pub const KBD_FLDM_DISALLOWED: u16 = 0x16;
pub const KBD_FER: u16 = 0x18;
pub const KBD_DUP_DISALLOWED: u16 = 0x19;

/// EBCDIC characters the field editor writes
pub const DUP_CHAR: u8 = 0x1C;
pub const EBCDIC_MINUS: u8 = 0x60;
pub const EBCDIC_ZERO: u8 = 0xF0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_key_aids() {
        assert_eq!(aid_for_function_key(1), Some(0x31));
        assert_eq!(aid_for_function_key(12), Some(0x3C));
        assert_eq!(aid_for_function_key(13), Some(0xB1));
        assert_eq!(aid_for_function_key(24), Some(0xBC));
        assert_eq!(aid_for_function_key(25), None);
        for n in 1..=24 {
            let aid = aid_for_function_key(n).unwrap();
            assert_eq!(function_key_for_aid(aid), Some(n));
        }
    }
}
