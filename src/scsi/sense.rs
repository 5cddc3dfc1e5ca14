//! SCSI sense-key / ASC / ASCQ constants (§4.9, §7), organized the way the
//! wider SCSI-2/SPC ecosystem does it: nested `pub mod` blocks of plain
//! `pub const`s rather than an enum, since CDB and sense bytes are read and
//! written as raw bytes throughout this layer.

pub mod opcode {
    pub const TEST_UNIT_READY: u8 = 0x00;
    pub const REQUEST_SENSE: u8 = 0x03;
    pub const INQUIRY: u8 = 0x12;
    pub const MODE_SENSE_6: u8 = 0x1A;
    pub const START_STOP_UNIT: u8 = 0x1B;
    pub const READ_CAPACITY_10: u8 = 0x25;
    pub const READ_10: u8 = 0x28;
    pub const WRITE_10: u8 = 0x2A;
    pub const VERIFY_10: u8 = 0x2F;
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
    pub const READ_DEFECT_DATA_10: u8 = 0x37;
    pub const LOG_SENSE: u8 = 0x4D;
    pub const MODE_SENSE_10: u8 = 0x5A;
    pub const READ_6: u8 = 0x08;
    pub const WRITE_6: u8 = 0x0A;
    pub const ATA_PASS_THROUGH_12: u8 = 0xA1;
    pub const ATA_PASS_THROUGH_16: u8 = 0x85;
}

pub mod sense_key {
    pub const NO_SENSE: u8 = 0x00;
    pub const NOT_READY: u8 = 0x02;
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    pub const HARDWARE_ERROR: u8 = 0x04;
}

pub mod asc {
    pub const LUN_NOT_READY: u8 = 0x04;
    pub const INVALID_COMMAND_OPERATION_CODE: u8 = 0x20;
    pub const LOGICAL_BLOCK_ADDRESS_OUT_OF_RANGE: u8 = 0x21;
    pub const INVALID_FIELD_IN_CDB: u8 = 0x24;
    pub const LOGICAL_UNIT_NOT_SUPPORTED: u8 = 0x25;
    pub const INTERNAL_TARGET_FAILURE: u8 = 0x44;
}

use crate::error::AutoSense;

pub const NOT_READY_SENSE: AutoSense = AutoSense { sense_key: sense_key::NOT_READY, asc: asc::LUN_NOT_READY, ascq: 0x01 };
pub const ILLEGAL_LUN_SENSE: AutoSense = AutoSense { sense_key: sense_key::ILLEGAL_REQUEST, asc: asc::LOGICAL_UNIT_NOT_SUPPORTED, ascq: 0x00 };
pub const INVALID_REQUEST_SENSE: AutoSense = AutoSense { sense_key: sense_key::ILLEGAL_REQUEST, asc: asc::INVALID_COMMAND_OPERATION_CODE, ascq: 0x00 };
pub const HARDWARE_ERROR_SENSE: AutoSense = AutoSense { sense_key: sense_key::HARDWARE_ERROR, asc: asc::INTERNAL_TARGET_FAILURE, ascq: 0x00 };

/// Writes the fixed-format (response code `0x70`) autosense layout used
/// throughout this crate: `{response_code, 0, sense_key, info[4], additional_len, cmd_info[4], asc, ascq, fru, sks[3]}`.
pub fn write_fixed_sense(buf: &mut [u8], sense: AutoSense) {
    if buf.len() < 18 {
        return;
    }
    for b in buf.iter_mut() {
        *b = 0;
    }
    buf[0] = 0x70;
    buf[2] = sense.sense_key;
    buf[7] = 10;
    buf[12] = sense.asc;
    buf[13] = sense.ascq;
}
