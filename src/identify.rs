//! Byte-exact accessors into the 4 KiB Identify Controller / Identify
//! Namespace buffers (§3, §6 wire formats). Per §9's redesign note, these
//! are explicit little-endian reads off a byte slice, never a pointer cast
//! onto the DMA buffer.

const SERIAL_OFFSET: usize = 4;
const SERIAL_LEN: usize = 20;
const MODEL_OFFSET: usize = 24;
const MODEL_LEN: usize = 40;
const FIRMWARE_OFFSET: usize = 64;
const FIRMWARE_LEN: usize = 8;
const NN_OFFSET: usize = 516;

const NSZE_OFFSET: usize = 0;
const FLBAS_OFFSET: usize = 26;
const LBAF_OFFSET: usize = 128;

#[derive(Debug, Clone, Copy)]
pub struct IdentifyControllerFields {
    pub serial: [u8; SERIAL_LEN],
    pub model: [u8; MODEL_LEN],
    pub firmware: [u8; FIRMWARE_LEN],
    pub namespace_count: u32,
}

pub fn parse_identify_controller(buf: &[u8]) -> IdentifyControllerFields {
    let mut serial = [0u8; SERIAL_LEN];
    serial.copy_from_slice(&buf[SERIAL_OFFSET..SERIAL_OFFSET + SERIAL_LEN]);
    let mut model = [0u8; MODEL_LEN];
    model.copy_from_slice(&buf[MODEL_OFFSET..MODEL_OFFSET + MODEL_LEN]);
    let mut firmware = [0u8; FIRMWARE_LEN];
    firmware.copy_from_slice(&buf[FIRMWARE_OFFSET..FIRMWARE_OFFSET + FIRMWARE_LEN]);
    let namespace_count = u32::from_le_bytes([buf[NN_OFFSET], buf[NN_OFFSET + 1], buf[NN_OFFSET + 2], buf[NN_OFFSET + 3]]);
    IdentifyControllerFields { serial, model, firmware, namespace_count }
}

#[derive(Debug, Clone, Copy)]
pub struct IdentifyNamespaceFields {
    pub lba_count: u64,
    pub flbas: u8,
}

pub fn parse_identify_namespace(buf: &[u8]) -> IdentifyNamespaceFields {
    let mut nsze_bytes = [0u8; 8];
    nsze_bytes.copy_from_slice(&buf[NSZE_OFFSET..NSZE_OFFSET + 8]);
    let lba_count = u64::from_le_bytes(nsze_bytes);
    let flbas = buf[FLBAS_OFFSET];
    IdentifyNamespaceFields { lba_count, flbas }
}

/// Selected LBA Format entry's `LBADS` exponent: block size is `1 <<
/// LBADS`, defaulting to 512 when the indicated size is degenerate
/// (§4.7 step 4).
pub fn block_size_from_lbaf(buf: &[u8], flbas: u8) -> u32 {
    let index = (flbas & 0x0F) as usize;
    let entry_offset = LBAF_OFFSET + index * 4;
    let lbads = buf[entry_offset + 2];
    let size = 1u32.checked_shl(lbads as u32).unwrap_or(0);
    if size <= 1 {
        512
    } else {
        size
    }
}

/// Strip leading spaces, matching the SCSI INQUIRY Vendor/Product slicing
/// rule (§4.9).
pub fn trim_leading_spaces(field: &[u8]) -> &[u8] {
    let mut start = 0;
    while start < field.len() && field[start] == b' ' {
        start += 1;
    }
    &field[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serial_model_firmware_at_fixed_offsets() {
        let mut buf = [0u8; 4096];
        buf[SERIAL_OFFSET..SERIAL_OFFSET + 3].copy_from_slice(b"SN1");
        buf[MODEL_OFFSET..MODEL_OFFSET + 5].copy_from_slice(b"MODEL");
        buf[FIRMWARE_OFFSET..FIRMWARE_OFFSET + 2].copy_from_slice(b"FW");
        let fields = parse_identify_controller(&buf);
        assert_eq!(&fields.serial[..3], b"SN1");
        assert_eq!(&fields.model[..5], b"MODEL");
        assert_eq!(&fields.firmware[..2], b"FW");
    }

    #[test]
    fn block_size_defaults_to_512_when_degenerate() {
        let buf = [0u8; 4096];
        assert_eq!(block_size_from_lbaf(&buf, 0), 512);
    }

    #[test]
    fn trims_leading_spaces() {
        assert_eq!(trim_leading_spaces(b"   ABC"), b"ABC");
    }
}
