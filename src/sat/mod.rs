//! SMART / SAT / legacy IOCTL layer (§4.10): ATA PASS-THROUGH 12/16 command
//! decode, dispatch into the NVMe SMART/Health log or a cached Identify
//! translation, and the Get Log Page completion formatter shared with the
//! SCSI LOG SENSE path.

pub mod ata_identify;
pub mod smart;

use crate::controller::{ControllerContext, IdentifyCache};
use crate::host::HostServices;
use crate::request::{scsi_status, HostRequest, RequestStatus};
use crate::scsi::sense;
use crate::sync_policy::SyncPolicy;

const ATA_CMD_IDENTIFY_DEVICE: u8 = 0xEC;
const ATA_CMD_SMART: u8 = 0xB0;
const ATA_FEATURE_SMART_READ_DATA: u8 = 0xD0;
const ATA_FEATURE_SMART_READ_LOG: u8 = 0xD5;
const ATA_FEATURE_SMART_RETURN_STATUS: u8 = 0xDA;

/// SMART signature the ATA SMART feature set writes into LBA_MID/LBA_HIGH
/// on a SMART command (ATA-8 7.52.3).
const SMART_SIG_LBA_MID: u8 = 0x4F;
const SMART_SIG_LBA_HIGH: u8 = 0xC2;

/// ATA PASS-THROUGH `PROTOCOL` field values this translation accepts
/// (`cdb[1]` bits 4:1).
mod protocol {
    pub const PIO_DATA_IN: u8 = 0x04;
    pub const UDMA_DATA_IN: u8 = 0x0A;
    pub const DEVICE_DIAGNOSTIC: u8 = 0x08;
}

fn write_reply<R: HostRequest>(req: &mut R, data: &[u8]) {
    let buf = req.data_buffer_mut();
    let n = data.len().min(buf.len());
    buf[..n].copy_from_slice(&data[..n]);
}

/// Fields of an ATA PASS-THROUGH 12/16 CDB relevant to dispatch (§4.10).
struct PassThroughFields {
    feature: u8,
    command: u8,
    lba_mid: u8,
    lba_high: u8,
    protocol: u8,
}

/// §4.10: ATA PASS-THROUGH 12 carries `(features, command)` at
/// `cdb[3]`/`cdb[9]`, `(lba_mid, lba_high)` at `cdb[6]`/`cdb[7]`; ATA
/// PASS-THROUGH 16 at `cdb[4]`/`cdb[14]` and `cdb[10]`/`cdb[12]`. `PROTOCOL`
/// lives at `cdb[1]` bits 4:1 in both variants.
fn decode_feature_command(cdb: &[u8; 16], is_16: bool) -> PassThroughFields {
    let protocol = (cdb[1] >> 1) & 0x0F;
    if is_16 {
        PassThroughFields { feature: cdb[4], command: cdb[14], lba_mid: cdb[10], lba_high: cdb[12], protocol }
    } else {
        PassThroughFields { feature: cdb[3], command: cdb[9], lba_mid: cdb[6], lba_high: cdb[7], protocol }
    }
}

fn is_accepted_protocol(protocol: u8) -> bool {
    matches!(protocol, protocol::PIO_DATA_IN | protocol::UDMA_DATA_IN | protocol::DEVICE_DIAGNOSTIC)
}

impl<H: HostServices, S: SyncPolicy> ControllerContext<H, S> {
    /// Admin Get Log Page fetch shared by LOG SENSE and the SMART
    /// PASS-THROUGH commands; completion formatting happens in
    /// [`format_get_log_completion`] once the request is recovered by tag.
    pub(crate) fn submit_smart_log_fetch(&mut self, host: &H, req: &mut H::Request) {
        let index = match self.prp_pool.acquire() {
            Some(i) => i,
            None => return fail(req, RequestStatus::Busy),
        };
        if self.acquire_untagged().is_none() {
            self.prp_pool.release(index);
            return fail(req, RequestStatus::Busy);
        }
        let phys = self.prp_pool.phys(index);
        let cid = crate::cid::Cid::AdminGetLog(index).encode();
        let sqe = crate::command::get_log_page(cid, smart::SMART_LOG_ID, phys);
        self.submit_admin(host, sqe);
        req.set_status(RequestStatus::Pending);
    }
}

/// Entry point from the SCSI translation layer's opcode dispatch (§4.9).
pub fn handle_ata_pass_through<H: HostServices, S: SyncPolicy>(ctx: &mut ControllerContext<H, S>, host: &H, req: &mut H::Request) {
    let cdb = *req.cdb();
    let is_16 = cdb[0] == sense::opcode::ATA_PASS_THROUGH_16;
    let fields = decode_feature_command(&cdb, is_16);

    if !is_accepted_protocol(fields.protocol) {
        return fail(req, RequestStatus::Error);
    }

    match fields.command {
        ATA_CMD_IDENTIFY_DEVICE => {
            let buf = ata_identify::build_ata_identify_device(&ctx.identify);
            write_reply(req, &buf);
            req.set_status(RequestStatus::Success);
            req.set_scsi_status(scsi_status::GOOD);
        }
        ATA_CMD_SMART => match fields.feature {
            ATA_FEATURE_SMART_READ_DATA if fields.lba_mid == SMART_SIG_LBA_MID && fields.lba_high == SMART_SIG_LBA_HIGH => {
                ctx.submit_smart_log_fetch(host, req)
            }
            ATA_FEATURE_SMART_READ_LOG => {
                write_reply(req, &[0u8; 512]);
                req.set_status(RequestStatus::Success);
                req.set_scsi_status(scsi_status::GOOD);
            }
            ATA_FEATURE_SMART_RETURN_STATUS => {
                req.set_status(RequestStatus::Success);
                req.set_scsi_status(scsi_status::GOOD);
            }
            _ => fail(req, RequestStatus::Error),
        },
        _ => fail(req, RequestStatus::Error),
    }
}

fn fail<R: HostRequest>(req: &mut R, status: RequestStatus) {
    req.set_status(status);
    req.set_scsi_status(scsi_status::CHECK_CONDITION);
}

/// Formats an admin Get Log Page completion for whichever requester
/// triggered it: SCSI LOG SENSE wants the Informational Exceptions mode
/// page; ATA PASS-THROUGH SMART READ DATA/LOG wants the translated 512-byte
/// ATA SMART buffer.
pub fn format_get_log_completion<R: HostRequest>(req: &mut R, nvme_log: &[u8], _identify: &IdentifyCache) {
    let opcode = req.cdb()[0];
    if opcode == sense::opcode::LOG_SENSE {
        let critical_warning = nvme_log.first().copied().unwrap_or(0);
        let (asc, ascq) = if critical_warning != 0 { (0x5D, 0x00) } else { (0x00, 0x00) };
        let mut page = [0u8; 11];
        page[0] = 0x2F;
        page[1] = 0x00;
        page[2..4].copy_from_slice(&7u16.to_be_bytes());
        page[4] = 0x00;
        page[5] = 0x00;
        page[6] = 0x23;
        page[7] = 3;
        page[8] = asc;
        page[9] = ascq;
        page[10] = 0x00;
        write_reply(req, &page);
    } else {
        let buf = smart::nvme_to_ata_smart(nvme_log);
        write_reply(req, &buf);
    }
}
