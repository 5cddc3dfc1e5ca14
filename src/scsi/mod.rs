//! SCSI Translation Layer (§4.9): turns one `HostRequest` into either an
//! immediate completion or an NVMe command submitted on the admin or I/O
//! queue. `REQUEST_SENSE` and `VERIFY(10)` are SPEC_FULL §B supplements
//! recovered from the original driver's ioctl surface.

pub mod mode_pages;
pub mod sense;

use crate::command;
use crate::controller::ControllerContext;
use crate::host::HostServices;
use crate::request::{scsi_status, HostRequest, QueueAction, QueueTag, RequestFunction, RequestStatus};
use crate::sync_policy::SyncPolicy;
use mode_pages::PageControl;
use sense::{opcode, ILLEGAL_LUN_SENSE, INVALID_REQUEST_SENSE, NOT_READY_SENSE};

const NSID: u32 = 1;
/// NVMe SQ/CQ fallback poll arm duration (§5 "Cancellation / timeouts").
pub const FALLBACK_TIMER_MICROSECONDS: u32 = 500_000;

impl<H: HostServices, S: SyncPolicy> ControllerContext<H, S> {
    /// §4.9 entry point: one `HostRequest`, fully synchronous for
    /// immediate opcodes, or a single NVMe submission for data-path ones.
    pub fn start_io(&mut self, host: &H, req: &mut H::Request) {
        if req.path() != 0 || req.target() != 0 {
            return fail_immediate(req, RequestStatus::SelectionTimeout, None);
        }
        if req.lun() != 0 {
            return fail_immediate(req, RequestStatus::Error, Some(ILLEGAL_LUN_SENSE));
        }

        match req.function() {
            RequestFunction::Shutdown => {
                self.shutdown(host);
                succeed_immediate(req);
            }
            RequestFunction::ResetBus | RequestFunction::ResetLogicalUnit => {
                self.reset_outstanding(host);
                succeed_immediate(req);
            }
            RequestFunction::Flush => self.synchronize_cache(host, req),
            RequestFunction::ExecuteScsi => self.execute_scsi(host, req),
        }
    }

    fn execute_scsi(&mut self, host: &H, req: &mut H::Request) {
        if !self.init_complete {
            return fail_immediate(req, RequestStatus::Busy, Some(NOT_READY_SENSE));
        }

        let op = req.cdb()[0];
        match op {
            opcode::TEST_UNIT_READY | opcode::START_STOP_UNIT => succeed_immediate(req),
            opcode::INQUIRY => self.inquiry(req),
            opcode::READ_CAPACITY_10 => self.read_capacity_10(req),
            opcode::READ_6 => self.read_write6(host, req, false),
            opcode::WRITE_6 => self.read_write6(host, req, true),
            opcode::READ_10 => self.read_write10(host, req, false),
            opcode::WRITE_10 => self.read_write10(host, req, true),
            opcode::VERIFY_10 => self.verify10(req),
            opcode::SYNCHRONIZE_CACHE_10 => self.synchronize_cache(host, req),
            opcode::MODE_SENSE_6 => self.mode_sense6(req),
            opcode::MODE_SENSE_10 => self.mode_sense10(req),
            opcode::LOG_SENSE => self.log_sense(host, req),
            opcode::READ_DEFECT_DATA_10 => self.read_defect_data10(req),
            opcode::REQUEST_SENSE => self.request_sense(req),
            opcode::ATA_PASS_THROUGH_12 | opcode::ATA_PASS_THROUGH_16 => {
                crate::sat::handle_ata_pass_through(self, host, req)
            }
            _ => fail_immediate(req, RequestStatus::Error, Some(INVALID_REQUEST_SENSE)),
        }
    }

    /// Standard INQUIRY reply (§8 scenario 1): peripheral device type 0
    /// (direct-access), RMB=0, version 5 (SPC-3), response data format 2,
    /// 31 additional bytes, vendor/product/revision padded with spaces.
    fn inquiry(&self, req: &mut H::Request) {
        if req.cdb()[1] & 0x01 != 0 {
            return fail_immediate(req, RequestStatus::Error, Some(INVALID_REQUEST_SENSE));
        }
        let mut page = [0x20u8; 36];
        page[0] = 0x00;
        page[1] = 0x00;
        page[2] = 0x05;
        page[3] = 0x02;
        page[4] = 31;
        page[5] = 0x00;
        page[6] = 0x00;
        page[7] = 0x00;
        page[8..16].copy_from_slice(b"NVMeHost");
        page[16..32].copy_from_slice(b"NVMe SCSI Xlate");
        page[32..36].copy_from_slice(b"1.0 ");
        write_reply(req, &page);
        succeed_immediate(req);
    }

    /// READ CAPACITY(10): big-endian `(last_lba, block_size)`, saturated to
    /// `0xFFFFFFFF` when the namespace exceeds 32-bit LBA range (§4.9, §9
    /// open question 2 — resolved in DESIGN.md).
    fn read_capacity_10(&self, req: &mut H::Request) {
        let last_lba = self.identify.lba_count.saturating_sub(1);
        let last_lba32 = if last_lba > u32::MAX as u64 { u32::MAX } else { last_lba as u32 };
        let mut reply = [0u8; 8];
        reply[0..4].copy_from_slice(&last_lba32.to_be_bytes());
        reply[4..8].copy_from_slice(&self.identify.block_size.to_be_bytes());
        write_reply(req, &reply);
        succeed_immediate(req);
    }

    fn read_write6(&mut self, host: &H, req: &mut H::Request, is_write: bool) {
        let cdb = *req.cdb();
        let args = command::decode_cdb6(&cdb);
        self.read_write(host, req, is_write, args.lba, args.blocks);
    }

    fn read_write10(&mut self, host: &H, req: &mut H::Request, is_write: bool) {
        let cdb = *req.cdb();
        let args = command::decode_cdb10(&cdb);
        self.read_write(host, req, is_write, args.lba, args.blocks);
    }

    /// §4.5/§4.9: bounds-check, PRP-list construction, admission control
    /// (untagged singleton, ORDERED fencing), then a single NVMe
    /// Read/Write submission.
    fn read_write(&mut self, host: &H, req: &mut H::Request, is_write: bool, lba: u64, blocks: u32) {
        if blocks == 0 {
            return succeed_immediate(req);
        }
        if lba.saturating_add(blocks as u64) > self.identify.lba_count {
            let sense = crate::error::AutoSense { sense_key: sense::sense_key::ILLEGAL_REQUEST, asc: sense::asc::LOGICAL_BLOCK_ADDRESS_OUT_OF_RANGE, ascq: 0 };
            return fail_immediate(req, RequestStatus::Error, Some(sense));
        }
        let data_len = (blocks as u64) * (self.identify.block_size as u64);
        if (req.data_len() as u64) < data_len {
            return fail_immediate(req, RequestStatus::Error, Some(INVALID_REQUEST_SENSE));
        }

        let cid_raw = match self.reserve_cid(req) {
            Some(v) => v,
            None => return fail_immediate(req, RequestStatus::Busy, None),
        };

        if req.queue_action() == QueueAction::Ordered {
            if !self.fence_flush(host, cid_raw) {
                self.release_cid(req.queue_tag());
                return fail_immediate(req, RequestStatus::Busy, None);
            }
        }

        let virt = req.data_buffer_mut().as_mut_ptr() as usize;
        let mut len_hint = data_len as u32;
        let phys = host.get_physical_address(virt, &mut len_hint);

        let prp = match command::build_prp_list(host, &mut self.prp_pool, virt, phys, data_len as u32) {
            Some(p) => p,
            None => {
                self.release_cid(req.queue_tag());
                return fail_immediate(req, RequestStatus::Busy, None);
            }
        };
        req.extension_mut().prp_page = prp.prp_page;

        let sqe = command::read_write(cid_raw, NSID, is_write, lba, blocks, &prp);
        self.submit_io(host, sqe);
        req.set_status(RequestStatus::Pending);
    }

    /// SPEC_FULL §B.2: VERIFY(10) is a bounds check against the identified
    /// namespace size only, never an NVMe transfer.
    fn verify10(&self, req: &mut H::Request) {
        let cdb = *req.cdb();
        let args = command::decode_cdb10(&cdb);
        if args.lba.saturating_add(args.blocks as u64) > self.identify.lba_count {
            let sense = crate::error::AutoSense { sense_key: sense::sense_key::ILLEGAL_REQUEST, asc: sense::asc::LOGICAL_BLOCK_ADDRESS_OUT_OF_RANGE, ascq: 0 };
            return fail_immediate(req, RequestStatus::Error, Some(sense));
        }
        succeed_immediate(req);
    }

    fn synchronize_cache(&mut self, host: &H, req: &mut H::Request) {
        let cid_raw = match self.reserve_cid(req) {
            Some(v) => v,
            None => return fail_immediate(req, RequestStatus::Busy, None),
        };
        let sqe = command::flush(cid_raw, NSID);
        self.submit_io(host, sqe);
        req.set_status(RequestStatus::Pending);
    }

    fn mode_sense6(&self, req: &mut H::Request) {
        let dbd = req.cdb()[1] & 0x08 != 0;
        let page_code = req.cdb()[2] & 0x3F;
        let pc = PageControl::from_cdb_byte(req.cdb()[2]);
        let mut buf = [0u8; 4 + 8 + 20];
        let mut offset = 4usize;
        if !dbd {
            mode_pages::write_block_descriptor(&mut buf[offset..offset + 8], self.identify.lba_count, self.identify.block_size);
            offset += 8;
            buf[3] = 8;
        }
        match mode_pages::write_requested_page(&mut buf[offset..], page_code, pc) {
            Some(n) => offset += n,
            None => return fail_immediate(req, RequestStatus::Error, Some(INVALID_REQUEST_SENSE)),
        }
        buf[0] = (offset - 1) as u8;
        buf[1] = 0x00;
        write_reply(req, &buf[..offset]);
        succeed_immediate(req);
    }

    fn mode_sense10(&self, req: &mut H::Request) {
        let dbd = req.cdb()[1] & 0x08 != 0;
        let page_code = req.cdb()[2] & 0x3F;
        let pc = PageControl::from_cdb_byte(req.cdb()[2]);
        let mut buf = [0u8; 8 + 8 + 20];
        let mut offset = 8usize;
        if !dbd {
            mode_pages::write_block_descriptor(&mut buf[offset..offset + 8], self.identify.lba_count, self.identify.block_size);
            offset += 8;
            buf[6..8].copy_from_slice(&8u16.to_be_bytes());
        }
        match mode_pages::write_requested_page(&mut buf[offset..], page_code, pc) {
            Some(n) => offset += n,
            None => return fail_immediate(req, RequestStatus::Error, Some(INVALID_REQUEST_SENSE)),
        }
        let data_len = (offset - 2) as u16;
        buf[0..2].copy_from_slice(&data_len.to_be_bytes());
        buf[2] = 0x00;
        write_reply(req, &buf[..offset]);
        succeed_immediate(req);
    }

    /// LOG SENSE: only the Informational Exceptions page (0x2F) is
    /// supported, and only by way of an admin Get Log Page fetch of the
    /// NVMe SMART/Health log (§4.9, SPEC_FULL §A).
    fn log_sense(&mut self, host: &H, req: &mut H::Request) {
        let page_code = req.cdb()[2] & 0x3F;
        if page_code != 0x2F {
            return fail_immediate(req, RequestStatus::Error, Some(INVALID_REQUEST_SENSE));
        }
        let index = match self.prp_pool.acquire() {
            Some(i) => i,
            None => return fail_immediate(req, RequestStatus::Busy, None),
        };
        if self.acquire_untagged().is_none() {
            self.prp_pool.release(index);
            return fail_immediate(req, RequestStatus::Busy, None);
        }
        let phys = self.prp_pool.phys(index);
        let cid = crate::cid::Cid::AdminGetLog(index).encode();
        let sqe = command::get_log_page(cid, crate::sat::smart::SMART_LOG_ID, phys);
        self.submit_admin(host, sqe);
        req.set_status(RequestStatus::Pending);
    }

    fn read_defect_data10(&self, req: &mut H::Request) {
        let mut buf = [0u8; 4];
        buf[0] = 0;
        buf[1] = req.cdb()[2] & 0x18;
        write_reply(req, &buf);
        succeed_immediate(req);
    }

    /// SPEC_FULL §B.1: returns the one-deep shadow of the last autosense
    /// this core generated, then clears it (single-consumer semantics).
    fn request_sense(&mut self, req: &mut H::Request) {
        let sense = self.last_sense().unwrap_or(crate::error::AutoSense { sense_key: sense::sense_key::NO_SENSE, asc: 0, ascq: 0 });
        self.clear_last_sense();
        if let Some(buf) = req.sense_buffer_mut() {
            sense::write_fixed_sense(buf, sense);
        } else {
            let mut fixed = [0u8; 18];
            sense::write_fixed_sense(&mut fixed, sense);
            write_reply(req, &fixed);
        }
        req.set_status(RequestStatus::Success);
        req.set_scsi_status(scsi_status::GOOD);
    }

    fn reserve_cid(&mut self, req: &H::Request) -> Option<u16> {
        match req.queue_tag() {
            QueueTag::Tagged(v) => Some(crate::cid::Cid::Tagged(v).encode()),
            QueueTag::Untagged => self.acquire_untagged().map(|seq| crate::cid::Cid::Untagged(seq).encode()),
        }
    }

    fn release_cid(&mut self, tag: QueueTag) {
        if matches!(tag, QueueTag::Untagged) {
            self.release_untagged();
        }
    }

    /// Submits a synthetic flush tagged as an ordered fence and busy-polls
    /// the I/O completion queue until it resolves, bounded the same way as
    /// every other polled wait in this core (§4.9 "ORDERED" note).
    fn fence_flush(&mut self, host: &H, tag: u16) -> bool {
        let cid = crate::cid::Cid::OrderedFlush(tag).encode();
        let sqe = command::flush(cid, NSID);
        self.mark_fence_pending();
        self.submit_io(host, sqe);

        const BUDGET_US: u32 = 5_000_000;
        const TICK_US: u32 = 1_000;
        let mut waited = 0u32;
        loop {
            self.process_io(host);
            if !self.fence_pending() {
                return true;
            }
            if waited >= BUDGET_US {
                return false;
            }
            host.stall_microseconds(TICK_US);
            waited += TICK_US;
        }
    }

    fn submit_io(&mut self, host: &H, sqe: crate::queue::SubmissionQueueEntry) {
        let reglayer = self.regs(host);
        if let Some(io) = self.io.as_mut() {
            io.submit(&reglayer, sqe);
            self.stats.io_submitted += 1;
        }
    }
}

fn write_reply<R: HostRequest>(req: &mut R, data: &[u8]) {
    let buf = req.data_buffer_mut();
    let n = data.len().min(buf.len());
    buf[..n].copy_from_slice(&data[..n]);
}

fn succeed_immediate<R: HostRequest>(req: &mut R) {
    req.set_status(RequestStatus::Success);
    req.set_scsi_status(scsi_status::GOOD);
}

fn fail_immediate<R: HostRequest>(req: &mut R, status: RequestStatus, sense: Option<crate::error::AutoSense>) {
    req.set_status(status);
    if let Some(sense) = sense {
        req.set_autosense(sense);
    } else {
        req.set_scsi_status(scsi_status::CHECK_CONDITION);
    }
}
