//! `MockHost`/`MockRequest`: the `HostServices`/`HostRequest` implementation
//! the test suite drives the core against. Fixed-size, `no_std`-friendly,
//! no heap — the same texture the rest of the crate uses for fixed storage.

use core::cell::{Cell, RefCell, UnsafeCell};

use crate::arena::ARENA_SIZE;
use crate::error::AutoSense;
use crate::host::{HostServices, LogLevel};
use crate::regs::REG_CC;
use crate::request::{HostRequest, PerRequestExtension, QueueAction, QueueTag, RequestFunction, RequestStatus};

pub struct MockRequest {
    pub path: u8,
    pub target: u8,
    pub lun: u8,
    pub function: RequestFunction,
    pub cdb: [u8; 16],
    pub data: [u8; 512],
    pub data_len: u32,
    pub sense: [u8; 32],
    pub status: RequestStatus,
    pub scsi_status: u8,
    pub queue_tag: QueueTag,
    pub queue_action: QueueAction,
    pub extension: PerRequestExtension,
}

impl MockRequest {
    pub fn new(function: RequestFunction, cdb: [u8; 16]) -> Self {
        MockRequest {
            path: 0,
            target: 0,
            lun: 0,
            function,
            cdb,
            data: [0u8; 512],
            data_len: 512,
            sense: [0u8; 32],
            status: RequestStatus::Pending,
            scsi_status: 0,
            queue_tag: QueueTag::Untagged,
            queue_action: QueueAction::Simple,
            extension: PerRequestExtension::default(),
        }
    }

    pub fn autosense(&self) -> AutoSense {
        AutoSense { sense_key: self.sense[2], asc: self.sense[12], ascq: self.sense[13] }
    }
}

impl HostRequest for MockRequest {
    fn path(&self) -> u8 {
        self.path
    }

    fn target(&self) -> u8 {
        self.target
    }

    fn lun(&self) -> u8 {
        self.lun
    }

    fn function(&self) -> RequestFunction {
        self.function
    }

    fn cdb(&self) -> &[u8; 16] {
        &self.cdb
    }

    fn queue_tag(&self) -> QueueTag {
        self.queue_tag
    }

    fn queue_action(&self) -> QueueAction {
        self.queue_action
    }

    fn data_len(&self) -> u32 {
        self.data_len
    }

    fn data_buffer_mut(&mut self) -> &mut [u8] {
        let len = self.data_len as usize;
        &mut self.data[..len]
    }

    fn sense_len(&self) -> u32 {
        self.sense.len() as u32
    }

    fn sense_buffer_mut(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.sense)
    }

    fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
    }

    fn set_scsi_status(&mut self, scsi_status: u8) {
        self.scsi_status = scsi_status;
    }

    fn extension_mut(&mut self) -> &mut PerRequestExtension {
        &mut self.extension
    }
}

/// One adapter's worth of register space and uncached DMA memory. The
/// `CC`/`CSTS` handshake is simulated synchronously on write, since this
/// harness has no real controller firmware behind it.
pub struct MockHost {
    regs: RefCell<[u8; 0x2000]>,
    arena: UnsafeCell<[u8; ARENA_SIZE]>,
    timer: Cell<Option<fn()>>,
}

impl MockHost {
    pub fn new() -> Self {
        let mut regs = [0u8; 0x2000];
        let cap: u64 = 63; // DSTRD=0, MQES=63, timeout field left zero
        regs[0..8].copy_from_slice(&cap.to_le_bytes());
        MockHost { regs: RefCell::new(regs), arena: UnsafeCell::new([0u8; ARENA_SIZE]), timer: Cell::new(None) }
    }

    fn simulate_cc_write(&self, cc: u32) {
        const CC_EN: u32 = 1 << 0;
        const CC_SHN_MASK: u32 = 0b11 << 14;
        const CSTS_RDY: u32 = 1 << 0;
        const CSTS_SHST_COMPLETE: u32 = 0b10 << 2;
        const REG_CSTS: u32 = 0x1C;

        let mut csts = self.mmio_read32(REG_CSTS);
        if cc & CC_EN != 0 {
            csts |= CSTS_RDY;
        } else {
            csts &= !CSTS_RDY;
        }
        if cc & CC_SHN_MASK != 0 {
            csts = (csts & !(0b11 << 2)) | CSTS_SHST_COMPLETE;
        }
        let offset = REG_CSTS as usize;
        self.regs.borrow_mut()[offset..offset + 4].copy_from_slice(&csts.to_le_bytes());
    }

    pub fn timer_armed(&self) -> bool {
        self.timer.get().is_some()
    }
}

impl HostServices for MockHost {
    type Request = MockRequest;

    fn mmio_read32(&self, offset: u32) -> u32 {
        let regs = self.regs.borrow();
        let o = offset as usize;
        u32::from_le_bytes([regs[o], regs[o + 1], regs[o + 2], regs[o + 3]])
    }

    fn mmio_write32(&self, offset: u32, value: u32) {
        {
            let mut regs = self.regs.borrow_mut();
            let o = offset as usize;
            regs[o..o + 4].copy_from_slice(&value.to_le_bytes());
        }
        if offset == REG_CC {
            self.simulate_cc_write(value);
        }
    }

    fn mmio_read64(&self, offset: u32) -> u64 {
        let lo = self.mmio_read32(offset) as u64;
        let hi = self.mmio_read32(offset + 4) as u64;
        lo | (hi << 32)
    }

    fn mmio_write64(&self, offset: u32, value: u64) {
        self.mmio_write32(offset, (value & 0xFFFF_FFFF) as u32);
        self.mmio_write32(offset + 4, (value >> 32) as u32);
    }

    fn pci_config_read_u8(&self, _offset: u16) -> u8 {
        0
    }

    fn pci_config_read_u16(&self, _offset: u16) -> u16 {
        0
    }

    fn pci_config_read_u32(&self, _offset: u16) -> u32 {
        0
    }

    fn pci_config_write_u16(&self, _offset: u16, _value: u16) {}

    fn pci_config_write_u32(&self, _offset: u16, _value: u32) {}

    fn get_physical_address(&self, virt: usize, _in_out_len: &mut u32) -> u64 {
        virt as u64
    }

    fn stall_microseconds(&self, _usec: u32) {}

    fn register_timer(&self, callback: fn(), _microseconds: u32) {
        self.timer.set(Some(callback));
    }

    fn cancel_timer(&self) {
        self.timer.set(None);
    }

    fn notify_request_complete(&self, _request: &mut Self::Request) {}

    fn notify_next_request(&self) {}

    fn notify_next_lu_request(&self) {}

    fn with_srb<F, R>(&self, _path: u8, _target: u8, _lun: u8, _tag: QueueTag, f: F) -> R
    where
        F: FnOnce(Option<&mut Self::Request>) -> R,
    {
        f(None)
    }

    fn debug_print(&self, _level: LogLevel, _message: &str) {}

    fn allocate_uncached_region(&self, _total_size: usize) -> Option<(usize, u64)> {
        let ptr = self.arena.get() as usize;
        Some((ptr, ptr as u64))
    }
}
