//! Host Services: the abstract boundary to the surrounding port driver (§6).
//!
//! The core never touches PCI config space, MMIO, a clock, or a console
//! directly. Every one of those is a method here, and every concrete adapter
//! (a real miniport, or the `MockHost` used by the test suite) implements
//! this trait once.

use crate::request::{HostRequest, QueueTag};

/// Severity passed to [`HostServices::debug_print`], mirrored from `log`
/// so callers can forward it without a second enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// PCI device class codes `find_adapter` matches against (§6): mass storage
/// controllers with SCSI (0x01), RAID/other (0x08 is not a storage class in
/// the strict PCI spec but some NVMe-adjacent bridges report it), and NVM
/// Express itself (class 0x01, subclass 0x08, programming interface 0x02).
pub const PCI_CLASS_MASS_STORAGE: u8 = 0x01;
pub const PCI_SUBCLASS_NVM: u8 = 0x08;
pub const PCI_PROGIF_NVME: u8 = 0x02;

/// Bus/slot coordinates identifying a candidate adapter, as handed to
/// `find_adapter` by the port driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusAddress {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

/// Outcome of a `find_adapter` scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindAdapterResult {
    Found,
    NotFound,
    Error,
}

/// Adapter configuration `find_adapter` fills in on a match (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterConfig {
    pub max_transfer_bytes: u32,
    pub scatter_gather: bool,
    pub bus_master: bool,
    pub dual_address_cycle: bool,
    pub number_of_targets: u8,
    pub alignment_mask: u32,
    pub per_request_extension_size: u32,
    pub tagged_queuing: bool,
    pub multiple_requests_per_lu: bool,
    pub auto_request_sense: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            max_transfer_bytes: 2 * 1024 * 1024,
            scatter_gather: true,
            bus_master: true,
            dual_address_cycle: true,
            number_of_targets: 2,
            alignment_mask: 3,
            per_request_extension_size: core::mem::size_of::<crate::request::PerRequestExtension>() as u32,
            tagged_queuing: true,
            multiple_requests_per_lu: true,
            auto_request_sense: true,
        }
    }
}

/// Everything the core needs from its environment. Implemented once by the
/// real port-driver glue and once by the in-crate `MockHost` test harness.
pub trait HostServices {
    type Request: HostRequest;

    fn mmio_read32(&self, offset: u32) -> u32;
    fn mmio_write32(&self, offset: u32, value: u32);
    fn mmio_read64(&self, offset: u32) -> u64;
    fn mmio_write64(&self, offset: u32, value: u64);

    fn pci_config_read_u8(&self, offset: u16) -> u8;
    fn pci_config_read_u16(&self, offset: u16) -> u16;
    fn pci_config_read_u32(&self, offset: u16) -> u32;
    fn pci_config_write_u16(&self, offset: u16, value: u16);
    fn pci_config_write_u32(&self, offset: u16, value: u32);

    /// Resolve a virtual address (and, on input, its candidate run length;
    /// on return, the host may have shortened it to the first physically
    /// contiguous chunk) to a physical address.
    fn get_physical_address(&self, virt: usize, in_out_len: &mut u32) -> u64;

    fn stall_microseconds(&self, usec: u32);

    /// Arm a one-shot fallback timer; `callback` is a free function pointer
    /// since the core holds no closures across the host boundary.
    fn register_timer(&self, callback: fn(), microseconds: u32);
    fn cancel_timer(&self);

    fn notify_request_complete(&self, request: &mut Self::Request);
    fn notify_next_request(&self);
    fn notify_next_lu_request(&self);

    /// Recover an in-flight request handle by queue tag. Takes a callback
    /// rather than returning a borrow directly, since the handle lives in
    /// storage owned by the host behind `&self`.
    fn with_srb<F, R>(&self, path: u8, target: u8, lun: u8, tag: QueueTag, f: F) -> R
    where
        F: FnOnce(Option<&mut Self::Request>) -> R;

    fn debug_print(&self, level: LogLevel, message: &str);

    /// Allocate a physically contiguous, uncached region of `total_size`
    /// bytes. Returns `(virt, phys)`.
    fn allocate_uncached_region(&self, total_size: usize) -> Option<(usize, u64)>;
}
