//! Driver entry points (§6): the thin orchestration a concrete port driver
//! calls into. This module owns no static state — the concrete driver
//! allocates one [`ControllerContext`] per adapter and holds the `fn()`
//! callback [`HostServices::register_timer`] needs to get back to it.

use log::info;

use crate::controller::ControllerContext;
use crate::host::{AdapterConfig, BusAddress, FindAdapterResult, HostServices, PCI_CLASS_MASS_STORAGE, PCI_PROGIF_NVME, PCI_SUBCLASS_NVM};
use crate::scsi::FALLBACK_TIMER_MICROSECONDS;
use crate::sync_policy::SyncPolicy;

/// §6 `HwFindAdapter`: matches the PCI class/subclass/programming
/// interface triple for NVM Express, and fills in the fixed adapter
/// capabilities this core always reports.
pub fn find_adapter<H: HostServices>(host: &H, _bus_address: BusAddress) -> (FindAdapterResult, AdapterConfig) {
    let class = host.pci_config_read_u8(0x0B);
    let subclass = host.pci_config_read_u8(0x0A);
    let progif = host.pci_config_read_u8(0x09);

    if class == PCI_CLASS_MASS_STORAGE && subclass == PCI_SUBCLASS_NVM && progif == PCI_PROGIF_NVME {
        (FindAdapterResult::Found, AdapterConfig::default())
    } else {
        (FindAdapterResult::NotFound, AdapterConfig::default())
    }
}

/// §6 `HwInitialize` / §4.7: builds the controller context and drives it
/// through the init state machine.
pub fn initialize<H: HostServices>(host: &H) -> Option<ControllerContext<H>> {
    let mut ctx = ControllerContext::new(host).ok()?;
    if ctx.initialize(host) {
        Some(ctx)
    } else {
        None
    }
}

/// §6 `HwStartIo`: dispatches one request, then arms the fallback poll
/// timer if nothing has armed it yet and the request went onto a queue.
pub fn start_io<H: HostServices, S: SyncPolicy>(ctx: &mut ControllerContext<H, S>, host: &H, req: &mut H::Request, fallback_poll: fn()) {
    ctx.start_io(host, req);
    ctx.maybe_arm_fallback_timer(host, fallback_poll, FALLBACK_TIMER_MICROSECONDS);
}

/// §6 `HwInterrupt` / §4.6: admin completions are drained before I/O so a
/// pending init-sequence step always makes progress first.
pub fn interrupt<H: HostServices, S: SyncPolicy>(ctx: &mut ControllerContext<H, S>, host: &H) {
    ctx.process_admin(host);
    ctx.process_io(host);
}

/// §6 `HwResetBus`: completes every outstanding request with bus-reset
/// status. Does not touch the hardware (§9 open question 4, resolved in
/// DESIGN.md): a real reset would abandon in-flight DMA the controller
/// might still complete into host memory after the ring state is zeroed.
pub fn reset_bus<H: HostServices, S: SyncPolicy>(ctx: &mut ControllerContext<H, S>, host: &H) {
    ctx.reset_outstanding(host);
}

/// §6 `HwAdapterControl` request types the core recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterControlType {
    QuerySupportedControlTypes,
    StopAdapter,
    RestartAdapter,
}

/// §6 `HwAdapterControl`: `StopAdapter` runs the shutdown state machine;
/// `RestartAdapter` re-runs init; `QuerySupportedControlTypes` is a no-op
/// the port driver answers from its own table.
pub fn adapter_control<H: HostServices, S: SyncPolicy>(ctx: &mut ControllerContext<H, S>, host: &H, control: AdapterControlType) -> bool {
    match control {
        AdapterControlType::QuerySupportedControlTypes => true,
        AdapterControlType::StopAdapter => {
            ctx.shutdown(host);
            info!("adapter stopped");
            true
        }
        AdapterControlType::RestartAdapter => ctx.initialize(host),
    }
}
