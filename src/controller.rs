//! Controller Context (§3), the Init State Machine (§4.7), the Shutdown
//! State Machine (§4.8), and the completion dispatcher (§4.6). Everything
//! else in the crate is a pure function or a small owned resource; this is
//! where they get composed into one device.

use log::{debug, error, info, warn};

use crate::arena::{UncachedArena, ARENA_SIZE, PAGE_SIZE};
use crate::cid::{Cid, Queue as CidQueue};
use crate::command;
use crate::error::{Error, Result};
use crate::host::HostServices;
use crate::identify::{self, IdentifyControllerFields, IdentifyNamespaceFields};
use crate::prp::{PrpPool, SG_LIST_PAGES};
use crate::queue::{QueuePair, SubmissionQueueEntry, SubmitResult};
use crate::regs::{self, RegisterLayer};
use crate::request::{HostRequest, NO_PRP_PAGE, QueueTag};
use crate::sync_policy::{NoOpSync, SyncPolicy};

pub const ADMIN_QUEUE_DEPTH: u16 = 64;
pub const IO_QUEUE_DEPTH: u16 = 64;
const ADMIN_QID: u16 = 0;
const IO_QID: u16 = 1;

/// Clamps a requested queue depth against the controller's advertised
/// `MQES + 1` (§3's queue pair invariant), then rounds down to a power of
/// two since [`QueuePair::new`] assumes one for its ring index math.
fn effective_queue_depth(requested: u16, mqes: u16) -> u16 {
    let cap = core::cmp::min(requested as u32, mqes as u32 + 1).max(1);
    (1u32 << (31 - cap.leading_zeros())) as u16
}

/// Progress through §4.7's five-state sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitState {
    PostEnable,
    CreatedIoCq,
    CreatedIoSq,
    IdentifiedController,
    IdentifiedNamespace,
    Ready,
}

/// Diagnostic counters (SPEC_FULL §B.4); no corresponding NVMe wire
/// traffic, read directly by the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub admin_submitted: u32,
    pub admin_completed: u32,
    pub io_submitted: u32,
    pub io_completed: u32,
    pub nvme_errors: u32,
    pub prp_high_watermark: u8,
    pub fallback_timer_arms: u32,
}

/// Cached fields copied out of Identify Controller / Identify Namespace
/// once, at init (§3 "identify-derived fields").
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentifyCache {
    pub serial: [u8; 20],
    pub model: [u8; 40],
    pub firmware: [u8; 8],
    pub namespace_count: u32,
    pub lba_count: u64,
    pub block_size: u32,
}

/// At-most-one-untagged-in-flight admission control (§3 "Ownership", §5,
/// §9 open question 3): a capacity token, not storage — the actual request
/// is recovered from the host by tag when its completion arrives.
#[derive(Debug, Default)]
struct Admission {
    untagged_in_flight: bool,
    next_untagged_seq: u16,
}

impl Admission {
    fn try_reserve(&mut self) -> Option<u16> {
        if self.untagged_in_flight {
            return None;
        }
        self.untagged_in_flight = true;
        let seq = self.next_untagged_seq;
        self.next_untagged_seq = (self.next_untagged_seq + 1) & 0x3FFF;
        Some(seq)
    }

    fn release(&mut self) {
        self.untagged_in_flight = false;
    }
}

/// Number of consecutive real interrupts after which the core stops
/// arming the fallback poll timer (§5 "Cancellation / timeouts").
const FALLBACK_STABILITY_THRESHOLD: u32 = 8;

/// One per NVMe device. Owns the Arena, PRP Pool, both Queue Pairs, the
/// Identify cache, Stats, and the untagged-admission token — composed here
/// rather than as one flat device-extension struct (§9 redesign note).
pub struct ControllerContext<H: HostServices, S: SyncPolicy = NoOpSync> {
    pub admin: QueuePair,
    pub io: Option<QueuePair>,
    pub arena: UncachedArena,
    pub prp_pool: PrpPool,
    pub sync: S,
    pub dstrd: u32,
    pub init_state: InitState,
    pub init_complete: bool,
    pub smart_enabled: bool,
    pub identify: IdentifyCache,
    pub stats: Stats,
    admission: Admission,
    last_sense: Option<crate::error::AutoSense>,
    consecutive_real_interrupts: u32,
    fallback_armed: bool,
    init_failed: bool,
    fence_pending: bool,
    _host: core::marker::PhantomData<H>,
}

impl<H: HostServices> ControllerContext<H, NoOpSync> {
    pub fn new(host: &H) -> Result<Self> {
        Self::with_sync(host, NoOpSync)
    }
}

impl<H: HostServices, S: SyncPolicy> ControllerContext<H, S> {
    pub fn with_sync(host: &H, sync: S) -> Result<Self> {
        let regs = RegisterLayer::new(host);
        let caps = regs.capabilities();

        // §3's queue pair invariant: size <= min(MQES+1, PAGE/64), rounded
        // down to a power of two since the ring index math assumes one.
        let admin_depth = effective_queue_depth(ADMIN_QUEUE_DEPTH, caps.mqes);
        let io_depth = effective_queue_depth(IO_QUEUE_DEPTH, caps.mqes);

        let (region_virt, region_phys) = host.allocate_uncached_region(ARENA_SIZE).ok_or(Error::AllocFailed)?;
        let mut arena = UncachedArena::new(region_virt, region_phys);

        let admin_sq = arena.allocate(admin_depth as usize * 64, PAGE_SIZE)?;
        let admin_cq = arena.allocate(admin_depth as usize * 16, PAGE_SIZE)?;
        let prp_region = arena.allocate(SG_LIST_PAGES as usize * PAGE_SIZE, PAGE_SIZE)?;
        let io_sq = arena.allocate(io_depth as usize * 64, PAGE_SIZE)?;
        let io_cq = arena.allocate(io_depth as usize * 16, PAGE_SIZE)?;

        let admin = QueuePair::new(ADMIN_QID, admin_sq.virt, admin_sq.phys, admin_cq.virt, admin_cq.phys, admin_depth, caps.dstrd);
        let prp_pool = PrpPool::new(prp_region.virt, prp_region.phys);

        Ok(ControllerContext {
            admin,
            io: Some(QueuePair::new(IO_QID, io_sq.virt, io_sq.phys, io_cq.virt, io_cq.phys, io_depth, caps.dstrd)),
            arena,
            prp_pool,
            sync,
            dstrd: caps.dstrd,
            init_state: InitState::PostEnable,
            init_complete: false,
            smart_enabled: true,
            identify: IdentifyCache::default(),
            stats: Stats::default(),
            admission: Admission::default(),
            last_sense: None,
            consecutive_real_interrupts: 0,
            fallback_armed: false,
            init_failed: false,
            fence_pending: false,
            _host: core::marker::PhantomData,
        })
    }

    pub(crate) fn regs<'a>(&self, host: &'a H) -> RegisterLayer<'a, H> {
        RegisterLayer::new(host)
    }

    /// §4.7: pre-enable sequence, controller enable, then drive admin
    /// completions through the five init states to Ready. Runs with IRQs
    /// masked and a 10 s overall budget at 1 ms polling granularity.
    pub fn initialize(&mut self, host: &H) -> bool {
        let reglayer = self.regs(host);
        reglayer.mask_irqs();
        reglayer.write32(crate::regs::REG_AQA, 0);
        reglayer.write64(crate::regs::REG_ASQ, 0);
        reglayer.write64(crate::regs::REG_ACQ, 0);

        let mut cc = reglayer.read32(crate::regs::REG_CC);
        cc &= !(regs::CC_EN | regs::CC_SHN_MASK);
        reglayer.write32(crate::regs::REG_CC, cc);
        if reglayer.wait_ready(false).is_err() {
            reglayer.write32(crate::regs::REG_CC, 0);
        }
        reglayer.mask_irqs();

        let admin_depth = self.admin.size as u32;
        let aqa = ((admin_depth - 1) << 16) | (admin_depth - 1);
        reglayer.write32(crate::regs::REG_AQA, aqa);
        reglayer.write64(crate::regs::REG_ASQ, self.admin.sq_phys);
        reglayer.write64(crate::regs::REG_ACQ, self.admin.cq_phys);

        reglayer.write32(crate::regs::REG_CC, regs::cc_default() | regs::CC_EN);
        if reglayer.wait_ready(true).is_err() {
            warn!("controller did not become ready within budget");
            return false;
        }

        const BUDGET_US: u32 = 10_000_000;
        const TICK_US: u32 = 1_000;
        let mut waited = 0u32;

        self.begin_create_io_cq(host);
        while self.init_state != InitState::Ready {
            self.process_admin(host);
            if self.init_state == InitState::Ready || !self.init_complete_pending() {
                break;
            }
            if waited >= BUDGET_US {
                warn!("init state machine timed out in state {:?}", self.init_state);
                return false;
            }
            host.stall_microseconds(TICK_US);
            waited += TICK_US;
        }

        if self.init_state == InitState::Ready {
            reglayer.unmask_vector0();
            info!("controller ready: {} namespace(s), block size {}", self.identify.namespace_count, self.identify.block_size);
            true
        } else {
            false
        }
    }

    /// Whether the init sequence is still advancing (used only to decide
    /// whether to keep polling; a failed admin completion leaves
    /// `init_state` unchanged but sets `init_complete = false` permanently
    /// via [`Self::fail_init`]).
    fn init_complete_pending(&self) -> bool {
        !self.init_failed
    }

    fn begin_create_io_cq(&mut self, host: &H) {
        let io = self.io.as_ref().expect("io queue allocated at construction");
        let cmd = command::create_io_cq(Cid::AdminInit(1).encode(), IO_QID, io.size, io.cq_phys);
        self.submit_admin(host, cmd);
    }

    pub(crate) fn submit_admin(&mut self, host: &H, cmd: SubmissionQueueEntry) {
        let reglayer = self.regs(host);
        match self.admin.submit(&reglayer, cmd) {
            SubmitResult::Ok => self.stats.admin_submitted += 1,
            SubmitResult::Full => error!("admin queue unexpectedly full"),
        }
    }

    /// §4.6 admin-queue drain and CID dispatch.
    pub fn process_admin(&mut self, host: &H) {
        let reglayer = self.regs(host);
        let mut events: heapless::Vec<(u16, u8), heapless::consts::U64> = heapless::Vec::new();
        self.admin.drain_completions(&reglayer, |cid, status, _sq_head| {
            events.push((cid, status)).ok();
        });
        for (cid, status) in events {
            self.stats.admin_completed += 1;
            if status != 0 {
                self.stats.nvme_errors += 1;
            }
            self.dispatch_admin(host, cid, status);
        }
    }

    fn dispatch_admin(&mut self, host: &H, cid_raw: u16, status: u8) {
        match Cid::decode(cid_raw, CidQueue::Admin) {
            Cid::AdminInit(step) => self.advance_init(host, step, status),
            Cid::AdminGetLog(idx) => self.complete_get_log_page(host, idx, status),
            Cid::ShutdownDeleteSq => debug!("shutdown: io sq deleted"),
            Cid::ShutdownDeleteCq => debug!("shutdown: io cq deleted"),
            other => warn!("unexpected admin cid {:?}", other),
        }
    }

    fn fail_init(&mut self, why: &str) {
        error!("init state machine aborted: {}", why);
        self.init_failed = true;
        self.init_complete = false;
    }

    fn advance_init(&mut self, host: &H, step: u8, status: u8) {
        if status != 0 {
            self.fail_init("admin command failed during init");
            return;
        }
        match (self.init_state, step) {
            (InitState::PostEnable, 1) => {
                self.init_state = InitState::CreatedIoCq;
                let io = self.io.as_ref().expect("io queue allocated");
                let cmd = command::create_io_sq(Cid::AdminInit(2).encode(), IO_QID, io.size, io.sq_phys, IO_QID);
                self.submit_admin(host, cmd);
            }
            (InitState::CreatedIoCq, 2) => {
                self.init_state = InitState::CreatedIoSq;
                let index = match self.prp_pool.acquire() {
                    Some(i) => i,
                    None => return self.fail_init("no scratch page for identify controller"),
                };
                let phys = self.prp_pool.phys(index);
                let cmd = command::identify(Cid::AdminInit(3).encode(), 0, command::CNS_CONTROLLER, phys);
                self.submit_admin(host, cmd);
            }
            (InitState::CreatedIoSq, 3) => {
                let index = 0; // the scratch page acquired above; released immediately below
                let buf: &[u8] = unsafe { core::slice::from_raw_parts(self.prp_pool.virt(index) as *const u8, PAGE_SIZE) };
                let fields: IdentifyControllerFields = identify::parse_identify_controller(buf);
                self.identify.serial = fields.serial;
                self.identify.model = fields.model;
                self.identify.firmware = fields.firmware;
                self.identify.namespace_count = fields.namespace_count;
                self.prp_pool.release(index);
                self.init_state = InitState::IdentifiedController;

                let index = match self.prp_pool.acquire() {
                    Some(i) => i,
                    None => return self.fail_init("no scratch page for identify namespace"),
                };
                let phys = self.prp_pool.phys(index);
                let cmd = command::identify(Cid::AdminInit(4).encode(), 1, command::CNS_NAMESPACE, phys);
                self.submit_admin(host, cmd);
            }
            (InitState::IdentifiedController, 4) => {
                let index = 0;
                let buf: &[u8] = unsafe { core::slice::from_raw_parts(self.prp_pool.virt(index) as *const u8, PAGE_SIZE) };
                let fields: IdentifyNamespaceFields = identify::parse_identify_namespace(buf);
                self.identify.lba_count = fields.lba_count;
                self.identify.block_size = identify::block_size_from_lbaf(buf, fields.flbas);
                self.prp_pool.release(index);
                self.init_state = InitState::IdentifiedNamespace;
                self.init_state = InitState::Ready;
                self.init_complete = true;
            }
            _ => self.fail_init("admin completion arrived out of sequence"),
        }
    }

    /// §4.8: mask IRQs, delete IO SQ/CQ if they exist, request normal
    /// shutdown, wait for it to complete, disable, and reset software
    /// state.
    pub fn shutdown(&mut self, host: &H) {
        let reglayer = self.regs(host);
        reglayer.mask_irqs();

        if reglayer.read32(crate::regs::REG_CSTS) & regs::CSTS_RDY == 0 {
            self.reset_software_state();
            return;
        }

        if self.init_complete {
            let cmd = command::delete_io_sq(Cid::ShutdownDeleteSq.encode(), IO_QID);
            self.submit_admin(host, cmd);
            self.poll_admin_for(host, 1_000_000);

            let cmd = command::delete_io_cq(Cid::ShutdownDeleteCq.encode(), IO_QID);
            self.submit_admin(host, cmd);
            self.poll_admin_for(host, 1_000_000);
        }

        let reglayer = self.regs(host);
        let cc = reglayer.read32(crate::regs::REG_CC);
        reglayer.write32(crate::regs::REG_CC, (cc & !regs::CC_SHN_MASK) | regs::CC_SHN_NORMAL);
        if reglayer.wait_shutdown_complete().is_err() {
            warn!("shutdown did not reach CSTS.SHST=complete within budget; proceeding");
        }

        let cc = reglayer.read32(crate::regs::REG_CC);
        reglayer.write32(crate::regs::REG_CC, cc & !regs::CC_EN);
        let _ = reglayer.wait_ready(false);
        reglayer.write32(crate::regs::REG_AQA, 0);
        reglayer.write64(crate::regs::REG_ASQ, 0);
        reglayer.write64(crate::regs::REG_ACQ, 0);

        self.reset_software_state();
    }

    fn poll_admin_for(&mut self, host: &H, budget_us: u32) {
        const TICK_US: u32 = 1_000;
        let mut waited = 0;
        while waited < budget_us {
            self.process_admin(host);
            host.stall_microseconds(TICK_US);
            waited += TICK_US;
        }
    }

    fn reset_software_state(&mut self) {
        self.admin.reset();
        if let Some(io) = self.io.as_mut() {
            io.reset();
        }
        self.admission = Admission::default();
        self.init_complete = false;
        self.init_state = InitState::PostEnable;
        self.init_failed = false;
    }

    /// §4.6 IO-queue drain and CID dispatch.
    pub fn process_io(&mut self, host: &H) {
        let reglayer = self.regs(host);
        let mut events: heapless::Vec<(u16, u8), heapless::consts::U64> = heapless::Vec::new();
        if let Some(io) = self.io.as_mut() {
            io.drain_completions(&reglayer, |cid, status, _sq_head| {
                events.push((cid, status)).ok();
            });
        }
        if !events.is_empty() {
            self.consecutive_real_interrupts += 1;
            if self.consecutive_real_interrupts >= FALLBACK_STABILITY_THRESHOLD {
                host.cancel_timer();
                self.fallback_armed = false;
            }
        }
        for (cid, status) in events {
            self.stats.io_completed += 1;
            if status != 0 {
                self.stats.nvme_errors += 1;
            }
            self.dispatch_io(host, cid, status);
        }
    }

    fn dispatch_io(&mut self, host: &H, cid_raw: u16, status: u8) {
        match Cid::decode(cid_raw, CidQueue::Io) {
            Cid::OrderedFlush(_) => self.fence_pending = false,
            Cid::Tagged(tag) => self.complete_tagged_or_untagged(host, QueueTag::Tagged(tag), status),
            Cid::Untagged(_) => self.complete_tagged_or_untagged(host, QueueTag::Untagged, status),
            other => warn!("unexpected io cid {:?}", other),
        }
    }

    fn complete_tagged_or_untagged(&mut self, host: &H, tag: QueueTag, status: u8) {
        let is_untagged = matches!(tag, QueueTag::Untagged);
        host.with_srb(0, 0, 0, tag, |maybe_req| {
            let req = match maybe_req {
                Some(r) => r,
                None => {
                    warn!("completion resolved to no request; cid may have already completed");
                    return;
                }
            };
            let prp_page = req.extension_mut().prp_page;
            if prp_page != NO_PRP_PAGE {
                self.prp_pool.release(prp_page);
                req.extension_mut().prp_page = NO_PRP_PAGE;
                self.stats.prp_high_watermark = self.prp_pool.high_watermark();
            }
            if status != 0 {
                req.set_status(crate::request::RequestStatus::Error);
                let sense = crate::scsi::sense::HARDWARE_ERROR_SENSE;
                self.last_sense = Some(sense);
                req.set_autosense(sense);
            } else {
                req.set_status(crate::request::RequestStatus::Success);
                req.set_scsi_status(crate::request::scsi_status::GOOD);
            }
            host.notify_request_complete(req);
        });
        if is_untagged {
            self.admission.release();
        }
    }

    fn complete_get_log_page(&mut self, host: &H, idx: u8, status: u8) {
        host.with_srb(0, 0, 0, QueueTag::Untagged, |maybe_req| {
            if let Some(req) = maybe_req {
                if status == 0 {
                    let buf: &[u8] = unsafe { core::slice::from_raw_parts(self.prp_pool.virt(idx) as *const u8, PAGE_SIZE) };
                    crate::sat::format_get_log_completion(req, buf, &self.identify);
                    req.set_status(crate::request::RequestStatus::Success);
                    req.set_scsi_status(crate::request::scsi_status::GOOD);
                } else {
                    req.set_status(crate::request::RequestStatus::Error);
                    let sense = crate::scsi::sense::HARDWARE_ERROR_SENSE;
                    self.last_sense = Some(sense);
                    req.set_autosense(sense);
                }
                host.notify_request_complete(req);
            } else {
                warn!("get-log-page completion with no untagged request to resolve");
            }
        });
        self.prp_pool.release(idx);
        self.admission.release();
    }

    pub fn untagged_in_flight(&self) -> bool {
        self.admission.untagged_in_flight
    }

    pub fn last_sense(&self) -> Option<crate::error::AutoSense> {
        self.last_sense
    }

    pub fn clear_last_sense(&mut self) {
        self.last_sense = None;
    }

    /// Completes every outstanding request with bus-reset status; used by
    /// `reset_bus` and `SRB_FUNCTION_RESET_LOGICAL_UNIT` (SPEC_FULL §B.3).
    /// Does not touch the hardware (§9 open question 4).
    pub fn reset_outstanding(&mut self, host: &H) {
        if self.admission.untagged_in_flight {
            host.with_srb(0, 0, 0, QueueTag::Untagged, |maybe_req| {
                if let Some(req) = maybe_req {
                    if let Some(extension_page) = Some(req.extension_mut().prp_page).filter(|p| *p != NO_PRP_PAGE) {
                        self.prp_pool.release(extension_page);
                    }
                    req.set_status(crate::request::RequestStatus::BusReset);
                    host.notify_request_complete(req);
                }
            });
            self.admission.release();
        }
    }

    pub(crate) fn acquire_untagged(&mut self) -> Option<u16> {
        self.admission.try_reserve()
    }

    pub(crate) fn release_untagged(&mut self) {
        self.admission.release();
    }

    pub(crate) fn mark_fence_pending(&mut self) {
        self.fence_pending = true;
    }

    pub(crate) fn fence_pending(&self) -> bool {
        self.fence_pending
    }

    pub(crate) fn dstrd(&self) -> u32 {
        self.dstrd
    }

    /// Arms the fallback poll timer (§5 "Cancellation / timeouts") if it
    /// is not already running; a real interrupt arriving later disarms it
    /// again once [`FALLBACK_STABILITY_THRESHOLD`] consecutive interrupts
    /// are observed in [`Self::process_io`].
    pub fn maybe_arm_fallback_timer(&mut self, host: &H, callback: fn(), microseconds: u32) {
        if !self.fallback_armed {
            host.register_timer(callback, microseconds);
            self.fallback_armed = true;
            self.stats.fallback_timer_arms += 1;
        }
    }
}
