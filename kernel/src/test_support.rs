//! Shared test doubles
//!
//! Host-side stand-ins for the two trait seams: a scripted interrupt
//! controller and a platform that models the interrupt flag, the time
//! counter, and the scheduler hooks. Tests leak their doubles to get the
//! `'static` borrows the pending queue carries; each test owns its own
//! instances, so the leaks are per-test and harmless.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::arch::TrapFrame;
use crate::hal::controller::{AckToken, InterruptCause, InterruptController};
use crate::hal::interrupt::{
    hal_connect_interrupt, InterruptHandle, InterruptMode, InterruptRegistration, InterruptStatus,
    ServiceContext,
};
use crate::hal::Platform;
use crate::ke::irql::vector_to_irql;
use crate::ke::prcb::{KPrcb, PrcbFlags, ThreadId};

// ============================================================================
// Mock platform
// ============================================================================

/// Platform double: a software interrupt flag, a settable time counter,
/// and counting scheduler hooks.
pub struct MockPlatform {
    interrupts: Cell<bool>,
    /// Value returned by `query_time_counter`
    pub time: Cell<u64>,
    /// Software-interrupt hook invocations
    pub soft_interrupt_calls: Cell<u32>,
    /// How many times the hook should re-latch the pending flag
    pub soft_interrupt_relatch: Cell<u32>,
    /// Interrupt flag observed at each hook invocation
    pub soft_interrupt_enabled_states: RefCell<Vec<bool>>,
    /// (thread id, interrupt flag) observed at each signal dispatch
    pub signal_dispatches: RefCell<Vec<(u64, bool)>>,
}

impl MockPlatform {
    pub fn leaked() -> &'static Self {
        Box::leak(Box::new(Self {
            interrupts: Cell::new(false),
            time: Cell::new(0),
            soft_interrupt_calls: Cell::new(0),
            soft_interrupt_relatch: Cell::new(0),
            soft_interrupt_enabled_states: RefCell::new(Vec::new()),
            signal_dispatches: RefCell::new(Vec::new()),
        }))
    }

    pub fn set_interrupts_enabled(&self, enabled: bool) {
        self.interrupts.set(enabled);
    }
}

impl Platform for MockPlatform {
    fn disable_interrupts(&self) -> bool {
        self.interrupts.replace(false)
    }

    fn enable_interrupts(&self) {
        self.interrupts.set(true);
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn query_time_counter(&self) -> u64 {
        self.time.get()
    }

    fn time_counter_frequency(&self) -> u64 {
        1_000
    }

    fn dispatch_software_interrupt(&self, prcb: &mut KPrcb, _trap_frame: Option<&mut TrapFrame>) {
        self.soft_interrupt_calls.set(self.soft_interrupt_calls.get() + 1);
        self.soft_interrupt_enabled_states
            .borrow_mut()
            .push(self.interrupts_enabled());
        if self.soft_interrupt_relatch.get() > 0 {
            self.soft_interrupt_relatch
                .set(self.soft_interrupt_relatch.get() - 1);
            prcb.flags.insert(PrcbFlags::DISPATCH_INTERRUPT_PENDING);
        }
    }

    fn dispatch_pending_signals(&self, thread: ThreadId, _trap_frame: &mut TrapFrame) {
        self.signal_dispatches
            .borrow_mut()
            .push((thread.0, self.interrupts_enabled()));
    }
}

// ============================================================================
// Mock controller
// ============================================================================

/// Controller double driven by a scripted acknowledge queue.
pub struct MockController {
    priority_count: u32,
    fast_eoi: bool,
    responses: RefCell<VecDeque<InterruptCause>>,
    /// Total acknowledge cycles observed
    pub acknowledge_count: Cell<u32>,
    /// Tokens presented at the token-form EOI, in order
    pub eoi_tokens: RefCell<Vec<u32>>,
    /// Fast EOIs taken
    pub fast_eoi_count: Cell<u32>,
}

impl MockController {
    fn new(priority_count: u32, fast_eoi: bool) -> Self {
        Self {
            priority_count,
            fast_eoi,
            responses: RefCell::new(VecDeque::new()),
            acknowledge_count: Cell::new(0),
            eoi_tokens: RefCell::new(Vec::new()),
            fast_eoi_count: Cell::new(0),
        }
    }

    pub fn leaked(priority_count: u32) -> &'static Self {
        Box::leak(Box::new(Self::new(priority_count, false)))
    }

    pub fn leaked_with_fast_eoi(priority_count: u32) -> &'static Self {
        Box::leak(Box::new(Self::new(priority_count, true)))
    }

    /// Script the next acknowledge to report `vector` fired with the
    /// given token.
    pub fn queue_line(&self, vector: u32, token: u32) {
        self.queue_cause(InterruptCause::LineFired {
            vector,
            token: AckToken::new(token),
        });
    }

    pub fn queue_cause(&self, cause: InterruptCause) {
        self.responses.borrow_mut().push_back(cause);
    }
}

impl InterruptController for MockController {
    fn acknowledge(&self, _vector: u32) -> InterruptCause {
        self.acknowledge_count.set(self.acknowledge_count.get() + 1);
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(InterruptCause::NoInterruptPending)
    }

    fn end_of_interrupt(&self, token: AckToken) {
        self.eoi_tokens.borrow_mut().push(token.raw());
    }

    fn fast_end_of_interrupt(&self) -> bool {
        if self.fast_eoi {
            self.fast_eoi_count.set(self.fast_eoi_count.get() + 1);
        }
        self.fast_eoi
    }

    fn priority_count(&self) -> u32 {
        self.priority_count
    }
}

// ============================================================================
// ISR probes
// ============================================================================

/// One chain-runner observation: which probe ran and what the interrupt
/// flag looked like while it did.
pub struct ExecRecord {
    pub id: u32,
    pub interrupts_enabled: bool,
}

pub type ExecLog = RefCell<Vec<ExecRecord>>;

pub fn new_exec_log() -> &'static ExecLog {
    Box::leak(Box::new(RefCell::new(Vec::new())))
}

struct Probe {
    id: u32,
    status: InterruptStatus,
    log: &'static ExecLog,
    platform: &'static MockPlatform,
}

fn probe_isr(context: *mut u8) -> InterruptStatus {
    let probe = unsafe { &*(context as *const Probe) };
    probe.log.borrow_mut().push(ExecRecord {
        id: probe.id,
        interrupts_enabled: probe.platform.interrupts_enabled(),
    });
    probe.status
}

/// Connect a recording ISR with full control over mode and sharing.
#[allow(clippy::too_many_arguments)]
pub fn register_probe_with(
    prcb: &mut KPrcb,
    vector: u32,
    mode: InterruptMode,
    status: InterruptStatus,
    share_vector: bool,
    id: u32,
    log: &'static ExecLog,
    platform: &'static MockPlatform,
) -> InterruptHandle {
    let probe = Box::leak(Box::new(Probe {
        id,
        status,
        log,
        platform,
    }));
    hal_connect_interrupt(
        prcb,
        InterruptRegistration {
            vector,
            irql: vector_to_irql(vector),
            mode,
            context: ServiceContext::Device(probe as *mut Probe as *mut u8),
            service_routine: probe_isr,
            share_vector,
        },
    )
    .expect("probe registration")
}

/// Connect a single exclusive edge-triggered recording ISR.
pub fn register_probe(
    prcb: &mut KPrcb,
    vector: u32,
    status: InterruptStatus,
    log: &'static ExecLog,
    platform: &'static MockPlatform,
) -> InterruptHandle {
    register_probe_with(prcb, vector, InterruptMode::Latched, status, false, 0, log, platform)
}

/// Connect a shared edge-triggered recording ISR with the given id.
pub fn register_probe_shared(
    prcb: &mut KPrcb,
    vector: u32,
    status: InterruptStatus,
    log: &'static ExecLog,
    platform: &'static MockPlatform,
    id: u32,
) -> InterruptHandle {
    register_probe_with(prcb, vector, InterruptMode::Latched, status, true, id, log, platform)
}

// ============================================================================
// Trap frames
// ============================================================================

/// Frame for an interrupt taken in kernel mode.
pub fn kernel_frame() -> TrapFrame {
    TrapFrame {
        rip: 0xFFFF_8000_0000_1000,
        cs: 0x08,
        rflags: 0x202,
        rsp: 0xFFFF_8000_0010_0000,
        ss: 0x10,
    }
}

/// Frame for an interrupt taken in user mode (selector RPL 3).
pub fn user_frame() -> TrapFrame {
    TrapFrame {
        rip: 0x0000_0000_0040_1000,
        cs: 0x1B,
        rflags: 0x202,
        rsp: 0x0000_7FFF_FFF0_0000,
        ss: 0x23,
    }
}
