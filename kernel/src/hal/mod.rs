//! Hardware Abstraction Layer (hal)
//!
//! Run-level management lives here:
//!
//! - **controller** - The interrupt controller plugin contract
//! - **interrupt** - ISR registration, per-vector chains, the chain runner
//! - **dispatch** - The dispatch entry point and the lowering/replay engine
//!
//! # Control flow
//!
//! ```text
//! Hardware interrupt (interrupts disabled)
//!       │
//!       ▼
//! hal_dispatch_interrupt
//!       │ acknowledge        ── Spurious / NoInterruptPending → return
//!       ▼
//!  masked? ── yes → queue {vector, token, controller}, return
//!       │ no
//!       ▼
//!  raise to vector level, run ISR chain, EOI
//!       │
//!       ▼
//!  lower to previous level
//!       │ replay queued interrupts (descending level)
//!       │ run software interrupts below DISPATCH_LEVEL
//!       ▼
//!  pending signal delivery (returning to user mode at PASSIVE_LEVEL)
//! ```
//!
//! The [`Platform`] trait is the seam to everything outside this core:
//! the processor interrupt flag, the time source used by storm
//! detection, and the scheduler's software-interrupt and signal hooks.

pub mod controller;
pub mod dispatch;
pub mod interrupt;

pub use controller::{AckToken, InterruptCause, InterruptController};
pub use dispatch::hal_dispatch_interrupt;
pub use interrupt::{
    hal_connect_interrupt, hal_disconnect_interrupt, ConnectError, InterruptHandle, InterruptMode,
    InterruptRegistration, InterruptServiceRoutine, InterruptStatus, ServiceContext,
};

use crate::arch::TrapFrame;
use crate::ke::prcb::{KPrcb, ThreadId};

/// Processor and kernel services the run-level core calls out to.
///
/// A kernel binary implements this once per architecture; tests provide
/// a scripted double. All methods must be callable with interrupts
/// disabled and must not block.
pub trait Platform {
    /// Disable processor interrupts. Returns whether they were enabled.
    fn disable_interrupts(&self) -> bool;

    /// Enable processor interrupts.
    fn enable_interrupts(&self);

    /// Query the processor interrupt flag.
    fn interrupts_enabled(&self) -> bool;

    /// Read the monotonic time counter used by storm detection.
    fn query_time_counter(&self) -> u64;

    /// Frequency of the time counter in ticks per second.
    fn time_counter_frequency(&self) -> u64;

    /// Scheduler hook: run dispatch-level software interrupt work.
    ///
    /// Invoked at DISPATCH_LEVEL with interrupts enabled. The hook may
    /// request another pass by re-latching the pending flag through
    /// `prcb` before returning.
    fn dispatch_software_interrupt(&self, prcb: &mut KPrcb, trap_frame: Option<&mut TrapFrame>);

    /// Signal hook: deliver pending signals to the interrupted thread.
    ///
    /// Invoked with interrupts enabled, only when an interrupt taken
    /// from non-privileged execution unwinds all the way back to
    /// PASSIVE_LEVEL.
    fn dispatch_pending_signals(&self, thread: ThreadId, trap_frame: &mut TrapFrame);
}

/// Scoped interrupt-disable window.
///
/// Construction disables processor interrupts and records whether they
/// were enabled; drop restores the recorded state on every exit path,
/// including early returns and the unwind out of a bug check. Critical
/// sections over KPRCB state are expressed as the lifetime of one of
/// these.
pub struct InterruptGuard<'p, P: Platform> {
    platform: &'p P,
    was_enabled: bool,
}

impl<'p, P: Platform> InterruptGuard<'p, P> {
    pub fn new(platform: &'p P) -> Self {
        let was_enabled = platform.disable_interrupts();
        Self {
            platform,
            was_enabled,
        }
    }

    /// Whether interrupts were enabled when the guard was taken.
    pub fn was_enabled(&self) -> bool {
        self.was_enabled
    }
}

impl<P: Platform> Drop for InterruptGuard<'_, P> {
    fn drop(&mut self) {
        if self.was_enabled {
            self.platform.enable_interrupts();
        }
    }
}
