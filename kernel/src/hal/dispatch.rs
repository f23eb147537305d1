//! Interrupt Dispatch and Run-Level Lowering
//!
//! [`hal_dispatch_interrupt`] is the single entry point for a hardware
//! interrupt, invoked from the trap path with interrupts disabled. It
//! acknowledges the controller, then either queues the interrupt (when
//! the processor already runs at or above its level) or raises, runs the
//! ISR chain, issues end-of-interrupt, and unwinds.
//!
//! [`lower_run_level`] is the unwinding engine, shared between the
//! dispatch exit path and voluntary [`crate::ke::ke_lower_irql`] calls.
//! Lowering is where deferred work is paid for, in strict order:
//!
//! 1. Replay queued interrupts above the target level, highest first.
//!    A replay reuses the original acknowledge token; the line gets
//!    exactly one chain execution no matter how long it sat queued.
//! 2. Once below DISPATCH_LEVEL, drain the software-interrupt latch by
//!    calling the scheduler's hook at DISPATCH_LEVEL with interrupts
//!    enabled, repeating while the hook re-latches.
//! 3. Settle at the target level.
//!
//! The engine is iterative. A replayed chain may itself take and queue
//! higher-priority interrupts, but those drain through the same loop on
//! this same invocation; nested hardware interrupts never grow the
//! kernel stack through here.

use crate::arch::TrapFrame;
use crate::hal::controller::{InterruptCause, InterruptController};
use crate::hal::interrupt::run_isr;
use crate::hal::{InterruptGuard, Platform};
use crate::ke::bugcheck::{codes, ke_bug_check};
use crate::ke::irql::{irql, vector_to_irql, Kirql};
use crate::ke::prcb::{KPrcb, PendingInterrupt, PrcbFlags};

/// Determine the source of an interrupt and run its ISR chain.
///
/// Must be called with interrupts disabled and returns with interrupts
/// disabled, though they may be enabled in between (while the chain runs
/// on a priority-enforcing controller, and around signal delivery).
///
/// `vector` is the vector the trap entry path observed; the controller's
/// acknowledge result is authoritative. `trap_frame` is the machine
/// state at the moment of interruption.
pub fn hal_dispatch_interrupt<P: Platform>(
    prcb: &mut KPrcb,
    platform: &P,
    controller: &'static dyn InterruptController,
    vector: u32,
    trap_frame: &mut TrapFrame,
) {
    debug_assert!(!platform.interrupts_enabled());

    let thread = prcb.running_thread;
    let (vector, token) = match controller.acknowledge(vector) {
        InterruptCause::LineFired { vector, token } => (vector, token),
        InterruptCause::Spurious => {
            log::debug!("spurious interrupt on processor {}", prcb.number);
            return;
        }
        InterruptCause::NoInterruptPending => return,
    };

    let interrupt_irql = vector_to_irql(vector);
    let old_irql = prcb.irql;

    // Masked: the line must not run now. Park it, still acknowledged at
    // the controller (no EOI), so the hardware will not re-signal it;
    // the lowering path owns servicing it from here.
    if old_irql >= interrupt_irql {
        prcb.push_pending_interrupt(PendingInterrupt {
            vector,
            token,
            controller,
        });
        return;
    }

    prcb.irql = interrupt_irql;
    prcb.interrupt_count += 1;

    // With the run level set, interrupts can come back on at the
    // processor, provided the controller hardware enforces that nothing
    // of equal or lower priority preempts this one.
    if controller.priority_count() != 0 {
        platform.enable_interrupts();
    }

    run_isr(prcb, platform, vector, Some(&mut *trap_frame));

    platform.disable_interrupts();

    // EOI pops the controller's priority down to the next highest
    // pending interrupt.
    if !controller.fast_end_of_interrupt() {
        controller.end_of_interrupt(token);
    }

    lower_run_level(prcb, platform, old_irql, Some(&mut *trap_frame));
    prcb.interrupt_count -= 1;

    // Returning to user mode at PASSIVE_LEVEL is the delivery point for
    // pending signals, the user-mode equivalent of an interrupt.
    if old_irql == irql::PASSIVE_LEVEL && !trap_frame.from_privileged_mode() {
        platform.enable_interrupts();
        platform.dispatch_pending_signals(thread, trap_frame);
        platform.disable_interrupts();
    }
}

/// Lower the run level to `target`, paying for all deferred work on the
/// way down.
///
/// `target` must be at or below the current level; lowering upward is a
/// fatal bug check. `trap_frame` is the frame of the interrupt being
/// returned from, or `None` on a voluntary lower.
pub(crate) fn lower_run_level<P: Platform>(
    prcb: &mut KPrcb,
    platform: &P,
    target: Kirql,
    mut trap_frame: Option<&mut TrapFrame>,
) {
    // Interrupts stay disabled while the pending queue and run level
    // are in motion; the guard also keeps a voluntary lower from being
    // rescheduled mid-update.
    let guard = InterruptGuard::new(platform);
    if target > prcb.irql {
        ke_bug_check(
            codes::IRQL_NOT_LESS_OR_EQUAL,
            target as u64,
            prcb.irql as u64,
            prcb.number as u64,
            0,
        );
    }

    if prcb.irql == target {
        return;
    }

    // Replay every queued interrupt above the destination, highest
    // level first. A replayed chain may queue more; the loop drains
    // those too before falling further.
    while let Some(pending) = prcb.take_pending_interrupt_above(target) {
        prcb.irql = vector_to_irql(pending.vector);
        replay_interrupt(prcb, platform, pending);
    }

    // Falling below DISPATCH_LEVEL delivers latched software
    // interrupts. One exception: the scheduler lowers out of
    // DISPATCH_LEVEL with interrupts disabled precisely when it must
    // not be reentered, so deliver only when coming from an actual
    // interrupt level or when interrupts were enabled on entry.
    if prcb.flags.contains(PrcbFlags::DISPATCH_INTERRUPT_PENDING)
        && target < irql::DISPATCH_LEVEL
        && (prcb.irql > irql::DISPATCH_LEVEL || guard.was_enabled())
    {
        prcb.irql = irql::DISPATCH_LEVEL;
        prcb.flags.insert(PrcbFlags::DPC_ROUTINE_ACTIVE);
        while prcb.flags.contains(PrcbFlags::DISPATCH_INTERRUPT_PENDING) {
            prcb.flags.remove(PrcbFlags::DISPATCH_INTERRUPT_PENDING);
            platform.enable_interrupts();
            platform.dispatch_software_interrupt(prcb, trap_frame.as_deref_mut());
            platform.disable_interrupts();
        }
        prcb.flags.remove(PrcbFlags::DPC_ROUTINE_ACTIVE);
    }

    prcb.irql = target;
}

/// Replay a previously queued interrupt.
///
/// The run level has already been set to the interrupt's level. The
/// chain runs exactly once, with no trap frame (the machine state the
/// line interrupted is long gone), and the EOI uses the token from the
/// original acknowledge; the line is never re-acknowledged.
fn replay_interrupt<P: Platform>(prcb: &mut KPrcb, platform: &P, pending: PendingInterrupt) {
    debug_assert_eq!(prcb.irql, vector_to_irql(pending.vector));
    debug_assert!(!platform.interrupts_enabled());

    let controller = pending.controller;
    if controller.priority_count() != 0 {
        platform.enable_interrupts();
    }

    run_isr(prcb, platform, pending.vector, None);

    platform.disable_interrupts();
    if !controller.fast_end_of_interrupt() {
        controller.end_of_interrupt(pending.token);
    }
}
