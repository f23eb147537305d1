//! IRQL (Interrupt Request Level) Management
//!
//! The kernel uses IRQL to manage interrupt priority per processor:
//! - PASSIVE_LEVEL (0): Normal thread execution, nothing masked
//! - APC_LEVEL (1): APC delivery disabled
//! - DISPATCH_LEVEL (2): Thread preemption disabled, software interrupts run here
//! - Device IRQLs (3-12): Hardware interrupts
//! - CLOCK_LEVEL (13), IPI_LEVEL (14), HIGH_LEVEL (15)
//!
//! Raising is cheap (write the new level). Lowering is where the real work
//! happens: any interrupts that arrived while masked are replayed in
//! descending priority order, and pending software interrupts run before
//! the level settles below DISPATCH_LEVEL. See [`crate::hal::dispatch`].
//!
//! An IRQL transition in the wrong direction is a caller bug and takes the
//! system down with a bug check; it is never reported as a recoverable
//! error.

use crate::hal::{InterruptGuard, Platform};
use crate::ke::bugcheck::{codes, ke_bug_check};
use crate::ke::prcb::{KPrcb, PrcbFlags};

/// Interrupt Request Level type
pub type Kirql = u8;

/// IRQL levels (x86_64 value scheme)
pub mod irql {
    use super::Kirql;

    /// Passive level - normal thread execution, all interrupts enabled
    pub const PASSIVE_LEVEL: Kirql = 0;
    /// APC level - APCs are disabled
    pub const APC_LEVEL: Kirql = 1;
    /// Dispatch level - software interrupts (DPC-equivalent work) run here
    pub const DISPATCH_LEVEL: Kirql = 2;
    /// First device interrupt level
    pub const DEVICE_LEVEL_BASE: Kirql = 3;
    /// Clock interrupt level
    pub const CLOCK_LEVEL: Kirql = 13;
    /// Inter-processor interrupt level
    pub const IPI_LEVEL: Kirql = 14;
    /// Highest level - all interrupts masked
    pub const HIGH_LEVEL: Kirql = 15;
}

/// First vector that maps to a run level; everything below is reserved
/// for processor exceptions.
pub const FIRST_CONFIGURABLE_VECTOR: u32 = 0x20;

/// One past the last configurable vector.
pub const VECTOR_LIMIT: u32 = 0x100;

/// Number of vectors owned by each run level.
const VECTORS_PER_LEVEL: u32 = 16;

/// Map an interrupt vector to the run level it is delivered at.
///
/// Each run level owns a 16-vector window, so the mapping is a shift.
/// This is the single source of truth everywhere a vector is compared
/// against the current IRQL; callers must pass a vector inside the
/// configurable window.
#[inline]
pub fn vector_to_irql(vector: u32) -> Kirql {
    debug_assert!((FIRST_CONFIGURABLE_VECTOR..VECTOR_LIMIT).contains(&vector));
    (vector / VECTORS_PER_LEVEL) as Kirql
}

/// Get the current IRQL of the given processor.
#[inline]
pub fn ke_get_current_irql(prcb: &KPrcb) -> Kirql {
    prcb.irql
}

/// Raise the processor's IRQL.
///
/// `new_irql` must be greater than or equal to the current level; raising
/// to the current level is a no-op. Raising below the current level is a
/// fatal bug check. Returns the previous level, which the caller passes
/// back to [`ke_lower_irql`].
pub fn ke_raise_irql<P: Platform>(prcb: &mut KPrcb, platform: &P, new_irql: Kirql) -> Kirql {
    let _guard = InterruptGuard::new(platform);
    let old_irql = prcb.irql;
    if new_irql < old_irql {
        ke_bug_check(
            codes::IRQL_NOT_GREATER_OR_EQUAL,
            new_irql as u64,
            old_irql as u64,
            prcb.number as u64,
            0,
        );
    }

    prcb.irql = new_irql;
    old_irql
}

/// Lower the processor's IRQL.
///
/// `new_irql` must be less than or equal to the current level. Replays
/// any pending interrupts above the target level and runs pending
/// software interrupts once the level falls below DISPATCH_LEVEL; see
/// [`crate::hal::dispatch`] for the full unwinding rules.
pub fn ke_lower_irql<P: Platform>(prcb: &mut KPrcb, platform: &P, new_irql: Kirql) {
    crate::hal::dispatch::lower_run_level(prcb, platform, new_irql, None);
}

/// Latch a software-interrupt request on this processor.
///
/// The scheduler calls this when it has dispatch-level work queued. The
/// request is sticky: it is consumed by the first subsequent lowering
/// that crosses below DISPATCH_LEVEL, which invokes the scheduler's
/// software-interrupt hook (possibly repeatedly, if the hook re-latches).
#[inline]
pub fn ke_request_software_interrupt(prcb: &mut KPrcb) {
    prcb.flags.insert(PrcbFlags::DISPATCH_INTERRUPT_PENDING);
}

/// Check whether this processor is currently running an interrupt chain.
#[inline]
pub fn ke_is_executing_interrupt(prcb: &KPrcb) -> bool {
    prcb.interrupt_count > 0
}

/// Check whether the software-interrupt hook is active on this processor.
#[inline]
pub fn ke_is_dpc_active(prcb: &KPrcb) -> bool {
    prcb.flags.contains(PrcbFlags::DPC_ROUTINE_ACTIVE)
}
