//! Kernel Bug Check Support
//!
//! A bug check is the kernel's response to an unrecoverable logic error:
//! state that must never occur has been observed, so the affected core
//! cannot safely continue. Run-level management bug checks on IRQL
//! transitions in the wrong direction and on pending-queue corruption.
//!
//! In the full kernel this raises IRQL to HIGH_LEVEL, freezes the other
//! processors, and paints the stop screen. In this crate the halt is a
//! panic: the linking kernel's panic handler is the machine-level stop,
//! and the host test harness observes the fatal path directly.

use core::sync::atomic::{AtomicBool, Ordering};

/// Bug check already in progress (suppresses nested reporting)
static BUGCHECK_ACTIVE: AtomicBool = AtomicBool::new(false);

pub mod codes {
    //! Bug check codes (STOP codes)

    /// IRQL_NOT_GREATER_OR_EQUAL (0x09)
    /// Attempt to raise IRQL below the current level.
    /// Parameter1: Requested IRQL
    /// Parameter2: Current IRQL
    /// Parameter3: Processor number
    pub const IRQL_NOT_GREATER_OR_EQUAL: u32 = 0x00000009;

    /// IRQL_NOT_LESS_OR_EQUAL (0x0A)
    /// Attempt to lower IRQL above the current level.
    /// Parameter1: Requested IRQL
    /// Parameter2: Current IRQL
    /// Parameter3: Processor number
    pub const IRQL_NOT_LESS_OR_EQUAL: u32 = 0x0000000A;

    /// PENDING_INTERRUPT_OVERFLOW (0xF3)
    /// The per-processor pending interrupt queue overflowed. The queue
    /// holds one slot per run level, so overflow means an interrupt was
    /// queued without the level discipline that bounds the queue.
    /// Parameter1: Vector being queued
    /// Parameter2: Queue depth at overflow
    /// Parameter3: Processor number
    pub const PENDING_INTERRUPT_OVERFLOW: u32 = 0x000000F3;
}

/// Halt the system with a bug check.
///
/// Never returns. Callers pass up to four parameters giving the state
/// that triggered the stop; their meaning is documented per code in
/// [`codes`].
pub fn ke_bug_check(code: u32, parameter1: u64, parameter2: u64, parameter3: u64, parameter4: u64) -> ! {
    if !BUGCHECK_ACTIVE.swap(true, Ordering::SeqCst) {
        log::error!(
            "*** STOP: 0x{:08X} (0x{:016X}, 0x{:016X}, 0x{:016X}, 0x{:016X})",
            code,
            parameter1,
            parameter2,
            parameter3,
            parameter4
        );
    }

    panic!(
        "BUGCHECK 0x{:08X} ({:#x}, {:#x}, {:#x}, {:#x})",
        code, parameter1, parameter2, parameter3, parameter4
    );
}
