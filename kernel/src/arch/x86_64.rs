//! x86_64 processor bindings
//!
//! Thin wrappers over the interrupt flag and the time-stamp counter, in
//! the shape [`crate::hal::Platform`] wants them. A kernel binary
//! implements its platform by delegating here and adding the scheduler
//! hooks.

use x86_64::instructions::interrupts;

/// Disable interrupts at the processor. Returns whether they were
/// enabled.
#[inline]
pub fn disable_interrupts() -> bool {
    let enabled = interrupts::are_enabled();
    interrupts::disable();
    enabled
}

/// Enable interrupts at the processor.
#[inline]
pub fn enable_interrupts() {
    interrupts::enable();
}

/// Query the processor interrupt flag.
#[inline]
pub fn interrupts_enabled() -> bool {
    interrupts::are_enabled()
}

/// Read the time-stamp counter.
///
/// Monotonic per core, which is all storm detection needs.
#[inline]
pub fn read_time_counter() -> u64 {
    unsafe { core::arch::x86_64::_rdtsc() }
}
