//! Cobalt Kernel Run-Level Management Core
//!
//! This crate implements the run-level (IRQL) management core of the
//! kernel's hardware abstraction layer: per-processor interrupt priority,
//! deferral and replay of masked interrupts, ISR chain execution, and the
//! hand-off points into the scheduler's software-interrupt and signal
//! delivery machinery.
//!
//! # Subsystems
//!
//! - **ke** - Kernel Executive: IRQL type and raise/lower API, per-processor
//!   control block (KPRCB), bug check support
//! - **hal** - Hardware Abstraction Layer: interrupt controller contract,
//!   ISR registration and chaining, the dispatch/replay state machine
//! - **arch** - Architecture bindings: trap frame layout, x86_64 interrupt
//!   flag and time-stamp primitives
//!
//! # Execution model
//!
//! Everything in this crate is core-local. Each logical processor owns one
//! [`ke::prcb::KPrcb`]; every entry point takes it by exclusive reference
//! and serializes against asynchronous hardware by disabling processor
//! interrupts around each read-modify-write (see [`hal::InterruptGuard`]).
//! No entry point blocks, waits on another core, or allocates.
//!
//! The kernel binary that links this crate provides the concrete
//! [`hal::Platform`] implementation (interrupt flag control, time source,
//! scheduler hooks) and the [`hal::InterruptController`] plugins for the
//! interrupt hardware it drives.

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod hal;
pub mod ke;

#[cfg(test)]
pub(crate) mod test_support;
