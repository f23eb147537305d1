//! Kernel Executive (ke)
//!
//! Executive pieces of run-level management:
//!
//! - **IRQL**: the run-level type, vector mapping, and the raise/lower API
//! - **KPRCB**: per-processor control block holding the current level,
//!   the pending interrupt queue, and the ISR table
//! - **Bug check**: the fatal-error stop path for invariant violations
//!
//! # IRQL (Interrupt Request Level)
//!
//! The kernel uses IRQL to manage interrupt priority:
//! - PASSIVE_LEVEL (0): Normal thread execution
//! - APC_LEVEL (1): APC delivery disabled
//! - DISPATCH_LEVEL (2): Software interrupts, scheduler runs
//! - Device IRQLs (3-12): Hardware interrupts
//! - CLOCK_LEVEL (13), IPI_LEVEL (14), HIGH_LEVEL (15)

pub mod bugcheck;
pub mod irql;
pub mod prcb;

// Re-export key types
pub use bugcheck::ke_bug_check;
pub use irql::{
    ke_get_current_irql, ke_is_dpc_active, ke_is_executing_interrupt, ke_lower_irql,
    ke_raise_irql, ke_request_software_interrupt, vector_to_irql, Kirql,
};
pub use prcb::{KPrcb, PendingInterrupt, PrcbFlags, ThreadId};
