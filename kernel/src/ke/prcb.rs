//! Kernel Processor Control Block (KPRCB)
//!
//! The KPRCB contains per-processor interrupt state:
//! - Current IRQL
//! - Pending interrupt queue (interrupts deferred while masked)
//! - Software-interrupt request latch
//! - Currently running thread
//! - Per-processor ISR registration table
//!
//! Each logical processor owns exactly one KPRCB. It is allocated at
//! processor bring-up, lives as long as the processor is online, and is
//! only ever touched by code running on that processor with interrupts
//! disabled around every mutation. There is therefore no lock on any of
//! these fields; the exclusive reference threaded through the entry
//! points is the ownership claim, and the interrupt-disable window is
//! the serialization.

use crate::hal::controller::{AckToken, InterruptController};
use crate::hal::interrupt::InterruptTable;
use crate::ke::bugcheck::{codes, ke_bug_check};
use crate::ke::irql::{irql, vector_to_irql, Kirql};

/// Opaque identifier of the thread running on a processor.
///
/// The scheduler owns thread state; this core only carries the id through
/// to the signal-dispatch hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadId(pub u64);

/// Capacity of the pending interrupt queue.
///
/// An entry can only be queued while the processor already sits at or
/// above its level, and a queued line stays acknowledged-but-not-EOId at
/// the controller, so at most one entry per run level can be live at a
/// time. One slot per level is therefore structurally sufficient.
pub const MAX_PENDING_INTERRUPTS: usize = (irql::HIGH_LEVEL as usize) + 1;

/// An interrupt that arrived while its run level was masked.
///
/// Holds everything needed to replay the line later: the vector, the
/// acknowledgment token the controller handed out (presented back at
/// end-of-interrupt), and the controller the line belongs to.
#[derive(Clone, Copy)]
pub struct PendingInterrupt {
    pub vector: u32,
    pub token: AckToken,
    pub controller: &'static dyn InterruptController,
}

bitflags::bitflags! {
    /// Per-processor state flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PrcbFlags: u32 {
        /// A software interrupt has been requested and not yet delivered.
        const DISPATCH_INTERRUPT_PENDING = 1 << 0;
        /// The software-interrupt hook is currently executing.
        const DPC_ROUTINE_ACTIVE = 1 << 1;
    }
}

/// Kernel Processor Control Block
pub struct KPrcb {
    /// Processor number (0 for BSP)
    pub number: u32,

    /// Current Interrupt Request Level
    pub irql: Kirql,

    /// Interrupts deferred because they arrived at a masked level
    pending_interrupts: [Option<PendingInterrupt>; MAX_PENDING_INTERRUPTS],

    /// Number of live entries in `pending_interrupts`
    pending_interrupt_count: usize,

    /// State flags (software-interrupt latch, DPC-active)
    pub flags: PrcbFlags,

    /// Thread currently running on this processor
    pub running_thread: ThreadId,

    /// Nested interrupt depth (non-zero while an ISR chain is running)
    pub interrupt_count: i32,

    /// Per-processor ISR registrations and vector chains
    pub interrupt_table: InterruptTable,
}

impl KPrcb {
    /// Create a zero-state PRCB for the given processor.
    pub const fn new(number: u32) -> Self {
        Self {
            number,
            irql: irql::PASSIVE_LEVEL,
            pending_interrupts: [None; MAX_PENDING_INTERRUPTS],
            pending_interrupt_count: 0,
            flags: PrcbFlags::empty(),
            running_thread: ThreadId(0),
            interrupt_count: 0,
            interrupt_table: InterruptTable::new(),
        }
    }

    /// Number of interrupts currently queued for replay.
    #[inline]
    pub fn pending_interrupt_count(&self) -> usize {
        self.pending_interrupt_count
    }

    /// Queue an interrupt that arrived at a masked level.
    ///
    /// Must be called with interrupts disabled. Overflow means the
    /// one-slot-per-level construction has been violated, which is
    /// corruption of core processor state and fatal.
    pub fn push_pending_interrupt(&mut self, pending: PendingInterrupt) {
        if self.pending_interrupt_count >= MAX_PENDING_INTERRUPTS {
            ke_bug_check(
                codes::PENDING_INTERRUPT_OVERFLOW,
                pending.vector as u64,
                self.pending_interrupt_count as u64,
                self.number as u64,
                0,
            );
        }

        self.pending_interrupts[self.pending_interrupt_count] = Some(pending);
        self.pending_interrupt_count += 1;
    }

    /// Remove and return the highest-level pending interrupt, provided it
    /// is strictly above `floor`.
    ///
    /// Among entries at the same level the most recently queued wins.
    /// Hardware priority normally makes arrivals-while-masked ascending,
    /// so the winner is the top of the stack; the scan keeps the
    /// descending-replay guarantee even when it is not.
    pub fn take_pending_interrupt_above(&mut self, floor: Kirql) -> Option<PendingInterrupt> {
        let mut best: Option<(usize, Kirql)> = None;
        for index in 0..self.pending_interrupt_count {
            if let Some(entry) = self.pending_interrupts[index] {
                let level = vector_to_irql(entry.vector);
                match best {
                    Some((_, best_level)) if level < best_level => {}
                    _ => best = Some((index, level)),
                }
            }
        }

        let (index, level) = best?;
        if level <= floor {
            return None;
        }

        let taken = self.pending_interrupts[index];
        for slot in index..self.pending_interrupt_count - 1 {
            self.pending_interrupts[slot] = self.pending_interrupts[slot + 1];
        }
        self.pending_interrupt_count -= 1;
        self.pending_interrupts[self.pending_interrupt_count] = None;
        taken
    }
}
