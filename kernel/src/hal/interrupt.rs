//! ISR Registration and Chain Execution
//!
//! Device drivers connect interrupt service routines here:
//!
//! - **KINTERRUPT**: one arena slot per registered ISR
//! - **Interrupt chaining**: shared vectors hold a singly linked chain of
//!   registrations, walked in registration order
//! - **Storm detection**: per-registration fire counters with periodic
//!   time sampling to flag runaway lines
//!
//! The registration table is per-processor and lives inside the KPRCB.
//! Chains are linked by arena index rather than pointer, so a chain walk
//! is O(length) array indexing with no aliasing concerns.
//!
//! # Usage
//!
//! ```ignore
//! let handle = hal_connect_interrupt(prcb, InterruptRegistration {
//!     vector: 0x34,
//!     irql: vector_to_irql(0x34),
//!     mode: InterruptMode::LevelSensitive,
//!     context: ServiceContext::Device(device.as_context()),
//!     service_routine: e1000_isr,
//!     share_vector: true,
//! })?;
//! ```

use core::fmt;
use core::ptr;

use crate::arch::TrapFrame;
use crate::hal::Platform;
use crate::ke::irql::{irql, vector_to_irql, Kirql, FIRST_CONFIGURABLE_VECTOR, VECTOR_LIMIT};
use crate::ke::prcb::KPrcb;

/// Maximum ISR registrations per processor
pub const MAX_INTERRUPT_OBJECTS: usize = 64;

/// Number of configurable vectors (the window above the exception range)
pub const CONFIGURABLE_VECTOR_COUNT: usize = (VECTOR_LIMIT - FIRST_CONFIGURABLE_VECTOR) as usize;

/// Arena link terminator
const NO_LINK: u16 = u16::MAX;

/// Sample the time counter every this-many-plus-one firings of one ISR.
pub(crate) const INTERRUPT_STORM_COUNT_MASK: u64 = 0x3FF;

/// Two samples closer together than this are reported as a storm.
pub(crate) const INTERRUPT_STORM_DELTA_SECONDS: u64 = 2;

/// Interrupt trigger mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    /// Level-triggered interrupt
    LevelSensitive,
    /// Edge-triggered interrupt
    Latched,
}

/// Interrupt service routine return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptStatus {
    /// The device was interrupting; the line is accounted for
    Claimed,
    /// Not this device
    NotClaimed,
}

/// Context handed to a service routine.
#[derive(Debug, Clone, Copy)]
pub enum ServiceContext {
    /// Fixed device context pointer, passed through verbatim.
    Device(*mut u8),
    /// Substitute the trap frame of the interrupted machine state. A
    /// replayed interrupt has no trap frame, so the routine must accept
    /// null.
    TrapFrame,
}

/// Interrupt Service Routine function type
///
/// Called with interrupts disabled (or masked at the controller), must
/// not block, and must tolerate repeat invocation on shared chains.
pub type InterruptServiceRoutine = fn(context: *mut u8) -> InterruptStatus;

/// A request to connect an ISR to a vector.
pub struct InterruptRegistration {
    pub vector: u32,
    pub irql: Kirql,
    pub mode: InterruptMode,
    pub context: ServiceContext,
    pub service_routine: InterruptServiceRoutine,
    pub share_vector: bool,
}

/// Handle to a connected interrupt, returned by [`hal_connect_interrupt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptHandle(pub(crate) u16);

/// Why a connection request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    /// Vector outside the configurable window
    InvalidVector,
    /// Registration IRQL does not match the vector's run level
    IrqlMismatch,
    /// Vector already connected and one of the parties is not shareable
    VectorNotShareable,
    /// Registration arena is full
    TooManyInterrupts,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::InvalidVector => write!(f, "vector outside configurable window"),
            ConnectError::IrqlMismatch => write!(f, "irql does not match vector run level"),
            ConnectError::VectorNotShareable => write!(f, "vector already connected exclusively"),
            ConnectError::TooManyInterrupts => write!(f, "interrupt arena exhausted"),
        }
    }
}

/// KINTERRUPT - one registered interrupt service routine.
pub struct KInterrupt {
    /// Slot holds a live registration
    pub(crate) connected: bool,
    /// Interrupt vector number
    pub(crate) vector: u32,
    /// Run level of this interrupt
    pub(crate) irql: Kirql,
    /// Trigger mode (level/edge)
    pub(crate) mode: InterruptMode,
    /// Context handed to the routine
    pub(crate) context: ServiceContext,
    /// The service routine, `None` only in vacant slots
    pub(crate) service_routine: Option<InterruptServiceRoutine>,
    /// Registration opted into vector sharing
    pub(crate) share_vector: bool,
    /// Next registration on the same vector, `NO_LINK` at the tail
    pub(crate) next: u16,
    /// Lifetime invocation count (storm detection)
    pub(crate) interrupt_count: u64,
    /// Time counter at the last storm sample
    pub(crate) last_timestamp: u64,
}

impl KInterrupt {
    const fn vacant() -> Self {
        Self {
            connected: false,
            vector: 0,
            irql: irql::PASSIVE_LEVEL,
            mode: InterruptMode::LevelSensitive,
            context: ServiceContext::Device(ptr::null_mut()),
            service_routine: None,
            share_vector: false,
            next: NO_LINK,
            interrupt_count: 0,
            last_timestamp: 0,
        }
    }
}

/// Per-processor ISR arena and vector chain table.
pub struct InterruptTable {
    pub(crate) slots: [KInterrupt; MAX_INTERRUPT_OBJECTS],
    /// Allocation bitmap over `slots`
    allocated: u64,
    /// Chain head per configurable vector, `NO_LINK` when empty
    chain_heads: [u16; CONFIGURABLE_VECTOR_COUNT],
}

impl InterruptTable {
    pub const fn new() -> Self {
        const VACANT: KInterrupt = KInterrupt::vacant();
        Self {
            slots: [VACANT; MAX_INTERRUPT_OBJECTS],
            allocated: 0,
            chain_heads: [NO_LINK; CONFIGURABLE_VECTOR_COUNT],
        }
    }

    fn chain_index(vector: u32) -> usize {
        (vector - FIRST_CONFIGURABLE_VECTOR) as usize
    }

    /// First registration on `vector`, if any.
    pub(crate) fn chain_head(&self, vector: u32) -> Option<usize> {
        let head = self.chain_heads[Self::chain_index(vector)];
        if head == NO_LINK {
            None
        } else {
            Some(head as usize)
        }
    }

    fn allocate_slot(&mut self) -> Option<usize> {
        let index = (!self.allocated).trailing_zeros() as usize;
        if index >= MAX_INTERRUPT_OBJECTS {
            return None;
        }

        self.allocated |= 1 << index;
        Some(index)
    }

    fn free_slot(&mut self, index: usize) {
        self.allocated &= !(1 << index);
        self.slots[index] = KInterrupt::vacant();
    }

    fn append_to_chain(&mut self, vector: u32, index: usize) {
        let chain = Self::chain_index(vector);
        if self.chain_heads[chain] == NO_LINK {
            self.chain_heads[chain] = index as u16;
            return;
        }

        let mut tail = self.chain_heads[chain] as usize;
        while self.slots[tail].next != NO_LINK {
            tail = self.slots[tail].next as usize;
        }
        self.slots[tail].next = index as u16;
    }

    fn unlink_from_chain(&mut self, vector: u32, index: usize) {
        let chain = Self::chain_index(vector);
        if self.chain_heads[chain] == index as u16 {
            self.chain_heads[chain] = self.slots[index].next;
            return;
        }

        let mut cursor = self.chain_heads[chain];
        while cursor != NO_LINK {
            let next = self.slots[cursor as usize].next;
            if next == index as u16 {
                self.slots[cursor as usize].next = self.slots[index].next;
                return;
            }
            cursor = next;
        }
    }
}

impl Default for InterruptTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Connect an interrupt service routine to a vector on this processor.
///
/// The registration IRQL must match the vector's run level, and a vector
/// can only be shared when every party on it opted in. On success the
/// routine is live immediately: the next interrupt on the vector walks
/// the chain in registration order.
pub fn hal_connect_interrupt(
    prcb: &mut KPrcb,
    registration: InterruptRegistration,
) -> Result<InterruptHandle, ConnectError> {
    let vector = registration.vector;
    if !(FIRST_CONFIGURABLE_VECTOR..VECTOR_LIMIT).contains(&vector) {
        return Err(ConnectError::InvalidVector);
    }

    if registration.irql != vector_to_irql(vector) {
        return Err(ConnectError::IrqlMismatch);
    }

    let table = &mut prcb.interrupt_table;
    if let Some(head) = table.chain_head(vector) {
        if !registration.share_vector {
            return Err(ConnectError::VectorNotShareable);
        }

        let mut index = head;
        loop {
            let node = &table.slots[index];
            if !node.share_vector {
                return Err(ConnectError::VectorNotShareable);
            }
            if node.next == NO_LINK {
                break;
            }
            index = node.next as usize;
        }
    }

    let index = table
        .allocate_slot()
        .ok_or(ConnectError::TooManyInterrupts)?;
    table.slots[index] = KInterrupt {
        connected: true,
        vector,
        irql: registration.irql,
        mode: registration.mode,
        context: registration.context,
        service_routine: Some(registration.service_routine),
        share_vector: registration.share_vector,
        next: NO_LINK,
        interrupt_count: 0,
        last_timestamp: 0,
    };
    table.append_to_chain(vector, index);

    Ok(InterruptHandle(index as u16))
}

/// Disconnect a previously connected interrupt.
///
/// The routine is off the chain when this returns. Stale handles are
/// ignored.
pub fn hal_disconnect_interrupt(prcb: &mut KPrcb, handle: InterruptHandle) {
    let index = handle.0 as usize;
    if index >= MAX_INTERRUPT_OBJECTS {
        return;
    }

    let table = &mut prcb.interrupt_table;
    if !table.slots[index].connected {
        return;
    }

    let vector = table.slots[index].vector;
    table.unlink_from_chain(vector, index);
    table.free_slot(index);
}

/// Run the ISR chain for a vector on the current processor.
///
/// `trap_frame` is the interrupted machine state for a live dispatch and
/// `None` for a replay; registrations that asked for trap-frame context
/// get the frame pointer (null on replay). A claimed level-triggered
/// interrupt ends the walk, since the line is accounted for and sharing
/// it further this firing would double-service it. Never allocates,
/// never blocks.
pub(crate) fn run_isr<P: Platform>(
    prcb: &mut KPrcb,
    platform: &P,
    vector: u32,
    trap_frame: Option<&mut TrapFrame>,
) {
    let frame_ptr: *mut u8 = match trap_frame {
        Some(frame) => frame as *mut TrapFrame as *mut u8,
        None => ptr::null_mut(),
    };

    let Some(head) = prcb.interrupt_table.chain_head(vector) else {
        // Hardware or routing configuration handed us a vector nobody
        // registered for. Survivable in production, a config bug in
        // development.
        log::error!(
            "unexpected interrupt on vector {:#x}, processor {}",
            vector,
            prcb.number
        );
        debug_assert!(false, "unexpected interrupt on vector {vector:#x}");
        return;
    };

    let current_irql = prcb.irql;
    let mut index = head;
    loop {
        let node = &mut prcb.interrupt_table.slots[index];
        debug_assert_eq!(node.irql, current_irql);

        // Count every invocation; every so often take a time counter
        // sample. Two samples landing inside the storm window means the
        // line is firing far faster than any sane device, so say so.
        // The sampling period also rate-limits the warning itself.
        node.interrupt_count += 1;
        if (node.interrupt_count & INTERRUPT_STORM_COUNT_MASK) == 0
            && node.irql <= irql::CLOCK_LEVEL
        {
            let last_timestamp = node.last_timestamp;
            let time_counter = platform.query_time_counter();
            let seconds =
                time_counter.wrapping_sub(last_timestamp) / platform.time_counter_frequency();
            if last_timestamp != 0 && seconds < INTERRUPT_STORM_DELTA_SECONDS {
                log::warn!(
                    "possible interrupt storm on vector {:#x}, processor {} ({} firings)",
                    vector,
                    prcb.number,
                    node.interrupt_count
                );
            }

            node.last_timestamp = time_counter;
        }

        let routine = node.service_routine;
        let mode = node.mode;
        let context = match node.context {
            ServiceContext::Device(device) => device,
            ServiceContext::TrapFrame => frame_ptr,
        };
        let next = node.next;

        let status = match routine {
            Some(service_routine) => service_routine(context),
            None => InterruptStatus::NotClaimed,
        };

        // A level-triggered line that was claimed is done for this
        // firing; edge-triggered lines always offer the interrupt to
        // the whole chain.
        if status == InterruptStatus::Claimed && mode == InterruptMode::LevelSensitive {
            break;
        }

        if next == NO_LINK {
            break;
        }

        index = next as usize;
    }
}
