//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (DSQ IDs, PIDs, CPU IDs) prevent silent type
//! confusion; plain aliases cover quantities (timestamps, vtimes, weights)
//! that genuinely behave like integers.

/// Dispatch queue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DsqId(pub u64);

impl DsqId {
    /// Queue serving the high-capacity CPU cluster.
    pub const BIG: DsqId = DsqId(1);
    /// Queue serving the low-capacity CPU cluster.
    pub const LITTLE: DsqId = DsqId(2);
}

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub i32);

/// CPU identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuId(pub u32);

/// Monotonic time in nanoseconds.
pub type TimeNs = u64;

/// Virtual time (opaque u64, not nanoseconds).
pub type Vtime = u64;

/// Scheduler weight (higher = more CPU share).
pub type Weight = u32;
