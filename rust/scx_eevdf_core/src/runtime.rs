// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Abstraction over the host scheduling framework.
//!
//! The kernel side invokes the policy through a fixed set of callbacks and
//! exposes a small set of primitives back to it: named dispatch queues with a
//! sort key, per-CPU local queues, an idle-CPU picker and a monotonic clock.
//! [`Runtime`] captures exactly that surface so the policy can be driven by
//! the real framework or by the deterministic in-process runtime in
//! [`crate::sim`].

use anyhow::Result;

use crate::types::{CpuId, DsqId, Pid, TimeNs, Vtime, Weight};

/// Mutable view of the framework-owned task handle passed into every
/// callback.
///
/// `slice_ns` is the remaining slice budget and `dsq_vtime` the task's
/// eligible-time pointer; both live in the handle (not in per-task storage)
/// because the framework itself consumes them when the task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    pub pid: Pid,
    pub weight: Weight,
    pub slice_ns: TimeNs,
    pub dsq_vtime: Vtime,
    /// CPU the task currently runs on or last ran on.
    pub cpu: CpuId,
}

impl TaskHandle {
    pub fn new(pid: Pid, weight: Weight) -> Self {
        Self {
            pid,
            weight,
            slice_ns: 0,
            dsq_vtime: 0,
            cpu: CpuId(0),
        }
    }
}

/// Primitives the host framework provides to the policy.
///
/// Implementations are expected to honor the task's allowed-CPU set in
/// [`Runtime::pick_idle_cpu`]; the policy itself is affinity-agnostic.
pub trait Runtime {
    /// Default slice granted to dispatched tasks, in ns.
    fn slice_dfl(&self) -> TimeNs;

    /// Monotonic clock.
    fn now_ns(&self) -> TimeNs;

    /// Number of possible CPUs.
    fn nr_cpus(&self) -> u32;

    /// CPU executing the current callback.
    fn cpu(&self) -> CpuId;

    /// Create a named dispatch queue. Fails if the framework cannot back it.
    fn create_dsq(&mut self, dsq: DsqId) -> Result<()>;

    /// Insert a task into `dsq`, sorted by `vdeadline`.
    fn insert_vtime(&mut self, pid: Pid, dsq: DsqId, slice_ns: TimeNs, vdeadline: Vtime);

    /// Insert a task directly into `cpu`'s local queue.
    fn insert_local(&mut self, cpu: CpuId, pid: Pid, slice_ns: TimeNs);

    /// Move the head of `dsq` to `cpu`'s local queue. Returns false when
    /// `dsq` is empty.
    fn move_to_local(&mut self, dsq: DsqId, cpu: CpuId) -> bool;

    /// Remaining dispatch slots for the CPU asking for work.
    fn dispatch_slots(&self) -> u32;

    /// The framework's default idle-CPU selection: a candidate CPU and
    /// whether it was claimed idle.
    fn select_cpu_dfl(
        &mut self,
        task: &TaskHandle,
        prev_cpu: CpuId,
        wake_flags: u64,
    ) -> (CpuId, bool);

    /// Claim any idle CPU from the task's allowed set.
    fn pick_idle_cpu(&mut self, task: &TaskHandle) -> Option<CpuId>;
}
