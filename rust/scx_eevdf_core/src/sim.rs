// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Deterministic in-process [`Runtime`].
//!
//! Mirrors the host framework's observable behavior (named deadline-ordered
//! queues, per-CPU local queues, an idle mask with claim-on-select semantics
//! and a monotonic clock) without any notion of wall time. Both the
//! integration tests and the demo workload driver are built on it.

use std::collections::{HashMap, VecDeque};

use anyhow::{bail, Result};

use crate::dsq::{Dsq, DsqEntry};
use crate::runtime::{Runtime, TaskHandle};
use crate::types::{CpuId, DsqId, Pid, TimeNs, Vtime};

/// Default slice granted to dispatched tasks (the framework's 20 ms).
pub const SLICE_DFL: TimeNs = 20_000_000;

#[derive(Debug, Default)]
struct SimCpu {
    local: VecDeque<DsqEntry>,
    idle: bool,
}

/// A simulated scheduling framework.
pub struct SimRuntime {
    slice_dfl: TimeNs,
    clock: TimeNs,
    cb_cpu: CpuId,
    cpus: Vec<SimCpu>,
    dsqs: HashMap<DsqId, Dsq>,
    dispatch_slots: u32,
    direct_dispatch: Option<(CpuId, Pid)>,
}

impl SimRuntime {
    pub fn new(nr_cpus: u32) -> Self {
        Self::with_slice(nr_cpus, SLICE_DFL)
    }

    pub fn with_slice(nr_cpus: u32, slice_dfl: TimeNs) -> Self {
        Self {
            slice_dfl,
            clock: 0,
            cb_cpu: CpuId(0),
            cpus: (0..nr_cpus.max(1)).map(|_| SimCpu::default()).collect(),
            dsqs: HashMap::new(),
            dispatch_slots: 8,
            direct_dispatch: None,
        }
    }

    /// Advance the monotonic clock.
    pub fn advance_clock(&mut self, delta_ns: TimeNs) {
        self.clock += delta_ns;
    }

    /// Set the CPU the next callbacks run on.
    pub fn set_callback_cpu(&mut self, cpu: CpuId) {
        self.cb_cpu = cpu;
    }

    pub fn set_dispatch_slots(&mut self, slots: u32) {
        self.dispatch_slots = slots;
    }

    /// Mark a CPU idle (it finished its local work).
    pub fn set_idle(&mut self, cpu: CpuId) {
        if let Some(slot) = self.cpus.get_mut(cpu.0 as usize) {
            slot.idle = true;
        }
    }

    pub fn is_idle(&self, cpu: CpuId) -> bool {
        self.cpus.get(cpu.0 as usize).is_some_and(|c| c.idle)
    }

    /// Pop the head of a CPU's local queue.
    pub fn pop_local(&mut self, cpu: CpuId) -> Option<DsqEntry> {
        self.cpus.get_mut(cpu.0 as usize)?.local.pop_front()
    }

    pub fn local_len(&self, cpu: CpuId) -> usize {
        self.cpus.get(cpu.0 as usize).map_or(0, |c| c.local.len())
    }

    pub fn dsq_len(&self, dsq: DsqId) -> usize {
        self.dsqs.get(&dsq).map_or(0, |d| d.len())
    }

    /// Queued pids of a dsq in promotion order.
    pub fn dsq_pids(&self, dsq: DsqId) -> Vec<Pid> {
        self.dsqs
            .get(&dsq)
            .map_or_else(Vec::new, |d| d.iter_pids().collect())
    }

    /// Deadline of the head entry of a dsq.
    pub fn dsq_min_vtime(&self, dsq: DsqId) -> Option<Vtime> {
        self.dsqs.get(&dsq).and_then(|d| d.min_vtime())
    }

    /// Task placed into a local queue by the last `select_cpu`, if any. A
    /// direct dispatch means the framework will skip `enqueue` for this
    /// wakeup.
    pub fn take_direct_dispatch(&mut self) -> Option<(CpuId, Pid)> {
        self.direct_dispatch.take()
    }

    fn claim_idle(&mut self, cpu: CpuId) -> bool {
        match self.cpus.get_mut(cpu.0 as usize) {
            Some(slot) if slot.idle => {
                slot.idle = false;
                true
            }
            _ => false,
        }
    }
}

impl Runtime for SimRuntime {
    fn slice_dfl(&self) -> TimeNs {
        self.slice_dfl
    }

    fn now_ns(&self) -> TimeNs {
        self.clock
    }

    fn nr_cpus(&self) -> u32 {
        self.cpus.len() as u32
    }

    fn cpu(&self) -> CpuId {
        self.cb_cpu
    }

    fn create_dsq(&mut self, dsq: DsqId) -> Result<()> {
        if self.dsqs.contains_key(&dsq) {
            bail!("dsq {:?} already exists", dsq);
        }
        self.dsqs.insert(dsq, Dsq::new());
        Ok(())
    }

    fn insert_vtime(&mut self, pid: Pid, dsq: DsqId, slice_ns: TimeNs, vdeadline: Vtime) {
        if let Some(dsq) = self.dsqs.get_mut(&dsq) {
            dsq.insert_vtime(pid, slice_ns, vdeadline);
        }
    }

    fn insert_local(&mut self, cpu: CpuId, pid: Pid, slice_ns: TimeNs) {
        if let Some(slot) = self.cpus.get_mut(cpu.0 as usize) {
            slot.local.push_back(DsqEntry { pid, slice_ns });
            self.direct_dispatch = Some((cpu, pid));
        }
    }

    fn move_to_local(&mut self, dsq: DsqId, cpu: CpuId) -> bool {
        let entry = match self.dsqs.get_mut(&dsq).and_then(|d| d.pop()) {
            Some(entry) => entry,
            None => return false,
        };
        match self.cpus.get_mut(cpu.0 as usize) {
            Some(slot) => {
                slot.local.push_back(entry);
                true
            }
            None => false,
        }
    }

    fn dispatch_slots(&self) -> u32 {
        self.dispatch_slots
    }

    /// The default picker only models the locality fast check: claim
    /// `prev_cpu` when it is idle, otherwise report it busy. Cross-CPU idle
    /// search is [`Runtime::pick_idle_cpu`]'s job.
    fn select_cpu_dfl(
        &mut self,
        _task: &TaskHandle,
        prev_cpu: CpuId,
        _wake_flags: u64,
    ) -> (CpuId, bool) {
        if self.claim_idle(prev_cpu) {
            return (prev_cpu, true);
        }
        (prev_cpu, false)
    }

    fn pick_idle_cpu(&mut self, _task: &TaskHandle) -> Option<CpuId> {
        for id in 0..self.cpus.len() as u32 {
            let cpu = CpuId(id);
            if self.claim_idle(cpu) {
                return Some(cpu);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_claim_is_exclusive() {
        let mut rt = SimRuntime::new(2);
        rt.set_idle(CpuId(1));
        let task = TaskHandle::new(Pid(1), 100);
        assert_eq!(rt.pick_idle_cpu(&task), Some(CpuId(1)));
        assert_eq!(rt.pick_idle_cpu(&task), None);
    }

    #[test]
    fn select_cpu_dfl_claims_prev_only() {
        let mut rt = SimRuntime::new(4);
        rt.set_idle(CpuId(0));
        rt.set_idle(CpuId(2));
        let task = TaskHandle::new(Pid(1), 100);
        assert_eq!(rt.select_cpu_dfl(&task, CpuId(2), 0), (CpuId(2), true));
        // prev is claimed now; other idle CPUs are pick_idle_cpu's business
        assert_eq!(rt.select_cpu_dfl(&task, CpuId(2), 0), (CpuId(2), false));
        assert_eq!(rt.pick_idle_cpu(&task), Some(CpuId(0)));
    }

    #[test]
    fn move_to_local_drains_in_deadline_order() {
        let mut rt = SimRuntime::new(1);
        rt.create_dsq(DsqId::BIG).unwrap();
        rt.insert_vtime(Pid(1), DsqId::BIG, 0, 200);
        rt.insert_vtime(Pid(2), DsqId::BIG, 0, 100);
        assert!(rt.move_to_local(DsqId::BIG, CpuId(0)));
        assert!(rt.move_to_local(DsqId::BIG, CpuId(0)));
        assert!(!rt.move_to_local(DsqId::BIG, CpuId(0)));
        assert_eq!(rt.pop_local(CpuId(0)).unwrap().pid, Pid(2));
        assert_eq!(rt.pop_local(CpuId(0)).unwrap().pid, Pid(1));
    }

    #[test]
    fn duplicate_dsq_creation_fails() {
        let mut rt = SimRuntime::new(1);
        rt.create_dsq(DsqId::BIG).unwrap();
        assert!(rt.create_dsq(DsqId::BIG).is_err());
    }
}
