// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! The EEVDF policy: virtual-time accounting, deadline computation and
//! two-class dispatch.
//!
//! Virtual time advances with delivered service divided by the active weight
//! sum (`dV/dt = C/W`). On a hybrid processor the service delivered by a CPU
//! is scaled by its capacity, so a slice consumed on a slow core advances a
//! task's eligible time proportionally less than the same slice on a fast
//! core. Tasks whose lag against global virtual time grows past a quarter
//! quantum are steered to the high-capacity queue, tasks running ahead of
//! schedule to the low-capacity one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;

use crate::capacity::{cpu_class, CapacityTable, CpuClass, CAPACITY_SCALE};
use crate::runtime::{Runtime, TaskHandle};
use crate::stats::{Telemetry, STAT_ENQUEUE, STAT_LAT_SAMPLE, STAT_SELECT_IDLE};
use crate::types::{CpuId, Pid, TimeNs, Vtime, Weight};
use crate::vtime::{add_signed_vtime, div_signed_u64, WeightCache};

/// Deadline arithmetic granularity: one slice of service at full capacity
/// and weight 1 spans `slice * SCALE` virtual-time units.
pub const SCALE: u64 = 100;

/// Lag threshold divisor: steer when |lag| exceeds `Q_max / LAG_BOOST_DIV`.
const LAG_BOOST_DIV: u64 = 4;

/// Upper bound on tasks moved to a local queue per dispatch.
pub const DISPATCH_BATCH_MAX: u32 = 8;

/// Global scheduling state: virtual time, active weight sum and the cached
/// maximum CPU capacity.
///
/// A single shared cell. `vtime_now` and `total_weight` are written only by
/// the event handlers; `max_capacity` only by the agent (and once by `init`
/// as a default). Handlers run as non-overlapping callback sections, so
/// relaxed load/store pairs are sufficient here, exactly like the plain
/// read-modify-write the in-kernel original performs on its map cell.
#[derive(Debug, Default)]
pub struct GlobalData {
    vtime_now: AtomicU64,
    total_weight: AtomicU64,
    max_capacity: AtomicU32,
}

impl GlobalData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vtime_now(&self) -> Vtime {
        self.vtime_now.load(Ordering::Relaxed)
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight.load(Ordering::Relaxed)
    }

    /// Raw cached maximum capacity; 0 means not yet populated.
    pub fn max_capacity(&self) -> u32 {
        self.max_capacity.load(Ordering::Relaxed)
    }

    /// Maximum capacity with the unknown value defaulted.
    pub fn effective_max_capacity(&self) -> u32 {
        match self.max_capacity() {
            0 => CAPACITY_SCALE,
            cap => cap,
        }
    }

    pub fn set_max_capacity(&self, cap: u32) {
        self.max_capacity.store(cap, Ordering::Relaxed);
    }

    fn add_vtime(&self, delta: i64) {
        let now = self.vtime_now();
        self.vtime_now
            .store(add_signed_vtime(now, delta), Ordering::Relaxed);
    }

    fn bump_vtime(&self, floor: Vtime) {
        if self.vtime_now() < floor {
            self.vtime_now.store(floor, Ordering::Relaxed);
        }
    }

    fn set_total_weight(&self, weight: u64) {
        self.total_weight.store(weight, Ordering::Relaxed);
    }
}

/// Policy-side per-task state, keyed by the framework's task id and released
/// on `disable`.
#[derive(Debug, Default)]
struct TaskCtx {
    weight_cache: WeightCache,
    /// Enqueue timestamp for the latency histogram; 0 = no pending sample.
    enq_ns: TimeNs,
}

/// The scheduler core. One instance per attachment; event handlers are
/// invoked by the host framework through a [`Runtime`].
pub struct EevdfSched {
    gdata: Arc<GlobalData>,
    caps: Arc<CapacityTable>,
    telemetry: Option<Arc<Telemetry>>,
    tasks: HashMap<Pid, TaskCtx>,
}

impl EevdfSched {
    pub fn new(
        gdata: Arc<GlobalData>,
        caps: Arc<CapacityTable>,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        Self {
            gdata,
            caps,
            telemetry,
            tasks: HashMap::new(),
        }
    }

    pub fn global(&self) -> &Arc<GlobalData> {
        &self.gdata
    }

    fn stat_inc(&self, cpu: CpuId, idx: usize) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.stat_inc(cpu, idx);
        }
    }

    /// One maximum work quantum in virtual-time units:
    /// `Q_max = ρ_max * slice / CAPACITY_SCALE`.
    fn quantum_max(&self, rt: &impl Runtime) -> u64 {
        u64::from(self.gdata.effective_max_capacity()) * rt.slice_dfl()
            / u64::from(CAPACITY_SCALE)
    }

    fn class_of_cpu(&self, cpu: CpuId) -> CpuClass {
        cpu_class(self.caps.capacity(cpu), self.gdata.effective_max_capacity())
    }

    /// Queue a task should land in, from its lag against global virtual
    /// time. Near-neutral lag follows the class of the task's current CPU.
    fn desired_class(&self, task: &TaskHandle, q_max: u64) -> CpuClass {
        let boost = (q_max / LAG_BOOST_DIV + 1) as i64;
        let lag = self.gdata.vtime_now() as i64 - task.dsq_vtime as i64;

        if lag > boost {
            CpuClass::Big
        } else if lag < -boost {
            CpuClass::Little
        } else {
            self.class_of_cpu(task.cpu)
        }
    }

    /// Create both class queues and default the maximum capacity if the
    /// agent has not populated it yet. Queue creation failure is fatal.
    pub fn init(&mut self, rt: &mut impl Runtime) -> Result<()> {
        if self.gdata.max_capacity() == 0 {
            self.gdata.set_max_capacity(CAPACITY_SCALE);
        }
        rt.create_dsq(CpuClass::Big.dsq())?;
        rt.create_dsq(CpuClass::Little.dsq())?;
        Ok(())
    }

    /// Pick a CPU for a waking task. Prefers the framework's default choice;
    /// when that CPU is busy and its class does not match the task's desired
    /// class, tries to claim an idle CPU of the desired class instead. An
    /// idle CPU of the matching class takes the fast path straight into the
    /// local queue.
    pub fn select_cpu(
        &mut self,
        rt: &mut impl Runtime,
        task: &TaskHandle,
        prev_cpu: CpuId,
        wake_flags: u64,
    ) -> CpuId {
        let (mut cpu, mut is_idle) = rt.select_cpu_dfl(task, prev_cpu, wake_flags);
        let q_max = self.quantum_max(rt);
        let mut selected = self.class_of_cpu(cpu);
        let desired = self.desired_class(task, q_max);

        if !is_idle && desired != selected {
            if let Some(idle_cpu) = rt.pick_idle_cpu(task) {
                let idle_class = self.class_of_cpu(idle_cpu);
                if idle_class == desired {
                    cpu = idle_cpu;
                    is_idle = true;
                    selected = idle_class;
                }
            }
        }

        if is_idle && desired == selected {
            self.stat_inc(rt.cpu(), STAT_SELECT_IDLE);
            let slice = rt.slice_dfl();
            rt.insert_local(cpu, task.pid, slice);
        }
        cpu
    }

    /// Insert a runnable task into its class queue, keyed by virtual
    /// deadline `v_d = v_e + Q_max * SCALE / w`. The eligible time is
    /// clamped so no task carries more than one maximum quantum of lag.
    pub fn enqueue(&mut self, rt: &mut impl Runtime, task: &mut TaskHandle, _enq_flags: u64) {
        self.stat_inc(rt.cpu(), STAT_ENQUEUE);

        let v_now = self.gdata.vtime_now();
        let q_max = self.quantum_max(rt);
        let min_ve = v_now.saturating_sub(q_max);

        let ve = task.dsq_vtime.max(min_ve);
        let weight = task.weight.max(1);

        let tctx = self.tasks.entry(task.pid).or_default();
        tctx.weight_cache.refresh(weight);
        let vd = ve.saturating_add(tctx.weight_cache.div(q_max * SCALE, weight));
        task.dsq_vtime = ve;

        let class = self.desired_class(task, q_max);
        let slice = rt.slice_dfl();
        rt.insert_vtime(task.pid, class.dsq(), slice, vd);

        if self.telemetry.is_some() {
            let now = rt.now_ns();
            if let Some(tctx) = self.tasks.get_mut(&task.pid) {
                tctx.enq_ns = now;
            }
        }
    }

    /// Refill `cpu`'s local queue: up to `min(slots, 8)` tasks from the
    /// queue of the CPU's own class, spilling from the other class when the
    /// preferred queue runs dry.
    pub fn dispatch(&mut self, rt: &mut impl Runtime, cpu: CpuId) {
        let local = self.class_of_cpu(cpu).dsq();
        let other = self.class_of_cpu(cpu).other().dsq();
        let slots = rt.dispatch_slots().max(1).min(DISPATCH_BATCH_MAX);

        for _ in 0..slots {
            if !rt.move_to_local(local, cpu) && !rt.move_to_local(other, cpu) {
                break;
            }
        }
    }

    /// A task starts executing: global virtual time may never lag the
    /// eligible time of a task that was just dispatched.
    pub fn running(&mut self, rt: &mut impl Runtime, task: &TaskHandle) {
        self.gdata.bump_vtime(task.dsq_vtime);

        if self.telemetry.is_none() {
            return;
        }
        let now = rt.now_ns();
        let sample = match self.tasks.get_mut(&task.pid) {
            Some(tctx) if tctx.enq_ns != 0 => {
                let delta = now.checked_sub(tctx.enq_ns);
                tctx.enq_ns = 0;
                delta
            }
            _ => None,
        };
        if let Some(delta) = sample {
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_latency(rt.cpu(), delta);
                telemetry.stat_inc(rt.cpu(), STAT_LAT_SAMPLE);
            }
        }
    }

    /// A task stops executing: account the delivered service.
    ///
    /// Real time consumed is scaled by the current CPU's capacity, so
    /// `s = consumed * ρ_cpu * SCALE / CAPACITY_SCALE` virtual units; the
    /// task's eligible time advances by its weighted share and global
    /// virtual time by `s / W`. The global advance is not clamped against
    /// the task's own eligible time; `running` restores the floor on the
    /// next dispatch.
    pub fn stopping(&mut self, rt: &mut impl Runtime, task: &mut TaskHandle, _runnable: bool) {
        let cpu = rt.cpu();
        let cap = self.caps.capacity(cpu);

        let consumed = rt.slice_dfl().saturating_sub(task.slice_ns);
        let weight = task.weight.max(1);
        let svc_vtime = consumed * u64::from(cap) * SCALE / u64::from(CAPACITY_SCALE);

        let tctx = self.tasks.entry(task.pid).or_default();
        task.dsq_vtime = task
            .dsq_vtime
            .saturating_add(tctx.weight_cache.div(svc_vtime, weight));

        let total_weight = self.gdata.total_weight();
        if total_weight > 0 {
            self.gdata.add_vtime((svc_vtime / total_weight) as i64);
        }
    }

    /// Weight change: swap the task's contribution to the active weight sum
    /// and reindex global virtual time so the task's relative standing is
    /// preserved across the change of denominator.
    pub fn set_weight(&mut self, task: &mut TaskHandle, new_weight: Weight) {
        let old_weight = u64::from(task.weight.max(1));
        let new_weight = new_weight.max(1);

        let tctx = self.tasks.entry(task.pid).or_default();
        tctx.weight_cache.refresh(new_weight);

        let old_sum = self.gdata.total_weight();
        let new_sum = old_sum.saturating_sub(old_weight) + u64::from(new_weight);
        self.gdata.set_total_weight(new_sum);
        task.weight = new_weight;

        if old_sum == 0 || new_sum == 0 {
            return;
        }

        let lag = self.gdata.vtime_now() as i64 - task.dsq_vtime as i64;
        let diff = div_signed_u64(lag, old_sum) - div_signed_u64(lag, new_sum);
        self.gdata.add_vtime(diff);
    }

    /// A task joins the scheduler. Tasks without service history start at
    /// the current global virtual time; the global clock absorbs the
    /// newcomer's lag so the remaining population's standing is unchanged.
    pub fn enable(&mut self, task: &mut TaskHandle) {
        let weight = u64::from(task.weight.max(1));

        if task.dsq_vtime == 0 {
            task.dsq_vtime = self.gdata.vtime_now();
        }

        let lag = self.gdata.vtime_now() as i64 - task.dsq_vtime as i64;
        let new_sum = self.gdata.total_weight() + weight;
        self.gdata.add_vtime(-div_signed_u64(lag, new_sum));
        self.gdata.set_total_weight(new_sum);
    }

    /// A task leaves the scheduler: symmetric correction to `enable`, then
    /// the per-task storage is released.
    pub fn disable(&mut self, task: &TaskHandle) {
        let weight = u64::from(task.weight.max(1));

        let lag = self.gdata.vtime_now() as i64 - task.dsq_vtime as i64;
        let new_sum = self.gdata.total_weight().saturating_sub(weight);
        self.gdata.set_total_weight(new_sum);

        if new_sum > 0 {
            self.gdata.add_vtime(div_signed_u64(lag, new_sum));
        }

        self.tasks.remove(&task.pid);
    }

    /// Number of tasks currently holding per-task storage.
    pub fn nr_tracked_tasks(&self) -> usize {
        self.tasks.len()
    }
}
