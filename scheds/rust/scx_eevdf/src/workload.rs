// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Synthetic data plane for the agent.
//!
//! Drives the policy over the in-process runtime with a small fixed task
//! mix so the control loop has live counters and latency samples to
//! aggregate: every round wakes each task, lets each CPU refill and drain
//! its local queue, and parks the CPUs idle again. Consumption per slice
//! varies by task to keep the lag distribution non-trivial.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use scx_eevdf_core::{CpuId, EevdfSched, Pid, Runtime, SimRuntime, TaskHandle};

/// (pid, weight) of the synthetic task mix.
const TASK_MIX: &[(i32, u32)] = &[(1, 100), (2, 100), (3, 200), (4, 400), (5, 50), (6, 100)];

pub struct Workload {
    handle: JoinHandle<()>,
}

impl Workload {
    /// Take ownership of the attached scheduler and drive it until
    /// shutdown.
    pub fn spawn(sched: EevdfSched, rt: SimRuntime, shutdown: Arc<AtomicBool>) -> Self {
        let handle = std::thread::spawn(move || drive(sched, rt, shutdown));
        Self { handle }
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn drive(mut sched: EevdfSched, mut rt: SimRuntime, shutdown: Arc<AtomicBool>) {
    let mut tasks: Vec<TaskHandle> = TASK_MIX
        .iter()
        .map(|&(pid, weight)| TaskHandle::new(Pid(pid), weight))
        .collect();
    for task in &mut tasks {
        sched.enable(task);
    }

    let nr_cpus = rt.nr_cpus();
    for cpu in 0..nr_cpus {
        rt.set_idle(CpuId(cpu));
    }

    while !shutdown.load(Ordering::Relaxed) {
        // Wake everybody. Direct dispatches from select_cpu skip enqueue.
        for task in tasks.iter_mut() {
            let cpu = sched.select_cpu(&mut rt, task, task.cpu, 0);
            task.cpu = cpu;
            if rt.take_direct_dispatch().is_none() {
                sched.enqueue(&mut rt, task, 0);
            }
        }

        // Each CPU refills its local queue and runs it dry.
        for cpu in (0..nr_cpus).map(CpuId) {
            rt.set_callback_cpu(cpu);
            sched.dispatch(&mut rt, cpu);
            while let Some(entry) = rt.pop_local(cpu) {
                let task = match tasks.iter_mut().find(|t| t.pid == entry.pid) {
                    Some(task) => task,
                    None => continue,
                };
                task.cpu = cpu;
                task.slice_ns = entry.slice_ns;
                sched.running(&mut rt, task);

                // Burn a per-task share of the slice.
                let divisor = 1 + (task.pid.0 as u64 % 3);
                let consumed = entry.slice_ns / divisor;
                rt.advance_clock(consumed);
                task.slice_ns = entry.slice_ns.saturating_sub(consumed);
                sched.stopping(&mut rt, task, true);
            }
            rt.set_idle(cpu);
        }

        std::thread::sleep(Duration::from_millis(1));
    }

    for task in &tasks {
        sched.disable(task);
    }
}
