#![allow(dead_code)]

use std::sync::Arc;

use scx_eevdf_core::*;

/// Policy + simulated runtime + the shared maps, wired the same way the
/// agent binary wires them.
pub struct Harness {
    pub sched: EevdfSched,
    pub rt: SimRuntime,
    pub gdata: Arc<GlobalData>,
    pub caps: Arc<CapacityTable>,
    pub telemetry: Arc<Telemetry>,
}

impl Harness {
    pub fn new(nr_cpus: u32) -> Self {
        let gdata = Arc::new(GlobalData::new());
        let caps = Arc::new(CapacityTable::new(nr_cpus));
        let telemetry = Arc::new(Telemetry::new(nr_cpus));
        let mut sched = EevdfSched::new(gdata.clone(), caps.clone(), Some(telemetry.clone()));
        let mut rt = SimRuntime::new(nr_cpus);
        sched.init(&mut rt).expect("scheduler init");
        Self {
            sched,
            rt,
            gdata,
            caps,
            telemetry,
        }
    }

    /// What the agent does: store the capacity and raise the cached maximum.
    pub fn set_capacity(&self, cpu: u32, cap: u32) {
        self.caps.set(CpuId(cpu), cap);
        if cap > self.gdata.max_capacity() {
            self.gdata.set_max_capacity(cap);
        }
    }

    pub fn enable_task(&mut self, pid: i32, weight: u32) -> TaskHandle {
        let mut task = TaskHandle::new(Pid(pid), weight);
        self.sched.enable(&mut task);
        task
    }

    pub fn enqueue(&mut self, task: &mut TaskHandle) {
        self.sched.enqueue(&mut self.rt, task, 0);
    }

    /// One running→stopping cycle on `cpu` with `consumed_ns` of the default
    /// slice burned.
    pub fn run_on(&mut self, task: &mut TaskHandle, cpu: u32, consumed_ns: u64) {
        let cpu = CpuId(cpu);
        self.rt.set_callback_cpu(cpu);
        task.cpu = cpu;
        task.slice_ns = SLICE_DFL;
        self.sched.running(&mut self.rt, task);
        self.rt.advance_clock(consumed_ns);
        task.slice_ns = SLICE_DFL.saturating_sub(consumed_ns);
        self.sched.stopping(&mut self.rt, task, true);
    }
}
