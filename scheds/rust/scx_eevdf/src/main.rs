// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

mod agent;
mod workload;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;

use agent::Agent;
use scx_eevdf_core::{CapacityTable, EevdfSched, GlobalData, SimRuntime, Telemetry};
use workload::Workload;

const SCHEDULER_NAME: &str = "scx_eevdf";

/// scx_eevdf: EEVDF extended for heterogeneous processors.
///
/// Reads per-CPU capacity from /sys/devices/system/cpu/cpuN/cpu_capacity and
/// scales virtual-time accounting by each core's computational capacity. On
/// homogeneous systems this is identical to classic EEVDF.
///
/// This process is the control plane only: it populates per-CPU capacities,
/// maintains the observed maximum, and aggregates telemetry once per second.
/// Scheduling state (virtual time, active weight sum, task state) is never
/// written from here.
#[derive(Debug, Parser)]
struct Opts {}

fn main() -> Result<()> {
    let _opts = Opts::parse();

    let loglevel = simplelog::LevelFilter::Info;
    let mut lcfg = simplelog::ConfigBuilder::new();
    lcfg.set_time_level(simplelog::LevelFilter::Error)
        .set_location_level(simplelog::LevelFilter::Off)
        .set_target_level(simplelog::LevelFilter::Off)
        .set_thread_level(simplelog::LevelFilter::Off);
    simplelog::TermLogger::init(
        loglevel,
        lcfg.build(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_flag.store(true, Ordering::Relaxed);
    })?;

    let nr_cpus = agent::nr_possible_cpus();
    let gdata = Arc::new(GlobalData::new());
    let caps = Arc::new(CapacityTable::new(nr_cpus));
    let telemetry = Arc::new(Telemetry::new(nr_cpus));

    let agent = Agent::new(caps.clone(), gdata.clone(), Some(telemetry.clone()));

    // Populate capacities before attach: init only defaults the maximum
    // capacity when the scan left it unset.
    agent.refresh_cpu_capacities(true);

    let mut sched = EevdfSched::new(gdata, caps, Some(telemetry));
    let mut rt = SimRuntime::new(nr_cpus);
    sched.init(&mut rt)?;

    let driver = Workload::spawn(sched, rt, shutdown.clone());
    info!("{} scheduler attached. Ctrl+C exits.", SCHEDULER_NAME);

    agent.run(&shutdown);

    driver.join();
    info!("Unregister {} scheduler", SCHEDULER_NAME);
    Ok(())
}
