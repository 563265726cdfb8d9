// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Control and telemetry loop.
//!
//! The agent owns the control plane only: it pushes per-CPU capacities and
//! the observed maximum into the shared maps and folds telemetry. It never
//! touches virtual time, the active weight sum, or task state.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::info;

use scx_eevdf_core::{
    percentile_bucket, CapacityTable, CpuId, GlobalData, Telemetry, CAPACITY_SCALE,
};

/// Capacities are re-scanned every fifth 1 s tick: fast enough to follow
/// CPU hot-plug, cheap enough to not matter.
const CAP_REFRESH_TICKS: u32 = 5;

pub struct Agent {
    caps: Arc<CapacityTable>,
    gdata: Arc<GlobalData>,
    telemetry: Option<Arc<Telemetry>>,
}

impl Agent {
    pub fn new(
        caps: Arc<CapacityTable>,
        gdata: Arc<GlobalData>,
        telemetry: Option<Arc<Telemetry>>,
    ) -> Self {
        Self {
            caps,
            gdata,
            telemetry,
        }
    }

    /// Re-read every possible CPU's capacity from sysfs, push changed values
    /// into the capacity table and refresh the cached maximum. Returns
    /// whether anything changed.
    pub fn refresh_cpu_capacities(&self, force_log: bool) -> bool {
        let mut max_cap = 0u32;
        let mut changed = false;

        for cpu in 0..self.caps.nr_cpus() {
            let cap = read_cpu_capacity(cpu);
            if self.caps.raw(CpuId(cpu)) != cap {
                self.caps.set(CpuId(cpu), cap);
                changed = true;
            }
            max_cap = max_cap.max(cap);
        }

        if max_cap == 0 {
            max_cap = CAPACITY_SCALE;
        }
        if self.gdata.max_capacity() != max_cap {
            self.gdata.set_max_capacity(max_cap);
            changed = true;
        }

        if force_log || changed {
            info!(
                "max_capacity={} ({}){}",
                max_cap,
                if max_cap == CAPACITY_SCALE {
                    "homogeneous"
                } else {
                    "heterogeneous"
                },
                if changed { " [updated]" } else { "" }
            );
        }
        changed
    }

    /// Fold the latency histogram across CPUs, report the p95 bucket, reset
    /// the histogram and print the event counters.
    fn telemetry_pass(&self) {
        let Some(telemetry) = &self.telemetry else {
            return;
        };

        let buckets = telemetry.fold_hist();
        let total: u64 = buckets.iter().sum();
        info!("samples: {}", total);
        if let Some(bucket) = percentile_bucket(&buckets, 95) {
            let us = (1u64 << bucket) as f64 / 1000.0;
            info!("p95 scheduler latency: {:.2} us (bucket {})", us, bucket);
        }
        telemetry.reset_hist();

        let counters = telemetry.fold_counters();
        for (idx, value) in counters.iter().enumerate() {
            info!("stat[{}] = {}", idx, value);
        }
    }

    /// The 1 s control loop, until shutdown is requested.
    pub fn run(&self, shutdown: &AtomicBool) {
        let mut tick: u32 = 0;
        while !shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_secs(1));
            if tick % CAP_REFRESH_TICKS == 0 {
                self.refresh_cpu_capacities(false);
            }
            tick = tick.wrapping_add(1);
            self.telemetry_pass();
        }
    }
}

/// Capacity of one CPU from sysfs; a missing file or malformed content
/// reads as full capacity.
fn read_cpu_capacity(cpu: u32) -> u32 {
    let path = format!("/sys/devices/system/cpu/cpu{}/cpu_capacity", cpu);
    read_u32(Path::new(&path)).unwrap_or(CAPACITY_SCALE)
}

fn read_u32(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Number of possible CPUs from the kernel's possible mask, falling back to
/// libc when sysfs is unavailable.
pub fn nr_possible_cpus() -> u32 {
    if let Ok(list) = std::fs::read_to_string("/sys/devices/system/cpu/possible") {
        if let Some(max_id) = parse_cpu_list_max(list.trim()) {
            return max_id + 1;
        }
    }
    let nproc = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_CONF) };
    if nproc > 0 {
        nproc as u32
    } else {
        1
    }
}

/// Highest CPU id in a kernel cpu list ("0-7", "0,2-5", "3").
fn parse_cpu_list_max(list: &str) -> Option<u32> {
    let mut max_id = None;
    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let last = match part.split_once('-') {
            Some((_, end)) => end,
            None => part,
        };
        if let Ok(id) = last.parse::<u32>() {
            max_id = Some(max_id.map_or(id, |m: u32| m.max(id)));
        }
    }
    max_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_list_single() {
        assert_eq!(parse_cpu_list_max("3"), Some(3));
    }

    #[test]
    fn cpu_list_range() {
        assert_eq!(parse_cpu_list_max("0-7"), Some(7));
    }

    #[test]
    fn cpu_list_mixed() {
        assert_eq!(parse_cpu_list_max("0,2-5,9"), Some(9));
    }

    #[test]
    fn cpu_list_garbage() {
        assert_eq!(parse_cpu_list_max(""), None);
        assert_eq!(parse_cpu_list_max("abc"), None);
    }
}
