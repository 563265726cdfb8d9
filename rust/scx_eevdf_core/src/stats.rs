// SPDX-License-Identifier: GPL-2.0
//
// This software may be used and distributed according to the terms of the
// GNU General Public License version 2.

//! Telemetry shared between the policy and the agent.
//!
//! Per-CPU monotonic event counters plus a per-CPU log2 histogram of
//! enqueue-to-run latency. The handlers only ever increment; the agent folds
//! the per-CPU values, reports, and resets the histogram.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::CpuId;

/// `select_cpu` placed the task straight into a local queue.
pub const STAT_SELECT_IDLE: usize = 0;
/// Tasks that went through `enqueue`.
pub const STAT_ENQUEUE: usize = 1;
/// Latency samples recorded in `running`.
pub const STAT_LAT_SAMPLE: usize = 2;
/// Reserved.
pub const STAT_RESERVED: usize = 3;

pub const NR_COUNTERS: usize = 4;

/// Histogram bucket count; bucket `i` holds samples in `[2^i, 2^(i+1))` ns.
pub const LAT_BUCKETS: usize = 64;

/// Floor of log2, with `log2(0) = 0`.
pub fn log2_u64(v: u64) -> u32 {
    if v == 0 {
        0
    } else {
        63 - v.leading_zeros()
    }
}

/// Smallest bucket index at which the cumulative count reaches `pct`% of the
/// total, or None when the histogram is empty.
pub fn percentile_bucket(buckets: &[u64], pct: u64) -> Option<usize> {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return None;
    }
    let mut cum = 0u64;
    for (i, &count) in buckets.iter().enumerate() {
        cum += count;
        if cum * 100 >= total * pct {
            return Some(i);
        }
    }
    None
}

struct CpuSlot {
    counters: [AtomicU64; NR_COUNTERS],
    hist: [AtomicU64; LAT_BUCKETS],
}

impl CpuSlot {
    fn new() -> Self {
        Self {
            counters: std::array::from_fn(|_| AtomicU64::new(0)),
            hist: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }
}

/// Per-CPU counters and latency histogram.
pub struct Telemetry {
    cpus: Vec<CpuSlot>,
}

impl Telemetry {
    pub fn new(nr_cpus: u32) -> Self {
        Self {
            cpus: (0..nr_cpus.max(1)).map(|_| CpuSlot::new()).collect(),
        }
    }

    fn slot(&self, cpu: CpuId) -> &CpuSlot {
        // Out-of-range CPUs fold into slot 0 rather than being dropped.
        let idx = (cpu.0 as usize).min(self.cpus.len() - 1);
        &self.cpus[idx]
    }

    pub fn stat_inc(&self, cpu: CpuId, idx: usize) {
        if idx < NR_COUNTERS {
            self.slot(cpu).counters[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record one enqueue-to-run latency sample.
    pub fn record_latency(&self, cpu: CpuId, delta_ns: u64) {
        let bucket = (log2_u64(delta_ns) as usize).min(LAT_BUCKETS - 1);
        self.slot(cpu).hist[bucket].fetch_add(1, Ordering::Relaxed);
    }

    /// Sum each counter across CPUs.
    pub fn fold_counters(&self) -> [u64; NR_COUNTERS] {
        let mut out = [0u64; NR_COUNTERS];
        for slot in &self.cpus {
            for (sum, counter) in out.iter_mut().zip(slot.counters.iter()) {
                *sum += counter.load(Ordering::Relaxed);
            }
        }
        out
    }

    /// Sum each histogram bucket across CPUs.
    pub fn fold_hist(&self) -> [u64; LAT_BUCKETS] {
        let mut out = [0u64; LAT_BUCKETS];
        for slot in &self.cpus {
            for (sum, bucket) in out.iter_mut().zip(slot.hist.iter()) {
                *sum += bucket.load(Ordering::Relaxed);
            }
        }
        out
    }

    /// Zero the histogram on every CPU. Counters are monotonic and are never
    /// reset.
    pub fn reset_hist(&self) {
        for slot in &self.cpus {
            for bucket in &slot.hist {
                bucket.store(0, Ordering::Relaxed);
            }
        }
    }
}
