//! Turns a usage snapshot into metric values.
//!
//! Values are reported as the runtime gives them; the only conversion is CPU
//! time from nanoseconds to seconds. Rates are left to the consumer.

use crate::metrics::{
    MetricDef, BLKIO_READ_BYTES_TOTAL, BLKIO_WRITE_BYTES_TOTAL, CPU_SECONDS_TOTAL, INFO,
    MEMORY_LIMIT_BYTES, MEMORY_USAGE_BYTES, NETWORK_RX_BYTES_TOTAL, NETWORK_TX_BYTES_TOTAL, PIDS,
};
use crate::services::helpers::stats_helper::UsageSnapshot;

const NANOS_PER_SECOND: f64 = 1e9;

/// Inactive page cache key on cgroup v1 hosts.
const CACHE_KEY_V1: &str = "total_inactive_file";
/// Inactive page cache key on cgroup v2 hosts.
const CACHE_KEY_V2: &str = "inactive_file";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedValue {
    pub metric: MetricDef,
    pub value: f64,
}

impl DerivedValue {
    fn new(metric: MetricDef, value: f64) -> Self {
        Self { metric, value }
    }
}

/// Derives every metric for one container.
///
/// `info` is always first. The resource metrics follow in a fixed order, and
/// only when a snapshot exists, i.e. the container is running and its stats
/// could be read.
pub fn derive(snapshot: Option<&UsageSnapshot>) -> Vec<DerivedValue> {
    let mut values = vec![DerivedValue::new(INFO, 1.0)];
    let Some(snapshot) = snapshot else {
        return values;
    };

    let (rx_bytes, tx_bytes) = network_bytes(snapshot);
    let (read_bytes, write_bytes) = blkio_bytes(snapshot);

    values.extend([
        DerivedValue::new(CPU_SECONDS_TOTAL, cpu_seconds(snapshot)),
        DerivedValue::new(MEMORY_USAGE_BYTES, memory_usage_bytes(snapshot) as f64),
        DerivedValue::new(MEMORY_LIMIT_BYTES, memory_limit_bytes(snapshot) as f64),
        DerivedValue::new(NETWORK_RX_BYTES_TOTAL, rx_bytes as f64),
        DerivedValue::new(NETWORK_TX_BYTES_TOTAL, tx_bytes as f64),
        DerivedValue::new(BLKIO_READ_BYTES_TOTAL, read_bytes as f64),
        DerivedValue::new(BLKIO_WRITE_BYTES_TOTAL, write_bytes as f64),
        DerivedValue::new(PIDS, pids(snapshot) as f64),
    ]);
    values
}

pub fn cpu_seconds(snapshot: &UsageSnapshot) -> f64 {
    let nanos = snapshot
        .cpu_stats
        .as_ref()
        .and_then(|cpu| cpu.cpu_usage.as_ref())
        .and_then(|usage| usage.total_usage)
        .unwrap_or(0);
    nanos as f64 / NANOS_PER_SECOND
}

/// Resident memory minus the inactive page cache, never below zero.
///
/// Matches what `docker stats` shows: the cache is looked up under the cgroup v1
/// key first, then the cgroup v2 key; without either nothing is subtracted.
pub fn memory_usage_bytes(snapshot: &UsageSnapshot) -> u64 {
    let Some(memory) = snapshot.memory_stats.as_ref() else {
        return 0;
    };
    let usage = memory.usage.unwrap_or(0);
    let cache = memory.stats.as_ref().and_then(|stats| {
        stats
            .get(CACHE_KEY_V1)
            .or_else(|| stats.get(CACHE_KEY_V2))
            .copied()
    });

    match cache {
        Some(cache) => usage.saturating_sub(cache),
        None => usage,
    }
}

pub fn memory_limit_bytes(snapshot: &UsageSnapshot) -> u64 {
    snapshot
        .memory_stats
        .as_ref()
        .and_then(|memory| memory.limit)
        .unwrap_or(0)
}

/// Received and transmitted bytes summed over every interface.
pub fn network_bytes(snapshot: &UsageSnapshot) -> (u64, u64) {
    snapshot
        .networks
        .iter()
        .flat_map(|networks| networks.values())
        .fold((0, 0), |(rx, tx), network| {
            (
                rx.wrapping_add(network.rx_bytes),
                tx.wrapping_add(network.tx_bytes),
            )
        })
}

/// Read and written bytes; only records tagged exactly `read` or `write` count.
pub fn blkio_bytes(snapshot: &UsageSnapshot) -> (u64, u64) {
    let mut read_bytes: u64 = 0;
    let mut write_bytes: u64 = 0;

    let entries = snapshot
        .blkio_stats
        .as_ref()
        .and_then(|blkio| blkio.io_service_bytes_recursive.as_deref())
        .unwrap_or_default();
    for entry in entries {
        match entry.op.as_str() {
            "read" => read_bytes = read_bytes.wrapping_add(entry.value),
            "write" => write_bytes = write_bytes.wrapping_add(entry.value),
            _ => {}
        }
    }

    (read_bytes, write_bytes)
}

pub fn pids(snapshot: &UsageSnapshot) -> u64 {
    snapshot
        .pids_stats
        .as_ref()
        .and_then(|pids| pids.current)
        .unwrap_or(0)
}
