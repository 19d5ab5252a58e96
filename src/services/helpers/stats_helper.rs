use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

/// The parts of a one-shot stats document (`GET /containers/{id}/stats`)
/// that the exporter turns into metrics.
///
/// Every field tolerates being absent or `null`: the Engine omits sections it
/// cannot measure (e.g. networks for `--network none`).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct UsageSnapshot {
    #[serde(default)]
    pub cpu_stats: Option<CpuStats>,
    #[serde(default)]
    pub memory_stats: Option<MemoryStats>,
    #[serde(default)]
    pub networks: Option<HashMap<String, NetworkStats>>,
    #[serde(default)]
    pub blkio_stats: Option<BlkioStats>,
    #[serde(default)]
    pub pids_stats: Option<PidsStats>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CpuStats {
    #[serde(default)]
    pub cpu_usage: Option<CpuUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct CpuUsage {
    /// Nanoseconds.
    #[serde(default)]
    pub total_usage: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MemoryStats {
    #[serde(default)]
    pub usage: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// Breakdown by category. cgroup v1 hosts report `total_*` keys, cgroup v2
    /// hosts report the unprefixed ones.
    #[serde(default)]
    pub stats: Option<HashMap<String, u64>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NetworkStats {
    #[serde(default)]
    pub rx_bytes: u64,
    #[serde(default)]
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlkioStats {
    #[serde(default)]
    pub io_service_bytes_recursive: Option<Vec<BlkioEntry>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BlkioEntry {
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PidsStats {
    #[serde(default)]
    pub current: Option<u64>,
}

/// A stats document as received, together with its decoded snapshot.
///
/// The raw form is what label templates see as `.Stats`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsDocument {
    pub raw: Value,
    pub snapshot: UsageSnapshot,
}

impl StatsDocument {
    pub fn decode(raw: Value) -> Result<Self, serde_json::Error> {
        let snapshot = UsageSnapshot::deserialize(&raw)?;
        Ok(Self { raw, snapshot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_cgroup_v2_document() {
        let raw = json!({
            "read": "2024-01-01T00:00:00Z",
            "cpu_stats": { "cpu_usage": { "total_usage": 138186000000u64 }, "online_cpus": 4 },
            "memory_stats": {
                "usage": 4280320,
                "limit": 3521634304u64,
                "stats": { "inactive_file": 0, "anon": 1000 }
            },
            "networks": { "eth0": { "rx_bytes": 6062, "tx_bytes": 9047, "rx_packets": 3 } },
            "blkio_stats": {
                "io_service_bytes_recursive": [
                    { "major": 8, "minor": 0, "op": "read", "value": 77824 },
                    { "major": 8, "minor": 0, "op": "write", "value": 8192 }
                ]
            },
            "pids_stats": { "current": 5, "limit": 4096 }
        });

        let document = StatsDocument::decode(raw.clone()).unwrap();
        let snapshot = &document.snapshot;
        assert_eq!(document.raw, raw);
        assert_eq!(
            snapshot.memory_stats.as_ref().and_then(|m| m.usage),
            Some(4280320)
        );
        assert_eq!(
            snapshot
                .memory_stats
                .as_ref()
                .and_then(|m| m.stats.as_ref())
                .and_then(|s| s.get("inactive_file")),
            Some(&0)
        );
        assert_eq!(snapshot.networks.as_ref().map(HashMap::len), Some(1));
        assert_eq!(snapshot.pids_stats.as_ref().and_then(|p| p.current), Some(5));
    }

    #[test]
    fn tolerates_null_and_missing_sections() {
        let raw = json!({
            "cpu_stats": { "cpu_usage": { "total_usage": 10 } },
            "memory_stats": { "stats": null },
            "networks": null,
            "blkio_stats": { "io_service_bytes_recursive": null }
        });

        let snapshot = StatsDocument::decode(raw).unwrap().snapshot;
        assert!(snapshot.networks.is_none());
        assert!(snapshot.pids_stats.is_none());
        assert_eq!(snapshot.memory_stats.unwrap().stats, None);
    }

    #[test]
    fn rejects_malformed_document() {
        let raw = json!({ "memory_stats": { "usage": "a lot" } });
        assert!(StatsDocument::decode(raw).is_err());
    }
}
