use crate::error::Result;
use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;

pub const METRIC_PREFIX: &str = "docker_container_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
}

/// One exported metric: its name suffix, type and help text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDef {
    pub suffix: &'static str,
    pub kind: MetricKind,
    pub help: &'static str,
}

impl MetricDef {
    const fn gauge(suffix: &'static str, help: &'static str) -> Self {
        Self {
            suffix,
            kind: MetricKind::Gauge,
            help,
        }
    }

    const fn counter(suffix: &'static str, help: &'static str) -> Self {
        Self {
            suffix,
            kind: MetricKind::Counter,
            help,
        }
    }

    pub fn name(&self) -> String {
        format!("{}{}", METRIC_PREFIX, self.suffix)
    }
}

pub const INFO: MetricDef = MetricDef::gauge("info", "Container information, always 1.");
pub const CPU_SECONDS_TOTAL: MetricDef =
    MetricDef::counter("cpu_seconds_total", "Total CPU time consumed in seconds.");
pub const MEMORY_USAGE_BYTES: MetricDef = MetricDef::gauge(
    "memory_usage_bytes",
    "Memory usage in bytes, excluding inactive page cache.",
);
pub const MEMORY_LIMIT_BYTES: MetricDef =
    MetricDef::gauge("memory_limit_bytes", "Memory limit in bytes.");
pub const NETWORK_RX_BYTES_TOTAL: MetricDef = MetricDef::counter(
    "network_rx_bytes_total",
    "Bytes received over all network interfaces.",
);
pub const NETWORK_TX_BYTES_TOTAL: MetricDef = MetricDef::counter(
    "network_tx_bytes_total",
    "Bytes transmitted over all network interfaces.",
);
pub const BLKIO_READ_BYTES_TOTAL: MetricDef =
    MetricDef::counter("blkio_read_bytes_total", "Bytes read from block devices.");
pub const BLKIO_WRITE_BYTES_TOTAL: MetricDef =
    MetricDef::counter("blkio_write_bytes_total", "Bytes written to block devices.");
pub const PIDS: MetricDef = MetricDef::gauge("pids", "Number of processes and threads.");

pub const ALL_METRICS: [MetricDef; 9] = [
    INFO,
    CPU_SECONDS_TOTAL,
    MEMORY_USAGE_BYTES,
    MEMORY_LIMIT_BYTES,
    NETWORK_RX_BYTES_TOTAL,
    NETWORK_TX_BYTES_TOTAL,
    BLKIO_READ_BYTES_TOTAL,
    BLKIO_WRITE_BYTES_TOTAL,
    PIDS,
];

/// A single value to export for one container.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub metric: MetricDef,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

impl MetricSample {
    pub fn kind(&self) -> MetricKind {
        self.metric.kind
    }
}

/// Destination of all samples of one scrape.
///
/// Backed by a fresh [`Registry`] holding one vector per metric, all declared
/// with the same label names. Writers on different tasks may emit concurrently;
/// each sample lands as a single `set`/`inc_by` on its child metric.
pub struct MetricSink {
    registry: Registry,
    gauges: HashMap<&'static str, GaugeVec>,
    counters: HashMap<&'static str, CounterVec>,
}

impl MetricSink {
    /// Creates the per-scrape registry.
    ///
    /// Fails if prometheus rejects the label names, so calling this once at
    /// startup validates the configured label set.
    pub fn new(label_names: &[String]) -> Result<Self> {
        let label_names: Vec<&str> = label_names.iter().map(String::as_str).collect();
        let registry = Registry::new();
        let mut gauges = HashMap::new();
        let mut counters = HashMap::new();

        for metric in ALL_METRICS {
            let opts = Opts::new(metric.name(), metric.help);
            match metric.kind {
                MetricKind::Gauge => {
                    let gauge = GaugeVec::new(opts, &label_names)?;
                    registry.register(Box::new(gauge.clone()))?;
                    gauges.insert(metric.suffix, gauge);
                }
                MetricKind::Counter => {
                    let counter = CounterVec::new(opts, &label_names)?;
                    registry.register(Box::new(counter.clone()))?;
                    counters.insert(metric.suffix, counter);
                }
            }
        }

        Ok(Self {
            registry,
            gauges,
            counters,
        })
    }

    pub fn emit(&self, sample: &MetricSample) -> Result<()> {
        let labels: HashMap<&str, &str> = sample
            .labels
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        match sample.kind() {
            MetricKind::Gauge => {
                if let Some(gauge) = self.gauges.get(sample.metric.suffix) {
                    gauge.get_metric_with(&labels)?.set(sample.value);
                }
            }
            MetricKind::Counter => {
                if let Some(counter) = self.counters.get(sample.metric.suffix) {
                    counter.get_metric_with(&labels)?.inc_by(sample.value);
                }
            }
        }
        Ok(())
    }

    /// Renders every emitted sample in the text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
