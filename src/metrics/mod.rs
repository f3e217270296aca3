//! Metrics module
//!
//! Prometheus counters and gauges for one pool, kept in a private
//! registry so several pools (or tests) never collide on metric names.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::error::{Error, Result};

/// Pool-level Prometheus metrics
#[derive(Clone)]
pub struct PoolMetrics {
    registry: Registry,
    pub bytes_written: IntCounter,
    pub chunks_striped: IntCounter,
    pub parity_drives_computed: IntCounter,
    pub drives_rebuilt: IntCounter,
    pub rebuild_rejections: IntCounter,
    pub offline_drives: IntGauge,
}

impl std::fmt::Debug for PoolMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMetrics")
            .field("bytes_written", &self.bytes_written.get())
            .field("drives_rebuilt", &self.drives_rebuilt.get())
            .field("offline_drives", &self.offline_drives.get())
            .finish()
    }
}

fn metric_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics registration failed: {}", e))
}

impl PoolMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("drivestor".to_string()), None)
            .map_err(metric_error)?;

        let bytes_written = IntCounter::new(
            "bytes_written_total",
            "Payload bytes striped onto the pool",
        )
        .map_err(metric_error)?;
        let chunks_striped = IntCounter::new(
            "chunks_striped_total",
            "Chunks distributed over data drives",
        )
        .map_err(metric_error)?;
        let parity_drives_computed = IntCounter::new(
            "parity_drives_computed_total",
            "Local and global parity drives written",
        )
        .map_err(metric_error)?;
        let drives_rebuilt = IntCounter::new("drives_rebuilt_total", "Drives restored by rebuild")
            .map_err(metric_error)?;
        let rebuild_rejections = IntCounter::new(
            "rebuild_rejections_total",
            "Rebuild requests refused for insufficient redundancy",
        )
        .map_err(metric_error)?;
        let offline_drives = IntGauge::new("offline_drives", "Drives currently offline")
            .map_err(metric_error)?;

        registry
            .register(Box::new(bytes_written.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(chunks_striped.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(parity_drives_computed.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(drives_rebuilt.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(rebuild_rejections.clone()))
            .map_err(metric_error)?;
        registry
            .register(Box::new(offline_drives.clone()))
            .map_err(metric_error)?;

        Ok(Self {
            registry,
            bytes_written,
            chunks_striped,
            parity_drives_computed,
            drives_rebuilt,
            rebuild_rejections,
            offline_drives,
        })
    }

    /// Prometheus text exposition of every metric
    pub fn encode_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}
