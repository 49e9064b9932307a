//! Prometheus-backed metrics registry for the recovery engine.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Label values are short machine strings supplied by the engine.

use std::sync::Arc;
use std::time::Duration;

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder, core::Collector};
use serde::Serialize;

use crate::error::{TelemetryError, TelemetryResult};

/// Prometheus-backed metrics registry shared across the engine.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    recovery_sessions_total: IntCounterVec,
    recovery_queue_depth: IntGauge,
    probe_cache_lookups_total: IntCounterVec,
    volume_probes_total: IntCounterVec,
    bulk_items_total: IntCounterVec,
    last_bulk_duration_ms: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Entries currently waiting behind the active recovery session.
    pub recovery_queue_depth: i64,
    /// Sessions finalized with any outcome.
    pub recovery_sessions_total: u64,
    /// Probe cache lookups served from a fresh entry.
    pub probe_cache_hits: u64,
    /// Probe cache lookups that required a new probe.
    pub probe_cache_misses: u64,
    /// Bulk items that failed.
    pub bulk_items_failed: u64,
    /// Duration of the most recent bulk action (ms).
    pub last_bulk_duration_ms: i64,
}

fn counter_vec(
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> TelemetryResult<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsSetup {
            name,
            stage: "build",
            source,
        })
}

fn gauge(name: &'static str, help: &str) -> TelemetryResult<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsSetup {
            name,
            stage: "build",
            source,
        })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> TelemetryResult<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsSetup {
            name,
            stage: "register",
            source,
        })
}

impl Metrics {
    /// Construct a new metrics registry with the recovery collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> TelemetryResult<Self> {
        let registry = Registry::new();

        let recovery_sessions_total = counter_vec(
            "recovery_sessions_total",
            "Recovery sessions finalized by settlement status",
            &["outcome"],
        )?;
        let recovery_queue_depth = gauge(
            "recovery_queue_depth",
            "Recovery requests waiting behind the active session",
        )?;
        let probe_cache_lookups_total = counter_vec(
            "probe_cache_lookups_total",
            "Probe cache lookups by result",
            &["result"],
        )?;
        let volume_probes_total = counter_vec(
            "volume_probes_total",
            "Reachability probes issued for volume-loss torrents",
            &["result"],
        )?;
        let bulk_items_total = counter_vec(
            "bulk_items_total",
            "Bulk action items processed by status",
            &["status"],
        )?;
        let last_bulk_duration_ms = gauge(
            "bulk_last_duration_ms",
            "Duration of the most recent bulk action (ms)",
        )?;

        register(&registry, "recovery_sessions_total", &recovery_sessions_total)?;
        register(&registry, "recovery_queue_depth", &recovery_queue_depth)?;
        register(&registry, "probe_cache_lookups_total", &probe_cache_lookups_total)?;
        register(&registry, "volume_probes_total", &volume_probes_total)?;
        register(&registry, "bulk_items_total", &bulk_items_total)?;
        register(&registry, "bulk_last_duration_ms", &last_bulk_duration_ms)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                recovery_sessions_total,
                recovery_queue_depth,
                probe_cache_lookups_total,
                volume_probes_total,
                bulk_items_total,
                last_bulk_duration_ms,
            }),
        })
    }

    /// Count a finalized recovery session.
    pub fn inc_recovery_session(&self, outcome: &str) {
        self.inner
            .recovery_sessions_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Set the recovery queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.inner
            .recovery_queue_depth
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    /// Count a probe cache lookup (`hit`, `miss`, or `shared`).
    pub fn inc_probe_lookup(&self, result: &str) {
        self.inner
            .probe_cache_lookups_total
            .with_label_values(&[result])
            .inc();
    }

    /// Count a volume-loss reachability probe (`reachable` or `unreachable`).
    pub fn inc_volume_probe(&self, result: &str) {
        self.inner
            .volume_probes_total
            .with_label_values(&[result])
            .inc();
    }

    /// Count a processed bulk item (`applied`, `cancelled`, or `failed`).
    pub fn inc_bulk_item(&self, status: &str) {
        self.inner
            .bulk_items_total
            .with_label_values(&[status])
            .inc();
    }

    /// Record how long the most recent bulk action took.
    pub fn observe_bulk_duration(&self, duration: Duration) {
        self.inner
            .last_bulk_duration_ms
            .set(Self::duration_to_ms(duration));
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsRender {
                source: Box::new(source),
            })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsRender {
            source: Box::new(source),
        })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        let sessions = ["handled", "continue", "cancelled"]
            .into_iter()
            .map(|label| inner.recovery_sessions_total.with_label_values(&[label]).get())
            .sum();
        MetricsSnapshot {
            recovery_queue_depth: inner.recovery_queue_depth.get(),
            recovery_sessions_total: sessions,
            probe_cache_hits: inner
                .probe_cache_lookups_total
                .with_label_values(&["hit"])
                .get(),
            probe_cache_misses: inner
                .probe_cache_lookups_total
                .with_label_values(&["miss"])
                .get(),
            bulk_items_failed: inner.bulk_items_total.with_label_values(&["failed"]).get(),
            last_bulk_duration_ms: inner.last_bulk_duration_ms.get(),
        }
    }

    /// Convert a duration to milliseconds saturating at `i64::MAX`.
    pub(crate) fn duration_to_ms(duration: Duration) -> i64 {
        i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
    }
}
