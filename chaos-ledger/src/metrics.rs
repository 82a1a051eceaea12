//! Metrics collection for observability
//!
//! Prometheus metrics for the generation pipeline and the ledger.
//! Every collector lives in the instance's own registry, so several
//! ledgers (one per test, say) can coexist in one process.
//!
//! # Metrics
//!
//! - `chaos_generations_total` - Completed generations
//! - `chaos_append_duration_seconds` - Histogram of append latencies
//! - `chaos_blocks_total` - Blocks appended
//! - `chaos_verifications_total` - Verification requests
//! - `chaos_verification_mismatches_total` - Verifications that were not fully verified
//! - `chaos_entropy_fallbacks_total` - Entropy fallbacks taken
//! - `chaos_persistence_failures_total` - Snapshot saves that failed

use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Completed generations
    pub generations_total: IntCounter,

    /// Append duration histogram
    pub append_duration: Histogram,

    /// Blocks appended
    pub blocks_total: IntCounter,

    /// Verification requests
    pub verifications_total: IntCounter,

    /// Verifications with any failed check
    pub verification_mismatches: IntCounter,

    /// Entropy fallbacks
    pub entropy_fallbacks: IntCounter,

    /// Failed snapshot saves
    pub persistence_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("blocks_total", &self.blocks_total.get())
            .finish_non_exhaustive()
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounter> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let append_duration = Histogram::with_opts(
            HistogramOpts::new(
                "chaos_append_duration_seconds",
                "Histogram of append latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(append_duration.clone()))?;

        Ok(Self {
            generations_total: counter(
                &registry,
                "chaos_generations_total",
                "Total number of completed generations",
            )?,
            append_duration,
            blocks_total: counter(&registry, "chaos_blocks_total", "Total number of blocks")?,
            verifications_total: counter(
                &registry,
                "chaos_verifications_total",
                "Total number of verification requests",
            )?,
            verification_mismatches: counter(
                &registry,
                "chaos_verification_mismatches_total",
                "Verifications with at least one failed check",
            )?,
            entropy_fallbacks: counter(
                &registry,
                "chaos_entropy_fallbacks_total",
                "Entropy fallbacks taken during seed derivation",
            )?,
            persistence_failures: counter(
                &registry,
                "chaos_persistence_failures_total",
                "Snapshot saves that failed",
            )?,
            registry,
        })
    }

    /// Record a completed generation and the fallbacks it needed
    pub fn record_generation(&self, fallbacks: usize) {
        self.generations_total.inc();
        self.entropy_fallbacks.inc_by(fallbacks as u64);
    }

    /// Record append duration
    pub fn record_append_duration(&self, duration_seconds: f64) {
        self.append_duration.observe(duration_seconds);
    }

    /// Record a block append
    pub fn record_block(&self) {
        self.blocks_total.inc();
    }

    /// Record a verification outcome
    pub fn record_verification(&self, fully_verified: bool) {
        self.verifications_total.inc();
        if !fully_verified {
            self.verification_mismatches.inc();
        }
    }

    /// Record a failed save
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of every metric
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
