//! Generation pipeline
//!
//! seed derivation → simulation → expansion → commitments → ledger append
//!
//! Seed derivation is async (it may fetch remote entropy). The CPU-bound
//! stages and the append run on the blocking pool so concurrent requests
//! proceed in parallel without stalling the runtime.

use crate::config::{Config, GenerationDefaults};
use crate::crypto::{generate_tx_id, Commitments};
use crate::entropy::SeedDeriver;
use crate::expand::expand_bits;
use crate::ledger::{Ledger, TransactionVerification};
use crate::metrics::Metrics;
use crate::simulation::{path_digest, simulate};
use crate::types::{
    Bitstream, Block, EntropySpec, MasterSeed, PathDigest, Provenance, SimulationParams,
    SimulationSummary, Trajectory, Transaction, WhiteningMode,
};
use crate::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

/// One generation request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    /// Output length in bits
    pub bit_count: usize,
    /// Seed source
    pub entropy: EntropySpec,
    /// Simulation parameters (normalized before use)
    pub simulation: SimulationParams,
    /// Whitening strategy
    pub whitening: WhiteningMode,
}

/// Output of the deterministic stages
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Commitment over the simulation run
    pub digest: PathDigest,
    /// Expanded bits
    pub bits: Bitstream,
    /// Recorded paths, when requested
    pub trajectory: Option<Trajectory>,
}

/// Simulate and expand; identical inputs give identical outputs
pub fn run_pipeline(
    seed: MasterSeed,
    params: &SimulationParams,
    bit_count: usize,
    whitening: WhiteningMode,
    record: bool,
) -> PipelineOutput {
    let started = Instant::now();
    let (digest, trajectory) = if record {
        let run = simulate(seed, params);
        (run.digest, run.trajectory)
    } else {
        (path_digest(seed, params), None)
    };
    let simulated = started.elapsed();

    let bits = expand_bits(&digest, bit_count, whitening);
    debug!(
        seed,
        bit_count,
        whitening = %whitening,
        simulate_ms = simulated.as_secs_f64() * 1e3,
        expand_ms = (started.elapsed() - simulated).as_secs_f64() * 1e3,
        "Pipeline stages complete"
    );

    PipelineOutput {
        digest,
        bits,
        trajectory,
    }
}

/// A committed generation
#[derive(Debug, Clone)]
pub struct GenerationReceipt {
    /// Committed transaction, trajectory attached
    pub transaction: Transaction,
    /// Anchoring block
    pub block: Block,
    /// Generated bits
    pub bits: Bitstream,
}

/// Drives requests through the pipeline into a ledger
#[derive(Debug, Clone)]
pub struct Generator {
    ledger: Arc<Ledger>,
    deriver: SeedDeriver,
    defaults: GenerationDefaults,
    metrics: Option<Arc<Metrics>>,
}

impl Generator {
    /// Generator over `ledger` using `deriver` for seeds
    pub fn new(ledger: Arc<Ledger>, deriver: SeedDeriver, defaults: GenerationDefaults) -> Self {
        Self {
            ledger,
            deriver,
            defaults,
            metrics: None,
        }
    }

    /// Generator with an HTTP-backed deriver built from `config`
    pub fn from_config(ledger: Arc<Ledger>, config: &Config) -> Result<Self> {
        let deriver = SeedDeriver::with_http(config.entropy.clone())?;
        Ok(Self::new(ledger, deriver, config.generation.clone()))
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Underlying ledger
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Request defaults
    pub fn defaults(&self) -> &GenerationDefaults {
        &self.defaults
    }

    /// Run one request end to end and commit it
    pub async fn generate(&self, request: GenerateRequest) -> Result<GenerationReceipt> {
        let GenerateRequest {
            bit_count,
            entropy,
            simulation,
            whitening,
        } = request;
        let bit_count = bit_count.min(self.defaults.max_bit_count);
        let params = simulation.normalized();

        let derived = self.deriver.derive(&entropy).await;
        let fallback_count = derived.fallbacks.len();

        let ledger = Arc::clone(&self.ledger);
        let receipt = tokio::task::spawn_blocking(move || -> Result<GenerationReceipt> {
            let output = run_pipeline(derived.seed, &params, bit_count, whitening, true);
            let commitments = Commitments::compute(&output.digest, &output.bits);

            let transaction = Transaction {
                id: generate_tx_id(),
                created_at: Utc::now(),
                requested_bit_count: bit_count,
                master_seed: derived.seed,
                simulation_summary: SimulationSummary::new(&params, derived.tag.clone()),
                data_hash: commitments.data_hash,
                bits_hash: commitments.bits_hash,
                published: commitments.published,
                provenance: Provenance {
                    entropy_spec: entropy,
                    entropy_tag: derived.tag,
                    entropy_fallbacks: derived.fallbacks,
                    motion_params: params,
                    whitening_mode: whitening,
                    sub_seeds: derived.sub_seeds,
                },
                trajectory: output.trajectory.map(Arc::new),
            };

            let block = ledger.append(transaction.clone())?;
            Ok(GenerationReceipt {
                transaction,
                block,
                bits: output.bits,
            })
        })
        .await??;

        if let Some(metrics) = &self.metrics {
            metrics.record_generation(fallback_count);
        }

        info!(
            tx_id = %receipt.transaction.id,
            block = receipt.block.index,
            bit_count,
            entropy = %receipt.transaction.provenance.entropy_tag,
            fallbacks = fallback_count,
            "Generation committed"
        );
        Ok(receipt)
    }

    /// Request with every default and the given entropy spec
    pub async fn generate_default(&self, entropy: EntropySpec) -> Result<GenerationReceipt> {
        self.generate(self.defaults.request(entropy)).await
    }

    /// Verify a committed transaction on the blocking pool
    pub async fn verify(&self, id: Uuid) -> Result<TransactionVerification> {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || ledger.verify_transaction(id)).await?
    }
}
