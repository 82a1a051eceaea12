//! Main ledger orchestration layer
//!
//! The [`Ledger`] owns the transaction map, the block chain, the
//! snapshot store and the payload signing key.
//!
//! # Locking
//!
//! The transaction map and the chain sit behind independent `RwLock`s.
//! No code path holds both at once, and neither is held while the
//! snapshot is written: `persist` takes each read lock in turn, clones,
//! releases, then writes. Saves are serialized by a separate mutex so
//! an older snapshot can never overwrite a newer one.
//!
//! # Example
//!
//! ```no_run
//! use chaos_ledger::{Config, Ledger};
//!
//! fn main() -> chaos_ledger::Result<()> {
//!     let ledger = Ledger::open(&Config::default())?;
//!     assert!(ledger.validate_chain());
//!     Ok(())
//! }
//! ```

use crate::collaborators::{Renderer, StatisticalTestResult, StatisticsEngine};
use crate::config::GenerationDefaults;
use crate::crypto::{bits_hash, data_hash, PayloadSigner};
use crate::drbg::ReplayGenerator;
use crate::expand::{expand_bits, OutputFormat};
use crate::generator::{run_pipeline, GenerateRequest};
use crate::metrics::Metrics;
use crate::simulation::simulate;
use crate::storage::{LoadOutcome, Snapshot, SnapshotStore};
use crate::types::{
    Bitstream, Block, EntropySpec, MasterSeed, SimulationParams, Trajectory, Transaction,
    TransactionSummary, WhiteningMode,
};
use crate::{Config, Error, Result};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Append-only transaction ledger
pub struct Ledger {
    transactions: RwLock<HashMap<Uuid, Transaction>>,
    chain: RwLock<Vec<Block>>,
    store: Option<SnapshotStore>,
    persist_lock: Mutex<()>,
    signer: PayloadSigner,
    metrics: Option<Arc<Metrics>>,
    limits: GenerationDefaults,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("transactions", &self.transactions.read().len())
            .field("blocks", &self.chain.read().len())
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Independent verification checks for one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionVerification {
    /// Verified transaction
    pub tx_id: Uuid,
    /// Whole chain passes `validate_chain`
    pub chain_valid: bool,
    /// Recomputed data hash equals the stored one
    pub data_hash_match: bool,
    /// Recomputed bits hash equals the stored one
    pub bits_hash_match: bool,
    /// Some block anchors the transaction's published hash
    pub published_in_chain: bool,
}

impl TransactionVerification {
    /// Data, bits and anchoring checks all hold
    pub fn is_fully_verified(&self) -> bool {
        self.data_hash_match && self.bits_hash_match && self.published_in_chain
    }
}

/// Everything needed to regenerate a transaction through the public pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayHint {
    /// Master seed, to be used with the Reproduce entropy mode
    pub seed: MasterSeed,
    /// Motion law selection as written in requests
    pub law: String,
    /// Simulation parameters
    pub params: SimulationParams,
    /// Whitening strategy
    pub whitening: WhiteningMode,
    /// Bit count
    pub bit_count: usize,
}

impl ReplayHint {
    /// Request reproducing the transaction
    pub fn request(&self) -> GenerateRequest {
        GenerateRequest {
            bit_count: self.bit_count,
            entropy: EntropySpec::Reproduce { seed: self.seed },
            simulation: self.params.clone(),
            whitening: self.whitening,
        }
    }

    /// `entropy=repro&seed=…&law=…` rendering of the hint
    pub fn to_query_string(&self) -> String {
        let p = &self.params;
        format!(
            "entropy=repro&seed={}&law={}&points={}&iterations={}&width={}&height={}&px={}&step={}&sharp={}&smooth={}&speed={}&whitening={}&bits={}",
            self.seed,
            self.law,
            p.point_count,
            p.iterations,
            p.canvas_width,
            p.canvas_height,
            p.pixel_width,
            p.step,
            p.motion.sharpness,
            p.motion.smoothness,
            p.motion.speed_scale,
            self.whitening,
            self.bit_count,
        )
    }
}

/// Scan front to back; false at the first bad hash or broken link
pub fn validate_blocks(blocks: &[Block]) -> bool {
    for (i, block) in blocks.iter().enumerate() {
        if block.compute_hash() != block.hash {
            tracing::debug!(index = i, "Block hash mismatch");
            return false;
        }
        if i > 0 && block.prev_hash != blocks[i - 1].hash {
            tracing::debug!(index = i, "Block link mismatch");
            return false;
        }
    }
    true
}

impl Ledger {
    /// Ledger without persistence
    pub fn in_memory() -> Self {
        Self::from_parts(Snapshot::default(), None, PayloadSigner::generate())
    }

    fn from_parts(snapshot: Snapshot, store: Option<SnapshotStore>, signer: PayloadSigner) -> Self {
        Self {
            transactions: RwLock::new(snapshot.tx_store),
            chain: RwLock::new(snapshot.chain),
            store,
            persist_lock: Mutex::new(()),
            signer,
            metrics: None,
            limits: GenerationDefaults::default(),
        }
    }

    /// Open the ledger at `config.store_path`
    ///
    /// A missing snapshot is bootstrapped to disk; a corrupt one is
    /// quarantined and the ledger starts empty.
    pub fn open(config: &Config) -> Result<Self> {
        let store = SnapshotStore::new(&config.store_path);
        let (mut snapshot, outcome) = store.load()?;

        let stored_key = snapshot.signing_key.take();
        let signer = match &stored_key {
            Some(encoded) => PayloadSigner::from_hex(encoded)?,
            None => PayloadSigner::generate(),
        };

        let ledger = Self::from_parts(snapshot, Some(store), signer)
            .with_limits(config.generation.clone());

        if !ledger.validate_chain() {
            tracing::error!(
                path = ?config.store_path,
                blocks = ledger.len(),
                "Loaded chain failed validation; keeping it as-is"
            );
        }

        if outcome != LoadOutcome::Loaded || stored_key.is_none() {
            ledger.persist()?;
        }

        tracing::info!(
            path = ?config.store_path,
            transactions = ledger.transactions.read().len(),
            blocks = ledger.len(),
            "Ledger opened"
        );
        Ok(ledger)
    }

    /// Attach metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Bit-count limits applied by [`Ledger::extract`]
    pub fn with_limits(mut self, limits: GenerationDefaults) -> Self {
        self.limits = limits;
        self
    }

    /// Attached metrics
    pub fn metrics(&self) -> Option<&Arc<Metrics>> {
        self.metrics.as_ref()
    }

    /// Commit a transaction and anchor it in a new block
    ///
    /// A persistence failure is logged and counted; the in-memory append stands.
    pub fn append(&self, tx: Transaction) -> Result<Block> {
        let started = Instant::now();
        let tx_id = tx.id;
        let published = tx.published.clone();

        {
            let mut transactions = self.transactions.write();
            if transactions.contains_key(&tx_id) {
                return Err(Error::DuplicateTransaction(tx_id));
            }
            transactions.insert(tx_id, tx);
        }

        let block = {
            let mut chain = self.chain.write();
            let prev_hash = chain.last().map(|b| b.hash.clone()).unwrap_or_default();
            let mut block = Block {
                index: chain.len(),
                timestamp: Utc::now().timestamp(),
                tx_id,
                data_hash: published,
                prev_hash,
                hash: String::new(),
            };
            block.hash = block.compute_hash();
            chain.push(block.clone());
            block
        };

        if let Err(e) = self.persist() {
            tracing::warn!(tx_id = %tx_id, error = %e, "Snapshot save failed; append kept in memory");
            if let Some(metrics) = &self.metrics {
                metrics.record_persistence_failure();
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_block();
            metrics.record_append_duration(started.elapsed().as_secs_f64());
        }

        tracing::info!(
            tx_id = %tx_id,
            index = block.index,
            hash = %block.hash,
            "Block appended"
        );
        Ok(block)
    }

    /// Write the current state to the snapshot store (no-op in memory)
    pub fn persist(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock();

        let tx_store = self.transactions.read().clone();
        let chain = self.chain.read().clone();
        store.save(&Snapshot {
            tx_store,
            chain,
            signing_key: Some(self.signer.to_hex()),
        })
    }

    /// Recompute every block hash and link
    pub fn validate_chain(&self) -> bool {
        validate_blocks(&self.chain.read())
    }

    /// Number of blocks
    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    /// No blocks yet
    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    /// Copy of the chain
    pub fn chain(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    /// Copy of one transaction
    pub fn transaction(&self, id: Uuid) -> Result<Transaction> {
        self.transactions
            .read()
            .get(&id)
            .cloned()
            .ok_or(Error::TransactionNotFound(id))
    }

    /// Listing sorted by creation time
    pub fn summaries(&self) -> Vec<TransactionSummary> {
        let mut summaries: Vec<TransactionSummary> = self
            .transactions
            .read()
            .values()
            .map(Transaction::summary)
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        summaries
    }

    /// Re-run the pipeline from stored provenance and compare commitments
    pub fn verify_transaction(&self, id: Uuid) -> Result<TransactionVerification> {
        let tx = self.transaction(id)?;

        let output = run_pipeline(
            tx.master_seed,
            &tx.provenance.motion_params,
            tx.requested_bit_count,
            tx.provenance.whitening_mode,
            false,
        );
        let data_hash_match = hex::encode(data_hash(&output.digest)) == tx.data_hash;
        let bits_hash_match = hex::encode(bits_hash(&output.bits)) == tx.bits_hash;

        let (chain_valid, published_in_chain) = {
            let chain = self.chain.read();
            (
                validate_blocks(&chain),
                chain.iter().any(|b| b.data_hash == tx.published),
            )
        };

        let verification = TransactionVerification {
            tx_id: id,
            chain_valid,
            data_hash_match,
            bits_hash_match,
            published_in_chain,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_verification(verification.is_fully_verified());
        }
        if !verification.is_fully_verified() {
            tracing::warn!(?verification, "Transaction failed verification");
        }
        Ok(verification)
    }

    /// Bitstream re-derived from stored provenance
    pub fn reproduce_bits(&self, id: Uuid) -> Result<Bitstream> {
        let tx = self.transaction(id)?;
        let output = run_pipeline(
            tx.master_seed,
            &tx.provenance.motion_params,
            tx.requested_bit_count,
            tx.provenance.whitening_mode,
            false,
        );
        Ok(output.bits)
    }

    /// Replay generator keyed by the transaction's seed material
    pub fn replay_generator(&self, id: Uuid) -> Result<ReplayGenerator> {
        Ok(ReplayGenerator::from_transaction(&self.transaction(id)?))
    }

    /// Extract `n` replay bits (`n <= 0` means the transaction's own count),
    /// clamped to the configured maximum
    pub fn extract(&self, id: Uuid, n: i64, format: OutputFormat) -> Result<Vec<u8>> {
        let tx = self.transaction(id)?;
        let bit_count = if n <= 0 {
            tx.requested_bit_count.min(self.limits.max_bit_count)
        } else {
            self.limits.normalize_bit_count(n)
        };
        let packed = ReplayGenerator::from_transaction(&tx).read_bits_packed(bit_count);
        Ok(format.render(&packed, bit_count))
    }

    /// Parameters for regenerating a transaction
    pub fn replay_hint(&self, id: Uuid) -> Result<ReplayHint> {
        let tx = self.transaction(id)?;
        let params = tx.provenance.motion_params;
        Ok(ReplayHint {
            seed: tx.master_seed,
            law: params.motion.law.to_string(),
            params,
            whitening: tx.provenance.whitening_mode,
            bit_count: tx.requested_bit_count,
        })
    }

    /// Trajectory of a transaction, re-simulated when not held in memory
    pub fn trajectory(&self, id: Uuid) -> Result<Arc<Trajectory>> {
        let tx = self.transaction(id)?;
        if let Some(trajectory) = tx.trajectory {
            return Ok(trajectory);
        }
        simulate(tx.master_seed, &tx.provenance.motion_params)
            .trajectory
            .map(Arc::new)
            .ok_or_else(|| Error::Other("simulation returned no trajectory".to_string()))
    }

    /// Hand a transaction's trajectory to a renderer
    pub fn render_transaction<R: Renderer>(&self, id: Uuid, renderer: &R) -> Result<R::Image> {
        let trajectory = self.trajectory(id)?;
        renderer.render(&trajectory)
    }

    /// Feed a transaction's reproduced bits to a statistics engine
    pub fn analyze_transaction(
        &self,
        id: Uuid,
        engine: &dyn StatisticsEngine,
    ) -> Result<Vec<StatisticalTestResult>> {
        let bits = self.reproduce_bits(id)?;
        engine.run(&bits)
    }

    /// Hex HMAC-SHA256 of `payload` under the ledger key
    pub fn sign_payload(&self, payload: &[u8]) -> String {
        self.signer.sign(payload)
    }

    /// Check a signature produced by `sign_payload`
    pub fn verify_payload(&self, payload: &[u8], signature_hex: &str) -> bool {
        self.signer.verify(payload, signature_hex)
    }

    /// Expand bits for a transaction under a different whitening mode
    pub fn rewhiten(&self, id: Uuid, mode: WhiteningMode) -> Result<Bitstream> {
        let tx = self.transaction(id)?;
        let digest = crate::simulation::path_digest(tx.master_seed, &tx.provenance.motion_params);
        Ok(expand_bits(&digest, tx.requested_bit_count, mode))
    }
}
