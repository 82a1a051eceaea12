//! Chaos Ledger
//!
//! Verifiable random bitstreams from a deterministic chaotic particle
//! simulation, committed to an append-only hash-chained ledger.
//!
//! # Architecture
//!
//! - **Seed derivation**: OS randomness, timing jitter, remote HTTP sources or a
//!   caller-supplied seed produce one 64-bit master seed plus provenance
//! - **Simulation**: movers under one of four motion laws; every coordinate is
//!   folded into a SHA-256 `PathDigest`
//! - **Expansion**: the digest is whitened into exactly `n` bits
//! - **Ledger**: each generation is a transaction anchored by a block whose hash
//!   links to its predecessor; state is snapshotted atomically to JSON
//! - **Replay**: an HMAC-DRBG keyed by the seed material extracts bits on demand
//!
//! # Invariants
//!
//! - Deterministic replay: same seed, parameters and mode → same bits
//! - Append-only: blocks and transactions are never modified or deleted
//! - Verification reports data, bits and anchoring checks separately

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod collaborators;
pub mod config;
pub mod crypto;
pub mod drbg;
pub mod entropy;
pub mod error;
pub mod expand;
pub mod generator;
pub mod ledger;
pub mod metrics;
pub mod simulation;
pub mod storage;
pub mod types;

// Re-exports
pub use collaborators::{Renderer, StatisticalTestResult, StatisticsEngine, SIGNIFICANCE_LEVEL};
pub use config::Config;
pub use drbg::ReplayGenerator;
pub use entropy::{EntropyFetcher, FetchedResponse, HttpFetcher, SeedDeriver};
pub use error::{Error, Result};
pub use expand::{expand_bits, OutputFormat};
pub use generator::{GenerateRequest, GenerationReceipt, Generator};
pub use ledger::{Ledger, ReplayHint, TransactionVerification};
pub use metrics::Metrics;
pub use types::{
    Bitstream, Block, EntropyFallback, EntropySpec, MotionLaw, MotionSelection, PathDigest,
    SimulationParams, Transaction, WhiteningMode,
};
