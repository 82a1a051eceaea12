//! Core types for the generation pipeline and the ledger
//!
//! All types are designed for:
//! - Deterministic replay (every field needed to re-derive a bitstream is recorded)
//! - JSON snapshots (serde, no binary-only fields)
//! - Closed dispatch (mode strings are parsed into enums at the boundary)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Master seed: the sole reproducibility key of a generation
pub type MasterSeed = i64;

/// Per-remote-source sub-seeds, in the order the sources were listed
pub type SubSeeds = Vec<i64>;

/// 256-bit commitment over a full simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathDigest([u8; 32]);

impl PathDigest {
    /// Wrap raw digest bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PathDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Where the master seed comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EntropySpec {
    /// Caller-supplied seed, returned unchanged
    Reproduce {
        /// Seed to replay
        seed: i64,
    },
    /// 8 bytes from the operating system CSPRNG
    OperatingSystem,
    /// Best-effort timing jitter hashed with SHA-256
    TimingJitter,
    /// Remote HTTP endpoints
    RemoteHttp {
        /// Endpoints, consulted in order
        urls: Vec<String>,
    },
    /// OS + jitter + every remote endpoint, plus one sub-seed per endpoint
    Mixed {
        /// Endpoints, consulted in order
        urls: Vec<String>,
    },
}

impl EntropySpec {
    /// Build from loosely typed request parts.
    ///
    /// A supplied seed always selects `Reproduce`. Unknown or empty mode
    /// names select `Mixed`.
    pub fn from_parts(mode: &str, seed: Option<i64>, urls: Vec<String>) -> Self {
        if let Some(seed) = seed {
            return EntropySpec::Reproduce { seed };
        }
        match mode.trim().to_ascii_lowercase().as_str() {
            "os" => EntropySpec::OperatingSystem,
            "jitter" => EntropySpec::TimingJitter,
            "http" => EntropySpec::RemoteHttp { urls },
            _ => EntropySpec::Mixed { urls },
        }
    }

    /// Short mode name used in query strings
    pub fn mode_name(&self) -> &'static str {
        match self {
            EntropySpec::Reproduce { .. } => "repro",
            EntropySpec::OperatingSystem => "os",
            EntropySpec::TimingJitter => "jitter",
            EntropySpec::RemoteHttp { .. } => "http",
            EntropySpec::Mixed { .. } => "mix",
        }
    }

    /// Remote endpoints named by this spec
    pub fn urls(&self) -> &[String] {
        match self {
            EntropySpec::RemoteHttp { urls } | EntropySpec::Mixed { urls } => urls,
            _ => &[],
        }
    }
}

impl Default for EntropySpec {
    fn default() -> Self {
        EntropySpec::Mixed { urls: Vec::new() }
    }
}

/// A degraded step taken while deriving a seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntropyFallback {
    /// Request failed or timed out; the source contributed nothing
    FetchFailed {
        /// Endpoint
        url: String,
        /// Failure description
        reason: String,
    },
    /// Body was empty; status, headers and URL were hashed instead
    EnvelopeHashed {
        /// Endpoint
        url: String,
    },
    /// Fewer than 8 bytes of material; OS randomness filled the rest
    OsPadded {
        /// Endpoint, or `None` when padding the combined remote material
        url: Option<String>,
        /// Bytes of real material available before padding
        available: usize,
    },
}

/// Bit expansion strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WhiteningMode {
    /// SHA-256 counter blocks
    Raw,
    /// SHA-256 counter blocks XORed with a per-block xorshift stream
    LfsrWhitened,
    /// HMAC-DRBG seeded with the digest
    Drbg,
    /// AES-256 keystream in counter mode
    #[default]
    AesCounter,
}

impl WhiteningMode {
    /// Parse a request string. Unknown or empty names select the default.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" | "raw" | "hybrid" => WhiteningMode::Raw,
            "on" | "lfsr" => WhiteningMode::LfsrWhitened,
            "hmac" | "drbg" => WhiteningMode::Drbg,
            "aes" | "aes-ctr" => WhiteningMode::AesCounter,
            _ => WhiteningMode::default(),
        }
    }

    /// Canonical request string
    pub fn as_str(&self) -> &'static str {
        match self {
            WhiteningMode::Raw => "off",
            WhiteningMode::LfsrWhitened => "on",
            WhiteningMode::Drbg => "hmac",
            WhiteningMode::AesCounter => "aes",
        }
    }
}

impl fmt::Display for WhiteningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Acceleration law applied to every mover during one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotionLaw {
    /// Value-noise flow field
    Flow,
    /// Phase-offset trigonometric acceleration
    Sine,
    /// Rare random impulses
    Jerk,
    /// Tangential + radial pull toward the canvas centre
    Spiral,
}

impl MotionLaw {
    /// Every law, in selection order for `random`
    pub const ALL: [MotionLaw; 4] = [
        MotionLaw::Flow,
        MotionLaw::Sine,
        MotionLaw::Jerk,
        MotionLaw::Spiral,
    ];

    /// Parse one law name; anything unrecognised is `Flow`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "sine" => MotionLaw::Sine,
            "jerk" => MotionLaw::Jerk,
            "spiral" => MotionLaw::Spiral,
            _ => MotionLaw::Flow,
        }
    }

    /// Law name
    pub fn as_str(&self) -> &'static str {
        match self {
            MotionLaw::Flow => "flow",
            MotionLaw::Sine => "sine",
            MotionLaw::Jerk => "jerk",
            MotionLaw::Spiral => "spiral",
        }
    }
}

/// Laws eligible per tick. One entry means no per-tick draw is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub struct MotionSelection(Vec<MotionLaw>);

impl MotionSelection {
    /// Single law
    pub fn single(law: MotionLaw) -> Self {
        Self(vec![law])
    }

    /// All four laws
    pub fn random() -> Self {
        Self(MotionLaw::ALL.to_vec())
    }

    /// Parse `random`, a comma-separated list, or a single name
    pub fn parse(s: &str) -> Self {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered == "random" || lowered == "rand" {
            return Self::random();
        }
        let laws: Vec<MotionLaw> = lowered
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(MotionLaw::parse)
            .collect();
        if laws.is_empty() {
            Self::single(MotionLaw::Flow)
        } else {
            Self(laws)
        }
    }

    /// Eligible laws
    pub fn laws(&self) -> &[MotionLaw] {
        &self.0
    }
}

impl Default for MotionSelection {
    fn default() -> Self {
        Self::random()
    }
}

impl fmt::Display for MotionSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == MotionLaw::ALL {
            return f.write_str("random");
        }
        let names: Vec<&str> = self.0.iter().map(MotionLaw::as_str).collect();
        f.write_str(&names.join(","))
    }
}

impl From<MotionSelection> for String {
    fn from(selection: MotionSelection) -> Self {
        selection.to_string()
    }
}

impl From<String> for MotionSelection {
    fn from(s: String) -> Self {
        MotionSelection::parse(&s)
    }
}

/// Motion tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionParams {
    /// Eligible laws
    pub law: MotionSelection,
    /// Impulse strength, 0..=2
    pub sharpness: f64,
    /// Damping / amplitude, 0..=2
    pub smoothness: f64,
    /// Initial and maximum speed scale, 0..=3
    pub speed_scale: f64,
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            law: MotionSelection::default(),
            sharpness: 1.0,
            smoothness: 1.0,
            speed_scale: 1.0,
        }
    }
}

/// Simulation parameters. Always recorded in normalized form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Number of movers
    pub point_count: usize,
    /// Number of ticks
    pub iterations: usize,
    /// Canvas width
    pub canvas_width: u32,
    /// Canvas height
    pub canvas_height: u32,
    /// Rendering stroke width (carried into the trajectory only)
    pub pixel_width: u32,
    /// Time advanced per tick
    pub step: f64,
    /// Motion tuning
    pub motion: MotionParams,
}

impl SimulationParams {
    /// Upper bound on movers
    pub const MAX_POINT_COUNT: usize = 1024;
    /// Upper bound on ticks
    pub const MAX_ITERATIONS: usize = 200_000;
    /// Upper bound on either canvas side
    pub const MAX_CANVAS: u32 = 16_384;
    /// Step used when the requested step is not positive
    pub const DEFAULT_STEP: f64 = 0.01;

    /// Clamp every field into its safe range
    pub fn normalized(&self) -> Self {
        let law = if self.motion.law.laws().is_empty() {
            MotionSelection::single(MotionLaw::Flow)
        } else {
            self.motion.law.clone()
        };
        let step = if self.step.is_finite() && self.step > 0.0 {
            self.step
        } else {
            Self::DEFAULT_STEP
        };

        Self {
            point_count: self.point_count.clamp(1, Self::MAX_POINT_COUNT),
            iterations: self.iterations.clamp(1, Self::MAX_ITERATIONS),
            canvas_width: self.canvas_width.clamp(1, Self::MAX_CANVAS),
            canvas_height: self.canvas_height.clamp(1, Self::MAX_CANVAS),
            pixel_width: self.pixel_width.clamp(1, 64),
            step,
            motion: MotionParams {
                law,
                sharpness: finite_or(self.motion.sharpness, 1.0).clamp(0.0, 2.0),
                smoothness: finite_or(self.motion.smoothness, 1.0).clamp(0.0, 2.0),
                speed_scale: finite_or(self.motion.speed_scale, 1.0).clamp(0.0, 3.0),
            },
        }
    }
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            point_count: 20,
            iterations: 6000,
            canvas_width: 1024,
            canvas_height: 1024,
            pixel_width: 4,
            step: Self::DEFAULT_STEP,
            motion: MotionParams::default(),
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Canvas coordinate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Xy {
    /// Horizontal position
    pub x: f64,
    /// Vertical position
    pub y: f64,
}

/// One mover's recorded path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointTrace {
    /// Mover index
    pub id: usize,
    /// Stroke colour (`#RRGGBB`)
    pub color: String,
    /// Stroke width
    pub pixel_width: u32,
    /// Position after every tick
    pub path: Vec<Xy>,
}

/// Full simulation output consumed by renderers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Canvas width
    pub canvas_width: u32,
    /// Canvas height
    pub canvas_height: u32,
    /// Per-mover paths, in mover order
    pub points: Vec<PointTrace>,
}

/// Persisted description of a simulation run (no paths)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    /// Canvas width
    pub canvas_width: u32,
    /// Canvas height
    pub canvas_height: u32,
    /// Ticks
    pub iterations: usize,
    /// Movers
    pub point_count: usize,
    /// Time step
    pub step: f64,
    /// Law selection as requested
    pub motion_law: String,
    /// Clamped sharpness
    pub sharpness: f64,
    /// Clamped smoothness
    pub smoothness: f64,
    /// Clamped speed scale
    pub speed_scale: f64,
    /// Provenance tag of the seed
    pub entropy_tag: String,
}

impl SimulationSummary {
    /// Summarize normalized params
    pub fn new(params: &SimulationParams, entropy_tag: impl Into<String>) -> Self {
        Self {
            canvas_width: params.canvas_width,
            canvas_height: params.canvas_height,
            iterations: params.iterations,
            point_count: params.point_count,
            step: params.step,
            motion_law: params.motion.law.to_string(),
            sharpness: params.motion.sharpness,
            smoothness: params.motion.smoothness,
            speed_scale: params.motion.speed_scale,
            entropy_tag: entropy_tag.into(),
        }
    }
}

/// Everything needed to replay a Transaction exactly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Entropy specification as requested
    pub entropy_spec: EntropySpec,
    /// Human-readable seed provenance tag
    pub entropy_tag: String,
    /// Degraded steps taken during seed derivation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entropy_fallbacks: Vec<EntropyFallback>,
    /// Normalized simulation parameters
    pub motion_params: SimulationParams,
    /// Whitening strategy
    pub whitening_mode: WhiteningMode,
    /// Per-endpoint sub-seeds (Mixed mode only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_seeds: SubSeeds,
}

/// One generation, committed to the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction ID
    pub id: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Requested bitstream length
    pub requested_bit_count: usize,
    /// Master seed
    pub master_seed: MasterSeed,
    /// Simulation description
    pub simulation_summary: SimulationSummary,
    /// Hex SHA-256 of the path digest
    pub data_hash: String,
    /// Hex SHA-256 of the bitstream (one byte per bit)
    pub bits_hash: String,
    /// Hex chain-level commitment over bits_hash and data_hash
    pub published: String,
    /// Replay parameters
    pub provenance: Provenance,
    /// Live-only simulation output; never persisted
    #[serde(skip)]
    pub trajectory: Option<Arc<Trajectory>>,
}

impl Transaction {
    /// Listing view without the trajectory
    pub fn summary(&self) -> TransactionSummary {
        TransactionSummary {
            id: self.id,
            created_at: self.created_at,
            requested_bit_count: self.requested_bit_count,
            master_seed: self.master_seed,
            data_hash: self.data_hash.clone(),
            bits_hash: self.bits_hash.clone(),
            published: self.published.clone(),
            provenance: self.provenance.clone(),
        }
    }
}

/// Transaction listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Transaction ID
    pub id: Uuid,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Requested bitstream length
    pub requested_bit_count: usize,
    /// Master seed
    pub master_seed: MasterSeed,
    /// Hex data hash
    pub data_hash: String,
    /// Hex bits hash
    pub bits_hash: String,
    /// Hex published hash
    pub published: String,
    /// Replay parameters
    pub provenance: Provenance,
}

/// Hash-chained anchor for one Transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Position in the chain
    pub index: usize,
    /// Unix seconds at append time
    pub timestamp: i64,
    /// Anchored transaction
    pub tx_id: Uuid,
    /// Copy of the transaction's published hash
    pub data_hash: String,
    /// Hash of the previous block, empty for the first block
    pub prev_hash: String,
    /// Hash of this block's fields
    pub hash: String,
}

impl Block {
    /// Compute block hash: SHA-256 over `index:timestamp:tx_id:data_hash:prev_hash`
    pub fn compute_hash(&self) -> String {
        crate::crypto::block_hash(
            self.index,
            self.timestamp,
            &self.tx_id,
            &self.data_hash,
            &self.prev_hash,
        )
    }
}

/// Ordered single-bit values (each element is 0 or 1)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bitstream(Vec<u8>);

impl Bitstream {
    /// Unpack `bit_count` bits MSB-first from `bytes`.
    ///
    /// `bytes` must hold at least `ceil(bit_count / 8)` bytes.
    pub fn from_msb_bytes(bytes: &[u8], bit_count: usize) -> Self {
        let mut bits = Vec::with_capacity(bit_count);
        'outer: for byte in bytes {
            for shift in (0..8).rev() {
                if bits.len() == bit_count {
                    break 'outer;
                }
                bits.push((byte >> shift) & 1);
            }
        }
        Self(bits)
    }

    /// Number of bits
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for a zero-length stream
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One byte (0 or 1) per bit
    pub fn as_bits(&self) -> &[u8] {
        &self.0
    }

    /// Pack MSB-first; unused low bits of the last byte are zero
    pub fn pack(&self) -> Vec<u8> {
        let mut packed = vec![0u8; self.0.len().div_ceil(8)];
        for (i, bit) in self.0.iter().enumerate() {
            packed[i / 8] |= *bit << (7 - (i % 8));
        }
        packed
    }

    /// `'0'`/`'1'` text rendering
    pub fn to_bit_string(&self) -> String {
        self.0.iter().map(|b| if *b == 0 { '0' } else { '1' }).collect()
    }
}
