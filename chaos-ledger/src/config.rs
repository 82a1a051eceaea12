//! Configuration for the ledger node and the generation pipeline

use crate::expand::OutputFormat;
use crate::generator::GenerateRequest;
use crate::types::{EntropySpec, MotionParams, MotionSelection, SimulationParams, WhiteningMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// JSON snapshot location
    pub store_path: PathBuf,

    /// Entropy source configuration
    pub entropy: EntropyConfig,

    /// Defaults applied to generation requests
    pub generation: GenerationDefaults,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "chaos-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            store_path: PathBuf::from("./data/store.json"),
            entropy: EntropyConfig::default(),
            generation: GenerationDefaults::default(),
        }
    }
}

/// Entropy source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Remote endpoints used when a request names none
    pub default_urls: Vec<String>,

    /// Per-URL fetch timeout (milliseconds)
    pub http_timeout_ms: u64,

    /// Jitter rounds for the `TimingJitter` mode
    pub jitter_rounds: usize,

    /// Jitter rounds mixed into the `Mixed` mode
    pub mix_jitter_rounds: usize,

    /// OS random bytes mixed into the `Mixed` mode
    pub mix_os_bytes: usize,
}

impl EntropyConfig {
    /// Fetch timeout as a `Duration`
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            default_urls: Vec::new(),
            http_timeout_ms: 3_000,
            jitter_rounds: 32,
            mix_jitter_rounds: 48,
            mix_os_bytes: 32,
        }
    }
}

/// Defaults for generation requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults {
    /// Bits per generation
    pub bit_count: usize,

    /// Hard cap on requested bits
    pub max_bit_count: usize,

    /// Canvas width
    pub canvas_width: u32,

    /// Canvas height
    pub canvas_height: u32,

    /// Simulation ticks
    pub iterations: usize,

    /// Movers
    pub point_count: usize,

    /// Stroke width carried into trajectories
    pub pixel_width: u32,

    /// Time step
    pub step: f64,

    /// Motion law selection (`random`, a name, or a comma list)
    pub motion_law: String,

    /// Sharpness
    pub sharpness: f64,

    /// Smoothness
    pub smoothness: f64,

    /// Speed scale
    pub speed_scale: f64,

    /// Whitening mode
    pub whitening: WhiteningMode,

    /// Entropy mode name (`os`, `jitter`, `http`, `mix`)
    pub entropy_mode: String,

    /// Extraction format name (`hex`, `raw`, `bin`)
    pub output_format: String,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            bit_count: 1_000_000,
            max_bit_count: 64 * 1_000_000,
            canvas_width: 1024,
            canvas_height: 1024,
            iterations: 6_000,
            point_count: 20,
            pixel_width: 4,
            step: 0.01,
            motion_law: "random".to_string(),
            sharpness: 1.0,
            smoothness: 1.0,
            speed_scale: 1.0,
            whitening: WhiteningMode::AesCounter,
            entropy_mode: "mix".to_string(),
            output_format: "hex".to_string(),
        }
    }
}

impl GenerationDefaults {
    /// Simulation parameters from the defaults
    pub fn simulation_params(&self) -> SimulationParams {
        SimulationParams {
            point_count: self.point_count,
            iterations: self.iterations,
            canvas_width: self.canvas_width,
            canvas_height: self.canvas_height,
            pixel_width: self.pixel_width,
            step: self.step,
            motion: MotionParams {
                law: MotionSelection::parse(&self.motion_law),
                sharpness: self.sharpness,
                smoothness: self.smoothness,
                speed_scale: self.speed_scale,
            },
        }
    }

    /// A request that uses every default with the given entropy spec
    pub fn request(&self, entropy: EntropySpec) -> GenerateRequest {
        GenerateRequest {
            bit_count: self.bit_count,
            entropy,
            simulation: self.simulation_params(),
            whitening: self.whitening,
        }
    }

    /// Entropy spec for the configured mode; a seed forces reproduction
    pub fn entropy_spec(&self, seed: Option<i64>, urls: Vec<String>) -> EntropySpec {
        EntropySpec::from_parts(&self.entropy_mode, seed, urls)
    }

    /// Configured extraction format
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::parse(&self.output_format)
    }

    /// Map a loosely typed bit count onto a usable one
    ///
    /// Negative values select the default; values above the cap are clamped.
    pub fn normalize_bit_count(&self, requested: i64) -> usize {
        if requested < 0 {
            return self.bit_count.min(self.max_bit_count);
        }
        usize::try_from(requested)
            .unwrap_or(usize::MAX)
            .min(self.max_bit_count)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(path) = std::env::var("CHAOS_STORE_PATH") {
            config.store_path = PathBuf::from(path);
        }

        if let Ok(urls) = std::env::var("CHAOS_ENTROPY_URLS") {
            config.entropy.default_urls = urls
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(timeout) = std::env::var("CHAOS_HTTP_TIMEOUT_MS") {
            config.entropy.http_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid CHAOS_HTTP_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(mode) = std::env::var("CHAOS_WHITENING") {
            config.generation.whitening = WhiteningMode::parse(&mode);
        }

        if let Ok(law) = std::env::var("CHAOS_MOTION_LAW") {
            config.generation.motion_law = law;
        }

        if let Ok(mode) = std::env::var("CHAOS_ENTROPY_MODE") {
            config.generation.entropy_mode = mode;
        }

        if let Ok(format) = std::env::var("CHAOS_OUTPUT_FORMAT") {
            config.generation.output_format = format;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "chaos-ledger");
        assert!(config.entropy.default_urls.is_empty());
        assert_eq!(config.entropy.http_timeout(), Duration::from_secs(3));
        assert_eq!(config.generation.whitening, WhiteningMode::AesCounter);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            store_path = "/tmp/ledger.json"

            [generation]
            bit_count = 4096
            whitening = "lfsr_whitened"
            "#,
        )
        .unwrap();

        assert_eq!(config.store_path, PathBuf::from("/tmp/ledger.json"));
        assert_eq!(config.generation.bit_count, 4096);
        assert_eq!(config.generation.whitening, WhiteningMode::LfsrWhitened);
        assert_eq!(config.generation.iterations, 6_000);
        assert_eq!(config.entropy.jitter_rounds, 32);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "service_name = \"edge\"\n[entropy]\nhttp_timeout_ms = 500\n")
            .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.service_name, "edge");
        assert_eq!(config.entropy.http_timeout_ms, 500);

        std::fs::write(&path, "service_name = [").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_normalize_bit_count() {
        let defaults = GenerationDefaults::default();
        assert_eq!(defaults.normalize_bit_count(-1), 1_000_000);
        assert_eq!(defaults.normalize_bit_count(0), 0);
        assert_eq!(defaults.normalize_bit_count(64), 64);
        assert_eq!(
            defaults.normalize_bit_count(i64::MAX),
            defaults.max_bit_count
        );
    }

    #[test]
    fn test_defaults_request() {
        let defaults = GenerationDefaults::default();
        let request = defaults.request(EntropySpec::Reproduce { seed: 9 });
        assert_eq!(request.bit_count, 1_000_000);
        assert_eq!(request.simulation.point_count, 20);
        assert_eq!(request.simulation.motion.law, MotionSelection::random());
    }

    #[test]
    fn test_entropy_mode_and_output_format_names() {
        let config: Config = toml::from_str(
            r#"
            [generation]
            entropy_mode = "jitter"
            output_format = "bin"
            "#,
        )
        .unwrap();
        let generation = &config.generation;

        assert_eq!(generation.entropy_spec(None, vec![]), EntropySpec::TimingJitter);
        assert_eq!(generation.entropy_spec(None, vec![]).mode_name(), "jitter");
        assert_eq!(
            generation.entropy_spec(Some(5), vec![]),
            EntropySpec::Reproduce { seed: 5 }
        );
        assert_eq!(generation.output_format(), OutputFormat::BitString);

        let defaults = GenerationDefaults::default();
        let urls = vec!["http://a".to_string()];
        assert_eq!(
            defaults.entropy_spec(None, urls.clone()),
            EntropySpec::Mixed { urls }
        );
        assert_eq!(defaults.output_format(), OutputFormat::Hex);
    }
}
