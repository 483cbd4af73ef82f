//! TOML configuration for hilbench campaigns.
//!
//! A layered configuration model with sensible defaults, an environment
//! variable override for the config file path, and a standard filesystem
//! location. Every section may be omitted.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::campaign::Category;
use crate::collect::DEFAULT_RECORD_CAP;
use crate::pacing::PacingConfig;
use crate::platform::sim::SimConfig;
use crate::platform::SampleSelector;
use crate::session::{DEFAULT_FIXED_STEP_MS, DEFAULT_SCHEDULE_TYPE};
use crate::stimulus::GeneratorProfile;
use crate::topology::layout::{StringShape, TypePair, ANALOG_MESSAGE_LENGTH};
use crate::topology::message::Protocol;
use crate::topology::{CvtType, RawType};
use crate::validate::DEFAULT_TOLERANCE;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "HILBENCH_CONFIG";

/// System-wide config location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/hilbench/hilbench.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for a campaign run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CampaignConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub constants: ConstantsConfig,
    #[serde(default)]
    pub strings: StringsConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub campaign: RunConfig,
    #[serde(default)]
    pub sim: SimConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CampaignConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.display()))
    }

    /// Pick the campaign configuration.
    ///
    /// An explicit `--config` path must load. Otherwise `$HILBENCH_CONFIG`,
    /// then `/etc/hilbench/hilbench.toml`, then compiled-in defaults; a
    /// candidate that exists but fails to load is recorded in
    /// [`ResolvedConfig::skipped`] and the next one is tried.
    ///
    /// Nothing is logged here: this runs before the subscriber exists, so
    /// the caller reports the outcome with [`ResolvedConfig::log`].
    pub fn resolve(explicit: Option<&Path>) -> Result<ResolvedConfig> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::resolve_from(explicit, env_path, Path::new(SYSTEM_CONFIG_PATH))
    }

    fn resolve_from(explicit: Option<&Path>, env_path: Option<PathBuf>, system_path: &Path) -> Result<ResolvedConfig> {
        if let Some(path) = explicit {
            return Ok(ResolvedConfig {
                config: Self::load(path)?,
                source: ConfigSource::Explicit(path.to_path_buf()),
                skipped: Vec::new(),
            });
        }

        let mut skipped = Vec::new();
        let mut candidates = Vec::with_capacity(2);
        if let Some(path) = env_path {
            candidates.push(ConfigSource::Env(path));
        }
        if system_path.exists() {
            candidates.push(ConfigSource::System(system_path.to_path_buf()));
        }

        for source in candidates {
            let Some(path) = source.path() else {
                continue;
            };
            match Self::load(path) {
                Ok(config) => {
                    return Ok(ResolvedConfig {
                        config,
                        source,
                        skipped,
                    })
                }
                Err(e) => skipped.push(SkippedConfig {
                    path: path.to_path_buf(),
                    reason: format!("{e:#}"),
                }),
            }
        }

        Ok(ResolvedConfig {
            config: Self::default(),
            source: ConfigSource::Defaults,
            skipped,
        })
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// `--config` on the command line.
    Explicit(PathBuf),
    /// `$HILBENCH_CONFIG`.
    Env(PathBuf),
    System(PathBuf),
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ConfigSource::Explicit(p) | ConfigSource::Env(p) | ConfigSource::System(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Explicit(p) => write!(f, "--config {}", p.display()),
            ConfigSource::Env(p) => write!(f, "${CONFIG_ENV} {}", p.display()),
            ConfigSource::System(p) => write!(f, "{}", p.display()),
            ConfigSource::Defaults => write!(f, "compiled-in defaults"),
        }
    }
}

/// A config file that was found but could not be used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedConfig {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of [`CampaignConfig::resolve`].
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: CampaignConfig,
    pub source: ConfigSource,
    pub skipped: Vec<SkippedConfig>,
}

impl ResolvedConfig {
    /// Report skipped files and the chosen source. Call once tracing is up.
    pub fn log(&self) {
        for skip in &self.skipped {
            warn!(
                path = %skip.path.display(),
                error = %skip.reason,
                "config file could not be loaded, falling back"
            );
        }
        match self.source {
            ConfigSource::Defaults => debug!("no usable config file, using compiled-in defaults"),
            _ => info!(source = %self.source, "loaded campaign configuration"),
        }
    }
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// Where the platform and its data logger live.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Data logger host.
    pub host: String,
    pub project: String,
    /// Fixed step of created tests, in milliseconds.
    pub fixed_step_ms: u32,
    pub schedule_type: u32,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            project: "Hardware-Tests".to_string(),
            fixed_step_ms: DEFAULT_FIXED_STEP_MS,
            schedule_type: DEFAULT_SCHEDULE_TYPE,
        }
    }
}

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

/// Converted/raw pairs exercised by the analog categories, in run order.
pub fn default_type_pairs() -> Vec<TypePair> {
    vec![
        TypePair::new(CvtType::Char, RawType::Char),
        TypePair::new(CvtType::Short, RawType::Short),
        TypePair::new(CvtType::Int, RawType::Int),
        TypePair::new(CvtType::Llong, RawType::Llong),
        TypePair::new(CvtType::Float, RawType::Float),
        TypePair::new(CvtType::Double, RawType::Double),
        TypePair::new(CvtType::Uint, RawType::Llong),
        TypePair::new(CvtType::Uchar, RawType::Short),
        TypePair::new(CvtType::Ushort, RawType::Int),
    ]
}

/// Generator-driven analog loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub rtdb: String,
    pub test: String,
    pub types: Vec<TypePair>,
    pub protocols: Vec<Protocol>,
    /// Loops per topology; every count is run for every type and protocol.
    pub pair_counts: Vec<usize>,
    pub message_length: u32,
    pub tolerance: f64,
    pub record_cap: usize,
    pub selector: SampleSelector,
    pub generator: GeneratorProfile,
    /// Abort the category once more checks than this have failed.
    pub failure_budget: Option<usize>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            rtdb: "analog_val".to_string(),
            test: "analog".to_string(),
            types: default_type_pairs(),
            protocols: vec![Protocol::Tcp, Protocol::Udp],
            pair_counts: vec![2],
            message_length: ANALOG_MESSAGE_LENGTH,
            tolerance: DEFAULT_TOLERANCE,
            record_cap: DEFAULT_RECORD_CAP,
            selector: SampleSelector::AllSamples,
            generator: GeneratorProfile::default(),
            failure_budget: None,
        }
    }
}

/// Values written for one type pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstantCase {
    pub cvt: CvtType,
    pub raw: RawType,
    pub values: Vec<f64>,
}

/// Low, zero/mid and high values for each default type pair.
pub fn default_constant_cases() -> Vec<ConstantCase> {
    let values: [[f64; 3]; 9] = [
        [-128.0, 0.0, 127.0],
        [-32768.0, 0.0, 32767.0],
        [-2.1e9, 0.0, 2.1e9],
        [0.0, 9e5, 9e10],
        [-1.1e38, 0.0, 1.1e38],
        [-1.7e308, 0.0, 1.7e308],
        [0.0, 1e4, 4.2e9],
        [0.0, 128.0, 255.0],
        [0.0, 32767.0, 65535.0],
    ];
    default_type_pairs()
        .into_iter()
        .zip(values)
        .map(|(pair, values)| ConstantCase {
            cvt: pair.cvt,
            raw: pair.raw,
            values: values.to_vec(),
        })
        .collect()
}

/// Discrete writes read back from the live input point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConstantsConfig {
    pub rtdb: String,
    pub test: String,
    pub protocol: Protocol,
    pub cases: Vec<ConstantCase>,
    pub failure_budget: Option<usize>,
}

impl Default for ConstantsConfig {
    fn default() -> Self {
        Self {
            rtdb: "analog_val".to_string(),
            test: "analog".to_string(),
            protocol: Protocol::Tcp,
            cases: default_constant_cases(),
            failure_budget: None,
        }
    }
}

/// Packed string channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StringsConfig {
    pub rtdb: String,
    pub test: String,
    pub session: String,
    pub protocol: Protocol,
    pub shape: StringShape,
    /// Written round-robin across channels.
    pub candidates: Vec<String>,
    /// Passes over all channels.
    pub rounds: usize,
    pub failure_budget: Option<usize>,
}

impl Default for StringsConfig {
    fn default() -> Self {
        Self {
            rtdb: "string_val".to_string(),
            test: "string".to_string(),
            session: "test_string".to_string(),
            protocol: Protocol::Tcp,
            shape: StringShape::default(),
            candidates: ["abc", "def", "ghi", "jkl", "mno", "pqr", "stu"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            rounds: 10,
            failure_budget: Some(5),
        }
    }
}

// ---------------------------------------------------------------------------
// Campaign
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Categories run when none are given on the command line.
    pub categories: Vec<Category>,
    /// Stop and delete the session when an iteration fails fatally.
    pub teardown_on_error: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            categories: Category::ALL.to_vec(),
            teardown_on_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`),
    /// used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_campaign_matrix() {
        let cfg = CampaignConfig::default();

        assert_eq!(cfg.platform.host, "localhost");
        assert_eq!(cfg.platform.project, "Hardware-Tests");
        assert_eq!(cfg.platform.fixed_step_ms, 1000);
        assert_eq!(cfg.platform.schedule_type, 3);

        assert_eq!(cfg.signal.rtdb, "analog_val");
        assert_eq!(cfg.signal.types.len(), 9);
        assert_eq!(cfg.signal.types[6], TypePair::new(CvtType::Uint, RawType::Llong));
        assert_eq!(cfg.signal.protocols, [Protocol::Tcp, Protocol::Udp]);
        assert_eq!(cfg.signal.tolerance, 3.0);
        assert_eq!(cfg.signal.record_cap, 1100);

        let flat: Vec<f64> = cfg.constants.cases.iter().flat_map(|c| c.values.clone()).collect();
        assert_eq!(flat.len(), 27);
        assert_eq!(flat[11], 9e10);
        assert_eq!(flat[26], 65535.0);

        assert_eq!(cfg.strings.rtdb, "string_val");
        assert_eq!(cfg.strings.candidates.len(), 7);
        assert_eq!(cfg.strings.failure_budget, Some(5));

        assert_eq!(cfg.campaign.categories, Category::ALL);
        assert!(cfg.campaign.teardown_on_error);
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_parse_bench_overrides() {
        let toml_str = r#"
[platform]
host = "hil-rack-2"
project = "Bench"

[signal]
protocols = ["udp"]
pair_counts = [1, 2]
tolerance = 0.5
selector = { every_nth = 4 }

[[signal.types]]
cvt = "int"
raw = "int"

[signal.generator]
waveforms = ["square"]
frequency = 5.0

[[constants.cases]]
cvt = "llong"
raw = "llong"
values = [9e10]

[strings]
rounds = 2
candidates = ["xyz"]

[pacing]
string_settle_ms = 0

[campaign]
categories = ["strings"]
teardown_on_error = false

[sim]
jitter = 0.25

[logging]
level = "debug"
format = "json"
"#;

        let cfg: CampaignConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(cfg.platform.host, "hil-rack-2");
        assert_eq!(cfg.platform.fixed_step_ms, 1000);
        assert_eq!(cfg.signal.protocols, [Protocol::Udp]);
        assert_eq!(cfg.signal.pair_counts, [1, 2]);
        assert_eq!(cfg.signal.selector, SampleSelector::EveryNth(4));
        assert_eq!(cfg.signal.types, [TypePair::new(CvtType::Int, RawType::Int)]);
        assert_eq!(cfg.signal.generator.frequency, 5.0);
        assert_eq!(cfg.signal.generator.amplitude, 1.0);
        assert_eq!(cfg.constants.cases[0].values, [9e10]);
        assert_eq!(cfg.strings.rounds, 2);
        assert_eq!(cfg.strings.session, "test_string");
        assert_eq!(cfg.pacing.string_settle_ms, 0);
        assert_eq!(cfg.pacing.after_start_ms, 1000);
        assert_eq!(cfg.campaign.categories, [Category::Strings]);
        assert!(!cfg.campaign.teardown_on_error);
        assert_eq!(cfg.sim.jitter, 0.25);
        assert_eq!(cfg.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: CampaignConfig = toml::from_str("").unwrap();
        let defaults = CampaignConfig::default();

        assert_eq!(cfg.signal.types, defaults.signal.types);
        assert_eq!(cfg.constants.cases, defaults.constants.cases);
        assert_eq!(cfg.pacing, defaults.pacing);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hilbench.toml");
        std::fs::write(
            &path,
            r#"
[strings]
rounds = 3
"#,
        )
        .unwrap();

        let cfg = CampaignConfig::load(&path).unwrap();
        assert_eq!(cfg.strings.rounds, 3);

        let resolved = CampaignConfig::resolve(Some(&path)).unwrap();
        assert_eq!(resolved.config.strings.rounds, 3);
        assert_eq!(resolved.source, ConfigSource::Explicit(path.clone()));
        assert!(resolved.skipped.is_empty());
    }

    #[test]
    fn test_explicit_missing_config_is_fatal() {
        let result = CampaignConfig::load(Path::new("/nonexistent/path/hilbench.toml"));
        assert!(result.is_err());
        assert!(CampaignConfig::resolve(Some(Path::new("/nonexistent/hilbench.toml"))).is_err());
    }

    #[test]
    fn test_env_config_falls_back_to_system_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let bad = dir.path().join("bad.toml");
        let system = dir.path().join("system.toml");
        std::fs::write(&bad, "[signal\n").unwrap();
        std::fs::write(&system, "[signal]\ntolerance = 0.5\n").unwrap();

        let resolved = CampaignConfig::resolve_from(None, Some(bad.clone()), &system).unwrap();
        assert_eq!(resolved.source, ConfigSource::System(system));
        assert_eq!(resolved.config.signal.tolerance, 0.5);
        assert_eq!(resolved.skipped.len(), 1);
        assert_eq!(resolved.skipped[0].path, bad);
        assert!(resolved.skipped[0].reason.contains("failed to parse config file"));
    }

    #[test]
    fn test_unreadable_configs_fall_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("missing.toml");
        let no_system = dir.path().join("absent.toml");

        let resolved = CampaignConfig::resolve_from(None, Some(missing.clone()), &no_system).unwrap();
        assert_eq!(resolved.source, ConfigSource::Defaults);
        assert_eq!(resolved.skipped.len(), 1);
        assert!(resolved.skipped[0].reason.contains("failed to read config file"));
        assert_eq!(resolved.config.signal.types, CampaignConfig::default().signal.types);

        let quiet = CampaignConfig::resolve_from(None, None, &no_system).unwrap();
        assert_eq!(quiet.source, ConfigSource::Defaults);
        assert!(quiet.skipped.is_empty());
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[signal]\ntolerance = \"wide\"\n").unwrap();
        let err = CampaignConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse config file"));
    }

    #[test]
    fn test_printed_config_reloads() {
        let cfg = CampaignConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let roundtripped: CampaignConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(cfg.signal.types, roundtripped.signal.types);
        assert_eq!(cfg.constants.cases, roundtripped.constants.cases);
        assert_eq!(cfg.strings.failure_budget, roundtripped.strings.failure_budget);
        assert_eq!(cfg.pacing, roundtripped.pacing);
    }
}
