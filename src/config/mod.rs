use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

const DEFAULT_PROMOTE_THRESHOLD: u32 = 3;
const DEFAULT_DEMOTE_THRESHOLD: u32 = 2;
const DEFAULT_MIN_ATTEMPTS: u32 = 3;
const DEFAULT_HIGH_CONFIDENCE: f64 = 0.8;
const DEFAULT_BOOST_FACTOR: f64 = 0.05;
const DEFAULT_MAX_HISTORY_DEPTH: usize = 10;
const DEFAULT_MAX_BISECT_ITERATIONS: u32 = 50;
const DEFAULT_MAX_FIX_ATTEMPTS: u32 = 2;
const DEFAULT_PROBE_TIMEOUT_S: u64 = 120;
const DEFAULT_MIN_SOURCE_FRACTION: f64 = 0.5;
const DEFAULT_FIX_TIMEOUT_S: u64 = 300;

// ─── LearningConfig ───────────────────────────────────────────────────────────

/// Pattern promotion/demotion thresholds (`[learning]` in recovery.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Consecutive successes required to promote a pattern (default: 3).
    pub promote_threshold: u32,
    /// Consecutive failures that demote a promoted pattern (default: 2).
    pub demote_threshold: u32,
    /// Minimum recorded attempts before the failure-majority demotion rule
    /// applies (default: 3).
    pub min_attempts: u32,
    /// Adjusted confidence at or above which an error is auto-fixable
    /// (default: 0.8).
    pub high_confidence_threshold: f64,
    /// Per-unit success-rate confidence boost. Small enough that boosting
    /// alone cannot cross `high_confidence_threshold` without promotion
    /// (default: 0.05).
    pub boost_factor: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            promote_threshold: DEFAULT_PROMOTE_THRESHOLD,
            demote_threshold: DEFAULT_DEMOTE_THRESHOLD,
            min_attempts: DEFAULT_MIN_ATTEMPTS,
            high_confidence_threshold: DEFAULT_HIGH_CONFIDENCE,
            boost_factor: DEFAULT_BOOST_FACTOR,
        }
    }
}

// ─── HistoryConfig ────────────────────────────────────────────────────────────

/// Revision search / fault isolation caps (`[history]` in recovery.toml).
///
/// Both caps bound worst-case wall-clock cost: every step runs a full build.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// How many revisions back the last-good search walks (default: 10).
    pub max_search_depth: usize,
    /// Hard cap on bisection iterations (default: 50).
    pub max_bisect_iterations: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_search_depth: DEFAULT_MAX_HISTORY_DEPTH,
            max_bisect_iterations: DEFAULT_MAX_BISECT_ITERATIONS,
        }
    }
}

// ─── ProbeConfig ──────────────────────────────────────────────────────────────

/// Build probe command (`[probe]` in recovery.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Compiler/checker executable (default: "javac").
    pub command: String,
    /// Arguments appended before the artifact path.
    pub args: Vec<String>,
    /// Per-invocation timeout in seconds; a timed-out probe is a failed step,
    /// never retried indefinitely (default: 120).
    pub timeout_s: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            command: "javac".to_string(),
            args: vec![],
            timeout_s: DEFAULT_PROBE_TIMEOUT_S,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

// ─── FixConfig ────────────────────────────────────────────────────────────────

/// Fix-suggestion service limits (`[fix]` in recovery.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FixConfig {
    /// Maximum fix-service attempts per recovery run (default: 2).
    pub max_attempts: u32,
    /// A candidate shorter than this fraction of the original source is
    /// rejected as having dropped unrelated code (default: 0.5).
    pub min_source_fraction: f64,
    /// Timeout per fix-service call in seconds; a timed-out call is a failed
    /// attempt (default: 300).
    pub timeout_s: u64,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_FIX_ATTEMPTS,
            min_source_fraction: DEFAULT_MIN_SOURCE_FRACTION,
            timeout_s: DEFAULT_FIX_TIMEOUT_S,
        }
    }
}

impl FixConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/recovery.toml` — all sections are optional overrides.
/// Priority: env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    learning: Option<LearningConfig>,
    history: Option<HistoryConfig>,
    probe: Option<ProbeConfig>,
    fix: Option<FixConfig>,
    /// Override for the SQLite database path (default: `{data_dir}/buildmend.db`).
    db_path: Option<PathBuf>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("recovery.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse recovery.toml — using defaults");
            None
        }
    }
}

// ─── RecoveryConfig ───────────────────────────────────────────────────────────

/// Full configuration for one recovery engine instance.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub data_dir: PathBuf,
    /// SQLite database holding patterns and change-request tracking.
    pub db_path: PathBuf,
    pub learning: LearningConfig,
    pub history: HistoryConfig,
    pub probe: ProbeConfig,
    pub fix: FixConfig,
}

impl RecoveryConfig {
    /// Build config from the optional TOML file under `data_dir`.
    ///
    /// Priority (highest to lowest):
    ///   1. Env vars (`BUILDMEND_DB_PATH`, `BUILDMEND_PROBE_COMMAND`)
    ///   2. TOML file at `{data_dir}/recovery.toml`
    ///   3. Built-in defaults
    pub fn load(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let toml = load_toml(&data_dir).unwrap_or_default();

        let db_path = std::env::var("BUILDMEND_DB_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or(toml.db_path)
            .unwrap_or_else(|| data_dir.join("buildmend.db"));

        let mut probe = toml.probe.unwrap_or_default();
        if let Ok(cmd) = std::env::var("BUILDMEND_PROBE_COMMAND") {
            if !cmd.is_empty() {
                probe.command = cmd;
            }
        }

        Self {
            data_dir,
            db_path,
            learning: toml.learning.unwrap_or_default(),
            history: toml.history.unwrap_or_default(),
            probe,
            fix: toml.fix.unwrap_or_default(),
        }
    }

    /// Config with built-in defaults rooted at `data_dir` — no file or env
    /// lookups. Used by tests and embedders that configure programmatically.
    pub fn with_defaults(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let db_path = data_dir.join("buildmend.db");
        Self {
            data_dir,
            db_path,
            learning: LearningConfig::default(),
            history: HistoryConfig::default(),
            probe: ProbeConfig::default(),
            fix: FixConfig::default(),
        }
    }
}
