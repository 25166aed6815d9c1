//! Configuration management for the statistics monitor.
//!
//! Configuration is loaded from environment variables, falling back to a `.env`
//! file in the working directory. Integer parameters carry declared bounds and
//! are rejected by [`Config::validate`] before a store is built from them; the
//! store trusts every value it reads afterwards.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

/// Hard upper bound on the number of time buckets.
pub const MAX_BUCKETS: usize = 10;

/// Number of response-time histogram counters per entry.
pub const MAX_RESPONSE_BUCKET: usize = 10;

const MIB: usize = 1024 * 1024;

/// Main configuration struct for the statistics monitor
#[derive(Debug, Clone, PartialEq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Config {
    /// Memory ceiling for the entry table, in MiB.
    pub max_memory_mb: u64,
    /// Longest query text stored in the arena, in bytes.
    pub query_max_len: u64,
    pub enabled: bool,
    pub track_utility: bool,
    /// Store the normalized form of registered query text.
    pub normalized_query: bool,
    pub max_buckets: u64,
    /// Bucket lifetime in seconds; 0 disables time-based rotation.
    pub bucket_time_secs: u64,
    pub respose_time_lower_bound_ms: u64,
    pub respose_time_step_ms: u64,
    /// Text arena size across all buckets, in MiB.
    pub query_shared_buffer_mb: u64,
    pub track_planning: bool,

    /// Share of the table freed by one ranked eviction pass.
    pub dealloc_percent: u64,
    /// Explicit entry ceiling, replacing the one derived from `max_memory_mb`.
    pub max_entries_override: Option<usize>,
    /// Explicit per-bucket arena size, replacing the one derived from
    /// `query_shared_buffer_mb`.
    pub text_bytes_per_bucket_override: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_memory_mb: 100,
            query_max_len: 1024,
            enabled: true,
            track_utility: true,
            normalized_query: true,
            max_buckets: 10,
            bucket_time_secs: 60,
            respose_time_lower_bound_ms: 1,
            respose_time_step_ms: 1,
            query_shared_buffer_mb: 20,
            track_planning: true,
            dealloc_percent: 5,
            max_entries_override: None,
            text_bytes_per_bucket_override: None,
        }
    }
}

/// Descriptor for one tunable, as shown by the reporting surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigParam {
    pub name: &'static str,
    pub env_key: &'static str,
    pub description: &'static str,
    pub value: i64,
    pub default: i64,
    pub min: i64,
    pub max: i64,
    pub requires_restart: bool,
}

const I32_MAX: i64 = i32::MAX as i64;

impl Config {
    /// Load configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.max_memory_mb = env_u64("STAT_MONITOR_MAX_MB", config.max_memory_mb);
        config.query_max_len = env_u64("STAT_MONITOR_QUERY_MAX_LEN", config.query_max_len);
        config.enabled = env_bool("STAT_MONITOR_ENABLE", config.enabled);
        config.track_utility = env_bool("STAT_MONITOR_TRACK_UTILITY", config.track_utility);
        config.normalized_query =
            env_bool("STAT_MONITOR_NORMALIZED_QUERY", config.normalized_query);
        config.max_buckets = env_u64("STAT_MONITOR_MAX_BUCKETS", config.max_buckets);
        config.bucket_time_secs = env_u64("STAT_MONITOR_BUCKET_TIME", config.bucket_time_secs);
        config.respose_time_lower_bound_ms = env_u64(
            "STAT_MONITOR_RESPONSE_TIME_LOWER_BOUND",
            config.respose_time_lower_bound_ms,
        );
        config.respose_time_step_ms =
            env_u64("STAT_MONITOR_RESPONSE_TIME_STEP", config.respose_time_step_ms);
        config.query_shared_buffer_mb = env_u64(
            "STAT_MONITOR_QUERY_SHARED_BUFFER",
            config.query_shared_buffer_mb,
        );
        config.track_planning = env_bool("STAT_MONITOR_TRACK_PLANNING", config.track_planning);
        config.dealloc_percent = env_u64("STAT_MONITOR_DEALLOC_PERCENT", config.dealloc_percent);
        config.max_entries_override = env_usize_opt("STAT_MONITOR_MAX_ENTRIES");
        config.text_bytes_per_bucket_override =
            env_usize_opt("STAT_MONITOR_TEXT_BYTES_PER_BUCKET");

        config
    }

    /// Load from the environment and validate in one step.
    pub fn load() -> Result<Self> {
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    /// The tunable parameter table with current values and declared bounds.
    #[must_use]
    pub fn parameters(&self) -> Vec<ConfigParam> {
        let defaults = Self::default();
        vec![
            param(
                "max_memory_mb",
                "STAT_MONITOR_MAX_MB",
                "Maximum memory for the statistics table, in MiB.",
                self.max_memory_mb,
                defaults.max_memory_mb,
                1,
                1000,
                true,
            ),
            param(
                "query_max_len",
                "STAT_MONITOR_QUERY_MAX_LEN",
                "Longest query text retained, in bytes.",
                self.query_max_len,
                defaults.query_max_len,
                1024,
                I32_MAX,
                true,
            ),
            flag(
                "enabled",
                "STAT_MONITOR_ENABLE",
                "Enable or disable statistics collection.",
                self.enabled,
                defaults.enabled,
                false,
            ),
            flag(
                "track_utility",
                "STAT_MONITOR_TRACK_UTILITY",
                "Record utility (non-DML) statements.",
                self.track_utility,
                defaults.track_utility,
                false,
            ),
            flag(
                "normalized_query",
                "STAT_MONITOR_NORMALIZED_QUERY",
                "Store query text with literals replaced by placeholders.",
                self.normalized_query,
                defaults.normalized_query,
                false,
            ),
            param(
                "max_buckets",
                "STAT_MONITOR_MAX_BUCKETS",
                "Number of rotating time buckets.",
                self.max_buckets,
                defaults.max_buckets,
                1,
                i64::try_from(MAX_BUCKETS).unwrap_or(I32_MAX),
                true,
            ),
            param(
                "bucket_time_secs",
                "STAT_MONITOR_BUCKET_TIME",
                "Lifetime of one bucket in seconds (0 disables time rotation).",
                self.bucket_time_secs,
                defaults.bucket_time_secs,
                0,
                I32_MAX,
                true,
            ),
            param(
                "respose_time_lower_bound_ms",
                "STAT_MONITOR_RESPONSE_TIME_LOWER_BOUND",
                "Lower bound of the response-time histogram, in ms.",
                self.respose_time_lower_bound_ms,
                defaults.respose_time_lower_bound_ms,
                1,
                I32_MAX,
                true,
            ),
            param(
                "respose_time_step_ms",
                "STAT_MONITOR_RESPONSE_TIME_STEP",
                "Width of one response-time histogram bucket, in ms.",
                self.respose_time_step_ms,
                defaults.respose_time_step_ms,
                1,
                I32_MAX,
                true,
            ),
            param(
                "query_shared_buffer_mb",
                "STAT_MONITOR_QUERY_SHARED_BUFFER",
                "Text arena size across all buckets, in MiB.",
                self.query_shared_buffer_mb,
                defaults.query_shared_buffer_mb,
                1,
                10_000,
                true,
            ),
            flag(
                "track_planning",
                "STAT_MONITOR_TRACK_PLANNING",
                "Record planning-phase statistics.",
                self.track_planning,
                defaults.track_planning,
                true,
            ),
            param(
                "dealloc_percent",
                "STAT_MONITOR_DEALLOC_PERCENT",
                "Percentage of entries freed by one eviction pass.",
                self.dealloc_percent,
                defaults.dealloc_percent,
                1,
                100,
                false,
            ),
        ]
    }

    /// Check every bounded parameter against its declared range.
    pub fn validate(&self) -> Result<()> {
        for p in self.parameters() {
            if p.value < p.min || p.value > p.max {
                return Err(Error::OutOfRange {
                    name: p.name,
                    value: p.value,
                    min: p.min,
                    max: p.max,
                });
            }
        }
        if self.max_entries_override == Some(0) {
            return Err(Error::invalid("max_entries_override", "must be at least 1"));
        }
        if self.text_bytes_per_bucket_override == Some(0) {
            return Err(Error::invalid(
                "text_bytes_per_bucket_override",
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Bucket lifetime, or `None` when time-based rotation is disabled.
    #[must_use]
    pub const fn bucket_duration(&self) -> Option<Duration> {
        if self.bucket_time_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.bucket_time_secs))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn param(
    name: &'static str,
    env_key: &'static str,
    description: &'static str,
    value: u64,
    default: u64,
    min: i64,
    max: i64,
    requires_restart: bool,
) -> ConfigParam {
    ConfigParam {
        name,
        env_key,
        description,
        value: i64::try_from(value).unwrap_or(i64::MAX),
        default: i64::try_from(default).unwrap_or(i64::MAX),
        min,
        max,
        requires_restart,
    }
}

fn flag(
    name: &'static str,
    env_key: &'static str,
    description: &'static str,
    value: bool,
    default: bool,
    requires_restart: bool,
) -> ConfigParam {
    ConfigParam {
        name,
        env_key,
        description,
        value: i64::from(value),
        default: i64::from(default),
        min: 0,
        max: 1,
        requires_restart,
    }
}

// ---------------------------------------------------------------------------
// Derived limits
// ---------------------------------------------------------------------------

/// Capacity ceilings derived once from a validated [`Config`].
///
/// The byte ceiling and the element ceiling are equivalent by construction:
/// `max_memory_bytes == max_entries * entry_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub bucket_count: usize,
    pub entry_size: usize,
    pub max_entries: usize,
    pub max_memory_bytes: usize,
    pub text_bytes_per_bucket: usize,
    pub query_max_len: usize,
    pub dealloc_percent: usize,
}

impl Limits {
    /// Derive limits for an entry type of `entry_size` bytes.
    #[must_use]
    pub fn derive(config: &Config, entry_size: usize) -> Self {
        let entry_size = entry_size.max(1);
        let bucket_count = usize::try_from(config.max_buckets)
            .unwrap_or(MAX_BUCKETS)
            .clamp(1, MAX_BUCKETS);
        let mem_ceiling =
            usize::try_from(config.max_memory_mb).map_or(usize::MAX, |mb| mb.saturating_mul(MIB));
        let max_entries = config
            .max_entries_override
            .unwrap_or(mem_ceiling / entry_size)
            .max(1);
        let text_bytes_per_bucket = config.text_bytes_per_bucket_override.unwrap_or_else(|| {
            usize::try_from(config.query_shared_buffer_mb)
                .map_or(usize::MAX, |mb| mb.saturating_mul(MIB))
                / bucket_count
        });
        Self {
            bucket_count,
            entry_size,
            max_entries,
            max_memory_bytes: max_entries.saturating_mul(entry_size),
            text_bytes_per_bucket,
            query_max_len: usize::try_from(config.query_max_len).unwrap_or(usize::MAX),
            dealloc_percent: usize::try_from(config.dealloc_percent)
                .unwrap_or(100)
                .clamp(1, 100),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment access
// ---------------------------------------------------------------------------

#[cfg(test)]
thread_local! {
    static TEST_ENV_OVERRIDES: std::cell::RefCell<HashMap<String, String>> =
        std::cell::RefCell::new(HashMap::new());
}

#[cfg(test)]
fn test_env_override_value(key: &str) -> Option<String> {
    TEST_ENV_OVERRIDES.with(|cell| cell.borrow().get(key).cloned())
}

fn dotenv_values() -> &'static HashMap<String, String> {
    static DOTENV: OnceLock<HashMap<String, String>> = OnceLock::new();
    DOTENV.get_or_init(|| load_dotenv_file(Path::new(".env")))
}

/// Read a value from the real environment first, falling back to .env.
#[must_use]
pub fn env_value(key: &str) -> Option<String> {
    #[cfg(test)]
    if let Some(v) = test_env_override_value(key) {
        return Some(v);
    }
    env::var(key).ok().or_else(|| dotenv_values().get(key).cloned())
}

fn load_dotenv_file(path: &Path) -> HashMap<String, String> {
    let Ok(contents) = fs::read_to_string(path) else {
        return HashMap::new();
    };
    parse_dotenv_contents(&contents)
}

/// Parse `KEY=value` lines; blank lines and `#` comments are skipped and
/// surrounding quotes are stripped.
#[must_use]
pub fn parse_dotenv_contents(contents: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);
        out.insert(key.to_string(), value.to_string());
    }
    out
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    let Some(raw) = env_value(key) else {
        return default;
    };
    parse_bool(&raw).unwrap_or_else(|| {
        tracing::warn!(key, value = %raw, default, "ignoring unparseable boolean setting");
        default
    })
}

fn env_u64(key: &str, default: u64) -> u64 {
    let Some(raw) = env_value(key) else {
        return default;
    };
    raw.trim().parse().unwrap_or_else(|_| {
        tracing::warn!(key, value = %raw, default, "ignoring unparseable numeric setting");
        default
    })
}

fn env_usize_opt(key: &str) -> Option<usize> {
    let raw = env_value(key)?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable size override");
            None
        }
    }
}
