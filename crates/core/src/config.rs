use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ── Dispatcher config ─────────────────────────────────────────

/// Tuning knobs for a dispatcher's pump loop and diagnostics.
///
/// Built from the environment ([`DispatchConfig::from_env`]) or from the
/// `[dispatcher]` table of a TOML file ([`DispatchConfig::from_file`]).
/// Both paths honour the `AFFINITY_PROFILE` prefix convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a single wake-wait; cancellation is observed at least this often.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,

    /// Warn each time the queue depth reaches a multiple of this value. 0 = disabled.
    #[serde(default)]
    pub queue_warn_depth: usize,

    /// Warn about items that execute longer than this. 0 = disabled.
    #[serde(default)]
    pub slow_item_threshold_ms: u64,

    /// Log failed items at warn (true) or debug (false).
    #[serde(default = "default_log_item_failures")]
    pub log_item_failures: bool,
}

fn default_wait_timeout_ms() -> u64 { 100 }
fn default_log_item_failures() -> bool { true }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_wait_timeout_ms(),
            queue_warn_depth: 0,
            slow_item_threshold_ms: 0,
            log_item_failures: default_log_item_failures(),
        }
    }
}

/// On-disk layout: everything lives under a `[dispatcher]` table.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    dispatcher: DispatchConfig,
}

impl DispatchConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `AFFINITY_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        Self::for_profile(&active_profile())
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let mut config = Self::default();
        config.apply_env_overrides(&profile.to_uppercase());
        config
    }

    /// Parse config from a TOML string, then apply env overrides and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self, DispatchError> {
        let file: ConfigFile = toml::from_str(toml_str)?;
        let mut config = file.dispatcher;
        config.apply_env_overrides(&active_profile());
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DispatchError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Reject settings the pump loop cannot work with.
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.wait_timeout_ms == 0 {
            return Err(DispatchError::Config(
                "wait_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn slow_item_threshold(&self) -> Option<Duration> {
        (self.slow_item_threshold_ms > 0).then(|| Duration::from_millis(self.slow_item_threshold_ms))
    }

    /// Print a one-line summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!(
            wait_timeout_ms = self.wait_timeout_ms,
            queue_warn_depth = self.queue_warn_depth,
            slow_item_threshold_ms = self.slow_item_threshold_ms,
            log_item_failures = self.log_item_failures,
            "dispatcher config loaded"
        );
    }

    // ── Environment variable overrides ──────────────────────────────

    /// Apply environment variable overrides.
    ///
    /// - `DISPATCH_WAIT_TIMEOUT_MS` -> `wait_timeout_ms`
    /// - `DISPATCH_QUEUE_WARN_DEPTH` -> `queue_warn_depth`
    /// - `DISPATCH_SLOW_ITEM_MS` -> `slow_item_threshold_ms`
    /// - `DISPATCH_LOG_ITEM_FAILURES` -> `log_item_failures`
    ///
    /// Values that fail to parse leave the current setting untouched.
    fn apply_env_overrides(&mut self, profile: &str) {
        if let Some(v) = profiled_env_opt(profile, "DISPATCH_WAIT_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.wait_timeout_ms = ms;
            }
        }
        if let Some(v) = profiled_env_opt(profile, "DISPATCH_QUEUE_WARN_DEPTH") {
            if let Ok(depth) = v.parse() {
                self.queue_warn_depth = depth;
            }
        }
        if let Some(v) = profiled_env_opt(profile, "DISPATCH_SLOW_ITEM_MS") {
            if let Ok(ms) = v.parse() {
                self.slow_item_threshold_ms = ms;
            }
        }
        if let Some(v) = profiled_env_opt(profile, "DISPATCH_LOG_ITEM_FAILURES") {
            if let Some(flag) = parse_bool(&v) {
                self.log_item_failures = flag;
            }
        }
    }
}

fn active_profile() -> String {
    env_or("AFFINITY_PROFILE", "").to_uppercase()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults() {
        let cfg = DispatchConfig::default();
        assert_eq!(cfg.wait_timeout_ms, 100);
        assert_eq!(cfg.wait_timeout(), Duration::from_millis(100));
        assert_eq!(cfg.queue_warn_depth, 0);
        assert!(cfg.slow_item_threshold().is_none());
        assert!(cfg.log_item_failures);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_toml_section() {
        let toml = r#"
[dispatcher]
wait_timeout_ms = 25
queue_warn_depth = 1000
slow_item_threshold_ms = 250
log_item_failures = false
"#;
        let cfg = DispatchConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.wait_timeout(), Duration::from_millis(25));
        assert_eq!(cfg.queue_warn_depth, 1000);
        assert_eq!(cfg.slow_item_threshold(), Some(Duration::from_millis(250)));
        assert!(!cfg.log_item_failures);
    }

    #[test]
    fn missing_section_uses_defaults() {
        let cfg = DispatchConfig::from_toml("").unwrap();
        assert_eq!(cfg, DispatchConfig::default());
    }

    #[test]
    fn zero_timeout_rejected() {
        let toml = r#"
[dispatcher]
wait_timeout_ms = 0
"#;
        let err = DispatchConfig::from_toml(toml).unwrap_err();
        assert!(matches!(err, DispatchError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let err = DispatchConfig::from_toml("[dispatcher\nwait_timeout_ms = ").unwrap_err();
        assert!(matches!(err, DispatchError::ConfigParse(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatcher]\nwait_timeout_ms = 40").unwrap();

        let cfg = DispatchConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.wait_timeout_ms, 40);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = DispatchConfig::from_file("/nonexistent/affinity.toml").unwrap_err();
        assert!(matches!(err, DispatchError::ConfigIo(_)));
    }

    #[test]
    fn profile_prefixed_env_wins() {
        // Profile name is unique to this test so parallel tests never see it.
        env::set_var("CFGTESTPROFILE_DISPATCH_WAIT_TIMEOUT_MS", "15");
        env::set_var("CFGTESTPROFILE_DISPATCH_LOG_ITEM_FAILURES", "off");
        env::set_var("CFGTESTPROFILE_DISPATCH_QUEUE_WARN_DEPTH", "not-a-number");

        let cfg = DispatchConfig::for_profile("cfgtestprofile");
        assert_eq!(cfg.wait_timeout_ms, 15);
        assert!(!cfg.log_item_failures);
        assert_eq!(cfg.queue_warn_depth, 0);

        env::remove_var("CFGTESTPROFILE_DISPATCH_WAIT_TIMEOUT_MS");
        env::remove_var("CFGTESTPROFILE_DISPATCH_LOG_ITEM_FAILURES");
        env::remove_var("CFGTESTPROFILE_DISPATCH_QUEUE_WARN_DEPTH");
    }

    #[test]
    fn parse_bool_variants() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
