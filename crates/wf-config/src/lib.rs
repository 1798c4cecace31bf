// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layered runtime configuration for the master and worker processes.
//!
//! [`RuntimeConfig`] is the top-level settings struct, loaded from
//! defaults, then an optional TOML file, then environment variable
//! overrides — in that order, each layer winning over the last.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

use wf_core::SamplingMode;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Warnings
// ---------------------------------------------------------------------------

/// Advisory-level issues that do not prevent operation but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// The master listen address was left at its documented default.
    UsingDefaultListenAddr {
        /// The address that will be bound.
        addr: String,
    },
    /// A step timeout above this threshold is unusual enough to flag.
    LargeStepTimeout {
        /// Timeout value in milliseconds.
        ms: u64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::UsingDefaultListenAddr { addr } => {
                write!(f, "no master listen address configured, defaulting to {addr}")
            }
            ConfigWarning::LargeStepTimeout { ms } => {
                write!(f, "default step timeout is unusually large ({ms}ms)")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level runtime configuration shared by the master and worker
/// binaries.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct RuntimeConfig {
    /// Log level override (e.g. `"debug"`, `"info"`, `"warn"`), passed to
    /// the `tracing-subscriber` env-filter the binaries build at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Address the master's HTTP control plane listens on.
    #[serde(default = "default_listen_addr")]
    pub master_listen_addr: String,

    /// How often a worker sends a heartbeat, in milliseconds.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// How long the master waits without a heartbeat before marking a
    /// worker offline, in milliseconds.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Per-worker resource defaults, used when a worker's own
    /// advertisement omits a field.
    #[serde(default)]
    pub worker: WorkerDefaults,

    /// Sampling mode assumed for an execution that doesn't specify one.
    #[serde(default)]
    pub default_sampling_mode: SamplingMode,

    /// Step timeout assumed when a step doesn't specify one, in
    /// milliseconds. `None` means unlimited.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_step_timeout_ms: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_level: Some("info".into()),
            master_listen_addr: default_listen_addr(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            worker: WorkerDefaults::default(),
            default_sampling_mode: SamplingMode::None,
            default_step_timeout_ms: None,
        }
    }
}

/// Default resource footprint assumed for a worker, per §6.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct WorkerDefaults {
    /// Maximum concurrent virtual users.
    #[serde(default = "default_max_vus")]
    pub max_vus: u32,
    /// CPU cores available to the worker process.
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: u32,
    /// Memory budget in megabytes.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u32,
}

impl Default for WorkerDefaults {
    fn default() -> Self {
        Self {
            max_vus: default_max_vus(),
            cpu_cores: default_cpu_cores(),
            memory_mb: default_memory_mb(),
        }
    }
}

// ---------------------------------------------------------------------------
// Documented defaults (§6: "5s/10s, 100/4/4096MB, :9090, none, unlimited")
// ---------------------------------------------------------------------------

fn default_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

fn default_max_vus() -> u32 {
    100
}

fn default_cpu_cores() -> u32 {
    4
}

fn default_memory_mb() -> u32 {
    4_096
}

/// Threshold above which a configured step timeout generates a warning
/// (one hour).
const LARGE_STEP_TIMEOUT_MS: u64 = 3_600_000;

/// Recognised log levels.
const VALID_LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load a [`RuntimeConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file over the defaults.
/// * If `path` is `None`, starts from [`RuntimeConfig::default()`].
///
/// Environment variable overrides are applied on top in both cases.
pub fn load_config(path: Option<&Path>) -> Result<RuntimeConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound { path: p.display().to_string() })?;
            parse_toml(&content)?
        }
        None => RuntimeConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`RuntimeConfig`].
pub fn parse_toml(content: &str) -> Result<RuntimeConfig, ConfigError> {
    toml::from_str::<RuntimeConfig>(content).map_err(|e| ConfigError::ParseError { reason: e.to_string() })
}

// ---------------------------------------------------------------------------
// Env overrides
// ---------------------------------------------------------------------------

/// Apply environment variable overrides, per §6's "environment variables
/// influencing the core".
///
/// Recognised variables:
/// - `WF_LOG_LEVEL`
/// - `WF_MASTER_LISTEN_ADDR`
/// - `WF_HEARTBEAT_INTERVAL_MS`
/// - `WF_HEARTBEAT_TIMEOUT_MS`
/// - `WF_WORKER_MAX_VUS`
/// - `WF_WORKER_CPU_CORES`
/// - `WF_WORKER_MEMORY_MB`
/// - `WF_DEFAULT_SAMPLING_MODE` (`none` | `errors` | `smart`)
/// - `WF_DEFAULT_STEP_TIMEOUT_MS` (unset or empty means unlimited)
///
/// Malformed numeric or enum values are ignored, leaving the
/// previously-loaded value in place, rather than failing the whole load.
pub fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(val) = std::env::var("WF_LOG_LEVEL") {
        config.log_level = Some(val);
    }
    if let Ok(val) = std::env::var("WF_MASTER_LISTEN_ADDR") {
        config.master_listen_addr = val;
    }
    if let Some(v) = parsed_env("WF_HEARTBEAT_INTERVAL_MS") {
        config.heartbeat_interval_ms = v;
    }
    if let Some(v) = parsed_env("WF_HEARTBEAT_TIMEOUT_MS") {
        config.heartbeat_timeout_ms = v;
    }
    if let Some(v) = parsed_env("WF_WORKER_MAX_VUS") {
        config.worker.max_vus = v;
    }
    if let Some(v) = parsed_env("WF_WORKER_CPU_CORES") {
        config.worker.cpu_cores = v;
    }
    if let Some(v) = parsed_env("WF_WORKER_MEMORY_MB") {
        config.worker.memory_mb = v;
    }
    if let Ok(val) = std::env::var("WF_DEFAULT_SAMPLING_MODE") {
        match val.to_ascii_lowercase().as_str() {
            "none" => config.default_sampling_mode = SamplingMode::None,
            "errors" => config.default_sampling_mode = SamplingMode::Errors,
            "smart" => config.default_sampling_mode = SamplingMode::Smart,
            _ => {}
        }
    }
    if let Ok(val) = std::env::var("WF_DEFAULT_STEP_TIMEOUT_MS") {
        config.default_step_timeout_ms = if val.trim().is_empty() { None } else { val.parse().ok() };
    }
}

fn parsed_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a loaded configuration, returning advisory warnings.
///
/// Hard errors (invalid log level/sampling mode, a timeout shorter than
/// the heartbeat interval, a zero resource bound) are returned as a
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
pub fn validate_config(config: &RuntimeConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(ref level) = config.log_level
        && !VALID_LOG_LEVELS.contains(&level.as_str())
    {
        errors.push(format!("invalid log_level '{level}'"));
    }

    if config.heartbeat_timeout_ms <= config.heartbeat_interval_ms {
        errors.push(format!(
            "heartbeat_timeout_ms ({}) must be greater than heartbeat_interval_ms ({})",
            config.heartbeat_timeout_ms, config.heartbeat_interval_ms
        ));
    }

    if config.worker.max_vus == 0 {
        errors.push("worker.max_vus must be at least 1".to_string());
    }
    if config.worker.cpu_cores == 0 {
        errors.push("worker.cpu_cores must be at least 1".to_string());
    }
    if config.worker.memory_mb == 0 {
        errors.push("worker.memory_mb must be at least 1".to_string());
    }

    if let Some(ms) = config.default_step_timeout_ms
        && ms > LARGE_STEP_TIMEOUT_MS
    {
        warnings.push(ConfigWarning::LargeStepTimeout { ms });
    }

    if config.master_listen_addr == default_listen_addr() {
        warnings.push(ConfigWarning::UsingDefaultListenAddr { addr: config.master_listen_addr.clone() });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

// ---------------------------------------------------------------------------
// Merging
// ---------------------------------------------------------------------------

/// Merge two configurations. Values in `overlay` take precedence over
/// `base`, except that `overlay`'s own defaulted fields never shadow a
/// more specific `base` value — callers build `overlay` from a partial
/// TOML fragment, not a second full [`RuntimeConfig::default()`].
pub fn merge_configs(base: RuntimeConfig, overlay: RuntimeConfig) -> RuntimeConfig {
    RuntimeConfig {
        log_level: overlay.log_level.or(base.log_level),
        master_listen_addr: if overlay.master_listen_addr != default_listen_addr() { overlay.master_listen_addr } else { base.master_listen_addr },
        heartbeat_interval_ms: if overlay.heartbeat_interval_ms != default_heartbeat_interval_ms() { overlay.heartbeat_interval_ms } else { base.heartbeat_interval_ms },
        heartbeat_timeout_ms: if overlay.heartbeat_timeout_ms != default_heartbeat_timeout_ms() { overlay.heartbeat_timeout_ms } else { base.heartbeat_timeout_ms },
        worker: if overlay.worker != WorkerDefaults::default() { overlay.worker } else { base.worker },
        default_sampling_mode: if overlay.default_sampling_mode != SamplingMode::None { overlay.default_sampling_mode } else { base.default_sampling_mode },
        default_step_timeout_ms: overlay.default_step_timeout_ms.or(base.default_step_timeout_ms),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    // Environment variable tests mutate process-global state; serialize them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn default_config_is_valid() {
        let cfg = RuntimeConfig::default();
        let warnings = validate_config(&cfg).expect("default config should be valid");
        assert!(!warnings.is_empty(), "default listen addr should produce an advisory warning");
    }

    #[test]
    fn default_config_matches_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.log_level.as_deref(), Some("info"));
        assert_eq!(cfg.master_listen_addr, "0.0.0.0:9090");
        assert_eq!(cfg.heartbeat_interval_ms, 5_000);
        assert_eq!(cfg.heartbeat_timeout_ms, 10_000);
        assert_eq!(cfg.worker.max_vus, 100);
        assert_eq!(cfg.worker.cpu_cores, 4);
        assert_eq!(cfg.worker.memory_mb, 4_096);
        assert_eq!(cfg.default_sampling_mode, SamplingMode::None);
        assert_eq!(cfg.default_step_timeout_ms, None);
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml = r#"
            log_level = "debug"
            master_listen_addr = "0.0.0.0:7000"

            [worker]
            max_vus = 50
        "#;
        let cfg = parse_toml(toml).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert_eq!(cfg.master_listen_addr, "0.0.0.0:7000");
        assert_eq!(cfg.worker.max_vus, 50);
        // Fields omitted from the fragment still take their documented default.
        assert_eq!(cfg.worker.cpu_cores, 4);
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let bad = "this is [not valid toml =";
        let err = parse_toml(bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn validation_catches_invalid_log_level() {
        let cfg = RuntimeConfig { log_level: Some("verbose".into()), ..Default::default() };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn validation_catches_timeout_not_greater_than_interval() {
        let cfg = RuntimeConfig { heartbeat_interval_ms: 5_000, heartbeat_timeout_ms: 5_000, ..Default::default() };
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("heartbeat_timeout_ms")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn validation_catches_zero_max_vus() {
        let cfg = RuntimeConfig { worker: WorkerDefaults { max_vus: 0, ..WorkerDefaults::default() }, ..Default::default() };
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn large_step_timeout_produces_warning() {
        let cfg = RuntimeConfig { master_listen_addr: "0.0.0.0:9999".into(), default_step_timeout_ms: Some(LARGE_STEP_TIMEOUT_MS + 1), ..Default::default() };
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::LargeStepTimeout { .. })));
    }

    #[test]
    fn custom_listen_addr_silences_default_warning() {
        let cfg = RuntimeConfig { master_listen_addr: "10.0.0.1:9090".into(), ..Default::default() };
        let warnings = validate_config(&cfg).unwrap();
        assert!(!warnings.iter().any(|w| matches!(w, ConfigWarning::UsingDefaultListenAddr { .. })));
    }

    #[test]
    fn merge_overlay_overrides_base() {
        let base = RuntimeConfig { log_level: Some("info".into()), ..Default::default() };
        let mut overlay = RuntimeConfig::default();
        overlay.log_level = Some("debug".into());
        overlay.master_listen_addr = "10.0.0.1:9090".into();
        let merged = merge_configs(base, overlay);
        assert_eq!(merged.log_level.as_deref(), Some("debug"));
        assert_eq!(merged.master_listen_addr, "10.0.0.1:9090");
    }

    #[test]
    fn merge_preserves_base_when_overlay_is_default() {
        let base = RuntimeConfig { master_listen_addr: "10.0.0.1:1234".into(), worker: WorkerDefaults { max_vus: 7, cpu_cores: 2, memory_mb: 512 }, ..Default::default() };
        let merged = merge_configs(base.clone(), RuntimeConfig::default());
        assert_eq!(merged.master_listen_addr, base.master_listen_addr);
        assert_eq!(merged.worker, base.worker);
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = RuntimeConfig { default_step_timeout_ms: Some(30_000), ..Default::default() };
        let serialized = toml::to_string(&cfg).unwrap();
        let deserialized: RuntimeConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "log_level = \"warn\"\nmaster_listen_addr = \"127.0.0.1:8080\"").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.log_level.as_deref(), Some("warn"));
        assert_eq!(cfg.master_listen_addr, "127.0.0.1:8080");
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/workflow.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.heartbeat_interval_ms, 5_000);
    }

    #[test]
    fn env_override_applies_on_top_of_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WF_WORKER_MAX_VUS", "250");
        std::env::set_var("WF_DEFAULT_SAMPLING_MODE", "smart");
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.worker.max_vus, 250);
        assert_eq!(cfg.default_sampling_mode, SamplingMode::Smart);
        std::env::remove_var("WF_WORKER_MAX_VUS");
        std::env::remove_var("WF_DEFAULT_SAMPLING_MODE");
    }

    #[test]
    fn malformed_env_value_is_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WF_WORKER_MAX_VUS", "not-a-number");
        let mut cfg = RuntimeConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.worker.max_vus, 100);
        std::env::remove_var("WF_WORKER_MAX_VUS");
    }

    #[test]
    fn empty_step_timeout_env_means_unlimited() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("WF_DEFAULT_STEP_TIMEOUT_MS", "");
        let mut cfg = RuntimeConfig { default_step_timeout_ms: Some(5_000), ..Default::default() };
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.default_step_timeout_ms, None);
        std::env::remove_var("WF_DEFAULT_STEP_TIMEOUT_MS");
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError::FileNotFound { path: "/foo".into() };
        assert!(e.to_string().contains("/foo"));

        let e = ConfigError::ParseError { reason: "bad toml".into() };
        assert!(e.to_string().contains("bad toml"));
    }

    #[test]
    fn config_warning_display() {
        let w = ConfigWarning::UsingDefaultListenAddr { addr: "0.0.0.0:9090".into() };
        assert!(w.to_string().contains("0.0.0.0:9090"));

        let w = ConfigWarning::LargeStepTimeout { ms: 9_999_999 };
        assert!(w.to_string().contains("9999999"));
    }
}
