//! Configuration loading for gate-relay.
//!
//! Configuration is loaded from a TOML file (default: `gate.toml`). Secrets
//! may be supplied through the environment instead of the file.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for gate-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Token storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Shared secret, bearer token and write gating configuration.
    #[serde(default)]
    pub auth: AuthConfig,
    /// On-chain membership verification configuration.
    #[serde(default)]
    pub membership: MembershipConfig,
    /// Wire audit log configuration.
    #[serde(default)]
    pub audit: AuditConfig,
    /// Cleanup task configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Bind address for HTTP server (default: 0.0.0.0:8765).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

/// Token storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Authorization configuration.
#[derive(Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared secret granting system access. Empty disables the system tier.
    #[serde(default)]
    pub shared_secret: String,
    /// HS256 key used to sign and verify bearer tokens.
    #[serde(default)]
    pub token_signing_key: String,
    /// Admit every inbound wire write without checking credentials.
    #[serde(default)]
    pub disable_write_gating: bool,
    /// Lifetime of new bearer tokens when the caller gives none (default: 30).
    #[serde(default = "default_token_ttl_days")]
    pub default_token_ttl_days: u64,
    /// Lifetime of pre-authorization grants in seconds (default: 300).
    #[serde(default = "default_preauth_ttl_secs")]
    pub preauth_ttl_secs: u64,
    /// Upper bound on listing a user's tokens (default: 2000).
    #[serde(default = "default_list_timeout_ms")]
    pub list_timeout_ms: u64,
    /// Upper bound on a revocation write being acknowledged (default: 3000).
    #[serde(default = "default_revoke_timeout_ms")]
    pub revoke_timeout_ms: u64,
}

/// On-chain membership verification configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipConfig {
    /// Consult the membership registry at all (default: false).
    #[serde(default)]
    pub enabled: bool,
    /// JSON-RPC endpoint of the membership registry bridge.
    pub provider_url: Option<String>,
    /// Timeout for a single registry call in milliseconds (default: 3000).
    #[serde(default = "default_lookup_timeout_ms")]
    pub lookup_timeout_ms: u64,
    /// Timeout for a scan across every relay in milliseconds (default: 10000).
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
}

/// Wire audit log configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    /// Entries accepted per second; the rest are shed (default: 10).
    #[serde(default = "default_max_logs_per_second")]
    pub max_logs_per_second: u32,
    /// Verbosity threshold; entries are only emitted at `verbose` or `debug`.
    #[serde(default)]
    pub level: AuditLevel,
}

/// Audit verbosity, from quietest to noisiest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    /// Errors only.
    Error,
    /// Warnings and errors.
    Warn,
    /// Operational messages.
    #[default]
    Info,
    /// Per-message audit entries.
    Verbose,
    /// Everything.
    Debug,
}

impl AuditLevel {
    /// Whether per-message audit entries are emitted at this level.
    pub fn emits_entries(self) -> bool {
        self >= AuditLevel::Verbose
    }
}

/// Cleanup task configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 60).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable cleanup task (default: true).
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_http_bind() -> String {
    "0.0.0.0:8765".to_string()
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("gate.db")
}

fn default_token_ttl_days() -> u64 {
    30
}

fn default_preauth_ttl_secs() -> u64 {
    5 * 60
}

fn default_list_timeout_ms() -> u64 {
    2000
}

fn default_revoke_timeout_ms() -> u64 {
    3000
}

fn default_lookup_timeout_ms() -> u64 {
    3000
}

fn default_scan_timeout_ms() -> u64 {
    10_000
}

fn default_max_logs_per_second() -> u32 {
    10
}

fn default_cleanup_interval() -> u64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_http_bind(),
            metrics_enabled: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
            token_signing_key: String::new(),
            disable_write_gating: false,
            default_token_ttl_days: default_token_ttl_days(),
            preauth_ttl_secs: default_preauth_ttl_secs(),
            list_timeout_ms: default_list_timeout_ms(),
            revoke_timeout_ms: default_revoke_timeout_ms(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("shared_secret", &"<redacted>")
            .field("token_signing_key", &"<redacted>")
            .field("disable_write_gating", &self.disable_write_gating)
            .field("default_token_ttl_days", &self.default_token_ttl_days)
            .field("preauth_ttl_secs", &self.preauth_ttl_secs)
            .field("list_timeout_ms", &self.list_timeout_ms)
            .field("revoke_timeout_ms", &self.revoke_timeout_ms)
            .finish()
    }
}

impl AuthConfig {
    /// Default lifetime of pre-authorization grants.
    pub fn preauth_ttl(&self) -> Duration {
        Duration::from_secs(self.preauth_ttl_secs)
    }

    /// Upper bound on listing tokens.
    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    /// Upper bound on revocation acknowledgement.
    pub fn revoke_timeout(&self) -> Duration {
        Duration::from_millis(self.revoke_timeout_ms)
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider_url: None,
            lookup_timeout_ms: default_lookup_timeout_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_logs_per_second: default_max_logs_per_second(),
            level: AuditLevel::default(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `GATE_*` overrides from a variable lookup.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup("GATE_SHARED_SECRET") {
            self.auth.shared_secret = secret;
        }
        if let Some(key) = lookup("GATE_TOKEN_SIGNING_KEY") {
            self.auth.token_signing_key = key;
        }
        if let Some(flag) = lookup("GATE_DISABLE_WRITE_GATING") {
            self.auth.disable_write_gating = parse_flag(&flag);
        }
        if let Some(flag) = lookup("GATE_MEMBERSHIP_ENABLED") {
            self.membership.enabled = parse_flag(&flag);
        }
    }

    /// Check values that have no usable default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.token_signing_key.is_empty() {
            return Err(ConfigError::Invalid {
                field: "auth.token_signing_key",
                reason: "must be set to sign bearer tokens".to_string(),
            });
        }
        if self.audit.max_logs_per_second == 0 {
            return Err(ConfigError::Invalid {
                field: "audit.max_logs_per_second",
                reason: "must be > 0".to_string(),
            });
        }
        if self.membership.enabled && self.membership.provider_url.is_none() {
            return Err(ConfigError::Invalid {
                field: "membership.provider_url",
                reason: "required when membership.enabled = true".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is missing or out of range.
    #[error("invalid config value {field}: {reason}")]
    Invalid {
        /// Dotted field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}
