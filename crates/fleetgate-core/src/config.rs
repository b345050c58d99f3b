//! Configuration resolution for Fleetgate.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/fleetgate/aggregator.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`FLEETGATE_*`)
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files may be partial: each layer is deep-merged over the previous one
//! before deserialization, so unspecified keys keep their lower-layer value.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Complete aggregator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AggregatorConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub plugin: PluginConfig,
    pub plugin_status_polling: PluginStatusPolling,
    pub tls: TlsConfig,
    pub url_translation: UrlTranslation,
    pub events: EventConfig,
    pub fan_out: FanOutConfig,
    pub bootstrap: BootstrapConfig,
}

/// Listener and storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub database_path: Option<PathBuf>,
    /// Identity of the aggregator's own manager resource. Generated at
    /// startup when empty.
    pub root_service_uuid: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 45000)),
            database_path: None,
            root_service_uuid: String::new(),
        }
    }
}

/// Password hashing scheme used for caller accounts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HasherKind {
    #[default]
    Argon2,
    Sha512,
}

/// Caller session settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Idle time after which a session is expired.
    pub session_timeout_mins: u64,
    /// Minimum time between two full scans of the session table.
    pub expired_session_cleanup_mins: u64,
    pub hasher: HasherKind,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_timeout_mins: 30,
            expired_session_cleanup_mins: 15,
            hasher: HasherKind::Argon2,
        }
    }
}

impl AuthConfig {
    pub const fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_mins * 60)
    }

    pub const fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.expired_session_cleanup_mins * 60)
    }
}

/// Southbound transport settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    /// `https` in production; `http` is accepted for lab plugins.
    pub scheme: String,
    pub request_timeout_secs: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            scheme: "https".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl PluginConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Liveness probing used after a southbound transport failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginStatusPolling {
    pub response_timeout_secs: u64,
    pub max_retry_attempt: u32,
    pub retry_interval_secs: u64,
}

impl Default for PluginStatusPolling {
    fn default() -> Self {
        Self {
            response_timeout_secs: 3,
            max_retry_attempt: 3,
            retry_interval_secs: 2,
        }
    }
}

impl PluginStatusPolling {
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub const fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }
}

/// TLS material for southbound calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// PEM file holding the CA that signed plugin certificates.
    pub root_ca_certificate: Option<PathBuf>,
}

/// One substitution applied to URLs and payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationRule {
    pub from: String,
    pub to: String,
}

impl TranslationRule {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Ordered rule lists for each direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UrlTranslation {
    pub north_bound: Vec<TranslationRule>,
    pub south_bound: Vec<TranslationRule>,
}

impl Default for UrlTranslation {
    fn default() -> Self {
        Self {
            north_bound: vec![TranslationRule::new("/ODIM/v1/", "/redfish/v1/")],
            south_bound: vec![TranslationRule::new("/redfish/v1/", "/ODIM/v1/")],
        }
    }
}

/// Event subscription defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EventConfig {
    /// Where devices deliver events.
    pub destination: String,
    /// Event set used when a device has no subscription at all.
    pub default_event_types: Vec<String>,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            destination: "https://localhost:45000/redfishEventListener".to_string(),
            default_event_types: vec!["Alert".to_string()],
        }
    }
}

/// Limits for fan-out operations across devices.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FanOutConfig {
    pub max_concurrency: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
        }
    }
}

/// Initial administrator account, created when no account exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapConfig {
    pub admin_username: String,
    pub admin_password: Option<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
            admin_password: None,
        }
    }
}

impl AggregatorConfig {
    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.auth.session_timeout_mins == 0 {
            return Err(Error::Config(
                "auth.session_timeout_mins must be greater than zero".into(),
            ));
        }
        if !matches!(self.plugin.scheme.as_str(), "http" | "https") {
            return Err(Error::Config(format!(
                "plugin.scheme must be http or https, got {:?}",
                self.plugin.scheme
            )));
        }
        if self.plugin_status_polling.max_retry_attempt == 0 {
            return Err(Error::Config(
                "plugin_status_polling.max_retry_attempt must be at least 1".into(),
            ));
        }
        let rules = self
            .url_translation
            .north_bound
            .iter()
            .chain(&self.url_translation.south_bound);
        for rule in rules {
            if rule.from.is_empty() {
                return Err(Error::Config(
                    "url_translation rules must have a non-empty `from`".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<AggregatorConfig> {
    let mut merged = serde_json::to_value(AggregatorConfig::default())?;

    if let Some(global_path) = global_config_path() {
        if global_path.exists() {
            merge_values(&mut merged, load_config_file(&global_path)?);
        }
    }

    if let Some(path) = explicit {
        merge_values(&mut merged, load_config_file(path)?);
    }

    let mut config: AggregatorConfig = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid configuration: {e}")))?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_home().map(|p| p.join("fleetgate").join("aggregator.json"))
}

/// Default location of the aggregator database.
pub fn database_path() -> Option<PathBuf> {
    config_home().map(|p| p.join("fleetgate").join("aggregator.db"))
}

fn config_home() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support"))
    }
    #[cfg(not(target_os = "macos"))]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
    }
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Deep-merge `overlay` into `base`. Objects merge key by key; any other
/// overlay value replaces the base value.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `FLEETGATE_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides(config: &mut AggregatorConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(addr) = lookup("FLEETGATE_ADDR").and_then(|v| v.parse().ok()) {
        config.server.addr = addr;
    }
    if let Some(path) = lookup("FLEETGATE_DB_PATH") {
        config.server.database_path = Some(PathBuf::from(path));
    }
    if let Some(uuid) = lookup("FLEETGATE_ROOT_SERVICE_UUID") {
        config.server.root_service_uuid = uuid;
    }
    if let Some(n) = lookup("FLEETGATE_SESSION_TIMEOUT_MINS").and_then(|v| v.parse().ok()) {
        config.auth.session_timeout_mins = n;
    }
    if let Some(n) = lookup("FLEETGATE_SESSION_CLEANUP_MINS").and_then(|v| v.parse().ok()) {
        config.auth.expired_session_cleanup_mins = n;
    }
    if let Some(scheme) = lookup("FLEETGATE_PLUGIN_SCHEME") {
        config.plugin.scheme = scheme;
    }
    if let Some(path) = lookup("FLEETGATE_ROOT_CA") {
        config.tls.root_ca_certificate = Some(PathBuf::from(path));
    }
    if let Some(n) = lookup("FLEETGATE_MAX_CONCURRENCY").and_then(|v| v.parse().ok()) {
        config.fan_out.max_concurrency = n;
    }
    if let Some(password) = lookup("FLEETGATE_ADMIN_PASSWORD") {
        config.bootstrap.admin_password = Some(password);
    }
}
