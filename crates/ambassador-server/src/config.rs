use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ambassador_policy::{PolicyOrigin, WatcherConfig, cache::DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Where the policy comes from and how it is served
    #[serde(default)]
    pub policy: PolicyConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self
            .server
            .health_path
            .as_deref()
            .is_some_and(|path| !path.starts_with('/'))
        {
            return Err("server.health_path must start with '/'".into());
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        // Policy validations
        if self.policy.reload_retry_attempts == 0 {
            return Err("policy.reload_retry_attempts must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// The policy origin: a file when `policy.path` is set, otherwise the
    /// inline document (an empty one when neither is configured).
    pub fn policy_origin(&self) -> PolicyOrigin {
        match (&self.policy.path, &self.policy.inline) {
            (Some(path), _) => PolicyOrigin::File(path.clone()),
            (None, Some(inline)) => PolicyOrigin::Inline(inline.clone()),
            (None, None) => PolicyOrigin::Inline("[]".into()),
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig::default()
            .with_debounce(Duration::from_millis(self.policy.debounce_ms))
            .with_max_retry_attempts(self.policy.reload_retry_attempts)
            .with_retry_delay(Duration::from_millis(self.policy.reload_retry_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path answered with a liveness check instead of a decision.
    ///
    /// Unset by default: every path the proxy forwards is subject to policy,
    /// and a fixed health route would grant that path on every host.
    #[serde(default)]
    pub health_path: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            health_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Policy JSON given directly
    #[serde(default)]
    pub inline: Option<String>,
    /// Policy JSON file; wins over `inline`
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Entries per match cache table, 0 disables caching
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// Reload the file when it changes
    #[serde(default = "default_watch")]
    pub watch: bool,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_reload_retry_attempts")]
    pub reload_retry_attempts: u32,
    #[serde(default = "default_reload_retry_delay_ms")]
    pub reload_retry_delay_ms: u64,
}

fn default_cache_capacity() -> u64 {
    DEFAULT_CAPACITY
}
fn default_watch() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_reload_retry_attempts() -> u32 {
    3
}
fn default_reload_retry_delay_ms() -> u64 {
    100
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            inline: None,
            path: None,
            cache_capacity: default_cache_capacity(),
            watch: default_watch(),
            debounce_ms: default_debounce_ms(),
            reload_retry_attempts: default_reload_retry_attempts(),
            reload_retry_delay_ms: default_reload_retry_delay_ms(),
        }
    }
}

// The inline policy holds tokens and passwords.
impl std::fmt::Debug for PolicyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyConfig")
            .field("inline", &self.inline.as_ref().map(|_| "[REDACTED]"))
            .field("path", &self.path)
            .field("cache_capacity", &self.cache_capacity)
            .field("watch", &self.watch)
            .field("debounce_ms", &self.debounce_ms)
            .field("reload_retry_attempts", &self.reload_retry_attempts)
            .field("reload_retry_delay_ms", &self.reload_retry_delay_ms)
            .finish()
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File, FileFormat};
    use std::path::PathBuf;

    /// Port to listen on.
    pub const LISTEN_PORT: &str = "LISTEN_PORT";
    /// Inline policy JSON.
    pub const AUTH_TOKENS: &str = "AUTH_TOKENS";
    /// Policy JSON file path.
    pub const AUTH_TOKENS_PATH: &str = "AUTH_TOKENS_PATH";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("ambassador.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf).format(FileFormat::Toml));
        }
        // Environment variable overrides, e.g., AMBASSADOR__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("AMBASSADOR")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let mut merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        apply_legacy_env(&mut merged, |key| std::env::var(key).ok());
        // Validate
        merged.validate()?;
        Ok(merged)
    }

    /// Apply the plain environment variables sidecar deployments set
    /// (`LISTEN_PORT`, `AUTH_TOKENS`, `AUTH_TOKENS_PATH`). Empty values are
    /// treated as unset.
    pub fn apply_legacy_env<F>(cfg: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(raw) = var(LISTEN_PORT) {
            match raw.parse::<u16>() {
                Ok(port) if port > 0 => cfg.server.port = port,
                _ => tracing::warn!(
                    value = %raw,
                    port = cfg.server.port,
                    "Ignoring invalid LISTEN_PORT"
                ),
            }
        }

        if let Some(inline) = var(AUTH_TOKENS) {
            cfg.policy.inline = Some(inline);
        }

        if let Some(path) = var(AUTH_TOKENS_PATH) {
            cfg.policy.path = Some(PathBuf::from(path));
        }
    }
}
