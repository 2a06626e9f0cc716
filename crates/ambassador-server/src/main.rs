use std::env;
use std::fmt;
use std::io::ErrorKind;

use ambassador_server::config::loader::load_config;
use ambassador_server::observability;
use ambassador_server::{ServerBuilder, start_policy_watch};

const CONFIG_ENV: &str = "AMBASSADOR_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "ambassador.toml";

/// Where the config file path came from, reported in the startup log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigSource {
    Flag,
    Environment,
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flag => f.write_str("--config"),
            Self::Environment => f.write_str(CONFIG_ENV),
            Self::Default => f.write_str("default"),
        }
    }
}

#[tokio::main]
async fn main() {
    load_dotenv();
    observability::init_tracing();

    let (config_path, source) = config_path(env::args().skip(1), env::var(CONFIG_ENV).ok());
    let cfg = match load_config(Some(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    tracing::info!(path = %config_path, source = %source, "Configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    let server = ServerBuilder::new().with_config(cfg.clone()).build();
    let watcher = start_policy_watch(&cfg, server.gatekeeper());
    if let Some(handle) = &watcher {
        tracing::info!(path = %handle.path().display(), "Policy hot-reload enabled");
    }

    if let Err(e) = server.run().await {
        tracing::error!(error = %e, "Server stopped with an error");
    }

    if let Some(handle) = watcher {
        handle.stop().await;
    }
}

/// Environment defaults for local runs; a missing `.env` is the usual case.
fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(e)) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => eprintln!("Warning: could not read .env: {e}"),
    }
}

/// `--config <path>` (or `--config=<path>`), then `AMBASSADOR_CONFIG`, then
/// `ambassador.toml`.
fn config_path(
    args: impl IntoIterator<Item = String>,
    env_value: Option<String>,
) -> (String, ConfigSource) {
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if let Some(path) = arg.strip_prefix("--config=") {
            return (path.to_string(), ConfigSource::Flag);
        }
        if arg == "--config" {
            if let Some(path) = args.next() {
                return (path, ConfigSource::Flag);
            }
        }
    }

    match env_value {
        Some(path) if !path.is_empty() => (path, ConfigSource::Environment),
        _ => (DEFAULT_CONFIG_FILE.to_string(), ConfigSource::Default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_flag_beats_environment() {
        let env_value = Some("/env.toml".to_string());
        assert_eq!(
            config_path(args(&["--config", "/flag.toml"]), env_value.clone()),
            ("/flag.toml".to_string(), ConfigSource::Flag)
        );
        assert_eq!(
            config_path(args(&["--config=/flag.toml"]), env_value),
            ("/flag.toml".to_string(), ConfigSource::Flag)
        );
    }

    #[test]
    fn test_environment_then_default() {
        assert_eq!(
            config_path(args(&[]), Some("/env.toml".into())),
            ("/env.toml".to_string(), ConfigSource::Environment)
        );
        assert_eq!(
            config_path(args(&["--config"]), Some(String::new())),
            (DEFAULT_CONFIG_FILE.to_string(), ConfigSource::Default)
        );
    }
}
