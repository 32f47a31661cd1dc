use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use super::types::ClientConfig;

const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "./vfdash.toml",
    "./config/vfdash.toml",
    "~/.config/vfdash/vfdash.toml",
    "/etc/vfdash/vfdash.toml",
];

/// Environment variable that overrides `server.base_url`.
pub const BASE_URL_ENV: &str = "VFDASH_BASE_URL";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with a custom path, falling back to the default
    /// locations and finally to built-in defaults. `cli_base_url` wins over
    /// both the file and the environment.
    pub fn load_with_custom_path(custom_path: Option<&Path>, cli_base_url: Option<String>) -> Result<ClientConfig> {
        let config = Self::locate(custom_path)?;
        Self::resolve(config, std::env::var(BASE_URL_ENV).ok(), cli_base_url)
    }

    /// Layer the overrides onto a loaded file, then validate the result once.
    fn resolve(mut config: ClientConfig, env_base_url: Option<String>, cli_base_url: Option<String>) -> Result<ClientConfig> {
        Self::apply_overrides(&mut config, env_base_url);
        Self::apply_overrides(&mut config, cli_base_url);
        Self::validate_config(&config)?;
        Ok(config)
    }

    fn locate(custom_path: Option<&Path>) -> Result<ClientConfig> {
        if let Some(path) = custom_path {
            if path.exists() {
                return Self::load_from_file(path)
                    .with_context(|| format!("Failed to load config from custom path: {:?}", path));
            }
            tracing::warn!("Custom config path does not exist: {:?}, falling back to defaults", path);
        }

        for default_path in DEFAULT_CONFIG_PATHS {
            let path = Self::expand_path(default_path);
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => {
                        tracing::info!("Loaded configuration from: {:?}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path, e);
                        continue;
                    }
                }
            }
        }

        tracing::info!("No configuration file found, using default settings");
        Ok(ClientConfig::default())
    }

    fn load_from_file(path: &Path) -> Result<ClientConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {:?}", path))
    }

    /// Apply a base URL coming from the environment or the command line.
    pub fn apply_overrides(config: &mut ClientConfig, base_url: Option<String>) {
        if let Some(url) = base_url.filter(|url| !url.trim().is_empty()) {
            tracing::debug!("Base URL overridden: {}", url);
            config.server.base_url = url.trim().to_string();
        }
    }

    pub fn validate_config(config: &ClientConfig) -> Result<()> {
        let base_url = config.server.base_url.trim();
        if base_url.is_empty() {
            anyhow::bail!("server.base_url cannot be empty");
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("server.base_url must start with http:// or https://, got {:?}", base_url);
        }

        if config.server.timeout_ms == 0 {
            anyhow::bail!("server.timeout_ms must be greater than 0");
        }

        if config.retrieval.fanout_concurrency == 0 {
            anyhow::bail!("retrieval.fanout_concurrency must be greater than 0");
        }

        Ok(())
    }

    fn expand_path(path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return PathBuf::from(home).join(rest);
            }
        }
        PathBuf::from(path)
    }
}
