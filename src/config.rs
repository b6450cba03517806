use crate::channels::whatsapp::DEFAULT_API_BASE;
use crate::flows::dispatch::DEFAULT_SUPPORT_TEXT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_WHATSAPP_TOKEN: &str = "VENDBOT_WHATSAPP_TOKEN";
pub const ENV_VERIFY_TOKEN: &str = "VENDBOT_VERIFY_TOKEN";
pub const ENV_PHONE_NUMBER_ID: &str = "VENDBOT_PHONE_NUMBER_ID";

/// Top-level `config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub whatsapp: WhatsAppConfig,
    pub session: SessionConfig,
    pub catalog: CatalogConfig,
    pub support_text: String,
    /// `tracing` filter level used when `-v` is not given.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            whatsapp: WhatsAppConfig::default(),
            session: SessionConfig::default(),
            catalog: CatalogConfig::default(),
            support_text: DEFAULT_SUPPORT_TEXT.to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Webhook HTTP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_body_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            max_body_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    pub api_base: String,
    pub phone_number_id: String,
    pub access_token: String,
    /// Shared secret for the webhook subscribe handshake.
    pub verify_token: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            phone_number_id: String::new(),
            access_token: String::new(),
            verify_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub db_path: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            db_path: "~/.vendbot/sessions.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Plan catalog TOML. The built-in catalog is used when unset.
    pub path: Option<String>,
}

/// `<config dir>/vendbot/config.toml`, or `None` when no home directory exists.
pub fn default_config_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.config_dir().join("vendbot").join("config.toml"))
}

/// Expand `~` and `$VARS` in a configured path.
pub fn expand_path(raw: &str) -> anyhow::Result<PathBuf> {
    let expanded = shellexpand::full(raw)
        .map_err(|e| anyhow::anyhow!("failed to expand path '{raw}': {e}"))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

impl Config {
    /// Load from `path` (or the default location), then apply env overrides.
    /// A missing file yields defaults.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let path = match path {
            Some(raw) => Some(expand_path(raw)?),
            None => default_config_path(),
        };
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(&p)?,
            Some(p) => {
                tracing::debug!("no config at {}, using defaults", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Secrets may come from the environment instead of the file.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = non_empty(ENV_WHATSAPP_TOKEN) {
            self.whatsapp.access_token = token;
        }
        if let Some(token) = non_empty(ENV_VERIFY_TOKEN) {
            self.whatsapp.verify_token = token;
        }
        if let Some(id) = non_empty(ENV_PHONE_NUMBER_ID) {
            self.whatsapp.phone_number_id = id;
        }
    }

    pub fn db_path(&self) -> anyhow::Result<PathBuf> {
        expand_path(&self.session.db_path)
    }

    pub fn catalog_path(&self) -> anyhow::Result<Option<PathBuf>> {
        self.catalog.path.as_deref().map(expand_path).transpose()
    }

    /// Settings `serve` cannot run without.
    pub fn check_serve_ready(&self) -> anyhow::Result<()> {
        let mut missing = Vec::new();
        if self.whatsapp.access_token.is_empty() {
            missing.push(format!("whatsapp.access_token (or {ENV_WHATSAPP_TOKEN})"));
        }
        if self.whatsapp.phone_number_id.is_empty() {
            missing.push(format!("whatsapp.phone_number_id (or {ENV_PHONE_NUMBER_ID})"));
        }
        if self.whatsapp.verify_token.is_empty() {
            missing.push(format!("whatsapp.verify_token (or {ENV_VERIFY_TOKEN})"));
        }
        if !missing.is_empty() {
            anyhow::bail!("missing required settings:\n  {}", missing.join("\n  "));
        }
        Ok(())
    }
}
