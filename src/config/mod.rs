//! JSON configuration. Field names are camelCase on disk; secrets never
//! appear in Debug output.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_CONFIG_FILE: &str = "config.json";

fn default_port() -> u16 {
    3000
}

fn default_api_base() -> String {
    "https://qyapi.weixin.qq.com".to_string()
}

fn default_placeholder_image() -> String {
    String::new()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server: ServerConfig,
    pub wecom: WecomConfig,
    pub relay: RelayConfig,
    pub search: SearchConfig,
    pub media: MediaConfig,
    /// Custom-menu definition, posted verbatim to the platform menu API.
    pub menu: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Credentials and endpoints for one WeCom app.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WecomConfig {
    pub corp_id: String,
    pub corp_secret: String,
    pub agent_id: i64,
    pub token: String,
    pub encoding_aes_key: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

impl Default for WecomConfig {
    fn default() -> Self {
        Self {
            corp_id: String::new(),
            corp_secret: String::new(),
            agent_id: 0,
            token: String::new(),
            encoding_aes_key: String::new(),
            api_base: default_api_base(),
        }
    }
}

impl std::fmt::Debug for WecomConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WecomConfig")
            .field("corp_id", &self.corp_id)
            .field("corp_secret", &"***")
            .field("agent_id", &self.agent_id)
            .field("token", &"***")
            .field("encoding_aes_key", &"***")
            .field("api_base", &self.api_base)
            .finish()
    }
}

/// Outbound relay (proxy) used when the gateway host cannot reach the
/// platform API directly, and forwarded raw callbacks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchConfig {
    pub torrent: TorrentConfig,
    pub pan: PanConfig,
    /// Image used for articles whose source provides none.
    #[serde(default = "default_placeholder_image")]
    pub placeholder_image: String,
}

#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TorrentConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
}

impl std::fmt::Debug for TorrentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("api_key", &"***")
            .finish()
    }
}

#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PanConfig {
    pub enabled: bool,
    pub url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for PanConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PanConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Media server (Emby-style) refresh endpoints.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MediaConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: String,
    pub libraries: LibraryIds,
}

impl std::fmt::Debug for MediaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaConfig")
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("api_key", &"***")
            .field("libraries", &self.libraries)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LibraryIds {
    pub movie: Option<String>,
    pub tv: Option<String>,
    pub anime: Option<String>,
}

/// Load config from the given path, falling back to `config.json` in the
/// working directory, falling back to defaults when no file exists.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
    if !path.exists() {
        warn!("config: {} not found, using defaults", path.display());
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    info!("config: loaded {}", path.display());
    Ok(config)
}
