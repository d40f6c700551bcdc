use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: Engine,
    pub media: Media,
    pub store: Store,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub log: Log,
    pub bots: Vec<Bot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub endpoint: String,
    #[serde(default = "default_engine_timeout_ms")]
    pub timeout_ms: u64,
    /// Where the host posts events for the bridge to publish.
    #[serde(default)]
    pub event_listen_addr: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Media {
    pub image_dir: String,
    pub record_dir: String,
    pub video_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite_path: Option<String>,
    /// Messages kept by the memory store before the oldest are dropped.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    #[serde(default = "default_lookup")]
    pub lookup: String,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            lookup: default_lookup(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bot {
    pub bot_id: i64,
    #[serde(default = "default_post_message_format")]
    pub post_message_format: String,
    #[serde(default)]
    pub http: Option<Http>,
    #[serde(default)]
    pub ws_server: Option<WsServer>,
    #[serde(default)]
    pub ws_clients: Vec<WsClient>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Http {
    pub listen_addr: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub post_urls: Vec<String>,
    #[serde(default = "default_post_timeout_ms")]
    pub post_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsServer {
    pub listen_addr: String,
    #[serde(default)]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsClient {
    pub url: String,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

fn default_engine_timeout_ms() -> u64 {
    5_000
}

fn default_max_entries() -> usize {
    10_000
}

fn default_lookup() -> String {
    "keyed".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_post_message_format() -> String {
    "string".to_string()
}

fn default_post_timeout_ms() -> u64 {
    3_000
}

fn default_reconnect_interval_ms() -> u64 {
    3_000
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let config_text =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    parse_and_validate(&config_text)
}

pub fn parse_and_validate(config_text: &str) -> Result<Config, ConfigError> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_runtime_support(&cfg)?;
    Ok(cfg)
}

/// JSON Schema for the config file, compiled into the binary.
pub const CONFIG_SCHEMA: &str = include_str!("../../../config/config.schema.json");

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    validator
        .validate(instance)
        .map_err(|first| ConfigError::SchemaValidation(first.to_string()))
}

fn validate_runtime_support(cfg: &Config) -> Result<(), ConfigError> {
    let sqlite_path = cfg
        .store
        .sqlite_path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty());
    match (cfg.store.kind.as_str(), sqlite_path) {
        ("memory", None) | ("sqlite", Some(_)) => {}
        ("memory", Some(_)) => {
            return Err(ConfigError::UnsupportedConfig(
                "store.sqlite_path only applies to store.type=sqlite".to_string(),
            ))
        }
        ("sqlite", None) => {
            return Err(ConfigError::UnsupportedConfig(
                "store.type=sqlite needs a non-empty store.sqlite_path".to_string(),
            ))
        }
        (other, _) => {
            return Err(ConfigError::UnsupportedConfig(format!(
                "store.type={other} is unknown; expected memory or sqlite"
            )))
        }
    }
    if cfg.dispatch.lookup != "keyed" && cfg.dispatch.lookup != "sorted" {
        return Err(ConfigError::UnsupportedConfig(format!(
            "dispatch.lookup={} is not implemented; supported: keyed, sorted",
            cfg.dispatch.lookup
        )));
    }

    let mut seen = HashSet::new();
    for bot in &cfg.bots {
        if bot.bot_id == 0 {
            return Err(ConfigError::UnsupportedConfig(
                "bots[].bot_id must be non-zero".to_string(),
            ));
        }
        if !seen.insert(bot.bot_id) {
            return Err(ConfigError::UnsupportedConfig(format!(
                "bot_id {} is configured more than once",
                bot.bot_id
            )));
        }
        if bot.http.is_none() && bot.ws_server.is_none() && bot.ws_clients.is_empty() {
            return Err(ConfigError::UnsupportedConfig(format!(
                "bot {} has no transport; configure http, ws_server or ws_clients",
                bot.bot_id
            )));
        }
        if bot.post_message_format != "string" && bot.post_message_format != "array" {
            return Err(ConfigError::UnsupportedConfig(format!(
                "bot {} post_message_format={} is not supported; supported: string, array",
                bot.bot_id, bot.post_message_format
            )));
        }
    }
    Ok(())
}
