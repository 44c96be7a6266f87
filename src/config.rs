use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use jsonschema::{JSONSchema, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bidding::{
    adapters::ValidationPolicy,
    pixel::TRACKING_PIXEL_BASE,
    renderer::{CMER_PLAYER_URL, DEFAULT_VIDEO_PLAYER_URL},
    viewability::VIEWABLE_CONFIG_URL,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub auction: AuctionRuntimeConfig,
    #[serde(default)]
    pub underdog: UnderdogConfig,
    #[serde(default)]
    pub yieldone: YieldoneConfig,
}

fn default_enabled_true() -> bool {
    true
}

fn default_logging_dir() -> PathBuf {
    PathBuf::from("./logs/bidrelay")
}

fn default_logging_filter() -> String {
    "info".to_string()
}

fn default_logging_rotation() -> LoggingRotation {
    LoggingRotation::Daily
}

fn default_logging_retention_days() -> usize {
    14
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum LoggingRotation {
    Daily,
    Hourly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_logging_filter")]
    pub filter: String,
    #[serde(default = "default_logging_rotation")]
    pub rotation: LoggingRotation,
    #[serde(default = "default_logging_retention_days")]
    pub retention_days: usize,
    #[serde(default = "default_enabled_true")]
    pub stderr_warn_enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_logging_dir(),
            filter: default_logging_filter(),
            rotation: default_logging_rotation(),
            retention_days: default_logging_retention_days(),
            stderr_warn_enabled: true,
        }
    }
}

fn default_tracking_pixel_timeout_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionRuntimeConfig {
    #[serde(default = "default_enabled_true")]
    pub enforce_deadline: bool,
    #[serde(default)]
    pub deadline_grace_ms: u64,
    #[serde(default = "default_tracking_pixel_timeout_ms")]
    pub tracking_pixel_timeout_ms: u64,
}

impl Default for AuctionRuntimeConfig {
    fn default() -> Self {
        Self {
            enforce_deadline: true,
            deadline_grace_ms: 0,
            tracking_pixel_timeout_ms: default_tracking_pixel_timeout_ms(),
        }
    }
}

fn default_underdog_vendor_id() -> String {
    "159".to_string()
}

fn default_underdog_library_url() -> String {
    "https://bid.underdog.media/udm_header_lib.js".to_string()
}

fn default_tracking_pixel_base() -> String {
    TRACKING_PIXEL_BASE.to_string()
}

fn default_underdog_adapter_version() -> String {
    "7.43.0-8.6.0C".to_string()
}

fn default_platform_name() -> String {
    "pbjs".to_string()
}

fn default_platform_version() -> String {
    "unknown".to_string()
}

fn default_per_creative() -> ValidationPolicy {
    ValidationPolicy::PerCreative
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnderdogConfig {
    #[serde(default = "default_underdog_vendor_id")]
    pub vendor_id: String,
    #[serde(default = "default_underdog_library_url")]
    pub library_url: String,
    #[serde(default = "default_tracking_pixel_base")]
    pub tracking_pixel_base: String,
    #[serde(default = "default_underdog_adapter_version")]
    pub adapter_version: String,
    #[serde(default = "default_platform_name")]
    pub platform_name: String,
    #[serde(default = "default_platform_version")]
    pub platform_version: String,
    #[serde(default = "default_per_creative")]
    pub validation: ValidationPolicy,
}

impl Default for UnderdogConfig {
    fn default() -> Self {
        Self {
            vendor_id: default_underdog_vendor_id(),
            library_url: default_underdog_library_url(),
            tracking_pixel_base: default_tracking_pixel_base(),
            adapter_version: default_underdog_adapter_version(),
            platform_name: default_platform_name(),
            platform_version: default_platform_version(),
            validation: default_per_creative(),
        }
    }
}

fn default_yieldone_endpoint_url() -> String {
    "https://y.one.impact-ad.jp/h_bid".to_string()
}

fn default_yieldone_user_sync_url() -> String {
    "https://y.one.impact-ad.jp/push_sync".to_string()
}

fn default_video_player_url() -> String {
    DEFAULT_VIDEO_PLAYER_URL.to_string()
}

fn default_cmer_player_url() -> String {
    CMER_PLAYER_URL.to_string()
}

fn default_viewable_config_url() -> String {
    VIEWABLE_CONFIG_URL.to_string()
}

fn default_bidder_timeout_ms() -> u64 {
    3_000
}

fn default_whole_response() -> ValidationPolicy {
    ValidationPolicy::WholeResponse
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldoneConfig {
    #[serde(default = "default_yieldone_endpoint_url")]
    pub endpoint_url: String,
    #[serde(default = "default_yieldone_user_sync_url")]
    pub user_sync_url: String,
    #[serde(default = "default_video_player_url")]
    pub video_player_url: String,
    #[serde(default = "default_cmer_player_url")]
    pub cmer_player_url: String,
    #[serde(default = "default_viewable_config_url")]
    pub viewable_config_url: String,
    #[serde(default = "default_bidder_timeout_ms")]
    pub bidder_timeout_ms: u64,
    /// Bid ttl; derived from `bidder_timeout_ms` when unset.
    #[serde(default)]
    pub default_ttl_secs: Option<u64>,
    #[serde(default = "default_whole_response")]
    pub validation: ValidationPolicy,
}

impl YieldoneConfig {
    pub fn effective_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
            .unwrap_or_else(|| self.bidder_timeout_ms.div_ceil(1_000))
            .max(1)
    }
}

impl Default for YieldoneConfig {
    fn default() -> Self {
        Self {
            endpoint_url: default_yieldone_endpoint_url(),
            user_sync_url: default_yieldone_user_sync_url(),
            video_player_url: default_video_player_url(),
            cmer_player_url: default_cmer_player_url(),
            viewable_config_url: default_viewable_config_url(),
            bidder_timeout_ms: default_bidder_timeout_ms(),
            default_ttl_secs: None,
            validation: default_whole_response(),
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        let config_value: Value = json5::from_str(&config_content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?;

        let config_base = config_path.parent().unwrap_or_else(|| Path::new("."));
        let schema_path = resolve_schema_path(config_base, &config_value)?;
        validate_against_schema(&config_value, &schema_path)?;

        let mut config: Config =
            serde_json::from_value(config_value).context("failed to deserialize bidrelay config")?;

        if !config.logging.dir.is_absolute() {
            config.logging.dir = config_base.join(&config.logging.dir);
        }

        Ok(config)
    }
}

fn resolve_schema_path(config_base: &Path, config_value: &Value) -> Result<PathBuf> {
    if let Some(path_text) = config_value.get("$schema").and_then(|value| value.as_str()) {
        let configured = PathBuf::from(path_text);
        if configured.is_absolute() {
            return Ok(configured);
        }
        return Ok(config_base.join(&configured));
    }

    let local_default = config_base.join("bidrelay.schema.json");
    if local_default.exists() {
        return Ok(local_default);
    }

    Err(anyhow!(
        "unable to resolve schema path: expected $schema in config or bidrelay.schema.json"
    ))
}

fn validate_against_schema(config_value: &Value, schema_path: &Path) -> Result<()> {
    let schema_content = fs::read_to_string(schema_path)
        .with_context(|| format!("failed to read schema {}", schema_path.display()))?;
    let schema: Value = serde_json::from_str(&schema_content)
        .with_context(|| format!("failed to parse schema {}", schema_path.display()))?;

    let compiled =
        JSONSchema::compile(&schema).map_err(|e| anyhow!("failed to compile schema: {e}"))?;

    match compiled.validate(config_value) {
        Ok(()) => Ok(()),
        Err(errors_iter) => {
            let validation_errors: Vec<ValidationError> = errors_iter.collect();
            let messages: Vec<String> = validation_errors
                .into_iter()
                .map(|error| error.to_string())
                .collect();
            Err(anyhow!("config validation failed: {}", messages.join("; ")))
        }
    }
}
