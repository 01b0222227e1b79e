use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::bridge::WorkMode;
use crate::flags;
use crate::qq::ChatKind;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    pub pairs: Vec<PairConfig>,
    #[serde(default)]
    pub stickers: Vec<StickerMapConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub instance_id: i64,
    #[serde(default)]
    pub work_mode: WorkMode,
    /// Operator's Telegram username, for the mention-of-me annotation in
    /// personal mode.
    #[serde(default)]
    pub owner_username: Option<String>,
    /// Public base URL serving rich-header profile cards and the forwarded
    /// record viewer.
    #[serde(default)]
    pub web_endpoint: Option<String>,
    /// Telegram mini-app slug rendering forwarded records, when deployed.
    #[serde(default)]
    pub viewer_app: Option<String>,
    #[serde(default)]
    pub pastebin_endpoint: Option<String>,
    #[serde(default)]
    pub disable_qq_to_tg: bool,
    #[serde(default)]
    pub disable_tg_to_qq: bool,
    #[serde(default)]
    pub disable_rich_header: bool,
    #[serde(default)]
    pub disable_flash_pic: bool,
    #[serde(default)]
    pub disable_seamless: bool,
    #[serde(default)]
    pub color_emoji_prefix: bool,
    #[serde(default)]
    pub disable_quote_pin: bool,
}

impl BridgeConfig {
    /// Folds the boolean knobs into the instance-wide flag bitmask every
    /// pair inherits.
    pub fn instance_flags(&self) -> u32 {
        let mut value = 0;
        if self.disable_qq_to_tg {
            value |= flags::DISABLE_QQ_TO_TG;
        }
        if self.disable_tg_to_qq {
            value |= flags::DISABLE_TG_TO_QQ;
        }
        if self.disable_rich_header {
            value |= flags::DISABLE_RICH_HEADER;
        }
        if self.disable_flash_pic {
            value |= flags::DISABLE_FLASH_PIC;
        }
        if self.disable_seamless {
            value |= flags::DISABLE_SEAMLESS;
        }
        if self.color_emoji_prefix {
            value |= flags::COLOR_EMOJI_PREFIX;
        }
        if self.disable_quote_pin {
            value |= flags::DISABLE_QUOTE_PIN;
        }
        value
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Base URL of the QQ client gateway.
    pub qq_gateway: String,
    #[serde(default)]
    pub qq_token: Option<String>,
    /// The bridge's own QQ account number.
    pub qq_uin: i64,
    /// Base URL of the Telegram client gateway.
    pub tg_gateway: String,
    #[serde(default)]
    pub tg_token: Option<String>,
    pub bot_username: String,
    /// Base URL of the media transcoding service; voice, animated-sticker
    /// and webm transfers degrade to placeholders without it.
    #[serde(default)]
    pub transcoder: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct DatabaseConfig {
    /// SQLite file path; unset runs on the in-memory store and mappings do
    /// not survive restarts.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// How long resolved member display names are served from cache.
    #[serde(default = "default_member_cache_ttl")]
    pub member_cache_ttl_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            member_cache_ttl_secs: default_member_cache_ttl(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PairConfig {
    pub qq_room_id: i64,
    #[serde(default = "default_chat_kind")]
    pub chat_kind: ChatKind,
    pub tg_chat_id: i64,
    /// Per-pair flag bitmask, OR-merged with the instance flags.
    #[serde(default)]
    pub flags: u32,
    /// Key the web endpoint expects in rich-header URLs; generated when
    /// left empty.
    #[serde(default)]
    pub api_key: String,
}

/// One face-id to sticker-handle association for the bidirectional
/// sticker index.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StickerMapConfig {
    pub face_id: i32,
    pub file_handle: String,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_file(config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(&path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if url::Url::parse(&self.auth.qq_gateway).is_err() {
            return Err(ConfigError::InvalidConfig(
                "auth.qq_gateway must be a valid URL".to_string(),
            ));
        }
        if url::Url::parse(&self.auth.tg_gateway).is_err() {
            return Err(ConfigError::InvalidConfig(
                "auth.tg_gateway must be a valid URL".to_string(),
            ));
        }
        if self.auth.qq_uin <= 0 {
            return Err(ConfigError::InvalidConfig(
                "auth.qq_uin must be a positive account number".to_string(),
            ));
        }
        if self.auth.bot_username.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "auth.bot_username cannot be empty".to_string(),
            ));
        }
        if let Some(endpoint) = &self.bridge.web_endpoint
            && url::Url::parse(endpoint).is_err()
        {
            return Err(ConfigError::InvalidConfig(
                "bridge.web_endpoint must be a valid URL".to_string(),
            ));
        }

        if self.pairs.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "at least one pair must be configured".to_string(),
            ));
        }
        for (i, pair) in self.pairs.iter().enumerate() {
            if self.pairs[..i].iter().any(|p| p.qq_room_id == pair.qq_room_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate qq_room_id {} in pairs",
                    pair.qq_room_id
                )));
            }
            if self.pairs[..i].iter().any(|p| p.tg_chat_id == pair.tg_chat_id) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate tg_chat_id {} in pairs",
                    pair.tg_chat_id
                )));
            }
        }

        if self.bridge.work_mode.is_personal()
            && self
                .bridge
                .owner_username
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .is_none()
        {
            return Err(ConfigError::InvalidConfig(
                "bridge.owner_username is required in personal mode".to_string(),
            ));
        }

        Ok(())
    }

    fn normalize(&mut self) {
        self.auth.qq_gateway = trim_trailing_slash(&self.auth.qq_gateway);
        self.auth.tg_gateway = trim_trailing_slash(&self.auth.tg_gateway);
        if let Some(endpoint) = &self.bridge.web_endpoint {
            self.bridge.web_endpoint = Some(trim_trailing_slash(endpoint));
        }
        if let Some(endpoint) = &self.bridge.pastebin_endpoint {
            self.bridge.pastebin_endpoint = Some(trim_trailing_slash(endpoint));
        }
        if let Some(endpoint) = &self.auth.transcoder {
            self.auth.transcoder = Some(trim_trailing_slash(endpoint));
        }
        self.auth.bot_username = self
            .auth
            .bot_username
            .trim()
            .trim_start_matches('@')
            .to_string();
        for pair in &mut self.pairs {
            if pair.api_key.trim().is_empty() {
                pair.api_key = uuid::Uuid::new_v4().simple().to_string();
            }
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("BRIDGE_QQ_TOKEN") {
            self.auth.qq_token = Some(value);
        }
        if let Ok(value) = std::env::var("BRIDGE_TG_TOKEN") {
            self.auth.tg_token = Some(value);
        }
        if let Ok(value) = std::env::var("BRIDGE_WEB_ENDPOINT") {
            self.bridge.web_endpoint = Some(value);
        }
        if let Ok(value) = std::env::var("BRIDGE_PASTEBIN_ENDPOINT") {
            self.bridge.pastebin_endpoint = Some(value);
        }
        if let Ok(value) = std::env::var("BRIDGE_DATABASE_PATH") {
            self.database.path = Some(value);
        }
    }
}

fn trim_trailing_slash(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_member_cache_ttl() -> u64 {
    60
}

fn default_chat_kind() -> ChatKind {
    ChatKind::Group
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
bridge:
  work_mode: group
auth:
  qq_gateway: http://127.0.0.1:6700/
  qq_uin: 10000
  tg_gateway: http://127.0.0.1:6701
  bot_username: "@bridge_bot"
pairs:
  - qq_room_id: -123456
    tg_chat_id: -1001234567890
"#
    }

    #[test]
    fn minimal_config_parses_and_normalizes() {
        let mut config: Config = serde_yaml::from_str(minimal_yaml()).unwrap();
        config.normalize();
        config.validate().unwrap();

        assert_eq!(config.auth.qq_gateway, "http://127.0.0.1:6700");
        assert_eq!(config.auth.bot_username, "bridge_bot");
        assert_eq!(config.pairs[0].chat_kind, ChatKind::Group);
        // Left empty in the file, filled with a generated key.
        assert!(!config.pairs[0].api_key.is_empty());
    }

    #[test]
    fn duplicate_pair_rooms_are_rejected() {
        let yaml = r#"
bridge: {}
auth:
  qq_gateway: http://127.0.0.1:6700
  qq_uin: 10000
  tg_gateway: http://127.0.0.1:6701
  bot_username: bridge_bot
pairs:
  - qq_room_id: -1
    tg_chat_id: -100
  - qq_room_id: -1
    tg_chat_id: -200
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate qq_room_id"));
    }

    #[test]
    fn personal_mode_requires_owner_username() {
        let yaml = r#"
bridge:
  work_mode: personal
auth:
  qq_gateway: http://127.0.0.1:6700
  qq_uin: 10000
  tg_gateway: http://127.0.0.1:6701
  bot_username: bridge_bot
pairs:
  - qq_room_id: -1
    tg_chat_id: -100
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn flag_booleans_fold_into_the_bitmask() {
        let yaml = r#"
bridge:
  disable_rich_header: true
  color_emoji_prefix: true
auth:
  qq_gateway: http://127.0.0.1:6700
  qq_uin: 10000
  tg_gateway: http://127.0.0.1:6701
  bot_username: bridge_bot
pairs:
  - qq_room_id: -1
    tg_chat_id: -100
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let value = config.bridge.instance_flags();
        assert!(flags::has(value, flags::DISABLE_RICH_HEADER));
        assert!(flags::has(value, flags::COLOR_EMOJI_PREFIX));
        assert!(!flags::has(value, flags::DISABLE_SEAMLESS));
    }
}
