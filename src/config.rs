pub use self::parser::{
    AuthConfig, BridgeConfig, Config, DatabaseConfig, LimitsConfig, LoggingConfig, PairConfig,
    StickerMapConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
