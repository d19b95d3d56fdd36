mod app_config;

pub use app_config::{
    EngineConfig, EngineSettings, LogFormat, LoggingConfig, PromotionPolicy,
};
