//! Proxus Core 规则调度库
//!
//! 为拦截式 HTTP(S) 代理提供规则加载、分类与调度能力

pub mod config;
pub mod error;
pub mod hooks;
pub mod tracing;

pub use config::{
    ConfigStore, ConfigUpdate, EngineSettings, LoggingConfig, RulesConfig, SettingsManager,
    load_settings,
};
pub use error::*;
pub use hooks::*;
