//! Proxus Core 配置模块
//!
//! 两类配置：
//! - 引擎设置（TOML）：规则目录、规则配置文件、调度超时、错误策略、日志
//! - 规则配置（JSON）：当前启用的规则与代理的域名，见 [`ConfigStore`]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

use crate::hooks::{DispatchOptions, HookErrorPolicy};

mod manager;
mod store;

pub use manager::SettingsManager;
pub use store::{ConfigStore, ConfigUpdate, DEFAULT_DOMAIN, DEFAULT_RULE, RulesConfig};

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别，`RUST_LOG` 优先
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
    /// 输出 JSON 格式日志
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: true,
            with_thread_ids: false,
            with_file: false,
            with_line_number: false,
            json: false,
        }
    }
}

/// 规则目录与规则配置文件的位置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesSection {
    /// 规则目录，每个子目录是一个规则
    pub path: PathBuf,
    /// 规则配置 JSON 文件
    pub config_file: PathBuf,
}

impl Default for RulesSection {
    fn default() -> Self {
        let home = default_home();
        Self {
            path: home.join("rules"),
            config_file: home.join("config.json"),
        }
    }
}

/// 调度配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// 流量 Hook 中单个谓词/解析器的超时（毫秒）
    pub timeout_ms: u64,
    /// 预处理器的超时（毫秒）
    pub preprocessor_timeout_ms: u64,
    /// 请求期规则失败时的处理策略
    pub error_policy: HookErrorPolicy,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            timeout_ms: 3_000,
            preprocessor_timeout_ms: 60_000,
            error_policy: HookErrorPolicy::FailClosed,
        }
    }
}

/// 引擎设置
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub rules: RulesSection,
    pub dispatch: DispatchSection,
    pub logging: LoggingConfig,
}

impl EngineSettings {
    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            timeout: Duration::from_millis(self.dispatch.timeout_ms),
            preprocessor_timeout: Duration::from_millis(self.dispatch.preprocessor_timeout_ms),
        }
    }

    pub fn config_store(&self) -> ConfigStore {
        ConfigStore::new(&self.rules.config_file, &self.rules.path)
    }
}

/// 默认的 Proxus 主目录 `$HOME/proxus`
fn default_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("proxus")
}

/// 加载引擎设置
///
/// 显式给出的路径必须可读；否则依次尝试 `config/proxus.toml`、`proxus.toml`，
/// 都不存在时使用默认值。随后叠加 `PROXUS_ENV` 对应的环境配置与环境变量覆盖。
pub fn load_settings(path: Option<&Path>) -> Result<EngineSettings> {
    let mut value = match path {
        Some(path) => load_toml_value(path)?,
        None => load_with_fallback(&[
            PathBuf::from("config/proxus.toml"),
            PathBuf::from("proxus.toml"),
        ]),
    };

    if let Some(overlay) = SettingsManager::load_environment_overlay()? {
        merge_value(&mut value, overlay);
    }

    let mut settings: EngineSettings = value
        .try_into()
        .context("invalid proxus settings after merging")?;
    SettingsManager::apply_env_overrides(&mut settings);
    Ok(settings)
}

/// 依次尝试候选文件，全部失败时返回空表
fn load_with_fallback(candidates: &[PathBuf]) -> Value {
    for path in candidates {
        if !path.is_file() {
            continue;
        }
        match load_toml_value(path) {
            Ok(value) => return value,
            Err(err) => warn!("failed to load settings from {}: {err:#}", path.display()),
        }
    }
    Value::Table(Default::default())
}

/// 加载 TOML 值
fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read settings file {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in {}", path.display()))?;
    if !value.is_table() {
        return Err(anyhow!("settings must be a table: {}", path.display()));
    }
    Ok(value)
}

/// 表按键递归合并，其余值由 overlay 覆盖
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
