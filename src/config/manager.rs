//! 设置管理器 - 负责环境特定配置与环境变量覆盖
//!
//! - `PROXUS_ENV` 选择 `config/environments/{env}.toml` 叠加到基础设置
//! - `PROXUS_RULES_PATH` / `PROXUS_CONFIG_FILE` 覆盖规则目录与规则配置文件

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use toml::Value;

use super::EngineSettings;

/// 设置管理器
pub struct SettingsManager;

impl SettingsManager {
    /// 获取当前环境名称，未设置时为 "development"
    pub fn get_environment() -> String {
        env::var("PROXUS_ENV").unwrap_or_else(|_| "development".to_string())
    }

    /// 读取当前环境的叠加配置，文件不存在时返回 None
    pub fn load_environment_overlay() -> Result<Option<Value>> {
        let env_config_path = format!("config/environments/{}.toml", Self::get_environment());
        Self::load_overlay(Path::new(&env_config_path))
    }

    fn load_overlay(path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("unable to read environment settings: {}", path.display()))?;
        let value: Value = toml::from_str(&content)
            .with_context(|| format!("invalid environment settings: {}", path.display()))?;
        Ok(Some(value))
    }

    /// 环境变量覆盖规则目录与规则配置文件
    pub fn apply_env_overrides(settings: &mut EngineSettings) {
        if let Some(path) = env::var_os("PROXUS_RULES_PATH") {
            settings.rules.path = PathBuf::from(path);
        }
        if let Some(path) = env::var_os("PROXUS_CONFIG_FILE") {
            settings.rules.config_file = PathBuf::from(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_overlay_is_none() {
        let path = std::env::temp_dir().join(format!("proxus-missing-{}.toml", uuid::Uuid::new_v4()));
        assert!(SettingsManager::load_overlay(&path).unwrap().is_none());
    }

    #[test]
    fn test_overlay_is_parsed() {
        let path = std::env::temp_dir().join(format!("proxus-overlay-{}.toml", uuid::Uuid::new_v4()));
        fs::write(&path, "[logging]\nlevel = \"debug\"\n").unwrap();
        let overlay = SettingsManager::load_overlay(&path).unwrap().unwrap();
        assert_eq!(
            overlay
                .get("logging")
                .and_then(|logging| logging.get("level"))
                .and_then(Value::as_str),
            Some("debug")
        );
        let _ = fs::remove_file(path);
    }
}
