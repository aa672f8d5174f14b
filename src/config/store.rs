//! 规则配置存储
//!
//! 启动时读取一次；只有管理命令会改写文件，运行中的调度器永远看不到改写，
//! 改写在下次启动时生效。

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::error::{ProxusError, Result};
use crate::hooks::{discover_rules, fill_missing_map};

/// 默认启用的规则
pub const DEFAULT_RULE: &str = "example-rule";
/// 默认代理的域名
pub const DEFAULT_DOMAIN: &str = "example.com";

/// 持久化的规则配置
///
/// 未识别的字段保存在 `extra` 中，改写时原样保留。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesConfig {
    pub enabled_rule: String,
    #[serde(default)]
    pub domain: String,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl RulesConfig {
    pub fn new<R: Into<String>, D: Into<String>>(enabled_rule: R, domain: D) -> Self {
        Self {
            enabled_rule: enabled_rule.into(),
            domain: domain.into(),
            extra: Map::new(),
        }
    }

    pub fn extra(&self, key: &str) -> Option<&JsonValue> {
        self.extra.get(key)
    }
}

/// 管理命令可以改写的字段
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub enabled_rule: Option<String>,
    pub domain: Option<String>,
    pub extra: Map<String, JsonValue>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.enabled_rule.is_none() && self.domain.is_none() && self.extra.is_empty()
    }

    pub fn into_map(self) -> Map<String, JsonValue> {
        let mut map = self.extra;
        if let Some(rule) = self.enabled_rule {
            map.insert("enabledRule".to_string(), JsonValue::String(rule));
        }
        if let Some(domain) = self.domain {
            map.insert("domain".to_string(), JsonValue::String(domain));
        }
        map
    }
}

/// 规则配置文件的读写
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    rules_path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>, R: Into<PathBuf>>(path: P, rules_path: R) -> Self {
        Self {
            path: path.into(),
            rules_path: rules_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rules_path(&self) -> &Path {
        &self.rules_path
    }

    /// 配置文件不存在时写入默认配置，返回是否新建
    pub fn ensure_default(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        let default = RulesConfig::new(DEFAULT_RULE, DEFAULT_DOMAIN);
        self.persist(&serde_json::to_value(&default).map_err(|err| {
            ProxusError::config(&self.path, format!("unable to encode default config: {err}"))
        })?)?;
        tracing::info!(path = %self.path.display(), "default rules config created");
        Ok(true)
    }

    pub fn read(&self) -> Result<RulesConfig> {
        let raw = self.read_map()?;
        decode(&self.path, raw)
    }

    /// 新值优先，已有字段补缺保留；改写 `enabledRule` 时先校验规则目录
    pub fn write(&self, update: ConfigUpdate) -> Result<RulesConfig> {
        self.write_map(update.into_map())
    }

    pub fn write_map(&self, mut update: Map<String, JsonValue>) -> Result<RulesConfig> {
        if let Some(rule) = update.get("enabledRule") {
            let Some(rule) = rule.as_str() else {
                crate::bail_config!(&self.path, "enabledRule must be a string, got {rule}");
            };
            let available = discover_rules(&self.rules_path)?;
            if !available.iter().any(|name| name == rule) {
                return Err(ProxusError::InvalidRule {
                    rule: rule.to_string(),
                    available,
                });
            }
        }

        let existing = match self.read_map() {
            Ok(existing) => existing,
            Err(ProxusError::Persistence { source, .. }) if source.kind() == ErrorKind::NotFound => {
                Map::new()
            }
            Err(err) => return Err(err),
        };
        fill_missing_map(&mut update, &existing);

        let config = decode(&self.path, update.clone())?;
        self.persist(&JsonValue::Object(update))?;
        tracing::info!(
            path = %self.path.display(),
            enabled_rule = %config.enabled_rule,
            domain = %config.domain,
            "rules config updated, takes effect on next start"
        );
        Ok(config)
    }

    fn read_map(&self) -> Result<Map<String, JsonValue>> {
        let content = fs::read_to_string(&self.path)
            .map_err(|err| ProxusError::persistence(&self.path, err))?;
        match serde_json::from_str::<JsonValue>(&content) {
            Ok(JsonValue::Object(map)) => Ok(map),
            Ok(_) => Err(ProxusError::config(
                &self.path,
                "rules config must be a JSON object",
            )),
            Err(err) => Err(ProxusError::config(&self.path, format!("invalid JSON: {err}"))),
        }
    }

    /// 先写同目录临时文件再原子改名，避免并发写入留下半截文件
    fn persist(&self, value: &JsonValue) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| ProxusError::persistence(parent, err))?;
        }

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "config.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

        let mut content = serde_json::to_string_pretty(value)
            .map_err(|err| ProxusError::config(&self.path, format!("unable to encode: {err}")))?;
        content.push('\n');

        fs::write(&tmp, content).map_err(|err| ProxusError::persistence(&tmp, err))?;
        fs::rename(&tmp, &self.path).map_err(|err| {
            let _ = fs::remove_file(&tmp);
            ProxusError::persistence(&self.path, err)
        })
    }
}

fn decode(path: &Path, raw: Map<String, JsonValue>) -> Result<RulesConfig> {
    serde_json::from_value(JsonValue::Object(raw))
        .map_err(|err| ProxusError::config(path, format!("invalid rules config: {err}")))
}
