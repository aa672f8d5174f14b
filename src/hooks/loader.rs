//! 规则加载
//!
//! 规则目录下的每个子目录代表一个规则包，目录名即包名；包的逻辑通过
//! [`RuleCatalog`] 显式注册。加载时按配置中的 `enabledRule` 选出目录，
//! 从目录取出包，展平其中的子模块组，交给注册表分类。

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigStore, DEFAULT_RULE, RulesConfig};
use crate::error::{ProxusError, Result};

use super::builtin;
use super::types::RuleModule;

/// 规则目录中的可选清单文件
pub const MANIFEST_FILE: &str = "rule.json";

/// 规则包清单
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 覆盖该包所有绑定的超时（毫秒），绑定自己声明的超时优先
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl RuleManifest {
    /// 读取目录中的清单，文件不存在时返回默认值
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ProxusError::persistence(&path, err)),
        };
        serde_json::from_str(&content)
            .map_err(|err| ProxusError::config(&path, format!("invalid rule manifest: {err}")))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

type RuleFactory = Arc<dyn Fn() -> anyhow::Result<RuleModule> + Send + Sync>;

/// 规则包目录：包名到模块构造函数的映射
#[derive(Clone, Default)]
pub struct RuleCatalog {
    factories: BTreeMap<String, RuleFactory>,
}

impl RuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置的规则包
    pub fn builtin() -> Self {
        Self::new()
            .register(builtin::EXAMPLE_RULE, builtin::example_rule)
            .register(builtin::PAGE_TITLE, builtin::page_title)
    }

    /// 注册一个规则包，同名包会被覆盖
    pub fn register<N, F>(mut self, name: N, factory: F) -> Self
    where
        N: Into<String>,
        F: Fn() -> anyhow::Result<RuleModule> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// 构造规则包的模块树
    pub fn instantiate(&self, name: &str) -> Result<RuleModule> {
        let factory = self.factories.get(name).ok_or_else(|| {
            ProxusError::module_load(
                name,
                "rule directory exists but no rule package is registered under that name",
            )
        })?;
        factory().map_err(|err| ProxusError::module_load(name, format!("{err:#}")))
    }
}

impl fmt::Debug for RuleCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}

/// 加载结果：启用的规则及其展平后的模块
#[derive(Debug, Clone)]
pub struct RuleModuleGraph {
    pub rule: String,
    pub path: PathBuf,
    pub manifest: RuleManifest,
    pub config: Arc<RulesConfig>,
    pub modules: Vec<RuleModule>,
}

/// 列出规则目录下的规则名（按名称排序，只含子目录）
pub fn discover_rules(rules_path: &Path) -> Result<Vec<String>> {
    let entries =
        fs::read_dir(rules_path).map_err(|err| ProxusError::persistence(rules_path, err))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| ProxusError::persistence(rules_path, err))?;
        let is_dir = entry
            .file_type()
            .map_err(|err| ProxusError::persistence(entry.path(), err))?
            .is_dir();
        if is_dir {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// 把带子模块组的模块展平为同级模块
///
/// 先展开 `preprocessors` 再展开 `routes`，子模块命名为
/// `<key>-preprocessor-<i>` 与 `<key>-routes-<i>`，占位的父模块被丢弃。
pub fn flatten_module(key: &str, module: RuleModule) -> Result<Vec<RuleModule>> {
    let mut flattened = Vec::new();
    flatten_into(key, module, &mut flattened)?;
    Ok(flattened)
}

fn flatten_into(key: &str, module: RuleModule, out: &mut Vec<RuleModule>) -> Result<()> {
    if !module.is_group() {
        out.push(module.rename(key));
        return Ok(());
    }
    if !module.bindings().is_empty() {
        return Err(ProxusError::module_load(
            key,
            "a rule group must not declare hook bindings of its own",
        ));
    }

    let (preprocessors, routes) = module.into_groups();
    for (index, child) in preprocessors.into_iter().enumerate() {
        flatten_into(&format!("{key}-preprocessor-{index}"), child, out)?;
    }
    for (index, child) in routes.into_iter().enumerate() {
        flatten_into(&format!("{key}-routes-{index}"), child, out)?;
    }
    Ok(())
}

/// 规则加载器
#[derive(Debug, Clone)]
pub struct RuleLoader {
    store: ConfigStore,
    catalog: RuleCatalog,
}

impl RuleLoader {
    pub fn new(store: ConfigStore, catalog: RuleCatalog) -> Self {
        Self { store, catalog }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn rules_path(&self) -> &Path {
        self.store.rules_path()
    }

    /// 确保规则目录、规则配置与示例规则存在，可重复调用
    pub fn ensure_layout(&self) -> Result<()> {
        let rules_path = self.rules_path();
        fs::create_dir_all(rules_path).map_err(|err| ProxusError::persistence(rules_path, err))?;
        self.store.ensure_default()?;

        let example = rules_path.join(DEFAULT_RULE);
        if !example.exists() {
            fs::create_dir_all(&example).map_err(|err| ProxusError::persistence(&example, err))?;
            let manifest = RuleManifest {
                description: Some(builtin::EXAMPLE_RULE_DESCRIPTION.to_string()),
                timeout_ms: None,
            };
            let manifest_path = example.join(MANIFEST_FILE);
            let content = serde_json::to_string_pretty(&manifest).map_err(|err| {
                ProxusError::config(&manifest_path, format!("unable to encode manifest: {err}"))
            })?;
            fs::write(&manifest_path, content)
                .map_err(|err| ProxusError::persistence(&manifest_path, err))?;
            tracing::info!(path = %example.display(), "example rule created");
        }
        Ok(())
    }

    /// 加载启用的规则
    pub fn load(&self) -> Result<RuleModuleGraph> {
        self.ensure_layout()?;
        let config = self.store.read()?;

        let rule = discover_rules(self.rules_path())?
            .into_iter()
            .find(|name| *name == config.enabled_rule)
            .ok_or_else(|| ProxusError::RuleNotFound {
                rule: config.enabled_rule.clone(),
                config_file: self.store.path().to_path_buf(),
            })?;

        let path = self.rules_path().join(&rule);
        let manifest = RuleManifest::read(&path)?;
        let root = self.catalog.instantiate(&rule)?;

        let mut modules = flatten_module(&rule, root)?;
        if let Some(timeout) = manifest.timeout() {
            for module in &mut modules {
                module.apply_default_timeout(timeout);
            }
        }

        tracing::info!(rule = %rule, path = %path.display(), "loading rules");
        tracing::info!(domain = %config.domain, "proxying domain");
        tracing::debug!(
            rule = %rule,
            modules = ?modules.iter().map(RuleModule::name).collect::<Vec<_>>(),
            "rule modules flattened"
        );

        Ok(RuleModuleGraph {
            rule,
            path,
            manifest,
            config: Arc::new(config),
            modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::types::{HookBinding, HookKind, PartialResult, resolver_fn};

    fn leaf(name: &str) -> RuleModule {
        RuleModule::new(name).bind(
            HookKind::BeforeSendRequest,
            HookBinding::global(resolver_fn(|_| Ok(Some(PartialResult::new())))),
        )
    }

    #[test]
    fn test_flatten_orders_preprocessors_before_routes() {
        let module = RuleModule::new("pkg")
            .with_route(leaf("a"))
            .with_route(RuleModule::new("nested").with_route(leaf("b")))
            .with_preprocessor(leaf("p"));

        let names: Vec<String> = flatten_module("pkg", module)
            .unwrap()
            .iter()
            .map(|module| module.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["pkg-preprocessor-0", "pkg-routes-0", "pkg-routes-1-routes-0"]
        );
    }

    #[test]
    fn test_flatten_keeps_plain_module() {
        let flattened = flatten_module("single", leaf("whatever")).unwrap();
        assert_eq!(flattened.len(), 1);
        assert_eq!(flattened[0].name(), "single");
    }

    #[test]
    fn test_group_with_own_bindings_is_rejected() {
        let module = leaf("parent").with_route(leaf("child"));
        let err = flatten_module("parent", module).unwrap_err();
        assert!(matches!(err, ProxusError::ModuleLoad { .. }));
    }

    #[test]
    fn test_manifest_defaults_when_missing() {
        let dir = std::env::temp_dir().join(format!("proxus-manifest-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        assert_eq!(RuleManifest::read(&dir).unwrap(), RuleManifest::default());

        fs::write(dir.join(MANIFEST_FILE), r#"{ "timeoutMs": 250 }"#).unwrap();
        let manifest = RuleManifest::read(&dir).unwrap();
        assert_eq!(manifest.timeout(), Some(Duration::from_millis(250)));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn test_catalog_unknown_package() {
        let err = RuleCatalog::new().instantiate("ghost").unwrap_err();
        assert_eq!(err.rule(), Some("ghost"));
        assert!(RuleCatalog::builtin().contains(DEFAULT_RULE));
    }
}
