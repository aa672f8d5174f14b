use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProxusError, Result};

use super::types::{HookKind, RuleModule, RulePredicate, RuleResolver};

/// 注册表中的一条 Hook 绑定
#[derive(Clone)]
pub struct RegistryEntry {
    name: Arc<str>,
    kind: HookKind,
    global: bool,
    predicate: Option<Arc<dyn RulePredicate>>,
    resolver: Arc<dyn RuleResolver>,
    timeout: Option<Duration>,
}

impl RegistryEntry {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub(crate) fn predicate(&self) -> Option<&Arc<dyn RulePredicate>> {
        self.predicate.as_ref()
    }

    pub(crate) fn resolver(&self) -> &Arc<dyn RuleResolver> {
        &self.resolver
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("global", &self.global)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// 按 Hook 类型分类的规则注册表
///
/// 构建后只读。每个 Hook 下的顺序就是注册顺序，调度器按它决定合并优先级。
#[derive(Debug, Default, Clone)]
pub struct RuleRegistry {
    hooks: BTreeMap<HookKind, Vec<RegistryEntry>>,
}

impl RuleRegistry {
    /// 把展平后的模块按 Hook 类型归类
    ///
    /// 绑定缺少解析器，或作用域绑定缺少谓词时返回模块加载错误。
    pub fn classify<I>(modules: I) -> Result<Self>
    where
        I: IntoIterator<Item = RuleModule>,
    {
        let mut hooks: BTreeMap<HookKind, Vec<RegistryEntry>> = BTreeMap::new();

        for module in modules {
            if module.is_group() {
                return Err(ProxusError::module_load(
                    module.name(),
                    "nested rule groups must be flattened before classification",
                ));
            }

            let name: Arc<str> = Arc::from(module.name());
            for (kind, binding) in module.bindings() {
                let resolver = binding.resolver.clone().ok_or_else(|| {
                    ProxusError::module_load(
                        module.name(),
                        format!("binding for {kind} declares no resolve function"),
                    )
                })?;

                let predicate = if binding.global {
                    if binding.predicate.is_some() {
                        tracing::debug!(
                            rule = %name,
                            hook = %kind,
                            "global binding declares shouldResolve, ignored"
                        );
                    }
                    None
                } else {
                    Some(binding.predicate.clone().ok_or_else(|| {
                        ProxusError::module_load(
                            module.name(),
                            format!("scoped binding for {kind} declares no shouldResolve function"),
                        )
                    })?)
                };

                hooks.entry(*kind).or_default().push(RegistryEntry {
                    name: Arc::clone(&name),
                    kind: *kind,
                    global: binding.global,
                    predicate,
                    resolver,
                    timeout: binding.timeout,
                });
            }
        }

        Ok(Self { hooks })
    }

    pub fn entries(&self, kind: HookKind) -> &[RegistryEntry] {
        self.hooks.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self, kind: HookKind) -> bool {
        self.entries(kind).is_empty()
    }

    /// 拆分为（全局，作用域）两组，各自保持注册顺序
    pub fn partition(&self, kind: HookKind) -> (Vec<&RegistryEntry>, Vec<&RegistryEntry>) {
        self.entries(kind).iter().partition(|entry| entry.global)
    }

    pub fn summary(&self) -> RegistrySummary {
        let hooks = HookKind::ALL
            .iter()
            .map(|kind| {
                let (global, scoped) = self.partition(*kind);
                (*kind, (global.len(), scoped.len()))
            })
            .collect();
        RegistrySummary { hooks }
    }
}

/// 注册表概览，用于启动日志与 `check` 命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySummary {
    hooks: BTreeMap<HookKind, (usize, usize)>,
}

impl RegistrySummary {
    /// 返回（全局数量，作用域数量）
    pub fn counts(&self, kind: HookKind) -> (usize, usize) {
        self.hooks.get(&kind).copied().unwrap_or((0, 0))
    }

    pub fn total(&self) -> usize {
        self.hooks.values().map(|(g, s)| g + s).sum()
    }
}

impl fmt::Display for RegistrySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (kind, (global, scoped)) in &self.hooks {
            writeln!(f, "{kind}: {global} global, {scoped} scoped")?;
        }
        Ok(())
    }
}
