//! 规则调度核心
//!
//! 一次 `process_rules` 调用分三段：
//! - 全局阶段：所有全局规则的解析器并发执行，结果按注册顺序只补缺合并
//! - 谓词阶段：所有作用域规则的谓词并发执行（与全局阶段同时进行）
//! - 解析阶段：命中的作用域规则并发解析，按注册顺序合并，最后用全局结果补缺
//!
//! 合并顺序只取决于注册顺序，与解析器完成的先后无关。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{try_join, try_join_all};
use tokio::time::timeout;

use crate::error::{ProxusError, Result, RulePhase};

use super::registry::{RegistryEntry, RuleRegistry};
use super::types::{HookKind, PartialResult, RuleContext};

/// 调度超时配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// 流量 Hook 中单个谓词/解析器的超时
    pub timeout: Duration,
    /// 预处理器单次解析的超时
    pub preprocessor_timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(3_000),
            preprocessor_timeout: Duration::from_millis(60_000),
        }
    }
}

/// 规则调度器
#[derive(Debug, Clone)]
pub struct RuleDispatcher {
    registry: Arc<RuleRegistry>,
    options: DispatchOptions,
}

impl RuleDispatcher {
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            options: DispatchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// 对一次 Hook 调用执行全部规则并返回合并结果
    ///
    /// 任一谓词或解析器失败（含超时）都会让整次调用失败，不返回部分结果。
    pub async fn process_rules(&self, kind: HookKind, ctx: &RuleContext) -> Result<PartialResult> {
        let (globals, scoped) = self.registry.partition(kind);
        if globals.is_empty() && scoped.is_empty() {
            return Ok(PartialResult::new());
        }

        let (global_response, matched) = try_join(
            self.resolve_in_order(kind, &globals, ctx),
            self.match_scoped(kind, &scoped, ctx),
        )
        .await?;

        if matched.is_empty() {
            tracing::debug!(
                hook = %kind,
                global = globals.len(),
                scoped = scoped.len(),
                "no scoped rule matched, returning global baseline"
            );
            return Ok(global_response);
        }

        let mut scoped_response = self.resolve_in_order(kind, &matched, ctx).await?;
        scoped_response.fill_missing(&global_response);

        tracing::debug!(
            hook = %kind,
            global = globals.len(),
            matched = matched.len(),
            "rules processed"
        );
        Ok(scoped_response)
    }

    /// 并发解析，按传入顺序只补缺合并
    async fn resolve_in_order(
        &self,
        kind: HookKind,
        entries: &[&RegistryEntry],
        ctx: &RuleContext,
    ) -> Result<PartialResult> {
        let results = try_join_all(
            entries
                .iter()
                .map(|entry| self.resolve_entry(kind, entry, ctx)),
        )
        .await?;

        let mut merged = PartialResult::new();
        for result in results.into_iter().flatten() {
            merged.fill_missing(&result);
        }
        Ok(merged)
    }

    /// 并发执行谓词，返回按注册顺序排列的命中子序列
    async fn match_scoped<'a>(
        &self,
        kind: HookKind,
        entries: &[&'a RegistryEntry],
        ctx: &RuleContext,
    ) -> Result<Vec<&'a RegistryEntry>> {
        let verdicts = try_join_all(
            entries
                .iter()
                .map(|entry| self.evaluate_entry(kind, entry, ctx)),
        )
        .await?;

        Ok(entries
            .iter()
            .zip(verdicts)
            .filter_map(|(entry, hit)| hit.then_some(*entry))
            .collect())
    }

    async fn evaluate_entry(
        &self,
        kind: HookKind,
        entry: &RegistryEntry,
        ctx: &RuleContext,
    ) -> Result<bool> {
        let Some(predicate) = entry.predicate() else {
            return Ok(true);
        };
        let limit = self.timeout_for(kind, entry);
        match timeout(limit, predicate.should_resolve(ctx)).await {
            Ok(Ok(hit)) => Ok(hit),
            Ok(Err(source)) => Err(ProxusError::RuleFailed {
                rule: entry.name().to_string(),
                hook: kind,
                phase: RulePhase::Predicate,
                source,
            }),
            Err(_) => Err(ProxusError::RuleTimeout {
                rule: entry.name().to_string(),
                hook: kind,
                phase: RulePhase::Predicate,
                timeout: limit,
            }),
        }
    }

    async fn resolve_entry(
        &self,
        kind: HookKind,
        entry: &RegistryEntry,
        ctx: &RuleContext,
    ) -> Result<Option<PartialResult>> {
        let limit = self.timeout_for(kind, entry);
        match timeout(limit, entry.resolver().resolve(ctx)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => Err(ProxusError::RuleFailed {
                rule: entry.name().to_string(),
                hook: kind,
                phase: RulePhase::Resolver,
                source,
            }),
            Err(_) => Err(ProxusError::RuleTimeout {
                rule: entry.name().to_string(),
                hook: kind,
                phase: RulePhase::Resolver,
                timeout: limit,
            }),
        }
    }

    fn timeout_for(&self, kind: HookKind, entry: &RegistryEntry) -> Duration {
        entry.timeout().unwrap_or(match kind {
            HookKind::Preprocessor => self.options.preprocessor_timeout,
            _ => self.options.timeout,
        })
    }
}
