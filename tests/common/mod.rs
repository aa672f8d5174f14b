// 集成测试共用的辅助函数
#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use proxus_core::config::ConfigStore;
use proxus_core::hooks::{
    HookBinding, HookKind, PartialResult, RuleContext, RuleDispatcher, RuleModule, RulePredicate,
    RuleRegistry, RuleResolver, predicate_fn, resolver_fn,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// 每个测试独占的临时目录，离开作用域时删除
pub struct Scratch {
    pub root: PathBuf,
}

impl Scratch {
    pub fn new() -> Self {
        let root = std::env::temp_dir().join(format!("proxus-it-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    pub fn rules_path(&self) -> PathBuf {
        self.root.join("rules")
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn store(&self) -> ConfigStore {
        ConfigStore::new(self.config_file(), self.rules_path())
    }

    pub fn write_config(&self, value: Value) {
        fs::write(self.config_file(), value.to_string()).unwrap();
    }

    pub fn add_rule_dir(&self, name: &str, manifest: Option<&str>) {
        let dir = self.rules_path().join(name);
        fs::create_dir_all(&dir).unwrap();
        if let Some(manifest) = manifest {
            fs::write(dir.join("rule.json"), manifest).unwrap();
        }
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

/// 等待一段时间后返回固定结果的解析器
pub struct Delayed {
    delay: Duration,
    result: Value,
}

#[async_trait]
impl RuleResolver for Delayed {
    async fn resolve(&self, _ctx: &RuleContext) -> anyhow::Result<Option<PartialResult>> {
        tokio::time::sleep(self.delay).await;
        Ok(PartialResult::from_value(self.result.clone()))
    }
}

/// 等待一段时间后给出固定判断的断言
pub struct SlowPredicate {
    delay: Duration,
    hit: bool,
}

#[async_trait]
impl RulePredicate for SlowPredicate {
    async fn should_resolve(&self, _ctx: &RuleContext) -> anyhow::Result<bool> {
        tokio::time::sleep(self.delay).await;
        Ok(self.hit)
    }
}

pub fn slow_predicate(millis: u64, hit: bool) -> Arc<dyn RulePredicate> {
    Arc::new(SlowPredicate {
        delay: Duration::from_millis(millis),
        hit,
    })
}

pub fn delayed(millis: u64, result: Value) -> Arc<dyn RuleResolver> {
    Arc::new(Delayed {
        delay: Duration::from_millis(millis),
        result,
    })
}

pub fn returning(result: Value) -> Arc<dyn RuleResolver> {
    resolver_fn(move |_| Ok(PartialResult::from_value(result.clone())))
}

pub fn failing(message: &'static str) -> Arc<dyn RuleResolver> {
    resolver_fn(move |_| Err(anyhow::anyhow!(message)))
}

pub fn path_is(path: &'static str) -> Arc<dyn RulePredicate> {
    predicate_fn(move |ctx| Ok(ctx.request().is_some_and(|req| req.path() == path)))
}

pub fn always(hit: bool) -> Arc<dyn RulePredicate> {
    predicate_fn(move |_| Ok(hit))
}

pub fn global(name: &str, kind: HookKind, resolver: Arc<dyn RuleResolver>) -> RuleModule {
    RuleModule::new(name).bind(kind, HookBinding::global(resolver))
}

pub fn scoped(
    name: &str,
    kind: HookKind,
    predicate: Arc<dyn RulePredicate>,
    resolver: Arc<dyn RuleResolver>,
) -> RuleModule {
    RuleModule::new(name).bind(kind, HookBinding::scoped(predicate, resolver))
}

pub fn dispatcher(modules: Vec<RuleModule>) -> RuleDispatcher {
    let registry = RuleRegistry::classify(modules).unwrap();
    RuleDispatcher::new(Arc::new(registry))
}
