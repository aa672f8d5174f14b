//! 规则 Hook 模块
//!
//! - 从规则目录加载启用的规则包并展平为同级模块
//! - 按 Hook 类型分类为全局/作用域规则
//! - 并发执行谓词与解析器，按注册顺序只补缺合并结果
//! - 面向代理引擎提供四个 Hook 入口

mod builtin;
mod dispatcher;
mod escape;
mod loader;
mod merge;
mod registry;
mod runtime;
mod selector;
mod types;

pub use builtin::{EXAMPLE_RULE, PAGE_TITLE, PAGE_TITLE_KEY};
pub use dispatcher::{DispatchOptions, RuleDispatcher};
pub use escape::{escape_header_value, escape_set_cookie};
pub use loader::{
    MANIFEST_FILE, RuleCatalog, RuleLoader, RuleManifest, RuleModuleGraph, discover_rules,
    flatten_module,
};
pub use merge::{fill_missing, fill_missing_map};
pub use registry::{RegistryEntry, RegistrySummary, RuleRegistry};
pub use runtime::RuleHooks;
pub use selector::{HookSelector, MatchRule};
pub use types::{
    FnPredicate, FnResolver, HeaderMap, HeaderValue, HookBinding, HookDecision, HookErrorPolicy,
    HookKind, PartialResult, RequestDetail, ResponseDetail, RuleContext, RuleModule,
    RulePredicate, RuleResolver, predicate_fn, resolver_fn,
};
