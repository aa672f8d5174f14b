use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::config::RulesConfig;
use crate::error::ProxusError;

use super::merge::fill_missing_map;

/// Hook 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    Preprocessor,
    BeforeDealHttpsRequest,
    BeforeSendRequest,
    BeforeSendResponse,
}

impl HookKind {
    pub const ALL: [HookKind; 4] = [
        HookKind::Preprocessor,
        HookKind::BeforeDealHttpsRequest,
        HookKind::BeforeSendRequest,
        HookKind::BeforeSendResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Preprocessor => "preprocessor",
            HookKind::BeforeDealHttpsRequest => "beforeDealHttpsRequest",
            HookKind::BeforeSendRequest => "beforeSendRequest",
            HookKind::BeforeSendResponse => "beforeSendResponse",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 请求期错误的处理策略（由 Hook 边界决定，而不是调度器）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookErrorPolicy {
    /// 规则失败时让这次交换失败
    #[default]
    FailClosed,
    /// 规则失败时原样放行流量，错误仍交给调用方
    FailOpen,
}

/// Hook 边界的执行结果
#[derive(Debug)]
pub enum HookDecision<T> {
    /// 规则合并结果可用
    Apply(T),
    /// 规则失败，按 fail-open 策略放行原始流量
    PassThrough { error: ProxusError },
}

impl<T> HookDecision<T> {
    pub fn is_apply(&self) -> bool {
        matches!(self, HookDecision::Apply(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            HookDecision::Apply(value) => Some(value),
            HookDecision::PassThrough { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&ProxusError> {
        match self {
            HookDecision::Apply(_) => None,
            HookDecision::PassThrough { error } => Some(error),
        }
    }
}

/// HTTP 头的值，`Set-Cookie` 之类的头可能有多个值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multi(Vec<String>),
}

impl HeaderValue {
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValue::Single(value) => Some(value.as_str()),
            HeaderValue::Multi(values) => values.first().map(String::as_str),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Single(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        HeaderValue::Multi(values)
    }
}

pub type HeaderMap = BTreeMap<String, HeaderValue>;

fn lookup_header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a HeaderValue> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// 进行中请求的只读快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    pub protocol: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HeaderMap,
    #[serde(default)]
    pub body: String,
}

impl RequestDetail {
    pub fn new<M: Into<String>, U: Into<String>>(method: M, url: U) -> Self {
        let url = url.into();
        let protocol = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .unwrap_or_else(|| "http".to_string());
        Self {
            protocol,
            url,
            method: method.into(),
            ..Default::default()
        }
    }

    pub fn with_header<K: Into<String>, V: Into<HeaderValue>>(mut self, key: K, value: V) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        lookup_header(&self.headers, name)
    }

    /// URL 中的路径部分（不含查询串）
    pub fn path(&self) -> &str {
        let rest = match self.url.split_once("://") {
            Some((_, rest)) => match rest.find('/') {
                Some(idx) => &rest[idx..],
                None => "/",
            },
            None => self.url.as_str(),
        };
        rest.split(['?', '#']).next().unwrap_or(rest)
    }
}

/// 上游响应的只读快照
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDetail {
    pub status_code: u16,
    #[serde(default)]
    pub header: HeaderMap,
    #[serde(default)]
    pub body: String,
}

impl ResponseDetail {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            ..Default::default()
        }
    }

    pub fn with_header<K: Into<String>, V: Into<HeaderValue>>(mut self, key: K, value: V) -> Self {
        self.header.insert(key.into(), value.into());
        self
    }

    pub fn with_body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        lookup_header(&self.header, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type").and_then(HeaderValue::first)
    }
}

/// 规则调用上下文
///
/// 谓词与解析器只能读取上下文，改写意图通过返回的 [`PartialResult`] 表达。
#[derive(Debug, Clone, Default)]
pub struct RuleContext {
    pub request: Option<RequestDetail>,
    pub response: Option<ResponseDetail>,
    pub config: Arc<RulesConfig>,
}

impl RuleContext {
    /// 预处理器使用的空上下文
    pub fn empty(config: Arc<RulesConfig>) -> Self {
        Self {
            request: None,
            response: None,
            config,
        }
    }

    pub fn for_request(request: RequestDetail) -> Self {
        Self {
            request: Some(request),
            ..Default::default()
        }
    }

    pub fn with_response(mut self, response: ResponseDetail) -> Self {
        self.response = Some(response);
        self
    }

    pub fn with_config(mut self, config: Arc<RulesConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn request(&self) -> Option<&RequestDetail> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&ResponseDetail> {
        self.response.as_ref()
    }
}

/// 规则给出的局部改写结果
///
/// 缺少某个键表示“没有意见”，绝不表示“清空该字段”。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialResult(Map<String, JsonValue>);

impl PartialResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// 只接受 JSON 对象，其他值视为“没有结果”
    pub fn from_value(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// `{ "response": ... }` 形式的改写
    pub fn with_response(response: JsonValue) -> Self {
        let mut map = Map::new();
        map.insert("response".to_string(), response);
        Self(map)
    }

    /// HTTPS 拦截决策 `{ "data": bool }`
    pub fn intercept_https(allow: bool) -> Self {
        let mut map = Map::new();
        map.insert("data".to_string(), JsonValue::Bool(allow));
        Self(map)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    pub fn insert<K: Into<String>>(&mut self, key: K, value: JsonValue) -> Option<JsonValue> {
        self.0.insert(key.into(), value)
    }

    pub fn response(&self) -> Option<&JsonValue> {
        self.0.get("response")
    }

    pub fn https_allowed(&self) -> Option<bool> {
        self.0.get("data").and_then(JsonValue::as_bool)
    }

    pub fn as_map(&self) -> &Map<String, JsonValue> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, JsonValue> {
        &mut self.0
    }

    pub fn into_value(self) -> JsonValue {
        JsonValue::Object(self.0)
    }

    /// 只补缺合并：已有字段保持不变
    pub fn fill_missing(&mut self, source: &PartialResult) {
        fill_missing_map(&mut self.0, &source.0);
    }
}

impl From<Map<String, JsonValue>> for PartialResult {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}

impl From<PartialResult> for JsonValue {
    fn from(result: PartialResult) -> Self {
        result.into_value()
    }
}

/// 规则谓词 Trait
#[async_trait]
pub trait RulePredicate: Send + Sync {
    async fn should_resolve(&self, ctx: &RuleContext) -> anyhow::Result<bool>;
}

/// 规则解析器 Trait
#[async_trait]
pub trait RuleResolver: Send + Sync {
    async fn resolve(&self, ctx: &RuleContext) -> anyhow::Result<Option<PartialResult>>;
}

#[async_trait]
impl<T> RulePredicate for Arc<T>
where
    T: RulePredicate + ?Sized,
{
    async fn should_resolve(&self, ctx: &RuleContext) -> anyhow::Result<bool> {
        (**self).should_resolve(ctx).await
    }
}

#[async_trait]
impl<T> RuleResolver for Arc<T>
where
    T: RuleResolver + ?Sized,
{
    async fn resolve(&self, ctx: &RuleContext) -> anyhow::Result<Option<PartialResult>> {
        (**self).resolve(ctx).await
    }
}

/// 同步闭包形式的谓词
pub struct FnPredicate<F>(F);

#[async_trait]
impl<F> RulePredicate for FnPredicate<F>
where
    F: Fn(&RuleContext) -> anyhow::Result<bool> + Send + Sync,
{
    async fn should_resolve(&self, ctx: &RuleContext) -> anyhow::Result<bool> {
        (self.0)(ctx)
    }
}

/// 同步闭包形式的解析器
pub struct FnResolver<F>(F);

#[async_trait]
impl<F> RuleResolver for FnResolver<F>
where
    F: Fn(&RuleContext) -> anyhow::Result<Option<PartialResult>> + Send + Sync,
{
    async fn resolve(&self, ctx: &RuleContext) -> anyhow::Result<Option<PartialResult>> {
        (self.0)(ctx)
    }
}

pub fn predicate_fn<F>(f: F) -> Arc<dyn RulePredicate>
where
    F: Fn(&RuleContext) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(FnPredicate(f))
}

pub fn resolver_fn<F>(f: F) -> Arc<dyn RuleResolver>
where
    F: Fn(&RuleContext) -> anyhow::Result<Option<PartialResult>> + Send + Sync + 'static,
{
    Arc::new(FnResolver(f))
}

/// 规则在某个 Hook 上的绑定
///
/// 全局绑定只需要解析器；作用域绑定必须同时提供谓词与解析器，
/// 缺失的部分在注册表分类时被拒绝。
#[derive(Clone, Default)]
pub struct HookBinding {
    pub global: bool,
    pub predicate: Option<Arc<dyn RulePredicate>>,
    pub resolver: Option<Arc<dyn RuleResolver>>,
    pub timeout: Option<Duration>,
}

impl HookBinding {
    pub fn global(resolver: Arc<dyn RuleResolver>) -> Self {
        Self {
            global: true,
            predicate: None,
            resolver: Some(resolver),
            timeout: None,
        }
    }

    pub fn scoped(predicate: Arc<dyn RulePredicate>, resolver: Arc<dyn RuleResolver>) -> Self {
        Self {
            global: false,
            predicate: Some(predicate),
            resolver: Some(resolver),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for HookBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBinding")
            .field("global", &self.global)
            .field("has_predicate", &self.predicate.is_some())
            .field("has_resolver", &self.resolver.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// 规则模块
///
/// 每种 Hook 至多一个绑定；`preprocessors` 与 `routes` 是有序的子模块组，
/// 加载时被展平为同级条目。
#[derive(Debug, Clone, Default)]
pub struct RuleModule {
    name: String,
    bindings: BTreeMap<HookKind, HookBinding>,
    preprocessors: Vec<RuleModule>,
    routes: Vec<RuleModule>,
}

impl RuleModule {
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn bind(mut self, kind: HookKind, binding: HookBinding) -> Self {
        self.bindings.insert(kind, binding);
        self
    }

    pub fn with_preprocessor(mut self, module: RuleModule) -> Self {
        self.preprocessors.push(module);
        self
    }

    pub fn with_route(mut self, module: RuleModule) -> Self {
        self.routes.push(module);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bindings(&self) -> &BTreeMap<HookKind, HookBinding> {
        &self.bindings
    }

    pub fn binding(&self, kind: HookKind) -> Option<&HookBinding> {
        self.bindings.get(&kind)
    }

    pub fn preprocessors(&self) -> &[RuleModule] {
        &self.preprocessors
    }

    pub fn routes(&self) -> &[RuleModule] {
        &self.routes
    }

    /// 带有子模块组的模块只是占位，展平后会被丢弃
    pub fn is_group(&self) -> bool {
        !self.preprocessors.is_empty() || !self.routes.is_empty()
    }

    pub(crate) fn rename<T: Into<String>>(mut self, name: T) -> Self {
        self.name = name.into();
        self
    }

    pub(crate) fn into_groups(self) -> (Vec<RuleModule>, Vec<RuleModule>) {
        (self.preprocessors, self.routes)
    }

    /// 为没有声明超时的绑定设置超时
    pub(crate) fn apply_default_timeout(&mut self, timeout: Duration) {
        for binding in self.bindings.values_mut() {
            binding.timeout.get_or_insert(timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_path_strips_host_and_query() {
        let req = RequestDetail::new("GET", "https://example.com/foo/bar?x=1#top");
        assert_eq!(req.protocol, "https");
        assert_eq!(req.path(), "/foo/bar");

        let bare = RequestDetail::new("GET", "http://example.com");
        assert_eq!(bare.path(), "/");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = ResponseDetail::new(200).with_header("content-type", "text/html; charset=utf-8");
        assert_eq!(resp.content_type(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_response_detail_serializes_camel_case() {
        let resp = ResponseDetail::new(404)
            .with_header("Set-Cookie", vec!["a=1".to_string(), "b=2".to_string()])
            .with_body("missing");
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            value,
            json!({
                "statusCode": 404,
                "header": { "Set-Cookie": ["a=1", "b=2"] },
                "body": "missing"
            })
        );
    }

    #[test]
    fn test_partial_result_rejects_non_objects() {
        assert!(PartialResult::from_value(json!([1, 2])).is_none());
        assert!(PartialResult::from_value(json!(null)).is_none());
        let result = PartialResult::from_value(json!({ "data": false })).unwrap();
        assert_eq!(result.https_allowed(), Some(false));
    }

    #[test]
    fn test_hook_kind_names() {
        assert_eq!(HookKind::BeforeSendRequest.to_string(), "beforeSendRequest");
        assert_eq!(
            serde_json::to_value(HookKind::BeforeDealHttpsRequest).unwrap(),
            json!("beforeDealHttpsRequest")
        );
    }
}
