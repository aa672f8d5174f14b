use std::sync::Arc;

use serde_json::json;

use crate::config::RulesConfig;
use crate::error::Result;

use super::dispatcher::RuleDispatcher;
use super::escape::escape_set_cookie;
use super::types::{
    HookDecision, HookErrorPolicy, HookKind, PartialResult, RequestDetail, ResponseDetail,
    RuleContext,
};

/// 代理引擎调用的 Hook 入口
///
/// 请求期规则失败时按 [`HookErrorPolicy`] 处理：fail-closed 直接返回错误，
/// fail-open 返回 [`HookDecision::PassThrough`]，两种情况下调用方都拿得到错误。
#[derive(Debug, Clone)]
pub struct RuleHooks {
    dispatcher: RuleDispatcher,
    config: Arc<RulesConfig>,
    error_policy: HookErrorPolicy,
}

impl RuleHooks {
    pub fn new(dispatcher: RuleDispatcher, config: Arc<RulesConfig>) -> Self {
        Self {
            dispatcher,
            config,
            error_policy: HookErrorPolicy::default(),
        }
    }

    pub fn with_error_policy(mut self, policy: HookErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn dispatcher(&self) -> &RuleDispatcher {
        &self.dispatcher
    }

    pub fn error_policy(&self) -> HookErrorPolicy {
        self.error_policy
    }

    /// 启动前执行一次预处理器，结果丢弃，失败即终止启动
    pub async fn preprocessors(&self) -> Result<()> {
        let ctx = RuleContext::empty(Arc::clone(&self.config));
        self.dispatcher
            .process_rules(HookKind::Preprocessor, &ctx)
            .await
            .map(|_| ())
    }

    /// 是否对该连接做 HTTPS 拦截，合并结果没有布尔 `data` 时默认放行拦截
    pub async fn before_deal_https_request(
        &self,
        request: &RequestDetail,
    ) -> Result<HookDecision<bool>> {
        let kind = HookKind::BeforeDealHttpsRequest;
        let ctx = self.context(request, None);
        let result = self.dispatcher.process_rules(kind, &ctx).await;
        self.settle(kind, request, result.map(|merged| merged.https_allowed().unwrap_or(true)))
    }

    /// 非空结果表示直接用规则给出的响应短路该请求
    pub async fn before_send_request(
        &self,
        request: &RequestDetail,
    ) -> Result<HookDecision<Option<PartialResult>>> {
        let kind = HookKind::BeforeSendRequest;
        let ctx = self.context(request, None);
        let result = self.dispatcher.process_rules(kind, &ctx).await;
        self.settle(
            kind,
            request,
            result.map(|merged| (!merged.is_empty()).then_some(merged)),
        )
    }

    /// 把合并结果叠加到上游响应上，并转义 `Set-Cookie` 列表
    pub async fn before_send_response(
        &self,
        request: &RequestDetail,
        response: &ResponseDetail,
    ) -> Result<HookDecision<PartialResult>> {
        let kind = HookKind::BeforeSendResponse;
        let ctx = self.context(request, Some(response));
        let result = self.dispatcher.process_rules(kind, &ctx).await;
        self.settle(
            kind,
            request,
            result.map(|mut merged| {
                let upstream = PartialResult::with_response(json!(response));
                merged.fill_missing(&upstream);
                escape_set_cookie(&mut merged);
                merged
            }),
        )
    }

    fn context(&self, request: &RequestDetail, response: Option<&ResponseDetail>) -> RuleContext {
        RuleContext {
            request: Some(request.clone()),
            response: response.cloned(),
            config: Arc::clone(&self.config),
        }
    }

    fn settle<T>(
        &self,
        kind: HookKind,
        request: &RequestDetail,
        result: Result<T>,
    ) -> Result<HookDecision<T>> {
        match result {
            Ok(value) => Ok(HookDecision::Apply(value)),
            Err(error) => match self.error_policy {
                HookErrorPolicy::FailClosed => {
                    tracing::warn!(
                        hook = %kind,
                        url = %request.url,
                        error = %error,
                        "rule hook failed, failing the exchange"
                    );
                    Err(error)
                }
                HookErrorPolicy::FailOpen => {
                    tracing::warn!(
                        hook = %kind,
                        url = %request.url,
                        error = %error,
                        "rule hook failed, passing traffic through unmodified"
                    );
                    Ok(HookDecision::PassThrough { error })
                }
            },
        }
    }
}
