use std::collections::HashSet;

use async_trait::async_trait;
use regex::Regex;

use super::types::{HeaderValue, RuleContext, RulePredicate};

#[derive(Debug, Clone, Default)]
pub enum MatchRule {
    #[default]
    Any,
    Exact {
        values: HashSet<String>,
    },
    Pattern {
        regex: Regex,
    },
}

impl MatchRule {
    pub fn any() -> Self {
        MatchRule::Any
    }

    pub fn of<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        MatchRule::Exact {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(MatchRule::Pattern {
            regex: Regex::new(pattern)?,
        })
    }

    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            MatchRule::Any => true,
            MatchRule::Exact { values } => value.map(|val| values.contains(val)).unwrap_or(false),
            MatchRule::Pattern { regex } => value.map(|val| regex.is_match(val)).unwrap_or(false),
        }
    }
}

/// 声明式谓词：URL、方法与内容类型同时匹配才算命中
///
/// 内容类型优先取响应头，没有响应时取请求头。
#[derive(Debug, Clone, Default)]
pub struct HookSelector {
    pub urls: MatchRule,
    pub methods: MatchRule,
    pub content_types: MatchRule,
}

impl HookSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_urls(mut self, rule: MatchRule) -> Self {
        self.urls = rule;
        self
    }

    pub fn with_methods(mut self, rule: MatchRule) -> Self {
        self.methods = rule;
        self
    }

    pub fn with_content_types(mut self, rule: MatchRule) -> Self {
        self.content_types = rule;
        self
    }

    pub fn matches(&self, ctx: &RuleContext) -> bool {
        let request = ctx.request();
        let content_type = match ctx.response() {
            Some(response) => response.content_type(),
            None => request
                .and_then(|req| req.header("Content-Type"))
                .and_then(HeaderValue::first),
        };

        self.urls.matches(request.map(|req| req.url.as_str()))
            && self.methods.matches(request.map(|req| req.method.as_str()))
            && self.content_types.matches(content_type)
    }
}

#[async_trait]
impl RulePredicate for HookSelector {
    async fn should_resolve(&self, ctx: &RuleContext) -> anyhow::Result<bool> {
        Ok(self.matches(ctx))
    }
}
