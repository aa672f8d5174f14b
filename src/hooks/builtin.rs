//! 内置规则包
//!
//! - `example-rule`：首次启动时写入规则目录的示例规则
//! - `page-title`：改写 HTML 页面的 `<title>`

use std::cell::Cell;
use std::sync::Arc;

use anyhow::Context;
use lol_html::html_content::ContentType;
use lol_html::{HtmlRewriter, Settings, element};
use serde_json::json;

use super::selector::{HookSelector, MatchRule};
use super::types::{HookBinding, HookKind, PartialResult, RuleModule, resolver_fn};

pub const EXAMPLE_RULE: &str = "example-rule";
pub const EXAMPLE_RULE_DESCRIPTION: &str =
    "Fakes any fake.js request and replaces HTML pages with a welcome page";
pub const PAGE_TITLE: &str = "page-title";

/// 规则配置中 `page-title` 读取的字段
pub const PAGE_TITLE_KEY: &str = "pageTitle";
const DEFAULT_PAGE_TITLE: &str = "Proxus";

const WELCOME_PAGE: &str = "<html><head><title>Proxus!</title></head><body><h1>Proxus is Working!</h1></body></html>";

pub fn example_rule() -> anyhow::Result<RuleModule> {
    Ok(RuleModule::new(EXAMPLE_RULE)
        .with_route(fake_js()?)
        .with_route(main_html()?))
}

/// 拦截 URL 中带 `fake.js` 的请求，直接返回一段脚本
fn fake_js() -> anyhow::Result<RuleModule> {
    let selector = HookSelector::new().with_urls(MatchRule::pattern(r"fake\.js")?);
    let resolver = resolver_fn(|ctx| {
        let request = ctx.request().context("fake-js requires a request")?;
        let mut headers = request.headers.clone();
        headers.retain(|name, _| !name.eq_ignore_ascii_case("content-type"));
        headers.insert("Content-Type".to_string(), "application/javascript".into());

        Ok(Some(PartialResult::with_response(json!({
            "statusCode": 200,
            "header": headers,
            "body": "console.log(\"Fake!\");",
        }))))
    });

    Ok(RuleModule::new("fake-js").bind(
        HookKind::BeforeSendRequest,
        HookBinding::scoped(Arc::new(selector), resolver),
    ))
}

/// 所有 HTML 响应替换为欢迎页
fn main_html() -> anyhow::Result<RuleModule> {
    let selector = HookSelector::new().with_content_types(MatchRule::pattern(r"text/html")?);
    let resolver = resolver_fn(|_| {
        Ok(Some(PartialResult::with_response(json!({ "body": WELCOME_PAGE }))))
    });

    Ok(RuleModule::new("main-html").bind(
        HookKind::BeforeSendResponse,
        HookBinding::scoped(Arc::new(selector), resolver),
    ))
}

pub fn page_title() -> anyhow::Result<RuleModule> {
    let selector = HookSelector::new().with_content_types(MatchRule::pattern(r"text/html")?);
    let resolver = resolver_fn(|ctx| {
        let response = ctx.response().context("page-title requires a response")?;
        let title = ctx
            .config
            .extra(PAGE_TITLE_KEY)
            .and_then(|value| value.as_str())
            .unwrap_or(DEFAULT_PAGE_TITLE);

        Ok(rewrite_titles(&response.body, title)?
            .map(|body| PartialResult::with_response(json!({ "body": body }))))
    });

    Ok(RuleModule::new(PAGE_TITLE).bind(
        HookKind::BeforeSendResponse,
        HookBinding::scoped(Arc::new(selector), resolver),
    ))
}

/// 把每个 `<title>` 元素的文本替换为 `title`，页面中没有 `<title>` 时返回 None
fn rewrite_titles(html: &str, title: &str) -> anyhow::Result<Option<String>> {
    let found = Cell::new(false);
    let mut output = Vec::with_capacity(html.len());

    let settings = Settings {
        element_content_handlers: vec![element!("title", |el| {
            found.set(true);
            el.set_inner_content(title, ContentType::Text);
            Ok(())
        })],
        ..Settings::default()
    };
    let mut rewriter = HtmlRewriter::new(settings, |chunk: &[u8]| {
        output.extend_from_slice(chunk);
    });
    rewriter.write(html.as_bytes())?;
    rewriter.end()?;

    if !found.get() {
        return Ok(None);
    }
    Ok(Some(String::from_utf8(output)?))
}
