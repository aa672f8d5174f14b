// 规则加载集成测试：目录初始化、启用规则的查找、展平与内置规则
mod common;

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use proxus_core::config::{ConfigUpdate, DEFAULT_DOMAIN, DEFAULT_RULE};
use proxus_core::error::{ErrorCode, ProxusError};
use proxus_core::hooks::{
    HookKind, RequestDetail, ResponseDetail, RuleCatalog, RuleDispatcher, RuleHooks, RuleLoader,
    RuleModule, RuleRegistry, discover_rules,
};

use common::{Scratch, delayed, global, returning};

async fn hooks_for(scratch: &Scratch, catalog: RuleCatalog) -> Result<RuleHooks> {
    let graph = RuleLoader::new(scratch.store(), catalog).load()?;
    let registry = RuleRegistry::classify(graph.modules)?;
    let hooks = RuleHooks::new(RuleDispatcher::new(Arc::new(registry)), graph.config);
    hooks.preprocessors().await?;
    Ok(hooks)
}

#[test]
fn missing_enabled_rule_names_rule_and_config_file() {
    let scratch = Scratch::new();
    scratch.add_rule_dir("present", None);
    scratch.write_config(json!({ "enabledRule": "absent", "domain": "a.test" }));

    let err = RuleLoader::new(scratch.store(), RuleCatalog::builtin())
        .load()
        .unwrap_err();
    assert!(matches!(err, ProxusError::RuleNotFound { .. }));
    assert_eq!(err.code(), ErrorCode::ConfigurationError);
    let message = err.to_string();
    assert!(message.contains("\"absent\""));
    assert!(message.contains(&scratch.config_file().display().to_string()));
}

#[test]
fn seeding_is_idempotent() -> Result<()> {
    let scratch = Scratch::new();
    let loader = RuleLoader::new(scratch.store(), RuleCatalog::builtin());

    loader.ensure_layout()?;
    let config = scratch.store().read()?;
    assert_eq!(config.enabled_rule, DEFAULT_RULE);
    assert_eq!(config.domain, DEFAULT_DOMAIN);

    scratch.write_config(json!({ "enabledRule": DEFAULT_RULE, "domain": "kept.test" }));
    loader.ensure_layout()?;
    assert_eq!(scratch.store().read()?.domain, "kept.test");
    assert_eq!(discover_rules(&scratch.rules_path())?, vec![DEFAULT_RULE.to_string()]);
    assert!(scratch.rules_path().join(DEFAULT_RULE).join("rule.json").is_file());
    Ok(())
}

#[test]
fn directory_without_package_is_a_module_load_error() {
    let scratch = Scratch::new();
    scratch.add_rule_dir("orphan", None);
    scratch.write_config(json!({ "enabledRule": "orphan" }));

    let err = RuleLoader::new(scratch.store(), RuleCatalog::builtin())
        .load()
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::ModuleLoadError);
    assert_eq!(err.rule(), Some("orphan"));
}

#[test]
fn example_rule_is_flattened_into_routes() -> Result<()> {
    let scratch = Scratch::new();
    let graph = RuleLoader::new(scratch.store(), RuleCatalog::builtin()).load()?;

    assert_eq!(graph.rule, DEFAULT_RULE);
    let names: Vec<&str> = graph.modules.iter().map(RuleModule::name).collect();
    assert_eq!(names, vec!["example-rule-routes-0", "example-rule-routes-1"]);
    assert_eq!(graph.config.domain, DEFAULT_DOMAIN);
    Ok(())
}

#[tokio::test]
async fn example_rule_fakes_script_and_replaces_html() -> Result<()> {
    common::init_tracing();
    let scratch = Scratch::new();
    let hooks = hooks_for(&scratch, RuleCatalog::builtin()).await?;

    let script = RequestDetail::new("GET", "http://example.com/assets/fake.js");
    let payload = hooks
        .before_send_request(&script)
        .await?
        .applied()
        .flatten()
        .expect("fake.js is short-circuited");
    assert_eq!(payload.response().unwrap()["body"], "console.log(\"Fake!\");");

    let page = RequestDetail::new("GET", "http://example.com/");
    assert_eq!(hooks.before_send_request(&page).await?.applied(), Some(None));

    let html = ResponseDetail::new(200)
        .with_header("Content-Type", "text/html; charset=utf-8")
        .with_body("<html>upstream</html>");
    let merged = hooks
        .before_send_response(&page, &html)
        .await?
        .applied()
        .expect("html response");
    let body = merged.response().unwrap()["body"].as_str().unwrap().to_string();
    assert!(body.contains("Proxus is Working!"));

    let css = ResponseDetail::new(200)
        .with_header("Content-Type", "text/css")
        .with_body("body {}");
    let merged = hooks
        .before_send_response(&page, &css)
        .await?
        .applied()
        .expect("css response");
    assert_eq!(merged.response().unwrap()["body"], "body {}");
    Ok(())
}

#[tokio::test]
async fn switching_rules_through_the_store() -> Result<()> {
    let scratch = Scratch::new();
    let store = scratch.store();
    RuleLoader::new(store.clone(), RuleCatalog::builtin()).ensure_layout()?;
    scratch.add_rule_dir("page-title", None);

    let mut update = ConfigUpdate {
        enabled_rule: Some("page-title".to_string()),
        ..Default::default()
    };
    update.extra.insert("pageTitle".to_string(), json!("Intercepted"));
    store.write(update)?;

    let hooks = hooks_for(&scratch, RuleCatalog::builtin()).await?;
    let html = ResponseDetail::new(200)
        .with_header("Content-Type", "text/html")
        .with_body("<html><head><title>Shop</title></head></html>");
    let merged = hooks
        .before_send_response(&RequestDetail::new("GET", "http://example.com/"), &html)
        .await?
        .applied()
        .expect("html response");
    assert_eq!(
        merged.response().unwrap()["body"],
        "<html><head><title>Intercepted</title></head></html>"
    );
    Ok(())
}

#[tokio::test]
async fn manifest_timeout_applies_to_package_bindings() -> Result<()> {
    let scratch = Scratch::new();
    scratch.add_rule_dir("slow", Some(r#"{ "description": "slow rule", "timeoutMs": 10 }"#));
    scratch.write_config(json!({ "enabledRule": "slow", "domain": "slow.test" }));

    let catalog = RuleCatalog::new().register("slow", || {
        Ok(RuleModule::new("slow")
            .with_preprocessor(global(
                "warm",
                HookKind::Preprocessor,
                returning(json!({ "warm": true })),
            ))
            .with_route(global(
                "lagging",
                HookKind::BeforeSendRequest,
                delayed(300, json!({ "late": true })),
            )))
    });

    let graph = RuleLoader::new(scratch.store(), catalog.clone()).load()?;
    assert_eq!(graph.manifest.timeout(), Some(Duration::from_millis(10)));
    let names: Vec<&str> = graph.modules.iter().map(RuleModule::name).collect();
    assert_eq!(names, vec!["slow-preprocessor-0", "slow-routes-0"]);

    let hooks = hooks_for(&scratch, catalog).await?;
    let err = hooks
        .before_send_request(&RequestDetail::new("GET", "http://slow.test/"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::OperationTimeout);
    assert_eq!(err.rule(), Some("slow-routes-0"));
    Ok(())
}

#[test]
fn store_rejects_unknown_rule_and_keeps_file() -> Result<()> {
    let scratch = Scratch::new();
    RuleLoader::new(scratch.store(), RuleCatalog::builtin()).ensure_layout()?;
    let before = fs::read_to_string(scratch.config_file())?;

    let err = scratch
        .store()
        .write(ConfigUpdate {
            enabled_rule: Some("nonexistent".to_string()),
            ..Default::default()
        })
        .unwrap_err();
    assert!(err.to_string().contains("example-rule"));
    assert_eq!(fs::read_to_string(scratch.config_file())?, before);
    Ok(())
}
