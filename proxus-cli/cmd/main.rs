use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use proxus_core::config::{ConfigStore, ConfigUpdate, EngineSettings, load_settings};
use proxus_core::hooks::{
    HookKind, RuleCatalog, RuleDispatcher, RuleHooks, RuleLoader, RuleRegistry, discover_rules,
};
use proxus_core::tracing::init_tracing_from_config;

#[derive(Parser, Debug)]
#[command(name = "proxus", version, about = "Manage Proxus rules and configuration")]
struct Cli {
    /// Engine settings TOML file
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Directory holding one sub-directory per rule
    #[arg(long, global = true)]
    rules_path: Option<PathBuf>,

    /// Rules config JSON file
    #[arg(long, global = true)]
    rules_config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect available rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Inspect or change the rules config
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Load the enabled rule, classify it and run its preprocessors
    Check,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// List rule directories, marking the enabled one
    List,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the rules config
    Show,
    /// Update the rules config, effective on next start
    Set(SetArgs),
}

#[derive(Args, Debug)]
struct SetArgs {
    /// Rule to enable, must match a rule directory
    #[arg(long)]
    enabled_rule: Option<String>,

    /// Domain to proxy
    #[arg(long)]
    domain: Option<String>,
}

impl Cli {
    fn settings(&self) -> anyhow::Result<EngineSettings> {
        let mut settings = load_settings(self.settings.as_deref())?;
        if let Some(path) = &self.rules_path {
            settings.rules.path = path.clone();
        }
        if let Some(path) = &self.rules_config_file {
            settings.rules.config_file = path.clone();
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;
    if let Err(err) = init_tracing_from_config(Some(&settings.logging)) {
        eprintln!("failed to initialise logging: {err}");
    }

    match cli.command {
        Command::Rules(RulesCommand::List) => list_rules(&settings),
        Command::Config(ConfigCommand::Show) => show_config(&settings.config_store()),
        Command::Config(ConfigCommand::Set(args)) => set_config(&settings.config_store(), args),
        Command::Check => check(&settings).await,
    }
}

fn list_rules(settings: &EngineSettings) -> anyhow::Result<()> {
    let store = settings.config_store();
    let enabled = store.read().ok().map(|config| config.enabled_rule);
    let catalog = RuleCatalog::builtin();

    for name in discover_rules(&settings.rules.path)? {
        let marker = if enabled.as_deref() == Some(name.as_str()) { "*" } else { " " };
        let note = if catalog.contains(&name) { "" } else { " (no registered package)" };
        println!("{marker} {name}{note}");
    }
    Ok(())
}

fn show_config(store: &ConfigStore) -> anyhow::Result<()> {
    let config = store.read()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn set_config(store: &ConfigStore, args: SetArgs) -> anyhow::Result<()> {
    let update = ConfigUpdate {
        enabled_rule: args.enabled_rule,
        domain: args.domain,
        ..Default::default()
    };
    if update.is_empty() {
        bail!("nothing to update, pass --enabled-rule and/or --domain");
    }

    let config = store.write(update)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    println!("Restart the proxy for the change to take effect.");
    Ok(())
}

async fn check(settings: &EngineSettings) -> anyhow::Result<()> {
    let loader = RuleLoader::new(settings.config_store(), RuleCatalog::builtin());
    let graph = loader.load()?;
    let rule = graph.rule.clone();
    let config = Arc::clone(&graph.config);

    let registry = RuleRegistry::classify(graph.modules)?;
    let summary = registry.summary();
    info!(rule = %rule, %summary, "rules classified");

    let dispatcher =
        RuleDispatcher::new(Arc::new(registry)).with_options(settings.dispatch_options());
    let hooks = RuleHooks::new(dispatcher, config).with_error_policy(settings.dispatch.error_policy);
    hooks
        .preprocessors()
        .await
        .with_context(|| format!("preprocessors of rule \"{rule}\" failed"))?;

    println!("Rule \"{rule}\" loaded from {}", graph.path.display());
    for kind in HookKind::ALL {
        let (global, scoped) = summary.counts(kind);
        println!("  {:<24} global={global} scoped={scoped}", kind.as_str());
    }
    Ok(())
}
