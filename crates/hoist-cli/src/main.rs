//! Hoist - deployment orchestration
//!
//! Usage:
//!   hoist --host mars deploy             # Deploy the configured branch
//!   hoist --host mars run backup         # Run an arbitrary task
//!   hoist --host mars script setup       # Run a named script
//!   hoist --host mars composer -- update # Run composer on the host
//!   hoist --host mars list-backups       # Show recorded backups

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hoist_core::config::as_string_lines;
use hoist_core::error::is_early_exit;
use hoist_core::prelude::*;

#[derive(Parser)]
#[command(name = "hoist")]
#[command(about = "Deployment orchestration", long_about = None)]
struct Cli {
    /// Path to the fabfile
    #[arg(long, short, default_value = "hoist.yaml")]
    fabfile: PathBuf,

    /// Name of the host configuration to run against
    #[arg(long)]
    host: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy the application to the host
    Deploy {
        /// Branch to deploy instead of the configured one
        #[arg(long)]
        branch: Option<String>,
    },

    /// Run an arbitrary task through its full lifecycle
    Run {
        /// Task name, as capability handlers and scripts know it
        task: String,
    },

    /// Run a named script from the host's or the fabfile's `scripts`
    Script {
        /// Script name
        name: String,
    },

    /// Run a composer command against the host
    Composer {
        /// Arguments passed to composer verbatim
        #[arg(trailing_var_arg = true, required = true)]
        args: Vec<String>,
    },

    /// List the backups recorded for this host
    ListBackups {
        /// Restrict the listing to these backup types
        what: Vec<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hoist=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let exit_code = run(cli)?;
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32> {
    let fabfile = load_fabfile(&cli.fabfile)?;
    let settings = Rc::new(settings_from(&fabfile)?);
    let host = host_config(&fabfile, &cli.host)?;
    let dispatcher = build_dispatcher(settings.clone())?;

    let mut ctx = TaskContext::new();
    ctx.set_shell(Rc::new(LocalShell::new(
        host.get_str("rootFolder").unwrap_or(".").into(),
        host.executables(),
    )));

    let outcome = match &cli.command {
        Commands::Deploy { branch } => {
            if let Some(branch) = branch {
                ctx.set("branch", json!(branch));
            }
            dispatcher.run_task("deploy", &host, &mut ctx, &[])
        }
        Commands::Run { task } => dispatcher.run_task(task, &host, &mut ctx, &[]),
        Commands::Script { name } => {
            let script = named_script(&host, &settings, name)
                .with_context(|| format!("No script named `{name}` found"))?;
            ctx.set("scriptData", json!(script));
            dispatcher.call("script", "runScript", &host, &mut ctx)
        }
        Commands::Composer { args } => {
            ctx.set("command", json!(args.join(" ")));
            dispatcher.run_task("composer", &host, &mut ctx, &[])
        }
        Commands::ListBackups { what } => {
            let result = dispatcher.run_task("listBackups", &host, &mut ctx, &[]);
            if result.is_ok() {
                print_backups(&ctx, what);
            }
            result
        }
    };

    match outcome {
        Ok(()) => Ok(ctx.exit_code()),
        Err(err) if is_early_exit(&err) => {
            error!("Task aborted early: {err}");
            Ok(1)
        }
        Err(err) => Err(err),
    }
}

fn load_fabfile(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot read fabfile at {}", path.display()))?;
    let fabfile: Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("Cannot parse fabfile at {}", path.display()))?;
    if !fabfile.is_object() {
        bail!("Fabfile at {} is not a mapping", path.display());
    }
    info!(fabfile = %path.display(), "loaded fabfile");
    Ok(fabfile)
}

fn settings_from(fabfile: &Value) -> Result<Settings> {
    serde_json::from_value(fabfile.clone()).context("Fabfile does not form a settings mapping")
}

/// Resolve a host entry: the `hosts` map keyed by name, with the global
/// `needs` list applied when the host declares none.
fn host_config(fabfile: &Value, name: &str) -> Result<HostConfig> {
    let entry = fabfile
        .get("hosts")
        .and_then(|hosts| hosts.get(name))
        .with_context(|| format!("No host named `{name}` in the fabfile"))?;

    let mut host: HostConfig =
        serde_json::from_value(entry.clone()).with_context(|| format!("Invalid host `{name}`"))?;
    host.config_name = name.to_string();

    if host.needs.is_empty() {
        host.needs = fabfile
            .get("needs")
            .and_then(as_string_lines)
            .unwrap_or_else(|| vec!["script".to_string(), "local".to_string()]);
    }
    Ok(host)
}

fn build_dispatcher(settings: Rc<Settings>) -> Result<TaskDispatcher> {
    let mut registry = CapabilityRegistry::new();
    registry.register(Box::new(ScriptCapability::new(settings.clone())))?;
    registry.register(Box::new(GitCapability::new(settings.clone())))?;
    registry.register(Box::new(ComposerCapability::new()))?;
    registry.register(Box::new(DockerCapability::new(settings)))?;
    registry.register(Box::new(LocalCapability::new()))?;
    Ok(TaskDispatcher::new(registry))
}

/// A named script from the host's `scripts` map, falling back to the
/// fabfile-global one.
fn named_script(host: &HostConfig, settings: &Settings, name: &str) -> Option<Vec<String>> {
    host.get("scripts")
        .and_then(|scripts| scripts.get(name))
        .and_then(as_string_lines)
        .or_else(|| {
            settings
                .get("scripts")
                .and_then(|scripts| scripts.get(name))
                .and_then(as_string_lines)
        })
}

/// Print the `files` result of a `listBackups` run, newest first, filtered
/// to the requested backup types.
fn print_backups(ctx: &TaskContext, what: &[String]) {
    let mut files: Vec<&serde_json::Map<String, Value>> = ctx
        .results()
        .get("files")
        .and_then(Value::as_array)
        .map(|files| files.iter().filter_map(Value::as_object).collect())
        .unwrap_or_default();

    if !what.is_empty() {
        files.retain(|file| {
            file.get("type")
                .and_then(Value::as_str)
                .is_some_and(|t| what.iter().any(|w| w == t))
        });
    }
    if files.is_empty() {
        println!("No backups found.");
        return;
    }

    files.sort_by(|a, b| {
        let key = |file: &&serde_json::Map<String, Value>| {
            file.get("file")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        key(b).cmp(&key(a))
    });

    let mut by_type: HashMap<&str, usize> = HashMap::new();
    for file in &files {
        let file_type = file.get("type").and_then(Value::as_str).unwrap_or("file");
        *by_type.entry(file_type).or_default() += 1;
        println!(
            "{:<12} {:<20} {}",
            file_type,
            file.get("date").and_then(Value::as_str).unwrap_or("-"),
            file.get("file").and_then(Value::as_str).unwrap_or("?"),
        );
    }
    let summary: Vec<String> = by_type
        .iter()
        .map(|(file_type, count)| format!("{count} {file_type}"))
        .collect();
    println!("{} backups ({})", files.len(), summary.join(", "));
}
