//! Composer capability: PHP dependency management around app code.

use std::path::Path;

use serde_json::Value;

use crate::config::HostConfig;
use crate::context::TaskContext;
use crate::dispatcher::TaskDispatcher;

use super::{Capability, require_shell, unknown_task};

/// Runs `#!composer` commands against the host's root folder.
#[derive(Debug, Default)]
pub struct ComposerCapability;

impl ComposerCapability {
    pub fn new() -> Self {
        Self
    }

    fn root<'a>(host: &'a HostConfig) -> &'a str {
        host.get_str("composerRootFolder")
            .or_else(|| host.get_str("rootFolder"))
            .unwrap_or(".")
    }

    fn run_composer(
        ctx: &mut TaskContext,
        arguments: &str,
        working_dir: &str,
    ) -> anyhow::Result<()> {
        let shell = require_shell(ctx)?;
        shell.cd(Path::new(working_dir))?;
        let result = shell.run(&format!("#!composer {arguments}"), false)?;
        ctx.set_command_result(result);
        Ok(())
    }

    /// The context-supplied composer command, as a `command` string or an
    /// argument list.
    fn context_command(ctx: &TaskContext) -> Option<String> {
        match ctx.get("command")? {
            Value::String(command) => Some(command.clone()),
            Value::Array(parts) => Some(
                parts
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" "),
            ),
            _ => None,
        }
    }
}

impl Capability for ComposerCapability {
    fn name(&self) -> &'static str {
        "composer"
    }

    fn task_names(&self) -> &'static [&'static str] {
        &["composer", "appUpdate", "appCreate"]
    }

    fn invoke(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        _dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        match task {
            "composer" => {
                let command = Self::context_command(ctx)
                    .ok_or_else(|| anyhow::anyhow!("No composer command on the context"))?;
                Self::run_composer(ctx, &command, Self::root(host))
            }
            "appUpdate" => Self::run_composer(ctx, "install", Self::root(host)),
            "appCreate" => {
                // Dependencies are only installed once the code stage has
                // produced a checkout to install into.
                let stage = ctx
                    .get("currentStage")
                    .and_then(|stage| {
                        stage
                            .as_str()
                            .or_else(|| stage.get("stage").and_then(Value::as_str))
                    })
                    .unwrap_or_default();
                if stage != "installDependencies" {
                    return Ok(());
                }
                let install_dir = ctx
                    .get_str("installDir")
                    .unwrap_or_else(|| Self::root(host))
                    .to_string();
                Self::run_composer(ctx, "install", &install_dir)
            }
            other => Err(unknown_task(self.name(), other)),
        }
    }
}
