//! Git capability: code deployment from a tracked repository.

use std::path::Path;
use std::rc::Rc;

use anyhow::{Context as _, bail};
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::config::{HostConfig, Settings};
use crate::context::TaskContext;
use crate::dispatcher::TaskDispatcher;
use crate::error::EngineError;
use crate::shell::ShellHandle;

use super::{Capability, require_shell, unknown_task};

const TASKS: &[&str] = &[
    "version",
    "deploy",
    "backupPrepare",
    "getMetaInformation",
    "appCheckExisting",
    "appCreate",
];

/// Deploys and inspects a git working copy through `#!git` commands.
#[derive(Debug)]
pub struct GitCapability {
    settings: Rc<Settings>,
}

impl GitCapability {
    pub fn new(settings: Rc<Settings>) -> Self {
        Self { settings }
    }

    fn git_root<'a>(host: &'a HostConfig) -> &'a str {
        host.get_str("gitRootFolder")
            .or_else(|| host.get_str("rootFolder"))
            .unwrap_or(".")
    }

    /// `git describe` output with slashes mapped to dashes, or empty when
    /// the working copy has no describable state.
    fn version(shell: &ShellHandle, host: &HostConfig) -> anyhow::Result<String> {
        shell.cd(Path::new(Self::git_root(host)))?;
        let result = shell.run("#!git describe --always --tags", true)?;
        if !result.succeeded() {
            return Ok(String::new());
        }
        Ok(result
            .output()
            .first()
            .map(|line| line.replace('/', "-"))
            .unwrap_or_default())
    }

    fn commit_hash(shell: &ShellHandle, host: &HostConfig) -> anyhow::Result<String> {
        shell.cd(Path::new(Self::git_root(host)))?;
        let result = shell.run("#!git rev-parse HEAD", true)?;
        Ok(result.output().first().cloned().unwrap_or_default())
    }

    fn working_copy_clean(shell: &ShellHandle, host: &HostConfig) -> anyhow::Result<bool> {
        shell.cd(Path::new(Self::git_root(host)))?;
        Ok(shell.run("#!git diff --exit-code --quiet", true)?.succeeded())
    }

    fn deploy(
        &self,
        host: &HostConfig,
        ctx: &mut TaskContext,
    ) -> anyhow::Result<()> {
        let shell = require_shell(ctx)?;
        shell.cd(Path::new(Self::git_root(host)))?;

        if !Self::working_copy_clean(&shell, host)? {
            error!("Working copy is not clean, aborting");
            shell.run("#!git status", false)?;
            return Err(EngineError::EarlyExit.into());
        }

        let branch = ctx
            .get_str("branch")
            .or_else(|| host.get_str("branch"))
            .unwrap_or("develop")
            .to_string();

        shell.run("#!git fetch -q origin", false)?;
        shell.run(&format!("#!git checkout {branch}"), false)?;
        shell.run("#!git fetch --tags", false)?;

        let pull_options = host
            .get_path("gitOptions.pull")
            .and_then(Value::as_array)
            .map(|options| {
                options
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .unwrap_or_default();
        shell.run(
            &format!("#!git pull -q {pull_options} origin {branch}"),
            false,
        )?;

        if !host.get_bool("ignoreSubmodules") {
            shell.run("#!git submodule update --init", false)?;
            shell.run("#!git submodule sync", false)?;
        }
        Ok(())
    }

    /// Splices the version hash into the backup basename right after its
    /// leading component.
    fn backup_prepare(&self, host: &HostConfig, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let shell = require_shell(ctx)?;
        let hash = Self::version(&shell, host)?;
        if hash.is_empty() {
            return Ok(());
        }
        let mut basename: Vec<Value> = ctx
            .results()
            .get("basename")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let at = basename.len().min(1);
        basename.insert(at, json!(hash));
        ctx.results_mut().set("basename", Value::Array(basename));
        Ok(())
    }

    fn meta_information(&self, host: &HostConfig, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let shell = require_shell(ctx)?;
        let version = Self::version(&shell, host)?;
        let commit = Self::commit_hash(&shell, host)?;
        ctx.results_mut().append(
            "meta",
            vec![
                json!({ "label": "Version", "value": version }),
                json!({ "label": "Commit", "value": commit }),
            ],
        );
        Ok(())
    }

    fn app_create(&self, host: &HostConfig, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let stage = ctx
            .get("currentStage")
            .context("Missing currentStage on context")?;
        let stage = stage
            .as_str()
            .or_else(|| stage.get("stage").and_then(Value::as_str))
            .context("currentStage carries no stage name")?;
        if stage != "installCode" {
            return Ok(());
        }

        let shell = require_shell(ctx)?;
        let install_dir = ctx
            .get_str("installDir")
            .unwrap_or_else(|| Self::git_root(host))
            .to_string();
        let Some(repository) = self.settings.get("repository").and_then(Value::as_str) else {
            bail!("Missing `repository` in fabfile! Cannot proceed!");
        };
        let branch = host.get_str("branch").unwrap_or("develop");

        shell.run(
            &format!("#!git clone -b {branch} {repository} {install_dir}"),
            false,
        )?;

        let cwd = shell.working_dir();
        if !host.get_bool("ignoreSubmodules") {
            shell.cd(Path::new(&install_dir))?;
            shell.run("#!git submodule update --init", false)?;
        }
        shell.run("touch .projectCreated", false)?;
        shell.cd(&cwd)?;
        Ok(())
    }
}

impl Capability for GitCapability {
    fn name(&self) -> &'static str {
        "git"
    }

    fn task_names(&self) -> &'static [&'static str] {
        TASKS
    }

    fn invoke(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        _dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        debug!(task, config = %host.config_name, "git task");
        match task {
            "version" => {
                let shell = require_shell(ctx)?;
                let version = Self::version(&shell, host)?;
                ctx.results_mut().set("version", json!(version));
                Ok(())
            }
            "deploy" => self.deploy(host, ctx),
            "backupPrepare" => self.backup_prepare(host, ctx),
            "getMetaInformation" => self.meta_information(host, ctx),
            "appCheckExisting" => {
                if ctx.results().get("appInstallDir").is_none() {
                    ctx.results_mut()
                        .set("appInstallDir", json!(Self::git_root(host)));
                }
                Ok(())
            }
            "appCreate" => self.app_create(host, ctx),
            other => Err(unknown_task(self.name(), other)),
        }
    }
}
