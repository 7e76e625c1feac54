//! Docker capability: scripted tasks against a docker host plus a small set
//! of internal container helpers.

use std::rc::Rc;
use std::thread;
use std::time::Duration;

use anyhow::{Context as _, bail};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::{HostConfig, Settings, as_string_lines};
use crate::context::TaskContext;
use crate::dispatcher::TaskDispatcher;
use crate::script::ScriptEngine;
use crate::shell::ShellHandle;

use super::{Capability, require_shell, unknown_task};

const SERVICE_TRIES: u32 = 10;
const SERVICE_WAIT: Duration = Duration::from_secs(5);

/// Runs docker-host tasks. The `docker` task reads the sub-task name from
/// the context and surrounds it with silent `Prepare`/`Finished` runs;
/// internal helpers (`waitForServices`, `startRemoteAccess`) execute
/// directly, everything else resolves to a scripted task on the configured
/// docker host.
#[derive(Debug)]
pub struct DockerCapability {
    settings: Rc<Settings>,
    engine: ScriptEngine,
    service_tries: u32,
    service_wait: Duration,
}

impl DockerCapability {
    pub fn new(settings: Rc<Settings>) -> Self {
        Self {
            engine: ScriptEngine::new(settings.clone()),
            settings,
            service_tries: SERVICE_TRIES,
            service_wait: SERVICE_WAIT,
        }
    }

    #[cfg(test)]
    fn with_timing(settings: Rc<Settings>, tries: u32, wait: Duration) -> Self {
        Self {
            engine: ScriptEngine::new(settings.clone()),
            settings,
            service_tries: tries,
            service_wait: wait,
        }
    }

    fn docker_config(&self, host: &HostConfig) -> anyhow::Result<Value> {
        let name = host
            .get_path("docker.configuration")
            .and_then(Value::as_str)
            .context("Host declares no docker.configuration")?;
        self.settings
            .docker_host(name)
            .cloned()
            .with_context(|| format!("No dockerHosts entry named `{name}`"))
    }

    fn run_docker_task(
        &self,
        task: &str,
        silent: bool,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        info!(task, config = %host.config_name, "running docker task");

        match task {
            "waitForServices" => return self.wait_for_services(host, ctx),
            "startRemoteAccess" => return self.start_remote_access(host, ctx),
            _ => {}
        }

        self.run_scripted_task(task, silent, host, ctx, dispatcher)
    }

    fn run_scripted_task(
        &self,
        task: &str,
        silent: bool,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        let docker_config = self.docker_config(host)?;
        let script = docker_config
            .get("tasks")
            .and_then(|tasks| tasks.get(task))
            .and_then(as_string_lines);
        let Some(script) = script else {
            if silent {
                return Ok(());
            }
            bail!("Missing docker task `{task}`");
        };

        ctx.set("scriptData", json!(script));
        ctx.set("variables", json!({ "dockerHost": docker_config }));
        ctx.set(
            "environment",
            docker_config
                .get("environment")
                .cloned()
                .unwrap_or_else(|| json!({})),
        );
        ctx.set(
            "rootFolder",
            docker_config.get("rootFolder").cloned().unwrap_or(json!(".")),
        );
        self.engine.run_script(host, ctx, dispatcher)
    }

    /// Poll supervisord until every service reports RUNNING; bounded tries
    /// with a fixed synchronous wait, hard failure on exhaustion.
    fn wait_for_services(&self, host: &HostConfig, ctx: &TaskContext) -> anyhow::Result<()> {
        if host.get_path("executables.supervisorctl") == Some(&json!(false)) {
            return Ok(());
        }
        let shell = require_shell(ctx)?;

        for _ in 0..self.service_tries {
            let result = shell.run("#!supervisorctl status", true)?;
            if result.exit_code() != 0 {
                bail!("Error running supervisorctl, check the logs");
            }

            let services = result
                .output()
                .iter()
                .filter(|line| !line.trim().is_empty())
                .count();
            let running = result
                .output()
                .iter()
                .filter(|line| line.contains("RUNNING"))
                .count();
            if running == services {
                info!("Services up and running!");
                return Ok(());
            }

            warn!(
                running,
                services,
                "Waiting for {} secs and trying again ...",
                self.service_wait.as_secs()
            );
            thread::sleep(self.service_wait);
        }

        error!("Supervisord not coming up at all!");
        bail!("Docker services did not come up");
    }

    fn container_running(shell: &ShellHandle, container: &str) -> anyhow::Result<bool> {
        let result = shell.run(
            &format!("docker inspect -f {{{{.State.Running}}}} {container}"),
            true,
        )?;
        Ok(result
            .output()
            .last()
            .map(|line| line.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false))
    }

    fn ip_address(&self, host: &HostConfig, ctx: &TaskContext) -> anyhow::Result<Option<String>> {
        let shell = require_shell(ctx)?;
        let container = host
            .get_path("docker.name")
            .and_then(Value::as_str)
            .context("Host declares no docker.name")?;

        if !Self::container_running(&shell, container)? {
            return Ok(None);
        }

        let result = shell.run(
            &format!(
                "docker inspect --format \"{{{{range .NetworkSettings.Networks}}}}{{{{.IPAddress}}}}\\n{{{{end}}}}\" {container}"
            ),
            true,
        )?;
        if result.exit_code() != 0 {
            return Ok(None);
        }
        Ok(result
            .output()
            .first()
            .map(|line| line.replace("\\r", "").replace("\\n", "")))
    }

    fn start_remote_access(&self, host: &HostConfig, ctx: &mut TaskContext) -> anyhow::Result<()> {
        let ip = self.ip_address(host, ctx)?;
        ctx.results_mut()
            .set("ip", ip.map(Value::String).unwrap_or(json!(false)));
        Ok(())
    }
}

impl Capability for DockerCapability {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn task_names(&self) -> &'static [&'static str] {
        &["docker", "waitForServices", "startRemoteAccess"]
    }

    fn invoke(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        match task {
            "docker" => {
                let sub_task = ctx
                    .get_str("docker_task")
                    .context("No docker_task on the context")?
                    .to_string();
                self.run_docker_task(&format!("{sub_task}Prepare"), true, host, ctx, dispatcher)?;
                self.run_docker_task(&sub_task, false, host, ctx, dispatcher)?;
                self.run_docker_task(&format!("{sub_task}Finished"), true, host, ctx, dispatcher)
            }
            "waitForServices" => self.wait_for_services(host, ctx),
            "startRemoteAccess" => self.start_remote_access(host, ctx),
            other => Err(unknown_task(self.name(), other)),
        }
    }
}
