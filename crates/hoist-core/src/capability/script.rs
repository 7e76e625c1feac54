//! Script capability: exposes the script engine through the task table and
//! runs common scripts around every task's lifecycle.

use std::rc::Rc;

use crate::config::{HostConfig, Settings};
use crate::context::TaskContext;
use crate::dispatcher::TaskDispatcher;
use crate::script::{ScriptCallback, ScriptEngine};

use super::{Capability, unknown_task};

/// Wraps a [`ScriptEngine`]; `runScript` executes the context's
/// `scriptData`, and the lifecycle hooks run the `common` scripts
/// configured for the task, `<task>Prepare` and `<task>Finished`.
#[derive(Debug)]
pub struct ScriptCapability {
    engine: ScriptEngine,
}

impl ScriptCapability {
    pub fn new(settings: Rc<Settings>) -> Self {
        Self {
            engine: ScriptEngine::new(settings),
        }
    }

    /// Register an additional script callback before the capability is
    /// handed to the registry.
    pub fn register_callback(&mut self, name: impl Into<String>, callback: ScriptCallback) {
        self.engine.register_callback(name, callback);
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }
}

impl Capability for ScriptCapability {
    fn name(&self) -> &'static str {
        "script"
    }

    fn task_names(&self) -> &'static [&'static str] {
        &["runScript"]
    }

    fn invoke(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        match task {
            "runScript" => self.engine.run_script(host, ctx, dispatcher),
            other => Err(unknown_task(self.name(), other)),
        }
    }

    fn preflight_task(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        self.engine
            .run_task_specific_scripts(host, &format!("{task}Prepare"), ctx, dispatcher)
    }

    fn postflight_task(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        self.engine
            .run_task_specific_scripts(host, &format!("{task}Finished"), ctx, dispatcher)
    }

    fn fallback(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        self.engine
            .run_task_specific_scripts(host, task, ctx, dispatcher)
    }
}
