//! Capability handler layer.
//!
//! A capability is a named unit of functionality a host configuration can
//! require through its `needs` list. Handlers expose an explicit task table
//! and a matching `invoke`; the dispatcher consults the table, never probes.

pub mod composer;
pub mod docker;
pub mod git;
pub mod local;
pub mod script;

use std::fmt;

use crate::config::HostConfig;
use crate::context::TaskContext;
use crate::dispatcher::TaskDispatcher;
use crate::error::EngineError;
use crate::shell::ShellHandle;

/// Contract implemented by every capability handler.
pub trait Capability: fmt::Debug {
    /// Unique handler name; also the default alias it answers to.
    fn name(&self) -> &'static str;

    /// Alias resolution: whether this handler serves the requested name.
    fn supports(&self, name: &str) -> bool {
        name == self.name()
    }

    /// Name of another capability whose implementation this handler
    /// supersedes when both appear in a host's `needs`.
    fn overridden_capability(&self) -> Option<&'static str> {
        None
    }

    /// The explicit table of task names this handler implements. `invoke`
    /// matches on exactly these names; the registry validates the table at
    /// registration time.
    fn task_names(&self) -> &'static [&'static str];

    fn implements(&self, task: &str) -> bool {
        self.task_names().contains(&task)
    }

    /// Run one named task operation.
    fn invoke(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()>;

    /// Runs before every task for every capability in `needs`.
    fn preflight_task(
        &self,
        _task: &str,
        _host: &HostConfig,
        _ctx: &mut TaskContext,
        _dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs after every task for every capability in `needs`.
    fn postflight_task(
        &self,
        _task: &str,
        _host: &HostConfig,
        _ctx: &mut TaskContext,
        _dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Generic behavior run only when no capability implemented the bare
    /// task name.
    fn fallback(
        &self,
        _task: &str,
        _host: &HostConfig,
        _ctx: &mut TaskContext,
        _dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The active shell from the context, or a hard error when none was set up.
pub(crate) fn require_shell(ctx: &TaskContext) -> anyhow::Result<ShellHandle> {
    ctx.shell()
        .ok_or_else(|| anyhow::anyhow!("No active shell on the task context"))
}

/// The error a handler's `invoke` returns for a task name outside its table.
/// Unreachable through the dispatcher, which consults the table first.
pub(crate) fn unknown_task(capability: &str, task: &str) -> anyhow::Error {
    EngineError::TaskNotFound {
        task: task.to_string(),
        capability: capability.to_string(),
    }
    .into()
}
