//! Local capability: provides the process-local execution surface.

use std::path::PathBuf;
use std::rc::Rc;

use tracing::debug;

use crate::config::HostConfig;
use crate::context::TaskContext;
use crate::dispatcher::TaskDispatcher;
use crate::shell::local::LocalShell;

use super::Capability;

const NO_TASKS: &[&str] = &[];

/// Seeds a [`LocalShell`] on the context when no other capability has
/// supplied a transport. Implements no tasks of its own.
#[derive(Debug, Default)]
pub struct LocalCapability;

impl LocalCapability {
    pub fn new() -> Self {
        Self
    }
}

impl Capability for LocalCapability {
    fn name(&self) -> &'static str {
        "local"
    }

    fn task_names(&self) -> &'static [&'static str] {
        NO_TASKS
    }

    fn invoke(
        &self,
        task: &str,
        _host: &HostConfig,
        _ctx: &mut TaskContext,
        _dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        Err(super::unknown_task(self.name(), task))
    }

    fn preflight_task(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        _dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        if ctx.shell().is_some() {
            return Ok(());
        }
        let root = host
            .get_str("rootFolder")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        debug!(task, root = %root.display(), "seeding local shell");
        ctx.set_shell(Rc::new(LocalShell::new(root, host.executables())));
        Ok(())
    }
}
