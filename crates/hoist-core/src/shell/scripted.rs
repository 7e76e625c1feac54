//! Scripted shell backend for testing.
//!
//! Records every command and serves pre-configured results, making it easy
//! to write deterministic tests for dispatch and script-engine code without
//! touching a real process.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::{CommandResult, Shell, expand_executables};

/// A test-double that records commands and serves canned results.
///
/// Commands are matched after `#!` alias expansion; anything without a
/// staged result succeeds with no output.
#[derive(Debug, Default)]
pub struct ScriptedShell {
    cwd: RefCell<PathBuf>,
    env: RefCell<HashMap<String, String>>,
    results: RefCell<HashMap<String, CommandResult>>,
    commands: RefCell<Vec<String>>,
    existing_paths: RefCell<HashSet<PathBuf>>,
    executables: HashMap<String, String>,
}

impl ScriptedShell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executables(executables: HashMap<String, String>) -> Self {
        Self {
            executables,
            ..Self::default()
        }
    }

    /// Pre-load the result served for a command line.
    pub fn respond(&self, command: &str, result: CommandResult) {
        self.results
            .borrow_mut()
            .insert(command.to_string(), result);
    }

    /// Mark a path as existing for `exists()` checks.
    pub fn touch(&self, path: impl Into<PathBuf>) {
        self.existing_paths.borrow_mut().insert(path.into());
    }

    /// All commands executed against this shell, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.borrow().clone()
    }

    /// The environment as applied so far.
    pub fn environment(&self) -> HashMap<String, String> {
        self.env.borrow().clone()
    }
}

impl Shell for ScriptedShell {
    fn run(&self, command: &str, _capture: bool) -> anyhow::Result<CommandResult> {
        let expanded = self.expand_command(command);
        self.commands.borrow_mut().push(expanded.clone());
        let result = self
            .results
            .borrow()
            .get(&expanded)
            .cloned()
            .unwrap_or_else(|| CommandResult::new(0, Vec::new()));
        Ok(result)
    }

    fn cd(&self, path: &Path) -> anyhow::Result<()> {
        *self.cwd.borrow_mut() = path.to_path_buf();
        Ok(())
    }

    fn exists(&self, path: &Path) -> anyhow::Result<bool> {
        Ok(self.existing_paths.borrow().contains(path))
    }

    fn apply_environment(&self, env: &HashMap<String, String>) -> anyhow::Result<()> {
        self.env
            .borrow_mut()
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn put_file(&self, source: &Path, dest: &Path) -> anyhow::Result<()> {
        self.commands
            .borrow_mut()
            .push(format!("put {} {}", source.display(), dest.display()));
        Ok(())
    }

    fn copy_file_from(
        &self,
        _other: &dyn Shell,
        source: &Path,
        dest: &Path,
        remove_after: bool,
    ) -> anyhow::Result<()> {
        self.commands.borrow_mut().push(format!(
            "copy {} {} remove_after={remove_after}",
            source.display(),
            dest.display()
        ));
        Ok(())
    }

    fn expand_command(&self, command: &str) -> String {
        expand_executables(command, &self.executables)
    }

    fn working_dir(&self) -> PathBuf {
        self.cwd.borrow().clone()
    }
}
