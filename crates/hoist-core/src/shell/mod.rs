//! Shell abstraction consumed by the dispatch and script engines.
//!
//! The engine never talks to a concrete transport directly; it only requires
//! this contract. [`local::LocalShell`] is the standard process-based
//! transport, [`scripted::ScriptedShell`] a canned transport for tests.

pub mod local;
pub mod scripted;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::anyhow;

/// Shared handle to the active shell. The engine is single-threaded; shell
/// implementations use interior mutability for their working directory and
/// environment.
pub type ShellHandle = Rc<dyn Shell>;

/// Structured result of one executed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    exit_code: i32,
    output: Vec<String>,
}

impl CommandResult {
    pub fn new(exit_code: i32, output: Vec<String>) -> Self {
        Self { exit_code, output }
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code
    }

    /// Captured output lines, ordered as produced.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    pub fn failed(&self) -> bool {
        !self.succeeded()
    }

    /// Raise a hard failure carrying `message` plus this result.
    pub fn fail_with(&self, message: &str) -> anyhow::Error {
        anyhow!(
            "{message} (exit code {}):\n{}",
            self.exit_code,
            self.output.join("\n")
        )
    }
}

/// Contract for a target execution surface.
pub trait Shell: fmt::Debug {
    /// Run one command line. With `capture` the output lines are collected
    /// quietly into the result; without it they are echoed through as well.
    fn run(&self, command: &str, capture: bool) -> anyhow::Result<CommandResult>;

    /// Change the working directory for subsequent commands.
    fn cd(&self, path: &Path) -> anyhow::Result<()>;

    /// Whether a path exists on this execution surface.
    fn exists(&self, path: &Path) -> anyhow::Result<bool>;

    /// Merge environment variables into the shell's environment.
    fn apply_environment(&self, env: &HashMap<String, String>) -> anyhow::Result<()>;

    /// Copy a local file onto this execution surface.
    fn put_file(&self, source: &Path, dest: &Path) -> anyhow::Result<()>;

    /// Copy a file from another shell onto this one, optionally removing the
    /// source afterwards.
    fn copy_file_from(
        &self,
        other: &dyn Shell,
        source: &Path,
        dest: &Path,
        remove_after: bool,
    ) -> anyhow::Result<()>;

    /// Resolve `#!name` executable aliases against the configured table.
    fn expand_command(&self, command: &str) -> String;

    /// The current working directory.
    fn working_dir(&self) -> PathBuf;
}

/// Expand `#!name` tokens in a command line against an alias table. Unknown
/// aliases fall back to the bare executable name.
pub(crate) fn expand_executables(command: &str, executables: &HashMap<String, String>) -> String {
    command
        .split(' ')
        .map(|token| match token.strip_prefix("#!") {
            Some(name) => executables
                .get(name)
                .map(String::as_str)
                .unwrap_or(name)
                .to_string(),
            None => token.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
