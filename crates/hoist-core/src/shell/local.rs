//! Local process execution surface.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::Context;
use tracing::debug;

use super::{CommandResult, Shell, expand_executables};

/// Runs command lines through `sh -c` on the local machine, tracking the
/// working directory and applied environment across calls.
#[derive(Debug)]
pub struct LocalShell {
    cwd: RefCell<PathBuf>,
    env: RefCell<HashMap<String, String>>,
    executables: HashMap<String, String>,
}

impl LocalShell {
    pub fn new(working_dir: PathBuf, executables: HashMap<String, String>) -> Self {
        Self {
            cwd: RefCell::new(working_dir),
            env: RefCell::new(HashMap::new()),
            executables,
        }
    }
}

impl Shell for LocalShell {
    fn run(&self, command: &str, capture: bool) -> anyhow::Result<CommandResult> {
        let expanded = self.expand_command(command);
        debug!(command = %expanded, "running local command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(&expanded)
            .current_dir(&*self.cwd.borrow())
            .envs(self.env.borrow().iter())
            .output()
            .with_context(|| format!("Failed to spawn `{expanded}`"))?;

        let mut lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::to_string)
            .collect();
        lines.extend(
            String::from_utf8_lossy(&output.stderr)
                .lines()
                .map(str::to_string),
        );

        if !capture {
            for line in &lines {
                println!("{line}");
            }
        }

        let exit_code = output.status.code().unwrap_or(-1);
        Ok(CommandResult::new(exit_code, lines))
    }

    fn cd(&self, path: &Path) -> anyhow::Result<()> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.borrow().join(path)
        };
        *self.cwd.borrow_mut() = resolved;
        Ok(())
    }

    fn exists(&self, path: &Path) -> anyhow::Result<bool> {
        let resolved = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.borrow().join(path)
        };
        Ok(resolved.exists())
    }

    fn apply_environment(&self, env: &HashMap<String, String>) -> anyhow::Result<()> {
        self.env
            .borrow_mut()
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    fn put_file(&self, source: &Path, dest: &Path) -> anyhow::Result<()> {
        let resolved = if dest.is_absolute() {
            dest.to_path_buf()
        } else {
            self.cwd.borrow().join(dest)
        };
        std::fs::copy(source, &resolved).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                source.display(),
                resolved.display()
            )
        })?;
        Ok(())
    }

    fn copy_file_from(
        &self,
        other: &dyn Shell,
        source: &Path,
        dest: &Path,
        remove_after: bool,
    ) -> anyhow::Result<()> {
        // Both ends are files visible to this process for the local transport.
        self.put_file(source, dest)?;
        if remove_after {
            other.run(&format!("rm {}", source.display()), true)?;
        }
        Ok(())
    }

    fn expand_command(&self, command: &str) -> String {
        expand_executables(command, &self.executables)
    }

    fn working_dir(&self) -> PathBuf {
        self.cwd.borrow().clone()
    }
}
