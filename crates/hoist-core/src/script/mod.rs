//! Templated script execution engine.
//!
//! Interprets an ordered command sequence from the context against the
//! active shell: two-pass `%key%` variable expansion, inline callback
//! dispatch, and the break-on-first-error policy.

pub mod expansion;
pub mod parser;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::rc::Rc;

use serde_json::{Map, Value, json};
use tracing::{error, info, warn};

use crate::capability::require_shell;
use crate::config::{HostConfig, Settings, as_string_lines, merge_values};
use crate::context::TaskContext;
use crate::dispatcher::TaskDispatcher;
use crate::error::EngineError;
use crate::shell::CommandResult;

use expansion::{
    expand_string, expand_strings, expand_variables, find_unresolved, replacement_table,
};
use parser::{Instruction, classify};

/// Collaborators handed to a registered callback.
pub struct CallbackArgs<'a> {
    pub host: &'a HostConfig,
    pub dispatcher: &'a TaskDispatcher,
    pub args: &'a [String],
}

/// A script callback registered beyond the built-in set.
pub type ScriptCallback = Box<dyn Fn(&mut TaskContext, &CallbackArgs<'_>) -> anyhow::Result<()>>;

/// A fully prepared script run: expanded instructions, expanded environment,
/// and the replacement table used to produce them.
struct PreparedScript {
    root_folder: PathBuf,
    instructions: Vec<Instruction>,
    environment: HashMap<String, String>,
    replacements: HashMap<String, String>,
    unresolved: Option<String>,
}

/// Interprets command sequences with variable expansion and inline callback
/// dispatch against one shell.
pub struct ScriptEngine {
    settings: Rc<Settings>,
    callbacks: HashMap<String, ScriptCallback>,
}

impl fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ScriptEngine {
    pub fn new(settings: Rc<Settings>) -> Self {
        Self {
            settings,
            callbacks: HashMap::new(),
        }
    }

    /// Register a callback beyond the built-in set.
    pub fn register_callback(&mut self, name: impl Into<String>, callback: ScriptCallback) {
        self.callbacks.insert(name.into(), callback);
    }

    /// Run the command sequence in the context's `scriptData`.
    ///
    /// An unresolved placeholder aborts the whole run before any command
    /// executes: the offending line and the replacement table are reported,
    /// the `exitCode` result is set to 1, and the caller continues.
    pub fn run_script(
        &self,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        let prepared = self.prepare(host, ctx)?;
        if let Some(line) = &prepared.unresolved {
            let err = EngineError::UnknownReplacement { line: line.clone() };
            error!("{err}");
            error!(
                "Known replacements:\n{}",
                replacement_table(&prepared.replacements)
            );
            ctx.results_mut().set("exitCode", json!(1));
            return Ok(());
        }
        self.execute(&prepared, host, ctx, dispatcher)
    }

    /// Expand and validate everything up front; no command runs from here.
    fn prepare(&self, host: &HostConfig, ctx: &TaskContext) -> anyhow::Result<PreparedScript> {
        let commands = ctx
            .get("scriptData")
            .and_then(as_string_lines)
            .unwrap_or_default();

        // Working directory: explicit context override, else the host's
        // site-level folder, else its root folder, else the current one.
        let root_folder = ctx
            .get_str("rootFolder")
            .or_else(|| host.get_str("siteFolder"))
            .or_else(|| host.get_str("rootFolder"))
            .unwrap_or(".")
            .into();

        // Host-declared environment wins over the script's on key conflict.
        let mut environment = ctx
            .get("environment")
            .cloned()
            .unwrap_or_else(|| json!({}));
        if let Some(host_environment) = host.get("environment") {
            merge_values(&mut environment, host_environment);
        }

        let mut variables: Map<String, Value> = ctx
            .get("variables")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        variables.insert("host".to_string(), host.raw());
        variables.insert(
            "settings".to_string(),
            self.settings.all_except(&["hosts", "dockerHosts"]),
        );

        let replacements = expand_variables(&variables);

        // Two substitution passes, not a fixpoint: one level of indirection
        // resolves, deeper chains are left for validation to reject.
        let commands = expand_strings(&commands, &replacements);
        let commands = expand_strings(&commands, &replacements);

        let environment: HashMap<String, String> = environment
            .as_object()
            .map(|map| {
                map.iter()
                    .filter_map(|(key, value)| {
                        scalar_to_string(value).map(|text| (key.clone(), text))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let environment: HashMap<String, String> = environment
            .into_iter()
            .map(|(key, value)| {
                let once = expand_string(&value, &replacements);
                (key, expand_string(&once, &replacements))
            })
            .collect();

        let environment_values: Vec<String> = environment.values().cloned().collect();
        let unresolved = find_unresolved(&commands)
            .or_else(|| find_unresolved(&environment_values))
            .cloned();

        Ok(PreparedScript {
            root_folder,
            instructions: commands.iter().map(|line| classify(line)).collect(),
            environment,
            replacements,
            unresolved,
        })
    }

    fn execute(
        &self,
        prepared: &PreparedScript,
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        let shell = require_shell(ctx)?;
        shell.cd(&prepared.root_folder)?;
        shell.apply_environment(&prepared.environment)?;

        let mut last_result: Option<CommandResult> = None;
        for instruction in &prepared.instructions {
            match instruction {
                Instruction::Callback { name, args } => {
                    self.execute_callback(name, args, host, ctx, dispatcher)?;
                }
                Instruction::Command(line) => {
                    let result = shell.run(line, false)?;
                    ctx.set_command_result(result.clone());
                    let failed = result.failed();
                    last_result = Some(result);
                    if failed && ctx.break_on_first_error() {
                        break;
                    }
                }
            }
        }

        let exit_code = last_result.map(|r| r.exit_code()).unwrap_or(0);
        ctx.results_mut().set("exitCode", json!(exit_code));
        Ok(())
    }

    fn execute_callback(
        &self,
        name: &str,
        args: &[String],
        host: &HostConfig,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        match name {
            "execute" => {
                let (capability, task) = match args {
                    [capability, task, ..] => (capability, task),
                    _ => anyhow::bail!("execute() needs a capability and a task name"),
                };
                if args.len() > 2 {
                    ctx.set("arguments", json!(args[2..].to_vec()));
                }
                dispatcher.call(capability, task, host, ctx)
            }
            "fail_on_error" => {
                warn!("`fail_on_error` is deprecated, please use `breakOnFirstError()`");
                Self::toggle_break_on_first_error(args, ctx)
            }
            "breakOnFirstError" => Self::toggle_break_on_first_error(args, ctx),
            "fail_on_missing_directory" => {
                let dir = args
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("fail_on_missing_directory() needs a path"))?;
                let shell = require_shell(ctx)?;
                if !shell.exists(std::path::Path::new(dir))? {
                    anyhow::bail!("`{dir}` does not exist!");
                }
                Ok(())
            }
            _ => match self.callbacks.get(name) {
                Some(callback) => callback(
                    ctx,
                    &CallbackArgs {
                        host,
                        dispatcher,
                        args,
                    },
                ),
                None => Err(EngineError::MissingCallback(name.to_string()).into()),
            },
        }
    }

    fn toggle_break_on_first_error(args: &[String], ctx: &mut TaskContext) -> anyhow::Result<()> {
        let flag = match args.first().map(String::as_str) {
            Some("1") | Some("true") => true,
            Some("0") | Some("false") => false,
            other => anyhow::bail!("breakOnFirstError() needs 0 or 1, got {other:?}"),
        };
        ctx.set_break_on_first_error(flag);
        Ok(())
    }

    /// Run the common script registered for `[task][host_type]`, if any.
    ///
    /// The deprecated flat `[host_type]`-only layout is warned about and
    /// skipped.
    pub fn run_task_specific_scripts(
        &self,
        host: &HostConfig,
        task: &str,
        ctx: &mut TaskContext,
        dispatcher: &TaskDispatcher,
    ) -> anyhow::Result<()> {
        if self.settings.has_flat_common_script(&host.host_type) {
            warn!("Found old-style common scripts! Please regroup by common > taskName > type > commands.");
            return Ok(());
        }

        if let Some(script) = self.settings.common_script(task, &host.host_type) {
            info!(task, host_type = %host.host_type, "running common script");
            ctx.set("scriptData", json!(script));
            self.run_script(host, ctx, dispatcher)?;
        }
        Ok(())
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}
