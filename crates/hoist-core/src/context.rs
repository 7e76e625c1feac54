//! Per-dispatch state carrier.
//!
//! A [`TaskContext`] travels through one task lifecycle. Each individual
//! capability-operation call receives a [`TaskContext::fork`] of the caller's
//! context; after the call, [`TaskContext::merge`] folds the fork's result
//! contributions back in. Sibling calls therefore never see each other's
//! mutations mid-dispatch, only after merge.

use serde_json::{Map, Value};

use crate::shell::{CommandResult, ShellHandle};

/// One recorded result mutation. Forks collect these since the fork point;
/// merging replays them onto the parent, which journals them again so merges
/// nest correctly through chained dispatches.
#[derive(Debug, Clone)]
enum ResultOp {
    /// Overwrite discipline: last writer wins (scalars like `exitCode`).
    Set(String, Value),
    /// Append discipline: contributions concatenate (lists like `files`).
    Append(String, Vec<Value>),
}

/// Results accumulated during a dispatch, with per-key merge discipline.
#[derive(Debug, Clone, Default)]
pub struct ResultBag {
    values: Map<String, Value>,
    journal: Vec<ResultOp>,
}

impl ResultBag {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Overwrite-discipline write.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        self.values.insert(key.clone(), value.clone());
        self.journal.push(ResultOp::Set(key, value));
    }

    /// Append-discipline write: the key holds a list and `items` are
    /// concatenated onto whatever is already there.
    pub fn append(&mut self, key: impl Into<String>, items: Vec<Value>) {
        let key = key.into();
        match self.values.get_mut(&key) {
            Some(Value::Array(existing)) => existing.extend(items.iter().cloned()),
            _ => {
                self.values
                    .insert(key.clone(), Value::Array(items.clone()));
            }
        }
        self.journal.push(ResultOp::Append(key, items));
    }

    /// Snapshot for a per-call fork: same values, empty journal.
    fn fork(&self) -> Self {
        Self {
            values: self.values.clone(),
            journal: Vec::new(),
        }
    }

    /// Replay a fork's journal onto this bag, applying each key's discipline.
    fn merge(&mut self, child: ResultBag) {
        for op in child.journal {
            match op {
                ResultOp::Set(key, value) => self.set(key, value),
                ResultOp::Append(key, items) => self.append(key, items),
            }
        }
    }
}

/// Mutable, forkable state carrier for one task dispatch.
#[derive(Debug, Clone, Default)]
pub struct TaskContext {
    variables: Map<String, Value>,
    results: ResultBag,
    shell: Option<ShellHandle>,
    command_result: Option<CommandResult>,
    break_on_first_error: bool,
    current_capability: Option<String>,
}

impl TaskContext {
    pub fn new() -> Self {
        Self {
            break_on_first_error: true,
            ..Self::default()
        }
    }

    // --- request-scoped variables -------------------------------------------

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.variables.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    // --- results ------------------------------------------------------------

    pub fn results(&self) -> &ResultBag {
        &self.results
    }

    pub fn results_mut(&mut self) -> &mut ResultBag {
        &mut self.results
    }

    /// The task names queued for chaining, drained by the dispatcher.
    pub fn run_next_tasks(&self) -> Vec<String> {
        self.results
            .get("runNextTasks")
            .and_then(Value::as_array)
            .map(|tasks| {
                tasks
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The script/command exit code recorded so far (0 when none).
    pub fn exit_code(&self) -> i32 {
        self.results
            .get("exitCode")
            .and_then(Value::as_i64)
            .unwrap_or(0) as i32
    }

    // --- shell & command results --------------------------------------------

    pub fn shell(&self) -> Option<ShellHandle> {
        self.shell.clone()
    }

    pub fn set_shell(&mut self, shell: ShellHandle) {
        self.shell = Some(shell);
    }

    pub fn command_result(&self) -> Option<&CommandResult> {
        self.command_result.as_ref()
    }

    pub fn set_command_result(&mut self, result: CommandResult) {
        self.command_result = Some(result);
    }

    // --- error policy & attribution -----------------------------------------

    pub fn break_on_first_error(&self) -> bool {
        self.break_on_first_error
    }

    pub fn set_break_on_first_error(&mut self, flag: bool) {
        self.break_on_first_error = flag;
    }

    /// Name of the capability the current call is attributed to.
    pub fn current_capability(&self) -> Option<&str> {
        self.current_capability.as_deref()
    }

    pub fn set_current_capability(&mut self, name: impl Into<String>) {
        self.current_capability = Some(name.into());
    }

    // --- isolation protocol -------------------------------------------------

    /// Clone for an individual capability-operation call. The fork carries
    /// the caller's variables and result values but starts a fresh journal.
    pub fn fork(&self) -> Self {
        Self {
            variables: self.variables.clone(),
            results: self.results.fork(),
            shell: self.shell.clone(),
            command_result: self.command_result.clone(),
            break_on_first_error: self.break_on_first_error,
            current_capability: self.current_capability.clone(),
        }
    }

    /// Fold a fork's result contributions back in. Only results merge;
    /// variable mutations and policy toggles stay with the fork.
    pub fn merge(&mut self, child: TaskContext) {
        self.results.merge(child.results);
        if let Some(result) = child.command_result {
            self.command_result = Some(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overwrite_discipline_last_writer_wins() {
        let mut ctx = TaskContext::new();
        ctx.results_mut().set("exitCode", json!(1));
        ctx.results_mut().set("exitCode", json!(0));
        assert_eq!(ctx.results().get("exitCode"), Some(&json!(0)));
    }

    #[test]
    fn append_discipline_concatenates() {
        let mut ctx = TaskContext::new();
        ctx.results_mut().append("files", vec![json!("a.sql")]);
        ctx.results_mut().append("files", vec![json!("b.tgz")]);
        assert_eq!(
            ctx.results().get("files"),
            Some(&json!(["a.sql", "b.tgz"]))
        );
    }

    #[test]
    fn sibling_forks_merge_without_duplicating_inherited_items() {
        let mut parent = TaskContext::new();
        parent.results_mut().append("files", vec![json!("seed")]);

        let mut first = parent.fork();
        first.results_mut().append("files", vec![json!("x")]);
        parent.merge(first);

        let mut second = parent.fork();
        second.results_mut().append("files", vec![json!("y")]);
        parent.merge(second);

        assert_eq!(
            parent.results().get("files"),
            Some(&json!(["seed", "x", "y"]))
        );
    }

    #[test]
    fn fork_mutations_invisible_until_merge() {
        let mut parent = TaskContext::new();
        parent.results_mut().set("exitCode", json!(0));

        let mut child = parent.fork();
        child.results_mut().set("exitCode", json!(7));
        assert_eq!(parent.results().get("exitCode"), Some(&json!(0)));

        parent.merge(child);
        assert_eq!(parent.results().get("exitCode"), Some(&json!(7)));
    }

    #[test]
    fn merges_nest_through_intermediate_contexts() {
        let mut root = TaskContext::new();

        let mut middle = root.fork();
        let mut leaf = middle.fork();
        leaf.results_mut().append("meta", vec![json!("from-leaf")]);
        middle.merge(leaf);
        middle.results_mut().append("meta", vec![json!("from-middle")]);
        root.merge(middle);

        assert_eq!(
            root.results().get("meta"),
            Some(&json!(["from-leaf", "from-middle"]))
        );
    }

    #[test]
    fn variables_do_not_merge_back() {
        let mut parent = TaskContext::new();
        parent.set("branch", json!("main"));

        let mut child = parent.fork();
        child.set("branch", json!("feature"));
        parent.merge(child);

        assert_eq!(parent.get_str("branch"), Some("main"));
    }

    #[test]
    fn run_next_tasks_reads_seeded_list() {
        let mut ctx = TaskContext::new();
        assert!(ctx.run_next_tasks().is_empty());

        ctx.results_mut()
            .set("runNextTasks", json!(["reset", "clearCaches"]));
        assert_eq!(ctx.run_next_tasks(), vec!["reset", "clearCaches"]);
    }

    #[test]
    fn break_on_first_error_defaults_true_and_stays_per_context() {
        let ctx = TaskContext::new();
        assert!(ctx.break_on_first_error());

        let mut parent = TaskContext::new();
        let mut child = parent.fork();
        child.set_break_on_first_error(false);
        parent.merge(child);
        // Policy toggles die with the fork.
        assert!(parent.break_on_first_error());
    }
}
