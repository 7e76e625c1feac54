//! Task lifecycle orchestration across the capabilities a host requires.
//!
//! A single `run_task` traversal visits every capability in `needs` order:
//! preflight, then the optional `<task>Prepare` hook, the main task (with
//! fallback when nothing claimed it), any chained tasks to completion, the
//! optional `<task>Finished` hook, and postflight. Individual operation
//! calls run against a fork of the caller's context and merge their results
//! back afterwards.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info};

use crate::capability::Capability;
use crate::config::HostConfig;
use crate::context::TaskContext;
use crate::error::EngineError;
use crate::registry::CapabilityRegistry;

enum FlightStep {
    Pre,
    Post,
}

/// Orchestrates task lifecycles using the capability registry.
#[derive(Debug)]
pub struct TaskDispatcher {
    registry: CapabilityRegistry,
}

impl TaskDispatcher {
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Run the full lifecycle of `task` against `host`.
    ///
    /// `next_tasks` seeds the chain; handlers may extend it via the
    /// `runNextTasks` result, and every chained task completes its own full
    /// lifecycle before this task's `Finished` and postflight phases run.
    pub fn run_task(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        next_tasks: &[String],
    ) -> anyhow::Result<()> {
        ctx.results_mut().set(
            "runNextTasks",
            Value::Array(next_tasks.iter().cloned().map(Value::String).collect()),
        );

        self.flight(FlightStep::Pre, task, host, ctx)?;
        self.run_task_impl(&format!("{task}Prepare"), host, ctx, false)?;
        self.run_task_impl(task, host, ctx, true)?;

        let chained = ctx.run_next_tasks();
        for next_task in &chained {
            self.run_task(next_task, host, ctx, &[])?;
        }

        self.run_task_impl(&format!("{task}Finished"), host, ctx, false)?;
        self.flight(FlightStep::Post, task, host, ctx)
    }

    /// Dispatch one phase of a task across `needs`. When nothing fired and
    /// `fallback_allowed` holds, every capability's fallback runs instead;
    /// otherwise a phase with no takers is silently a no-op.
    fn run_task_impl(
        &self,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        fallback_allowed: bool,
    ) -> anyhow::Result<()> {
        debug!(task, config = %host.config_name, "running task");

        let mut fired = false;
        for need in &host.needs {
            let handler = self.registry.resolve(need)?;
            if handler.implements(task) {
                fired = true;
                self.call_impl(handler, task, host, ctx, true)?;
            }
        }

        if !fired && fallback_allowed {
            for need in &host.needs {
                self.registry
                    .resolve(need)?
                    .fallback(task, host, ctx, self)?;
            }
        }
        Ok(())
    }

    /// Single, mandatory dispatch outside the lifecycle: preflight and
    /// postflight run for the named capability only, and a missing task is a
    /// hard [`EngineError::TaskNotFound`].
    pub fn call(
        &self,
        capability_name: &str,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
    ) -> anyhow::Result<()> {
        let handler = self.registry.resolve(capability_name)?;
        handler.preflight_task(task, host, ctx, self)?;
        self.call_impl(handler, task, host, ctx, false)?;
        handler.postflight_task(task, host, ctx, self)
    }

    /// Per-call isolation protocol: fork the context, attribute the call to
    /// the handler's own name, substitute an overriding handler when one is
    /// declared in the live `needs` list, invoke, merge results back.
    fn call_impl(
        &self,
        handler: &dyn Capability,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
        optional: bool,
    ) -> anyhow::Result<()> {
        let overrides = self.override_map(host)?;
        let capability_name = handler.name();

        let mut fork = ctx.fork();
        fork.set_current_capability(capability_name);

        let effective: &dyn Capability = match overrides.get(capability_name) {
            Some(overriding) => {
                info!(
                    overriding,
                    overridden = capability_name,
                    "using override"
                );
                self.registry.resolve(overriding)?
            }
            None => handler,
        };
        debug!(task, capability = capability_name, "calling task");

        if effective.implements(task) {
            effective.invoke(task, host, &mut fork, self)?;
            ctx.merge(fork);
        } else if !optional {
            return Err(EngineError::TaskNotFound {
                task: task.to_string(),
                capability: capability_name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Overridden-name -> overriding-name map, recomputed from the live
    /// `needs` list on every dispatch: the list can differ between cloned
    /// host configurations used mid-run.
    fn override_map(&self, host: &HostConfig) -> anyhow::Result<HashMap<String, String>> {
        let mut overrides = HashMap::new();
        for need in &host.needs {
            let capability = self.registry.resolve(need)?;
            if let Some(overridden) = capability.overridden_capability() {
                overrides.insert(overridden.to_string(), capability.name().to_string());
            }
        }
        Ok(overrides)
    }

    /// Visit every capability in `needs`, in order, for one flight step.
    fn flight(
        &self,
        step: FlightStep,
        task: &str,
        host: &HostConfig,
        ctx: &mut TaskContext,
    ) -> anyhow::Result<()> {
        for need in &host.needs {
            let capability = self.registry.resolve(need)?;
            match step {
                FlightStep::Pre => capability.preflight_task(task, host, ctx, self)?,
                FlightStep::Post => capability.postflight_task(task, host, ctx, self)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every hook invocation into a shared event log.
    #[derive(Debug)]
    struct ProbeCapability {
        name: &'static str,
        tasks: &'static [&'static str],
        overrides: Option<&'static str>,
        /// Tasks to queue for chaining when the first table task fires.
        chain: Vec<String>,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl ProbeCapability {
        fn log(&self, event: String) {
            self.log.borrow_mut().push(event);
        }
    }

    impl Capability for ProbeCapability {
        fn name(&self) -> &'static str {
            self.name
        }

        fn overridden_capability(&self) -> Option<&'static str> {
            self.overrides
        }

        fn task_names(&self) -> &'static [&'static str] {
            self.tasks
        }

        fn invoke(
            &self,
            task: &str,
            _host: &HostConfig,
            ctx: &mut TaskContext,
            _dispatcher: &TaskDispatcher,
        ) -> anyhow::Result<()> {
            self.log(format!(
                "{}:{task} as {}",
                self.name,
                ctx.current_capability().unwrap_or("?")
            ));
            ctx.results_mut()
                .append("calls", vec![json!(format!("{}:{task}", self.name))]);
            if !self.chain.is_empty() && !task.ends_with("Prepare") && !task.ends_with("Finished")
            {
                ctx.results_mut()
                    .set("runNextTasks", json!(self.chain.clone()));
            }
            Ok(())
        }

        fn preflight_task(
            &self,
            task: &str,
            _host: &HostConfig,
            _ctx: &mut TaskContext,
            _dispatcher: &TaskDispatcher,
        ) -> anyhow::Result<()> {
            self.log(format!("{}:preflight:{task}", self.name));
            Ok(())
        }

        fn postflight_task(
            &self,
            task: &str,
            _host: &HostConfig,
            _ctx: &mut TaskContext,
            _dispatcher: &TaskDispatcher,
        ) -> anyhow::Result<()> {
            self.log(format!("{}:postflight:{task}", self.name));
            Ok(())
        }

        fn fallback(
            &self,
            task: &str,
            _host: &HostConfig,
            _ctx: &mut TaskContext,
            _dispatcher: &TaskDispatcher,
        ) -> anyhow::Result<()> {
            self.log(format!("{}:fallback:{task}", self.name));
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: TaskDispatcher,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl Fixture {
        fn events(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    fn fixture(probes: Vec<(&'static str, &'static [&'static str], Option<&'static str>, Vec<String>)>) -> Fixture {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut registry = CapabilityRegistry::new();
        for (name, tasks, overrides, chain) in probes {
            registry
                .register(Box::new(ProbeCapability {
                    name,
                    tasks,
                    overrides,
                    chain,
                    log: Rc::clone(&log),
                }))
                .expect("register");
        }
        Fixture {
            dispatcher: TaskDispatcher::new(registry),
            log,
        }
    }

    fn host(needs: &[&str]) -> HostConfig {
        HostConfig::new("test", needs.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn dispatch_order_follows_needs_and_results_merge() {
        let fx = fixture(vec![
            ("a", &["taskX"], None, vec![]),
            ("b", &["taskX"], None, vec![]),
        ]);
        let host = host(&["a", "b"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect("run");

        let calls: Vec<String> = fx
            .events()
            .into_iter()
            .filter(|e| e.contains(":taskX as "))
            .collect();
        assert_eq!(calls, ["a:taskX as a", "b:taskX as b"]);
        assert_eq!(
            ctx.results().get("calls"),
            Some(&json!(["a:taskX", "b:taskX"]))
        );
    }

    #[test]
    fn lifecycle_visits_every_capability_for_flight_phases() {
        let fx = fixture(vec![
            ("a", &["taskX"], None, vec![]),
            ("b", &["other"], None, vec![]),
        ]);
        let host = host(&["a", "b"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect("run");

        let events = fx.events();
        // Both capabilities see preflight and postflight exactly once, in
        // needs order, regardless of who implements the task.
        assert_eq!(events.first().map(String::as_str), Some("a:preflight:taskX"));
        assert_eq!(events.get(1).map(String::as_str), Some("b:preflight:taskX"));
        assert_eq!(events.last().map(String::as_str), Some("b:postflight:taskX"));
        assert_eq!(
            events.iter().filter(|e| e.contains("a:preflight")).count(),
            1
        );
    }

    #[test]
    fn override_substitutes_handler_but_keeps_attribution() {
        let fx = fixture(vec![
            ("a", &["taskX"], None, vec![]),
            ("b", &["taskX"], Some("a"), vec![]),
        ]);
        let host = host(&["a", "b"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect("run");

        let calls: Vec<String> = fx
            .events()
            .into_iter()
            .filter(|e| e.contains(" as "))
            .collect();
        // Both visits run b's implementation; the first is attributed to a.
        assert_eq!(calls, ["b:taskX as a", "b:taskX as b"]);
    }

    #[test]
    fn fallback_runs_only_when_nothing_claimed_the_task() {
        let fx = fixture(vec![
            ("a", &["other"], None, vec![]),
            ("b", &["other"], None, vec![]),
        ]);
        let host = host(&["a", "b"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect("run");

        let fallbacks: Vec<String> = fx
            .events()
            .into_iter()
            .filter(|e| e.contains(":fallback:taskX"))
            .collect();
        assert_eq!(fallbacks, ["a:fallback:taskX", "b:fallback:taskX"]);
    }

    #[test]
    fn no_fallback_once_any_capability_fired() {
        let fx = fixture(vec![
            ("a", &["taskX"], None, vec![]),
            ("b", &["other"], None, vec![]),
        ]);
        let host = host(&["a", "b"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect("run");

        assert!(!fx.events().iter().any(|e| e.contains(":fallback:taskX")));
    }

    #[test]
    fn prepare_and_finished_hooks_never_fall_back() {
        let fx = fixture(vec![("a", &["taskX"], None, vec![])]);
        let host = host(&["a"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect("run");

        assert!(!fx.events().iter().any(|e| e.contains("fallback:taskXPrepare")));
        assert!(!fx.events().iter().any(|e| e.contains("fallback:taskXFinished")));
    }

    #[test]
    fn chained_task_completes_before_finished_and_postflight() {
        let fx = fixture(vec![
            ("a", &["taskX"], None, vec!["taskY".to_string()]),
            ("b", &["taskY", "taskYFinished"], None, vec![]),
        ]);
        let host = host(&["a", "b"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect("run");

        let events = fx.events();
        let position = |needle: &str| {
            events
                .iter()
                .position(|e| e == needle)
                .unwrap_or_else(|| panic!("missing event {needle}: {events:?}"))
        };

        // The chained task's whole lifecycle (including its postflight) runs
        // before the original task's postflight.
        assert!(position("b:taskY as b") < position("a:postflight:taskX"));
        assert!(position("b:postflight:taskY") < position("a:postflight:taskX"));
        assert!(position("b:taskYFinished as b") < position("a:postflight:taskX"));
    }

    #[test]
    fn seeded_next_tasks_run_without_handler_involvement() {
        let fx = fixture(vec![("a", &["taskX", "cleanup"], None, vec![])]);
        let host = host(&["a"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .run_task("taskX", &host, &mut ctx, &["cleanup".to_string()])
            .expect("run");

        assert!(fx.events().iter().any(|e| e == "a:cleanup as a"));
    }

    #[test]
    fn call_is_mandatory_and_scoped_to_one_capability() {
        let fx = fixture(vec![
            ("a", &["taskX"], None, vec![]),
            ("b", &["taskX"], None, vec![]),
        ]);
        let host = host(&["a", "b"]);
        let mut ctx = TaskContext::new();

        fx.dispatcher
            .call("b", "taskX", &host, &mut ctx)
            .expect("call");

        let events = fx.events();
        assert_eq!(
            events,
            ["b:preflight:taskX", "b:taskX as b", "b:postflight:taskX"]
        );

        let err = fx
            .dispatcher
            .call("a", "missing", &host, &mut ctx)
            .expect_err("mandatory dispatch");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::TaskNotFound { task, capability })
                if task == "missing" && capability == "a"
        ));
    }

    #[test]
    fn unknown_capability_in_needs_is_fatal() {
        let fx = fixture(vec![("a", &["taskX"], None, vec![])]);
        let host = host(&["a", "ghost"]);
        let mut ctx = TaskContext::new();

        let err = fx
            .dispatcher
            .run_task("taskX", &host, &mut ctx, &[])
            .expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::CapabilityNotFound(name)) if name == "ghost"
        ));
    }
}
