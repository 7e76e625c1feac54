//! Capability registry: name -> handler lookup with memoized resolution.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::capability::Capability;
use crate::error::EngineError;

/// Holds all registered capability handlers and resolves names (including
/// aliases) to handlers. Resolution is memoized per name after the first
/// lookup; the engine is single-threaded, so a `RefCell` cache suffices.
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    capabilities: Vec<Box<dyn Capability>>,
    lookup_cache: RefCell<HashMap<String, usize>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, validating its task table: names must be
    /// non-empty and unique, and no other handler may share its name.
    pub fn register(&mut self, capability: Box<dyn Capability>) -> anyhow::Result<()> {
        let name = capability.name();
        if self.capabilities.iter().any(|c| c.name() == name) {
            anyhow::bail!("Capability `{name}` is already registered");
        }

        let table = capability.task_names();
        for (index, task) in table.iter().enumerate() {
            if task.is_empty() {
                anyhow::bail!("Capability `{name}` declares an empty task name");
            }
            if table[..index].contains(task) {
                anyhow::bail!("Capability `{name}` declares task `{task}` twice");
            }
        }

        self.capabilities.push(capability);
        Ok(())
    }

    /// Resolve a capability name to its handler: the first registered
    /// handler whose `supports()` holds.
    pub fn resolve(&self, name: &str) -> anyhow::Result<&dyn Capability> {
        if let Some(&index) = self.lookup_cache.borrow().get(name) {
            return Ok(self.capabilities[index].as_ref());
        }

        for (index, capability) in self.capabilities.iter().enumerate() {
            if capability.supports(name) {
                self.lookup_cache
                    .borrow_mut()
                    .insert(name.to_string(), index);
                return Ok(capability.as_ref());
            }
        }

        Err(EngineError::CapabilityNotFound(name.to_string()).into())
    }

    /// Resolve a list of names, preserving order.
    pub fn subset(&self, names: &[String]) -> anyhow::Result<Vec<&dyn Capability>> {
        names.iter().map(|name| self.resolve(name)).collect()
    }

    /// All registered handlers.
    pub fn all(&self) -> &[Box<dyn Capability>] {
        &self.capabilities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConfig;
    use crate::context::TaskContext;
    use crate::dispatcher::TaskDispatcher;

    #[derive(Debug)]
    struct StubCapability {
        name: &'static str,
        aliases: &'static [&'static str],
        tasks: &'static [&'static str],
    }

    impl Capability for StubCapability {
        fn name(&self) -> &'static str {
            self.name
        }

        fn supports(&self, name: &str) -> bool {
            name == self.name || self.aliases.contains(&name)
        }

        fn task_names(&self) -> &'static [&'static str] {
            self.tasks
        }

        fn invoke(
            &self,
            _task: &str,
            _host: &HostConfig,
            _ctx: &mut TaskContext,
            _dispatcher: &TaskDispatcher,
        ) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn stub(name: &'static str) -> Box<StubCapability> {
        Box::new(StubCapability {
            name,
            aliases: &[],
            tasks: &["deploy"],
        })
    }

    #[test]
    fn resolve_finds_registered_handler() {
        let mut registry = CapabilityRegistry::new();
        registry.register(stub("git")).expect("register");

        let handler = registry.resolve("git").expect("resolve");
        assert_eq!(handler.name(), "git");
    }

    #[test]
    fn resolve_unknown_name_fails() {
        let registry = CapabilityRegistry::new();
        let err = registry.resolve("ftp-sync").expect_err("must fail");
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::CapabilityNotFound(name)) if name == "ftp-sync"
        ));
    }

    #[test]
    fn alias_resolution_goes_through_supports() {
        let mut registry = CapabilityRegistry::new();
        registry
            .register(Box::new(StubCapability {
                name: "database",
                aliases: &["mysql", "mariadb"],
                tasks: &["backup"],
            }))
            .expect("register");

        assert_eq!(registry.resolve("mysql").expect("alias").name(), "database");
        // Memoized path returns the same handler.
        assert_eq!(registry.resolve("mysql").expect("cached").name(), "database");
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut registry = CapabilityRegistry::new();
        registry.register(stub("git")).expect("first");
        assert!(registry.register(stub("git")).is_err());
    }

    #[test]
    fn invalid_task_tables_rejected() {
        let mut registry = CapabilityRegistry::new();
        assert!(
            registry
                .register(Box::new(StubCapability {
                    name: "bad",
                    aliases: &[],
                    tasks: &["deploy", "deploy"],
                }))
                .is_err()
        );
        assert!(
            registry
                .register(Box::new(StubCapability {
                    name: "worse",
                    aliases: &[],
                    tasks: &[""],
                }))
                .is_err()
        );
    }

    #[test]
    fn subset_preserves_order() {
        let mut registry = CapabilityRegistry::new();
        registry.register(stub("git")).expect("register");
        registry.register(stub("script")).expect("register");

        let subset = registry
            .subset(&["script".to_string(), "git".to_string()])
            .expect("subset");
        let names: Vec<_> = subset.iter().map(|c| c.name()).collect();
        assert_eq!(names, ["script", "git"]);
    }
}
