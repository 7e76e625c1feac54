//! Hoist Core Library
//!
//! Provides the deployment-orchestration engine: capability dispatch with
//! lifecycle sequencing, per-call context isolation, and the templated
//! script interpreter that runs command sequences against a shell.

pub mod capability;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod script;
pub mod shell;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{HostConfig, Settings};

    // Context
    pub use crate::context::{ResultBag, TaskContext};

    // Dispatch
    pub use crate::dispatcher::TaskDispatcher;
    pub use crate::registry::CapabilityRegistry;

    // Capabilities
    pub use crate::capability::{
        Capability, composer::ComposerCapability, docker::DockerCapability, git::GitCapability,
        local::LocalCapability, script::ScriptCapability,
    };

    // Script
    pub use crate::script::ScriptEngine;

    // Shell
    pub use crate::shell::{CommandResult, Shell, ShellHandle, local::LocalShell};

    // Errors
    pub use crate::error::EngineError;
}
