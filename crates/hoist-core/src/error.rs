//! Typed error kinds surfaced by the dispatch and script engines.
//!
//! Operations plumb errors through `anyhow::Result`; these kinds are attached
//! so callers can recover specific conditions (early exits, unresolved
//! placeholders) with `downcast_ref`.

use thiserror::Error;

/// Errors raised by the task dispatch and script execution engines.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No registered capability answers to the requested name.
    #[error("could not find implementation for capability `{0}`")]
    CapabilityNotFound(String),

    /// A mandatory dispatch found no matching task on the capability.
    #[error("could not find task `{task}` in capability `{capability}`")]
    TaskNotFound { task: String, capability: String },

    /// A script line invoked a callback nobody registered.
    #[error("missing script callback implementation for `{0}`")]
    MissingCallback(String),

    /// A `%key%` placeholder survived both expansion passes.
    #[error("unknown replacement pattern in line `{line}`")]
    UnknownReplacement { line: String },

    /// Intentional abort of the current task chain, raised when a
    /// precondition check fails before any destructive step runs.
    #[error("task chain aborted early")]
    EarlyExit,
}

/// True if `err` carries an [`EngineError::EarlyExit`].
pub fn is_early_exit(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<EngineError>(), Some(EngineError::EarlyExit))
}
