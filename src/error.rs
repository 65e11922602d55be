//! Error taxonomy for the event-processing engine.
//!
//! Mirrors the kinds enumerated in the design doc: `EndOfInput` and
//! `RetryableBackpressure` are control-flow statuses returned by the
//! source/mailbox APIs, not `Err` variants, since neither is exceptional.

use thiserror::Error;

/// Result type for engine operations.
pub type JanaResult<T> = Result<T, JanaError>;

/// Errors the engine surfaces to callers or logs at arrow boundaries.
#[derive(Error, Debug)]
pub enum JanaError {
    /// `Init`/`BeginRun` threw inside a component. Fatal for that component.
    #[error("component init failed in plugin '{plugin_name}', component '{component_name}': {source}")]
    ComponentInitFailure {
        plugin_name: String,
        component_name: String,
        #[source]
        source: anyhow::Error,
    },

    /// `Process` threw inside a factory or processor, enriched with the
    /// factory call stack that led into it.
    #[error("per-event failure in plugin '{plugin_name}', component '{component_name}' (call stack: {call_stack:?}): {source}")]
    PerEventFailure {
        plugin_name: String,
        component_name: String,
        call_stack: Vec<String>,
        #[source]
        source: anyhow::Error,
    },

    /// A worker's watchdog threshold was exceeded.
    #[error("worker {worker_id} timed out in arrow '{arrow_name}'")]
    TimeoutDetected { worker_id: u32, arrow_name: String },

    /// `(type, tag)` was not present in a `FactorySet`.
    #[error("factory not found for type '{type_name}', tag '{tag}'")]
    FactoryNotFound { type_name: String, tag: String },

    /// Topology has a source with no sink or vice versa; detected at
    /// `initialize()`, before any workers start.
    #[error("topology misconfigured: {0}")]
    TopologyMisconfigured(String),

    /// Configuration failed to load or validate.
    #[error("configuration error: {0}")]
    Config(String),
}

impl JanaError {
    pub fn component_init(plugin_name: impl Into<String>, component_name: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        JanaError::ComponentInitFailure {
            plugin_name: plugin_name.into(),
            component_name: component_name.into(),
            source: source.into(),
        }
    }

    pub fn per_event(
        plugin_name: impl Into<String>,
        component_name: impl Into<String>,
        call_stack: Vec<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        JanaError::PerEventFailure {
            plugin_name: plugin_name.into(),
            component_name: component_name.into(),
            call_stack,
            source: source.into(),
        }
    }
}
