//! Error taxonomy for the choreography core
//!
//! Every error that can end up inside an `OperatorResult` or a `RunReport`
//! carries a stable kind tag (`ChoreoError::kind`) so callers can branch on
//! the failure without parsing messages.

use thiserror::Error;

/// Errors raised by the scheduler, dispatcher, pool manager and orchestrator
#[derive(Debug, Error)]
pub enum ChoreoError {
    /// Datasource configuration has no (or a blank) `url`
    #[error("datasource url must not be empty")]
    MissingUrl,

    /// Datasource configuration has no (or a blank) `username`
    #[error("datasource username must not be empty (cache key: {cache_key})")]
    MissingUsername { cache_key: String },

    /// URL did not match any known dialect pattern; callers degrade to a hashed key
    #[error("unrecognized datasource url shape: {0}")]
    UnresolvableUrl(String),

    /// The resolved driver has no sqlx backend compiled in
    #[error("unsupported datasource driver: {0}")]
    UnsupportedDriver(String),

    /// Datasource configuration exists but cannot be used as given
    #[error("invalid datasource configuration: {0}")]
    InvalidDatasource(String),

    /// Pool construction or its liveness check failed
    #[error("failed to create pool '{cache_key}': {source}")]
    PoolCreation {
        cache_key: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("operator implementation not found: {0}")]
    ImplementationNotFound(String),

    #[error("operator '{implementation}' has no entry point '{method}'")]
    MethodNotFound {
        implementation: String,
        method: String,
    },

    #[error("operator '{implementation}.{method}' returned an unsupported shape: {shape}")]
    InvalidReturnShape {
        implementation: String,
        method: String,
        shape: String,
    },

    #[error("operator '{implementation}.{method}' panicked")]
    OperatorPanicked {
        implementation: String,
        method: String,
    },

    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("workflow '{0}' has no nodes")]
    EmptyWorkflow(String),

    /// Wraps an arbitrary failure raised while a node was executing
    #[error("node '{node_id}' failed: {message}")]
    NodeExecution { node_id: String, message: String },

    /// Definition store could not be read
    #[error("storage error: {0}")]
    Storage(String),
}

impl ChoreoError {
    /// Stable, machine-checkable tag for this error
    pub fn kind(&self) -> &'static str {
        match self {
            ChoreoError::MissingUrl => "MissingUrl",
            ChoreoError::MissingUsername { .. } => "MissingUsername",
            ChoreoError::UnresolvableUrl(_) => "UnresolvableUrl",
            ChoreoError::UnsupportedDriver(_) => "UnsupportedDriver",
            ChoreoError::InvalidDatasource(_) => "InvalidDatasource",
            ChoreoError::PoolCreation { .. } => "PoolCreation",
            ChoreoError::ImplementationNotFound(_) => "ImplementationNotFound",
            ChoreoError::MethodNotFound { .. } => "MethodNotFound",
            ChoreoError::InvalidReturnShape { .. } => "InvalidReturnShape",
            ChoreoError::OperatorPanicked { .. } => "OperatorPanicked",
            ChoreoError::WorkflowNotFound(_) => "WorkflowNotFound",
            ChoreoError::EmptyWorkflow(_) => "EmptyWorkflow",
            ChoreoError::NodeExecution { .. } => "NodeExecutionError",
            ChoreoError::Storage(_) => "Storage",
        }
    }
}

/// Kind tag for an arbitrary error
///
/// Looks through the anyhow chain for a `ChoreoError`; anything else raised by
/// an operator body is reported as a node execution error.
pub fn error_kind(error: &anyhow::Error) -> &'static str {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<ChoreoError>())
        .map(ChoreoError::kind)
        .unwrap_or("NodeExecutionError")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_are_stable() {
        assert_eq!(ChoreoError::MissingUrl.kind(), "MissingUrl");
        assert_eq!(
            ChoreoError::ImplementationNotFound("x".into()).kind(),
            "ImplementationNotFound"
        );
        assert_eq!(
            ChoreoError::NodeExecution {
                node_id: "n1".into(),
                message: "boom".into()
            }
            .kind(),
            "NodeExecutionError"
        );
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            ChoreoError::MethodNotFound {
                implementation: "sql".into(),
                method: "truncate".into()
            }
            .to_string(),
            "operator 'sql' has no entry point 'truncate'"
        );
        assert_eq!(
            ChoreoError::EmptyWorkflow("wf-1".into()).to_string(),
            "workflow 'wf-1' has no nodes"
        );
    }

    #[test]
    fn error_kind_finds_wrapped_choreo_error() {
        let err = anyhow::Error::new(ChoreoError::MissingUrl).context("resolving datasource");
        assert_eq!(error_kind(&err), "MissingUrl");

        let other = anyhow::anyhow!("socket closed");
        assert_eq!(error_kind(&other), "NodeExecutionError");
    }
}
