//! choreo: compose operator templates into workflows and run them
//!
//! The library covers the run-time core of an operator choreography system:
//! deterministic node ordering, runtime-resolved operator dispatch with a
//! uniform result contract, and per-database connection pooling for
//! data-access operators.

// Environment-driven configuration
pub mod config;

// Error taxonomy with stable kind tags
pub mod error;

// Workflow definitions and the stores they are read from
pub mod workflow;

// Per-database pool cache and query handles
pub mod datasource;

// Operator contract, registry and built-in operators
pub mod operators;

// Result type, dispatcher, scheduler and run orchestrator
pub mod runtime;

pub use datasource::{DatasourceConfig, PoolManager, QueryHandle};
pub use error::ChoreoError;
pub use operators::{builtin_registry, Invocation, Operator, OperatorRegistry, OperatorReturn};
pub use runtime::{
    build_execution_order, OperatorDispatcher, OperatorResult, OperatorStatus, Payload, RunReport,
    RunStatus, WorkflowEngine,
};
pub use workflow::{InMemoryWorkflowStore, SqliteWorkflowStore, WorkflowStore};
