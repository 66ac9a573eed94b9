//! Workflow definitions
//!
//! Type definitions (workflows, nodes, edges, operator templates) and the
//! stores the orchestrator reads them from:
//! - `storage`: the `WorkflowStore` seam and its SQLite implementation
//! - `memory`: a lock-free in-memory snapshot store

pub mod types;

pub mod storage;

pub mod memory;

pub use memory::InMemoryWorkflowStore;
pub use storage::{SqliteWorkflowStore, WorkflowStore};
pub use types::{
    ConnectionKind, DefinitionBundle, Edge, ErrorPolicy, Node, OperatorTemplate, Position,
    Workflow, WorkflowDefinition,
};
