//! Runtime
//!
//! - `result`: the uniform operator outcome
//! - `executor`: operator dispatch through the registry
//! - `scheduler`: execution order from nodes and edges
//! - `engine`: the run loop that ties them together

pub mod result;

pub mod executor;

pub mod scheduler;

pub mod engine;

pub use engine::{RunReport, RunStatus, ScheduledNode, WorkflowEngine, INPUT_DATA_KEY};
pub use executor::OperatorDispatcher;
pub use result::{OperatorResult, OperatorStatus, Payload};
pub use scheduler::build_execution_order;
