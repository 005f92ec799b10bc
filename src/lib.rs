//! Client-side modeling of HTCondor jobs and DAG workflows.
//!
//! This crate builds submit descriptions and DAG descriptions for an
//! HTCondor scheduler and interprets its textual responses. It supports:
//!
//! - Ordered job attributes with `$(macro)` cross-references, including the
//!   `$(cluster)` pseudo-variable
//! - Dependency graphs of job nodes with symmetric parent/child edges,
//!   transitive-closure traversal, and cycle detection
//! - Post-submission reconciliation of graph nodes with scheduler-assigned
//!   cluster ids, and per-workflow status rollups
//!
//! Scheduler binaries are invoked through the [`exec::SchedulerExec`]
//! collaborator; remote submission goes through a caller-provided
//! [`remote::RemoteSession`]. The crate never executes a job itself.

pub mod attributes;
pub mod errors;
pub mod exec;
pub mod job;
pub mod node;
pub mod remote;
pub mod status;
pub mod workflow;

// Re-exports for convenience
pub use attributes::{AttrValue, AttributeStore};
pub use errors::{CondorError, Result};
pub use exec::{LocalExec, SchedulerExec};
pub use job::{Job, NULL_CLUSTER_ID};
pub use node::{Node, NodeId, NodePayload, Script};
pub use remote::{RemoteContext, RemoteSession};
pub use status::{JobStatus, StatusTally};
pub use workflow::Workflow;
