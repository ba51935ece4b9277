//! Running pipelines: execution nodes, their worker threads, and the executor supervising them.
//!
//! Every operator of a running pipeline is hosted by an execution node. Nodes exchange
//! [`Message`]s: a node grants its upstream credit, the upstream sends at most that many batches
//! of data, and checkpoint markers travel downstream in line with the data. Nodes report state
//! changes, checkpoint states, and their termination to the executor.

pub(crate) mod executor;
pub mod message;
pub(crate) mod node;
pub mod remote;
pub(crate) mod router;
pub(crate) mod worker;

pub use executor::Execution;
pub use message::{Message, NodeDescription, NodeId, NodeMetrics, Report, ReportKind, SpawnRequest, Wire};
pub use node::NodeState;
pub use remote::Server;
pub use worker::LogFn;
