//! Messages exchanged between execution nodes, the executor, and remote workers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointId;
use crate::diagnostic::Diagnostic;
use crate::element::{Batch, ElementType};
use crate::error::Error;
use crate::operator::Definition;

/// Position of a node in its pipeline; unique within one execution.
pub type NodeId = usize;

/// A message addressed to an execution node.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Message {
    /// Starts the node. `upstream` is the sender, or `None` for the first node; `downstream`
    /// lists the nodes that follow, the first of them being the node's successor.
    Start {
        /// The node sending the start.
        upstream: Option<NodeId>,
        /// The nodes after the receiver, in order.
        downstream: Vec<NodeId>,
    },
    /// The upstream announces the element type it produces.
    Handshake {
        /// The element type of the upstream's output.
        element: ElementType,
    },
    /// The downstream accepted the handshake and grants initial credit.
    HandshakeResponse {
        /// Batches the upstream may send.
        credit: usize,
    },
    /// A batch of data, sent against credit.
    Data(Batch),
    /// The downstream grants additional credit.
    Request(usize),
    /// A checkpoint barrier: from the executor at the first node, from the upstream elsewhere.
    Checkpoint(CheckpointId),
    /// The executor stored the node's state for a checkpoint.
    CheckpointAck(CheckpointId),
    /// The upstream has no more data.
    End,
    /// The downstream wants no more data.
    Stop,
    /// Suspends advancing the operator.
    Pause,
    /// Resumes advancing the operator.
    Resume,
    /// Tears the node down.
    Cancel,
}

impl Message {
    /// A short name for the kind of message.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Start { .. } => "start",
            Message::Handshake { .. } => "handshake",
            Message::HandshakeResponse { .. } => "handshake_response",
            Message::Data(_) => "data",
            Message::Request(_) => "request",
            Message::Checkpoint(_) => "checkpoint",
            Message::CheckpointAck(_) => "checkpoint_ack",
            Message::End => "end",
            Message::Stop => "stop",
            Message::Pause => "pause",
            Message::Resume => "resume",
            Message::Cancel => "cancel",
        }
    }
}

/// Counters a node keeps while it runs.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeMetrics {
    /// Batches received from the upstream.
    pub batches_in: u64,
    /// Elements received from the upstream.
    pub elements_in: u64,
    /// Batches sent to the downstream.
    pub batches_out: u64,
    /// Elements sent to the downstream.
    pub elements_out: u64,
    /// Credit granted to the upstream.
    pub credit_granted: u64,
    /// Credit received from the downstream.
    pub credit_received: u64,
    /// Checkpoints the node delivered state for.
    pub checkpoints: u64,
    /// Time spent advancing the operator.
    pub running: Duration,
    /// Time the operator spent waiting for a timer.
    pub waiting: Duration,
    /// Time the node spent paused.
    pub paused: Duration,
}

/// What a node tells the executor.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ReportKind {
    /// A diagnostic of a remote node, forwarded to the executor's handler.
    Diagnostic(Diagnostic),
    /// The node's state for a checkpoint.
    CheckpointState {
        /// The checkpoint.
        id: CheckpointId,
        /// The serialized operator state.
        state: Option<Vec<u8>>,
    },
    /// The node completed, or was cancelled.
    Finished(NodeMetrics),
    /// The node failed.
    Failed {
        /// The terminal error of the node.
        error: Error,
        /// Metrics up to the failure.
        metrics: NodeMetrics,
    },
}

/// A report of node `node`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Report {
    /// The reporting node.
    pub node: NodeId,
    /// What happened.
    pub kind: ReportKind,
}

/// Requests to spawn a run of operators on a remote worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Identifier of the execution.
    pub pipeline: u64,
    /// Identifier of the first operator of the run; the others follow consecutively.
    pub first: NodeId,
    /// The serialized operators.
    pub operators: Vec<Definition>,
    /// Restored state per operator.
    pub restore: Vec<Option<Vec<u8>>>,
}

/// A node spawned by a remote worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NodeDescription {
    /// The node.
    pub node: NodeId,
    /// Name of the hosted operator.
    pub operator: String,
    /// Address of the hosting worker.
    pub address: String,
}

/// The payload of frames between the executor and a remote worker.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Wire {
    /// Executor to worker: spawn a run.
    Spawn(SpawnRequest),
    /// Worker to executor: the outcome of a spawn.
    Spawned(Result<Vec<NodeDescription>, Error>),
    /// A message for the node the frame targets.
    Node(Message),
    /// A report for the executor.
    Report(Report),
}

/// Frame channel of [`Wire::Spawn`] and [`Wire::Spawned`].
pub const CONTROL_CHANNEL: usize = 0;
/// Frame channel of [`Wire::Node`].
pub const NODE_CHANNEL: usize = 1;
/// Frame channel of [`Wire::Report`].
pub const REPORT_CHANNEL: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Record, Slice, Value};

    #[test]
    fn wire_messages_survive_bincode() {
        let slice = Slice::new("test", vec![Record::new().with("x", Value::Int(1))]);
        let messages = vec![
            Wire::Node(Message::Data(Batch::Events(slice))),
            Wire::Node(Message::Start { upstream: Some(1), downstream: vec![2, 3] }),
            Wire::Spawned(Err(Error::Configuration("unknown operator 'x'".into()))),
            Wire::Report(Report { node: 2, kind: ReportKind::Failed { error: Error::Silent, metrics: NodeMetrics::default() } }),
        ];
        for message in messages {
            let bytes = bincode::serialize(&message).unwrap();
            assert_eq!(bincode::deserialize::<Wire>(&bytes).unwrap(), message);
        }
    }
}
