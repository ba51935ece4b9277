//! Types related to logging engine events.
//!
//! Every worker thread owns a [`conduit_logging::Registry`]. Loggers for [`ConduitEvent`] are
//! looked up under the name `"conduit"`. Connection threads do not own a registry; their loggers
//! come from the `log_fn` of [`conduit_communication::Config`].

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointId;
use crate::execution::NodeMetrics;

/// Type alias for the identifier of the worker thread that logged an event.
pub type WorkerIdentifier = usize;
/// Logger for engine events.
pub type ConduitLogger = conduit_logging::Logger<ConduitEvent, WorkerIdentifier>;

/// The name engine loggers are registered under.
pub const CONDUIT: &str = "conduit";

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// The creation of an execution node.
pub struct NodeEvent {
    /// Position of the node in its pipeline.
    pub id: usize,
    /// Name of the hosted operator.
    pub name: String,
    /// True if the node has a thread of its own.
    pub detached: bool,
}

/// Start or stop of some activity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Hash, PartialEq, Eq, Ord, PartialOrd)]
pub enum StartStop {
    /// Activity starts.
    Start,
    /// Activity stops.
    Stop,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// A node being stepped by its worker.
pub struct ScheduleEvent {
    /// Position of the node in its pipeline.
    pub id: usize,
    /// `Start` as the step begins, `Stop` as it ends.
    pub start_stop: StartStop,
}

impl ScheduleEvent {
    /// Creates a new start scheduling event.
    pub fn start(id: usize) -> Self { ScheduleEvent { id, start_stop: StartStop::Start } }
    /// Creates a new stop scheduling event.
    pub fn stop(id: usize) -> Self { ScheduleEvent { id, start_stop: StartStop::Stop } }
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// A node changing its lifecycle state.
pub struct StateEvent {
    /// Position of the node in its pipeline.
    pub id: usize,
    /// The state entered.
    pub state: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// Credit granted by a node to its upstream.
pub struct CreditEvent {
    /// Position of the granting node.
    pub id: usize,
    /// Batches granted.
    pub granted: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// A node delivering its state for a checkpoint.
pub struct CheckpointEvent {
    /// Position of the node in its pipeline.
    pub id: usize,
    /// The checkpoint.
    pub checkpoint: CheckpointId,
    /// Size of the serialized state.
    pub bytes: usize,
}

/// A worker parking or unparking.
#[derive(Serialize, Deserialize, Debug, Clone, Hash, PartialEq, Eq)]
pub enum ParkEvent {
    /// Worker parks.
    Park(Option<Duration>),
    /// Worker unparks.
    Unpark,
}

impl ParkEvent {
    /// Creates a new park event from the supplied duration.
    pub fn park(duration: Option<Duration>) -> Self { ParkEvent::Park(duration) }
    /// Creates a new unpark event.
    pub fn unpark() -> Self { ParkEvent::Unpark }
}

#[derive(Serialize, Deserialize, Debug, Clone, Hash, Eq, PartialEq)]
/// Node shutdown.
pub struct ShutdownEvent {
    /// Position of the node in its pipeline.
    pub id: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
/// Final metrics of a node.
pub struct MetricsEvent {
    /// Position of the node in its pipeline.
    pub id: usize,
    /// The metrics.
    pub metrics: NodeMetrics,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
/// An event of the engine.
pub enum ConduitEvent {
    /// Node creation.
    Node(NodeEvent),
    /// Node start or stop.
    Schedule(ScheduleEvent),
    /// Node state transition.
    State(StateEvent),
    /// Credit grant.
    Credit(CreditEvent),
    /// Checkpoint delivery.
    Checkpoint(CheckpointEvent),
    /// Park event.
    Park(ParkEvent),
    /// Node shutdown.
    Shutdown(ShutdownEvent),
    /// Node metrics.
    Metrics(MetricsEvent),
    /// Unstructured event.
    Text(String),
}

impl From<NodeEvent> for ConduitEvent {
    fn from(v: NodeEvent) -> ConduitEvent { ConduitEvent::Node(v) }
}

impl From<ScheduleEvent> for ConduitEvent {
    fn from(v: ScheduleEvent) -> ConduitEvent { ConduitEvent::Schedule(v) }
}

impl From<StateEvent> for ConduitEvent {
    fn from(v: StateEvent) -> ConduitEvent { ConduitEvent::State(v) }
}

impl From<CreditEvent> for ConduitEvent {
    fn from(v: CreditEvent) -> ConduitEvent { ConduitEvent::Credit(v) }
}

impl From<CheckpointEvent> for ConduitEvent {
    fn from(v: CheckpointEvent) -> ConduitEvent { ConduitEvent::Checkpoint(v) }
}

impl From<ParkEvent> for ConduitEvent {
    fn from(v: ParkEvent) -> ConduitEvent { ConduitEvent::Park(v) }
}

impl From<ShutdownEvent> for ConduitEvent {
    fn from(v: ShutdownEvent) -> ConduitEvent { ConduitEvent::Shutdown(v) }
}

impl From<MetricsEvent> for ConduitEvent {
    fn from(v: MetricsEvent) -> ConduitEvent { ConduitEvent::Metrics(v) }
}

impl From<String> for ConduitEvent {
    fn from(v: String) -> ConduitEvent { ConduitEvent::Text(v) }
}
