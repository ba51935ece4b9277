//! The executor: partitions a pipeline, spawns its nodes, and supervises them.
//!
//! Operators run in maximal runs of one location. Local runs become nodes on a pool of worker
//! threads in this process; each remote run is shipped to a remote worker, which spawns the nodes
//! and reports their descriptions back. Once every run is spawned, a single start message reaches
//! the first node, and travels downstream from there.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use itertools::Itertools;

use conduit_communication::channel::buzzing;
use conduit_communication::initialize::panic_message;
use conduit_communication::logging::CommunicationSetup;
use conduit_communication::networking;
use conduit_communication::tcp::{recv_loop, send_loop, Frame};

use crate::checkpoint::{CheckpointId, CheckpointStore};
use crate::diagnostic::{Diagnostic, DiagnosticHandler};
use crate::error::{Error, Result};
use crate::execute::Config;
use crate::operator::{Location, OperatorPtr};
use crate::pipeline::Pipeline;

use super::message::{
    Message, NodeDescription, NodeId, NodeMetrics, Report, ReportKind, SpawnRequest, Wire, CONTROL_CHANNEL,
};
use super::node::NodeSpec;
use super::router::{Route, Router, Supervisor};
use super::worker::WorkerPool;

static NEXT_PIPELINE: AtomicU64 = AtomicU64::new(1);

/// Requests the executor acts upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Cancel,
    Pause,
    Resume,
    Checkpoint,
}

/// Everything the executor reacts to.
pub(crate) enum Event {
    Report(Report),
    Command(Command),
    /// The connection to the remote worker hosting `nodes` ended.
    Disconnected { nodes: Vec<NodeId>, error: Error },
}

/// A running pipeline.
///
/// Dropping the handle cancels the pipeline and waits for it to terminate.
pub struct Execution {
    id: u64,
    nodes: Vec<NodeDescription>,
    events: Sender<Event>,
    supervisor: Option<JoinHandle<Result<Vec<NodeMetrics>>>>,
}

impl Execution {
    /// The identifier of the execution.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Where each node runs, by position in the pipeline.
    pub fn nodes(&self) -> &[NodeDescription] {
        &self.nodes
    }

    /// Tears the pipeline down. A cancelled pipeline terminates successfully.
    pub fn cancel(&self) {
        self.command(Command::Cancel);
    }

    /// Stops advancing operators until [`Execution::resume`].
    pub fn pause(&self) {
        self.command(Command::Pause);
    }

    /// Resumes a paused pipeline.
    pub fn resume(&self) {
        self.command(Command::Resume);
    }

    /// Starts a checkpoint, unless as many as allowed are in flight already.
    pub fn checkpoint(&self) {
        self.command(Command::Checkpoint);
    }

    /// True once the pipeline terminated.
    pub fn is_finished(&self) -> bool {
        self.supervisor.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the pipeline to terminate, and returns the metrics of its nodes.
    pub fn join(mut self) -> Result<Vec<NodeMetrics>> {
        self.wait()
    }

    fn wait(&mut self) -> Result<Vec<NodeMetrics>> {
        match self.supervisor.take() {
            Some(supervisor) => supervisor
                .join()
                .map_err(|payload| Error::Internal(format!("executor panicked: {}", panic_message(&*payload))))?,
            None => Err(Error::Internal("execution was joined already".to_string())),
        }
    }

    fn command(&self, command: Command) {
        // The executor only hangs up once the pipeline terminated.
        let _ = self.events.send(Event::Command(command));
    }
}

impl Drop for Execution {
    fn drop(&mut self) {
        if self.supervisor.is_some() {
            self.cancel();
            let _ = self.wait();
        }
    }
}

impl std::fmt::Debug for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Execution").field("id", &self.id).field("nodes", &self.nodes).finish_non_exhaustive()
    }
}

/// A maximal run of operators of one location.
struct Run {
    remote: bool,
    operators: Vec<(NodeId, OperatorPtr)>,
}

/// Splits the operators into runs: remote operators apart, everything else local.
fn partition(operators: Vec<OperatorPtr>) -> Vec<Run> {
    let chunks = operators
        .into_iter()
        .enumerate()
        .chunk_by(|(_, op)| op.location() == Location::Remote);
    let mut runs = Vec::new();
    for (remote, operators) in &chunks {
        runs.push(Run { remote, operators: operators.collect() });
    }
    runs
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A run spawned on a remote worker.
struct RemoteRun {
    frames: Sender<Frame<Wire>>,
    /// Routes messages arriving from the worker; emptied once the pipeline terminated.
    router: Arc<Mutex<Option<Router>>>,
    nodes: Vec<NodeDescription>,
}

/// Connects to `address`, and spawns the run described by `request`.
fn spawn_remote(
    address: &str,
    request: SpawnRequest,
    config: &conduit_communication::Config,
    events: Sender<Event>,
) -> Result<RemoteRun> {
    let lost = |error: std::io::Error| Error::Infrastructure(format!("worker {}: {}", address, error));
    let (stream, remote) = networking::connect(address, 0, config).map_err(lost)?;
    let reader = stream.try_clone().map_err(lost)?;

    let (frames, outgoing) = crossbeam_channel::unbounded();
    let log_fn = Arc::clone(&config.log_fn);
    thread::Builder::new()
        .name(format!("conduit:send:{}", address))
        .spawn(move || {
            let logger = log_fn(CommunicationSetup { sender: true, process: 0, remote: Some(remote) });
            send_loop(stream, outgoing, 0, remote, logger)
        })
        .map_err(lost)?;

    let nodes: Vec<NodeId> = (request.first..request.first + request.operators.len()).collect();
    frames
        .send(Frame { channel: CONTROL_CHANNEL, target: 0, payload: Wire::Spawn(request) })
        .map_err(|_| Error::Infrastructure(format!("worker {}: connection closed", address)))?;

    let (spawned_send, spawned) = crossbeam_channel::bounded(1);
    let router = Arc::new(Mutex::new(None::<Router>));
    let shared = Arc::clone(&router);
    let log_fn = Arc::clone(&config.log_fn);
    let name = address.to_string();
    thread::Builder::new()
        .name(format!("conduit:recv:{}", address))
        .spawn(move || {
            let logger = log_fn(CommunicationSetup { sender: false, process: 0, remote: Some(remote) });
            let mut spawned_send = Some(spawned_send);
            let result = recv_loop(reader, 0, remote, logger, |header, wire: Wire| match wire {
                Wire::Spawned(reply) => {
                    if let Some(send) = spawned_send.take() {
                        let _ = send.send(reply);
                    }
                    true
                },
                Wire::Node(message) => match lock(&shared).as_mut() {
                    Some(router) => {
                        router.send(header.target, message);
                        true
                    },
                    None => false,
                },
                Wire::Report(report) => events.send(Event::Report(report)).is_ok(),
                Wire::Spawn(_) => false,
            });
            let error = match result {
                Ok(()) => Error::Infrastructure(format!("worker {} closed the connection", name)),
                Err(error) => Error::Infrastructure(format!("connection to worker {} lost: {}", name, error)),
            };
            let _ = events.send(Event::Disconnected { nodes, error });
        })
        .map_err(lost)?;

    let reply = spawned
        .recv()
        .map_err(|_| Error::Infrastructure(format!("worker {} closed the connection before spawning", address)))?;
    Ok(RemoteRun { frames, router, nodes: reply? })
}

/// Spawns all remote runs in parallel; fails with the first failure, in pipeline order.
fn spawn_remotes(
    requests: Vec<(String, SpawnRequest)>,
    config: &conduit_communication::Config,
    events: &Sender<Event>,
) -> Result<Vec<RemoteRun>> {
    let handles: Vec<_> = requests
        .into_iter()
        .map(|(address, request)| {
            let config = config.clone();
            let events = events.clone();
            thread::Builder::new()
                .name(format!("conduit:spawn:{}", address))
                .spawn(move || spawn_remote(&address, request, &config, events))
        })
        .collect();
    let mut runs = Vec::new();
    let mut failure = None;
    for handle in handles {
        let result = match handle {
            Ok(handle) => handle
                .join()
                .unwrap_or_else(|payload| Err(Error::Internal(panic_message(&*payload)))),
            Err(error) => Err(error.into()),
        };
        match result {
            Ok(run) => runs.push(run),
            Err(error) => {
                failure.get_or_insert(error);
            },
        }
    }
    match failure {
        Some(error) => Err(error),
        None => Ok(runs),
    }
}

/// Spawns the nodes of `pipeline`, starts it, and returns a handle to the running pipeline.
pub(crate) fn start(pipeline: Pipeline, config: &Config) -> Result<Execution> {
    let id = NEXT_PIPELINE.fetch_add(1, Ordering::Relaxed);
    let operators = pipeline.unwrap();
    let count = operators.len();
    if count == 0 {
        return Err(Error::Configuration("cannot execute an empty pipeline".to_string()));
    }
    let restore = |node: NodeId| config.restore.as_ref().and_then(|checkpoint| checkpoint.state(node));

    let (events, receiver) = crossbeam_channel::unbounded();
    let mut pool = WorkerPool::new(&format!("conduit:{}", id), config.communication.threads, Arc::clone(&config.log_fn))?;
    let mut router = Router::new(Supervisor::Local(events.clone()));
    let mut descriptions = Vec::with_capacity(count);
    let mut local = Vec::new();
    let mut requests = Vec::new();
    for run in partition(operators) {
        if run.remote {
            let workers = &config.communication.workers;
            if workers.is_empty() {
                let (_, first) = &run.operators[0];
                return Err(Error::Configuration(format!(
                    "operator '{}' must run on a remote worker, but none is configured",
                    first.name()
                )));
            }
            let address = workers[requests.len() % workers.len()].clone();
            let request = SpawnRequest {
                pipeline: id,
                first: run.operators[0].0,
                operators: run.operators.iter().map(|(_, op)| op.definition()).collect::<Result<_>>()?,
                restore: run.operators.iter().map(|(node, _)| restore(*node)).collect(),
            };
            requests.push((address, request));
        } else {
            for (node, operator) in run.operators {
                let placement = pool.place(operator.detached())?;
                let (pusher, inbox) = buzzing(placement.buzzer);
                router.insert(node, Route::Local(pusher));
                descriptions.push(NodeDescription { node, operator: operator.name().to_string(), address: "local".to_string() });
                local.push((placement.worker, node, operator, inbox));
            }
        }
    }

    let remotes = spawn_remotes(requests, &config.communication, &events)?;
    for run in remotes.iter() {
        for description in run.nodes.iter() {
            router.insert(description.node, Route::Remote(run.frames.clone()));
            descriptions.push(description.clone());
        }
        *lock(&run.router) = Some(router.clone());
    }
    descriptions.sort_by_key(|description| description.node);

    for (worker, node, operator, inbox) in local {
        let spec = NodeSpec {
            id: node,
            pipeline: id,
            operator,
            inbox,
            router: router.clone(),
            handler: Arc::clone(&config.diagnostics),
            restored: restore(node),
            address: None,
        };
        if let Err(error) = pool.assign(worker, spec) {
            for node in 0..count {
                router.send(node, Message::Cancel);
            }
            return Err(error);
        }
    }
    router.send(0, Message::Start { upstream: None, downstream: (1..count).collect() });

    let executor = Executor {
        router,
        events: receiver,
        pool,
        remotes,
        store: config.store.clone(),
        handler: Arc::clone(&config.diagnostics),
        interval: config.checkpoint_interval,
        max_in_flight: config.max_in_flight.max(1),
        next_checkpoint: config.restore.as_ref().map_or(1, |checkpoint| checkpoint.id + 1),
        in_flight: BTreeMap::new(),
        finished: vec![None; count],
        failure: None,
        cancelled: false,
    };
    let supervisor = thread::Builder::new()
        .name(format!("conduit:{}:executor", id))
        .spawn(move || executor.run())?;
    Ok(Execution { id, nodes: descriptions, events, supervisor: Some(supervisor) })
}

/// Supervises the nodes of one pipeline until all of them terminated.
struct Executor {
    router: Router,
    events: Receiver<Event>,
    pool: WorkerPool,
    remotes: Vec<RemoteRun>,
    store: Option<Arc<dyn CheckpointStore>>,
    handler: Arc<dyn DiagnosticHandler>,
    interval: Option<Duration>,
    max_in_flight: usize,
    next_checkpoint: CheckpointId,
    /// Checkpoints in flight, and the nodes that delivered their state.
    in_flight: BTreeMap<CheckpointId, BTreeSet<NodeId>>,
    finished: Vec<Option<NodeMetrics>>,
    failure: Option<Error>,
    cancelled: bool,
}

impl Executor {
    fn run(mut self) -> Result<Vec<NodeMetrics>> {
        let mut next_trigger = self.interval.map(|interval| Instant::now() + interval);
        while self.finished.iter().any(Option::is_none) {
            let event = match next_trigger {
                Some(deadline) => match self.events.recv_deadline(deadline) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        self.trigger();
                        next_trigger = self.interval.map(|interval| Instant::now() + interval);
                        continue;
                    },
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                None => match self.events.recv() {
                    Ok(event) => event,
                    Err(_) => break,
                },
            };
            self.handle(event);
        }

        let Executor { router, pool, remotes, finished, failure, .. } = self;
        drop(router);
        for run in remotes {
            lock(&run.router).take();
        }
        for result in pool.join() {
            if let Err(message) = result {
                return Err(Error::Internal(format!("worker thread panicked: {}", message)));
            }
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(finished.into_iter().map(Option::unwrap_or_default).collect()),
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Report(Report { node, kind }) => match kind {
                ReportKind::Diagnostic(diagnostic) => self.handler.emit(diagnostic),
                ReportKind::CheckpointState { id, state } => self.deliver(node, id, state),
                ReportKind::Finished(metrics) => self.finish(node, metrics),
                ReportKind::Failed { error, metrics } => {
                    self.finish(node, metrics);
                    self.fail(error);
                },
            },
            Event::Command(Command::Cancel) => {
                self.cancelled = true;
                self.broadcast(Message::Cancel);
            },
            Event::Command(Command::Pause) => self.broadcast(Message::Pause),
            Event::Command(Command::Resume) => self.broadcast(Message::Resume),
            Event::Command(Command::Checkpoint) => self.trigger(),
            Event::Disconnected { nodes, error } => {
                let affected: Vec<_> = nodes
                    .into_iter()
                    .filter(|node| matches!(self.finished.get(*node), Some(None)))
                    .collect();
                if affected.is_empty() {
                    return;
                }
                for node in affected {
                    self.finish(node, NodeMetrics::default());
                }
                self.fail(error);
            },
        }
    }

    /// Records the first failure, and cancels the remaining nodes.
    fn fail(&mut self, error: Error) {
        if self.failure.is_none() && !self.cancelled {
            self.failure = Some(error);
            self.broadcast(Message::Cancel);
        }
    }

    fn finish(&mut self, node: NodeId, metrics: NodeMetrics) {
        if let Some(slot) = self.finished.get_mut(node) {
            *slot = Some(metrics);
        }
        // A checkpoint missing the state of a terminated node can no longer complete.
        self.in_flight.retain(|_, delivered| delivered.contains(&node));
    }

    fn broadcast(&mut self, message: Message) {
        for node in 0..self.finished.len() {
            if self.finished[node].is_none() {
                self.router.send(node, message.clone());
            }
        }
    }

    /// Starts a checkpoint at the first node.
    fn trigger(&mut self) {
        let source_running = matches!(self.finished.first(), Some(None));
        if !source_running || self.cancelled || self.failure.is_some() || self.in_flight.len() >= self.max_in_flight {
            return;
        }
        let id = self.next_checkpoint;
        self.next_checkpoint += 1;
        self.in_flight.insert(id, BTreeSet::new());
        self.router.send(0, Message::Checkpoint(id));
    }

    /// Hands a node's checkpoint state to the store, acknowledges it, and commits complete
    /// checkpoints.
    fn deliver(&mut self, node: NodeId, id: CheckpointId, state: Option<Vec<u8>>) {
        let delivered = match self.in_flight.get_mut(&id) {
            Some(delivered) => delivered,
            None => {
                self.router.send(node, Message::CheckpointAck(id));
                return;
            },
        };
        if let Some(store) = &self.store {
            if let Err(error) = store.deliver(id, node, state) {
                self.handler.emit(
                    Diagnostic::warning(format!("checkpoint {} was abandoned", id)).note(error.to_string()),
                );
                self.in_flight.remove(&id);
                self.router.send(node, Message::CheckpointAck(id));
                return;
            }
        }
        delivered.insert(node);
        let complete = delivered.len() == self.finished.len();
        self.router.send(node, Message::CheckpointAck(id));
        if complete {
            self.in_flight.remove(&id);
            if let Some(store) = &self.store {
                if let Err(error) = store.commit(id) {
                    self.handler.emit(
                        Diagnostic::warning(format!("checkpoint {} could not be committed", id)).note(error.to_string()),
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::located::Located;
    use crate::operators::pass::Pass;

    #[test]
    fn anywhere_operators_join_local_runs() {
        let remote = |op: OperatorPtr| -> OperatorPtr { Box::new(Located::new(Location::Remote, op)) };
        let operators: Vec<OperatorPtr> = vec![
            Box::new(Pass),
            remote(Box::new(Pass)),
            remote(Box::new(Pass)),
            Box::new(Pass),
            Box::new(Located::new(Location::Local, Box::new(Pass))),
            remote(Box::new(Pass)),
        ];
        let runs: Vec<_> = partition(operators)
            .into_iter()
            .map(|run| (run.remote, run.operators.iter().map(|(node, _)| *node).collect::<Vec<_>>()))
            .collect();
        assert_eq!(runs, vec![(false, vec![0]), (true, vec![1, 2]), (false, vec![3, 4]), (true, vec![5])]);
    }
}
