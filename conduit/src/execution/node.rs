//! Execution nodes: the runtime hosts of operator instances.
//!
//! A node owns one operator instance. It receives the output of its upstream node into an
//! inbound buffer, and offers that buffer to its operator as the input sequence. The node grants
//! its upstream credit, one unit per batch, and sends its own output downstream only against
//! credit it holds.
//!
//! Checkpoints start at the first node, which takes one between two advances of its operator
//! when the executor asks for it. Every node forwards the checkpoint as a barrier in its output,
//! and the barrier stops a downstream operator's input until the downstream node, too, has
//! delivered its state and the executor has acknowledged it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use conduit_communication::channel::Puller;
use conduit_communication::initialize::panic_message;
use conduit_communication::Pull;

use crate::checkpoint::CheckpointId;
use crate::control::{ControlPlane, Ctrl, NodeControl, NodeIdentity};
use crate::diagnostic::{Diagnostic, DiagnosticHandler};
use crate::element::{Batch, ElementType};
use crate::error::{Error, Result};
use crate::logging::{CheckpointEvent, ConduitLogger, CreditEvent, MetricsEvent, NodeEvent, StateEvent};
use crate::operator::{DemandSettings, OperatorInput, OperatorOutput, OperatorPtr};
use crate::sequence::{Generator, LazySeq, Next};

use super::message::{Message, NodeId, NodeMetrics, Report, ReportKind};
use super::router::Router;

/// The lifecycle of an execution node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Spawned, waiting for the start.
    Created,
    /// The operator is being instantiated.
    Instantiating,
    /// Waiting for the downstream to accept the handshake.
    AwaitingHandshake,
    /// Between two advances of the operator.
    Ready,
    /// Advancing the operator.
    Streaming,
    /// Waiting for the executor to acknowledge the state delivered for a checkpoint.
    Checkpointing(CheckpointId),
    /// The operator completed, and the remaining output is being sent.
    Draining,
    /// Terminated normally.
    Completed,
    /// Terminated by an error.
    Failed,
}

impl NodeState {
    /// True once the node terminated.
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Completed | NodeState::Failed)
    }
}

enum Inbound {
    Data(Batch),
    Barrier(CheckpointId),
}

#[derive(Default)]
struct InputBuffer {
    queue: VecDeque<Inbound>,
    batches: usize,
    elements: usize,
    ended: bool,
    /// The barrier the operator reached; it blocks the input until the checkpoint completes.
    barrier: Option<CheckpointId>,
}

impl InputBuffer {
    /// True if the operator can only make progress once more messages arrive.
    fn blocked(&self) -> bool {
        self.barrier.is_some() || (self.queue.is_empty() && !self.ended)
    }
}

/// The input sequence of an operator, reading from the inbound buffer.
struct Input<T> {
    buffer: Rc<RefCell<InputBuffer>>,
    expected: ElementType,
    extract: fn(Batch) -> Option<T>,
}

impl<T> Generator for Input<T> {
    type Item = T;

    fn advance(&mut self) -> Next<T> {
        let mut buffer = self.buffer.borrow_mut();
        if buffer.barrier.is_some() {
            return Next::Pending;
        }
        match buffer.queue.pop_front() {
            Some(Inbound::Data(batch)) => {
                buffer.batches = buffer.batches.saturating_sub(1);
                buffer.elements = buffer.elements.saturating_sub(batch.len());
                let found = batch.element_type();
                match (self.extract)(batch) {
                    Some(item) => Next::Item(item),
                    None => Next::Failed(Error::TypeClash(format!(
                        "expected {} but received {}",
                        self.expected, found
                    ))),
                }
            },
            Some(Inbound::Barrier(id)) => {
                buffer.barrier = Some(id);
                Next::Pending
            },
            None if buffer.ended => Next::Done,
            None => Next::Pending,
        }
    }
}

enum Outbound {
    Data(Batch),
    Barrier(CheckpointId),
    End,
}

/// Everything a worker needs to create a node.
pub(crate) struct NodeSpec {
    pub(crate) id: NodeId,
    pub(crate) pipeline: u64,
    pub(crate) operator: OperatorPtr,
    pub(crate) inbox: Puller<Message>,
    pub(crate) router: Router,
    pub(crate) handler: Arc<dyn DiagnosticHandler>,
    pub(crate) restored: Option<Vec<u8>>,
    pub(crate) address: Option<String>,
}

/// The outcome of stepping a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Step {
    /// The node did something, and may have more to do right away.
    pub(crate) progress: bool,
    /// When the node wants to be stepped again, absent messages.
    pub(crate) wake: Option<Instant>,
    /// The node terminated.
    pub(crate) finished: bool,
}

impl Step {
    fn finished() -> Self {
        Step { progress: true, wake: None, finished: true }
    }
}

pub(crate) struct Node {
    id: NodeId,
    name: String,
    operator: OperatorPtr,
    ctrl: Rc<NodeControl>,
    inbox: Puller<Message>,
    router: Router,
    logger: Option<ConduitLogger>,
    state: NodeState,
    demand: DemandSettings,
    upstream: Option<NodeId>,
    downstream: Option<NodeId>,
    input: Rc<RefCell<InputBuffer>>,
    input_type: ElementType,
    output: Option<OperatorOutput>,
    output_type: ElementType,
    outbound: VecDeque<Outbound>,
    outbound_elements: usize,
    /// Batches the downstream allows this node to send.
    credit: usize,
    /// Credit granted to the upstream and not used yet.
    outstanding: usize,
    /// Checkpoints the executor asked a first node for.
    checkpoints: VecDeque<CheckpointId>,
    stopped_upstream: bool,
    backoff: Option<Duration>,
    next_poll: Option<Instant>,
    paused_since: Option<Instant>,
    waiting_since: Option<Instant>,
    metrics: NodeMetrics,
}

impl Node {
    pub(crate) fn new(spec: NodeSpec, logger: Option<ConduitLogger>) -> Self {
        let name = spec.operator.name().to_string();
        let identity = NodeIdentity { pipeline: spec.pipeline, index: spec.id, operator: name.clone() };
        let ctrl = NodeControl::new(identity, spec.operator.strictness(), spec.handler)
            .with_address(spec.address)
            .with_restored(spec.restored);
        logger.as_ref().map(|l| l.log(NodeEvent { id: spec.id, name: name.clone(), detached: spec.operator.detached() }));
        Node {
            id: spec.id,
            name,
            demand: spec.operator.demand(),
            operator: spec.operator,
            ctrl: Rc::new(ctrl),
            inbox: spec.inbox,
            router: spec.router,
            logger,
            state: NodeState::Created,
            upstream: None,
            downstream: None,
            input: Rc::new(RefCell::new(InputBuffer::default())),
            input_type: ElementType::Void,
            output: None,
            output_type: ElementType::Void,
            outbound: VecDeque::new(),
            outbound_elements: 0,
            credit: 0,
            outstanding: 0,
            checkpoints: VecDeque::new(),
            stopped_upstream: false,
            backoff: None,
            next_poll: None,
            paused_since: None,
            waiting_since: None,
            metrics: NodeMetrics::default(),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> NodeState {
        self.state
    }

    /// Processes received messages, then advances the operator if it may.
    pub(crate) fn step(&mut self, now: Instant) -> Step {
        let mut progress = false;
        while !self.state.is_terminal() {
            match self.inbox.recv() {
                Some(message) => {
                    progress = true;
                    if let Err(error) = self.receive(message, now) {
                        self.fail(error);
                    }
                },
                None => break,
            }
        }
        if !self.state.is_terminal() {
            match self.work(now) {
                Ok(worked) => progress |= worked,
                Err(error) => self.fail(error),
            }
        }
        if self.state.is_terminal() {
            return Step::finished();
        }
        Step { progress, wake: self.wake(), finished: false }
    }

    /// Fails the node after its operator panicked during [`Node::step`].
    pub(crate) fn panicked(&mut self, message: &str) -> Step {
        self.ctrl.emit(Diagnostic::error(format!("operator '{}' panicked: {}", self.name, message)));
        self.fail(Error::Silent);
        Step::finished()
    }

    fn receive(&mut self, message: Message, now: Instant) -> Result<()> {
        match message {
            Message::Start { upstream, downstream } => {
                if self.state != NodeState::Created {
                    return Err(Error::Internal(format!("node {} was started twice", self.id)));
                }
                self.upstream = upstream;
                let mut rest = downstream.into_iter();
                self.downstream = rest.next();
                if let Some(next) = self.downstream {
                    let start = Message::Start { upstream: Some(self.id), downstream: rest.collect() };
                    self.router.send(next, start);
                }
                if upstream.is_none() {
                    self.instantiate(ElementType::Void)?;
                }
            },
            Message::Handshake { element } => {
                let upstream = self.upstream.ok_or_else(|| {
                    Error::Internal(format!("node {} received a handshake before its start", self.id))
                })?;
                self.instantiate(element)?;
                let credit = self.demand.max_batches;
                self.outstanding = credit;
                self.metrics.credit_granted += credit as u64;
                self.logger.as_ref().map(|l| l.log(CreditEvent { id: self.id, granted: credit }));
                self.router.send(upstream, Message::HandshakeResponse { credit });
            },
            Message::HandshakeResponse { credit } => {
                self.credit += credit;
                self.metrics.credit_received += credit as u64;
                if self.state == NodeState::AwaitingHandshake {
                    self.enter(NodeState::Ready);
                }
            },
            Message::Data(batch) => {
                if self.outstanding == 0 {
                    return Err(Error::Internal(format!("node {} received data without credit", self.id)));
                }
                self.outstanding -= 1;
                self.metrics.batches_in += 1;
                self.metrics.elements_in += batch.len() as u64;
                self.next_poll = None;
                if !self.stopped_upstream {
                    let mut input = self.input.borrow_mut();
                    input.batches += 1;
                    input.elements += batch.len();
                    input.queue.push_back(Inbound::Data(batch));
                }
            },
            Message::Request(credit) => {
                self.credit += credit;
                self.metrics.credit_received += credit as u64;
            },
            Message::Checkpoint(id) => {
                if self.upstream.is_none() {
                    self.checkpoints.push_back(id);
                } else {
                    self.input.borrow_mut().queue.push_back(Inbound::Barrier(id));
                }
            },
            Message::CheckpointAck(id) => {
                if self.state != NodeState::Checkpointing(id) {
                    return Err(Error::Internal(format!(
                        "node {} received an acknowledgement for checkpoint {} in state {:?}",
                        self.id, id, self.state
                    )));
                }
                {
                    let mut input = self.input.borrow_mut();
                    if input.barrier == Some(id) {
                        input.barrier = None;
                    }
                }
                if self.downstream.is_some() {
                    self.outbound.push_back(Outbound::Barrier(id));
                }
                self.enter(NodeState::Ready);
            },
            Message::End => self.input.borrow_mut().ended = true,
            Message::Stop => self.complete(now),
            Message::Pause => {
                if self.paused_since.is_none() {
                    self.paused_since = Some(now);
                }
            },
            Message::Resume => {
                if let Some(since) = self.paused_since.take() {
                    self.metrics.paused += now.saturating_duration_since(since);
                }
            },
            Message::Cancel => {
                self.ctrl.cancel();
                self.complete(now);
            },
        }
        Ok(())
    }

    /// Instantiates the operator against input of type `element`, and handshakes downstream.
    fn instantiate(&mut self, element: ElementType) -> Result<()> {
        if self.state != NodeState::Created {
            return Err(Error::Internal(format!("node {} was instantiated twice", self.id)));
        }
        self.enter(NodeState::Instantiating);
        self.input_type = element;
        let input = match element {
            ElementType::Void => OperatorInput::Void,
            ElementType::Events => OperatorInput::Events(LazySeq::new(Input {
                buffer: Rc::clone(&self.input),
                expected: element,
                extract: Batch::into_events,
            })),
            ElementType::Bytes => OperatorInput::Bytes(LazySeq::new(Input {
                buffer: Rc::clone(&self.input),
                expected: element,
                extract: Batch::into_bytes,
            })),
        };
        let output = self.operator.instantiate(input, Rc::clone(&self.ctrl) as Ctrl)?;
        self.output_type = output.element_type();
        self.output = Some(output);
        match (self.downstream, self.output_type) {
            (Some(next), ElementType::Void) => Err(Error::TypeClash(format!(
                "'{}' is a sink, but node {} follows it",
                self.name, next
            ))),
            (Some(next), element) => {
                self.router.send(next, Message::Handshake { element });
                self.enter(NodeState::AwaitingHandshake);
                Ok(())
            },
            (None, ElementType::Void) => {
                self.enter(NodeState::Ready);
                Ok(())
            },
            (None, element) => Err(Error::TypeClash(format!(
                "the {} produced by '{}' have no consumer",
                element, self.name
            ))),
        }
    }

    fn work(&mut self, now: Instant) -> Result<bool> {
        self.ctrl.fire_timers(now);
        self.track_waiting(now);
        let mut progress = self.flush();
        self.grant_credit();
        if self.state == NodeState::Ready {
            progress |= self.advance(now)?;
            self.track_waiting(now);
            progress |= self.flush();
            self.grant_credit();
        }
        if self.state == NodeState::Draining && self.outbound.is_empty() {
            self.complete(now);
            progress = true;
        }
        Ok(progress)
    }

    fn can_advance(&self, now: Instant) -> bool {
        let (_, high) = self.demand.limits(self.output_type);
        self.output.is_some()
            && self.paused_since.is_none()
            && !self.ctrl.is_waiting()
            && self.next_poll.map_or(true, |at| now >= at)
            && self.outbound.len() < self.demand.max_batches
            && self.outbound_elements < high
    }

    /// Takes a requested checkpoint, or advances the operator once.
    fn advance(&mut self, now: Instant) -> Result<bool> {
        if let Some(id) = self.checkpoints.pop_front() {
            self.checkpoint(id)?;
            return Ok(true);
        }
        if !self.can_advance(now) {
            return Ok(false);
        }
        let Some(output) = self.output.as_mut() else {
            return Ok(false);
        };
        self.state = NodeState::Streaming;
        let started = Instant::now();
        let next = output.advance();
        self.metrics.running += started.elapsed();
        self.state = NodeState::Ready;
        if self.ctrl.has_failed() {
            return Err(Error::Silent);
        }
        let progress = match next {
            Next::Item(batch) => {
                self.backoff = None;
                self.next_poll = None;
                if let Some(batch) = batch.filter(|batch| !batch.is_empty()) {
                    self.outbound_elements += batch.len();
                    self.outbound.push_back(Outbound::Data(batch));
                }
                true
            },
            Next::Pending => {
                let blocked = self.upstream.is_some() && self.input.borrow().blocked();
                if !blocked && !self.ctrl.is_waiting() {
                    let pause = self.demand.next_backoff(self.backoff);
                    self.backoff = Some(pause);
                    self.next_poll = Some(now + pause);
                }
                false
            },
            Next::Done => {
                self.finish_output();
                true
            },
            Next::Failed(error) => return Err(error),
        };
        let barrier = self.input.borrow().barrier;
        if let Some(id) = barrier {
            if self.state == NodeState::Ready {
                self.checkpoint(id)?;
                return Ok(true);
            }
        }
        Ok(progress)
    }

    fn checkpoint(&mut self, id: CheckpointId) -> Result<()> {
        let state = match self.output.as_mut() {
            Some(output) => output.save()?,
            None => None,
        };
        let bytes = state.as_ref().map_or(0, Vec::len);
        self.logger.as_ref().map(|l| l.log(CheckpointEvent { id: self.id, checkpoint: id, bytes }));
        self.metrics.checkpoints += 1;
        self.enter(NodeState::Checkpointing(id));
        self.router.report(Report { node: self.id, kind: ReportKind::CheckpointState { id, state } });
        Ok(())
    }

    /// Sends buffered output downstream, data only against credit.
    fn flush(&mut self) -> bool {
        let Some(downstream) = self.downstream else {
            return false;
        };
        let mut sent = false;
        loop {
            if self.credit == 0 && matches!(self.outbound.front(), Some(Outbound::Data(_))) {
                break;
            }
            let message = match self.outbound.pop_front() {
                Some(Outbound::Data(batch)) => {
                    self.credit -= 1;
                    self.outbound_elements = self.outbound_elements.saturating_sub(batch.len());
                    self.metrics.batches_out += 1;
                    self.metrics.elements_out += batch.len() as u64;
                    Message::Data(batch)
                },
                Some(Outbound::Barrier(id)) => Message::Checkpoint(id),
                Some(Outbound::End) => Message::End,
                None => break,
            };
            self.router.send(downstream, message);
            sent = true;
        }
        sent
    }

    /// Grants the upstream more credit once the buffered input runs low.
    fn grant_credit(&mut self) {
        let Some(upstream) = self.upstream else {
            return;
        };
        if self.stopped_upstream || !matches!(self.state, NodeState::Ready | NodeState::Checkpointing(_)) {
            return;
        }
        let granted = {
            let input = self.input.borrow();
            let (low, _) = self.demand.limits(self.input_type);
            let held = input.batches + self.outstanding;
            if input.ended || input.elements >= low || held * 2 > self.demand.max_batches {
                return;
            }
            self.demand.max_batches - held
        };
        if granted == 0 {
            return;
        }
        self.outstanding += granted;
        self.metrics.credit_granted += granted as u64;
        self.logger.as_ref().map(|l| l.log(CreditEvent { id: self.id, granted }));
        self.router.send(upstream, Message::Request(granted));
    }

    /// The operator completed: release it, and end the output after what is buffered.
    fn finish_output(&mut self) {
        self.output = None;
        self.stop_upstream();
        if self.downstream.is_some() {
            self.outbound.push_back(Outbound::End);
        }
        self.enter(NodeState::Draining);
    }

    fn stop_upstream(&mut self) {
        if let Some(upstream) = self.upstream {
            if !self.stopped_upstream && !self.input.borrow().ended {
                self.router.send(upstream, Message::Stop);
            }
            self.stopped_upstream = true;
        }
    }

    fn close(&mut self) {
        self.output = None;
        self.outbound.clear();
        self.outbound_elements = 0;
        self.stop_upstream();
    }

    fn final_metrics(&mut self, now: Instant) -> NodeMetrics {
        if let Some(since) = self.paused_since.take() {
            self.metrics.paused += now.saturating_duration_since(since);
        }
        if let Some(since) = self.waiting_since.take() {
            self.metrics.waiting += now.saturating_duration_since(since);
        }
        self.logger.as_ref().map(|l| l.log(MetricsEvent { id: self.id, metrics: self.metrics.clone() }));
        self.metrics.clone()
    }

    fn complete(&mut self, now: Instant) {
        self.close();
        let metrics = self.final_metrics(now);
        self.router.report(Report { node: self.id, kind: ReportKind::Finished(metrics) });
        self.enter(NodeState::Completed);
    }

    /// Terminates the node with `error`, reporting it unless it was reported already.
    pub(crate) fn fail(&mut self, error: Error) {
        if self.state.is_terminal() {
            return;
        }
        if !error.is_silent() {
            self.ctrl.emit(Diagnostic::error(error.to_string()).note(format!("in operator '{}'", self.name)));
        }
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.close())) {
            let message = panic_message(&*payload);
            self.ctrl.emit(Diagnostic::error(format!("cleanup of '{}' panicked: {}", self.name, message)));
        }
        let metrics = self.final_metrics(Instant::now());
        self.router.report(Report { node: self.id, kind: ReportKind::Failed { error: Error::Silent, metrics } });
        self.enter(NodeState::Failed);
    }

    fn track_waiting(&mut self, now: Instant) {
        match (self.ctrl.is_waiting(), self.waiting_since) {
            (true, None) => self.waiting_since = Some(now),
            (false, Some(since)) => {
                self.metrics.waiting += now.saturating_duration_since(since);
                self.waiting_since = None;
            },
            _ => {},
        }
    }

    fn wake(&self) -> Option<Instant> {
        let poll = match self.state {
            NodeState::Ready if self.paused_since.is_none() => self.next_poll,
            _ => None,
        };
        match (self.ctrl.next_deadline(), poll) {
            (Some(x), Some(y)) => Some(x.min(y)),
            (x, y) => x.or(y),
        }
    }

    fn enter(&mut self, state: NodeState) {
        if self.state != state {
            self.state = state;
            self.logger.as_ref().map(|l| l.log(StateEvent { id: self.id, state: format!("{:?}", state) }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Collector;
    use crate::execution::executor::Event;
    use crate::execution::router::{Route, Supervisor};
    use crate::operators::collect::Collect;
    use crate::operators::emit::Emit;
    use conduit_communication::buzzer::Buzzer;
    use conduit_communication::channel::{buzzing, Pusher};
    use conduit_communication::Push;
    use crossbeam_channel::Receiver;

    /// Two connected nodes, stepped by hand on the test thread.
    struct Harness {
        nodes: Vec<Node>,
        inboxes: Vec<Pusher<Message>>,
        events: Receiver<Event>,
        collector: Collector,
    }

    impl Harness {
        fn new(operators: Vec<OperatorPtr>) -> Self {
            let (send, events) = crossbeam_channel::unbounded();
            let mut router = Router::new(Supervisor::Local(send));
            let mut channels = Vec::new();
            for id in 0..operators.len() {
                let (pusher, puller) = buzzing(Buzzer::default());
                router.insert(id, Route::Local(pusher.clone()));
                channels.push((pusher, puller));
            }
            let collector = Collector::new();
            let mut nodes = Vec::new();
            let mut inboxes = Vec::new();
            for (id, (operator, (pusher, puller))) in operators.into_iter().zip(channels).enumerate() {
                let spec = NodeSpec {
                    id,
                    pipeline: 1,
                    operator,
                    inbox: puller,
                    router: router.clone(),
                    handler: Arc::new(collector.clone()),
                    restored: None,
                    address: None,
                };
                nodes.push(Node::new(spec, None));
                inboxes.push(pusher);
            }
            Harness { nodes, inboxes, events, collector }
        }

        fn start(&mut self) {
            let downstream = (1..self.nodes.len()).collect();
            self.inboxes[0].send(Message::Start { upstream: None, downstream });
        }

        fn run(&mut self) {
            for _ in 0..1000 {
                let now = Instant::now();
                let mut progress = false;
                for node in self.nodes.iter_mut().filter(|node| !node.state().is_terminal()) {
                    progress |= node.step(now).progress;
                }
                if !progress {
                    return;
                }
            }
            panic!("nodes did not settle");
        }

        fn reports(&self) -> Vec<Report> {
            self.events
                .try_iter()
                .filter_map(|event| match event {
                    Event::Report(report) => Some(report),
                    _ => None,
                })
                .collect()
        }
    }

    #[test]
    fn nodes_stream_to_completion() {
        let (collect, collection) = Collect::new();
        let mut harness = Harness::new(vec![Box::new(Emit::numbered(5).batch_size(2)), Box::new(collect)]);
        harness.start();
        harness.run();
        assert_eq!(collection.len(), 5);
        assert!(harness.nodes.iter().all(|node| node.state() == NodeState::Completed));
        let finished: Vec<_> = harness
            .reports()
            .into_iter()
            .filter_map(|report| match report.kind {
                ReportKind::Finished(metrics) => Some((report.node, metrics)),
                _ => None,
            })
            .collect();
        assert_eq!(finished.len(), 2);
        let sent = finished.iter().find(|(node, _)| *node == 0).map(|(_, m)| m.batches_out);
        assert_eq!(sent, Some(3));
    }

    #[test]
    fn sends_wait_for_credit() {
        let (collect, collection) = Collect::new();
        let mut harness = Harness::new(vec![Box::new(Emit::numbered(10)), Box::new(collect)]);
        harness.nodes[1].demand = DemandSettings { max_batches: 2, ..Default::default() };
        harness.start();
        // Start, then handshake and response.
        for _ in 0..3 {
            let now = Instant::now();
            harness.nodes[0].step(now);
            harness.nodes[1].step(now);
        }
        assert!(harness.nodes[0].metrics.batches_out <= 2);
        harness.run();
        assert_eq!(collection.len(), 10);
        assert!(harness.nodes[0].metrics.batches_out <= harness.nodes[1].metrics.credit_granted);
    }

    #[test]
    fn checkpoints_wait_for_acknowledgement() {
        let (collect, _collection) = Collect::new();
        let gate = crate::operators::emit::Gate::default();
        let emit = Emit::numbered(4).hold_after(2, Arc::clone(&gate));
        let mut harness = Harness::new(vec![Box::new(emit), Box::new(collect)]);
        harness.start();
        harness.run();
        harness.inboxes[0].send(Message::Checkpoint(1));
        harness.run();
        assert_eq!(harness.nodes[0].state(), NodeState::Checkpointing(1));
        let states: Vec<_> = harness
            .reports()
            .into_iter()
            .filter_map(|report| match report.kind {
                ReportKind::CheckpointState { id, state } => Some((report.node, id, state)),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![(0, 1, Some(bincode::serialize(&2usize).unwrap()))]);
        harness.inboxes[0].send(Message::CheckpointAck(1));
        harness.run();
        assert_eq!(harness.nodes[1].state(), NodeState::Checkpointing(1));
        harness.inboxes[1].send(Message::CheckpointAck(1));
        harness.run();
        assert_eq!(harness.nodes[1].state(), NodeState::Ready);
        assert!(harness.collector.errors().is_empty());
    }

    #[test]
    fn panics_become_silent_failures() {
        struct Panicking;
        impl crate::operator::Operator for Panicking {
            fn name(&self) -> &str {
                "panicking"
            }
            fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput> {
                input.into_void(self.name())?;
                Ok(OperatorOutput::Void(LazySeq::from_fn(|| panic!("broken operator"))))
            }
            fn copy(&self) -> OperatorPtr {
                Box::new(Panicking)
            }
        }
        let mut harness = Harness::new(vec![Box::new(Panicking)]);
        harness.start();
        let node = &mut harness.nodes[0];
        let step = match catch_unwind(AssertUnwindSafe(|| node.step(Instant::now()))) {
            Ok(step) => step,
            Err(payload) => node.panicked(&panic_message(&*payload)),
        };
        assert!(step.finished);
        assert_eq!(node.state(), NodeState::Failed);
        assert_eq!(harness.collector.errors().len(), 1);
        assert!(matches!(
            harness.reports().last().map(|report| &report.kind),
            Some(ReportKind::Failed { error: Error::Silent, .. })
        ));
    }
}
