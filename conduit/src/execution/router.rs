//! Delivery of messages to nodes, wherever they run.

use std::collections::HashMap;

use crossbeam_channel::Sender;

use conduit_communication::channel::Pusher;
use conduit_communication::tcp::Frame;
use conduit_communication::Push;

use super::executor::Event;
use super::message::{Message, NodeId, Report, Wire, NODE_CHANNEL, REPORT_CHANNEL};

/// How to reach one node.
#[derive(Clone)]
pub(crate) enum Route {
    /// A node of this process.
    Local(Pusher<Message>),
    /// A node behind a connection.
    Remote(Sender<Frame<Wire>>),
}

/// How to reach the executor.
#[derive(Clone)]
pub(crate) enum Supervisor {
    /// The executor runs in this process.
    Local(Sender<Event>),
    /// The executor is at the other end of a connection.
    Remote(Sender<Frame<Wire>>),
}

/// Routes messages to nodes, and reports to the executor.
///
/// Each node owns a clone.
#[derive(Clone)]
pub(crate) struct Router {
    routes: HashMap<NodeId, Route>,
    /// Used for nodes without a route of their own.
    fallback: Option<Sender<Frame<Wire>>>,
    supervisor: Supervisor,
}

impl Router {
    pub(crate) fn new(supervisor: Supervisor) -> Self {
        Router { routes: HashMap::new(), fallback: None, supervisor }
    }

    pub(crate) fn with_fallback(mut self, fallback: Sender<Frame<Wire>>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub(crate) fn insert(&mut self, node: NodeId, route: Route) {
        self.routes.insert(node, route);
    }

    /// Sends `message` to `target`; false if the target cannot be reached.
    pub(crate) fn send(&mut self, target: NodeId, message: Message) -> bool {
        match self.routes.get_mut(&target) {
            Some(Route::Local(pusher)) => {
                pusher.send(message);
                true
            },
            Some(Route::Remote(frames)) => frames.send(node_frame(target, message)).is_ok(),
            None => match &self.fallback {
                Some(frames) => frames.send(node_frame(target, message)).is_ok(),
                None => false,
            },
        }
    }

    /// Sends `report` to the executor; false if the executor is gone.
    pub(crate) fn report(&self, report: Report) -> bool {
        match &self.supervisor {
            Supervisor::Local(events) => events.send(Event::Report(report)).is_ok(),
            Supervisor::Remote(frames) => frames
                .send(Frame { channel: REPORT_CHANNEL, target: report.node, payload: Wire::Report(report) })
                .is_ok(),
        }
    }
}

fn node_frame(target: NodeId, message: Message) -> Frame<Wire> {
    Frame { channel: NODE_CHANNEL, target, payload: Wire::Node(message) }
}
