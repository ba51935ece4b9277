//! The control plane operators use to talk to the engine.
//!
//! An operator receives a [`Ctrl`] when it is instantiated. Through it, the operator reports
//! diagnostics, learns its identity, and tells the scheduler that it is waiting for an external
//! event such as a timer.

use std::cell::{Cell, RefCell};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::diagnostic::{Diagnostic, DiagnosticHandler, Severity};
use crate::operator::Strictness;

/// Who a node is, within its pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeIdentity {
    /// Identifier of the running pipeline.
    pub pipeline: u64,
    /// Position of the node's operator in the pipeline.
    pub index: usize,
    /// Name of the node's operator.
    pub operator: String,
}

/// The operator-facing interface of the engine.
pub trait ControlPlane {
    /// Reports a diagnostic. Errors make the operator's node fail once the operator yields.
    fn emit(&self, diagnostic: Diagnostic);
    /// The identity of the hosting node.
    fn identity(&self) -> &NodeIdentity;
    /// The address of the remote worker hosting this node, if the node runs remotely.
    fn node_address(&self) -> Option<&str>;
    /// Marks the operator as waiting for an external event; the scheduler stops advancing it.
    fn set_waiting(&self, waiting: bool);
    /// True while the operator is marked as waiting.
    fn is_waiting(&self) -> bool;
    /// Clears the waiting flag once `delay` has elapsed.
    fn wake_after(&self, delay: Duration);
    /// True once the pipeline is being torn down.
    fn is_cancelled(&self) -> bool;
    /// The state saved by the last checkpoint this node is restored from.
    fn restored_state(&self) -> Option<Vec<u8>>;
    /// True once an error diagnostic was emitted.
    fn has_failed(&self) -> bool;
}

/// A shared handle to a control plane.
pub type Ctrl = Rc<dyn ControlPlane>;

/// Discards diagnostics.
struct Discard;

impl DiagnosticHandler for Discard {
    fn emit(&self, _diagnostic: Diagnostic) {}
}

/// The control plane of one execution node.
pub struct NodeControl {
    identity: NodeIdentity,
    address: Option<String>,
    strictness: Strictness,
    handler: Arc<dyn DiagnosticHandler>,
    /// Warnings already forwarded, for deduplication.
    warnings: RefCell<HashSet<Diagnostic>>,
    waiting: Cell<bool>,
    failed: Cell<bool>,
    cancelled: Cell<bool>,
    timers: RefCell<BinaryHeap<Reverse<Instant>>>,
    restored: Option<Vec<u8>>,
}

impl NodeControl {
    /// A control plane forwarding diagnostics to `handler`.
    pub fn new(identity: NodeIdentity, strictness: Strictness, handler: Arc<dyn DiagnosticHandler>) -> Self {
        NodeControl {
            identity,
            address: None,
            strictness,
            handler,
            warnings: RefCell::new(HashSet::new()),
            waiting: Cell::new(false),
            failed: Cell::new(false),
            cancelled: Cell::new(false),
            timers: RefCell::new(BinaryHeap::new()),
            restored: None,
        }
    }

    /// A control plane for dry runs, which drops all diagnostics.
    pub fn detached() -> Self {
        Self::new(NodeIdentity::default(), Strictness::Normal, Arc::new(Discard))
    }

    /// Sets the remote worker address reported by [`ControlPlane::node_address`].
    pub fn with_address(mut self, address: Option<String>) -> Self {
        self.address = address;
        self
    }

    /// Sets the state returned by [`ControlPlane::restored_state`].
    pub fn with_restored(mut self, state: Option<Vec<u8>>) -> Self {
        self.restored = state;
        self
    }

    /// Marks the pipeline as being torn down.
    pub fn cancel(&self) {
        self.cancelled.set(true);
    }

    /// Fires every timer due at `now`; a fired timer clears the waiting flag.
    ///
    /// Returns true if any timer fired.
    pub fn fire_timers(&self, now: Instant) -> bool {
        let mut timers = self.timers.borrow_mut();
        let mut fired = false;
        while timers.peek().map(|deadline| deadline.0 <= now).unwrap_or(false) {
            timers.pop();
            fired = true;
        }
        if fired {
            self.waiting.set(false);
        }
        fired
    }

    /// The earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.borrow().peek().map(|deadline| deadline.0)
    }
}

impl ControlPlane for NodeControl {
    fn emit(&self, mut diagnostic: Diagnostic) {
        if diagnostic.severity == Severity::Warning {
            if self.strictness == Strictness::Strict {
                diagnostic.severity = Severity::Error;
            } else if !self.warnings.borrow_mut().insert(diagnostic.clone()) {
                return;
            }
        }
        if diagnostic.is_error() {
            self.failed.set(true);
        }
        self.handler.emit(diagnostic);
    }
    fn identity(&self) -> &NodeIdentity {
        &self.identity
    }
    fn node_address(&self) -> Option<&str> {
        self.address.as_deref()
    }
    fn set_waiting(&self, waiting: bool) {
        self.waiting.set(waiting);
    }
    fn is_waiting(&self) -> bool {
        self.waiting.get()
    }
    fn wake_after(&self, delay: Duration) {
        self.timers.borrow_mut().push(Reverse(Instant::now() + delay));
    }
    fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
    fn restored_state(&self) -> Option<Vec<u8>> {
        self.restored.clone()
    }
    fn has_failed(&self) -> bool {
        self.failed.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostic::Collector;

    fn control(strictness: Strictness) -> (NodeControl, Collector) {
        let collector = Collector::new();
        let identity = NodeIdentity { pipeline: 1, index: 0, operator: "test".into() };
        (NodeControl::new(identity, strictness, Arc::new(collector.clone())), collector)
    }

    #[test]
    fn repeated_warnings_are_reported_once() {
        let (ctrl, collector) = control(Strictness::Normal);
        ctrl.emit(Diagnostic::warning("field missing"));
        ctrl.emit(Diagnostic::warning("field missing"));
        ctrl.emit(Diagnostic::warning("other problem"));
        assert_eq!(collector.diagnostics().len(), 2);
        assert!(!ctrl.has_failed());
    }

    #[test]
    fn strict_operators_fail_on_warnings() {
        let (ctrl, collector) = control(Strictness::Strict);
        ctrl.emit(Diagnostic::warning("field missing"));
        assert!(ctrl.has_failed());
        assert_eq!(collector.errors().len(), 1);
    }

    #[test]
    fn timers_clear_waiting() {
        let (ctrl, _) = control(Strictness::Normal);
        ctrl.set_waiting(true);
        ctrl.wake_after(Duration::from_millis(5));
        let deadline = ctrl.next_deadline().unwrap();
        assert!(!ctrl.fire_timers(deadline - Duration::from_millis(1)));
        assert!(ctrl.is_waiting());
        assert!(ctrl.fire_timers(deadline));
        assert!(!ctrl.is_waiting());
        assert!(ctrl.next_deadline().is_none());
    }
}
