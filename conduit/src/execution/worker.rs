//! Worker threads that step execution nodes.
//!
//! A worker steps each of its nodes in turn. When no node made progress, it parks until a
//! message arrives for one of them, or until the earliest timer or poll deadline of its nodes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, Thread};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use conduit_communication::buzzer::Buzzer;
use conduit_communication::initialize::{panic_message, spawn, WorkerGuards};

use crate::error::{Error, Result};
use crate::logging::{ConduitEvent, ParkEvent, ScheduleEvent, ShutdownEvent, WorkerIdentifier, CONDUIT};

use super::node::{Node, NodeSpec};

/// Installs loggers into the logging registry of a new worker thread.
pub type LogFn = Arc<dyn Fn(WorkerIdentifier, &mut conduit_logging::Registry<WorkerIdentifier>) + Send + Sync>;

/// A worker chosen to host a node, and the buzzer that wakes it.
pub(crate) struct Placement {
    pub(crate) worker: usize,
    pub(crate) buzzer: Buzzer,
}

struct Handle {
    assignments: Sender<NodeSpec>,
    thread: Thread,
}

/// A set of worker threads, plus one thread for each detached node.
pub(crate) struct WorkerPool {
    name: String,
    workers: Vec<Handle>,
    guards: Vec<WorkerGuards<()>>,
    shared: usize,
    next: usize,
    epoch: Instant,
    log_fn: LogFn,
}

impl WorkerPool {
    /// Starts `threads` shared workers named after `name`.
    pub(crate) fn new(name: &str, threads: usize, log_fn: LogFn) -> Result<Self> {
        let mut pool = WorkerPool {
            name: name.to_string(),
            workers: Vec::new(),
            guards: Vec::new(),
            shared: threads.max(1),
            next: 0,
            epoch: Instant::now(),
            log_fn,
        };
        for _ in 0..pool.shared {
            pool.start_worker()?;
        }
        Ok(pool)
    }

    fn start_worker(&mut self) -> Result<usize> {
        let index = self.workers.len();
        let (assignments, receiver) = crossbeam_channel::unbounded();
        let epoch = self.epoch;
        let log_fn = Arc::clone(&self.log_fn);
        let guards = spawn(vec![format!("{}:{}", self.name, index)], move |_| work(index, &receiver, epoch, &log_fn))
            .map_err(|e| Error::Infrastructure(format!("cannot start worker thread: {}", e)))?;
        let thread = guards
            .threads()
            .pop()
            .ok_or_else(|| Error::Internal("worker thread has no handle".to_string()))?;
        self.workers.push(Handle { assignments, thread });
        self.guards.push(guards);
        Ok(index)
    }

    /// Chooses the worker for a node: a new one for detached nodes, a shared one otherwise.
    pub(crate) fn place(&mut self, detached: bool) -> Result<Placement> {
        let worker = if detached {
            self.start_worker()?
        } else {
            let worker = self.next % self.shared;
            self.next += 1;
            worker
        };
        Ok(Placement { worker, buzzer: Buzzer::new(self.workers[worker].thread.clone()) })
    }

    /// Hands `spec` to `worker`, which creates and runs the node.
    pub(crate) fn assign(&self, worker: usize, spec: NodeSpec) -> Result<()> {
        let handle = self
            .workers
            .get(worker)
            .ok_or_else(|| Error::Internal(format!("no worker {}", worker)))?;
        handle
            .assignments
            .send(spec)
            .map_err(|_| Error::Internal(format!("worker {} has stopped", worker)))?;
        handle.thread.unpark();
        Ok(())
    }

    /// Waits for all workers to finish their nodes.
    pub(crate) fn join(mut self) -> Vec<std::result::Result<(), String>> {
        self.hang_up();
        self.guards.drain(..).flat_map(WorkerGuards::join).collect()
    }

    fn hang_up(&mut self) {
        for handle in self.workers.drain(..) {
            drop(handle.assignments);
            handle.thread.unpark();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.hang_up();
    }
}

/// The body of a worker thread.
fn work(index: usize, assignments: &Receiver<NodeSpec>, epoch: Instant, log_fn: &LogFn) {
    let mut registry = conduit_logging::Registry::new(epoch, index);
    log_fn(index, &mut registry);
    let logger = registry.get::<ConduitEvent>(CONDUIT);

    let mut nodes: Vec<Node> = Vec::new();
    let mut open = true;
    loop {
        while open {
            match assignments.try_recv() {
                Ok(spec) => nodes.push(Node::new(spec, logger.clone())),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => open = false,
            }
        }
        if !open && nodes.is_empty() {
            break;
        }

        let now = Instant::now();
        let mut active = false;
        let mut wake: Option<Instant> = None;
        nodes.retain_mut(|node| {
            logger.as_ref().map(|l| l.log(ScheduleEvent::start(node.id())));
            let step = match catch_unwind(AssertUnwindSafe(|| node.step(now))) {
                Ok(step) => step,
                Err(payload) => node.panicked(&panic_message(&*payload)),
            };
            logger.as_ref().map(|l| l.log(ScheduleEvent::stop(node.id())));
            active |= step.progress;
            wake = match (wake, step.wake) {
                (Some(x), Some(y)) => Some(x.min(y)),
                (x, y) => x.or(y),
            };
            if step.finished {
                logger.as_ref().map(|l| l.log(ShutdownEvent { id: node.id() }));
            }
            !step.finished
        });

        if !active {
            let timeout = wake.map(|at| at.saturating_duration_since(Instant::now()));
            if timeout != Some(Duration::ZERO) {
                // Log parking and flush log.
                logger.as_ref().map(|l| l.log(ParkEvent::park(timeout)));
                registry.flush();
                match timeout {
                    Some(timeout) => thread::park_timeout(timeout),
                    None => thread::park(),
                }
                // Log return from unpark.
                logger.as_ref().map(|l| l.log(ParkEvent::unpark()));
            }
        }
    }
    registry.flush();
}
