//! Remote workers: processes that host runs of operators for executors elsewhere.
//!
//! A worker accepts connections from executors. Each connection carries one run: the executor
//! sends the serialized operators, the worker rebuilds them through its [`Registry`], spawns one
//! node per operator, and answers with their descriptions. From then on the connection relays
//! node messages in both directions, and the reports of the worker's nodes to the executor.
//!
//! When the connection ends, the worker cancels the nodes it hosts for it.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Sender;

use conduit_communication::channel::buzzing;
use conduit_communication::logging::CommunicationSetup;
use conduit_communication::networking;
use conduit_communication::tcp::{recv_loop, send_loop, Frame};

use crate::diagnostic::{Diagnostic, DiagnosticHandler};
use crate::error::{Error, Result};
use crate::registry::Registry;

use super::message::{Message, NodeDescription, NodeId, Report, ReportKind, SpawnRequest, Wire, CONTROL_CHANNEL, REPORT_CHANNEL};
use super::node::NodeSpec;
use super::router::{Route, Router, Supervisor};
use super::worker::{LogFn, WorkerPool};

/// Forwards the diagnostics of one node to its executor.
struct Forward {
    node: NodeId,
    frames: Sender<Frame<Wire>>,
}

impl DiagnosticHandler for Forward {
    fn emit(&self, diagnostic: Diagnostic) {
        let report = Report { node: self.node, kind: ReportKind::Diagnostic(diagnostic) };
        // The executor is gone once the connection closed; nobody is left to tell.
        let _ = self.frames.send(Frame { channel: REPORT_CHANNEL, target: self.node, payload: Wire::Report(report) });
    }
}

/// A remote worker listening for executors.
pub struct Server {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: conduit_communication::Config,
    log_fn: LogFn,
}

impl Server {
    /// Listens on `address`, rebuilding operators through `registry`.
    pub fn bind<A: ToSocketAddrs>(address: A, registry: Registry) -> Result<Server> {
        Ok(Server {
            listener: TcpListener::bind(address)?,
            registry: Arc::new(registry),
            config: conduit_communication::Config::default(),
            log_fn: Arc::new(|_, _| ()),
        })
    }

    /// Uses `config` for the worker threads of each connection, and for progress reports.
    pub fn with_config(mut self, config: conduit_communication::Config) -> Self {
        self.config = config;
        self
    }

    /// Installs loggers into the registry of each worker thread.
    pub fn with_logging(mut self, log_fn: LogFn) -> Self {
        self.log_fn = log_fn;
        self
    }

    /// The address the worker listens on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves connections until accepting one fails.
    ///
    /// Each connection is served on a thread of its own.
    pub fn serve(self) -> Result<()> {
        let address = self.local_addr()?.to_string();
        loop {
            let (stream, remote) = networking::accept(&self.listener, 1, self.config.report)?;
            let connection = Connection {
                registry: Arc::clone(&self.registry),
                config: self.config.clone(),
                log_fn: Arc::clone(&self.log_fn),
                address: address.clone(),
                remote,
            };
            thread::Builder::new()
                .name(format!("conduit:connection:{}", remote))
                .spawn(move || {
                    if let Err(error) = connection.serve(stream) {
                        if connection.config.report {
                            println!("process 1:\tconnection from process {} failed: {}", connection.remote, error);
                        }
                    }
                })?;
        }
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("listener", &self.listener).field("registry", &self.registry).finish_non_exhaustive()
    }
}

/// One connection from an executor.
struct Connection {
    registry: Arc<Registry>,
    config: conduit_communication::Config,
    log_fn: LogFn,
    address: String,
    remote: usize,
}

/// The nodes spawned for a connection.
struct Hosted {
    pool: WorkerPool,
    router: Router,
    nodes: Vec<NodeId>,
}

impl Connection {
    fn serve(&self, stream: TcpStream) -> Result<()> {
        let reader = stream.try_clone()?;
        let remote = self.remote;
        let (frames, outgoing) = crossbeam_channel::unbounded();
        let log_fn = Arc::clone(&self.config.log_fn);
        let sender = thread::Builder::new()
            .name(format!("conduit:send:{}", remote))
            .spawn(move || {
                let logger = log_fn(CommunicationSetup { sender: true, process: 1, remote: Some(remote) });
                send_loop(stream, outgoing, 1, remote, logger)
            })?;

        let mut hosted: Option<Hosted> = None;
        let logger = (self.config.log_fn)(CommunicationSetup { sender: false, process: 1, remote: Some(remote) });
        let result = recv_loop(reader, 1, remote, logger, |header, wire: Wire| match wire {
            Wire::Spawn(request) => {
                let reply = match hosted {
                    Some(_) => Err(Error::Internal("connection hosts a run already".to_string())),
                    None => self.spawn(request, &frames).map(|(run, descriptions)| {
                        hosted = Some(run);
                        descriptions
                    }),
                };
                frames.send(Frame { channel: CONTROL_CHANNEL, target: 0, payload: Wire::Spawned(reply) }).is_ok()
            },
            Wire::Node(message) => {
                if let Some(run) = hosted.as_mut() {
                    run.router.send(header.target, message);
                }
                true
            },
            Wire::Spawned(_) | Wire::Report(_) => false,
        });

        if let Some(mut run) = hosted {
            for node in run.nodes.iter() {
                run.router.send(*node, Message::Cancel);
            }
            drop(run.router);
            for result in run.pool.join() {
                if let Err(message) = result {
                    return Err(Error::Internal(format!("worker thread panicked: {}", message)));
                }
            }
        }
        drop(frames);
        let _ = sender.join();
        Ok(result?)
    }

    /// Rebuilds the operators of `request`, and spawns a node for each.
    fn spawn(&self, request: SpawnRequest, frames: &Sender<Frame<Wire>>) -> Result<(Hosted, Vec<NodeDescription>)> {
        let operators = request
            .operators
            .iter()
            .map(|definition| self.registry.resolve(definition))
            .collect::<Result<Vec<_>>>()?;
        let mut pool = WorkerPool::new(
            &format!("conduit:remote:{}", request.pipeline),
            self.config.threads,
            Arc::clone(&self.log_fn),
        )?;
        let mut router = Router::new(Supervisor::Remote(frames.clone())).with_fallback(frames.clone());
        let mut placed = Vec::with_capacity(operators.len());
        for (offset, operator) in operators.into_iter().enumerate() {
            let node = request.first + offset;
            let placement = pool.place(operator.detached())?;
            let (pusher, inbox) = buzzing(placement.buzzer);
            router.insert(node, Route::Local(pusher));
            placed.push((placement.worker, node, operator, inbox));
        }

        let mut descriptions = Vec::with_capacity(placed.len());
        let mut nodes = Vec::with_capacity(placed.len());
        let mut restore = request.restore.into_iter();
        for (worker, node, operator, inbox) in placed {
            descriptions.push(NodeDescription {
                node,
                operator: operator.name().to_string(),
                address: self.address.clone(),
            });
            let spec = NodeSpec {
                id: node,
                pipeline: request.pipeline,
                operator,
                inbox,
                router: router.clone(),
                handler: Arc::new(Forward { node, frames: frames.clone() }),
                restored: restore.next().flatten(),
                address: Some(self.address.clone()),
            };
            pool.assign(worker, spec)?;
            nodes.push(node);
        }
        Ok((Hosted { pool, router, nodes }, descriptions))
    }
}
