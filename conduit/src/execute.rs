//! Starts pipeline executions from configuration information.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use conduit_communication::initialize::panic_message;

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::control::{ControlPlane, NodeControl, NodeIdentity};
use crate::diagnostic::{Diagnostic, DiagnosticHandler, Stderr};
use crate::element::ElementType;
use crate::error::{Error, Result};
use crate::execution::{Execution, LogFn};
use crate::operator::{DemandSettings, Location, Operator, OperatorInput, Strictness};
use crate::operators::Discard;
use crate::pipeline::Pipeline;
use crate::sequence::Next;

/// Configures the execution of a pipeline.
#[derive(Clone)]
pub struct Config {
    /// Worker threads, remote workers, and connection setup.
    pub communication: conduit_communication::Config,
    /// Interval between checkpoints; `None` disables periodic checkpoints.
    pub checkpoint_interval: Option<Duration>,
    /// Checkpoints that may be in flight at once.
    pub max_in_flight: usize,
    /// Receives checkpoint states.
    pub store: Option<Arc<dyn CheckpointStore>>,
    /// The checkpoint to restore node states from.
    pub restore: Option<Checkpoint>,
    /// Receives the diagnostics of all nodes.
    pub diagnostics: Arc<dyn DiagnosticHandler>,
    /// Installs loggers into the logging registry of each worker thread.
    pub log_fn: LogFn,
    /// Optimizes closed pipelines before they run.
    pub optimize: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            communication: conduit_communication::Config::default(),
            checkpoint_interval: None,
            max_in_flight: 1,
            store: None,
            restore: None,
            diagnostics: Arc::new(Stderr),
            log_fn: Arc::new(|_, _| ()),
            optimize: true,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("communication", &self.communication)
            .field("checkpoint_interval", &self.checkpoint_interval)
            .field("max_in_flight", &self.max_in_flight)
            .field("restore", &self.restore.as_ref().map(|checkpoint| checkpoint.id))
            .field("optimize", &self.optimize)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Installs options into a [`getopts::Options`] struct that corresponds
    /// to the parameters in the configuration.
    ///
    /// This includes the options of the communication configuration.
    pub fn install_options(opts: &mut getopts::Options) {
        conduit_communication::Config::install_options(opts);
        opts.optopt("", "checkpoint-interval-ms", "milliseconds between checkpoints", "MS");
        opts.optopt("", "max-in-flight", "checkpoints that may be in flight at once", "NUM");
        opts.optflag("", "no-optimize", "runs pipelines as written");
    }

    /// Instantiates a configuration based upon the parsed options in `matches`.
    pub fn from_matches(matches: &getopts::Matches) -> std::result::Result<Config, String> {
        let defaults = Config::default();
        let communication = conduit_communication::Config::from_matches(matches)?;
        let checkpoint_interval = matches
            .opt_get::<u64>("checkpoint-interval-ms")
            .map_err(|e| e.to_string())?
            .map(Duration::from_millis);
        if checkpoint_interval == Some(Duration::ZERO) {
            return Err("the checkpoint interval must be positive".to_string());
        }
        let max_in_flight = matches.opt_get_default("max-in-flight", defaults.max_in_flight).map_err(|e| e.to_string())?;
        if max_in_flight == 0 {
            return Err("at least one checkpoint must be allowed in flight".to_string());
        }
        Ok(Config {
            communication,
            checkpoint_interval,
            max_in_flight,
            optimize: !matches.opt_present("no-optimize"),
            ..defaults
        })
    }

    /// Constructs a new configuration by parsing the supplied text arguments.
    ///
    /// Most commonly, callers supply `std::env::args()` as the iterator.
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> std::result::Result<Config, String> {
        let mut opts = getopts::Options::new();
        Config::install_options(&mut opts);
        let matches = opts.parse(args).map_err(|e| e.to_string())?;
        Config::from_matches(&matches)
    }
}

/// Type-checks `pipeline`, closes it, and optimizes it if configured.
fn prepare(mut pipeline: Pipeline, config: &Config) -> Result<Pipeline> {
    if pipeline.is_empty() {
        return Err(Error::Configuration("cannot execute an empty pipeline".to_string()));
    }
    match pipeline.infer_type(ElementType::Void)? {
        None => {
            let first = pipeline.operators().first().map(|op| op.name().to_string()).unwrap_or_default();
            return Err(Error::TypeClash(format!("pipeline must start with a source, but starts with '{}'", first)));
        },
        Some(ElementType::Void) => {},
        Some(_) => pipeline.append(Box::new(Discard)),
    }
    if config.optimize {
        pipeline = pipeline.optimize_if_closed();
        if pipeline.is_empty() {
            return Err(Error::Configuration("pipeline is empty after optimization".to_string()));
        }
    }
    Ok(pipeline)
}

/// Executes `pipeline` on worker threads and remote workers.
///
/// The pipeline must start with a source; a pipeline that does not end with a sink has its output
/// discarded. Returns once every node is spawned and the pipeline started, with a handle to the
/// running pipeline.
///
/// *Note*: dropping the returned [`Execution`] cancels the pipeline and blocks until all of its
/// nodes terminated. Call [`Execution::join`] to wait for the pipeline to finish instead.
///
/// # Examples
/// ```rust
/// use conduit::execute::{execute, Config};
/// use conduit::operators::{Collect, Emit};
/// use conduit::pipeline::Pipeline;
///
/// let (collect, collection) = Collect::new();
/// let pipeline = Pipeline::new(vec![Box::new(Emit::numbered(5)), Box::new(collect)]);
/// let execution = execute(pipeline, Config::default()).unwrap();
/// execution.join().unwrap();
/// assert_eq!(collection.len(), 5);
/// ```
pub fn execute(pipeline: Pipeline, config: Config) -> Result<Execution> {
    let pipeline = prepare(pipeline, &config)?;
    crate::execution::executor::start(pipeline, &config)
}

/// Executes `pipeline` in the calling thread.
///
/// The operators are chained into one sequence, which the calling thread advances until it ends.
/// There is no backpressure, no checkpointing, and every operator must run locally. Errors and
/// panics are reported to the configured diagnostics handler, and the result is then
/// [`Error::Silent`].
pub fn execute_directly(pipeline: Pipeline, config: &Config) -> Result<()> {
    let pipeline = prepare(pipeline, config)?;
    if let Some(op) = pipeline.operators().iter().find(|op| op.location() == Location::Remote) {
        return Err(Error::Configuration(format!("operator '{}' cannot run in the calling thread", op.name())));
    }
    let identity = NodeIdentity { pipeline: 0, index: 0, operator: pipeline.name().to_string() };
    let ctrl = Rc::new(NodeControl::new(identity, Strictness::Normal, Arc::clone(&config.diagnostics)));
    let mut output = match pipeline.instantiate(OperatorInput::Void, Rc::clone(&ctrl) as Rc<dyn ControlPlane>) {
        Ok(output) => output,
        Err(error) => return Err(report(&ctrl, error)),
    };

    let demand = DemandSettings::default();
    let mut backoff: Option<Duration> = None;
    loop {
        ctrl.fire_timers(Instant::now());
        if ctrl.is_waiting() {
            let deadline = ctrl
                .next_deadline()
                .ok_or_else(|| report(&ctrl, Error::Internal("operator waits without a timer".to_string())))?;
            thread::sleep(deadline.saturating_duration_since(Instant::now()));
            continue;
        }
        let next = match catch_unwind(AssertUnwindSafe(|| output.advance())) {
            Ok(next) => next,
            Err(payload) => {
                let message = panic_message(&*payload);
                ctrl.emit(Diagnostic::error(format!("pipeline panicked: {}", message)));
                return Err(Error::Silent);
            },
        };
        match next {
            Next::Item(_) => backoff = None,
            Next::Pending => {
                if ctrl.is_waiting() {
                    continue;
                }
                let pause = demand.next_backoff(backoff);
                backoff = Some(pause);
                thread::sleep(pause);
            },
            Next::Done => break,
            Next::Failed(error) => return Err(report(&ctrl, error)),
        }
        if ctrl.has_failed() {
            return Err(Error::Silent);
        }
    }
    if ctrl.has_failed() {
        return Err(Error::Silent);
    }
    Ok(())
}

/// Reports `error` as a diagnostic, unless it was reported already.
fn report(ctrl: &NodeControl, error: Error) -> Error {
    if !error.is_silent() {
        ctrl.emit(Diagnostic::error(error.to_string()));
    }
    Error::Silent
}

/// Executes `pipeline` with a configuration parsed from command line arguments.
///
/// The arguments are those of [`Config::from_args`]; the first one is the program name.
pub fn execute_from_args<I: Iterator<Item = String>>(args: I, pipeline: Pipeline) -> Result<Execution> {
    let config = Config::from_args(args.skip(1)).map_err(Error::Configuration)?;
    execute(pipeline, config)
}
