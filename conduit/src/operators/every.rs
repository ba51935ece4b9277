//! Periodic re-instantiation of a source.

use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::control::{ControlPlane, Ctrl, NodeIdentity};
use crate::diagnostic::Diagnostic;
use crate::element::{Batch, ElementType};
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::operator::{Definition, Location, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::order::{EventOrder, OptimizeResult};
use crate::pipeline::Pipeline;
use crate::registry::{OperatorPlugin, Registry};
use crate::sequence::{Generator, LazySeq, Next};

/// Runs a source operator again and again, one run starting every `interval`.
///
/// The first run starts right away. If a run takes longer than the interval, the next run
/// starts as soon as it finishes. A failed run is reported as a warning and does not stop the
/// schedule.
///
/// A restored `every` resumes the run in progress at the checkpoint; later runs start from
/// scratch.
pub struct Every {
    interval: Duration,
    inner: OperatorPtr,
}

impl Every {
    /// Repeats `inner` every `interval`.
    ///
    /// Wrapping an `every` replaces its interval instead of nesting a second schedule.
    pub fn new(interval: Duration, inner: OperatorPtr) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::Configuration("every: interval must be positive".to_string()));
        }
        let inner = match inner.as_every() {
            Some((_, nested)) => nested.copy(),
            None => inner,
        };
        Ok(Every { interval, inner })
    }

    /// The time between run starts.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// The repeated operator.
    pub fn inner(&self) -> &dyn Operator {
        self.inner.as_ref()
    }
}

/// Wraps the first operator of `pipeline` in [`Every`], leaving the rest untouched.
///
/// Only the first operator of a pipeline can be a source, so it is the only one that is
/// replaced.
pub fn every(interval: Duration, pipeline: Pipeline) -> Result<Pipeline> {
    let mut operators = pipeline.unwrap().into_iter();
    let first = operators
        .next()
        .ok_or_else(|| Error::Configuration("every: expected a non-empty pipeline".to_string()))?;
    let mut result = Pipeline::new(vec![Box::new(Every::new(interval, first)?)]);
    for op in operators {
        result.append(op);
    }
    Ok(result)
}

impl Operator for Every {
    fn name(&self) -> &str {
        "every"
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput> {
        input.into_void(self.name())?;
        let state = RunState {
            inner: self.inner.copy(),
            interval: self.interval,
            ctrl,
            runs: 0,
            current: None,
            next_start: Instant::now(),
        };
        match self.inner.infer_type(ElementType::Void)? {
            Some(ElementType::Events) => Ok(OperatorOutput::Events(LazySeq::new(Runs { state, extract: Batch::into_events }))),
            Some(ElementType::Bytes) => Ok(OperatorOutput::Bytes(LazySeq::new(Runs { state, extract: Batch::into_bytes }))),
            _ => Err(Error::TypeClash(format!("every: '{}' is not a source", self.inner.name()))),
        }
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(Every { interval: self.interval, inner: self.inner.copy() })
    }

    fn infer_type(&self, input: ElementType) -> Result<Option<ElementType>> {
        if input != ElementType::Void {
            return Ok(None);
        }
        match self.inner.infer_type(ElementType::Void)? {
            Some(ElementType::Void) | None => Ok(None),
            output => Ok(output),
        }
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        let mut result = self.inner.optimize(filter, order);
        let interval = self.interval;
        result.replacement = result
            .replacement
            .map(|inner| Box::new(Every { interval, inner }) as OperatorPtr);
        result
    }

    fn location(&self) -> Location {
        self.inner.location()
    }

    fn detached(&self) -> bool {
        self.inner.detached()
    }

    fn definition(&self) -> Result<Definition> {
        Definition::new(self.name(), &(self.interval, self.inner.definition()?))
    }

    fn as_every(&self) -> Option<(Duration, &dyn Operator)> {
        Some((self.interval, self.inner.as_ref()))
    }
}

struct RunState {
    inner: OperatorPtr,
    interval: Duration,
    ctrl: Ctrl,
    /// Runs started so far.
    runs: usize,
    /// The run in progress, and when it started.
    current: Option<(OperatorOutput, Instant)>,
    next_start: Instant,
}

impl RunState {
    fn finish(&mut self, started: Instant) {
        self.next_start = (started + self.interval).max(Instant::now());
    }

    fn advance(&mut self) -> Next<Batch> {
        loop {
            if let Some((mut run, started)) = self.current.take() {
                match run.advance() {
                    Next::Item(Some(batch)) => {
                        self.current = Some((run, started));
                        return Next::Item(batch);
                    },
                    Next::Item(None) | Next::Pending => {
                        self.current = Some((run, started));
                        return Next::Pending;
                    },
                    Next::Done => self.finish(started),
                    Next::Failed(error) => {
                        if !error.is_silent() {
                            self.ctrl.emit(
                                Diagnostic::warning(format!("run of '{}' failed: {}", self.inner.name(), error))
                                    .note(format!("retrying in {:?}", self.interval)),
                            );
                        }
                        self.finish(started);
                    },
                }
                continue;
            }
            if self.ctrl.is_cancelled() {
                return Next::Done;
            }
            let now = Instant::now();
            if now < self.next_start {
                self.ctrl.set_waiting(true);
                self.ctrl.wake_after(self.next_start - now);
                return Next::Pending;
            }
            // Only the first run resumes from restored state.
            let ctrl: Ctrl = match self.runs {
                0 => Rc::clone(&self.ctrl),
                _ => Rc::new(FreshRun(Rc::clone(&self.ctrl))),
            };
            self.runs += 1;
            match self.inner.instantiate(OperatorInput::Void, ctrl) {
                Ok(run) => self.current = Some((run, now)),
                Err(error) => {
                    self.ctrl.emit(Diagnostic::warning(format!(
                        "failed to start '{}': {}",
                        self.inner.name(),
                        error
                    )));
                    self.finish(now);
                    if self.next_start > Instant::now() {
                        continue;
                    }
                    return Next::Pending;
                },
            }
        }
    }
}

/// The control plane of a run after the first, which has nothing to restore.
struct FreshRun(Ctrl);

impl ControlPlane for FreshRun {
    fn emit(&self, diagnostic: Diagnostic) {
        self.0.emit(diagnostic)
    }
    fn identity(&self) -> &NodeIdentity {
        self.0.identity()
    }
    fn node_address(&self) -> Option<&str> {
        self.0.node_address()
    }
    fn set_waiting(&self, waiting: bool) {
        self.0.set_waiting(waiting)
    }
    fn is_waiting(&self) -> bool {
        self.0.is_waiting()
    }
    fn wake_after(&self, delay: Duration) {
        self.0.wake_after(delay)
    }
    fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
    fn restored_state(&self) -> Option<Vec<u8>> {
        None
    }
    fn has_failed(&self) -> bool {
        self.0.has_failed()
    }
}

struct Runs<T> {
    state: RunState,
    extract: fn(Batch) -> Option<T>,
}

impl<T> Generator for Runs<T> {
    type Item = T;

    fn advance(&mut self) -> Next<T> {
        match self.state.advance() {
            Next::Item(batch) => match (self.extract)(batch) {
                Some(item) => Next::Item(item),
                None => Next::Failed(Error::Internal("every: run changed its output type".to_string())),
            },
            Next::Pending => Next::Pending,
            Next::Done => Next::Done,
            Next::Failed(error) => Next::Failed(error),
        }
    }

    fn save(&mut self) -> Result<Option<Vec<u8>>> {
        match self.state.current.as_mut() {
            Some((run, _)) => run.save(),
            None => Ok(None),
        }
    }
}

/// Parses `every DURATION OPERATOR`, where the operator may be a pipeline in braces.
///
/// For a pipeline, only its first operator repeats.
pub struct EveryPlugin;

impl OperatorPlugin for EveryPlugin {
    fn name(&self) -> &str {
        "every"
    }

    fn parse(&self, args: &[String], registry: &Registry) -> Result<OperatorPtr> {
        match args {
            [interval, rest @ ..] if !rest.is_empty() => {
                let interval = super::parse_duration(interval)?;
                let operator = registry.parse_operator(rest)?;
                match operator.as_pipeline() {
                    Some(pipeline) => {
                        let pipeline = Pipeline::new(pipeline.operators().iter().map(|op| op.copy()).collect());
                        Ok(Box::new(every(interval, pipeline)?))
                    },
                    None => Ok(Box::new(Every::new(interval, operator)?)),
                }
            },
            _ => Err(Error::Configuration("every: expected an interval and an operator".to_string())),
        }
    }

    fn restore(&self, args: &[u8], registry: &Registry) -> Result<OperatorPtr> {
        let (interval, definition): (Duration, Definition) = bincode::deserialize(args)?;
        Ok(Box::new(Every::new(interval, registry.resolve(&definition)?)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::NodeControl;
    use crate::operators::emit::Emit;
    use crate::operators::filter::Where;
    use crate::operators::pass::Pass;

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn only_the_first_operator_is_wrapped() {
        let pipeline = Pipeline::new(vec![Box::new(Emit::numbered(1)), Box::new(Pass), Box::new(Pass)]);
        let wrapped = every(ms(10), pipeline).unwrap();
        let names: Vec<_> = wrapped.operators().iter().map(|op| op.name().to_string()).collect();
        assert_eq!(names, vec!["every", "pass", "pass"]);
        assert_eq!(wrapped.operators()[0].as_every().map(|(interval, _)| interval), Some(ms(10)));
    }

    #[test]
    fn rewrapping_collapses() {
        let once = Every::new(ms(10), Box::new(Emit::numbered(1))).unwrap();
        let twice = Every::new(ms(10), Box::new(once)).unwrap();
        assert_eq!(twice.interval(), ms(10));
        assert_eq!(twice.inner().name(), "emit");
        assert!(twice.inner().as_every().is_none());
    }

    #[test]
    fn zero_intervals_and_non_sources_are_rejected() {
        assert!(matches!(Every::new(Duration::ZERO, Box::new(Pass)), Err(Error::Configuration(_))));
        let every = Every::new(ms(10), Box::new(Pass)).unwrap();
        assert_eq!(every.infer_type(ElementType::Void), Ok(None));
        let source = Every::new(ms(10), Box::new(Emit::numbered(1))).unwrap();
        assert_eq!(source.infer_type(ElementType::Void), Ok(Some(ElementType::Events)));
    }

    #[test]
    fn optimize_rewraps_the_replacement() {
        let inner = Pipeline::new(vec![Box::new(Emit::numbered(3)), Box::new(Where::new(Expression::True))]);
        let every = Every::new(ms(25), Box::new(inner)).unwrap();
        let result = every.optimize(&Expression::True, EventOrder::Ordered);
        let replacement = result.replacement.unwrap();
        let (interval, inner) = replacement.as_every().unwrap();
        assert_eq!(interval, ms(25));
        assert_eq!(inner.as_pipeline().map(Pipeline::len), Some(1));
    }

    #[test]
    fn runs_repeat_on_schedule() {
        let every = Every::new(ms(20), Box::new(Emit::numbered(2).batch_size(2))).unwrap();
        let ctrl = Rc::new(NodeControl::detached());
        let mut output = every.instantiate(OperatorInput::Void, Rc::clone(&ctrl) as Ctrl).unwrap();
        let started = Instant::now();
        assert!(matches!(output.advance(), Next::Item(Some(batch)) if batch.len() == 2));
        assert!(matches!(output.advance(), Next::Pending));
        assert!(ctrl.is_waiting());
        let deadline = ctrl.next_deadline().unwrap();
        assert!(deadline >= started + ms(15));
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        ctrl.fire_timers(Instant::now());
        assert!(matches!(output.advance(), Next::Item(Some(batch)) if batch.len() == 2));
        ctrl.cancel();
        assert!(matches!(output.advance(), Next::Done));
    }

    #[test]
    fn only_the_first_run_resumes_from_restored_state() {
        let every = Every::new(ms(5), Box::new(Emit::numbered(3).batch_size(3))).unwrap();
        let restored = bincode::serialize(&2usize).unwrap();
        let ctrl = Rc::new(NodeControl::detached().with_restored(Some(restored)));
        let mut output = every.instantiate(OperatorInput::Void, Rc::clone(&ctrl) as Ctrl).unwrap();
        let mut lengths = Vec::new();
        while lengths.len() < 3 {
            match output.advance() {
                Next::Item(Some(batch)) => lengths.push(batch.len()),
                Next::Item(None) | Next::Pending => {
                    if let Some(deadline) = ctrl.next_deadline() {
                        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                        ctrl.fire_timers(Instant::now());
                    }
                },
                other => panic!("unexpected {:?}", other.map(|_| ())),
            }
        }
        assert_eq!(lengths, vec![1, 3, 3]);
    }
}
