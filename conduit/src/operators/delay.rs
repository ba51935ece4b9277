//! Replays events in real time, following a time field.
//!
//! `delay` anchors the first event time it sees, `t0`, to the wall clock at that moment. An event
//! with time `t` is then released at `wall0 + (t - t0) / speed`. Events without a time, or with a
//! time before `t0`, are released immediately.
//!
//! Checkpoints carry the anchor, as time elapsed since it was taken, and the events still held
//! back. A restored `delay` keeps pacing relative to the original anchor.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::control::Ctrl;
use crate::diagnostic::Diagnostic;
use crate::element::{Record, Slice, Value};
use crate::error::{Error, Result};
use crate::operator::{Definition, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::registry::{OperatorPlugin, Registry};
use crate::sequence::{Generator, LazySeq, Next};

/// Stands in for anchors too far in the future to represent.
const FOREVER: Duration = Duration::from_secs(365 * 24 * 60 * 60);

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct DelayArgs {
    field: String,
    speed: f64,
    start: Option<i64>,
}

/// Holds back events until their time comes.
#[derive(Debug, Clone)]
pub struct Delay {
    args: DelayArgs,
}

impl Delay {
    /// Delays events by their `field`, replaying `speed` times faster than real time.
    ///
    /// Fails unless `speed` is positive and finite.
    pub fn new(field: &str, speed: f64) -> Result<Self> {
        if !(speed.is_finite() && speed > 0.0) {
            return Err(Error::Configuration(format!("delay: speed must be positive, got {}", speed)));
        }
        Ok(Delay { args: DelayArgs { field: field.to_string(), speed, start: None } })
    }

    /// Anchors the wall clock at event time `start` (nanoseconds since the epoch), instead of at
    /// the first event time.
    pub fn start(mut self, start: i64) -> Self {
        self.args.start = Some(start);
        self
    }
}

impl Operator for Delay {
    fn name(&self) -> &str {
        "delay"
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput> {
        let input = input.into_events(self.name())?;
        let (anchor, current) = match ctrl.restored_state() {
            Some(state) => {
                let state: DelayState = bincode::deserialize(&state)
                    .map_err(|e| Error::Configuration(format!("cannot restore delay: {}", e)))?;
                let now = Instant::now();
                let anchor = state.anchor.map(|(elapsed, t0)| (now.checked_sub(elapsed).unwrap_or(now), t0));
                (anchor, state.held.map(|slice| (slice, 0)))
            },
            None => (None, None),
        };
        Ok(OperatorOutput::Events(LazySeq::new(DelayGenerator {
            args: self.args.clone(),
            input,
            ctrl,
            anchor,
            current,
        })))
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(self.clone())
    }

    fn definition(&self) -> Result<Definition> {
        Definition::new(self.name(), &self.args)
    }
}

/// What a checkpoint of `delay` holds.
#[derive(Serialize, Deserialize)]
struct DelayState {
    /// Time elapsed since the anchor, and the anchored event time.
    anchor: Option<(Duration, i64)>,
    /// Events received but not yet released.
    held: Option<Slice>,
}

struct DelayGenerator {
    args: DelayArgs,
    input: LazySeq<Slice>,
    ctrl: Ctrl,
    /// The wall clock time matching event time `t0`.
    anchor: Option<(Instant, i64)>,
    /// The slice being released, and the offset of its first unreleased event.
    current: Option<(Slice, usize)>,
}

impl DelayGenerator {
    /// The instant `record` is due, or `None` if it is due immediately.
    fn due(&mut self, record: &Record, now: Instant) -> Option<Instant> {
        let time = match record.get(&self.args.field) {
            Some(Value::Time(time)) => *time,
            None | Some(Value::Null) => return None,
            Some(_) => {
                self.ctrl.emit(
                    Diagnostic::warning(format!("field '{}' is not a time", self.args.field))
                        .note("the event is released immediately"),
                );
                return None;
            },
        };
        let start = self.args.start;
        let (wall0, t0) = *self.anchor.get_or_insert_with(|| (now, start.unwrap_or(time)));
        if time <= t0 {
            return None;
        }
        let offset = Duration::try_from_secs_f64((time - t0) as f64 / 1e9 / self.args.speed).unwrap_or(Duration::MAX);
        Some(wall0.checked_add(offset).unwrap_or(now + FOREVER))
    }
}

impl Generator for DelayGenerator {
    type Item = Slice;

    fn advance(&mut self) -> Next<Slice> {
        loop {
            let (slice, offset) = match self.current.take() {
                Some(current) => current,
                None => match self.input.advance() {
                    Next::Item(slice) if slice.is_empty() => continue,
                    Next::Item(slice) => (slice, 0),
                    Next::Pending => return Next::Pending,
                    Next::Done => return Next::Done,
                    Next::Failed(error) => return Next::Failed(error),
                },
            };
            let now = Instant::now();
            let mut end = offset;
            let mut wait = None;
            while end < slice.len() {
                match self.due(&slice.rows()[end], now) {
                    Some(at) if at > now => {
                        wait = Some(at - now);
                        break;
                    },
                    _ => end += 1,
                }
            }
            if end == offset {
                self.current = Some((slice, offset));
                if let Some(wait) = wait {
                    self.ctrl.set_waiting(true);
                    self.ctrl.wake_after(wait);
                }
                return Next::Pending;
            }
            if offset == 0 && end == slice.len() {
                return Next::Item(slice);
            }
            let due = slice.subslice(offset..end);
            if end < slice.len() {
                self.current = Some((slice, end));
            }
            return Next::Item(due);
        }
    }

    fn save(&mut self) -> Result<Option<Vec<u8>>> {
        let state = DelayState {
            anchor: self.anchor.map(|(wall0, t0)| (wall0.elapsed(), t0)),
            held: self.current.as_ref().map(|(slice, offset)| slice.subslice(*offset..slice.len())),
        };
        Ok(Some(bincode::serialize(&state)?))
    }
}

/// Parses `delay [--speed FACTOR] [--start NANOS] FIELD`.
pub struct DelayPlugin;

impl OperatorPlugin for DelayPlugin {
    fn name(&self) -> &str {
        "delay"
    }

    fn parse(&self, args: &[String], _registry: &Registry) -> Result<OperatorPtr> {
        let mut opts = getopts::Options::new();
        opts.optopt("", "speed", "replay speed relative to real time", "FACTOR");
        opts.optopt("", "start", "event time anchored to the start of the replay", "NANOS");
        let matches = super::parse_options(self.name(), &opts, args)?;
        let field = match matches.free.as_slice() {
            [field] => field.clone(),
            _ => return Err(Error::Configuration("delay: expected exactly one field".to_string())),
        };
        let speed = matches
            .opt_get_default("speed", 1.0f64)
            .map_err(|e| Error::Configuration(format!("delay: invalid speed: {}", e)))?;
        let mut delay = Delay::new(&field, speed)?;
        if let Some(start) = matches
            .opt_get::<i64>("start")
            .map_err(|e| Error::Configuration(format!("delay: invalid start: {}", e)))?
        {
            delay = delay.start(start);
        }
        Ok(Box::new(delay))
    }

    fn restore(&self, args: &[u8], _registry: &Registry) -> Result<OperatorPtr> {
        Ok(Box::new(Delay { args: bincode::deserialize(args)? }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{ControlPlane, NodeControl};
    use crate::diagnostic::Collector;
    use std::rc::Rc;
    use std::sync::Arc;

    fn timed(times: &[Option<i64>]) -> Slice {
        let rows = times
            .iter()
            .map(|time| match time {
                Some(time) => Record::new().with("ts", Value::Time(*time)),
                None => Record::new(),
            })
            .collect();
        Slice::new("timed", rows)
    }

    fn events(output: OperatorOutput) -> LazySeq<Slice> {
        match output {
            OperatorOutput::Events(seq) => seq,
            _ => panic!("expected events"),
        }
    }

    #[test]
    fn non_positive_speeds_are_rejected() {
        assert!(matches!(Delay::new("ts", 0.0), Err(Error::Configuration(_))));
        assert!(matches!(Delay::new("ts", -2.0), Err(Error::Configuration(_))));
        assert!(matches!(Delay::new("ts", f64::NAN), Err(Error::Configuration(_))));
        let registry = Registry::builtins();
        assert!(registry.parse("delay --speed 0 ts").is_err());
        assert!(registry.parse("delay --speed 2.5 ts").is_ok());
    }

    #[test]
    fn untimed_and_early_events_are_due_immediately() {
        let second = 1_000_000_000;
        let input = LazySeq::from_iter(vec![timed(&[Some(10 * second), None, Some(5 * second)])]);
        let ctrl = Rc::new(NodeControl::detached());
        let delay = Delay::new("ts", 1.0).unwrap();
        let mut seq = events(delay.instantiate(OperatorInput::Events(input), ctrl).unwrap());
        assert!(matches!(seq.advance(), Next::Item(slice) if slice.len() == 3));
        assert_eq!(seq.advance(), Next::Done);
    }

    #[test]
    fn future_events_wait_for_their_anchor() {
        let millis = 1_000_000;
        let input = LazySeq::from_iter(vec![timed(&[Some(0), Some(40 * millis)])]);
        let ctrl = Rc::new(NodeControl::detached());
        let delay = Delay::new("ts", 2.0).unwrap();
        let started = Instant::now();
        let mut seq = events(delay.instantiate(OperatorInput::Events(input), Rc::clone(&ctrl) as Ctrl).unwrap());
        assert!(matches!(seq.advance(), Next::Item(slice) if slice.len() == 1));
        assert_eq!(seq.advance(), Next::Pending);
        assert!(ctrl.is_waiting());
        let deadline = ctrl.next_deadline().unwrap();
        assert!(deadline >= started + Duration::from_millis(19));
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        assert!(ctrl.fire_timers(Instant::now()));
        assert!(matches!(seq.advance(), Next::Item(slice) if slice.len() == 1));
        assert!(Instant::now() >= started + Duration::from_millis(20));
        assert_eq!(seq.advance(), Next::Done);
    }

    #[test]
    fn non_time_fields_warn_once() {
        let rows = (0..3).map(|i| Record::new().with("ts", Value::Int(i))).collect();
        let input = LazySeq::from_iter(vec![Slice::new("ints", rows)]);
        let collector = Collector::new();
        let ctrl = NodeControl::new(Default::default(), Default::default(), Arc::new(collector.clone()));
        let delay = Delay::new("ts", 1.0).unwrap();
        let mut seq = events(delay.instantiate(OperatorInput::Events(input), Rc::new(ctrl)).unwrap());
        assert!(matches!(seq.advance(), Next::Item(slice) if slice.len() == 3));
        assert_eq!(collector.diagnostics().len(), 1);
    }

    #[test]
    fn restored_delay_keeps_its_anchor_and_held_events() {
        let millis = 1_000_000;
        let input = LazySeq::from_iter(vec![timed(&[Some(0), Some(400 * millis)])]);
        let ctrl = Rc::new(NodeControl::detached());
        let delay = Delay::new("ts", 2.0).unwrap();
        let started = Instant::now();
        let mut output = delay.instantiate(OperatorInput::Events(input), Rc::clone(&ctrl) as Ctrl).unwrap();
        assert!(matches!(output.advance(), Next::Item(Some(batch)) if batch.len() == 1));
        assert!(matches!(output.advance(), Next::Pending));
        let state = output.save().unwrap();
        drop(output);

        let ctrl = Rc::new(NodeControl::detached().with_restored(state));
        let input = OperatorInput::Events(LazySeq::empty());
        let mut seq = events(delay.instantiate(input, Rc::clone(&ctrl) as Ctrl).unwrap());
        assert_eq!(seq.advance(), Next::Pending);
        let deadline = ctrl.next_deadline().unwrap();
        assert!(deadline <= started + Duration::from_millis(225));
        std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        ctrl.fire_timers(Instant::now());
        assert!(matches!(seq.advance(), Next::Item(slice) if slice.rows()[0].get("ts") == Some(&Value::Time(400 * millis))));
        assert_eq!(seq.advance(), Next::Done);
    }
}
