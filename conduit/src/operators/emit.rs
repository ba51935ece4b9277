//! A source of literal or generated events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::Ctrl;
use crate::element::{Record, Slice, Value};
use crate::error::{Error, Result};
use crate::operator::{Definition, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::registry::{OperatorPlugin, Registry};
use crate::sequence::{Generator, LazySeq, Next};

/// Opens a held source; see [`Emit::hold_after`].
#[doc(hidden)]
pub type Gate = Arc<AtomicBool>;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
struct EmitArgs {
    schema: String,
    rows: Vec<Record>,
    batch_size: usize,
}

/// Emits a fixed list of events as slices of a single schema.
///
/// The position of the next event is checkpointed, so a restored `emit` continues where the
/// checkpoint left off.
#[derive(Debug, Clone)]
pub struct Emit {
    args: EmitArgs,
    hold: Option<(usize, Gate)>,
}

impl Emit {
    /// Emits `rows` with schema `schema`.
    pub fn new(schema: &str, rows: Vec<Record>) -> Self {
        Emit {
            args: EmitArgs { schema: schema.to_string(), rows, batch_size: 1 },
            hold: None,
        }
    }

    /// Emits `count` events of schema `numbered`, each with an `index` field.
    pub fn numbered(count: usize) -> Self {
        Self::generated(count, None)
    }

    /// Emits `count` events with an `index` field and, if `step` is set, a `time` field that
    /// advances by `step` from the UNIX epoch.
    ///
    /// Times past the range of [`Value::Time`] saturate.
    pub fn generated(count: usize, step: Option<Duration>) -> Self {
        let rows = (0..count)
            .map(|index| {
                let record = Record::new().with("index", Value::Int(index as i64));
                match step {
                    Some(step) => record.with("time", Value::Time(event_time(step, index).unwrap_or(i64::MAX))),
                    None => record,
                }
            })
            .collect();
        Self::new("numbered", rows)
    }

    /// Emits up to `batch_size` events per slice.
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.args.batch_size = batch_size.max(1);
        self
    }

    /// Stops emitting after the first `count` events until `gate` opens.
    #[doc(hidden)]
    pub fn hold_after(mut self, count: usize, gate: Gate) -> Self {
        self.hold = Some((count, gate));
        self
    }
}

/// The time of event `index`, in nanoseconds since the epoch, if it fits.
fn event_time(step: Duration, index: usize) -> Option<i64> {
    match i64::try_from(index).ok()? {
        0 => Some(0),
        index => i64::try_from(step.as_nanos()).ok()?.checked_mul(index),
    }
}

impl Operator for Emit {
    fn name(&self) -> &str {
        "emit"
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput> {
        input.into_void(self.name())?;
        let next = match ctrl.restored_state() {
            Some(state) => bincode::deserialize::<usize>(&state)
                .map_err(|e| Error::Configuration(format!("cannot restore emit: {}", e)))?,
            None => 0,
        };
        Ok(OperatorOutput::Events(LazySeq::new(EmitGenerator {
            args: self.args.clone(),
            hold: self.hold.clone(),
            next,
            ctrl,
        })))
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(self.clone())
    }

    fn definition(&self) -> Result<Definition> {
        Definition::new(self.name(), &self.args)
    }
}

struct EmitGenerator {
    args: EmitArgs,
    hold: Option<(usize, Gate)>,
    next: usize,
    ctrl: Ctrl,
}

impl Generator for EmitGenerator {
    type Item = Slice;

    fn advance(&mut self) -> Next<Slice> {
        if self.ctrl.is_cancelled() || self.next >= self.args.rows.len() {
            return Next::Done;
        }
        let mut end = (self.next + self.args.batch_size).min(self.args.rows.len());
        if let Some((count, gate)) = &self.hold {
            if !gate.load(Ordering::SeqCst) {
                if self.next >= *count {
                    return Next::Pending;
                }
                end = end.min(*count);
            }
        }
        let rows = self.args.rows[self.next..end].to_vec();
        self.next = end;
        Next::Item(Slice::new(&self.args.schema, rows))
    }

    fn save(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(Some(bincode::serialize(&self.next)?))
    }
}

/// Parses `emit [--schema NAME] [--batch N] [--time-step DURATION] COUNT`.
pub struct EmitPlugin;

impl OperatorPlugin for EmitPlugin {
    fn name(&self) -> &str {
        "emit"
    }

    fn parse(&self, args: &[String], _registry: &Registry) -> Result<OperatorPtr> {
        let mut opts = getopts::Options::new();
        opts.optopt("", "schema", "schema of the emitted events", "NAME");
        opts.optopt("", "batch", "events per slice", "NUM");
        opts.optopt("", "time-step", "distance between event times", "DURATION");
        let matches = super::parse_options(self.name(), &opts, args)?;
        let count = match matches.free.as_slice() {
            [count] => count
                .parse::<usize>()
                .map_err(|e| Error::Configuration(format!("emit: invalid count '{}': {}", count, e)))?,
            _ => return Err(Error::Configuration("emit: expected exactly one event count".to_string())),
        };
        let step = matches.opt_str("time-step").map(|text| super::parse_duration(&text)).transpose()?;
        if let Some(step) = step {
            if event_time(step, count.saturating_sub(1)).is_none() {
                return Err(Error::Configuration(format!("emit: {} events {:?} apart exceed the range of event times", count, step)));
            }
        }
        let batch = matches
            .opt_get_default("batch", 1usize)
            .map_err(|e| Error::Configuration(format!("emit: invalid batch size: {}", e)))?;
        let mut emit = Emit::generated(count, step).batch_size(batch);
        if let Some(schema) = matches.opt_str("schema") {
            emit.args.schema = schema;
        }
        Ok(Box::new(emit))
    }

    fn restore(&self, args: &[u8], _registry: &Registry) -> Result<OperatorPtr> {
        Ok(Box::new(Emit { args: bincode::deserialize(args)?, hold: None }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn restored_ctrl(state: Option<Vec<u8>>) -> Ctrl {
        Rc::new(crate::control::NodeControl::detached().with_restored(state))
    }

    fn drain(output: OperatorOutput) -> Vec<Slice> {
        let mut seq = match output {
            OperatorOutput::Events(seq) => seq,
            _ => panic!("expected events"),
        };
        let mut result = Vec::new();
        while let Next::Item(slice) = seq.advance() {
            result.push(slice);
        }
        result
    }

    #[test]
    fn batches_split_the_rows() {
        let emit = Emit::numbered(5).batch_size(2);
        let output = emit.instantiate(OperatorInput::Void, restored_ctrl(None)).unwrap();
        let sizes: Vec<_> = drain(output).iter().map(Slice::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn restored_emit_resumes_after_saved_position() {
        let state = bincode::serialize(&2usize).unwrap();
        let output = Emit::numbered(3).instantiate(OperatorInput::Void, restored_ctrl(Some(state))).unwrap();
        let slices = drain(output);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].rows()[0].get("index"), Some(&Value::Int(2)));
    }

    #[test]
    fn held_emit_waits_for_its_gate() {
        let gate = Gate::default();
        let emit = Emit::numbered(3).batch_size(5).hold_after(2, Arc::clone(&gate));
        let mut output = emit.instantiate(OperatorInput::Void, restored_ctrl(None)).unwrap();
        assert!(matches!(output.advance(), Next::Item(Some(batch)) if batch.len() == 2));
        assert!(matches!(output.advance(), Next::Pending));
        assert_eq!(bincode::deserialize::<usize>(&output.save().unwrap().unwrap()).unwrap(), 2);
        gate.store(true, Ordering::SeqCst);
        assert!(matches!(output.advance(), Next::Item(Some(batch)) if batch.len() == 1));
        assert!(matches!(output.advance(), Next::Done));
    }

    #[test]
    fn parses_count_and_options() {
        let registry = Registry::builtins();
        let op = registry.parse_operator(&["emit".into(), "--time-step".into(), "1s".into(), "4".into()]).unwrap();
        let output = op.instantiate(OperatorInput::Void, restored_ctrl(None)).unwrap();
        let slices = drain(output);
        assert_eq!(slices.len(), 4);
        assert_eq!(slices[3].rows()[0].get("time"), Some(&Value::Time(3_000_000_000)));
        assert!(registry.parse_operator(&["emit".into()]).is_err());
    }

    #[test]
    fn event_times_out_of_range_are_rejected() {
        let registry = Registry::builtins();
        let args = ["emit", "--time-step", "100000h", "1000000"].map(String::from);
        assert!(matches!(registry.parse_operator(&args), Err(Error::Configuration(_))));

        let emit = Emit::generated(3, Some(Duration::from_secs(u64::MAX / 2)));
        let output = emit.instantiate(OperatorInput::Void, restored_ctrl(None)).unwrap();
        let slices = drain(output);
        assert_eq!(slices[0].rows()[0].get("time"), Some(&Value::Time(0)));
        assert_eq!(slices[2].rows()[0].get("time"), Some(&Value::Time(i64::MAX)));
    }
}
