//! The operator contract.
//!
//! An [`Operator`] is a named pipeline stage. Bound to an input sequence and a control plane by
//! [`Operator::instantiate`], it produces an output sequence. Whether an operator may act as a
//! source, a transformation, or a sink follows from the element types it accepts and produces;
//! see [`infer_signature`].

use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::control::{Ctrl, NodeControl};
use crate::element::{Batch, Chunk, ElementType, Slice};
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::order::{EventOrder, OptimizeResult};
use crate::pipeline::Pipeline;
use crate::sequence::{LazySeq, Next};

/// An owned, type-erased operator.
pub type OperatorPtr = Box<dyn Operator>;

/// Where an operator may run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    /// In the process that started the pipeline.
    Local,
    /// On a remote worker.
    Remote,
    /// Wherever its neighbors run.
    Anywhere,
}

/// How an operator's node treats warnings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Strictness {
    /// Warnings are reported, once each, and processing continues.
    #[default]
    Normal,
    /// Warnings are upgraded to errors.
    Strict,
}

/// The input an operator is instantiated against.
pub enum OperatorInput {
    /// No input; the operator acts as a source.
    Void,
    /// A sequence of byte chunks.
    Bytes(LazySeq<Chunk>),
    /// A sequence of event slices.
    Events(LazySeq<Slice>),
}

impl OperatorInput {
    /// The element type of the input.
    pub fn element_type(&self) -> ElementType {
        match self {
            OperatorInput::Void => ElementType::Void,
            OperatorInput::Bytes(_) => ElementType::Bytes,
            OperatorInput::Events(_) => ElementType::Events,
        }
    }

    /// An input of type `element_type` that completes immediately.
    pub fn empty(element_type: ElementType) -> Self {
        match element_type {
            ElementType::Void => OperatorInput::Void,
            ElementType::Bytes => OperatorInput::Bytes(LazySeq::empty()),
            ElementType::Events => OperatorInput::Events(LazySeq::empty()),
        }
    }

    /// Checks that the operator `name` is used as a source.
    pub fn into_void(self, name: &str) -> Result<()> {
        match self {
            OperatorInput::Void => Ok(()),
            other => Err(clash(name, other.element_type())),
        }
    }

    /// Extracts an event sequence, or fails with a type clash naming the operator `name`.
    pub fn into_events(self, name: &str) -> Result<LazySeq<Slice>> {
        match self {
            OperatorInput::Events(seq) => Ok(seq),
            other => Err(clash(name, other.element_type())),
        }
    }

    /// Extracts a byte sequence, or fails with a type clash naming the operator `name`.
    pub fn into_bytes(self, name: &str) -> Result<LazySeq<Chunk>> {
        match self {
            OperatorInput::Bytes(seq) => Ok(seq),
            other => Err(clash(name, other.element_type())),
        }
    }
}

fn clash(name: &str, input: ElementType) -> Error {
    Error::TypeClash(format!("operator '{}' does not accept {} as input", name, input))
}

/// The output of an instantiated operator.
pub enum OperatorOutput {
    /// The operator is a sink; the sequence yields once per unit of work done.
    Void(LazySeq<()>),
    /// A sequence of byte chunks.
    Bytes(LazySeq<Chunk>),
    /// A sequence of event slices.
    Events(LazySeq<Slice>),
}

impl OperatorOutput {
    /// The element type of the output.
    pub fn element_type(&self) -> ElementType {
        match self {
            OperatorOutput::Void(_) => ElementType::Void,
            OperatorOutput::Bytes(_) => ElementType::Bytes,
            OperatorOutput::Events(_) => ElementType::Events,
        }
    }

    /// Turns the output into the input of the next operator, unless the operator was a sink.
    pub fn into_input(self) -> Option<OperatorInput> {
        match self {
            OperatorOutput::Void(_) => None,
            OperatorOutput::Bytes(seq) => Some(OperatorInput::Bytes(seq)),
            OperatorOutput::Events(seq) => Some(OperatorInput::Events(seq)),
        }
    }

    /// Advances the output sequence; sinks yield `Item(None)`.
    pub fn advance(&mut self) -> Next<Option<Batch>> {
        match self {
            OperatorOutput::Void(seq) => seq.advance().map(|()| None),
            OperatorOutput::Bytes(seq) => seq.advance().map(|x| Some(Batch::Bytes(x))),
            OperatorOutput::Events(seq) => seq.advance().map(|x| Some(Batch::Events(x))),
        }
    }

    /// Serializes the state of the output sequence.
    pub fn save(&mut self) -> Result<Option<Vec<u8>>> {
        match self {
            OperatorOutput::Void(seq) => seq.save(),
            OperatorOutput::Bytes(seq) => seq.save(),
            OperatorOutput::Events(seq) => seq.save(),
        }
    }
}

/// How much data an operator's node buffers, and how it backs off when idle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct DemandSettings {
    /// Buffered events below which the node asks for more.
    pub min_events: usize,
    /// Buffered events above which the node stops producing.
    pub max_events: usize,
    /// Buffered bytes below which the node asks for more.
    pub min_bytes: usize,
    /// Buffered bytes above which the node stops producing.
    pub max_bytes: usize,
    /// Batches a node grants its upstream at once.
    pub max_batches: usize,
    /// First pause after the operator had nothing to do.
    pub min_backoff: Duration,
    /// Longest pause after the operator had nothing to do.
    pub max_backoff: Duration,
    /// Factor by which consecutive pauses grow.
    pub backoff_rate: f64,
}

impl Default for DemandSettings {
    fn default() -> Self {
        DemandSettings {
            min_events: 8 * 1024,
            max_events: 254 * 1024,
            min_bytes: 128 * 1024,
            max_bytes: 4 * 1024 * 1024,
            max_batches: 20,
            min_backoff: Duration::from_millis(30),
            max_backoff: Duration::from_secs(1),
            backoff_rate: 2.0,
        }
    }
}

impl DemandSettings {
    /// The low and high water marks for elements of type `element_type`.
    pub fn limits(&self, element_type: ElementType) -> (usize, usize) {
        match element_type {
            ElementType::Events => (self.min_events, self.max_events),
            ElementType::Bytes => (self.min_bytes, self.max_bytes),
            ElementType::Void => (0, usize::MAX),
        }
    }

    /// The pause following `previous`, or the first pause if there was none.
    pub fn next_backoff(&self, previous: Option<Duration>) -> Duration {
        match previous {
            None => self.min_backoff,
            Some(previous) => previous.mul_f64(self.backoff_rate).clamp(self.min_backoff, self.max_backoff),
        }
    }
}

/// A serialized operator, as shipped to remote workers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    /// The name the operator is registered under.
    pub name: String,
    /// Operator-defined arguments.
    pub args: Vec<u8>,
}

impl Definition {
    /// Serializes `args` for the operator registered as `name`.
    pub fn new<A: Serialize>(name: &str, args: &A) -> Result<Self> {
        Ok(Definition { name: name.to_string(), args: bincode::serialize(args)? })
    }
}

/// A pipeline stage.
pub trait Operator: Send {
    /// The name, used for diagnostics and serialization.
    fn name(&self) -> &str;

    /// Binds the operator to its input and control plane.
    ///
    /// Setup errors are returned; errors found while running are emitted through `ctrl`.
    /// Must not block.
    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput>;

    /// A copy of the operator, as it was before instantiation.
    fn copy(&self) -> OperatorPtr;

    /// The output type the operator produces for `input`, or `None` if it rejects `input`.
    fn infer_type(&self, input: ElementType) -> Result<Option<ElementType>> {
        let ctrl: Ctrl = Rc::new(NodeControl::detached());
        match self.instantiate(OperatorInput::empty(input), ctrl) {
            Ok(output) => Ok(Some(output.element_type())),
            Err(Error::TypeClash(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Offers the operator a filter wanted downstream of it and the order downstream needs.
    fn optimize(&self, _filter: &Expression, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::do_not_optimize(self.copy())
    }

    /// Where the operator may run.
    fn location(&self) -> Location {
        Location::Anywhere
    }

    /// True if the operator needs its own thread, for example because it blocks.
    fn detached(&self) -> bool {
        false
    }

    /// True for operators the engine inserts on its own.
    fn internal(&self) -> bool {
        false
    }

    /// How the operator's node treats warnings.
    fn strictness(&self) -> Strictness {
        Strictness::Normal
    }

    /// Buffering and backoff settings for the operator's node.
    fn demand(&self) -> DemandSettings {
        DemandSettings::default()
    }

    /// The serialized form of the operator.
    fn definition(&self) -> Result<Definition> {
        Err(Error::Configuration(format!("operator '{}' cannot run on a remote worker", self.name())))
    }

    /// The operators of a pipeline, if the operator is one.
    fn as_pipeline(&self) -> Option<&Pipeline> {
        None
    }

    /// The interval and wrapped operator, if the operator repeats another one periodically.
    fn as_every(&self) -> Option<(Duration, &dyn Operator)> {
        None
    }
}

/// The roles an operator can take in a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Signature {
    /// Accepts no input and produces data.
    pub source: bool,
    /// Accepts data and produces data.
    pub transformation: bool,
    /// Accepts data and produces nothing.
    pub sink: bool,
}

/// Probes `op` with every element type to find the roles it can take.
pub fn infer_signature(op: &dyn Operator) -> Result<Signature> {
    let mut signature = Signature::default();
    for input in ElementType::ALL {
        if let Some(output) = op.infer_type(input)? {
            match (input, output) {
                (ElementType::Void, ElementType::Void) => {},
                (ElementType::Void, _) => signature.source = true,
                (_, ElementType::Void) => signature.sink = true,
                (_, _) => signature.transformation = true,
            }
        }
    }
    Ok(signature)
}

/// The output type of `op` for `input`, or a type clash if `op` rejects `input`.
pub fn check_type(op: &dyn Operator, input: ElementType) -> Result<ElementType> {
    op.infer_type(input)?.ok_or_else(|| clash(op.name(), input))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_geometrically_and_saturates() {
        let demand = DemandSettings::default();
        let first = demand.next_backoff(None);
        assert_eq!(first, Duration::from_millis(30));
        assert_eq!(demand.next_backoff(Some(first)), Duration::from_millis(60));
        assert_eq!(demand.next_backoff(Some(Duration::from_millis(900))), Duration::from_secs(1));
    }

    #[test]
    fn inputs_report_type_clashes() {
        let input = OperatorInput::empty(ElementType::Bytes);
        let error = input.into_events("where").err().unwrap();
        assert_eq!(error, Error::TypeClash("operator 'where' does not accept bytes as input".into()));
        assert!(OperatorInput::empty(ElementType::Void).into_void("emit").is_ok());
    }
}
