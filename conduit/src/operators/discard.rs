//! A sink that drops everything.

use crate::control::Ctrl;
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::operator::{Definition, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::order::{EventOrder, OptimizeResult};
use crate::registry::{OperatorPlugin, Registry};
use crate::sequence::LazySeq;

/// Consumes and drops its input.
///
/// Appended by the executor to pipelines that end without a sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

impl Operator for Discard {
    fn name(&self) -> &str {
        "discard"
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput> {
        let output = match input {
            OperatorInput::Void => {
                return Err(Error::TypeClash("operator 'discard' does not accept void as input".into()))
            },
            OperatorInput::Bytes(mut seq) => LazySeq::from_fn(move || seq.advance().map(drop)),
            OperatorInput::Events(mut seq) => LazySeq::from_fn(move || seq.advance().map(drop)),
        };
        Ok(OperatorOutput::Void(output))
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(Discard)
    }

    fn optimize(&self, _filter: &Expression, _order: EventOrder) -> OptimizeResult {
        OptimizeResult::order_invariant(self.copy(), &Expression::trivially_true(), EventOrder::Unordered)
    }

    fn internal(&self) -> bool {
        true
    }

    fn definition(&self) -> Result<Definition> {
        Definition::new(self.name(), &())
    }
}

/// Parses `discard`.
pub struct DiscardPlugin;

impl OperatorPlugin for DiscardPlugin {
    fn name(&self) -> &str {
        "discard"
    }

    fn parse(&self, args: &[String], _registry: &Registry) -> Result<OperatorPtr> {
        if !args.is_empty() {
            return Err(Error::Configuration(format!("discard: unexpected arguments '{}'", args.join(" "))));
        }
        Ok(Box::new(Discard))
    }

    fn restore(&self, _args: &[u8], _registry: &Registry) -> Result<OperatorPtr> {
        Ok(Box::new(Discard))
    }
}
