//! The identity operator.

use crate::control::Ctrl;
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::operator::{Definition, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::order::{EventOrder, OptimizeResult};
use crate::registry::{OperatorPlugin, Registry};

/// Forwards its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pass;

impl Operator for Pass {
    fn name(&self) -> &str {
        "pass"
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput> {
        match input {
            OperatorInput::Void => Err(Error::TypeClash("operator 'pass' does not accept void as input".into())),
            OperatorInput::Bytes(seq) => Ok(OperatorOutput::Bytes(seq)),
            OperatorInput::Events(seq) => Ok(OperatorOutput::Events(seq)),
        }
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(Pass)
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        OptimizeResult::order_invariant(self.copy(), filter, order)
    }

    fn definition(&self) -> Result<Definition> {
        Definition::new(self.name(), &())
    }
}

/// Parses `pass`.
pub struct PassPlugin;

impl OperatorPlugin for PassPlugin {
    fn name(&self) -> &str {
        "pass"
    }

    fn parse(&self, args: &[String], _registry: &Registry) -> Result<OperatorPtr> {
        if !args.is_empty() {
            return Err(Error::Configuration(format!("pass: unexpected arguments '{}'", args.join(" "))));
        }
        Ok(Box::new(Pass))
    }

    fn restore(&self, _args: &[u8], _registry: &Registry) -> Result<OperatorPtr> {
        Ok(Box::new(Pass))
    }
}
