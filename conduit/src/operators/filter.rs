//! The `where` operator, which drops events failing a predicate.

use crate::control::Ctrl;
use crate::error::Result;
use crate::expression::Expression;
use crate::operator::{Definition, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::order::{EventOrder, OptimizeResult};
use crate::registry::{OperatorPlugin, Registry};
use crate::sequence::{LazySeq, Next};

/// Keeps the events matching an expression.
///
/// During optimization, `where` hands its expression to the operator before it and removes
/// itself; the pipeline optimizer puts the filter back wherever it cannot travel further.
#[derive(Debug, Clone)]
pub struct Where {
    expression: Expression,
}

impl Where {
    /// Keeps events matching `expression`.
    pub fn new(expression: Expression) -> Self {
        Where { expression }
    }

    /// The filter expression.
    pub fn expression(&self) -> &Expression {
        &self.expression
    }
}

impl Operator for Where {
    fn name(&self) -> &str {
        "where"
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput> {
        let mut input = input.into_events(self.name())?;
        let expression = self.expression.clone();
        Ok(OperatorOutput::Events(LazySeq::from_fn(move || loop {
            match input.advance() {
                Next::Item(mut slice) => {
                    slice.retain(|row| expression.matches(row));
                    if !slice.is_empty() {
                        return Next::Item(slice);
                    }
                },
                Next::Pending => return Next::Pending,
                Next::Done => return Next::Done,
                Next::Failed(error) => return Next::Failed(error),
            }
        })))
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(self.clone())
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        OptimizeResult {
            filter: Some(self.expression.clone().and(filter.clone())),
            order,
            replacement: None,
        }
    }

    fn definition(&self) -> Result<Definition> {
        Definition::new(self.name(), &self.expression)
    }
}

/// Parses `where EXPRESSION`.
pub struct WherePlugin;

impl OperatorPlugin for WherePlugin {
    fn name(&self) -> &str {
        "where"
    }

    fn parse(&self, args: &[String], _registry: &Registry) -> Result<OperatorPtr> {
        Ok(Box::new(Where::new(Expression::parse(args)?)))
    }

    fn restore(&self, args: &[u8], _registry: &Registry) -> Result<OperatorPtr> {
        Ok(Box::new(Where::new(bincode::deserialize(args)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::NodeControl;
    use crate::element::{Record, Slice, Value};
    use std::rc::Rc;

    #[test]
    fn drops_non_matching_events_and_empty_slices() {
        let rows = |range: std::ops::Range<i64>| range.map(|i| Record::new().with("x", Value::Int(i))).collect();
        let slices = vec![Slice::new("s", rows(0..4)), Slice::new("s", rows(0..2)), Slice::new("s", rows(5..6))];
        let input = OperatorInput::Events(LazySeq::from_iter(slices));
        let filter = Where::new(Expression::parse(&["x".into(), ">=".into(), "2".into()]).unwrap());
        let output = filter.instantiate(input, Rc::new(NodeControl::detached())).unwrap();
        let mut seq = match output {
            OperatorOutput::Events(seq) => seq,
            _ => panic!("expected events"),
        };
        assert!(matches!(seq.advance(), Next::Item(slice) if slice.len() == 2));
        assert!(matches!(seq.advance(), Next::Item(slice) if slice.len() == 1));
        assert_eq!(seq.advance(), Next::Done);
    }
}
