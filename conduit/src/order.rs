//! Ordering requirements and the results of operator optimization.

use serde::{Deserialize, Serialize};

use crate::expression::Expression;
use crate::operator::OperatorPtr;

/// How much of the order of events an operator needs, or guarantees.
///
/// Variants are ordered from strongest to weakest.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventOrder {
    /// The exact order of events matters.
    Ordered,
    /// Only the order of events within one schema matters.
    Schema,
    /// The order of events does not matter.
    Unordered,
}

/// The outcome of [`Operator::optimize`].
pub struct OptimizeResult {
    /// The filter the operator passes upstream; `None` if it cannot take the filter it was given.
    pub filter: Option<Expression>,
    /// The order the operator needs from its input.
    pub order: EventOrder,
    /// The operator replacing this one; `None` removes the operator.
    pub replacement: Option<OperatorPtr>,
}

impl std::fmt::Debug for OptimizeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizeResult")
            .field("filter", &self.filter)
            .field("order", &self.order)
            .field("replacement", &self.replacement.as_ref().map(|op| op.name()))
            .finish()
    }
}

impl OptimizeResult {
    /// The result of an operator that does not care about the order of its input, and lets
    /// `filter` pass unchanged.
    pub fn order_invariant(op: OperatorPtr, filter: &Expression, order: EventOrder) -> Self {
        OptimizeResult {
            filter: Some(filter.clone()),
            order,
            replacement: Some(op),
        }
    }

    /// The result of an operator that takes part in no optimization.
    pub fn do_not_optimize(op: OperatorPtr) -> Self {
        OptimizeResult {
            filter: None,
            order: EventOrder::Ordered,
            replacement: Some(op),
        }
    }
}
