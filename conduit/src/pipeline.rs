//! Pipelines: ordered, type-checked compositions of operators.

use std::rc::Rc;

use crate::control::Ctrl;
use crate::element::ElementType;
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::operator::{Location, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::operators::filter::Where;
use crate::order::{EventOrder, OptimizeResult};

/// An ordered sequence of operators.
///
/// A pipeline is itself an operator, so that pipelines can be nested; nested pipelines are
/// flattened when they are added.
#[derive(Default)]
pub struct Pipeline {
    operators: Vec<OperatorPtr>,
}

impl Pipeline {
    /// Creates a pipeline, flattening nested pipelines.
    pub fn new(operators: Vec<OperatorPtr>) -> Self {
        let mut pipeline = Pipeline::default();
        for op in operators {
            pipeline.append(op);
        }
        pipeline
    }

    /// The operators, in data flow order.
    pub fn operators(&self) -> &[OperatorPtr] {
        &self.operators[..]
    }

    /// Takes the pipeline apart into its operators.
    pub fn unwrap(self) -> Vec<OperatorPtr> {
        self.operators
    }

    /// The number of operators.
    pub fn len(&self) -> usize {
        self.operators.len()
    }

    /// True if the pipeline has no operators.
    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// Adds `op` at the end of the pipeline.
    pub fn append(&mut self, op: OperatorPtr) {
        match op.as_pipeline() {
            Some(nested) => self.operators.extend(nested.operators.iter().map(|op| op.copy())),
            None => self.operators.push(op),
        }
    }

    /// Adds `op` at the start of the pipeline.
    pub fn prepend(&mut self, op: OperatorPtr) {
        let rest = std::mem::take(&mut self.operators);
        self.append(op);
        self.operators.extend(rest);
    }

    /// True if the pipeline neither takes nor produces data.
    pub fn is_closed(&self) -> bool {
        matches!(self.infer_type(ElementType::Void), Ok(Some(ElementType::Void)))
    }

    /// Splits the pipeline after every sink, yielding pipelines that can run on their own.
    pub fn split_at_void(self) -> Result<Vec<Pipeline>> {
        let mut result = Vec::new();
        let mut current = Vec::new();
        let mut input = ElementType::Void;
        for op in self.operators {
            let output = crate::operator::check_type(op.as_ref(), input)?;
            current.push(op);
            if output == ElementType::Void {
                result.push(Pipeline { operators: std::mem::take(&mut current) });
            }
            input = output;
        }
        if !current.is_empty() {
            result.push(Pipeline { operators: current });
        }
        Ok(result)
    }

    /// The one location all operators agree on.
    ///
    /// Operators that may run anywhere agree with every location. Returns `None` if two operators
    /// need different locations.
    pub fn infer_location(&self) -> Option<Location> {
        let mut result = Location::Anywhere;
        for op in self.operators.iter() {
            match (result, op.location()) {
                (_, Location::Anywhere) => {},
                (Location::Anywhere, location) => result = location,
                (current, location) if current == location => {},
                _ => return None,
            }
        }
        Some(result)
    }

    /// Optimizes the pipeline if it is closed, leaving it unchanged otherwise.
    pub fn optimize_if_closed(self) -> Pipeline {
        if !self.is_closed() {
            return self;
        }
        match self.optimize(&Expression::trivially_true(), EventOrder::Ordered).replacement {
            Some(replacement) => Pipeline::new(vec![replacement]),
            None => Pipeline::default(),
        }
    }
}

impl From<Vec<OperatorPtr>> for Pipeline {
    fn from(operators: Vec<OperatorPtr>) -> Self {
        Pipeline::new(operators)
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.operators.iter().map(|op| op.name())).finish()
    }
}

impl Operator for Pipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput> {
        let mut operators = self.operators.iter();
        let mut output = match operators.next() {
            Some(op) => op.instantiate(input, Rc::clone(&ctrl))?,
            None => match input {
                OperatorInput::Void => return Err(Error::TypeClash("empty pipeline cannot act as a source".into())),
                OperatorInput::Bytes(seq) => return Ok(OperatorOutput::Bytes(seq)),
                OperatorInput::Events(seq) => return Ok(OperatorOutput::Events(seq)),
            },
        };
        for op in operators {
            let next = output.into_input().ok_or_else(|| {
                Error::TypeClash(format!("pipeline ended before all operators were used, next is '{}'", op.name()))
            })?;
            output = op.instantiate(next, Rc::clone(&ctrl))?;
        }
        Ok(output)
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(Pipeline { operators: self.operators.iter().map(|op| op.copy()).collect() })
    }

    fn infer_type(&self, input: ElementType) -> Result<Option<ElementType>> {
        let mut current = input;
        for (index, op) in self.operators.iter().enumerate() {
            if index > 0 && current == ElementType::Void {
                return Err(Error::TypeClash(format!("pipeline continues with '{}' after sink", op.name())));
            }
            current = match op.infer_type(current)? {
                Some(output) => output,
                None if index == 0 => return Ok(None),
                None => {
                    return Err(Error::TypeClash(format!(
                        "operator '{}' does not accept {} produced by '{}'",
                        op.name(),
                        current,
                        self.operators[index - 1].name()
                    )))
                },
            };
        }
        Ok(Some(current))
    }

    /// Folds the filter from the last operator toward the first.
    ///
    /// An operator that cannot take a non-trivial filter gets a `where` inserted behind it, and an
    /// operator without replacement is removed.
    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        let mut current_filter = filter.clone();
        let mut current_order = order;
        let mut reversed: Vec<OperatorPtr> = Vec::with_capacity(self.operators.len());
        for op in self.operators.iter().rev() {
            let result = op.optimize(&current_filter, current_order);
            match result.filter {
                Some(filter) => current_filter = filter,
                None => {
                    if !current_filter.is_trivially_true() {
                        reversed.push(Box::new(Where::new(current_filter)));
                    }
                    current_filter = Expression::trivially_true();
                },
            }
            if let Some(replacement) = result.replacement {
                reversed.push(replacement);
            }
            current_order = result.order;
        }
        reversed.reverse();
        OptimizeResult {
            filter: Some(current_filter),
            order: current_order,
            replacement: Some(Box::new(Pipeline::new(reversed))),
        }
    }

    fn location(&self) -> Location {
        self.infer_location().unwrap_or(Location::Anywhere)
    }

    fn detached(&self) -> bool {
        self.operators.iter().any(|op| op.detached())
    }

    fn as_pipeline(&self) -> Option<&Pipeline> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operators::collect::Collect;
    use crate::operators::emit::Emit;
    use crate::operators::pass::Pass;

    fn ops() -> Vec<OperatorPtr> {
        vec![Box::new(Emit::numbered(3)), Box::new(Pass), Box::new(Collect::new().0)]
    }

    #[test]
    fn nested_pipelines_are_flattened() {
        let inner = Pipeline::new(vec![Box::new(Pass), Box::new(Pass)]);
        let mut pipeline = Pipeline::new(vec![Box::new(Emit::numbered(1)), Box::new(inner)]);
        pipeline.prepend(Box::new(Pipeline::default()));
        let names: Vec<_> = pipeline.operators().iter().map(|op| op.name().to_string()).collect();
        assert_eq!(names, vec!["emit", "pass", "pass"]);
    }

    #[test]
    fn closed_pipelines_infer_void() {
        let pipeline = Pipeline::new(ops());
        assert!(pipeline.is_closed());
        assert_eq!(pipeline.infer_type(ElementType::Events), Ok(None));
        let open = Pipeline::new(vec![Box::new(Pass)]);
        assert!(!open.is_closed());
        assert_eq!(open.infer_type(ElementType::Events), Ok(Some(ElementType::Events)));
    }

    #[test]
    fn operators_after_a_sink_are_rejected() {
        let mut operators = ops();
        operators.push(Box::new(Pass));
        let error = Pipeline::new(operators).infer_type(ElementType::Void).unwrap_err();
        assert_eq!(error, Error::TypeClash("pipeline continues with 'pass' after sink".into()));
    }

    #[test]
    fn splits_after_each_sink() {
        let mut operators = ops();
        operators.extend(ops());
        let parts = Pipeline::new(operators).split_at_void().unwrap();
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(Pipeline::is_closed));
    }

    #[test]
    fn mixed_locations_have_no_common_location() {
        let (collect, _) = Collect::new();
        let pipeline = Pipeline::new(vec![Box::new(Emit::numbered(1)), Box::new(collect)]);
        assert_eq!(pipeline.infer_location(), Some(Location::Local));
        let remote = crate::operators::located::Located::new(Location::Remote, Box::new(Pass));
        let mixed = Pipeline::new(vec![Box::new(Emit::numbered(1)), Box::new(remote), Box::new(Collect::new().0)]);
        assert_eq!(mixed.infer_location(), None);
        assert_eq!(Pipeline::new(vec![Box::new(Pass)]).infer_location(), Some(Location::Anywhere));
    }
}
