//! The `local` and `remote` modifiers, which pin an operator to a location.

use crate::control::Ctrl;
use crate::element::ElementType;
use crate::error::{Error, Result};
use crate::expression::Expression;
use crate::operator::{Definition, DemandSettings, Location, Operator, OperatorInput, OperatorOutput, OperatorPtr, Strictness};
use crate::order::{EventOrder, OptimizeResult};
use crate::registry::{OperatorPlugin, Registry};

/// Runs an operator at a fixed location.
pub struct Located {
    location: Location,
    inner: OperatorPtr,
}

impl Located {
    /// Pins `inner` to `location`.
    pub fn new(location: Location, inner: OperatorPtr) -> Self {
        Located { location, inner }
    }

    /// The pinned operator.
    pub fn inner(&self) -> &dyn Operator {
        self.inner.as_ref()
    }
}

fn keyword(location: Location) -> &'static str {
    match location {
        Location::Local => "local",
        Location::Remote => "remote",
        Location::Anywhere => "anywhere",
    }
}

impl Operator for Located {
    fn name(&self) -> &str {
        keyword(self.location)
    }

    fn instantiate(&self, input: OperatorInput, ctrl: Ctrl) -> Result<OperatorOutput> {
        self.inner.instantiate(input, ctrl)
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(Located::new(self.location, self.inner.copy()))
    }

    fn infer_type(&self, input: ElementType) -> Result<Option<ElementType>> {
        self.inner.infer_type(input)
    }

    fn optimize(&self, filter: &Expression, order: EventOrder) -> OptimizeResult {
        let mut result = self.inner.optimize(filter, order);
        let location = self.location;
        result.replacement = result.replacement.map(|inner| Box::new(Located::new(location, inner)) as OperatorPtr);
        result
    }

    fn location(&self) -> Location {
        self.location
    }

    fn detached(&self) -> bool {
        self.inner.detached()
    }

    fn strictness(&self) -> Strictness {
        self.inner.strictness()
    }

    fn demand(&self) -> DemandSettings {
        self.inner.demand()
    }

    fn definition(&self) -> Result<Definition> {
        Definition::new(self.name(), &self.inner.definition()?)
    }
}

/// Parses `local OPERATOR` or `remote OPERATOR`.
pub struct LocatedPlugin {
    location: Location,
}

impl LocatedPlugin {
    /// The `local` modifier.
    pub fn local() -> Self {
        LocatedPlugin { location: Location::Local }
    }

    /// The `remote` modifier.
    pub fn remote() -> Self {
        LocatedPlugin { location: Location::Remote }
    }
}

impl OperatorPlugin for LocatedPlugin {
    fn name(&self) -> &str {
        keyword(self.location)
    }

    fn parse(&self, args: &[String], registry: &Registry) -> Result<OperatorPtr> {
        if args.is_empty() {
            return Err(Error::Configuration(format!("{}: expected an operator", self.name())));
        }
        Ok(Box::new(Located::new(self.location, registry.parse_operator(args)?)))
    }

    fn restore(&self, args: &[u8], registry: &Registry) -> Result<OperatorPtr> {
        let definition: Definition = bincode::deserialize(args)?;
        Ok(Box::new(Located::new(self.location, registry.resolve(&definition)?)))
    }
}
