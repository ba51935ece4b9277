//! A sink that keeps what it receives, for inspection by the caller.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crate::control::Ctrl;
use crate::element::{Record, Slice};
use crate::error::Result;
use crate::operator::{Location, Operator, OperatorInput, OperatorOutput, OperatorPtr};
use crate::sequence::{LazySeq, Next};

/// The slices received by a [`Collect`] sink, with their arrival times.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    inner: Arc<Mutex<Vec<(Instant, Slice)>>>,
}

impl Collection {
    fn lock(&self) -> MutexGuard<'_, Vec<(Instant, Slice)>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// The slices received so far.
    pub fn slices(&self) -> Vec<Slice> {
        self.lock().iter().map(|(_, slice)| slice.clone()).collect()
    }

    /// The events received so far, in order.
    pub fn records(&self) -> Vec<Record> {
        self.lock().iter().flat_map(|(_, slice)| slice.rows().to_vec()).collect()
    }

    /// The arrival time of each slice received so far.
    pub fn arrivals(&self) -> Vec<Instant> {
        self.lock().iter().map(|(time, _)| *time).collect()
    }

    /// The number of events received so far.
    pub fn len(&self) -> usize {
        self.lock().iter().map(|(_, slice)| slice.len()).sum()
    }

    /// True if no events were received.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stores incoming slices into a [`Collection`].
///
/// The collection lives in the starting process, so `collect` always runs locally.
#[derive(Debug, Clone)]
pub struct Collect {
    collection: Collection,
}

impl Collect {
    /// A sink and the collection it fills.
    pub fn new() -> (Self, Collection) {
        let collection = Collection::default();
        (Collect { collection: collection.clone() }, collection)
    }
}

impl Operator for Collect {
    fn name(&self) -> &str {
        "collect"
    }

    fn instantiate(&self, input: OperatorInput, _ctrl: Ctrl) -> Result<OperatorOutput> {
        let mut input = input.into_events(self.name())?;
        let collection = self.collection.clone();
        Ok(OperatorOutput::Void(LazySeq::from_fn(move || match input.advance() {
            Next::Item(slice) => {
                collection.lock().push((Instant::now(), slice));
                Next::Item(())
            },
            Next::Pending => Next::Pending,
            Next::Done => Next::Done,
            Next::Failed(error) => Next::Failed(error),
        })))
    }

    fn copy(&self) -> OperatorPtr {
        Box::new(self.clone())
    }

    fn location(&self) -> Location {
        Location::Local
    }
}
