//! Lazy sequences: the interface between pipeline stages.
//!
//! A [`LazySeq`] is a suspended computation that yields values one [`advance`](LazySeq::advance)
//! at a time. It has a single owner, is driven on a single thread, and releases its resources
//! synchronously when it completes, fails, or is dropped.
//!
//! Computations implement [`Generator`], which is an explicit resumable state machine: each call to
//! `advance` runs until the next value, a [`Next::Pending`] marker, or the end of the sequence.
//!
//! # Examples
//!
//! ```
//! use conduit::sequence::{LazySeq, Next};
//!
//! let mut seq = LazySeq::from_iter(vec![1, 2]).map(|x| x * 10);
//! assert_eq!(seq.advance(), Next::Item(10));
//! assert_eq!(seq.advance(), Next::Item(20));
//! assert_eq!(seq.advance(), Next::Done);
//! assert_eq!(seq.advance(), Next::Done);
//! ```

use crate::error::{Error, Result};

/// The outcome of advancing a lazy sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Next<T> {
    /// The next value of the sequence.
    Item(T),
    /// No value is available yet, but the sequence has not ended.
    Pending,
    /// The sequence completed.
    Done,
    /// The sequence failed, and will produce nothing more.
    Failed(Error),
}

impl<T> Next<T> {
    /// Applies `logic` to a produced value.
    pub fn map<S, F: FnOnce(T) -> S>(self, logic: F) -> Next<S> {
        match self {
            Next::Item(item) => Next::Item(logic(item)),
            Next::Pending => Next::Pending,
            Next::Done => Next::Done,
            Next::Failed(error) => Next::Failed(error),
        }
    }
}

/// A resumable computation producing values of type `Item`.
pub trait Generator {
    /// The type of produced values.
    type Item;
    /// Runs the computation until it yields, completes, or fails.
    fn advance(&mut self) -> Next<Self::Item>;
    /// Serializes the state needed to resume the computation, if it has any.
    ///
    /// Called only between calls to `advance`.
    fn save(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// A single-owner, cooperatively suspended sequence of values.
pub struct LazySeq<T> {
    /// `None` once the sequence has ended; dropping the generator releases its resources.
    generator: Option<Box<dyn Generator<Item = T>>>,
}

impl<T: 'static> LazySeq<T> {
    /// Wraps a generator.
    pub fn new<G: Generator<Item = T> + 'static>(generator: G) -> Self {
        LazySeq { generator: Some(Box::new(generator)) }
    }

    /// A sequence driven by a closure.
    pub fn from_fn<F: FnMut() -> Next<T> + 'static>(logic: F) -> Self {
        Self::new(FromFn { logic })
    }

    /// A sequence yielding the values of an iterator, then completing.
    pub fn from_iter<I>(iter: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        let mut iter = iter.into_iter();
        Self::from_fn(move || match iter.next() {
            Some(item) => Next::Item(item),
            None => Next::Done,
        })
    }

    /// A sequence that completes immediately.
    pub fn empty() -> Self {
        Self::from_fn(|| Next::Done)
    }

    /// A sequence that fails on its first advance.
    pub fn failed(error: Error) -> Self {
        let mut error = Some(error);
        Self::from_fn(move || match error.take() {
            Some(error) => Next::Failed(error),
            None => Next::Done,
        })
    }

    /// Applies `logic` to every produced value.
    pub fn map<S: 'static, F: FnMut(T) -> S + 'static>(self, logic: F) -> LazySeq<S> {
        LazySeq::new(Map { inner: self, logic })
    }

    /// Runs `cleanup` when the sequence ends or is dropped, whichever happens first.
    pub fn on_drop<F: FnOnce() + 'static>(self, cleanup: F) -> Self {
        Self::new(OnDrop { inner: self, cleanup: Some(cleanup) })
    }
}

impl<T> LazySeq<T> {
    /// Resumes the computation until it yields, completes, or fails.
    ///
    /// After returning `Done` or `Failed` once, the sequence keeps returning `Done`.
    pub fn advance(&mut self) -> Next<T> {
        let next = match self.generator.as_mut() {
            Some(generator) => generator.advance(),
            None => return Next::Done,
        };
        if matches!(next, Next::Done | Next::Failed(_)) {
            self.generator = None;
        }
        next
    }

    /// Serializes the state of the underlying generator.
    pub fn save(&mut self) -> Result<Option<Vec<u8>>> {
        match self.generator.as_mut() {
            Some(generator) => generator.save(),
            None => Ok(None),
        }
    }

    /// True once the sequence has completed or failed.
    pub fn is_finished(&self) -> bool {
        self.generator.is_none()
    }
}

impl<T> Generator for LazySeq<T> {
    type Item = T;
    fn advance(&mut self) -> Next<T> {
        LazySeq::advance(self)
    }
    fn save(&mut self) -> Result<Option<Vec<u8>>> {
        LazySeq::save(self)
    }
}

impl<T> std::fmt::Debug for LazySeq<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazySeq").field("finished", &self.is_finished()).finish()
    }
}

struct FromFn<F> {
    logic: F,
}

impl<T, F: FnMut() -> Next<T>> Generator for FromFn<F> {
    type Item = T;
    fn advance(&mut self) -> Next<T> {
        (self.logic)()
    }
}

struct Map<T, F> {
    inner: LazySeq<T>,
    logic: F,
}

impl<T, S, F: FnMut(T) -> S> Generator for Map<T, F> {
    type Item = S;
    fn advance(&mut self) -> Next<S> {
        let logic = &mut self.logic;
        self.inner.advance().map(logic)
    }
    fn save(&mut self) -> Result<Option<Vec<u8>>> {
        self.inner.save()
    }
}

struct OnDrop<T, F: FnOnce()> {
    inner: LazySeq<T>,
    cleanup: Option<F>,
}

impl<T, F: FnOnce()> Generator for OnDrop<T, F> {
    type Item = T;
    fn advance(&mut self) -> Next<T> {
        self.inner.advance()
    }
    fn save(&mut self) -> Result<Option<Vec<u8>>> {
        self.inner.save()
    }
}

impl<T, F: FnOnce()> Drop for OnDrop<T, F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn pending_is_not_the_end() {
        let mut polls = 0;
        let mut seq = LazySeq::from_fn(move || {
            polls += 1;
            match polls {
                1 => Next::Pending,
                2 => Next::Item("ready"),
                _ => Next::Done,
            }
        });
        assert_eq!(seq.advance(), Next::Pending);
        assert!(!seq.is_finished());
        assert_eq!(seq.advance(), Next::Item("ready"));
        assert_eq!(seq.advance(), Next::Done);
        assert!(seq.is_finished());
    }

    #[test]
    fn failure_fuses_the_sequence() {
        let mut seq = LazySeq::<u8>::failed(Error::Data("bad row".into()));
        assert_eq!(seq.advance(), Next::Failed(Error::Data("bad row".into())));
        assert_eq!(seq.advance(), Next::Done);
    }

    #[test]
    fn cleanup_runs_on_early_drop() {
        let cleaned = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cleaned);
        let mut seq = LazySeq::from_iter(0..10).on_drop(move || flag.set(true));
        assert_eq!(seq.advance(), Next::Item(0));
        assert!(!cleaned.get());
        drop(seq);
        assert!(cleaned.get());
    }

    #[test]
    fn cleanup_runs_when_sequence_completes() {
        let cleaned = Rc::new(Cell::new(false));
        let flag = Rc::clone(&cleaned);
        let mut seq = LazySeq::from_iter(Some(1)).on_drop(move || flag.set(true));
        assert_eq!(seq.advance(), Next::Item(1));
        assert_eq!(seq.advance(), Next::Done);
        // The sequence still exists, but its generator is gone.
        assert!(cleaned.get());
    }

    struct Counter {
        next: u64,
        limit: u64,
    }

    impl Generator for Counter {
        type Item = u64;
        fn advance(&mut self) -> Next<u64> {
            if self.next == self.limit {
                return Next::Done;
            }
            self.next += 1;
            Next::Item(self.next - 1)
        }
        fn save(&mut self) -> Result<Option<Vec<u8>>> {
            Ok(Some(bincode::serialize(&self.next)?))
        }
    }

    #[test]
    fn save_reaches_through_adapters() {
        let mut seq = LazySeq::new(Counter { next: 0, limit: 3 }).map(|x| x * 2);
        assert_eq!(seq.advance(), Next::Item(0));
        assert_eq!(seq.advance(), Next::Item(2));
        let state = seq.save().unwrap().unwrap();
        assert_eq!(bincode::deserialize::<u64>(&state).unwrap(), 2);
    }
}
