//! Typed, buffered event logging.
//!
//! Each worker thread owns a [`Registry`] of named loggers. A [`Logger`] buffers `(Duration, E, T)`
//! triples, where the duration is the time since the registry was created, `E` identifies the
//! logging worker, and `T` is the logged event. Full buffers, explicit flushes, and dropping the last
//! handle to a logger hand the buffered events to the action installed with the logger.
//!
//! # Examples
//!
//! ```
//! use std::time::Instant;
//! use std::rc::Rc;
//! use std::cell::RefCell;
//! use conduit_logging::Registry;
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let seen2 = Rc::clone(&seen);
//!
//! let mut registry = Registry::new(Instant::now(), 0usize);
//! registry.insert::<String, _>("text", move |_time, data| {
//!     seen2.borrow_mut().extend(data.drain(..).map(|(_, _, text)| text));
//! });
//!
//! let logger = registry.get::<String>("text").unwrap();
//! logger.log("hello".to_string());
//! logger.flush();
//!
//! assert_eq!(&seen.borrow()[..], &["hello".to_string()]);
//! ```

#![forbid(missing_docs)]

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// A map from names to typed loggers.
pub struct Registry<E> {
    /// A worker-specific identifier.
    id: E,
    /// A map from names to typed loggers.
    map: HashMap<String, (Box<dyn Any>, Box<dyn Flush>)>,
    /// An instant common to all logging statements.
    time: Instant,
}

impl<E: Clone + 'static> Registry<E> {
    /// Binds a log name to an action on log event batches.
    ///
    /// This method also returns any pre-installed action, rather than overwriting it
    /// and pivoting the logging destination mid-stream. New loggers with this name will
    /// use the new destination, and existing loggers will use the old destination.
    ///
    /// The action should respond to a sequence of events with non-decreasing timestamps
    /// (Durations) and well as a timestamp that lower bounds the next event that could be
    /// seen (likely greater or equal to the timestamp of the last event). The end of a
    /// logging stream is indicated only by dropping the associated action, which can be
    /// accomplished with `remove` (or a call to insert, though this is not recommended).
    pub fn insert<T: 'static, F: FnMut(&Duration, &mut Vec<(Duration, E, T)>) + 'static>(
        &mut self,
        name: &str,
        action: F,
    ) -> Option<Box<dyn Any>> {
        let logger = Logger::<T, E>::new(self.time, Duration::default(), self.id.clone(), action);
        self.insert_logger(name, logger)
    }

    /// Binds a log name to a logger.
    pub fn insert_logger<T: 'static>(&mut self, name: &str, logger: Logger<T, E>) -> Option<Box<dyn Any>> {
        self.map
            .insert(name.to_owned(), (Box::new(logger.clone()), Box::new(logger)))
            .map(|x| x.0)
    }

    /// Removes a bound logger.
    ///
    /// This is intended primarily to close a logging stream and let the associated writer
    /// communicate that the stream is closed to any consumers. If a binding is not removed,
    /// then the stream cannot be complete as in principle anyone could acquire a handle to
    /// the logger and start further logging.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.map.remove(name).map(|x| x.0)
    }

    /// Retrieves a shared logger, if one has been inserted.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T, E>> {
        self.map
            .get(name)
            .and_then(|entry| entry.0.downcast_ref::<Logger<T, E>>())
            .map(|x| (*x).clone())
    }

    /// Creates a new logger registry.
    pub fn new(time: Instant, id: E) -> Self {
        Registry {
            id,
            time,
            map: HashMap::new(),
        }
    }

    /// Flushes all registered logs.
    pub fn flush(&mut self) {
        for value in self.map.values_mut() {
            value.1.flush();
        }
    }
}

impl<E> Drop for Registry<E> {
    fn drop(&mut self) {
        for value in self.map.values_mut() {
            value.1.flush();
        }
    }
}

/// A buffering logger.
pub struct Logger<T, E> {
    inner: Rc<RefCell<LoggerInner<T, E, dyn FnMut(&Duration, &mut Vec<(Duration, E, T)>)>>>,
}

impl<T, E: Clone> Clone for Logger<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, E> std::fmt::Debug for Logger<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Logger")
            .field("buffered", &inner.buffer.len())
            .finish()
    }
}

struct LoggerInner<T, E, A: ?Sized + FnMut(&Duration, &mut Vec<(Duration, E, T)>)> {
    id: E,
    /// common instant used for all loggers.
    time: Instant,
    /// offset to allow re-calibration.
    offset: Duration,
    /// buffer for logging events.
    buffer: Vec<(Duration, E, T)>,
    /// action to take on full log buffers.
    action: A,
}

impl<T, E: Clone> Logger<T, E> {
    /// Allocates a new shareable logger bound to a write destination.
    pub fn new<F>(time: Instant, offset: Duration, id: E, action: F) -> Self
    where
        F: FnMut(&Duration, &mut Vec<(Duration, E, T)>) + 'static,
        T: 'static,
        E: 'static,
    {
        let inner = LoggerInner {
            id,
            time,
            offset,
            action,
            buffer: Vec::with_capacity(LoggerInner::<T, E, F>::buffer_capacity()),
        };
        let inner = Rc::new(RefCell::new(inner));
        Logger { inner }
    }

    /// Logs an event.
    ///
    /// The event has its timestamp recorded at the moment of logging, but it may be delayed
    /// due to buffering. It will be written when the logger is next flushed, either due to
    /// the buffer reaching capacity or a direct call to flush.
    pub fn log<S: Into<T>>(&self, event: S) {
        self.log_many(Some(event));
    }

    /// Logs multiple events.
    ///
    /// All events receive the same timestamp.
    pub fn log_many<I>(&self, events: I)
    where
        I: IntoIterator,
        I::Item: Into<T>,
    {
        self.inner.borrow_mut().log_many(events)
    }

    /// Flushes logged messages and communicates the new minimal timestamp.
    pub fn flush(&self) {
        <Self as Flush>::flush(self);
    }
}

impl<T, E: Clone, A: ?Sized + FnMut(&Duration, &mut Vec<(Duration, E, T)>)> LoggerInner<T, E, A> {
    /// The upper limit for buffers to allocate, size in bytes. [Self::buffer_capacity] converts
    /// this to size in elements.
    const BUFFER_SIZE_BYTES: usize = 1 << 13;

    /// The maximum buffer capacity in elements. Returns a number between [Self::BUFFER_SIZE_BYTES]
    /// and 1, inclusively.
    const fn buffer_capacity() -> usize {
        let size = std::mem::size_of::<(Duration, E, T)>();
        if size == 0 {
            Self::BUFFER_SIZE_BYTES
        } else if size <= Self::BUFFER_SIZE_BYTES {
            Self::BUFFER_SIZE_BYTES / size
        } else {
            1
        }
    }

    fn log_many<I>(&mut self, events: I)
    where
        I: IntoIterator,
        I::Item: Into<T>,
    {
        let elapsed = self.time.elapsed() + self.offset;
        for event in events {
            self.buffer.push((elapsed, self.id.clone(), event.into()));
            if self.buffer.len() == self.buffer.capacity() {
                // Would call `self.flush()`, but for `RefCell` panic.
                (self.action)(&elapsed, &mut self.buffer);
                // The action may have swapped the allocation.
                if self.buffer.capacity() < Self::buffer_capacity() {
                    self.buffer.reserve(Self::buffer_capacity() - self.buffer.len());
                }
                self.buffer.clear();
            }
        }
    }

    fn flush(&mut self) {
        let elapsed = self.time.elapsed() + self.offset;
        if !self.buffer.is_empty() {
            (self.action)(&elapsed, &mut self.buffer);
            self.buffer.clear();
        }
    }
}

/// Flush on the *last* drop of a logger.
impl<T, E, A: ?Sized + FnMut(&Duration, &mut Vec<(Duration, E, T)>)> Drop for LoggerInner<T, E, A> {
    fn drop(&mut self) {
        // Avoid sending out empty buffers just because of drops.
        if !self.buffer.is_empty() {
            let elapsed = self.time.elapsed() + self.offset;
            (self.action)(&elapsed, &mut self.buffer);
            self.buffer.clear();
        }
    }
}

/// Types that can be flushed.
trait Flush {
    /// Flushes buffered data.
    fn flush(&self);
}

impl<T, E: Clone> Flush for Logger<T, E> {
    fn flush(&self) {
        self.inner.borrow_mut().flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_worker_identifier() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = Rc::clone(&seen);
        let mut registry = Registry::new(Instant::now(), 7usize);
        registry.insert::<u32, _>("numbers", move |_time, data| {
            seen2.borrow_mut().extend(data.drain(..).map(|(_, id, x)| (id, x)));
        });
        let logger = registry.get::<u32>("numbers").unwrap();
        logger.log_many(vec![1u32, 2, 3]);
        registry.flush();
        assert_eq!(&seen.borrow()[..], &[(7, 1), (7, 2), (7, 3)]);
    }

    #[test]
    fn typed_lookup_rejects_other_types() {
        let mut registry = Registry::new(Instant::now(), 0usize);
        registry.insert::<u32, _>("numbers", |_time, _data| {});
        assert!(registry.get::<String>("numbers").is_none());
        assert!(registry.get::<u32>("numbers").is_some());
        assert!(registry.remove("numbers").is_some());
        assert!(registry.get::<u32>("numbers").is_none());
    }

    #[test]
    fn dropping_last_handle_flushes() {
        let seen = Rc::new(RefCell::new(0));
        let seen2 = Rc::clone(&seen);
        let logger = Logger::<u8, ()>::new(Instant::now(), Duration::default(), (), move |_time, data| {
            *seen2.borrow_mut() += data.len();
        });
        logger.log(1u8);
        logger.log(2u8);
        drop(logger);
        assert_eq!(*seen.borrow(), 2);
    }
}
