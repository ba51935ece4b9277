//! Channels and connections between conduit execution nodes.
//!
//! This crate is the communication layer of the conduit pipeline engine. It is separated out to make
//! clear boundaries in the project: nothing here knows about operators or pipelines.
//!
//! Within a process, execution nodes exchange messages through [`channel::Pusher`] and
//! [`channel::Puller`] pairs. A pusher wakes the thread that owns the puller through a
//! [`buzzer::Buzzer`], so that the receiving worker can park while it has nothing to do.
//!
//! Between processes, the [`networking`] module establishes TCP connections guarded by a handshake,
//! and the [`tcp`] module moves framed, `bincode`-encoded messages across them.
//!
//! Channel endpoints implement the [`Push`] and [`Pull`] traits.
//!
//! # Examples
//! ```
//! use conduit_communication::{Push, Pull};
//! use conduit_communication::buzzer::Buzzer;
//! use conduit_communication::channel;
//!
//! let (mut pusher, mut puller) = channel::buzzing::<String>(Buzzer::default());
//! pusher.send("hello".to_string());
//! pusher.done();
//!
//! assert_eq!(puller.recv(), Some("hello".to_string()));
//! assert_eq!(puller.recv(), None);
//! ```

#![forbid(missing_docs)]

pub mod buzzer;
pub mod channel;
pub mod initialize;
pub mod logging;
pub mod networking;
pub mod tcp;

pub use initialize::{Config, WorkerGuards};

/// The sending end of a channel of `T`.
///
/// Elements travel as `&mut Option<T>`: an implementation takes the element out of the option,
/// and may leave a recycled value behind for the caller. Pushing `None` marks the end of a burst
/// of pushes; implementations that buffer should flush on it.
pub trait Push<T> {
    /// Offers `element` to the channel.
    fn push(&mut self, element: &mut Option<T>);
    /// Pushes an owned element, dropping anything handed back.
    #[inline]
    fn send(&mut self, element: T) {
        self.push(&mut Some(element));
    }
    /// Signals the end of a burst.
    #[inline]
    fn done(&mut self) {
        self.push(&mut None);
    }
}

impl<T, P: ?Sized + Push<T>> Push<T> for Box<P> {
    #[inline]
    fn push(&mut self, element: &mut Option<T>) {
        (**self).push(element)
    }
}

/// The receiving end of a channel of `T`.
pub trait Pull<T> {
    /// Exposes the next element, if one is available right now.
    ///
    /// The caller may take the element or replace it. `None` means nothing is waiting, not that
    /// the channel is closed.
    fn pull(&mut self) -> &mut Option<T>;
    /// Takes the next available element.
    #[inline]
    fn recv(&mut self) -> Option<T> {
        self.pull().take()
    }
}

impl<T, P: ?Sized + Pull<T>> Pull<T> for Box<P> {
    #[inline]
    fn pull(&mut self) -> &mut Option<T> {
        (**self).pull()
    }
}
