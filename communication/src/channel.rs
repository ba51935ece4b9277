//! Intra-process channels that wake their receiving thread.

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::buzzer::Buzzer;
use crate::{Pull, Push};

/// Allocates a channel whose pushes unpark the thread behind `buzzer`.
pub fn buzzing<T>(buzzer: Buzzer) -> (Pusher<T>, Puller<T>) {
    let (send, recv) = crossbeam_channel::unbounded();
    (Pusher::new(send, buzzer), Puller::new(recv))
}

/// The push half of a buzzing channel.
pub struct Pusher<T> {
    target: Sender<T>,
    buzzer: Buzzer,
}

impl<T> Pusher<T> {
    /// Wraps a sender and the buzzer of the receiving thread.
    pub fn new(target: Sender<T>, buzzer: Buzzer) -> Self {
        Pusher { target, buzzer }
    }
}

impl<T> Clone for Pusher<T> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            buzzer: self.buzzer.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Pusher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pusher").field("buzzer", &self.buzzer).finish()
    }
}

impl<T> Push<T> for Pusher<T> {
    #[inline]
    fn push(&mut self, element: &mut Option<T>) {
        if let Some(element) = element.take() {
            // Receivers that hung up are done with their work; dropping the element is correct.
            if self.target.send(element).is_ok() {
                self.buzzer.buzz();
            }
        }
    }
}

/// The pull half of a buzzing channel.
pub struct Puller<T> {
    current: Option<T>,
    source: Receiver<T>,
    disconnected: bool,
}

impl<T> Puller<T> {
    /// Wraps a receiver.
    pub fn new(source: Receiver<T>) -> Self {
        Puller { current: None, source, disconnected: false }
    }
    /// True once every pusher has been dropped and the channel is drained.
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }
}

impl<T> Pull<T> for Puller<T> {
    #[inline]
    fn pull(&mut self) -> &mut Option<T> {
        self.current = match self.source.try_recv() {
            Ok(element) => Some(element),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.disconnected = true;
                None
            }
        };
        &mut self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_wake_parked_receiver() {
        let (mut pusher, mut puller) = buzzing::<usize>(Buzzer::default());
        let sender = std::thread::spawn(move || {
            for index in 0..10 {
                pusher.send(index);
            }
        });
        let mut received = Vec::new();
        while received.len() < 10 {
            match puller.recv() {
                Some(index) => received.push(index),
                None => std::thread::park_timeout(std::time::Duration::from_millis(10)),
            }
        }
        sender.join().unwrap();
        assert_eq!(received, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn puller_notices_hang_up() {
        let (pusher, mut puller) = buzzing::<usize>(Buzzer::default());
        drop(pusher);
        assert!(puller.recv().is_none());
        assert!(puller.is_disconnected());
    }
}
