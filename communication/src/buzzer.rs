//! A type that can unpark specific threads.

use std::thread::Thread;

/// Can unpark a specific thread.
#[derive(Clone, Debug)]
pub struct Buzzer {
    thread: Thread,
}

impl Default for Buzzer {
    fn default() -> Self {
        Self { thread: std::thread::current() }
    }
}

impl Buzzer {
    /// Creates a buzzer for a thread other than the current one.
    pub fn new(thread: Thread) -> Self {
        Self { thread }
    }
    /// Unparks the target thread.
    pub fn buzz(&self) {
        self.thread.unpark()
    }
}
