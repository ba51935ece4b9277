//! Conduit is an engine for streaming pipelines of operators.
//!
//! The code is organized in crates and modules that are meant to depend as little as possible on each other.
//!
//! **Communication**: The [`conduit_communication`] crate defines the channels execution nodes use
//! within a process, and the framed TCP connections between processes.
//!
//! **Logging**: The [`conduit_logging`] crate provides the typed, buffered loggers each worker
//! thread owns.
//!
//! **Sequences and operators**: The [`sequence`] module defines lazy sequences, the values that flow
//! between the stages of a pipeline. An [`operator::Operator`] turns an input sequence into an
//! output sequence, and a [`pipeline::Pipeline`] chains operators, type-checks their composition,
//! and optimizes it.
//!
//! **Execution**: The [`execute`] module starts pipelines. Each operator runs inside an execution
//! node, on a pool of worker threads or on a remote worker; nodes exchange data against credit, and
//! take consistent [`checkpoint`]s on request.
//!
//! # Examples
//!
//! The following runs a pipeline of three events, paced to the times they carry.
//!
//! ```
//! use conduit::execute::{execute, Config};
//! use conduit::registry::Registry;
//!
//! let registry = Registry::builtins();
//! let pipeline = registry.parse("emit --time-step 10ms 3 | delay time | discard").unwrap();
//! let execution = execute(pipeline, Config::default()).unwrap();
//! let metrics = execution.join().unwrap();
//! assert_eq!(metrics.len(), 3);
//! ```

#![forbid(missing_docs)]

pub mod checkpoint;
pub mod control;
pub mod diagnostic;
pub mod element;
pub mod error;
pub mod execute;
pub mod execution;
pub mod expression;
pub mod logging;
pub mod operator;
pub mod operators;
pub mod order;
pub mod pipeline;
pub mod registry;
pub mod sequence;

pub use execute::{execute, execute_directly, execute_from_args, Config};
pub use error::{Error, Result};
pub use execution::{Execution, Server};
pub use pipeline::Pipeline;
pub use registry::Registry;

pub use conduit_communication::Config as CommunicationConfig;
