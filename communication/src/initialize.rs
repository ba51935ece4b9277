//! Communication configuration and thread management.

use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::logging::{CommunicationLogger, CommunicationSetup};

/// Possible configurations for the communication infrastructure.
#[derive(Clone)]
pub struct Config {
    /// Number of worker threads hosting execution nodes in this process.
    pub threads: usize,
    /// Addresses of remote workers, assigned to remote runs round-robin.
    pub workers: Vec<String>,
    /// Reports connection progress on stdout.
    pub report: bool,
    /// Additional connection attempts after the first one fails.
    pub retries: usize,
    /// Pause between connection attempts.
    pub retry_delay: Duration,
    /// Constructs communication loggers for send and receive threads.
    pub log_fn: Arc<dyn Fn(CommunicationSetup) -> Option<CommunicationLogger> + Send + Sync>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threads: 1,
            workers: Vec::new(),
            report: false,
            retries: 3,
            retry_delay: Duration::from_millis(100),
            log_fn: Arc::new(|_| None),
        }
    }
}

impl Debug for Config {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("threads", &self.threads)
            .field("workers", &self.workers)
            .field("report", &self.report)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Installs options into a [`getopts::Options`] struct that corresponds
    /// to the parameters in the configuration.
    ///
    /// It is the caller's responsibility to ensure that the installed options
    /// do not conflict with any other options that may exist in `opts`, or
    /// that may be installed into `opts` in the future.
    ///
    /// This method is only available if the `getopts` feature is enabled, which
    /// it is by default.
    #[cfg(feature = "getopts")]
    pub fn install_options(opts: &mut getopts::Options) {
        opts.optopt("w", "threads", "number of worker threads hosting execution nodes", "NUM");
        opts.optmulti("r", "remote", "address of a remote worker (repeatable)", "ADDR");
        opts.optopt("", "retries", "connection attempts after a failure", "NUM");
        opts.optopt("", "retry-delay-ms", "milliseconds between connection attempts", "MS");
        opts.optflag("", "report", "reports connection progress");
    }

    /// Instantiates a configuration based upon the parsed options in `matches`.
    ///
    /// The `matches` object must have been constructed from a
    /// [`getopts::Options`] which contained at least the options installed by
    /// [`Self::install_options`].
    ///
    /// This method is only available if the `getopts` feature is enabled, which
    /// it is by default.
    #[cfg(feature = "getopts")]
    pub fn from_matches(matches: &getopts::Matches) -> Result<Config, String> {
        let defaults = Config::default();
        let threads = matches.opt_get_default("w", defaults.threads).map_err(|e| e.to_string())?;
        let retries = matches.opt_get_default("retries", defaults.retries).map_err(|e| e.to_string())?;
        let retry_delay = matches
            .opt_get::<u64>("retry-delay-ms")
            .map_err(|e| e.to_string())?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay);
        if threads == 0 {
            return Err("the number of worker threads must be positive".to_string());
        }
        Ok(Config {
            threads,
            workers: matches.opt_strs("r"),
            report: matches.opt_present("report"),
            retries,
            retry_delay,
            log_fn: defaults.log_fn,
        })
    }

    /// Constructs a new configuration by parsing the supplied text arguments.
    ///
    /// Most commonly, callers supply `std::env::args()` as the iterator.
    ///
    /// This method is only available if the `getopts` feature is enabled, which
    /// it is by default.
    #[cfg(feature = "getopts")]
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Config, String> {
        let mut opts = getopts::Options::new();
        Config::install_options(&mut opts);
        let matches = opts.parse(args).map_err(|e| e.to_string())?;
        Config::from_matches(&matches)
    }
}

/// Spawns one named thread per name, each running `func` with its index.
pub fn spawn<T, F>(names: Vec<String>, func: F) -> Result<WorkerGuards<T>, String>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let logic = Arc::new(func);
    let mut guards = Vec::with_capacity(names.len());
    for (index, name) in names.into_iter().enumerate() {
        let clone = Arc::clone(&logic);
        guards.push(thread::Builder::new()
                        .name(name)
                        .spawn(move || (*clone)(index))
                        .map_err(|e| format!("{:?}", e))?);
    }
    Ok(WorkerGuards { guards })
}

/// Maintains `JoinHandle`s for worker threads.
pub struct WorkerGuards<T: Send + 'static> {
    guards: Vec<::std::thread::JoinHandle<T>>,
}

impl<T: Send + 'static> WorkerGuards<T> {
    /// Handles of the guarded threads, for example to build buzzers.
    pub fn threads(&self) -> Vec<thread::Thread> {
        self.guards.iter().map(|guard| guard.thread().clone()).collect()
    }

    /// Waits on the worker threads and returns the results they produce.
    pub fn join(mut self) -> Vec<Result<T, String>> {
        self.guards
            .drain(..)
            .map(|guard| guard.join().map_err(|e| panic_message(&*e)))
            .collect()
    }
}

impl<T: Send + 'static> Drop for WorkerGuards<T> {
    fn drop(&mut self) {
        for guard in self.guards.drain(..) {
            // Panics were already reported by the panicking thread.
            let _ = guard.join();
        }
    }
}

/// Extracts the message of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_return_results_in_order() {
        let names = (0..3).map(|index| format!("test worker {}", index)).collect();
        let guards = spawn(names, |index| index * 10).unwrap();
        let results = guards.join();
        assert_eq!(results, vec![Ok(0), Ok(10), Ok(20)]);
    }

    #[test]
    fn panics_surface_as_errors() {
        let guards = spawn(vec!["panicking worker".to_string()], |_| -> usize { panic!("boom") }).unwrap();
        assert_eq!(guards.join(), vec![Err("boom".to_string())]);
    }

    #[cfg(feature = "getopts")]
    #[test]
    fn options_parse_remote_workers() {
        let args = ["-w", "3", "-r", "10.0.0.1:4000", "--remote", "10.0.0.2:4000", "--retries", "0"];
        let config = Config::from_args(args.iter().map(|x| x.to_string())).unwrap();
        assert_eq!(config.threads, 3);
        assert_eq!(config.workers, vec!["10.0.0.1:4000".to_string(), "10.0.0.2:4000".to_string()]);
        assert_eq!(config.retries, 0);
        assert!(!config.report);
    }

    #[cfg(feature = "getopts")]
    #[test]
    fn zero_threads_are_rejected() {
        let args = ["--threads", "0"];
        assert!(Config::from_args(args.iter().map(|x| x.to_string())).is_err());
    }
}
