//! Built-in operators.
//!
//! Besides the combinators [`delay`] and [`every`], the built-ins are deliberately simple: they
//! exist to feed, route, and observe data while exercising the engine.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::registry::OperatorPlugin;

pub mod collect;
pub mod delay;
pub mod discard;
pub mod emit;
pub mod every;
pub mod filter;
pub mod located;
pub mod pass;

pub use collect::{Collect, Collection};
pub use delay::Delay;
pub use discard::Discard;
pub use emit::Emit;
#[doc(hidden)]
pub use emit::Gate;
pub use every::{every, Every};
pub use filter::Where;
pub use located::Located;
pub use pass::Pass;

/// The plugins of all built-in operators that can be written as text.
pub fn builtins() -> Vec<Arc<dyn OperatorPlugin>> {
    vec![
        Arc::new(emit::EmitPlugin),
        Arc::new(pass::PassPlugin),
        Arc::new(filter::WherePlugin),
        Arc::new(discard::DiscardPlugin),
        Arc::new(delay::DelayPlugin),
        Arc::new(every::EveryPlugin),
        Arc::new(located::LocatedPlugin::local()),
        Arc::new(located::LocatedPlugin::remote()),
    ]
}

/// Parses a duration such as `250ms`, `2s`, `1.5m`, or `1h`.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let split = text.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| Error::Configuration(format!("invalid duration '{}'", text)))?;
    let seconds = match unit {
        "ns" => value / 1e9,
        "us" => value / 1e6,
        "ms" => value / 1e3,
        "s" | "" => value,
        "m" | "min" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(Error::Configuration(format!("unknown duration unit '{}'", unit))),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| Error::Configuration(format!("invalid duration '{}': {}", text, e)))
}

/// Parses operator arguments against `opts`.
pub(crate) fn parse_options(name: &str, opts: &getopts::Options, args: &[String]) -> Result<getopts::Matches> {
    opts.parse(args)
        .map_err(|e| Error::Configuration(format!("{}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_carry_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5m").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("5 parsecs").is_err());
    }
}
