//! The operator registry: named plugins that build operators from text or definitions.
//!
//! A [`Registry`] is constructed at startup and handed to whoever needs to create operators by
//! name, such as the pipeline parser and the remote worker server.
//!
//! # Examples
//!
//! ```
//! use conduit::registry::Registry;
//!
//! let registry = Registry::builtins();
//! let pipeline = registry.parse("emit 3 | where index > 0 | discard").unwrap();
//! assert_eq!(pipeline.len(), 3);
//! assert!(pipeline.is_closed());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::operator::{Definition, OperatorPtr};
use crate::pipeline::Pipeline;

/// Creates operators of one name.
pub trait OperatorPlugin: Send + Sync {
    /// The name operators are written with.
    fn name(&self) -> &str;
    /// Builds an operator from its arguments as written in pipeline text.
    fn parse(&self, args: &[String], registry: &Registry) -> Result<OperatorPtr>;
    /// Rebuilds an operator from the arguments of its [`Definition`].
    fn restore(&self, args: &[u8], registry: &Registry) -> Result<OperatorPtr>;
}

/// A set of operator plugins, by name.
#[derive(Clone, Default)]
pub struct Registry {
    plugins: HashMap<String, Arc<dyn OperatorPlugin>>,
}

impl Registry {
    /// A registry without plugins.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in operators.
    pub fn builtins() -> Self {
        let mut registry = Self::new();
        for plugin in crate::operators::builtins() {
            registry.insert(plugin);
        }
        registry
    }

    /// Adds a plugin, returning any plugin previously registered under the same name.
    pub fn insert(&mut self, plugin: Arc<dyn OperatorPlugin>) -> Option<Arc<dyn OperatorPlugin>> {
        self.plugins.insert(plugin.name().to_string(), plugin)
    }

    /// Looks up the plugin registered as `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn OperatorPlugin>> {
        self.plugins.get(name)
    }

    /// The registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.plugins.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Parses pipeline text: operators separated by `|`, each a name followed by arguments.
    pub fn parse(&self, text: &str) -> Result<Pipeline> {
        self.parse_tokens(&tokenize(text)?)
    }

    /// Parses a tokenized pipeline.
    pub fn parse_tokens(&self, tokens: &[String]) -> Result<Pipeline> {
        let mut operators = Vec::new();
        let mut depth = 0usize;
        let mut start = 0;
        for (index, token) in tokens.iter().enumerate() {
            match token.as_str() {
                "{" => depth += 1,
                "}" => depth = depth.saturating_sub(1),
                "|" if depth == 0 => {
                    operators.push(self.parse_operator(&tokens[start..index])?);
                    start = index + 1;
                },
                _ => {},
            }
        }
        if !tokens.is_empty() {
            operators.push(self.parse_operator(&tokens[start..])?);
        }
        Ok(Pipeline::new(operators))
    }

    /// Parses one operator, or a pipeline in braces.
    pub fn parse_operator(&self, tokens: &[String]) -> Result<OperatorPtr> {
        match tokens {
            [] => Err(Error::Configuration("expected an operator".to_string())),
            [open, inner @ .., close] if open == "{" && close == "}" => {
                Ok(Box::new(self.parse_tokens(inner)?))
            },
            [name, args @ ..] => {
                let plugin = self
                    .get(name)
                    .ok_or_else(|| Error::Configuration(format!("unknown operator '{}'", name)))?;
                plugin.parse(args, self)
            },
        }
    }

    /// Rebuilds a serialized operator.
    pub fn resolve(&self, definition: &Definition) -> Result<OperatorPtr> {
        let plugin = self
            .get(&definition.name)
            .ok_or_else(|| Error::Configuration(format!("unknown operator '{}'", definition.name)))?;
        plugin.restore(&definition.args, self)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry").field("plugins", &self.names()).finish()
    }
}

/// Splits pipeline text into words; `|`, `{` and `}` are words of their own.
///
/// Double-quoted words keep their quotes and may contain any of the above.
pub fn tokenize(text: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            },
            _ if quoted => current.push(c),
            '|' | '{' | '}' => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(c.to_string());
            },
            c if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            },
            _ => current.push(c),
        }
    }
    if quoted {
        return Err(Error::Configuration("unterminated string".to_string()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Location;

    #[test]
    fn tokens_respect_quotes_and_braces() {
        let tokens = tokenize(r#"every 1s {emit 2|pass} | where name == "a | b""#).unwrap();
        let expected = ["every", "1s", "{", "emit", "2", "|", "pass", "}", "|", "where", "name", "==", "\"a | b\""];
        assert_eq!(tokens, expected);
        assert!(tokenize("where x == \"open").is_err());
    }

    #[test]
    fn braces_group_nested_pipelines() {
        let registry = Registry::builtins();
        let pipeline = registry.parse("local { emit 2 | pass } | discard").unwrap();
        let names: Vec<_> = pipeline.operators().iter().map(|op| op.name().to_string()).collect();
        assert_eq!(names, vec!["local", "discard"]);
    }

    #[test]
    fn unknown_operators_are_configuration_errors() {
        let registry = Registry::builtins();
        let error = registry.parse("emit 1 | frobnicate").err().unwrap();
        assert_eq!(error, Error::Configuration("unknown operator 'frobnicate'".into()));
    }

    #[test]
    fn definitions_resolve_to_equivalent_operators() {
        let registry = Registry::builtins();
        let pipeline = registry.parse("remote where index > 1").unwrap();
        let op = &pipeline.operators()[0];
        assert_eq!(op.location(), Location::Remote);
        let restored = registry.resolve(&op.definition().unwrap()).unwrap();
        assert_eq!(restored.location(), Location::Remote);
        assert_eq!(restored.definition().unwrap(), op.definition().unwrap());
    }
}
