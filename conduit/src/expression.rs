//! Predicates over events, as pushed through pipelines by the optimizer.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::element::{Record, Value};
use crate::error::{Error, Result};

/// A comparison between a field and a literal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<`
    Less,
    /// `<=`
    LessEqual,
    /// `>`
    Greater,
    /// `>=`
    GreaterEqual,
}

impl Comparison {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "==" => Comparison::Equal,
            "!=" => Comparison::NotEqual,
            "<" => Comparison::Less,
            "<=" => Comparison::LessEqual,
            ">" => Comparison::Greater,
            ">=" => Comparison::GreaterEqual,
            _ => return None,
        })
    }

    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Comparison::NotEqual, None) => true,
            (_, None) => false,
            (Comparison::Equal, Some(o)) => o == Ordering::Equal,
            (Comparison::NotEqual, Some(o)) => o != Ordering::Equal,
            (Comparison::Less, Some(o)) => o == Ordering::Less,
            (Comparison::LessEqual, Some(o)) => o != Ordering::Greater,
            (Comparison::Greater, Some(o)) => o == Ordering::Greater,
            (Comparison::GreaterEqual, Some(o)) => o != Ordering::Less,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
            Comparison::Less => "<",
            Comparison::LessEqual => "<=",
            Comparison::Greater => ">",
            Comparison::GreaterEqual => ">=",
        };
        write!(f, "{}", text)
    }
}

/// A predicate over events.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum Expression {
    /// Holds for every event.
    True,
    /// Compares a field with a literal; missing fields only satisfy `!=`.
    Compare {
        /// The field name.
        field: String,
        /// The comparison.
        op: Comparison,
        /// The literal.
        value: Value,
    },
    /// Holds if all parts hold.
    And(Vec<Expression>),
}

impl Expression {
    /// The expression that holds for every event.
    pub fn trivially_true() -> Self {
        Expression::True
    }

    /// True if the expression holds for every event without looking at it.
    pub fn is_trivially_true(&self) -> bool {
        match self {
            Expression::True => true,
            Expression::Compare { .. } => false,
            Expression::And(parts) => parts.iter().all(Expression::is_trivially_true),
        }
    }

    /// Combines two expressions, dropping trivially true parts.
    pub fn and(self, other: Expression) -> Expression {
        let mut parts = Vec::new();
        for expression in [self, other] {
            match expression {
                Expression::True => {},
                Expression::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Expression::True,
            1 => parts.remove(0),
            _ => Expression::And(parts),
        }
    }

    /// Evaluates the expression against one event.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Expression::True => true,
            Expression::Compare { field, op, value } => {
                op.holds(record.get(field).and_then(|x| x.compare(value)))
            },
            Expression::And(parts) => parts.iter().all(|part| part.matches(record)),
        }
    }

    /// Parses `field op literal`, joined by `and`; the single word `true` is trivially true.
    pub fn parse(tokens: &[String]) -> Result<Expression> {
        if tokens.is_empty() {
            return Err(Error::Configuration("expected an expression".to_string()));
        }
        let mut result = Expression::True;
        for clause in tokens.split(|token| token == "and") {
            let clause = match clause {
                [word] if word == "true" => Expression::True,
                [field, op, value] => {
                    let op = Comparison::parse(op).ok_or_else(|| {
                        Error::Configuration(format!("unknown comparison `{}`", op))
                    })?;
                    Expression::Compare { field: field.clone(), op, value: Value::parse_literal(value) }
                },
                _ => {
                    return Err(Error::Configuration(format!(
                        "expected `field op literal`, got `{}`",
                        clause.join(" ")
                    )))
                },
            };
            result = result.and(clause);
        }
        Ok(result)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::True => write!(f, "true"),
            Expression::Compare { field, op, value } => write!(f, "{} {} {}", field, op, value),
            Expression::And(parts) => {
                write!(f, "{}", itertools::Itertools::join(&mut parts.iter(), " and "))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn conjunction_flattens_and_drops_true() {
        let a = Expression::parse(&tokens("x > 1")).unwrap();
        let b = Expression::parse(&tokens("y == \"z\"")).unwrap();
        let both = a.clone().and(Expression::True).and(b.clone());
        assert_eq!(both, Expression::And(vec![a.clone(), b]));
        assert_eq!(Expression::True.and(a.clone()), a);
        assert!(Expression::True.and(Expression::True).is_trivially_true());
    }

    #[test]
    fn missing_fields_only_satisfy_inequality() {
        let record = Record::new().with("x", Value::Int(3));
        assert!(Expression::parse(&tokens("x >= 3")).unwrap().matches(&record));
        assert!(!Expression::parse(&tokens("y == 3")).unwrap().matches(&record));
        assert!(Expression::parse(&tokens("y != 3")).unwrap().matches(&record));
        assert!(Expression::parse(&tokens("x > 1 and x < 3")).map(|e| !e.matches(&record)).unwrap());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let expression = Expression::parse(&tokens("x > 1 and name != \"a\"")).unwrap();
        assert_eq!(expression.to_string(), "x > 1 and name != \"a\"");
        let reparsed = Expression::parse(&tokens(&expression.to_string())).unwrap();
        assert_eq!(reparsed, expression);
    }

    #[test]
    fn malformed_clauses_are_configuration_errors() {
        assert!(matches!(Expression::parse(&tokens("x ~ 1")), Err(Error::Configuration(_))));
        assert!(matches!(Expression::parse(&tokens("x >")), Err(Error::Configuration(_))));
        assert!(matches!(Expression::parse(&[]), Err(Error::Configuration(_))));
    }
}
