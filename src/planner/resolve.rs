//! Interpolation substitution.
//!
//! Turns a node's raw configuration into concrete values by replacing every
//! `${...}` with the published value of the referenced node. A string that
//! is exactly one interpolation takes the referenced value as-is (lists and
//! maps stay structured); interpolations embedded in text are stringified.
//! Only bare references are evaluated.

use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{ConfigError, Result, TerragraphError};
use crate::graph::reference::{Reference, interpolations, reference_tokens};
use crate::graph::{Graph, Node};

use super::diff::UNKNOWN;

/// A node's value as seen by the nodes that reference it.
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    /// The value.
    pub value: Value,
    /// False while some attributes are only known after apply.
    pub complete: bool,
}

impl Published {
    /// A fully known value.
    #[must_use]
    pub const fn known(value: Value) -> Self {
        Self { value, complete: true }
    }

    /// A value whose missing attributes resolve to the unknown marker.
    #[must_use]
    pub const fn partial(value: Value) -> Self {
        Self { value, complete: false }
    }
}

/// Returns true if `value` contains the unknown marker anywhere.
#[must_use]
pub fn contains_unknown(value: &Value) -> bool {
    match value {
        Value::String(s) => s == UNKNOWN,
        Value::Array(items) => items.iter().any(contains_unknown),
        Value::Object(map) => map.values().any(contains_unknown),
        Value::Null | Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Resolves `node`'s raw configuration against published values.
///
/// # Errors
///
/// Returns a configuration error for unsupported expressions and for
/// attributes missing from a fully known value.
pub fn resolve(node: &Node, graph: &Graph, values: &HashMap<String, Published>) -> Result<Value> {
    let resolver = Resolver { node, graph, values };
    resolver.value(node.raw_config())
}

struct Resolver<'a> {
    node: &'a Node,
    graph: &'a Graph,
    values: &'a HashMap<String, Published>,
}

impl Resolver<'_> {
    fn value(&self, raw: &Value) -> Result<Value> {
        match raw {
            Value::String(text) => self.string(text),
            Value::Array(items) => items
                .iter()
                .map(|item| self.value(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let key = match self.string(key)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    out.insert(key, self.value(item)?);
                }
                Ok(Value::Object(out))
            }
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(raw.clone()),
        }
    }

    fn string(&self, text: &str) -> Result<Value> {
        let found = interpolations(text);
        if found.is_empty() {
            return Ok(Value::String(text.to_string()));
        }

        if let [(range, body)] = found.as_slice()
            && range.start == 0
            && range.end == text.len()
        {
            return self.expression(body);
        }

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (range, body) in found {
            out.push_str(&text[cursor..range.start]);
            match self.expression(body)? {
                Value::String(s) if s == UNKNOWN => return Ok(Value::String(UNKNOWN.to_string())),
                Value::String(s) => out.push_str(&s),
                other => out.push_str(&other.to_string()),
            }
            cursor = range.end;
        }
        out.push_str(&text[cursor..]);
        Ok(Value::String(out))
    }

    fn expression(&self, body: &str) -> Result<Value> {
        let expression = body.trim();
        let tokens = reference_tokens(expression);
        let reference = match tokens.as_slice() {
            [token] if token == expression => Reference::parse(token).ok().flatten(),
            _ => None,
        };
        let Some(reference) = reference else {
            return Err(self.unsupported(expression));
        };

        let target = reference
            .resolve(self.node.module_path(), |name| self.graph.contains(name))
            .ok_or_else(|| self.unsupported(expression))?;

        let published = self.values.get(&target).ok_or_else(|| {
            let node = self.node.name();
            TerragraphError::internal(format!("{target} has no value while resolving {node}"))
        })?;

        match navigate(&published.value, &reference.attribute) {
            Some(value) => Ok(value),
            None if !published.complete => Ok(Value::String(UNKNOWN.to_string())),
            None => Err(ConfigError::InvalidReference {
                node: self.node.name().to_string(),
                expression: expression.to_string(),
                reason: format!("{target} has no attribute {}", reference.attribute.join(".")),
            }
            .into()),
        }
    }

    fn unsupported(&self, expression: &str) -> TerragraphError {
        ConfigError::UnsupportedExpression {
            node: self.node.name().to_string(),
            expression: expression.to_string(),
        }
        .into()
    }
}

/// Follows an attribute path; `*` maps the rest of the path over a list.
fn navigate(value: &Value, path: &[String]) -> Option<Value> {
    let Some((head, rest)) = path.split_first() else {
        return Some(value.clone());
    };

    if head == "*" {
        let items = match value {
            Value::Array(items) => items.clone(),
            other => vec![other.clone()],
        };
        return items
            .iter()
            .map(|item| navigate(item, rest))
            .collect::<Option<Vec<_>>>()
            .map(Value::Array);
    }

    let next = match value {
        Value::Object(map) => map.get(head),
        Value::Array(items) => head.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }?;
    navigate(next, rest)
}
