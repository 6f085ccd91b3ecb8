//! Tagged value type for template property bags.
//!
//! Property values arrive from the template as a dynamic bag; internally they
//! are represented as an explicit tagged variant so that "still an
//! expression" is a first-class state rather than a stringly convention. The
//! evaluator's job is exactly to convert every [`Value::Expression`] into one
//! of the concrete variants before a payload is handed to the provisioner.

use std::collections::BTreeMap;
use std::fmt;

use crate::core::StratusError;

/// A template value: concrete data or a not-yet-evaluated expression.
///
/// Numbers are integers only; the input format and the built-ins never
/// produce floats, and integer-only numbers keep the diff-based no-op check
/// free of float equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer number.
    Number(i64),
    /// Plain string with no interpolation segments.
    String(String),
    /// Ordered list of values.
    Array(Vec<Value>),
    /// String-keyed map of values, ordered for deterministic payloads.
    Object(BTreeMap<String, Value>),
    /// Raw string containing `${...}` segments, pending evaluation.
    Expression(String),
}

impl Value {
    /// Convert a parsed TOML value, tagging strings that contain `${...}`
    /// interpolation segments as unresolved expressions.
    #[must_use]
    pub fn from_toml(value: toml::Value) -> Self {
        match value {
            toml::Value::String(s) => {
                if s.contains("${") {
                    Self::Expression(s)
                } else {
                    Self::String(s)
                }
            }
            toml::Value::Integer(i) => Self::Number(i),
            toml::Value::Float(f) => {
                // The format is integer-only; a float in a template becomes
                // its decimal rendering and fails later type checks loudly
                // instead of silently truncating.
                Self::String(f.to_string())
            }
            toml::Value::Boolean(b) => Self::Bool(b),
            toml::Value::Datetime(dt) => Self::String(dt.to_string()),
            toml::Value::Array(items) => {
                Self::Array(items.into_iter().map(Self::from_toml).collect())
            }
            toml::Value::Table(table) => Self::Object(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_toml(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a JSON value (provisioner properties, state files) back into
    /// the engine representation. Non-integer numbers become strings for the
    /// same reason floats are rejected on the way in.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Number(i),
                None => Self::String(n.to_string()),
            },
            serde_json::Value::String(s) => Self::String(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => Self::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a fully resolved value to JSON for the provisioning payload.
    ///
    /// Fails if any unresolved expression remains; the executor resolves
    /// every property before materialization, so hitting this is an internal
    /// ordering bug surfaced as [`StratusError::UnresolvedReference`].
    pub fn to_json(&self) -> Result<serde_json::Value, StratusError> {
        match self {
            Self::Null => Ok(serde_json::Value::Null),
            Self::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Self::Number(n) => Ok(serde_json::Value::Number((*n).into())),
            Self::String(s) => Ok(serde_json::Value::String(s.clone())),
            Self::Array(items) => Ok(serde_json::Value::Array(
                items
                    .iter()
                    .map(Self::to_json)
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Self::Object(map) => {
                let mut out = serde_json::Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), v.to_json()?);
                }
                Ok(serde_json::Value::Object(out))
            }
            Self::Expression(raw) => Err(StratusError::UnresolvedReference {
                reference: raw.clone(),
            }),
        }
    }

    /// Human-readable name of the variant, used in type-mismatch messages.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Expression(_) => "expression",
        }
    }

    /// Whether this value (recursively) contains no unresolved expressions.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        match self {
            Self::Expression(_) => false,
            Self::Array(items) => items.iter().all(Self::is_resolved),
            Self::Object(map) => map.values().all(Self::is_resolved),
            _ => true,
        }
    }

    /// Borrow as a string if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Render a scalar for interpolation into a string.
    ///
    /// Only strings, numbers, and booleans are concatenable; arrays and
    /// objects have no implicit string form.
    pub fn to_scalar_string(&self, expression: &str) -> Result<String, StratusError> {
        match self {
            Self::String(s) => Ok(s.clone()),
            Self::Number(n) => Ok(n.to_string()),
            Self::Bool(b) => Ok(b.to_string()),
            other => Err(StratusError::TypeMismatch {
                expression: expression.to_string(),
                message: format!("cannot interpolate a value of type {}", other.type_name()),
            }),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
            Self::Expression(raw) => write!(f, "{raw}"),
            other => match other.to_json() {
                Ok(json) => write!(f, "{json}"),
                Err(_) => write!(f, "<unresolved>"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_with_interpolation_become_expressions() {
        let v = Value::from_toml(toml::Value::String("${parameters.name}-sa".into()));
        assert!(matches!(v, Value::Expression(_)));
        let v = Value::from_toml(toml::Value::String("plain".into()));
        assert_eq!(v, Value::String("plain".into()));
    }

    #[test]
    fn nested_expressions_detected_by_is_resolved() {
        let mut map = BTreeMap::new();
        map.insert(
            "inner".to_string(),
            Value::Array(vec![Value::Expression("${resources.a.id}".into())]),
        );
        let v = Value::Object(map);
        assert!(!v.is_resolved());
    }

    #[test]
    fn to_json_rejects_unresolved_expressions() {
        let v = Value::Expression("${resources.a.id}".into());
        assert!(matches!(
            v.to_json(),
            Err(StratusError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn scalar_rendering_rejects_objects() {
        let v = Value::Object(BTreeMap::new());
        assert!(matches!(
            v.to_scalar_string("${x}"),
            Err(StratusError::TypeMismatch { .. })
        ));
        assert_eq!(Value::Number(42).to_scalar_string("n").unwrap(), "42");
    }

    #[test]
    fn json_round_trip_preserves_integers() {
        let v = Value::Number(7);
        let json = v.to_json().unwrap();
        assert_eq!(Value::from_json(&json), v);
    }
}
