//! Expression evaluation against a per-run context.
//!
//! Evaluation is driven incrementally by the executor: a reference to another
//! resource's runtime property can only resolve after that resource has been
//! materialized, so the evaluator asks a [`StateView`] for cross-node values
//! and reports [`StratusError::UnresolvedReference`] when the target has not
//! reached a terminal successful state. With a correctly ordered schedule
//! that error never fires; the executor treats it as "not ready", never as a
//! failure.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::core::{DeploymentEnvironment, StratusError, suggest_closest};
use crate::expr::parser::{Expr, RefPath, RefRoot, Segment, parse_interpolation};
use crate::template::value::Value;

/// Read access to the state of already-materialized sibling nodes.
///
/// Implemented by the executor's run state; the `reference` argument is the
/// rendered path, used verbatim in error messages.
pub trait StateView {
    /// Resolve `resources.<name>.<path...>`.
    fn resource_value(
        &self,
        name: &str,
        path: &[String],
        reference: &str,
    ) -> Result<Value, StratusError>;

    /// Resolve `modules.<name>.outputs.<path...>`.
    fn module_output(
        &self,
        name: &str,
        path: &[String],
        reference: &str,
    ) -> Result<Value, StratusError>;
}

/// A state view with no materialized nodes at all.
///
/// Used when resolving parameter defaults, which may only reference other
/// parameters; any cross-node reference comes back unresolved.
pub struct EmptyState;

impl StateView for EmptyState {
    fn resource_value(
        &self,
        _name: &str,
        _path: &[String],
        reference: &str,
    ) -> Result<Value, StratusError> {
        Err(StratusError::UnresolvedReference {
            reference: reference.to_string(),
        })
    }

    fn module_output(
        &self,
        _name: &str,
        _path: &[String],
        reference: &str,
    ) -> Result<Value, StratusError> {
        Err(StratusError::UnresolvedReference {
            reference: reference.to_string(),
        })
    }
}

/// Everything an expression can see during evaluation.
///
/// Built fresh per scope (root deployment or module instantiation); there is
/// no implicit outer-scope lookup, module boundaries are explicit binding
/// maps.
pub struct EvalContext<'a> {
    /// Scope name for error messages (`root` or the module name).
    pub scope: &'a str,
    /// Resolved parameter bindings for this scope.
    pub params: &'a BTreeMap<String, Value>,
    /// Deployment target metadata for the `environment(...)` built-in.
    pub env: &'a DeploymentEnvironment,
    /// Materialized sibling state.
    pub state: &'a dyn StateView,
}

impl EvalContext<'_> {
    /// Evaluate a parsed expression to a concrete value.
    pub fn evaluate(&self, expr: &Expr) -> Result<Value, StratusError> {
        match expr {
            Expr::StringLit(s) => Ok(Value::String(s.clone())),
            Expr::NumberLit(n) => Ok(Value::Number(*n)),
            Expr::BoolLit(b) => Ok(Value::Bool(*b)),
            Expr::Reference(path) => self.evaluate_reference(path),
            Expr::Call { name, args } => self.evaluate_call(name, args),
        }
    }

    /// Evaluate a template value, converting every unresolved expression into
    /// a concrete variant. Arrays and objects are walked recursively.
    pub fn evaluate_value(&self, value: &Value) -> Result<Value, StratusError> {
        match value {
            Value::Expression(raw) => self.evaluate_interpolation(raw),
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.evaluate_value(v))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.evaluate_value(v)?);
                }
                Ok(Value::Object(out))
            }
            concrete => Ok(concrete.clone()),
        }
    }

    /// Evaluate a raw interpolated string.
    ///
    /// A string that is exactly one `${...}` segment keeps the type of the
    /// referenced value; mixed segments concatenate, and concatenation only
    /// accepts strings, numbers, and booleans.
    pub fn evaluate_interpolation(&self, raw: &str) -> Result<Value, StratusError> {
        let segments = parse_interpolation(raw)?;
        if let [Segment::Expr(expr)] = segments.as_slice() {
            return self.evaluate(expr);
        }
        let mut out = String::new();
        for segment in &segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expr(expr) => {
                    let value = self.evaluate(expr)?;
                    out.push_str(&value.to_scalar_string(raw)?);
                }
            }
        }
        Ok(Value::String(out))
    }

    fn evaluate_reference(&self, path: &RefPath) -> Result<Value, StratusError> {
        let reference = path.to_string();
        match path.root {
            RefRoot::Parameters => {
                let name = &path.segments[0];
                let value = self.params.get(name).ok_or_else(|| {
                    match suggest_closest(name, self.params.keys().map(String::as_str)) {
                        Some(closest) => StratusError::UnknownReference {
                            name: format!("parameters.{name}"),
                            closest: Some(format!("parameters.{closest}")),
                        },
                        None => StratusError::MissingParameter {
                            name: name.clone(),
                            scope: self.scope.to_string(),
                        },
                    }
                })?;
                traverse(value, &path.segments[1..], &reference)
            }
            RefRoot::Resources => {
                self.state
                    .resource_value(&path.segments[0], &path.segments[1..], &reference)
            }
            RefRoot::Modules => {
                if path.segments.len() < 3 || path.segments[1] != "outputs" {
                    return Err(StratusError::ExpressionParse {
                        expression: reference,
                        message: "module references must use modules.<name>.outputs.<output>"
                            .to_string(),
                    });
                }
                self.state
                    .module_output(&path.segments[0], &path.segments[2..], &reference)
            }
        }
    }

    fn evaluate_call(&self, name: &str, args: &[Expr]) -> Result<Value, StratusError> {
        let values = args
            .iter()
            .map(|a| self.evaluate(a))
            .collect::<Result<Vec<_>, _>>()?;
        match name {
            "concat" => {
                let mut out = String::new();
                for value in &values {
                    out.push_str(&value.to_scalar_string(&format!("{name}(..)"))?);
                }
                Ok(Value::String(out))
            }
            "uniqueName" => {
                // Deterministic per scope and seed, so re-running the same
                // deployment converges on the same generated names.
                let mut hasher = Sha256::new();
                hasher.update(self.env.scope.as_bytes());
                for value in &values {
                    hasher.update(value.to_scalar_string("uniqueName(..)")?.as_bytes());
                }
                let digest = hex::encode(hasher.finalize());
                Ok(Value::String(digest[..13].to_string()))
            }
            "environment" => {
                let key = match values.as_slice() {
                    [Value::String(key)] => key,
                    _ => {
                        return Err(StratusError::ExpressionParse {
                            expression: format!("{name}(..)"),
                            message: "environment() takes exactly one string argument".to_string(),
                        });
                    }
                };
                match self.env.get(key) {
                    Some(v) => Ok(Value::String(v.to_string())),
                    None => {
                        let known = ["scope", "location"]
                            .into_iter()
                            .chain(self.env.values.keys().map(String::as_str));
                        Err(StratusError::UnknownReference {
                            name: format!("environment('{key}')"),
                            closest: suggest_closest(key, known),
                        })
                    }
                }
            }
            other => Err(StratusError::ExpressionParse {
                expression: format!("{other}(..)"),
                message: format!("unknown function '{other}'"),
            }),
        }
    }
}

/// Walk object keys along `path`, starting from an already-resolved value.
pub fn traverse(value: &Value, path: &[String], reference: &str) -> Result<Value, StratusError> {
    let mut current = value;
    for segment in path {
        match current {
            Value::Object(map) => {
                current = map.get(segment).ok_or_else(|| StratusError::UnknownReference {
                    name: reference.to_string(),
                    closest: suggest_closest(segment, map.keys().map(String::as_str))
                        .map(|c| reference.replace(segment, &c)),
                })?;
            }
            other => {
                return Err(StratusError::TypeMismatch {
                    expression: reference.to_string(),
                    message: format!(
                        "cannot index into a value of type {} with '{segment}'",
                        other.type_name()
                    ),
                });
            }
        }
    }
    Ok(current.clone())
}
