//! Static reference extraction from raw property values.
//!
//! Runs before dependency resolution: every expression in a node's property
//! bag is parsed and walked for `resources.*` / `modules.*` references, which
//! become explicit dependency edges. This keeps the resolver itself free of
//! evaluation logic, and it means expression syntax errors surface at load
//! time rather than mid-deployment.

use std::collections::BTreeSet;

use crate::core::StratusError;
use crate::expr::parser::{Expr, RefRoot, Segment, parse_interpolation};
use crate::template::value::Value;

/// A cross-node reference discovered by the scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeRef {
    /// Symbolic name of the referenced resource or module.
    pub name: String,
    /// Whether the reference targets a module (through its outputs).
    pub is_module: bool,
}

/// Collect every resource/module reference reachable from `value`.
///
/// Parameter references are not dependencies; they resolve before execution
/// begins.
pub fn collect_references(value: &Value) -> Result<BTreeSet<NodeRef>, StratusError> {
    let mut refs = BTreeSet::new();
    collect_value(value, &mut refs)?;
    Ok(refs)
}

fn collect_value(value: &Value, refs: &mut BTreeSet<NodeRef>) -> Result<(), StratusError> {
    match value {
        Value::Expression(raw) => {
            for segment in parse_interpolation(raw)? {
                if let Segment::Expr(expr) = segment {
                    collect_expr(&expr, refs);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_value(item, refs)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_value(item, refs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn collect_expr(expr: &Expr, refs: &mut BTreeSet<NodeRef>) {
    match expr {
        Expr::Reference(path) => match path.root {
            RefRoot::Resources => {
                refs.insert(NodeRef {
                    name: path.segments[0].clone(),
                    is_module: false,
                });
            }
            RefRoot::Modules => {
                refs.insert(NodeRef {
                    name: path.segments[0].clone(),
                    is_module: true,
                });
            }
            RefRoot::Parameters => {}
        },
        Expr::Call { args, .. } => {
            for arg in args {
                collect_expr(arg, refs);
            }
        }
        _ => {}
    }
}
