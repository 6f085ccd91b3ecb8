//! Expression language: parsing, static reference scanning, and evaluation.
//!
//! Template strings may embed `${...}` expression segments. The three stages
//! are deliberately separate:
//! - [`parser`] turns segment text into an AST (load time),
//! - [`scan`] extracts cross-node references for implicit dependency edges
//!   (planning time, no evaluation),
//! - [`eval`] resolves an AST against a per-run context (execution time,
//!   driven incrementally by the executor).

pub mod eval;
pub mod parser;
pub mod scan;

pub use eval::{EmptyState, EvalContext, StateView};
pub use parser::{Expr, RefPath, RefRoot, Segment, parse, parse_interpolation};
pub use scan::{NodeRef, collect_references};
