//! Stratus: a declarative resource deployment engine.
//!
//! Stratus loads TOML templates describing resources, their parameters, and
//! the modules that compose them; resolves the `${...}` expressions wiring
//! them together; infers the dependency graph those expressions imply; and
//! materializes the graph against a target scope through a pluggable
//! provisioning API, in parallel where dependencies allow.
//!
//! # Architecture
//!
//! The crate is organized as a pipeline:
//!
//! - [`template`]: load and structurally check template files, resolve
//!   parameters
//! - [`expr`]: parse, statically scan, and lazily evaluate `${...}`
//!   expressions
//! - [`graph`]: the in-memory resource graph, explicit edges included
//! - [`resolver`]: implicit edge inference, cycle detection, deterministic
//!   ordering, and full static validation
//! - [`executor`]: the async scheduler that drives nodes from `Pending` to a
//!   terminal state, with bounded parallelism, retries, and cooperative
//!   cancellation
//! - [`provision`]: the provisioning API boundary and its local
//!   implementation
//! - [`cli`]: the `stratus` command-line surface
//!
//! A deployment never dies half-reported: runs that fail or get cancelled
//! still produce a [`executor::DeploymentReport`] accounting for every node.

pub mod cli;
pub mod core;
pub mod executor;
pub mod expr;
pub mod graph;
pub mod provision;
pub mod resolver;
pub mod template;
