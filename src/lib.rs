// ============================================================================
// Linting - Dangerous or non-idiomatic practices are flagged
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # terragraph
//!
//! A dependency-graph planner, parallel walker and convergence poller for
//! declarative infrastructure.
//!
//! ## Overview
//!
//! A configuration declares providers, resources, data sources, variables,
//! outputs and module calls. Each becomes a [`graph::Node`] with a stable
//! name; `${...}` references between them become graph edges. One cycle:
//!
//! 1. **Discover**: flatten the document and its modules into nodes, add
//!    resources that are recorded in state but no longer configured
//! 2. **Build**: derive edges, resolve providers and reject cycles before any
//!    remote call
//! 3. **Walk**: visit nodes in dependency order with bounded parallelism;
//!    a failed node skips its descendants while independent work continues
//! 4. **Converge**: diff, mutate through the provider, poll until the remote
//!    object settles, then commit state exactly once
//!
//! ## Modules
//!
//! - [`config`]: Document parsing, flattening and validation
//! - [`graph`]: Nodes, dependency extraction, graph building and walking
//! - [`planner`]: Diffing, interpolation and the per-node state machine
//! - [`poller`]: Convergence polling with timeouts and backoff
//! - [`provider`]: Provider capability and the built-in `null` provider
//! - [`state`]: State storage backends (local file, memory)
//! - [`orchestrator`]: Plan and apply cycles
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! variables:
//!   env:
//!     default: dev
//!
//! providers:
//!   - type: "null"
//!
//! resources:
//!   - type: null_resource
//!     name: db
//!   - type: null_resource
//!     name: web
//!     config:
//!       triggers:
//!         env: "${var.env}"
//!         db: "${null_resource.db.id}"
//!
//! outputs:
//!   web:
//!     value: "${null_resource.web.id}"
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod planner;
pub mod poller;
pub mod provider;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, Document};
pub use error::{Result, TerragraphError};
pub use graph::{Graph, Node, NodeKind, Visitor, WalkOptions, walk};
pub use orchestrator::{ApplyReport, Orchestrator};
pub use planner::{Action, ChangeSet, DiffEngine, Plan};
pub use poller::{WaitSpec, wait_for};
pub use provider::{Provider, ProviderSet};
pub use state::{LocalStateStore, MemoryStateStore, StateStore};
