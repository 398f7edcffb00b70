//! Configuration dependency graph.
//!
//! This module contains the typed node model, dependency extraction from
//! interpolation references, graph construction with cycle detection, and
//! the concurrent walker that visits nodes in dependency order.

mod builder;
pub mod node;
pub mod reference;
pub mod walker;

pub use builder::Graph;
pub use node::{ModulePath, Node, NodeKind, RawConfig};
pub use walker::{DEFAULT_PARALLELISM, Visitor, WalkOptions, WalkReport, walk};
