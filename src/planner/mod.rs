//! Planning module for infrastructure changes.
//!
//! This module compares desired attributes with recorded state, resolves
//! interpolations against the values of completed nodes, and carries each
//! managed resource through diff, mutation, convergence and commit.

mod diff;
mod executor;
mod plan;
mod resolve;
mod scale;

pub use diff::{Action, AttributeChange, ChangeSet, DiffEngine, UNKNOWN};
pub use executor::{Mode, NodeExecutor};
pub use plan::{ActionCounts, Phase, Plan, PlanEntry};
pub use resolve::{Published, contains_unknown, resolve};
pub use scale::{ScalePlan, ShrinkPolicy, member_index, member_name, scale};
