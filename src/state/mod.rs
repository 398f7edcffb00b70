//! State management module for terragraph.
//!
//! This module provides persistent storage for the last applied state of
//! every managed resource, keyed by stable node name.

mod local;
mod memory;
mod store;
mod types;

pub use local::LocalStateStore;
pub use memory::MemoryStateStore;
pub use store::StateStore;
pub use types::{ResourceState, STATE_VERSION, StateFile};
