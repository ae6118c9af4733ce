//! Umbrella crate for the `densemat` workspace.
//!
//! Re-exports the array core and the algorithms built on it.

pub use dm_core::*;
pub use dm_ops::*;
