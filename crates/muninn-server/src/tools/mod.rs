// crates/muninn-server/src/tools/mod.rs
// The exposed tool verbs.

pub mod core;

pub use core::{ToolContext, dispatch, list_tools};
