//! Construction Phase
//!
//! Everything that happens before apply:
//! - Declare resources and their dependencies
//! - Reject duplicates and dangling references immediately
//! - Freeze into a `ResourceGraph`
//!
//! Cycles are left to the resolver, which runs on the frozen graph.

pub mod builder;

pub use builder::GraphBuilder;
