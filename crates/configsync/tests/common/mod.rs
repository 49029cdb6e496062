//! Shared test utilities for configsync integration tests.
//!
//! - `SyncHarness`: manifest directory + in-memory cluster
//! - `GitFixture`: a local repository driven through the git CLI
//! - builders for manifest YAML

pub mod builders;
pub mod git;
pub mod harness;

pub use builders::*;
pub use git::GitFixture;
pub use harness::SyncHarness;
