//! Shared infrastructure for hierarchy tests.

/// Builders assembling common hierarchy shapes.
pub mod builder;
/// Synchronous access harness over [`memsim_core::System`].
pub mod harness;

pub use harness::Harness;
