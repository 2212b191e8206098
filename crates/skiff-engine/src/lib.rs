//! Provisioning engine for skiff topologies.
//!
//! Persists what has been created, diffs a topology against it, and drives
//! a [`provider::Provider`] through the resulting plan.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod engine;
pub mod local;
pub mod plan;
pub mod provider;
pub mod state;

pub use engine::{ApplyReport, Engine};
pub use local::LocalProvider;
pub use plan::{Action, Plan};
