//! # skiff-topology
//!
//! Resource model and dependency-ordering logic for deploying one
//! containerized HTTP service: an image registry, a serverless container
//! service, a load balancer in front of it and a public HTTP gateway.
//!
//! Handles:
//! - **Output**: Deferred values combined without forcing resolution.
//! - **Resource**: Typed entities lowered to engine-facing declarations.
//! - **Builders**: Registry, network, security, compute, balancer, gateway.
//! - **Graph**: Dependency graph construction and topological resolution.
//! - **Validator**: Cross-entity invariants of an assembled topology.
//! - **Assembler**: Composition of the builders into one [`Topology`].
//!
//! # Example
//!
//! ```rust,no_run
//! use skiff_common::config::DeployInputs;
//! use skiff_topology::network::{FixedNetwork, NetworkContext};
//! use skiff_topology::Topology;
//!
//! # fn main() -> skiff_common::error::Result<()> {
//! let inputs = DeployInputs::new("api", "123.dkr.ecr.us-east-1.amazonaws.com/api", "v1")?;
//! let network = NetworkContext::new("vpc-1", vec!["subnet-a".into()])?;
//! let topology = Topology::assemble(&inputs, &FixedNetwork::new(network))?;
//! let order = topology.graph()?.resolve_order()?;
//! # Ok(())
//! # }
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod assembler;
pub mod balancer;
pub mod compute;
pub mod gateway;
pub mod graph;
pub mod network;
pub mod output;
pub mod registry;
pub mod resource;
pub mod security;
pub mod validator;

pub use assembler::{StackOutputs, Topology};
