//! Ambient network discovery.
//!
//! The deployment lives in a network it does not own. Discovery is an
//! injected [`NetworkLookup`] so that the engine's provider can answer it in
//! production and tests can pin a fixed network.

use serde::{Deserialize, Serialize};
use skiff_common::error::{Result, SkiffError};

use crate::output::Output;

/// The network and subnets the deployment is placed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    network_id: String,
    subnet_ids: Vec<String>,
}

impl NetworkContext {
    /// Creates a network context.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the network id is empty or there
    /// are no subnets.
    pub fn new(network_id: impl Into<String>, subnet_ids: Vec<String>) -> Result<Self> {
        let network_id = network_id.into();
        if network_id.trim().is_empty() {
            return Err(SkiffError::config("default network has no id"));
        }
        if subnet_ids.is_empty() || subnet_ids.iter().any(|s| s.trim().is_empty()) {
            return Err(SkiffError::config(format!(
                "network \"{network_id}\" has no usable subnets"
            )));
        }
        Ok(Self {
            network_id,
            subnet_ids,
        })
    }

    /// Network identifier.
    #[must_use]
    pub fn network_id(&self) -> Output<String> {
        Output::known(self.network_id.clone())
    }

    /// Subnet identifiers in discovery order.
    #[must_use]
    pub fn subnet_ids(&self) -> Output<Vec<String>> {
        Output::known(self.subnet_ids.clone())
    }

    /// Number of subnets.
    #[must_use]
    pub fn subnet_count(&self) -> usize {
        self.subnet_ids.len()
    }
}

/// Read-only discovery of the default network.
pub trait NetworkLookup {
    /// Returns the default network and its subnets.
    ///
    /// # Errors
    ///
    /// Returns an error if no default network can be found.
    fn default_network(&self) -> Result<NetworkContext>;
}

/// A lookup that always answers with the same network.
#[derive(Debug, Clone)]
pub struct FixedNetwork(NetworkContext);

impl FixedNetwork {
    /// Wraps a known network.
    #[must_use]
    pub const fn new(context: NetworkContext) -> Self {
        Self(context)
    }
}

impl NetworkLookup for FixedNetwork {
    fn default_network(&self) -> Result<NetworkContext> {
        Ok(self.0.clone())
    }
}

/// Resolves the ambient network through `lookup`.
///
/// Any failure is reported as a configuration error: an unresolvable
/// network must stop the deployment before a resource is touched.
///
/// # Errors
///
/// Returns a configuration error if the lookup fails.
pub fn resolve_network(lookup: &dyn NetworkLookup) -> Result<NetworkContext> {
    match lookup.default_network() {
        Ok(context) => {
            tracing::info!(
                network = %context.network_id,
                subnets = context.subnet_ids.len(),
                "resolved default network"
            );
            Ok(context)
        }
        Err(e @ SkiffError::Config { .. }) => Err(e),
        Err(e) => Err(SkiffError::config(format!("cannot resolve default network: {e}"))),
    }
}
