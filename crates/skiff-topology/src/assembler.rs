//! Topology assembly.
//!
//! [`Topology::assemble`] runs the builders leaves first, wires their
//! deferred values together and validates the result. Assembly performs no
//! I/O beyond the injected network lookup and is deterministic: the same
//! inputs and network always yield the same declarations in the same order.

use serde::Serialize;
use skiff_common::config::DeployInputs;
use skiff_common::error::Result;

use crate::balancer::{BalancerLayer, bind_load_balancer};
use crate::compute::{ClusterBinding, ComputeLayer};
use crate::gateway::{GatewayLayer, route_to};
use crate::graph::DependencyGraph;
use crate::network::{NetworkContext, NetworkLookup, resolve_network};
use crate::output::Output;
use crate::registry::Registry;
use crate::resource::{Resource, ResourceDecl};
use crate::security::{SecurityBoundaries, build_boundaries};
use crate::validator;

/// Stack output holding the registry URI.
pub const REPOSITORY_URI_OUTPUT: &str = "repositoryUri";
/// Stack output holding the public endpoint.
pub const API_ENDPOINT_OUTPUT: &str = "apiEndpoint";

/// Values exported once the topology has converged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackOutputs {
    /// Registry URI for the image push step.
    #[serde(rename = "repositoryUri")]
    pub repository_uri: Output<String>,
    /// Public base URL of the service.
    #[serde(rename = "apiEndpoint")]
    pub api_endpoint: Output<String>,
}

impl StackOutputs {
    /// Outputs as `(name, value)` pairs.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, &Output<String>); 2] {
        [
            (REPOSITORY_URI_OUTPUT, &self.repository_uri),
            (API_ENDPOINT_OUTPUT, &self.api_endpoint),
        ]
    }
}

/// The full set of declarations for one deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    /// Inputs the topology was assembled from.
    pub inputs: DeployInputs,
    /// Ambient network.
    pub network: NetworkContext,
    /// Image registry.
    pub registry: Registry,
    /// Security boundaries.
    pub security: SecurityBoundaries,
    /// Log sink, identity, task and cluster.
    pub compute: ComputeLayer,
    /// Target group, load balancer and listener.
    pub balancer: BalancerLayer,
    /// Service binding the task to the cluster and target group.
    pub service: ClusterBinding,
    /// Public gateway.
    pub gateway: GatewayLayer,
    /// Exported values.
    pub outputs: StackOutputs,
}

impl Topology {
    /// Assembles and validates the topology for `inputs`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the network cannot be resolved or an
    /// input is unusable, or a topology error if an invariant does not hold.
    pub fn assemble(inputs: &DeployInputs, network: &dyn NetworkLookup) -> Result<Self> {
        tracing::info!(
            service = inputs.service_name(),
            tag = inputs.image_tag(),
            "assembling topology"
        );

        let network = resolve_network(network)?;
        let registry = Registry::for_service(inputs.service_name());
        let compute = ComputeLayer::build(inputs, &registry)?;
        let security = build_boundaries(&network, compute.task.container.listen_port);
        let balancer = bind_load_balancer(&network, &security.edge, &compute.task);
        let service = compute.bind_service(&network, &security.compute, &balancer);
        let gateway = route_to(&balancer.load_balancer);

        let outputs = StackOutputs {
            repository_uri: registry.repository_url(),
            api_endpoint: gateway.endpoint(),
        };

        let topology = Self {
            inputs: inputs.clone(),
            network,
            registry,
            security,
            compute,
            balancer,
            service,
            gateway,
            outputs,
        };
        validator::validate(&topology)?;
        let graph = topology.graph()?;
        tracing::info!(resources = graph.len(), "topology assembled");
        Ok(topology)
    }

    /// Every resource, in declaration order.
    #[must_use]
    pub fn resources(&self) -> Vec<&dyn Resource> {
        let mut resources: Vec<&dyn Resource> = vec![
            &self.registry,
            &self.compute.log_group,
            &self.security.edge,
            &self.security.compute,
            &self.compute.identity,
        ];
        resources.extend(self.compute.attachments.iter().map(|a| a as &dyn Resource));
        resources.extend([
            &self.compute.task as &dyn Resource,
            &self.compute.cluster,
            &self.balancer.target_group,
            &self.balancer.load_balancer,
            &self.balancer.listener,
            &self.service,
            &self.gateway.api,
            &self.gateway.stage,
            &self.gateway.integration,
            &self.gateway.route,
        ]);
        resources
    }

    /// Lowers every resource to a declaration, in declaration order.
    #[must_use]
    pub fn declarations(&self) -> Vec<ResourceDecl> {
        self.resources().into_iter().map(|r| r.declare()).collect()
    }

    /// Builds the dependency graph of the declarations.
    ///
    /// # Errors
    ///
    /// Returns an error if a declaration references an undeclared resource
    /// or the references form a cycle.
    pub fn graph(&self) -> Result<DependencyGraph> {
        let graph = DependencyGraph::from_declarations(&self.declarations())?;
        let _ = graph.resolve_order()?;
        Ok(graph)
    }
}
