//! Domain primitive types used across the skiff workspace.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical name of a resource in a topology.
///
/// The logical name is the resource's identity across re-application: the
/// engine keys persisted state by it, so renaming a resource means deleting
/// the old one and creating a new one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceName(String);

impl ResourceName {
    /// Creates a resource name from a string value.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Kind of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// Container image registry.
    Registry,
    /// Log group receiving container output.
    LogGroup,
    /// Traffic-control rule set.
    SecurityBoundary,
    /// Role assumed by running tasks.
    ServiceIdentity,
    /// Attachment of one managed policy to a role.
    PolicyAttachment,
    /// Container run specification.
    TaskDefinition,
    /// Compute cluster.
    Cluster,
    /// Service keeping tasks running on a cluster.
    ClusterBinding,
    /// Load balancer backend pool.
    TargetGroup,
    /// Application load balancer.
    LoadBalancer,
    /// Load balancer listener.
    Listener,
    /// Public HTTP gateway.
    Gateway,
    /// Gateway deployment stage.
    GatewayStage,
    /// Gateway integration with a backend.
    GatewayIntegration,
    /// Gateway route.
    GatewayRoute,
}

impl ResourceKind {
    /// Input fields that cannot change in place; a difference forces replacement.
    #[must_use]
    pub const fn immutable_fields(self) -> &'static [&'static str] {
        match self {
            Self::Registry | Self::Cluster => &["name"],
            Self::LogGroup => &[],
            Self::SecurityBoundary => &["network_id"],
            Self::ServiceIdentity => &[],
            Self::PolicyAttachment => &["role", "policy_arn"],
            // task definitions are immutable revisions
            Self::TaskDefinition => &[
                "family",
                "cpu",
                "memory",
                "network_mode",
                "requires_compatibilities",
                "task_role_arn",
                "execution_role_arn",
                "containers",
            ],
            Self::ClusterBinding => &["cluster", "launch_type", "load_balancers"],
            Self::TargetGroup => &["protocol", "port", "network_id", "target_type"],
            Self::LoadBalancer => &["internal", "load_balancer_type"],
            Self::Listener => &["load_balancer_arn"],
            Self::Gateway => &["protocol_type"],
            Self::GatewayStage => &["api_id", "name"],
            Self::GatewayIntegration => &["api_id", "integration_type"],
            Self::GatewayRoute => &["api_id"],
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Registry => "registry",
            Self::LogGroup => "log-group",
            Self::SecurityBoundary => "security-boundary",
            Self::ServiceIdentity => "service-identity",
            Self::PolicyAttachment => "policy-attachment",
            Self::TaskDefinition => "task-definition",
            Self::Cluster => "cluster",
            Self::ClusterBinding => "cluster-binding",
            Self::TargetGroup => "target-group",
            Self::LoadBalancer => "load-balancer",
            Self::Listener => "listener",
            Self::Gateway => "gateway",
            Self::GatewayStage => "gateway-stage",
            Self::GatewayIntegration => "gateway-integration",
            Self::GatewayRoute => "gateway-route",
        };
        write!(f, "{name}")
    }
}

/// Attributes a provider reports for a created resource, keyed by name.
pub type Attributes = BTreeMap<String, serde_json::Value>;
