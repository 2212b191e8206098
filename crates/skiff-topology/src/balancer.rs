//! Load balancer, listener and target group.
//!
//! The target group takes its port from the container spec and its target
//! type from the task's network mode; nothing here is configured
//! independently of the compute layer.

use skiff_common::constants::{
    HEALTH_CHECK_INTERVAL_SECS, HEALTH_CHECK_PATH, HEALTH_CHECK_TIMEOUT_SECS, HEALTHY_THRESHOLD,
    LISTENER_PORT, UNHEALTHY_THRESHOLD,
};
use skiff_common::types::{ResourceKind, ResourceName};

use crate::compute::{NetworkMode, TaskDefinition};
use crate::network::NetworkContext;
use crate::output::{Expr, Output};
use crate::resource::{Properties, Resource, properties};
use crate::security::{BoundaryRef, SecurityBoundary};

/// How the target group addresses its targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    /// Targets are individual addresses.
    Ip,
    /// Targets are instances.
    Instance,
}

impl TargetType {
    /// The only target type that can reach tasks in `mode`.
    #[must_use]
    pub const fn for_network_mode(mode: NetworkMode) -> Self {
        if mode.assigns_task_ip() {
            Self::Ip
        } else {
            Self::Instance
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Instance => "instance",
        }
    }
}

/// Health check probing each target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    /// HTTP path probed.
    pub path: String,
    /// Seconds between probes.
    pub interval_secs: u32,
    /// Seconds before a probe times out.
    pub timeout_secs: u32,
    /// Successes before healthy.
    pub healthy_threshold: u32,
    /// Failures before unhealthy.
    pub unhealthy_threshold: u32,
    /// Port probed.
    pub port: u16,
}

impl HealthCheck {
    /// The liveness probe used for every deployment.
    #[must_use]
    pub fn liveness(port: u16) -> Self {
        Self {
            path: HEALTH_CHECK_PATH.to_string(),
            interval_secs: HEALTH_CHECK_INTERVAL_SECS,
            timeout_secs: HEALTH_CHECK_TIMEOUT_SECS,
            healthy_threshold: HEALTHY_THRESHOLD,
            unhealthy_threshold: UNHEALTHY_THRESHOLD,
            port,
        }
    }

    fn to_expr(&self) -> Expr {
        Expr::object([
            ("path", Expr::literal(self.path.as_str())),
            ("interval", Expr::literal(self.interval_secs)),
            ("timeout", Expr::literal(self.timeout_secs)),
            ("healthy_threshold", Expr::literal(self.healthy_threshold)),
            ("unhealthy_threshold", Expr::literal(self.unhealthy_threshold)),
            ("port", Expr::literal(self.port.to_string())),
        ])
    }
}

/// Pool of health-checked backends.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGroup {
    name: ResourceName,
    /// Backend protocol.
    pub protocol: String,
    /// Backend port.
    pub port: u16,
    network_id: Output<String>,
    /// Target addressing.
    pub target_type: TargetType,
    /// Health check.
    pub health_check: HealthCheck,
}

impl TargetGroup {
    /// Deferred ARN.
    #[must_use]
    pub fn arn(&self) -> Output<String> {
        self.attr("arn")
    }
}

impl Resource for TargetGroup {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::TargetGroup
    }

    fn properties(&self) -> Properties {
        properties([
            ("protocol", Expr::literal(self.protocol.as_str())),
            ("port", Expr::literal(self.port)),
            ("network_id", self.network_id.clone().into()),
            ("target_type", Expr::literal(self.target_type.as_str())),
            ("health_check", self.health_check.to_expr()),
        ])
    }
}

/// Whether the load balancer is reachable from the internet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Internet-facing.
    Public,
    /// Reachable only inside the network.
    Internal,
}

/// Application load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancer {
    name: ResourceName,
    /// Reachability.
    pub scheme: Scheme,
    /// Boundary around the load balancer.
    pub boundary: BoundaryRef,
    subnets: Output<Vec<String>>,
}

impl LoadBalancer {
    /// Deferred ARN.
    #[must_use]
    pub fn arn(&self) -> Output<String> {
        self.attr("arn")
    }

    /// Deferred public DNS name.
    #[must_use]
    pub fn dns_name(&self) -> Output<String> {
        self.attr("dns_name")
    }
}

impl Resource for LoadBalancer {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::LoadBalancer
    }

    fn properties(&self) -> Properties {
        properties([
            ("internal", Expr::literal(self.scheme == Scheme::Internal)),
            ("load_balancer_type", Expr::literal("application")),
            ("security_groups", Expr::list([self.boundary.id().clone().into()])),
            ("subnets", self.subnets.clone().into()),
        ])
    }
}

/// Listener forwarding every request to one target group.
#[derive(Debug, Clone, PartialEq)]
pub struct Listener {
    name: ResourceName,
    load_balancer_arn: Output<String>,
    /// Port accepting traffic.
    pub port: u16,
    /// Target group receiving every request.
    pub forward_to: ResourceName,
    target_group_arn: Output<String>,
}

impl Resource for Listener {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Listener
    }

    fn properties(&self) -> Properties {
        properties([
            ("load_balancer_arn", self.load_balancer_arn.clone().into()),
            ("protocol", Expr::literal("HTTP")),
            ("port", Expr::literal(self.port)),
            (
                "default_actions",
                Expr::list([Expr::object([
                    ("type", Expr::literal("forward")),
                    ("target_group_arn", self.target_group_arn.clone().into()),
                ])]),
            ),
        ])
    }
}

/// The load balancer and everything attached to it.
#[derive(Debug, Clone, PartialEq)]
pub struct BalancerLayer {
    /// Backend pool.
    pub target_group: TargetGroup,
    /// Load balancer.
    pub load_balancer: LoadBalancer,
    /// Listener.
    pub listener: Listener,
}

/// Builds the public load balancer in front of the task.
#[must_use]
pub fn bind_load_balancer(
    network: &NetworkContext,
    edge: &SecurityBoundary,
    task: &TaskDefinition,
) -> BalancerLayer {
    let port = task.container.listen_port;
    let target_group = TargetGroup {
        name: ResourceName::new("app-target-group"),
        protocol: "HTTP".to_string(),
        port,
        network_id: network.network_id(),
        target_type: TargetType::for_network_mode(task.network_mode),
        health_check: HealthCheck::liveness(port),
    };

    let load_balancer = LoadBalancer {
        name: ResourceName::new("app-lb"),
        scheme: Scheme::Public,
        boundary: edge.reference(),
        subnets: network.subnet_ids(),
    };

    let listener = Listener {
        name: ResourceName::new("app-listener"),
        load_balancer_arn: load_balancer.arn(),
        port: LISTENER_PORT,
        forward_to: target_group.name().clone(),
        target_group_arn: target_group.arn(),
    };

    tracing::debug!(
        port,
        subnets = network.subnet_count(),
        target_type = target_group.target_type.as_str(),
        "bound load balancer"
    );
    BalancerLayer {
        target_group,
        load_balancer,
        listener,
    }
}
