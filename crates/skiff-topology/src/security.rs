//! Security boundaries.
//!
//! Two boundaries guard the deployment. `edge` admits public HTTP traffic to
//! the load balancer; `compute` admits traffic to the container port only
//! from members of `edge`. The compute rule names `edge` through a
//! [`BoundaryRef`], which can only be obtained from an existing
//! [`SecurityBoundary`], so the trust relation is an edge in the graph and
//! not a copied identifier.

use std::fmt;

use serde::Serialize;
use skiff_common::constants::{ANY_CIDR, LISTENER_PORT};
use skiff_common::types::{ResourceKind, ResourceName};

use crate::network::NetworkContext;
use crate::output::{Expr, Output};
use crate::resource::{Properties, Resource, properties};

/// Logical name of the public-facing boundary.
pub const EDGE_BOUNDARY: &str = "alb-sg";
/// Logical name of the container-facing boundary.
pub const COMPUTE_BOUNDARY: &str = "task-sg";

/// Traffic direction of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Traffic entering the boundary.
    Ingress,
    /// Traffic leaving the boundary.
    Egress,
}

/// Protocol matched by a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Protocol {
    /// TCP only.
    #[serde(rename = "tcp")]
    Tcp,
    /// Every protocol.
    #[serde(rename = "-1")]
    All,
}

impl Protocol {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::All => "-1",
        }
    }
}

/// Typed reference to a declared boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryRef {
    name: ResourceName,
    id: Output<String>,
}

impl BoundaryRef {
    /// Logical name of the referenced boundary.
    #[must_use]
    pub const fn name(&self) -> &ResourceName {
        &self.name
    }

    /// Deferred identifier of the referenced boundary.
    #[must_use]
    pub const fn id(&self) -> &Output<String> {
        &self.id
    }
}

/// Where the traffic matched by a rule comes from (or goes to).
#[derive(Debug, Clone, PartialEq)]
pub enum RuleSource {
    /// An address block.
    Cidr(String),
    /// Members of another boundary.
    Boundary(BoundaryRef),
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cidr(cidr) => write!(f, "{cidr}"),
            Self::Boundary(b) => write!(f, "{}", b.name),
        }
    }
}

/// One traffic rule.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficRule {
    /// Direction.
    pub direction: Direction,
    /// Protocol.
    pub protocol: Protocol,
    /// First port of the range.
    pub from_port: u16,
    /// Last port of the range.
    pub to_port: u16,
    /// Peer of the rule.
    pub source: RuleSource,
}

impl TrafficRule {
    /// Admits TCP traffic on one port from an address block.
    pub fn tcp_from_cidr(port: u16, cidr: impl Into<String>) -> Self {
        Self {
            direction: Direction::Ingress,
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            source: RuleSource::Cidr(cidr.into()),
        }
    }

    /// Admits TCP traffic on one port from members of another boundary.
    #[must_use]
    pub fn tcp_from_boundary(port: u16, boundary: BoundaryRef) -> Self {
        Self {
            direction: Direction::Ingress,
            protocol: Protocol::Tcp,
            from_port: port,
            to_port: port,
            source: RuleSource::Boundary(boundary),
        }
    }

    /// Lets every outbound packet through.
    #[must_use]
    pub fn egress_anywhere() -> Self {
        Self {
            direction: Direction::Egress,
            protocol: Protocol::All,
            from_port: 0,
            to_port: 0,
            source: RuleSource::Cidr(ANY_CIDR.to_string()),
        }
    }

    /// Returns `true` if the rule matches every protocol, port and address.
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        self.protocol == Protocol::All && matches!(&self.source, RuleSource::Cidr(c) if c == ANY_CIDR)
    }

    /// Returns `true` if the rule matches exactly one port.
    #[must_use]
    pub const fn is_single_port(&self, port: u16) -> bool {
        self.from_port == port && self.to_port == port
    }

    fn to_expr(&self) -> Expr {
        let peer = match &self.source {
            RuleSource::Cidr(cidr) => ("cidr_blocks", Expr::list([Expr::literal(cidr.as_str())])),
            RuleSource::Boundary(b) => ("security_groups", Expr::list([b.id.clone().into()])),
        };
        Expr::object([
            ("protocol", Expr::literal(self.protocol.as_str())),
            ("from_port", Expr::literal(self.from_port)),
            ("to_port", Expr::literal(self.to_port)),
            peer,
        ])
    }
}

/// A named set of traffic rules.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityBoundary {
    name: ResourceName,
    network_id: Output<String>,
    /// Rules in declaration order.
    pub rules: Vec<TrafficRule>,
}

impl SecurityBoundary {
    /// Creates an empty boundary in a network.
    #[must_use]
    pub fn new(name: &str, network: &NetworkContext) -> Self {
        Self {
            name: ResourceName::new(name),
            network_id: network.network_id(),
            rules: Vec::new(),
        }
    }

    /// Appends a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: TrafficRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Deferred identifier assigned by the platform.
    #[must_use]
    pub fn id(&self) -> Output<String> {
        self.attr("id")
    }

    /// Typed reference used by rules and attachments naming this boundary.
    #[must_use]
    pub fn reference(&self) -> BoundaryRef {
        BoundaryRef {
            name: self.name.clone(),
            id: self.id(),
        }
    }

    /// Ingress rules.
    pub fn ingress(&self) -> impl Iterator<Item = &TrafficRule> {
        self.rules.iter().filter(|r| r.direction == Direction::Ingress)
    }

    /// Egress rules.
    pub fn egress(&self) -> impl Iterator<Item = &TrafficRule> {
        self.rules.iter().filter(|r| r.direction == Direction::Egress)
    }

    /// Returns `true` if some egress rule lets everything out.
    #[must_use]
    pub fn has_unrestricted_egress(&self) -> bool {
        self.egress().any(TrafficRule::is_unrestricted)
    }
}

impl Resource for SecurityBoundary {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::SecurityBoundary
    }

    fn properties(&self) -> Properties {
        properties([
            ("network_id", self.network_id.clone().into()),
            ("ingress", Expr::list(self.ingress().map(TrafficRule::to_expr))),
            ("egress", Expr::list(self.egress().map(TrafficRule::to_expr))),
        ])
    }
}

/// The two boundaries of a deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityBoundaries {
    /// Public-facing boundary around the load balancer.
    pub edge: SecurityBoundary,
    /// Container-facing boundary around the tasks.
    pub compute: SecurityBoundary,
}

/// Builds the `edge` and `compute` boundaries for a container port.
#[must_use]
pub fn build_boundaries(network: &NetworkContext, container_port: u16) -> SecurityBoundaries {
    let edge = SecurityBoundary::new(EDGE_BOUNDARY, network)
        .with_rule(TrafficRule::tcp_from_cidr(LISTENER_PORT, ANY_CIDR))
        .with_rule(TrafficRule::egress_anywhere());

    let compute = SecurityBoundary::new(COMPUTE_BOUNDARY, network)
        .with_rule(TrafficRule::tcp_from_boundary(container_port, edge.reference()))
        .with_rule(TrafficRule::egress_anywhere());

    tracing::debug!(
        edge = %edge.name,
        compute = %compute.name,
        port = container_port,
        "built security boundaries"
    );
    SecurityBoundaries { edge, compute }
}
