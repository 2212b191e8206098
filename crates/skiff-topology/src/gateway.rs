//! Public HTTP gateway proxying every request to the load balancer.

use skiff_common::constants::{PAYLOAD_FORMAT_VERSION, PROXY_ROUTE_KEY, STAGE_NAME};
use skiff_common::types::{ResourceKind, ResourceName};

use crate::balancer::LoadBalancer;
use crate::output::{Expr, Output};
use crate::resource::{Properties, Resource, properties};

/// Gateway entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gateway {
    name: ResourceName,
}

impl Gateway {
    /// Deferred gateway id.
    #[must_use]
    pub fn id(&self) -> Output<String> {
        self.attr("id")
    }

    /// Deferred base URL of the gateway.
    #[must_use]
    pub fn api_endpoint(&self) -> Output<String> {
        self.attr("api_endpoint")
    }
}

impl Resource for Gateway {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Gateway
    }

    fn properties(&self) -> Properties {
        properties([("protocol_type", Expr::literal("HTTP"))])
    }
}

/// Deployment stage of the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    name: ResourceName,
    api_id: Output<String>,
    /// Stage name, last segment of the public URL.
    pub stage_name: String,
    /// Whether route changes deploy without an explicit deployment.
    pub auto_deploy: bool,
}

impl Resource for Stage {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::GatewayStage
    }

    fn properties(&self) -> Properties {
        properties([
            ("api_id", self.api_id.clone().into()),
            ("name", Expr::literal(self.stage_name.as_str())),
            ("auto_deploy", Expr::literal(self.auto_deploy)),
        ])
    }
}

/// Proxy integration with the load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct Integration {
    name: ResourceName,
    api_id: Output<String>,
    /// `http://<load-balancer-dns>/{proxy}`.
    pub uri: Output<String>,
    /// HTTP method forwarded.
    pub method: String,
    /// Payload format version.
    pub payload_format_version: String,
}

impl Integration {
    /// Deferred integration id.
    #[must_use]
    pub fn id(&self) -> Output<String> {
        self.attr("id")
    }
}

impl Resource for Integration {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::GatewayIntegration
    }

    fn properties(&self) -> Properties {
        properties([
            ("api_id", self.api_id.clone().into()),
            ("integration_type", Expr::literal("HTTP_PROXY")),
            ("integration_uri", self.uri.clone().into()),
            ("integration_method", Expr::literal(self.method.as_str())),
            (
                "payload_format_version",
                Expr::literal(self.payload_format_version.as_str()),
            ),
        ])
    }
}

/// Route sending matching requests to an integration.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    name: ResourceName,
    api_id: Output<String>,
    /// Method and path pattern.
    pub route_key: String,
    target: Output<String>,
}

impl Resource for Route {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::GatewayRoute
    }

    fn properties(&self) -> Properties {
        properties([
            ("api_id", self.api_id.clone().into()),
            ("route_key", Expr::literal(self.route_key.as_str())),
            ("target", self.target.clone().into()),
        ])
    }
}

/// The gateway and its stage, integration and route.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayLayer {
    /// Entry point.
    pub api: Gateway,
    /// Stage.
    pub stage: Stage,
    /// Integration with the load balancer.
    pub integration: Integration,
    /// Wildcard route.
    pub route: Route,
}

impl GatewayLayer {
    /// Public base URL: gateway endpoint, `/`, stage name.
    #[must_use]
    pub fn endpoint(&self) -> Output<String> {
        Output::concat([self.api.api_endpoint(), Output::from("/"), self.stage.attr("name")])
    }
}

/// Builds a gateway forwarding any method on any path to `load_balancer`.
#[must_use]
pub fn route_to(load_balancer: &LoadBalancer) -> GatewayLayer {
    let api = Gateway {
        name: ResourceName::new("api-gateway"),
    };

    let stage = Stage {
        name: ResourceName::new("api-stage"),
        api_id: api.id(),
        stage_name: STAGE_NAME.to_string(),
        auto_deploy: true,
    };

    let integration = Integration {
        name: ResourceName::new("alb-integration"),
        api_id: api.id(),
        uri: Output::concat([
            Output::from("http://"),
            load_balancer.dns_name(),
            Output::from("/{proxy}"),
        ]),
        method: "ANY".to_string(),
        payload_format_version: PAYLOAD_FORMAT_VERSION.to_string(),
    };

    let route = Route {
        name: ResourceName::new("api-route"),
        api_id: api.id(),
        route_key: PROXY_ROUTE_KEY.to_string(),
        target: Output::concat([Output::from("integrations/"), integration.id()]),
    };

    tracing::debug!(route = %route.route_key, uri = %integration.uri, "built gateway");
    GatewayLayer {
        api,
        stage,
        integration,
        route,
    }
}

#[cfg(test)]
mod tests {
    use skiff_common::config::DeployInputs;

    use super::*;
    use crate::balancer::bind_load_balancer;
    use crate::compute::ComputeLayer;
    use crate::network::NetworkContext;
    use crate::output::AttributeSource;
    use crate::registry::Registry;
    use crate::security::build_boundaries;

    struct Live;

    impl AttributeSource for Live {
        fn attribute(&self, resource: &ResourceName, attribute: &str) -> Option<serde_json::Value> {
            match (resource.as_str(), attribute) {
                ("app-lb", "dns_name") => Some("app-lb-123.elb.amazonaws.com".into()),
                ("api-gateway", "api_endpoint") => {
                    Some("https://abc123.execute-api.us-east-1.amazonaws.com".into())
                }
                ("api-stage", "name") => Some("prod".into()),
                ("alb-integration", "id") => Some("int-42".into()),
                _ => None,
            }
        }
    }

    fn lb() -> LoadBalancer {
        let network = NetworkContext::new("vpc-1", vec!["subnet-a".into()]).expect("network");
        let edge = build_boundaries(&network, 8080).edge;
        let inputs = DeployInputs::new("api", "host/api", "v1").expect("inputs");
        let compute = ComputeLayer::build(&inputs, &Registry::for_service("api")).expect("compute");
        bind_load_balancer(&network, &edge, &compute.task).load_balancer
    }

    #[test]
    fn integration_targets_load_balancer_dns() {
        let load_balancer = lb();
        let gateway = route_to(&load_balancer);
        assert!(gateway.integration.uri.dependencies().contains(load_balancer.name()));
        let uri = gateway.integration.uri.expr().resolve(&Live).expect("resolves");
        assert_eq!(uri, "http://app-lb-123.elb.amazonaws.com/{proxy}");
        assert_eq!(gateway.integration.payload_format_version, "1.0");
        assert_eq!(gateway.integration.method, "ANY");
    }

    #[test]
    fn route_is_wildcard_to_integration() {
        let gateway = route_to(&lb());
        assert_eq!(gateway.route.route_key, "ANY /{proxy+}");
        let target = gateway.route.declare();
        let resolved = target.property("target").expect("target").resolve(&Live).expect("ok");
        assert_eq!(resolved, "integrations/int-42");
    }

    #[test]
    fn endpoint_appends_stage() {
        let gateway = route_to(&lb());
        let url = gateway.endpoint().expr().resolve(&Live).expect("resolves");
        assert_eq!(url, "https://abc123.execute-api.us-east-1.amazonaws.com/prod");
    }
}
