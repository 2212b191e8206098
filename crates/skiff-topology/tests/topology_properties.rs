//! Property and scenario tests for topology assembly.
//!
//! Every generated (service name, image tag, network) triple must assemble
//! into a topology whose cross-entity invariants hold, and assembling twice
//! must give the same declarations.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::HashMap;

use proptest::prelude::*;
use serde_json::Value;
use skiff_common::config::{DeployConfig, DeployInputs};
use skiff_common::types::ResourceName;
use skiff_topology::Topology;
use skiff_topology::balancer::TargetType;
use skiff_topology::network::{FixedNetwork, NetworkContext};
use skiff_topology::output::AttributeSource;
use skiff_topology::resource::Resource;
use skiff_topology::security::RuleSource;

fn assemble(service: &str, tag: &str, subnets: usize) -> Topology {
    let inputs = DeployInputs::new(
        service,
        format!("123456789012.dkr.ecr.us-east-1.amazonaws.com/{service}"),
        tag,
    )
    .expect("valid inputs");
    let subnet_ids = (0..subnets).map(|i| format!("subnet-{i:04}")).collect();
    let network = NetworkContext::new("vpc-0abc", subnet_ids).expect("valid network");
    Topology::assemble(&inputs, &FixedNetwork::new(network)).expect("assembles")
}

fn arb_service() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{1,30}"
}

fn arb_tag() -> impl Strategy<Value = String> {
    "[A-Za-z0-9][A-Za-z0-9._-]{0,20}"
}

proptest! {
    /// Assembling the same inputs twice yields identical declarations.
    #[test]
    fn assembly_is_deterministic(service in arb_service(), tag in arb_tag(), subnets in 1usize..6) {
        let a = assemble(&service, &tag, subnets);
        let b = assemble(&service, &tag, subnets);
        prop_assert_eq!(a.declarations(), b.declarations());
        let order_a = a.graph().unwrap().resolve_order().unwrap();
        let order_b = b.graph().unwrap().resolve_order().unwrap();
        prop_assert_eq!(order_a, order_b);
    }

    /// Only the edge boundary may reach the container port.
    #[test]
    fn compute_ingress_comes_from_edge(service in arb_service(), tag in arb_tag()) {
        let t = assemble(&service, &tag, 2);
        for rule in t.security.compute.ingress() {
            match &rule.source {
                RuleSource::Boundary(b) => prop_assert_eq!(b.name(), t.security.edge.name()),
                RuleSource::Cidr(c) => prop_assert!(false, "compute ingress opened to {}", c),
            }
        }
    }

    /// Per-task networking always pairs with ip targets.
    #[test]
    fn per_task_ip_means_ip_targets(service in arb_service(), tag in arb_tag()) {
        let t = assemble(&service, &tag, 3);
        prop_assert!(t.service.network_mode.assigns_task_ip());
        prop_assert_eq!(t.balancer.target_group.target_type, TargetType::Ip);
    }

    /// The container port is the one port every layer agrees on.
    #[test]
    fn listen_port_is_shared(service in arb_service(), tag in arb_tag()) {
        let t = assemble(&service, &tag, 1);
        let port = t.compute.task.container.listen_port;
        prop_assert_eq!(t.balancer.target_group.port, port);
        prop_assert_eq!(t.service.target.container_port, port);
        for rule in t.security.compute.ingress() {
            prop_assert!(rule.is_single_port(port));
        }
    }

    /// Health checks time out before the next probe.
    #[test]
    fn health_check_timeout_below_interval(service in arb_service(), tag in arb_tag()) {
        let t = assemble(&service, &tag, 1);
        let hc = &t.balancer.target_group.health_check;
        prop_assert!(hc.timeout_secs < hc.interval_secs);
    }

    /// The graph always orders the edge boundary before the compute boundary.
    #[test]
    fn edge_precedes_compute(service in arb_service(), tag in arb_tag(), subnets in 1usize..4) {
        let t = assemble(&service, &tag, subnets);
        let graph = t.graph().unwrap();
        prop_assert!(graph.depends_on(t.security.compute.name(), t.security.edge.name()));
        prop_assert!(graph.depends_on(t.service.name(), t.balancer.listener.name()));
    }
}

/// Attribute values a provider would report for the scenario stack.
struct Provisioned(HashMap<(String, String), Value>);

impl Provisioned {
    fn scenario() -> Self {
        let mut attrs = HashMap::new();
        let mut set = |r: &str, a: &str, v: &str| {
            let _ = attrs.insert((r.to_string(), a.to_string()), Value::from(v));
        };
        set(
            "ts-express-server",
            "repository_url",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/ts-express-server",
        );
        set("ecs-task-log-group", "name", "ecs-task-log-group-7f3a");
        set("ecs-task-execution-role", "arn", "arn:aws:iam::123456789012:role/exec-9c1");
        set("api-gateway", "api_endpoint", "https://k2j4h5.execute-api.us-east-1.amazonaws.com");
        set("api-stage", "name", "prod");
        Self(attrs)
    }
}

impl AttributeSource for Provisioned {
    fn attribute(&self, resource: &ResourceName, attribute: &str) -> Option<Value> {
        self.0
            .get(&(resource.as_str().to_string(), attribute.to_string()))
            .cloned()
    }
}

#[test]
fn ts_express_server_scenario() {
    let t = assemble("ts-express-server", "v1", 3);
    let live = Provisioned::scenario();

    assert_eq!(t.registry.name().as_str(), "ts-express-server");
    let image = t.compute.task.container.image.expr().resolve(&live).unwrap();
    assert_eq!(
        image,
        "123456789012.dkr.ecr.us-east-1.amazonaws.com/ts-express-server:v1"
    );
    assert_eq!(t.service.desired_count, 1);
    assert_eq!(t.gateway.route.route_key, "ANY /{proxy+}");

    let endpoint = t.outputs.api_endpoint.expr().resolve(&live).unwrap();
    assert_eq!(endpoint, "https://k2j4h5.execute-api.us-east-1.amazonaws.com/prod");
    let repo = t.outputs.repository_uri.expr().resolve(&live).unwrap();
    assert_eq!(repo, "123456789012.dkr.ecr.us-east-1.amazonaws.com/ts-express-server");
}

#[test]
fn task_definition_resolves_once_its_inputs_exist() {
    let t = assemble("ts-express-server", "v1", 2);
    let decl = t.compute.task.declare();
    let resolved = decl.resolve(&Provisioned::scenario()).unwrap();
    let container = &resolved["containers"][0];
    assert_eq!(container["log_configuration"]["options"]["awslogs-group"], "ecs-task-log-group-7f3a");
    assert_eq!(container["port_mappings"][0]["container_port"], 8080);
    assert!(container.get("health_check").is_none());
    assert_eq!(resolved["network_mode"], "awsvpc");
}

#[test]
fn missing_image_tag_stops_before_assembly() {
    let config = DeployConfig {
        image_uri: Some("123456789012.dkr.ecr.us-east-1.amazonaws.com/ts-express-server".into()),
        ..DeployConfig::default()
    };
    let err = config.require().expect_err("tag missing");
    assert!(err.is_config(), "got: {err}");
}
