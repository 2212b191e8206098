//! Cross-entity invariants of an assembled topology.
//!
//! Builders derive related fields from one source, so on a freshly
//! assembled topology every check here holds. The validator exists for
//! topologies that were modified after assembly and as the executable
//! statement of what "consistent" means.
//!
//! # Checks performed
//!
//! 1. The container port, target group port, health-check port, service
//!    attachment port and compute ingress port are equal.
//! 2. Every compute ingress rule admits traffic from the edge boundary only.
//! 3. The edge boundary's egress is unrestricted.
//! 4. Per-task-IP networking is paired with an `ip` target group.
//! 5. The health check times out before the next probe starts.
//! 6. The task size is one the platform accepts.
//! 7. The identity trusts the execution and scheduling principals and
//!    carries the execution and registry read-only policies.
//! 8. The gateway integration reads the load balancer's DNS name.

use skiff_common::constants::{
    EVENT_SCHEDULER_PRINCIPAL, REGISTRY_READ_ONLY_POLICY_ARN, TASK_EXECUTION_POLICY_ARN,
    TASK_EXECUTION_PRINCIPAL,
};
use skiff_common::error::{Result, SkiffError};

use crate::assembler::Topology;
use crate::balancer::TargetType;
use crate::compute::is_valid_task_size;
use crate::resource::Resource;
use crate::security::RuleSource;

/// Validates a topology for cross-entity consistency.
///
/// # Errors
///
/// Returns the first violated invariant, naming the resource and field.
pub fn validate(topology: &Topology) -> Result<()> {
    tracing::debug!("validating topology");
    check_port_agreement(topology)?;
    check_compute_ingress(topology)?;
    check_edge_egress(topology)?;
    check_target_type(topology)?;
    check_health_check(topology)?;
    check_task_size(topology)?;
    check_identity(topology)?;
    check_gateway_target(topology)?;
    Ok(())
}

fn check_port_agreement(t: &Topology) -> Result<()> {
    let port = t.compute.task.container.listen_port;
    let tg = &t.balancer.target_group;
    if tg.port != port {
        return Err(mismatch(tg.name().as_str(), "port", tg.port, port));
    }
    if tg.health_check.port != port {
        return Err(mismatch(
            tg.name().as_str(),
            "health_check.port",
            tg.health_check.port,
            port,
        ));
    }
    if t.service.target.container_port != port {
        return Err(mismatch(
            t.service.name().as_str(),
            "load_balancers.container_port",
            t.service.target.container_port,
            port,
        ));
    }
    for rule in t.security.compute.ingress() {
        if !rule.is_single_port(port) {
            return Err(SkiffError::topology(
                t.security.compute.name().as_str(),
                "ingress.port",
                format!(
                    "admits {}-{}, container listens on {port}",
                    rule.from_port, rule.to_port
                ),
            ));
        }
    }
    Ok(())
}

fn mismatch(resource: &str, field: &str, actual: u16, expected: u16) -> SkiffError {
    SkiffError::topology(
        resource,
        field,
        format!("is {actual}, container listens on {expected}"),
    )
}

fn check_compute_ingress(t: &Topology) -> Result<()> {
    let compute = &t.security.compute;
    let mut any = false;
    for rule in compute.ingress() {
        any = true;
        match &rule.source {
            RuleSource::Boundary(b) if b.name() == t.security.edge.name() => {}
            other => {
                return Err(SkiffError::topology(
                    compute.name().as_str(),
                    "ingress.source",
                    format!("admits {other}, only {} may reach tasks", t.security.edge.name()),
                ));
            }
        }
    }
    if !any {
        return Err(SkiffError::topology(
            compute.name().as_str(),
            "ingress",
            "no rule admits the load balancer",
        ));
    }
    Ok(())
}

fn check_edge_egress(t: &Topology) -> Result<()> {
    if t.security.edge.has_unrestricted_egress() {
        Ok(())
    } else {
        Err(SkiffError::topology(
            t.security.edge.name().as_str(),
            "egress",
            "must allow all outbound traffic",
        ))
    }
}

fn check_target_type(t: &Topology) -> Result<()> {
    let tg = &t.balancer.target_group;
    if t.service.network_mode.assigns_task_ip() && tg.target_type != TargetType::Ip {
        return Err(SkiffError::topology(
            tg.name().as_str(),
            "target_type",
            format!(
                "must be \"ip\" for tasks in {} network mode",
                t.service.network_mode.as_str()
            ),
        ));
    }
    if t.service.network_mode != t.compute.task.network_mode {
        return Err(SkiffError::topology(
            t.service.name().as_str(),
            "network_mode",
            "differs from the task definition",
        ));
    }
    Ok(())
}

fn check_health_check(t: &Topology) -> Result<()> {
    let tg = &t.balancer.target_group;
    let hc = &tg.health_check;
    if hc.timeout_secs >= hc.interval_secs {
        return Err(SkiffError::topology(
            tg.name().as_str(),
            "health_check.timeout",
            format!(
                "{}s is not shorter than the {}s interval",
                hc.timeout_secs, hc.interval_secs
            ),
        ));
    }
    Ok(())
}

fn check_task_size(t: &Topology) -> Result<()> {
    let task = &t.compute.task;
    if !is_valid_task_size(task.cpu_units, task.memory_mib) {
        return Err(SkiffError::topology(
            task.name().as_str(),
            "memory",
            format!(
                "{} MiB is not a valid size for {} CPU units",
                task.memory_mib, task.cpu_units
            ),
        ));
    }
    let c = &task.container;
    if c.cpu_units > task.cpu_units || c.memory_mib > task.memory_mib {
        return Err(SkiffError::topology(
            task.name().as_str(),
            "containers",
            "container reserves more than the task provides",
        ));
    }
    Ok(())
}

fn check_identity(t: &Topology) -> Result<()> {
    let identity = &t.compute.identity;
    for principal in [TASK_EXECUTION_PRINCIPAL, EVENT_SCHEDULER_PRINCIPAL] {
        if !identity.trusted_principals().contains(principal) {
            return Err(SkiffError::topology(
                identity.name().as_str(),
                "assume_role_policy",
                format!("does not trust {principal}"),
            ));
        }
    }
    for policy in [TASK_EXECUTION_POLICY_ARN, REGISTRY_READ_ONLY_POLICY_ARN] {
        if !t.compute.attachments.iter().any(|a| a.policy_arn == policy) {
            return Err(SkiffError::topology(
                identity.name().as_str(),
                "policies",
                format!("missing {policy}"),
            ));
        }
    }
    Ok(())
}

fn check_gateway_target(t: &Topology) -> Result<()> {
    let integration = &t.gateway.integration;
    if integration
        .uri
        .dependencies()
        .contains(t.balancer.load_balancer.name())
    {
        Ok(())
    } else {
        Err(SkiffError::topology(
            integration.name().as_str(),
            "integration_uri",
            "must be derived from the load balancer's DNS name",
        ))
    }
}
