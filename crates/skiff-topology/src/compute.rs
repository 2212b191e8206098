//! Compute layer: log sink, task identity, container run specification,
//! cluster, and the service keeping the task running.

use std::collections::BTreeSet;

use serde_json::json;
use skiff_common::config::DeployInputs;
use skiff_common::constants::{
    CLUSTER_NAME, CONTAINER_NAME, CONTAINER_PORT, DESIRED_COUNT, EVENT_ACTIONS_POLICY_ARN,
    EVENT_SCHEDULER_PRINCIPAL, LOG_RETENTION_DAYS, LOG_STREAM_PREFIX,
    REGISTRY_READ_ONLY_POLICY_ARN, TASK_CPU_UNITS, TASK_EXECUTION_POLICY_ARN,
    TASK_EXECUTION_PRINCIPAL, TASK_MEMORY_MIB,
};
use skiff_common::error::{Result, SkiffError};
use skiff_common::types::{ResourceKind, ResourceName};

use crate::balancer::BalancerLayer;
use crate::network::NetworkContext;
use crate::output::{Expr, Output};
use crate::registry::Registry;
use crate::resource::{Properties, Resource, properties};
use crate::security::{BoundaryRef, SecurityBoundary};

/// How tasks are attached to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Each task gets its own network interface and address.
    AwsVpc,
    /// Tasks share the host's network through a bridge.
    Bridge,
    /// Tasks use the host's network stack directly.
    Host,
}

impl NetworkMode {
    /// Returns `true` if every task gets its own address.
    #[must_use]
    pub const fn assigns_task_ip(self) -> bool {
        matches!(self, Self::AwsVpc)
    }

    /// Platform spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AwsVpc => "awsvpc",
            Self::Bridge => "bridge",
            Self::Host => "host",
        }
    }
}

/// Capacity the service launches tasks on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Serverless capacity.
    Fargate,
    /// Self-managed instances.
    Ec2,
}

impl LaunchMode {
    /// Platform spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fargate => "FARGATE",
            Self::Ec2 => "EC2",
        }
    }
}

/// Returns `true` if `(cpu_units, memory_mib)` is a size serverless tasks accept.
#[must_use]
pub fn is_valid_task_size(cpu_units: u32, memory_mib: u32) -> bool {
    let stepped = |min: u32, max: u32, step: u32| {
        (min..=max).contains(&memory_mib) && memory_mib % step == 0
    };
    match cpu_units {
        256 => matches!(memory_mib, 512 | 1024 | 2048),
        512 => stepped(1024, 4096, 1024),
        1024 => stepped(2048, 8192, 1024),
        2048 => stepped(4096, 16384, 1024),
        4096 => stepped(8192, 30720, 1024),
        8192 => stepped(16384, 61440, 4096),
        16384 => stepped(32768, 122_880, 8192),
        _ => false,
    }
}

/// Forms the image reference `<repository-url>:<tag>`.
///
/// # Errors
///
/// Returns a configuration error if the tag is empty.
pub fn image_reference(repository_url: Output<String>, tag: &str) -> Result<Output<String>> {
    if tag.trim().is_empty() {
        return Err(SkiffError::config("image tag must not be empty"));
    }
    Ok(Output::concat([
        repository_url,
        Output::from(":"),
        Output::from(tag),
    ]))
}

/// Log group receiving the container's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogGroup {
    name: ResourceName,
    /// Days log events are kept.
    pub retention_days: u32,
}

impl LogGroup {
    /// Platform-assigned group name.
    #[must_use]
    pub fn group_name(&self) -> Output<String> {
        self.attr("name")
    }
}

impl Resource for LogGroup {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::LogGroup
    }

    fn properties(&self) -> Properties {
        properties([("retention_in_days", Expr::literal(self.retention_days))])
    }
}

/// Role assumed by running tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: ResourceName,
    trusted_principals: BTreeSet<String>,
    policies: Vec<String>,
}

impl ServiceIdentity {
    /// Creates a role trusting the given service principals.
    pub fn new<S: Into<String>>(name: &str, principals: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: ResourceName::new(name),
            trusted_principals: principals.into_iter().map(Into::into).collect(),
            policies: Vec::new(),
        }
    }

    /// Appends a managed policy. Attaching a policy twice is a no-op;
    /// returns whether the policy was newly added.
    pub fn attach(&mut self, policy_arn: impl Into<String>) -> bool {
        let policy_arn = policy_arn.into();
        if self.policies.contains(&policy_arn) {
            return false;
        }
        self.policies.push(policy_arn);
        true
    }

    /// Trusted service principals.
    #[must_use]
    pub const fn trusted_principals(&self) -> &BTreeSet<String> {
        &self.trusted_principals
    }

    /// Attached policies in attachment order.
    #[must_use]
    pub fn policies(&self) -> &[String] {
        &self.policies
    }

    /// Deferred role ARN.
    #[must_use]
    pub fn arn(&self) -> Output<String> {
        self.attr("arn")
    }

    /// One independent attachment resource per policy, in order.
    #[must_use]
    pub fn attachments(&self) -> Vec<PolicyAttachment> {
        self.policies
            .iter()
            .map(|policy_arn| {
                let short = policy_arn.rsplit('/').next().unwrap_or(policy_arn.as_str());
                PolicyAttachment {
                    name: ResourceName::new(format!("{}-{short}", self.name)),
                    role: self.attr("name"),
                    policy_arn: policy_arn.clone(),
                }
            })
            .collect()
    }

    fn assume_role_policy(&self) -> serde_json::Value {
        json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Action": "sts:AssumeRole",
                "Principal": { "Service": self.trusted_principals },
            }],
        })
    }
}

impl Resource for ServiceIdentity {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ServiceIdentity
    }

    fn properties(&self) -> Properties {
        properties([("assume_role_policy", Expr::literal(self.assume_role_policy()))])
    }
}

/// Attachment of one managed policy to a role.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyAttachment {
    name: ResourceName,
    role: Output<String>,
    /// Attached policy.
    pub policy_arn: String,
}

impl Resource for PolicyAttachment {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::PolicyAttachment
    }

    fn properties(&self) -> Properties {
        properties([
            ("role", self.role.clone().into()),
            ("policy_arn", Expr::literal(self.policy_arn.as_str())),
        ])
    }
}

/// Run specification of the single container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// `<repository-url>:<tag>`.
    pub image: Output<String>,
    /// CPU units.
    pub cpu_units: u32,
    /// Memory in MiB.
    pub memory_mib: u32,
    /// Port the container listens on.
    pub listen_port: u16,
    /// Log group the container writes to.
    pub log_sink: Output<String>,
    /// Region of the log group.
    pub log_region: String,
    /// Role the container runs as.
    pub identity: Output<String>,
}

impl ContainerSpec {
    fn to_expr(&self) -> Expr {
        Expr::object([
            ("name", Expr::literal(self.name.as_str())),
            ("image", self.image.clone().into()),
            ("essential", Expr::literal(true)),
            ("cpu", Expr::literal(self.cpu_units)),
            ("memory", Expr::literal(self.memory_mib)),
            (
                "port_mappings",
                Expr::list([Expr::object([
                    ("container_port", Expr::literal(self.listen_port)),
                    ("host_port", Expr::literal(self.listen_port)),
                    ("protocol", Expr::literal("tcp")),
                ])]),
            ),
            (
                "log_configuration",
                Expr::object([
                    ("log_driver", Expr::literal("awslogs")),
                    (
                        "options",
                        Expr::object([
                            ("awslogs-group", self.log_sink.clone().into()),
                            ("awslogs-region", Expr::literal(self.log_region.as_str())),
                            ("awslogs-stream-prefix", Expr::literal(LOG_STREAM_PREFIX)),
                        ]),
                    ),
                ]),
            ),
        ])
    }
}

/// Task definition wrapping the container spec.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinition {
    name: ResourceName,
    /// Revision family.
    pub family: String,
    /// Task-level CPU units.
    pub cpu_units: u32,
    /// Task-level memory in MiB.
    pub memory_mib: u32,
    /// Network mode of every task.
    pub network_mode: NetworkMode,
    /// Capacity the task is compatible with.
    pub launch_mode: LaunchMode,
    /// The container.
    pub container: ContainerSpec,
    role_arn: Output<String>,
}

impl TaskDefinition {
    /// Deferred ARN of the registered revision.
    #[must_use]
    pub fn arn(&self) -> Output<String> {
        self.attr("arn")
    }
}

impl Resource for TaskDefinition {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::TaskDefinition
    }

    fn properties(&self) -> Properties {
        properties([
            ("family", Expr::literal(self.family.as_str())),
            ("cpu", Expr::literal(self.cpu_units.to_string())),
            ("memory", Expr::literal(self.memory_mib.to_string())),
            ("network_mode", Expr::literal(self.network_mode.as_str())),
            (
                "requires_compatibilities",
                Expr::list([Expr::literal(self.launch_mode.as_str())]),
            ),
            ("task_role_arn", self.role_arn.clone().into()),
            ("execution_role_arn", self.role_arn.clone().into()),
            ("containers", Expr::list([self.container.to_expr()])),
        ])
    }
}

/// Compute cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    name: ResourceName,
    /// Platform-visible cluster name.
    pub cluster_name: String,
}

impl Cluster {
    /// Deferred cluster ARN.
    #[must_use]
    pub fn arn(&self) -> Output<String> {
        self.attr("arn")
    }
}

impl Resource for Cluster {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Cluster
    }

    fn properties(&self) -> Properties {
        properties([("name", Expr::literal(self.cluster_name.as_str()))])
    }
}

/// Link from the service to the target group its tasks register in.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetAttachment {
    /// Logical name of the target group.
    pub target_group: ResourceName,
    /// Deferred target group ARN.
    pub target_group_arn: Output<String>,
    /// Container receiving traffic.
    pub container_name: String,
    /// Port receiving traffic.
    pub container_port: u16,
}

/// Service keeping `desired_count` tasks running on the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterBinding {
    name: ResourceName,
    cluster: Output<String>,
    task_definition: Output<String>,
    /// Number of tasks kept running.
    pub desired_count: u32,
    /// Capacity tasks launch on.
    pub launch_mode: LaunchMode,
    /// Network mode of the bound task definition.
    pub network_mode: NetworkMode,
    subnets: Output<Vec<String>>,
    /// Boundary the tasks are placed in.
    pub boundary: BoundaryRef,
    /// Whether tasks get a public address.
    pub assign_public_ip: bool,
    /// Load balancer attachment.
    pub target: TargetAttachment,
    after: BTreeSet<ResourceName>,
}

impl Resource for ClusterBinding {
    fn name(&self) -> &ResourceName {
        &self.name
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ClusterBinding
    }

    fn properties(&self) -> Properties {
        properties([
            ("cluster", self.cluster.clone().into()),
            ("task_definition", self.task_definition.clone().into()),
            ("desired_count", Expr::literal(self.desired_count)),
            ("launch_type", Expr::literal(self.launch_mode.as_str())),
            (
                "network_configuration",
                Expr::object([
                    ("subnets", self.subnets.clone().into()),
                    ("assign_public_ip", Expr::literal(self.assign_public_ip)),
                    ("security_groups", Expr::list([self.boundary.id().clone().into()])),
                ]),
            ),
            (
                "load_balancers",
                Expr::list([Expr::object([
                    ("target_group_arn", self.target.target_group_arn.clone().into()),
                    ("container_name", Expr::literal(self.target.container_name.as_str())),
                    ("container_port", Expr::literal(self.target.container_port)),
                ])]),
            ),
        ])
    }

    fn depends_on(&self) -> BTreeSet<ResourceName> {
        self.after.clone()
    }
}

/// Everything the service needs before it can be bound to a load balancer.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeLayer {
    /// Log sink of the container.
    pub log_group: LogGroup,
    /// Role of the tasks.
    pub identity: ServiceIdentity,
    /// Policy attachments of the role, in order.
    pub attachments: Vec<PolicyAttachment>,
    /// Task definition.
    pub task: TaskDefinition,
    /// Cluster.
    pub cluster: Cluster,
}

impl ComputeLayer {
    /// Builds the compute definitions for a deployment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the image tag is empty, or a
    /// topology error if the task size is not one the platform accepts.
    pub fn build(inputs: &DeployInputs, registry: &Registry) -> Result<Self> {
        let image = image_reference(registry.repository_url(), inputs.image_tag())?;

        let log_group = LogGroup {
            name: ResourceName::new("ecs-task-log-group"),
            retention_days: LOG_RETENTION_DAYS,
        };

        let mut identity = ServiceIdentity::new(
            "ecs-task-execution-role",
            [TASK_EXECUTION_PRINCIPAL, EVENT_SCHEDULER_PRINCIPAL],
        );
        for policy in [
            TASK_EXECUTION_POLICY_ARN,
            EVENT_ACTIONS_POLICY_ARN,
            REGISTRY_READ_ONLY_POLICY_ARN,
        ] {
            let _ = identity.attach(policy);
        }
        let attachments = identity.attachments();

        let container = ContainerSpec {
            name: CONTAINER_NAME.to_string(),
            image,
            cpu_units: TASK_CPU_UNITS,
            memory_mib: TASK_MEMORY_MIB,
            listen_port: CONTAINER_PORT,
            log_sink: log_group.group_name(),
            log_region: inputs.region().to_string(),
            identity: identity.arn(),
        };

        let task = TaskDefinition {
            name: ResourceName::new("task-definition"),
            family: format!("{}-task", inputs.service_name()),
            cpu_units: TASK_CPU_UNITS,
            memory_mib: TASK_MEMORY_MIB,
            network_mode: NetworkMode::AwsVpc,
            launch_mode: LaunchMode::Fargate,
            role_arn: identity.arn(),
            container,
        };
        if !is_valid_task_size(task.cpu_units, task.memory_mib) {
            return Err(SkiffError::topology(
                task.name.as_str(),
                "memory",
                format!(
                    "{} MiB is not a valid size for {} CPU units",
                    task.memory_mib, task.cpu_units
                ),
            ));
        }

        let cluster = Cluster {
            name: ResourceName::new(CLUSTER_NAME),
            cluster_name: CLUSTER_NAME.to_string(),
        };

        tracing::debug!(
            family = %task.family,
            image = %task.container.image,
            policies = identity.policies().len(),
            "built compute layer"
        );

        Ok(Self {
            log_group,
            identity,
            attachments,
            task,
            cluster,
        })
    }

    /// Binds the task to the cluster behind the load balancer.
    ///
    /// The service waits for the listener (tasks cannot register in a target
    /// group no load balancer forwards to) and for every policy attachment.
    #[must_use]
    pub fn bind_service(
        &self,
        network: &NetworkContext,
        boundary: &SecurityBoundary,
        balancer: &BalancerLayer,
    ) -> ClusterBinding {
        let mut after: BTreeSet<ResourceName> = self
            .attachments
            .iter()
            .map(|a| a.name().clone())
            .collect();
        let _ = after.insert(balancer.listener.name().clone());

        ClusterBinding {
            name: ResourceName::new("ecs-service"),
            cluster: self.cluster.arn(),
            task_definition: self.task.arn(),
            desired_count: DESIRED_COUNT,
            launch_mode: self.task.launch_mode,
            network_mode: self.task.network_mode,
            subnets: network.subnet_ids(),
            boundary: boundary.reference(),
            assign_public_ip: true,
            target: TargetAttachment {
                target_group: balancer.target_group.name().clone(),
                target_group_arn: balancer.target_group.arn(),
                container_name: self.task.container.name.clone(),
                container_port: self.task.container.listen_port,
            },
            after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(tag: &str) -> DeployInputs {
        DeployInputs::new(
            "ts-express-server",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/ts-express-server",
            tag,
        )
        .expect("valid inputs")
    }

    #[test]
    fn image_reference_joins_with_colon() {
        let url = Output::<String>::attribute(&ResourceName::new("repo"), "repository_url");
        let image = image_reference(url, "v1").expect("valid");
        assert_eq!(image.to_string(), "${repo.repository_url}:v1");
    }

    #[test]
    fn empty_tag_is_config_error() {
        let url = Output::from("host/repo");
        let err = image_reference(url, "").expect_err("empty tag");
        assert!(err.is_config());
    }

    #[test]
    fn task_sizes_follow_platform_table() {
        assert!(is_valid_task_size(256, 512));
        assert!(is_valid_task_size(1024, 3072));
        assert!(is_valid_task_size(8192, 20480));
        assert!(!is_valid_task_size(256, 4096));
        assert!(!is_valid_task_size(8192, 17408));
        assert!(!is_valid_task_size(300, 512));
    }

    #[test]
    fn identity_trusts_execution_and_scheduler() {
        let layer = ComputeLayer::build(&inputs("v1"), &Registry::for_service("ts-express-server"))
            .expect("builds");
        let principals = layer.identity.trusted_principals();
        assert!(principals.contains(TASK_EXECUTION_PRINCIPAL));
        assert!(principals.contains(EVENT_SCHEDULER_PRINCIPAL));
    }

    #[test]
    fn attachments_keep_order_and_ignore_repeats() {
        let mut identity = ServiceIdentity::new("role", ["a.example.com"]);
        assert!(identity.attach("arn:aws:iam::aws:policy/One"));
        assert!(identity.attach("arn:aws:iam::aws:policy/Two"));
        assert!(!identity.attach("arn:aws:iam::aws:policy/One"));
        let names: Vec<_> = identity
            .attachments()
            .iter()
            .map(|a| a.name().to_string())
            .collect();
        assert_eq!(names, vec!["role-One", "role-Two"]);
    }

    #[test]
    fn attachments_are_independent_of_each_other() {
        let layer = ComputeLayer::build(&inputs("v1"), &Registry::for_service("ts-express-server"))
            .expect("builds");
        assert_eq!(layer.attachments.len(), 3);
        for attachment in &layer.attachments {
            let deps = attachment.declare().dependencies();
            assert_eq!(deps.len(), 1);
            assert!(deps.contains(layer.identity.name()));
        }
    }

    #[test]
    fn container_reads_log_group_and_registry() {
        let registry = Registry::for_service("ts-express-server");
        let layer = ComputeLayer::build(&inputs("v1"), &registry).expect("builds");
        let deps = layer.task.declare().dependencies();
        assert!(deps.contains(layer.log_group.name()));
        assert!(deps.contains(registry.name()));
        assert!(deps.contains(layer.identity.name()));
        assert_eq!(layer.task.container.listen_port, CONTAINER_PORT);
        assert!(layer.task.network_mode.assigns_task_ip());
    }
}
