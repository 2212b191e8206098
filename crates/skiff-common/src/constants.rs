//! Deployment policy constants and default paths.
//!
//! The port, sizing and health-check values here are policy, not user input:
//! the topology builders read them directly and the validator checks that
//! every entity derived from them still agrees.

/// Port the container listens on. Shared by the target group, the compute
/// boundary's ingress rule and the service's load-balancer attachment.
pub const CONTAINER_PORT: u16 = 8080;

/// Port the public listener accepts traffic on.
pub const LISTENER_PORT: u16 = 80;

/// Name of the single container in the task.
pub const CONTAINER_NAME: &str = "app";

/// CPU units reserved for the task.
pub const TASK_CPU_UNITS: u32 = 256;

/// Memory (MiB) reserved for the task.
pub const TASK_MEMORY_MIB: u32 = 512;

/// Number of tasks the service keeps running.
pub const DESIRED_COUNT: u32 = 1;

/// Liveness path probed by the target group.
pub const HEALTH_CHECK_PATH: &str = "/health";
/// Seconds between health checks.
pub const HEALTH_CHECK_INTERVAL_SECS: u32 = 30;
/// Seconds before a health check times out.
pub const HEALTH_CHECK_TIMEOUT_SECS: u32 = 5;
/// Consecutive successes before a target is healthy.
pub const HEALTHY_THRESHOLD: u32 = 2;
/// Consecutive failures before a target is unhealthy.
pub const UNHEALTHY_THRESHOLD: u32 = 2;

/// Retention of the task log group, in days.
pub const LOG_RETENTION_DAYS: u32 = 3;
/// Stream prefix used by the container log driver.
pub const LOG_STREAM_PREFIX: &str = "ecs-task";

/// CIDR block matching every IPv4 address.
pub const ANY_CIDR: &str = "0.0.0.0/0";

/// Principal of the container execution service.
pub const TASK_EXECUTION_PRINCIPAL: &str = "ecs-tasks.amazonaws.com";
/// Principal of the event-scheduling service.
pub const EVENT_SCHEDULER_PRINCIPAL: &str = "events.amazonaws.com";

/// Managed policy granting task execution rights.
pub const TASK_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AmazonECSTaskExecutionRolePolicy";
/// Managed policy letting scheduled events act on compute resources.
pub const EVENT_ACTIONS_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/CloudWatchActionsEC2Access";
/// Managed policy granting read-only registry access.
pub const REGISTRY_READ_ONLY_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/AmazonEC2ContainerRegistryReadOnly";

/// Name of the compute cluster.
pub const CLUSTER_NAME: &str = "fargate-cluster";

/// Gateway deployment stage name.
pub const STAGE_NAME: &str = "prod";
/// Wildcard route forwarding every method and path.
pub const PROXY_ROUTE_KEY: &str = "ANY /{proxy+}";
/// Payload format understood by HTTP proxy integrations.
pub const PAYLOAD_FORMAT_VERSION: &str = "1.0";

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default stack file looked up by the CLI.
pub const DEFAULT_STACK_FILE: &str = "skiff.yaml";

/// Default persisted state file.
pub const DEFAULT_STATE_FILE: &str = ".skiff/state.json";

/// Application name used in CLI output and state files.
pub const APP_NAME: &str = "skiff";
