//! In-process provider.
//!
//! [`LocalProvider`] answers every call without a network round trip. It
//! derives identifiers by hashing the resource's kind, name and inputs, so
//! the same declaration always yields the same attributes, and it enforces
//! the platform rules a real account would: Fargate task sizes and policy
//! ARN shapes. Used by `skiff plan` previews, the test suites, and dry runs.

use serde_json::Value;
use sha2::{Digest, Sha256};
use skiff_common::constants::DEFAULT_REGION;
use skiff_common::error::{Result, SkiffError};
use skiff_common::types::{Attributes, ResourceKind, ResourceName};
use skiff_topology::compute::is_valid_task_size;
use skiff_topology::network::{NetworkContext, NetworkLookup};

use crate::provider::Provider;

/// Account the local provider pretends to run in.
pub const LOCAL_ACCOUNT_ID: &str = "123456789012";

/// Provider that simulates the platform in memory.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    region: String,
    account_id: String,
    network: Option<NetworkContext>,
}

impl LocalProvider {
    /// Creates a provider for `region` with a generated default network.
    #[must_use]
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account_id: LOCAL_ACCOUNT_ID.to_string(),
            network: None,
        }
    }

    /// Uses `network` as the default network.
    #[must_use]
    pub fn with_network(mut self, network: NetworkContext) -> Self {
        self.network = Some(network);
        self
    }

    /// Region resources are created in.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    fn arn(&self, service: &str, resource: &str) -> String {
        format!("arn:aws:{service}:{}:{}:{resource}", self.region, self.account_id)
    }

    fn attributes(&self, kind: ResourceKind, name: &ResourceName, inputs: &Value) -> Result<Attributes> {
        let hash = short_hash(&[&kind.to_string(), name.as_str(), &inputs.to_string()]);
        let region = &self.region;
        let account = &self.account_id;
        let mut attrs = Attributes::new();
        let mut set = |key: &str, value: Value| {
            let _ = attrs.insert(key.to_string(), value);
        };

        match kind {
            ResourceKind::Registry => {
                let repo = str_input(inputs, "name").unwrap_or(name.as_str());
                set("name", repo.into());
                set("arn", self.arn("ecr", &format!("repository/{repo}")).into());
                set(
                    "repository_url",
                    format!("{account}.dkr.ecr.{region}.amazonaws.com/{repo}").into(),
                );
            }
            ResourceKind::LogGroup => {
                let group = format!("{name}-{}", &hash[..7]);
                set("arn", self.arn("logs", &format!("log-group:{group}")).into());
                set("name", group.into());
            }
            ResourceKind::SecurityBoundary => {
                let id = format!("sg-{}", &hash[..17]);
                set("arn", self.arn("ec2", &format!("security-group/{id}")).into());
                set("id", id.into());
            }
            ResourceKind::ServiceIdentity => {
                let role = format!("{name}-{}", &hash[..7]);
                set("arn", format!("arn:aws:iam::{account}:role/{role}").into());
                set("name", role.into());
            }
            ResourceKind::PolicyAttachment => {
                let policy = str_input(inputs, "policy_arn").unwrap_or_default();
                check_policy_arn(policy).map_err(|m| rejected(kind, name, m))?;
                set("id", format!("{name}-{}", &hash[..8]).into());
            }
            ResourceKind::TaskDefinition => {
                check_task_size(inputs).map_err(|m| rejected(kind, name, m))?;
                let family = str_input(inputs, "family").unwrap_or(name.as_str());
                let revision = u64::from_str_radix(&hash[..4], 16).unwrap_or(0) % 9000 + 1;
                set(
                    "arn",
                    self.arn("ecs", &format!("task-definition/{family}:{revision}")).into(),
                );
                set("family", family.into());
                set("revision", revision.into());
            }
            ResourceKind::Cluster => {
                let cluster = str_input(inputs, "name").unwrap_or(name.as_str());
                set("arn", self.arn("ecs", &format!("cluster/{cluster}")).into());
                set("name", cluster.into());
            }
            ResourceKind::ClusterBinding => {
                let arn = self.arn("ecs", &format!("service/{name}-{}", &hash[..7]));
                set("id", arn.clone().into());
                set("arn", arn.into());
            }
            ResourceKind::TargetGroup => {
                set(
                    "arn",
                    self.arn("elasticloadbalancing", &format!("targetgroup/{name}/{}", &hash[..16]))
                        .into(),
                );
            }
            ResourceKind::LoadBalancer => {
                set(
                    "arn",
                    self.arn(
                        "elasticloadbalancing",
                        &format!("loadbalancer/app/{name}/{}", &hash[..16]),
                    )
                    .into(),
                );
                let digits = u64::from_str_radix(&hash[..8], 16).unwrap_or(0) % 1_000_000_000;
                set(
                    "dns_name",
                    format!("{name}-{digits}.{region}.elb.amazonaws.com").into(),
                );
            }
            ResourceKind::Listener => {
                set(
                    "arn",
                    self.arn("elasticloadbalancing", &format!("listener/app/{name}/{}", &hash[..16]))
                        .into(),
                );
            }
            ResourceKind::Gateway => {
                let id = &hash[..10];
                set("id", id.into());
                set(
                    "api_endpoint",
                    format!("https://{id}.execute-api.{region}.amazonaws.com").into(),
                );
            }
            ResourceKind::GatewayStage => {
                let stage = str_input(inputs, "name").unwrap_or(name.as_str());
                set("name", stage.into());
            }
            ResourceKind::GatewayIntegration | ResourceKind::GatewayRoute => {
                set("id", hash[..7].to_string().into());
            }
        }
        Ok(attrs)
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl NetworkLookup for LocalProvider {
    fn default_network(&self) -> Result<NetworkContext> {
        if let Some(network) = &self.network {
            return Ok(network.clone());
        }
        let hash = short_hash(&[&self.region, &self.account_id]);
        let subnets = ["a", "b", "c"]
            .iter()
            .map(|zone| format!("subnet-{}{zone}", &hash[..16]))
            .collect();
        NetworkContext::new(format!("vpc-{}", &hash[..17]), subnets)
    }
}

impl Provider for LocalProvider {
    fn create(&self, kind: ResourceKind, name: &ResourceName, inputs: &Value) -> Result<Attributes> {
        let attrs = self.attributes(kind, name, inputs)?;
        tracing::debug!(resource = %name, %kind, "created");
        Ok(attrs)
    }

    fn update(
        &self,
        kind: ResourceKind,
        name: &ResourceName,
        inputs: &Value,
        current: &Attributes,
    ) -> Result<Attributes> {
        let fresh = self.attributes(kind, name, inputs)?;
        // identifiers survive an in-place update
        let mut attrs = current.clone();
        for (key, value) in fresh {
            let _ = attrs.entry(key).or_insert(value);
        }
        tracing::debug!(resource = %name, %kind, "updated");
        Ok(attrs)
    }

    fn delete(&self, kind: ResourceKind, name: &ResourceName, _current: &Attributes) -> Result<()> {
        tracing::debug!(resource = %name, %kind, "deleted");
        Ok(())
    }
}

fn rejected(kind: ResourceKind, name: &ResourceName, message: String) -> SkiffError {
    SkiffError::PlatformRejected {
        resource: name.to_string(),
        kind: kind.to_string(),
        message,
    }
}

fn str_input<'a>(inputs: &'a Value, field: &str) -> Option<&'a str> {
    inputs.get(field).and_then(Value::as_str)
}

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

fn check_task_size(inputs: &Value) -> std::result::Result<(), String> {
    let parse = |field: &str| -> std::result::Result<u32, String> {
        str_input(inputs, field)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| format!("{field} must be a number of units, got {}", inputs[field]))
    };
    let (cpu, memory) = (parse("cpu")?, parse("memory")?);
    if is_valid_task_size(cpu, memory) {
        Ok(())
    } else {
        Err(format!("No Fargate configuration exists for cpu {cpu} and memory {memory}"))
    }
}

fn check_policy_arn(arn: &str) -> std::result::Result<(), String> {
    let parts: Vec<&str> = arn.splitn(6, ':').collect();
    let well_formed = parts.len() == 6
        && parts[0] == "arn"
        && parts[2] == "iam"
        && parts[5].starts_with("policy/")
        && parts[5].len() > "policy/".len();
    if well_formed {
        Ok(())
    } else {
        Err(format!("Policy arn {arn:?} is not valid"))
    }
}
