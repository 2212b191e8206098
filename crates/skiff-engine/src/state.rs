//! Persistent state management.
//!
//! Maintains a local JSON index of every resource the engine has created,
//! with the inputs it was created from and the attributes the provider
//! reported. State is written after every step, so an interrupted or failed
//! convergence leaves an accurate record of what exists.
//!
//! Resources on their way out (old copies of replaced resources, resources
//! the topology no longer declares) are kept as [`RetiredResource`] entries
//! until the provider has deleted them.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use skiff_common::error::{Result, SkiffError};
use skiff_common::types::{Attributes, ResourceKind, ResourceName};
use skiff_topology::graph::DependencyGraph;
use skiff_topology::output::AttributeSource;

/// Current state file format version.
pub const STATE_VERSION: u32 = 1;

/// Persistent record of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Resolved inputs the resource was last applied with.
    pub inputs: Value,
    /// Attributes reported by the provider.
    pub attributes: Attributes,
    /// Resources that had to exist first.
    pub dependencies: BTreeSet<ResourceName>,
    /// SHA-256 of the serialized inputs.
    pub fingerprint: String,
    /// RFC 3339 timestamp of the last change.
    pub updated_at: String,
}

/// A resource that still exists but is awaiting deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetiredResource {
    /// Logical name it was recorded under.
    pub name: ResourceName,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Attributes reported by the provider.
    pub attributes: Attributes,
    /// Resources it depended on.
    pub dependencies: BTreeSet<ResourceName>,
}

impl RetiredResource {
    fn of(name: &ResourceName, record: &ResourceState) -> Self {
        Self {
            name: name.clone(),
            kind: record.kind,
            attributes: record.attributes.clone(),
            dependencies: record.dependencies.clone(),
        }
    }
}

/// One entry of [`StackState::deletion_order`].
#[derive(Debug, Clone, PartialEq)]
pub struct Deletion {
    /// What goes.
    pub resource: RetiredResource,
    /// Still recorded as live; retire it before deleting.
    pub live: bool,
}

/// State of a whole stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackState {
    /// State file format version.
    pub version: u32,
    /// Resources keyed by logical name.
    pub resources: BTreeMap<ResourceName, ResourceState>,
    /// Resources awaiting deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retired: Vec<RetiredResource>,
    /// Resolved stack outputs.
    pub outputs: BTreeMap<String, Value>,
}

impl Default for StackState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            resources: BTreeMap::new(),
            retired: Vec::new(),
            outputs: BTreeMap::new(),
        }
    }
}

impl StackState {
    /// Loads the state index from disk; a missing file is an empty stack.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "loading state index");
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| SkiffError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let state: Self = serde_json::from_str(&content)?;
        if state.version != STATE_VERSION {
            return Err(SkiffError::config(format!(
                "state file {} has version {}, expected {STATE_VERSION}",
                path.display(),
                state.version
            )));
        }
        Ok(state)
    }

    /// Persists the state index to disk atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::debug!(path = %path.display(), resources = self.resources.len(), "saving state index");
        let io_err = |e| SkiffError::Io {
            path: path.to_path_buf(),
            source: e,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)
    }

    /// Records the outcome of a create, update or replace.
    pub fn record(
        &mut self,
        name: &ResourceName,
        kind: ResourceKind,
        inputs: Value,
        attributes: Attributes,
        dependencies: BTreeSet<ResourceName>,
    ) {
        let entry = ResourceState {
            kind,
            fingerprint: fingerprint(&inputs),
            inputs,
            attributes,
            dependencies,
            updated_at: chrono::Utc::now().to_rfc3339(),
        };
        let _ = self.resources.insert(name.clone(), entry);
    }

    /// Moves the record of `name` to the pending deletions.
    ///
    /// Returns `false` if nothing is recorded under `name`.
    pub fn retire(&mut self, name: &ResourceName) -> bool {
        let Some(record) = self.resources.remove(name) else {
            return false;
        };
        self.retired.push(RetiredResource::of(name, &record));
        true
    }

    /// Drops a pending deletion once the provider has deleted it.
    pub fn settle(&mut self, entry: &RetiredResource) {
        if let Some(pos) = self.retired.iter().position(|r| r == entry) {
            let _ = self.retired.remove(pos);
        }
    }

    /// Returns the record of `name`.
    #[must_use]
    pub fn get(&self, name: &ResourceName) -> Option<&ResourceState> {
        self.resources.get(name)
    }

    /// Returns `true` if no resource is recorded or awaiting deletion.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.retired.is_empty()
    }

    /// Orders the pending deletions, plus the live records of `doomed`, so
    /// that dependents come before the resources they depend on.
    ///
    /// Several entries may share a name: an old copy of a replaced resource
    /// next to an earlier one that was never deleted. An entry depending on a
    /// name goes before every entry carrying that name.
    ///
    /// # Errors
    ///
    /// Returns an error if the recorded dependencies form a cycle.
    pub fn deletion_order(&self, doomed: &BTreeSet<ResourceName>) -> Result<Vec<Deletion>> {
        let entries: Vec<Deletion> = self
            .retired
            .iter()
            .map(|r| Deletion {
                resource: r.clone(),
                live: false,
            })
            .chain(doomed.iter().filter_map(|name| {
                self.get(name).map(|r| Deletion {
                    resource: RetiredResource::of(name, r),
                    live: true,
                })
            }))
            .collect();

        let mut graph = DependencyGraph::new();
        let nodes: Vec<_> = entries
            .iter()
            .map(|e| graph.add_resource(e.resource.name.clone()))
            .collect();
        for (dependent, entry) in entries.iter().enumerate() {
            for (dependency, other) in entries.iter().enumerate() {
                if dependent != dependency
                    && entry.resource.dependencies.contains(&other.resource.name)
                {
                    graph.add_dependency(nodes[dependent], nodes[dependency]);
                }
            }
        }
        Ok(graph
            .teardown_nodes()?
            .into_iter()
            .filter_map(|idx| nodes.iter().position(|n| *n == idx))
            .map(|i| entries[i].clone())
            .collect())
    }
}

impl AttributeSource for StackState {
    fn attribute(&self, resource: &ResourceName, attribute: &str) -> Option<Value> {
        self.resources
            .get(resource)
            .and_then(|r| r.attributes.get(attribute))
            .cloned()
    }
}

/// SHA-256 hex digest of a resolved input document.
#[must_use]
pub fn fingerprint(inputs: &Value) -> String {
    let digest = Sha256::digest(inputs.to_string().as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
