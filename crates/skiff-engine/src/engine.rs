//! Provisioning engine that converges recorded state onto a topology.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde_json::Value;
use skiff_common::error::{Result, SkiffError};
use skiff_common::types::{ResourceKind, ResourceName};
use skiff_topology::Topology;
use skiff_topology::resource::ResourceDecl;

use crate::plan::{Action, Plan, PlanSummary};
use crate::provider::Provider;
use crate::state::{Deletion, StackState};

/// Outcome of a successful convergence or teardown.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApplyReport {
    /// Counts of the actions that ran.
    pub summary: PlanSummary,
    /// Stack outputs after the run.
    pub outputs: BTreeMap<String, Value>,
}

/// The engine that drives a [`Provider`] through a [`Plan`].
///
/// State is saved after every step, so a failure or an interruption leaves
/// the state file describing exactly what exists. Steps run one at a time
/// in plan order; a failed step stops the run and nothing that depends on
/// it is attempted.
///
/// Deletions run last. The old copy of a replaced resource is kept as a
/// pending deletion until every create, update and replace has run, so
/// nothing declared still points at it when it goes.
pub struct Engine<P> {
    provider: P,
    state_path: PathBuf,
    cancel: Arc<AtomicBool>,
}

impl<P: Provider> Engine<P> {
    /// Creates an engine that keeps its state at `state_path`.
    pub fn new(provider: P, state_path: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            state_path: state_path.into(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run before its next step once set.
    #[must_use]
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// The underlying provider.
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Path of the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Loads the recorded state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub fn state(&self) -> Result<StackState> {
        StackState::load(&self.state_path)
    }

    /// Diffs `topology` against the recorded state without touching the
    /// platform.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be loaded or the graph is cyclic.
    pub fn plan(&self, topology: &Topology) -> Result<Plan> {
        let state = self.state()?;
        Plan::compute(topology, &state)
    }

    /// Brings the platform in line with `topology`.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::PlatformRejected`] naming the first resource the
    /// provider refused, or [`SkiffError::Cancelled`] if the cancel flag was
    /// raised. State reflects every step that completed in either case.
    /// Returns a configuration error if the operator's image URI is not the
    /// registry URI of the stack: before any step if the recorded registry
    /// already tells, otherwise once the registry exists.
    pub fn converge(&self, topology: &Topology) -> Result<ApplyReport> {
        let mut state = self.state()?;
        let plan = Plan::compute(topology, &state)?;
        let summary = plan.summary();
        tracing::info!(
            create = summary.create,
            update = summary.update,
            replace = summary.replace,
            delete = summary.delete,
            unchanged = summary.unchanged,
            "converging"
        );

        let registry_settled = topology
            .outputs
            .repository_uri
            .dependencies()
            .iter()
            .all(|name| plan.step(name.as_str()).is_some_and(|s| !s.action.is_change()));
        if registry_settled {
            check_image_uri(topology, &state)?;
        }

        let decls: BTreeMap<ResourceName, ResourceDecl> = topology
            .declarations()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();

        let mut completed = 0;
        for step in &plan.steps {
            match step.action {
                Action::Unchanged => {
                    completed += 1;
                    continue;
                }
                Action::Delete => continue,
                _ => {}
            }
            self.check_cancelled(&state, completed)?;
            let decl = decls.get(&step.name).ok_or_else(|| SkiffError::NotFound {
                kind: "declaration",
                id: step.name.to_string(),
            })?;
            self.apply(&mut state, decl, &step.action)?;
            completed += 1;
        }

        let undeclared: BTreeSet<ResourceName> = state
            .resources
            .keys()
            .filter(|name| !decls.contains_key(*name))
            .cloned()
            .collect();
        let order = state.deletion_order(&undeclared)?;
        let _ = self.delete_all(&mut state, order, completed)?;
        check_image_uri(topology, &state)?;

        let mut outputs = BTreeMap::new();
        for (name, output) in topology.outputs.entries() {
            let _ = outputs.insert(name.to_string(), output.expr().resolve(&state)?);
        }
        state.outputs.clone_from(&outputs);
        state.save(&self.state_path)?;
        tracing::info!(resources = state.resources.len(), "stack converged");
        Ok(ApplyReport { summary, outputs })
    }

    /// Deletes every recorded resource, dependents first.
    ///
    /// # Errors
    ///
    /// Returns the first provider error, or [`SkiffError::Cancelled`] if the
    /// cancel flag was raised. Resources not yet deleted stay recorded.
    pub fn destroy(&self) -> Result<ApplyReport> {
        let mut state = self.state()?;
        let everything: BTreeSet<ResourceName> = state.resources.keys().cloned().collect();
        let order = state.deletion_order(&everything)?;
        tracing::info!(resources = order.len(), "tearing down stack");
        state.outputs.clear();

        let summary = PlanSummary {
            delete: self.delete_all(&mut state, order, 0)?,
            ..PlanSummary::default()
        };
        state.save(&self.state_path)?;
        tracing::info!("stack destroyed");
        Ok(ApplyReport {
            summary,
            outputs: BTreeMap::new(),
        })
    }

    /// Returns the outputs recorded by the last convergence.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file cannot be read.
    pub fn outputs(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.state()?.outputs)
    }

    fn check_cancelled(&self, state: &StackState, completed: usize) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            state.save(&self.state_path)?;
            tracing::warn!(completed, "convergence cancelled");
            return Err(SkiffError::Cancelled { completed });
        }
        Ok(())
    }

    fn apply(&self, state: &mut StackState, decl: &ResourceDecl, action: &Action) -> Result<()> {
        let name = &decl.name;
        let inputs = decl.resolve(&*state)?;

        // the old copy stays up until its dependents have moved on
        if matches!(action, Action::Replace { .. }) && state.retire(name) {
            state.save(&self.state_path)?;
        }

        let attributes = match (action, state.get(name)) {
            (Action::Update { changed }, Some(current)) => {
                tracing::info!(resource = %name, kind = %decl.kind, ?changed, "updating");
                self.provider
                    .update(decl.kind, name, &inputs, &current.attributes)
                    .map_err(|e| rejected(decl.kind, name, e))?
            }
            _ => {
                tracing::info!(resource = %name, kind = %decl.kind, %action, "creating");
                self.provider
                    .create(decl.kind, name, &inputs)
                    .map_err(|e| rejected(decl.kind, name, e))?
            }
        };

        state.record(name, decl.kind, inputs, attributes, decl.dependencies());
        state.save(&self.state_path)
    }

    /// Deletes `order` front to back and returns how many went.
    fn delete_all(
        &self,
        state: &mut StackState,
        order: Vec<Deletion>,
        mut completed: usize,
    ) -> Result<usize> {
        let mut deleted = 0;
        for Deletion { resource: entry, live } in order {
            self.check_cancelled(state, completed)?;
            if live {
                let _ = state.retire(&entry.name);
            }
            tracing::info!(resource = %entry.name, kind = %entry.kind, "deleting");
            self.provider
                .delete(entry.kind, &entry.name, &entry.attributes)
                .map_err(|e| rejected(entry.kind, &entry.name, e))?;
            state.settle(&entry);
            state.save(&self.state_path)?;
            completed += 1;
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// Fails if the registry the stack resolved is not where the operator pushes.
fn check_image_uri(topology: &Topology, state: &StackState) -> Result<()> {
    let Some(Value::String(registry)) = topology.outputs.repository_uri.expr().try_resolve(state)
    else {
        return Ok(());
    };
    let image_uri = topology.inputs.image_uri();
    if registry == image_uri {
        return Ok(());
    }
    Err(SkiffError::config(format!(
        "imageUri \"{image_uri}\" is not the stack registry \"{registry}\""
    )))
}

/// Attributes a provider failure to the resource being worked on.
fn rejected(kind: ResourceKind, name: &ResourceName, err: SkiffError) -> SkiffError {
    match err {
        e @ SkiffError::PlatformRejected { .. } => e,
        other => SkiffError::PlatformRejected {
            resource: name.to_string(),
            kind: kind.to_string(),
            message: other.to_string(),
        },
    }
}
