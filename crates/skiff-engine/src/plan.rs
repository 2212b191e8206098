//! Diffing a topology against persisted state.
//!
//! A [`Plan`] lists one [`Step`] per declared resource, in creation order,
//! followed by the deletions, in teardown order: recorded resources the
//! topology no longer declares and old copies of replaced resources a
//! previous run left behind. Planning never calls the provider.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use serde_json::Value;
use skiff_common::error::Result;
use skiff_common::types::{ResourceKind, ResourceName};
use skiff_topology::Topology;
use skiff_topology::output::AttributeSource;
use skiff_topology::resource::ResourceDecl;

use crate::state::StackState;

/// What the engine will do to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    /// The resource does not exist yet.
    Create,
    /// Mutable fields differ; change in place.
    Update {
        /// Fields whose value changes or is not known until apply.
        changed: Vec<String>,
    },
    /// An immutable field differs; create a new one and delete the old one
    /// once nothing declared uses it.
    Replace {
        /// Fields whose value changes or is not known until apply.
        changed: Vec<String>,
    },
    /// The resource is no longer declared.
    Delete,
    /// Recorded inputs match the declaration.
    Unchanged,
}

impl Action {
    /// Returns `true` if the step calls the provider.
    #[must_use]
    pub const fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update { .. } => write!(f, "update"),
            Self::Replace { .. } => write!(f, "replace"),
            Self::Delete => write!(f, "delete"),
            Self::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// One planned step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Step {
    /// Logical name of the resource.
    pub name: ResourceName,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Planned action.
    #[serde(flatten)]
    pub action: Action,
}

/// Counts of planned actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanSummary {
    /// Resources to create.
    pub create: usize,
    /// Resources to update in place.
    pub update: usize,
    /// Resources to replace.
    pub replace: usize,
    /// Resources to delete.
    pub delete: usize,
    /// Resources left alone.
    pub unchanged: usize,
}

/// Ordered steps that bring recorded state in line with a topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    /// Steps in execution order.
    pub steps: Vec<Step>,
    /// Declared resources grouped so that each group only depends on
    /// earlier groups.
    pub waves: Vec<Vec<ResourceName>>,
}

/// State seen through the resources a plan will (re)create: their
/// attributes are not known until the provider reports them.
struct PlanningView<'a> {
    state: &'a StackState,
    pending: &'a BTreeSet<ResourceName>,
}

impl AttributeSource for PlanningView<'_> {
    fn attribute(&self, resource: &ResourceName, attribute: &str) -> Option<Value> {
        if self.pending.contains(resource) {
            return None;
        }
        self.state.attribute(resource, attribute)
    }
}

impl Plan {
    /// Diffs `topology` against `state`.
    ///
    /// # Errors
    ///
    /// Returns an error if the topology or the recorded dependencies contain
    /// a cycle.
    pub fn compute(topology: &Topology, state: &StackState) -> Result<Self> {
        let decls: BTreeMap<ResourceName, ResourceDecl> = topology
            .declarations()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        let graph = topology.graph()?;
        let mut pending = BTreeSet::new();
        let mut steps = Vec::with_capacity(decls.len());

        for name in graph.resolve_order()? {
            let Some(decl) = decls.get(&name) else {
                continue;
            };
            let action = diff(decl, state, &pending);
            if matches!(action, Action::Create | Action::Replace { .. }) {
                let _ = pending.insert(name.clone());
            }
            tracing::debug!(resource = %name, action = %action, "planned");
            steps.push(Step {
                name,
                kind: decl.kind,
                action,
            });
        }

        let undeclared: BTreeSet<ResourceName> = state
            .resources
            .keys()
            .filter(|name| !decls.contains_key(*name))
            .cloned()
            .collect();
        for doomed in state.deletion_order(&undeclared)? {
            steps.push(Step {
                name: doomed.resource.name,
                kind: doomed.resource.kind,
                action: Action::Delete,
            });
        }

        Ok(Self {
            steps,
            waves: graph.waves()?,
        })
    }

    /// Counts the steps per action.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for step in &self.steps {
            match step.action {
                Action::Create => summary.create += 1,
                Action::Update { .. } => summary.update += 1,
                Action::Replace { .. } => summary.replace += 1,
                Action::Delete => summary.delete += 1,
                Action::Unchanged => summary.unchanged += 1,
            }
        }
        summary
    }

    /// Returns `true` if applying the plan would change nothing.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.steps.iter().all(|s| !s.action.is_change())
    }

    /// Names of the resources the plan replaces.
    #[must_use]
    pub fn replacements(&self) -> Vec<&ResourceName> {
        self.steps
            .iter()
            .filter(|s| matches!(s.action, Action::Replace { .. }))
            .map(|s| &s.name)
            .collect()
    }

    /// Returns the step for `name`.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name.as_str() == name)
    }
}

fn diff(decl: &ResourceDecl, state: &StackState, pending: &BTreeSet<ResourceName>) -> Action {
    let Some(recorded) = state.get(&decl.name) else {
        return Action::Create;
    };
    if recorded.kind != decl.kind {
        return Action::Replace {
            changed: vec!["kind".to_string()],
        };
    }

    let view = PlanningView { state, pending };
    let previous = recorded.inputs.as_object();
    let mut changed: Vec<String> = decl
        .properties
        .iter()
        .filter(|(field, expr)| {
            let before = previous.and_then(|p| p.get(field.as_str()));
            expr.try_resolve(&view).as_ref() != before
        })
        .map(|(field, _)| field.clone())
        .collect();
    if let Some(previous) = previous {
        changed.extend(
            previous
                .keys()
                .filter(|k| !decl.properties.contains_key(k.as_str()))
                .cloned(),
        );
    }

    if changed.is_empty() {
        return Action::Unchanged;
    }
    let immutable = decl.kind.immutable_fields();
    if changed.iter().any(|f| immutable.contains(&f.as_str())) {
        Action::Replace { changed }
    } else {
        Action::Update { changed }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use skiff_common::config::DeployInputs;
    use skiff_common::types::Attributes;
    use skiff_topology::network::{FixedNetwork, NetworkContext};

    use super::*;

    fn topology(tag: &str) -> Topology {
        let inputs = DeployInputs::new(
            "ts-express-server",
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/ts-express-server",
            tag,
        )
        .expect("inputs");
        let network = NetworkContext::new("vpc-1", vec!["subnet-a".into()]).expect("network");
        Topology::assemble(&inputs, &FixedNetwork::new(network)).expect("assembles")
    }

    /// Records every declaration as if a provider had created it, with one
    /// synthetic value per attribute name the topology reads.
    fn converged_state(topology: &Topology) -> StackState {
        let mut state = StackState::default();
        let graph = topology.graph().expect("graph");
        let decls: BTreeMap<_, _> = topology
            .declarations()
            .into_iter()
            .map(|d| (d.name.clone(), d))
            .collect();
        let mut wanted: BTreeMap<ResourceName, BTreeSet<String>> = BTreeMap::new();
        for decl in decls.values() {
            for expr in decl.properties.values() {
                collect_attributes(expr, &mut wanted);
            }
        }
        for (_, output) in topology.outputs.entries() {
            collect_attributes(output.expr(), &mut wanted);
        }
        for name in graph.resolve_order().expect("order") {
            let decl = &decls[&name];
            let inputs = decl.resolve(&state).expect("inputs resolve in order");
            let attributes: Attributes = wanted
                .get(&name)
                .into_iter()
                .flatten()
                .map(|a| (a.clone(), Value::from(format!("{name}-{a}"))))
                .collect();
            state.record(&name, decl.kind, inputs, attributes, decl.dependencies());
        }
        state
    }

    fn collect_attributes(
        expr: &skiff_topology::output::Expr,
        out: &mut BTreeMap<ResourceName, BTreeSet<String>>,
    ) {
        use skiff_topology::output::Expr;
        match expr {
            Expr::Literal { .. } => {}
            Expr::Attribute {
                resource,
                attribute,
            } => {
                let _ = out
                    .entry(resource.clone())
                    .or_default()
                    .insert(attribute.clone());
            }
            Expr::Concat { parts: items } | Expr::List { items } => {
                items.iter().for_each(|i| collect_attributes(i, out));
            }
            Expr::Index { list, .. } => collect_attributes(list, out),
            Expr::Object { fields } => fields.values().for_each(|v| collect_attributes(v, out)),
        }
    }

    #[test]
    fn empty_state_creates_everything_in_order() {
        let t = topology("v1");
        let plan = Plan::compute(&t, &StackState::default()).expect("plan");
        let summary = plan.summary();
        assert_eq!(summary.create, 18);
        assert_eq!(summary.unchanged, 0);
        assert!(!plan.is_converged());
        let pos = |n: &str| plan.steps.iter().position(|s| s.name.as_str() == n).expect(n);
        assert!(pos("alb-sg") < pos("task-sg"));
        assert!(pos("app-listener") < pos("ecs-service"));
        assert_eq!(plan.waves.iter().map(Vec::len).sum::<usize>(), 18);
    }

    #[test]
    fn converged_state_plans_nothing() {
        let t = topology("v1");
        let state = converged_state(&t);
        let plan = Plan::compute(&t, &state).expect("plan");
        assert!(plan.is_converged(), "{:?}", plan.steps);
        assert!(plan.replacements().is_empty());
    }

    #[test]
    fn new_tag_replaces_task_and_updates_service() {
        let state = converged_state(&topology("v1"));
        let plan = Plan::compute(&topology("v2"), &state).expect("plan");
        assert_eq!(
            plan.replacements(),
            vec![&ResourceName::new("task-definition")]
        );
        match &plan.step("ecs-service").expect("service step").action {
            Action::Update { changed } => assert_eq!(changed, &vec!["task_definition".to_string()]),
            other => panic!("expected update, got {other:?}"),
        }
        assert_eq!(
            plan.step("app-lb").map(|s| &s.action),
            Some(&Action::Unchanged)
        );
    }

    #[test]
    fn undeclared_resources_are_deleted_last() {
        let t = topology("v1");
        let mut state = converged_state(&t);
        state.record(
            &ResourceName::new("old-queue"),
            ResourceKind::LogGroup,
            Value::Null,
            Attributes::new(),
            BTreeSet::new(),
        );
        let plan = Plan::compute(&t, &state).expect("plan");
        let last = plan.steps.last().expect("steps");
        assert_eq!(last.name.as_str(), "old-queue");
        assert_eq!(last.action, Action::Delete);
        assert_eq!(plan.summary().delete, 1);
    }

    #[test]
    fn leftover_old_copies_are_planned_for_deletion() {
        let t = topology("v1");
        let mut state = converged_state(&t);
        let sg = ResourceName::new("alb-sg");
        let live = state.get(&sg).expect("alb-sg").clone();
        assert!(state.retire(&sg));
        state.record(&sg, live.kind, live.inputs, live.attributes, live.dependencies);

        let plan = Plan::compute(&t, &state).expect("plan");
        assert!(!plan.is_converged());
        assert_eq!(plan.step("alb-sg").map(|s| &s.action), Some(&Action::Unchanged));
        let last = plan.steps.last().expect("steps");
        assert_eq!((last.name.as_str(), &last.action), ("alb-sg", &Action::Delete));
    }

    #[test]
    fn load_balancer_scheme_change_forces_replacement() {
        let t = topology("v1");
        let mut state = converged_state(&t);
        let lb = state
            .resources
            .get_mut(&ResourceName::new("app-lb"))
            .expect("app-lb");
        lb.inputs["internal"] = Value::Bool(true);

        let plan = Plan::compute(&t, &state).expect("plan");
        match &plan.step("app-lb").expect("lb step").action {
            Action::Replace { changed } => assert_eq!(changed, &vec!["internal".to_string()]),
            other => panic!("expected replace, got {other:?}"),
        }
    }

    #[test]
    fn kind_change_forces_replacement() {
        let t = topology("v1");
        let mut state = converged_state(&t);
        let entry = state
            .resources
            .get_mut(&ResourceName::new("fargate-cluster"))
            .expect("cluster");
        entry.kind = ResourceKind::Registry;
        let plan = Plan::compute(&t, &state).expect("plan");
        assert!(plan.replacements().contains(&&ResourceName::new("fargate-cluster")));
    }
}
