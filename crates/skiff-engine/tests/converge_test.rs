//! End-to-end convergence tests for the skiff engine.
//!
//! These tests drive the full pipeline against an in-process provider:
//! 1. Resolve deployment inputs
//! 2. Assemble and validate the topology
//! 3. Plan against recorded state
//! 4. Converge, fail part-way, cancel, and tear down

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use skiff_common::config::{DeployConfig, DeployInputs};
use skiff_common::error::{Result, SkiffError};
use skiff_common::types::{Attributes, ResourceKind, ResourceName};
use skiff_engine::plan::Action;
use skiff_engine::provider::Provider;
use skiff_engine::{Engine, LocalProvider};
use skiff_topology::Topology;
use skiff_topology::network::{NetworkContext, NetworkLookup};

const IMAGE_URI: &str = "123456789012.dkr.ecr.us-east-1.amazonaws.com/ts-express-server";

/// Wraps [`LocalProvider`], records every call and fails on request.
struct Recording {
    inner: LocalProvider,
    calls: Mutex<Vec<(String, String)>>,
    fail_on: Option<&'static str>,
    /// Raises the engine's cancel flag after this many calls.
    cancel_after: Mutex<Option<(usize, Arc<AtomicBool>)>>,
    /// VPC reported to the topology.
    vpc: Mutex<&'static str>,
}

impl Recording {
    fn new() -> Self {
        Self {
            inner: LocalProvider::default(),
            calls: Mutex::new(Vec::new()),
            fail_on: None,
            cancel_after: Mutex::new(None),
            vpc: Mutex::new("vpc-0abc"),
        }
    }

    fn move_to(&self, vpc: &'static str) {
        *self.vpc.lock().unwrap() = vpc;
    }

    fn cancel_after(&self, calls: usize, flag: Arc<AtomicBool>) {
        *self.cancel_after.lock().unwrap() = Some((calls, flag));
    }

    fn failing_on(name: &'static str) -> Self {
        Self {
            fail_on: Some(name),
            ..Self::new()
        }
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    fn names(&self, op: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(o, _)| o == op)
            .map(|(_, n)| n)
            .collect()
    }

    fn log(&self, op: &str, name: &ResourceName) -> Result<()> {
        let mut calls = self.calls.lock().unwrap();
        calls.push((op.to_string(), name.to_string()));
        if let Some((after, flag)) = &*self.cancel_after.lock().unwrap() {
            if calls.len() >= *after {
                flag.store(true, Ordering::SeqCst);
            }
        }
        if self.fail_on == Some(name.as_str()) {
            return Err(SkiffError::config("InvalidGroup.Duplicate: group already exists"));
        }
        Ok(())
    }
}

impl NetworkLookup for Recording {
    fn default_network(&self) -> Result<NetworkContext> {
        let vpc = *self.vpc.lock().unwrap();
        let subnets = ["1a", "1b", "1c"]
            .iter()
            .map(|zone| format!("{vpc}-subnet-{zone}"))
            .collect();
        NetworkContext::new(vpc, subnets)
    }
}

impl Provider for Recording {
    fn create(&self, kind: ResourceKind, name: &ResourceName, inputs: &Value) -> Result<Attributes> {
        self.log("create", name)?;
        self.inner.create(kind, name, inputs)
    }

    fn update(
        &self,
        kind: ResourceKind,
        name: &ResourceName,
        inputs: &Value,
        current: &Attributes,
    ) -> Result<Attributes> {
        self.log("update", name)?;
        self.inner.update(kind, name, inputs, current)
    }

    fn delete(&self, kind: ResourceKind, name: &ResourceName, current: &Attributes) -> Result<()> {
        self.log("delete", name)?;
        self.inner.delete(kind, name, current)
    }
}

fn inputs(tag: &str) -> DeployInputs {
    DeployInputs::new("ts-express-server", IMAGE_URI, tag).expect("valid inputs")
}

fn topology(provider: &Recording, tag: &str) -> Topology {
    Topology::assemble(&inputs(tag), provider).expect("assembles")
}

// ── Convergence ──────────────────────────────────────────────────────

#[test]
fn converge_then_replan_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let t = topology(engine.provider(), "v1");

    let report = engine.converge(&t).expect("converges");
    assert_eq!(report.summary.create, 18);
    assert_eq!(engine.provider().names("create").len(), 18);

    let plan = engine.plan(&t).expect("plan");
    assert!(plan.is_converged(), "{:?}", plan.steps);
    assert!(plan.replacements().is_empty());

    let again = engine.converge(&t).expect("converges");
    assert_eq!(again.summary.unchanged, 18);
    assert_eq!(engine.provider().calls().len(), 18, "second run calls nothing");
}

#[test]
fn creation_follows_dependency_order() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let t = topology(engine.provider(), "v1");
    let _ = engine.converge(&t).expect("converges");

    let created = engine.provider().names("create");
    let pos = |n: &str| created.iter().position(|c| c == n).expect(n);
    assert!(pos("alb-sg") < pos("task-sg"));
    assert!(pos("ts-express-server") < pos("task-definition"));
    assert!(pos("app-listener") < pos("ecs-service"));
    assert!(pos("ecs-task-execution-role") < pos("task-definition"));
    assert!(pos("app-lb") < pos("alb-integration"));
    assert!(pos("alb-integration") < pos("api-route"));
}

#[test]
fn new_image_tag_replaces_task_definition_only() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let _ = engine.converge(&topology(engine.provider(), "v1")).expect("v1");
    let before = engine.state().expect("state");

    let v2 = topology(engine.provider(), "v2");
    let plan = engine.plan(&v2).expect("plan");
    assert_eq!(plan.replacements(), vec![&ResourceName::new("task-definition")]);
    assert!(matches!(
        plan.step("ecs-service").map(|s| &s.action),
        Some(Action::Update { .. })
    ));

    let report = engine.converge(&v2).expect("v2");
    assert_eq!(report.summary.replace, 1);
    assert_eq!(report.summary.update, 1);

    let after = engine.state().expect("state");
    let arn = |s: &skiff_engine::state::StackState, n: &str| {
        s.get(&ResourceName::new(n)).unwrap().attributes["arn"].clone()
    };
    assert_ne!(arn(&before, "task-definition"), arn(&after, "task-definition"));
    assert_eq!(arn(&before, "app-lb"), arn(&after, "app-lb"));
    assert_eq!(
        after.get(&ResourceName::new("ecs-service")).unwrap().inputs["task_definition"],
        arn(&after, "task-definition")
    );
    assert_eq!(engine.provider().names("delete"), vec!["task-definition"]);
}

#[test]
fn replaced_resources_outlive_their_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let _ = engine.converge(&topology(engine.provider(), "v1")).expect("vpc-0abc");

    engine.provider().move_to("vpc-0def");
    let moved = topology(engine.provider(), "v1");
    let plan = engine.plan(&moved).expect("plan");
    let mut replaced: Vec<String> = plan.replacements().iter().map(ToString::to_string).collect();
    for name in ["alb-sg", "task-sg", "app-target-group", "ecs-service"] {
        assert!(replaced.contains(&name.to_string()), "{name} not replaced: {replaced:?}");
    }
    assert!(matches!(
        plan.step("app-listener").map(|s| &s.action),
        Some(Action::Update { .. })
    ));

    let before = engine.provider().calls().len();
    let _ = engine.converge(&moved).expect("vpc-0def");
    let calls = engine.provider().calls().split_off(before);

    let first_delete = calls.iter().position(|(op, _)| op == "delete").expect("deletes");
    assert!(
        calls[first_delete..].iter().all(|(op, _)| op == "delete"),
        "an old copy went before every dependent moved: {calls:?}"
    );
    let mut deleted: Vec<String> = calls[first_delete..].iter().map(|(_, n)| n.clone()).collect();
    let pos = |n: &str| deleted.iter().position(|d| d == n).expect(n);
    assert!(pos("ecs-service") < pos("task-sg"));
    assert!(pos("ecs-service") < pos("app-target-group"));
    assert!(pos("task-sg") < pos("alb-sg"));

    deleted.sort();
    replaced.sort();
    assert_eq!(deleted, replaced);
    assert!(engine.state().unwrap().retired.is_empty());
    assert!(engine.plan(&moved).unwrap().is_converged());
}

#[test]
fn cancelled_replacement_retires_old_copies_on_resume() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let _ = engine.converge(&topology(engine.provider(), "v1")).expect("vpc-0abc");

    engine.provider().move_to("vpc-0def");
    let moved = topology(engine.provider(), "v1");
    let plan = engine.plan(&moved).expect("plan");
    let changes = plan.steps.iter().filter(|s| s.action.is_change()).count();
    let replaced = plan.replacements().len();

    // stop after the last create or update, before any deletion
    let before = engine.provider().calls().len();
    engine.provider().cancel_after(before + changes, engine.cancel_handle());
    let err = engine.converge(&moved).expect_err("cancelled");
    assert!(matches!(err, SkiffError::Cancelled { .. }), "{err}");
    assert!(engine.provider().names("delete").is_empty());
    assert_eq!(engine.state().unwrap().retired.len(), replaced);

    let pending = engine.plan(&moved).expect("plan");
    assert_eq!(pending.summary().delete, replaced);
    assert_eq!(pending.summary().unchanged, 18);

    engine.cancel_handle().store(false, Ordering::SeqCst);
    engine.provider().cancel_after(usize::MAX, Arc::new(AtomicBool::new(false)));
    let report = engine.converge(&moved).expect("resumes");
    assert_eq!(report.summary.delete, replaced);
    assert_eq!(engine.provider().names("delete").len(), replaced);
    assert!(engine.state().unwrap().retired.is_empty());
}

#[test]
fn outputs_survive_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let engine = Engine::new(Recording::new(), &path);
    let report = engine.converge(&topology(engine.provider(), "v1")).expect("converges");

    let reopened = Engine::new(LocalProvider::default(), &path);
    let outputs = reopened.outputs().expect("outputs");
    assert_eq!(outputs, report.outputs);
    assert_eq!(outputs["repositoryUri"], IMAGE_URI);
    assert!(outputs["apiEndpoint"].as_str().unwrap().ends_with("/prod"));
}

// ── Failure and interruption ─────────────────────────────────────────

#[test]
fn missing_image_tag_fails_before_any_provider_call() {
    let config = DeployConfig {
        image_uri: Some(IMAGE_URI.into()),
        ..DeployConfig::default()
    };
    let provider = Recording::new();
    let err = config
        .require()
        .and_then(|inputs| Topology::assemble(&inputs, &provider))
        .expect_err("tag missing");
    assert!(err.is_config(), "got: {err}");
    assert!(provider.calls().is_empty());
}

#[test]
fn image_uri_outside_the_stack_registry_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let elsewhere = DeployInputs::new(
        "ts-express-server",
        "999999999999.dkr.ecr.us-east-1.amazonaws.com/ts-express-server",
        "v1",
    )
    .expect("inputs");
    let t = Topology::assemble(&elsewhere, engine.provider()).expect("assembles");

    let err = engine.converge(&t).expect_err("registry mismatch");
    assert!(err.is_config(), "got: {err}");
    assert!(err.to_string().contains("999999999999"), "{err}");
    assert!(engine.outputs().unwrap().is_empty());

    // the recorded registry answers the question before any provider call
    let before = engine.provider().calls().len();
    let again = engine.converge(&t).expect_err("still a mismatch");
    assert!(again.is_config(), "got: {again}");
    assert_eq!(engine.provider().calls().len(), before);
}

#[test]
fn rejected_edge_boundary_stops_dependents() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let engine = Engine::new(Recording::failing_on("alb-sg"), &path);
    let t = topology(engine.provider(), "v1");

    let err = engine.converge(&t).expect_err("alb-sg rejected");
    match &err {
        SkiffError::PlatformRejected {
            resource, message, ..
        } => {
            assert_eq!(resource, "alb-sg");
            assert!(message.contains("InvalidGroup.Duplicate"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }

    let attempted = engine.provider().names("create");
    assert!(!attempted.contains(&"task-sg".to_string()));
    assert!(!attempted.contains(&"app-lb".to_string()));

    let state = engine.state().expect("partial state");
    assert!(state.get(&ResourceName::new("alb-sg")).is_none());
    assert_eq!(state.resources.len(), attempted.len() - 1);
}

#[test]
fn cancellation_keeps_completed_steps() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    engine.provider().cancel_after(3, engine.cancel_handle());
    let t = topology(engine.provider(), "v1");

    let err = engine.converge(&t).expect_err("cancelled");
    let SkiffError::Cancelled { completed } = &err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(*completed, 3);
    assert_eq!(engine.provider().calls().len(), 3, "no step starts after the flag");

    let state = engine.state().expect("state");
    assert_eq!(state.resources.len(), 3);

    // a fresh run picks up where the cancelled one stopped
    engine.cancel_handle().store(false, Ordering::SeqCst);
    engine.provider().cancel_after(usize::MAX, Arc::new(AtomicBool::new(false)));
    let report = engine.converge(&t).expect("resumes");
    assert_eq!(report.summary.create, 15);
    assert_eq!(report.summary.unchanged, 3);
}

// ── Teardown ─────────────────────────────────────────────────────────

#[test]
fn destroy_runs_dependents_first() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let _ = engine.converge(&topology(engine.provider(), "v1")).expect("converges");

    let report = engine.destroy().expect("destroys");
    assert_eq!(report.summary.delete, 18);
    let deleted = engine.provider().names("delete");
    let pos = |n: &str| deleted.iter().position(|c| c == n).expect(n);
    assert!(pos("task-sg") < pos("alb-sg"));
    assert!(pos("ecs-service") < pos("app-listener"));
    assert!(pos("api-route") < pos("alb-integration"));
    assert!(pos("alb-integration") < pos("app-lb"));
    assert!(engine.state().expect("state").is_empty());
}

#[test]
fn shrinking_the_topology_deletes_leftovers() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(Recording::new(), dir.path().join("state.json"));
    let t = topology(engine.provider(), "v1");
    let _ = engine.converge(&t).expect("converges");

    let mut state = engine.state().expect("state");
    state.record(
        &ResourceName::new("legacy-queue"),
        ResourceKind::LogGroup,
        Value::Null,
        Attributes::new(),
        std::collections::BTreeSet::new(),
    );
    state.save(engine.state_path()).expect("save");

    let report = engine.converge(&t).expect("converges");
    assert_eq!(report.summary.delete, 1);
    assert_eq!(engine.provider().names("delete"), vec!["legacy-queue"]);
}

#[test]
fn duplicate_policy_attachment_is_declared_once() {
    let t = topology(&Recording::new(), "v1");
    let mut identity = t.compute.identity.clone();
    let policy = identity.policies()[0].clone();
    assert!(!identity.attach(policy), "attaching twice is a no-op");
    assert_eq!(identity.attachments().len(), t.compute.attachments.len());
}
