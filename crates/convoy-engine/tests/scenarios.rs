//! End-to-end flows through the orchestrator against a temporary hooks root.

use convoy_core::EngineError;
use convoy_core::approval::{ApprovalCategory, ApprovalStatus};
use convoy_core::config::OrchestrationConfig;
use convoy_core::convoy::{ConvoyConfig, ConvoyId, ConvoyStatus};
use convoy_core::task::{TaskConfig, TaskId, TaskStatus};
use convoy_engine::{Orchestrator, VersionControl};
use std::collections::BTreeMap;
use std::sync::Arc;

struct NoVcs;

impl VersionControl for NoVcs {
    fn head_revision(&self) -> convoy_core::EngineResult<String> {
        Err(EngineError::External("no repository".into()))
    }

    fn reset_previous(&self) -> convoy_core::EngineResult<()> {
        Err(EngineError::External("no repository".into()))
    }

    fn changed_files(&self, _: &str, _: &str) -> convoy_core::EngineResult<Vec<String>> {
        Ok(Vec::new())
    }
}

fn orchestrator() -> (tempfile::TempDir, Orchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestrationConfig::default().with_hooks_override(dir.path().to_str());
    let orch = Orchestrator::with_vcs(&config, Box::new(NoVcs)).unwrap();
    (dir, orch)
}

fn finish(orch: &Orchestrator, id: &TaskId) {
    orch.tasks.assign_task(id, "builder").unwrap();
    orch.tasks.start_task(id).unwrap();
    orch.tasks.complete_task(id, Some("ok".into())).unwrap();
}

#[test]
fn dependent_task_unblocks_when_dependency_completes() {
    let (_dir, orch) = orchestrator();
    let a = orch.tasks.create_task(TaskConfig::new("A")).unwrap();
    assert_eq!(a.status, TaskStatus::Pending);

    let b = orch
        .tasks
        .create_task(TaskConfig::new("B").with_dependencies([a.id.clone()]))
        .unwrap();
    assert_eq!(b.status, TaskStatus::Blocked);

    finish(&orch, &a.id);
    let b = orch.tasks.get_task(&b.id).unwrap();
    assert_eq!(b.status, TaskStatus::Pending);
    assert_eq!(b.history.len(), 2);
}

#[test]
fn convoy_completes_only_after_every_task() {
    let (_dir, orch) = orchestrator();
    let convoy = orch
        .convoys
        .create_convoy(
            ConvoyConfig::new("asset pass")
                .with_task(TaskConfig::new("import meshes"))
                .with_task(TaskConfig::new("bake lighting")),
        )
        .unwrap();

    finish(&orch, &convoy.tasks[0]);
    let mid = orch.convoys.get_convoy(&convoy.id).unwrap();
    assert_eq!(mid.status, ConvoyStatus::InProgress);
    assert!(!mid.progress.all_tasks_complete);
    assert!(orch.convoys.complete_convoy(&convoy.id).is_err());

    finish(&orch, &convoy.tasks[1]);
    let done = orch.convoys.complete_convoy(&convoy.id).unwrap();
    assert_eq!(done.status, ConvoyStatus::Completed);
    assert_eq!(done.progress.completed, 2);
}

#[test]
fn member_regression_blocks_convoy_completion() {
    let (_dir, orch) = orchestrator();
    let convoy = orch
        .convoys
        .create_convoy(ConvoyConfig::new("c").with_task(TaskConfig::new("t")))
        .unwrap();
    let t = &convoy.tasks[0];
    orch.tasks.assign_task(t, "builder").unwrap();
    orch.tasks.start_task(t).unwrap();
    orch.tasks.fail_task(t, "flaky").unwrap();
    orch.tasks.retry_task(t).unwrap();

    assert!(matches!(
        orch.convoys.complete_convoy(&convoy.id).unwrap_err(),
        EngineError::Precondition(_)
    ));
}

#[test]
fn overspend_pauses_and_budget_approval_resumes() {
    let (_dir, orch) = orchestrator();
    orch.safety.record_cost(6.00, "x").unwrap();
    let status = orch.safety.record_cost(5.00, "y").unwrap();
    assert!(status.paused);
    assert!(status.pause_reason.as_deref().unwrap().contains("budget"));
    assert!(!orch.safety.check_budget(0.01).unwrap());

    let request = orch
        .safety
        .request_human_approval("budget exceeded", BTreeMap::new(), None)
        .unwrap();
    assert_eq!(request.category, ApprovalCategory::Budget);

    let resolved = orch.safety.resolve_approval(&request.id, true, None).unwrap();
    assert_eq!(resolved.status, ApprovalStatus::Approved);
    assert!(!orch.safety.budget_status().unwrap().paused);
}

#[test]
fn concurrent_assign_has_exactly_one_winner() {
    let (_dir, orch) = orchestrator();
    let orch = Arc::new(orch);
    let task = orch.tasks.create_task(TaskConfig::new("contested")).unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let orch = Arc::clone(&orch);
            let id = task.id.clone();
            std::thread::spawn(move || orch.tasks.assign_task(&id, &format!("agent-{i}")))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(EngineError::is_invalid_transition));
    assert_eq!(orch.tasks.get_task(&task.id).unwrap().status, TaskStatus::Assigned);
}

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestrationConfig::default().with_hooks_override(dir.path().to_str());
    let convoy_id = {
        let orch = Orchestrator::with_vcs(&config, Box::new(NoVcs)).unwrap();
        let convoy = orch
            .convoys
            .create_convoy(ConvoyConfig::new("persisted").with_task(TaskConfig::new("t")))
            .unwrap();
        orch.safety.record_cost(2.5, "warmup").unwrap();
        orch.safety.register_agent("agent-1", "builder").unwrap();
        convoy.id
    };

    let orch = Orchestrator::with_vcs(&config, Box::new(NoVcs)).unwrap();
    let convoy = orch.convoys.get_convoy(&convoy_id).unwrap();
    assert_eq!(convoy.progress.total, 1);
    assert_eq!(orch.safety.budget_status().unwrap().spent_this_hour, 2.5);
    assert_eq!(orch.safety.list_active_agents().unwrap().len(), 1);
    let next = orch.tasks.create_task(TaskConfig::new("after restart")).unwrap();
    assert_eq!(next.id.as_str(), "task-002");
}

#[test]
fn rollback_without_repository_reports_failure() {
    let (_dir, orch) = orchestrator();
    let record = orch.safety.rollback("bad deploy").unwrap();
    assert!(!record.success);
    assert!(record.message.contains("no repository"));
    let status = orch.safety.safety_status().unwrap();
    assert_eq!(status.last_rollback.unwrap().reason, "bad deploy");
}

#[test]
fn invalid_inline_task_rejects_convoy_before_touching_members() {
    let (_dir, orch) = orchestrator();
    let loose = orch.tasks.create_task(TaskConfig::new("loose")).unwrap();

    let mut config = ConvoyConfig::new("broken")
        .with_task(TaskConfig::new("ok-inline"))
        .with_task(TaskConfig::new(""));
    config.task_ids = vec![loose.id.clone()];
    let err = orch.convoys.create_convoy(config).unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));

    assert!(orch.tasks.get_task(&loose.id).unwrap().convoy_id.is_none());
    assert_eq!(orch.tasks.list_tasks(&Default::default()).unwrap().len(), 1);

    let mut config = ConvoyConfig::new("fixed");
    config.task_ids = vec![loose.id.clone()];
    let convoy = orch.convoys.create_convoy(config).unwrap();
    assert_eq!(convoy.id.as_str(), "convoy-001");
    assert_eq!(orch.tasks.get_task(&loose.id).unwrap().convoy_id, Some(convoy.id));
}

#[test]
fn failed_convoy_save_releases_adopted_and_inline_tasks() {
    let (dir, orch) = orchestrator();
    let loose = orch.tasks.create_task(TaskConfig::new("loose")).unwrap();

    // Occupy the temp path of the next convoy file so its save fails.
    let blocker = dir.path().join("convoys/convoy-001.json.tmp");
    std::fs::create_dir_all(&blocker).unwrap();

    let mut config = ConvoyConfig::new("unsaved").with_task(TaskConfig::new("inline"));
    config.task_ids = vec![loose.id.clone()];
    let err = orch.convoys.create_convoy(config).unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));

    let loose = orch.tasks.get_task(&loose.id).unwrap();
    assert!(loose.convoy_id.is_none());
    assert_eq!(loose.status, TaskStatus::Pending);
    let inline = orch.tasks.get_task(&TaskId::from_seq(2)).unwrap();
    assert!(inline.convoy_id.is_none());
    assert_eq!(inline.status, TaskStatus::Cancelled);

    std::fs::remove_dir(&blocker).unwrap();
    assert!(orch.convoys.get_convoy(&ConvoyId::from_seq(1)).unwrap_err().is_not_found());

    let mut config = ConvoyConfig::new("retry");
    config.task_ids = vec![loose.id.clone()];
    let convoy = orch.convoys.create_convoy(config).unwrap();
    assert_eq!(convoy.tasks, vec![loose.id]);
}

#[test]
fn adding_to_finished_convoy_leaves_task_free() {
    let (_dir, orch) = orchestrator();
    let convoy = orch
        .convoys
        .create_convoy(ConvoyConfig::new("c").with_task(TaskConfig::new("t")))
        .unwrap();
    orch.convoys.cancel_convoy(&convoy.id, None).unwrap();
    let extra = orch.tasks.create_task(TaskConfig::new("late")).unwrap();

    let err = orch.convoys.add_task_to_convoy(&convoy.id, &extra.id).unwrap_err();
    assert!(matches!(err, EngineError::Precondition(_)));
    assert!(orch.tasks.get_task(&extra.id).unwrap().convoy_id.is_none());
    assert_eq!(orch.convoys.get_convoy(&convoy.id).unwrap().tasks.len(), 1);
}

#[test]
fn failed_convoy_update_unstamps_added_task() {
    let (dir, orch) = orchestrator();
    let convoy = orch
        .convoys
        .create_convoy(ConvoyConfig::new("c").with_task(TaskConfig::new("t")))
        .unwrap();
    let extra = orch.tasks.create_task(TaskConfig::new("extra")).unwrap();

    let blocker = dir.path().join(format!("convoys/{}.json.tmp", convoy.id));
    std::fs::create_dir_all(&blocker).unwrap();
    let err = orch.convoys.add_task_to_convoy(&convoy.id, &extra.id).unwrap_err();
    assert!(matches!(err, EngineError::Storage(_)));
    assert!(orch.tasks.get_task(&extra.id).unwrap().convoy_id.is_none());
    assert_eq!(orch.convoys.get_convoy(&convoy.id).unwrap().tasks.len(), 1);

    std::fs::remove_dir(&blocker).unwrap();
    let convoy = orch.convoys.add_task_to_convoy(&convoy.id, &extra.id).unwrap();
    assert!(convoy.has_member(&extra.id));
    assert_eq!(orch.tasks.get_task(&extra.id).unwrap().convoy_id, Some(convoy.id));
}
