//! Dependents created while their dependency completes never stay blocked.

use convoy_core::config::OrchestrationConfig;
use convoy_core::task::{TaskConfig, TaskStatus};
use convoy_engine::Orchestrator;
use std::sync::{Arc, Barrier};

/// Creator threads add dependents of `base` while another thread drives
/// `base` to completion. Whatever the interleaving, every dependent ends
/// up `Pending` once all threads have joined.
#[test]
fn dependents_created_during_completion_are_unblocked() {
    for _ in 0..10 {
        let dir = tempfile::tempdir().unwrap();
        let config = OrchestrationConfig::default().with_hooks_override(dir.path().to_str());
        let orch = Orchestrator::open(&config).unwrap();
        let base = orch.tasks.create_task(TaskConfig::new("base")).unwrap();
        orch.tasks.assign_task(&base.id, "builder").unwrap();
        orch.tasks.start_task(&base.id).unwrap();

        let barrier = Arc::new(Barrier::new(5));
        let mut handles = Vec::new();
        for i in 0..4 {
            let tasks = orch.tasks.clone();
            let barrier = Arc::clone(&barrier);
            let dep = base.id.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                (0..5)
                    .map(|j| {
                        tasks
                            .create_task(
                                TaskConfig::new(format!("dependent-{i}-{j}"))
                                    .with_dependencies([dep.clone()]),
                            )
                            .unwrap()
                            .id
                    })
                    .collect::<Vec<_>>()
            }));
        }
        let completer = {
            let tasks = orch.tasks.clone();
            let barrier = Arc::clone(&barrier);
            let id = base.id.clone();
            std::thread::spawn(move || {
                barrier.wait();
                tasks.complete_task(&id, None).unwrap();
            })
        };

        let created: Vec<_> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        completer.join().unwrap();

        assert_eq!(created.len(), 20);
        for id in &created {
            assert_eq!(orch.tasks.get_task(id).unwrap().status, TaskStatus::Pending, "{id}");
        }
    }
}
