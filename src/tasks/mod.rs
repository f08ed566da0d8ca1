mod dag;
pub mod decompose;
mod manager;
mod scheduler;
mod task;

pub use decompose::{
    Decomposition, SubtaskSpec, decompose_or_fallback, fallback_subtask, parse_decomposition,
};
pub use manager::{Progress, TaskManager};
pub use scheduler::Scheduler;
pub use task::{Task, TaskStatus};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NovelError, TaskError};
    use std::collections::HashSet;

    fn create_task(id: &str, dependencies: Vec<&str>) -> Task {
        Task::new(id, format!("Task {}", id))
            .with_dependencies(dependencies)
            .assigned_to("worker")
    }

    fn diamond() -> TaskManager {
        let mut manager = TaskManager::new();
        manager.submit(create_task("A", vec![])).unwrap();
        manager.submit(create_task("B", vec!["A"])).unwrap();
        manager.submit(create_task("C", vec!["A"])).unwrap();
        manager.submit(create_task("D", vec!["B", "C"])).unwrap();
        manager
    }

    #[test]
    fn test_diamond_scenario_insertion_order() {
        let mut manager = diamond();

        let a = manager.next_runnable().unwrap();
        assert_eq!(a.id, "A");
        assert!(manager.next_runnable().is_none(), "B/C 仍在等待 A");

        let unblocked = manager.complete("A", "outline").unwrap();
        assert_eq!(unblocked, vec!["B".to_string(), "C".to_string()]);

        assert_eq!(manager.next_runnable().unwrap().id, "B");
        assert_eq!(manager.next_runnable().unwrap().id, "C");
        assert!(manager.next_runnable().is_none());

        manager.complete("B", "b").unwrap();
        assert_eq!(manager.get("D").unwrap().status, TaskStatus::Pending);
        assert!(manager.next_runnable().is_none(), "D 只完成了一个依赖");

        manager.complete("C", "c").unwrap();
        assert_eq!(manager.get("D").unwrap().status, TaskStatus::Ready);
        assert_eq!(manager.next_runnable().unwrap().id, "D");
    }

    #[test]
    fn test_empty_dependencies_start_ready() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("solo", vec![])).unwrap();
        assert_eq!(manager.get("solo").unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn test_duplicate_submit_rejected() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("task1", vec![])).unwrap();
        let err = manager.submit(create_task("task1", vec![])).unwrap_err();
        assert!(matches!(err, NovelError::Task(TaskError::Duplicate(_))));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut manager = TaskManager::new();
        let err = manager.submit(create_task("task1", vec!["task1"])).unwrap_err();
        match err {
            NovelError::Task(TaskError::CyclicDependency { path, .. }) => {
                assert_eq!(path, vec!["task1", "task1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(manager.is_empty(), "被拒绝的任务不应写入");
    }

    #[test]
    fn test_cycle_through_forward_reference_rejected() {
        let mut manager = TaskManager::new();
        // task1 引用了尚未提交的 task3
        manager.submit(create_task("task1", vec!["task3"])).unwrap();
        manager.submit(create_task("task2", vec!["task1"])).unwrap();

        let before: Vec<String> = manager.tasks().iter().map(|t| t.id.clone()).collect();
        let err = manager.submit(create_task("task3", vec!["task2"])).unwrap_err();
        match err {
            NovelError::Task(TaskError::CyclicDependency { id, path }) => {
                assert_eq!(id, "task3");
                assert_eq!(path, vec!["task3", "task2", "task1", "task3"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let after: Vec<String> = manager.tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_forward_reference_unblocks_when_dependency_arrives() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("later", vec!["early"])).unwrap();
        assert_eq!(manager.get("later").unwrap().status, TaskStatus::Pending);

        manager.submit(create_task("early", vec![])).unwrap();
        assert_eq!(manager.next_runnable().unwrap().id, "early");
        manager.complete("early", "done").unwrap();
        assert_eq!(manager.get("later").unwrap().status, TaskStatus::Ready);
    }

    #[test]
    fn test_batch_submit_is_all_or_nothing() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("outline", vec![])).unwrap();

        let err = manager
            .submit_all([
                create_task("s1", vec!["outline", "s2"]),
                create_task("s2", vec!["s1"]),
            ])
            .unwrap_err();
        assert!(matches!(
            err,
            NovelError::Task(TaskError::CyclicDependency { .. })
        ));
        assert!(manager.get("s1").is_none(), "已插入的 s1 应被撤回");
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.topological_order(), vec!["outline"]);

        manager
            .submit_all([
                create_task("s1", vec!["outline"]),
                create_task("s2", vec!["s1"]),
            ])
            .unwrap();
        assert_eq!(manager.next_runnable().unwrap().id, "outline");
        manager.complete("outline", "done").unwrap();
        assert_eq!(manager.get("s1").unwrap().status, TaskStatus::Ready);
        assert_eq!(manager.get("s2").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_expand_makes_parent_wait_for_subtasks() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("chapter", vec![])).unwrap();
        manager
            .expand(
                "chapter",
                vec![create_task("scene1", vec![]), create_task("scene2", vec!["scene1"])],
            )
            .unwrap();

        let parent = manager.get("chapter").unwrap();
        assert_eq!(parent.status, TaskStatus::Pending);
        assert!(parent.dependencies.contains("scene1") && parent.dependencies.contains("scene2"));

        assert_eq!(manager.next_runnable().unwrap().id, "scene1");
        manager.complete("scene1", "s1").unwrap();
        assert_eq!(manager.next_runnable().unwrap().id, "scene2");
        assert_eq!(manager.complete("scene2", "s2").unwrap(), vec!["chapter"]);
        assert_eq!(manager.next_runnable().unwrap().id, "chapter");
    }

    #[test]
    fn test_expand_rejects_subtask_depending_on_parent() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("chapter", vec![])).unwrap();
        let err = manager
            .expand("chapter", vec![create_task("scene", vec!["chapter"])])
            .unwrap_err();
        assert!(matches!(
            err,
            NovelError::Task(TaskError::CyclicDependency { .. })
        ));
        assert!(manager.get("scene").is_none());
        let parent = manager.get("chapter").unwrap();
        assert_eq!(parent.status, TaskStatus::Ready);
        assert!(parent.dependencies.is_empty());

        manager.next_runnable().unwrap();
        let err = manager
            .expand("chapter", vec![create_task("late", vec![])])
            .unwrap_err();
        assert!(matches!(
            err,
            NovelError::Task(TaskError::InvalidState { action: "expand", .. })
        ));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_complete_requires_running() {
        let mut manager = diamond();
        let err = manager.complete("A", "too early").unwrap_err();
        assert!(matches!(
            err,
            NovelError::Task(TaskError::InvalidState {
                action: "complete",
                ..
            })
        ));
        assert_eq!(manager.get("A").unwrap().status, TaskStatus::Ready);
        assert!(manager.get("A").unwrap().result.is_none());

        let err = manager.complete("ghost", "x").unwrap_err();
        assert!(matches!(err, NovelError::Task(TaskError::Unknown(_))));
    }

    #[test]
    fn test_failed_task_blocks_dependents_and_stalls() {
        let mut manager = diamond();
        manager.next_runnable().unwrap();
        manager.fail("A", "generation service down").unwrap();

        assert_eq!(manager.get("A").unwrap().error(), Some("generation service down"));
        assert!(manager.next_runnable().is_none());
        assert!(manager.is_stalled());
        assert_eq!(manager.blocked_by("D"), vec!["A".to_string()]);

        let progress = manager.progress();
        assert_eq!(progress.total, 4);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.pending, 3);
        assert_eq!(progress.completed, 0);

        // 终态不可再次失败或完成
        assert!(manager.fail("A", "again").is_err());
        assert!(manager.complete("A", "late").is_err());
    }

    #[test]
    fn test_resubmit_failed_task_with_adjusted_dependencies() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("root", vec![])).unwrap();
        manager.submit(create_task("child", vec!["root"])).unwrap();
        manager.submit(create_task("other", vec![])).unwrap();

        manager.next_runnable().unwrap();
        manager.fail("root", "boom").unwrap();
        assert!(!manager.is_stalled(), "other 仍然可执行");

        manager.resubmit(create_task("root", vec!["other"])).unwrap();
        assert_eq!(manager.history().len(), 1);
        assert_eq!(manager.get("root").unwrap().status, TaskStatus::Pending);

        // 提交顺序保持不变：root 仍排在 other 之前
        let order: Vec<&str> = manager.tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(order, vec!["root", "child", "other"]);

        assert_eq!(manager.next_runnable().unwrap().id, "other");
        manager.complete("other", "ok").unwrap();
        assert_eq!(manager.next_runnable().unwrap().id, "root");
        manager.complete("root", "ok").unwrap();
        assert_eq!(manager.next_runnable().unwrap().id, "child");
    }

    #[test]
    fn test_resubmit_rejects_cycles_and_live_tasks() {
        let mut manager = TaskManager::new();
        manager.submit(create_task("a", vec![])).unwrap();
        manager.submit(create_task("b", vec!["a", "missing"])).unwrap();

        let err = manager.resubmit(create_task("a", vec!["b"])).unwrap_err();
        assert!(matches!(
            err,
            NovelError::Task(TaskError::InvalidState { .. })
        ));

        manager.next_runnable().unwrap();
        manager.fail("a", "x").unwrap();
        let err = manager.resubmit(create_task("a", vec!["b"])).unwrap_err();
        assert!(matches!(
            err,
            NovelError::Task(TaskError::CyclicDependency { .. })
        ));
        assert!(manager.history().is_empty());
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let manager = diamond();
        let order = manager.topological_order();
        assert_eq!(order, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_get_dependency_chain_multiple() {
        let manager = diamond();
        let chains = manager.dependency_chains("D");
        assert_eq!(chains.len(), 2, "应该有两条依赖链");
        assert!(chains.contains(&vec!["D".to_string(), "B".to_string(), "A".to_string()]));
        assert!(chains.contains(&vec!["D".to_string(), "C".to_string(), "A".to_string()]));
    }

    #[test]
    fn test_visualize_dependencies() {
        let manager = diamond();
        let mermaid = manager.visualize_dependencies();
        assert!(mermaid.starts_with("graph TD"));
        assert!(mermaid.contains("  A[A]\n"));
        assert!(mermaid.contains("B[B] --> D[D]"));
        assert!(mermaid.contains("C[C] --> D[D]"));
    }

    #[test]
    fn test_summary_line() {
        let mut manager = diamond();
        manager.next_runnable().unwrap();
        manager.complete("A", "ok").unwrap();
        assert_eq!(
            manager.summary(),
            "Progress: 1/4 completed | 3 pending | 0 running | 0 failed"
        );
    }

    #[test]
    fn test_concurrent_callers_never_share_a_task() {
        let scheduler = Scheduler::new();
        for i in 0..200 {
            scheduler
                .submit(create_task(&format!("t{i}"), vec![]))
                .unwrap();
        }

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let scheduler = scheduler.clone();
                std::thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Some(task) = scheduler.next_runnable().unwrap() {
                        claimed.push(task.id);
                    }
                    claimed
                })
            })
            .collect();

        let mut seen = HashSet::new();
        let mut total = 0;
        for handle in handles {
            for id in handle.join().unwrap() {
                total += 1;
                assert!(seen.insert(id), "同一任务被领取了两次");
            }
        }
        assert_eq!(total, 200);
        assert_eq!(scheduler.progress().unwrap().running, 200);
    }

    #[test]
    fn test_never_returns_task_with_incomplete_dependency() {
        // 分层 DAG：第 n 层依赖第 n-1 层的全部任务
        let scheduler = Scheduler::new();
        let mut previous: Vec<String> = Vec::new();
        for layer in 0..4 {
            let mut current = Vec::new();
            for i in 0..3 {
                let id = format!("L{layer}-{i}");
                scheduler
                    .submit(
                        Task::new(id.clone(), "layered")
                            .with_dependencies(previous.clone())
                            .assigned_to("w"),
                    )
                    .unwrap();
                current.push(id);
            }
            previous = current;
        }

        let mut completed: HashSet<String> = HashSet::new();
        while let Some(task) = scheduler.next_runnable().unwrap() {
            assert!(task.dependencies.iter().all(|d| completed.contains(d)));
            scheduler.complete(&task.id, "ok").unwrap();
            completed.insert(task.id);
        }
        assert_eq!(completed.len(), 12);
        assert!(scheduler.inspect(|m| m.is_finished()).unwrap());
    }

    #[tokio::test]
    async fn test_save_and_load_requeues_running_tasks() {
        let dir = std::env::temp_dir().join(format!("novel-agent-tasks-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("tasks.json");

        let scheduler = Scheduler::new();
        scheduler.submit(create_task("A", vec![])).unwrap();
        scheduler.submit(create_task("B", vec!["A"])).unwrap();
        scheduler.next_runnable().unwrap();
        scheduler.save(&path).await.unwrap();

        let restored = Scheduler::load(&path).await.unwrap();
        assert_eq!(restored.get("A").unwrap().unwrap().status, TaskStatus::Ready);
        assert_eq!(restored.next_runnable().unwrap().unwrap().id, "A");
        restored.complete("A", "outline").unwrap();
        assert_eq!(restored.next_runnable().unwrap().unwrap().id, "B");

        std::fs::remove_dir_all(&dir).ok();
    }
}
