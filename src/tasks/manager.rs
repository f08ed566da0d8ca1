//! 任务管理器

use crate::error::{Result, TaskError};
use crate::tasks::task::{Task, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// 任务进度快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    /// 所有未终结的任务（Pending / Ready / Running）
    pub pending: usize,
    pub running: usize,
    pub failed: usize,
}

/// DAG 任务集合管理器，负责依赖解析与状态流转。
///
/// 本身不加锁；并发场景下通过 [`Scheduler`](crate::tasks::Scheduler) 包装使用。
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TaskManager {
    pub(crate) tasks: HashMap<String, Task>,
    /// 提交顺序，决定 `next_runnable` 的公平性
    pub(crate) order: Vec<String>,
    /// dep_id → 依赖它的任务（包括尚未提交的 dep_id）
    dependents: HashMap<String, Vec<String>>,
    /// 被 `resubmit` 替换掉的旧版本
    history: Vec<Task>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 提交新任务。ID 重复或会形成环时拒绝，且不做任何修改。
    pub fn submit(&mut self, mut task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(TaskError::Duplicate(task.id).into());
        }
        if let Some(path) = self.find_cycle(&task.id, &task.dependencies) {
            warn!(task_id = %task.id, cycle = ?path, "🔁 拒绝提交：检测到循环依赖");
            return Err(TaskError::CyclicDependency { id: task.id, path }.into());
        }

        task.result = None;
        task.status = if self.dependencies_completed(&task) {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        };
        task.touch();

        self.index_dependents(&task);
        debug!(task_id = %task.id, status = task.status.label(), "📥 任务已提交");
        self.order.push(task.id.clone());
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// 批量提交，要么全部成功，要么不留下任何任务。
    ///
    /// 批内任务可以依赖彼此；遇到错误时撤回本批已插入的任务后返回该错误。
    pub fn submit_all(&mut self, tasks: impl IntoIterator<Item = Task>) -> Result<()> {
        let mut inserted: Vec<String> = Vec::new();
        for task in tasks {
            let id = task.id.clone();
            if let Err(e) = self.submit(task) {
                self.withdraw(&inserted);
                return Err(e);
            }
            inserted.push(id);
        }
        Ok(())
    }

    /// 提交 `parent_id` 拆解出的子任务，并让父任务依赖全部子任务，
    /// 父任务因此在最后运行并整合子任务的结果。
    ///
    /// 父任务必须尚未被领取（Pending 或 Ready）。任何一步失败都会撤回整批子任务。
    pub fn expand(&mut self, parent_id: &str, subtasks: Vec<Task>) -> Result<()> {
        let parent = self
            .tasks
            .get(parent_id)
            .ok_or_else(|| TaskError::Unknown(parent_id.to_string()))?;
        if !matches!(parent.status, TaskStatus::Pending | TaskStatus::Ready) {
            return Err(TaskError::InvalidState {
                id: parent_id.to_string(),
                status: parent.status.label().to_string(),
                action: "expand",
            }
            .into());
        }

        let ids: Vec<String> = subtasks.iter().map(|t| t.id.clone()).collect();
        self.submit_all(subtasks)?;
        let new_deps = ids.iter().cloned().collect();
        if let Some(path) = self.find_cycle(parent_id, &new_deps) {
            self.withdraw(&ids);
            warn!(task_id = %parent_id, cycle = ?path, "🔁 拒绝拆解：子任务依赖了父任务");
            return Err(TaskError::CyclicDependency {
                id: parent_id.to_string(),
                path,
            }
            .into());
        }

        if let Some(parent) = self.tasks.get_mut(parent_id) {
            parent.dependencies.extend(ids.iter().cloned());
            parent.status = TaskStatus::Pending;
            parent.touch();
        }
        for id in &ids {
            let list = self.dependents.entry(id.clone()).or_default();
            if !list.iter().any(|d| d == parent_id) {
                list.push(parent_id.to_string());
            }
        }
        debug!(task_id = %parent_id, subtasks = ?ids, "🧩 父任务等待子任务完成");
        Ok(())
    }

    /// 按提交顺序领取第一个 Ready 任务并标记为 Running
    pub fn next_runnable(&mut self) -> Option<Task> {
        let id = self
            .order
            .iter()
            .find(|id| {
                self.tasks
                    .get(id.as_str())
                    .is_some_and(|t| t.status == TaskStatus::Ready)
            })?
            .clone();
        let task = self.tasks.get_mut(&id)?;
        task.status = TaskStatus::Running;
        task.touch();
        debug!(task_id = %id, "🏃 任务已领取");
        Some(task.clone())
    }

    /// 标记 Running 任务完成，返回因此被解锁的任务 ID
    pub fn complete(&mut self, id: &str, result: impl Into<String>) -> Result<Vec<String>> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::Unknown(id.to_string()))?;
        if task.status != TaskStatus::Running {
            return Err(TaskError::InvalidState {
                id: id.to_string(),
                status: task.status.label().to_string(),
                action: "complete",
            }
            .into());
        }
        task.status = TaskStatus::Completed;
        task.result = Some(result.into());
        task.touch();

        let promoted = self.promote_dependents(id);
        info!(task_id = %id, unblocked = ?promoted, "✅ 任务完成");
        Ok(promoted)
    }

    /// 标记任务失败。依赖它的任务保持阻塞，等待人工 `resubmit`。
    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> Result<()> {
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| TaskError::Unknown(id.to_string()))?;
        if task.status.is_terminal() {
            return Err(TaskError::InvalidState {
                id: id.to_string(),
                status: task.status.label().to_string(),
                action: "fail",
            }
            .into());
        }
        let error = error.into();
        warn!(task_id = %id, error = %error, "💥 任务失败");
        task.status = TaskStatus::Failed(error);
        task.touch();
        Ok(())
    }

    /// 用新定义替换一个 Failed 或仍在 Pending 的任务，保留其提交顺序位置
    pub fn resubmit(&mut self, mut task: Task) -> Result<()> {
        let previous = self
            .tasks
            .get(&task.id)
            .ok_or_else(|| TaskError::Unknown(task.id.clone()))?;
        if !matches!(previous.status, TaskStatus::Failed(_) | TaskStatus::Pending) {
            return Err(TaskError::InvalidState {
                id: task.id.clone(),
                status: previous.status.label().to_string(),
                action: "resubmit",
            }
            .into());
        }
        if let Some(path) = self.find_cycle(&task.id, &task.dependencies) {
            return Err(TaskError::CyclicDependency { id: task.id, path }.into());
        }

        let previous = previous.clone();
        for dep in &previous.dependencies {
            if let Some(list) = self.dependents.get_mut(dep) {
                list.retain(|d| d != &previous.id);
            }
        }

        task.result = None;
        task.created_at = previous.created_at;
        task.status = if self.dependencies_completed(&task) {
            TaskStatus::Ready
        } else {
            TaskStatus::Pending
        };
        task.touch();
        self.index_dependents(&task);
        info!(task_id = %task.id, status = task.status.label(), "🔄 任务已重新提交");
        self.history.push(previous);
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// 按提交顺序返回全部任务
    pub fn tasks(&self) -> Vec<&Task> {
        self.order
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .collect()
    }

    pub fn history(&self) -> &[Task] {
        &self.history
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 获取进度统计
    pub fn progress(&self) -> Progress {
        let mut progress = Progress {
            total: self.tasks.len(),
            ..Progress::default()
        };
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Completed => progress.completed += 1,
                TaskStatus::Failed(_) => progress.failed += 1,
                TaskStatus::Running => {
                    progress.running += 1;
                    progress.pending += 1;
                }
                TaskStatus::Pending | TaskStatus::Ready => progress.pending += 1,
            }
        }
        progress
    }

    /// 没有 Ready 或 Running 的任务，但仍有任务在等待：进度永远不会再推进
    pub fn is_stalled(&self) -> bool {
        let mut waiting = false;
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Ready | TaskStatus::Running => return false,
                TaskStatus::Pending => waiting = true,
                _ => {}
            }
        }
        waiting
    }

    /// 检查是否所有任务都已终结
    pub fn is_finished(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// 生成适合注入 Worker 上下文的任务进度摘要
    pub fn summary(&self) -> String {
        let p = self.progress();
        format!(
            "Progress: {}/{} completed | {} pending | {} running | {} failed",
            p.completed, p.total, p.pending, p.running, p.failed
        )
    }

    pub(crate) fn dependencies_completed(&self, task: &Task) -> bool {
        task.dependencies.iter().all(|dep_id| {
            self.tasks
                .get(dep_id)
                .is_some_and(|dep| dep.status == TaskStatus::Completed)
        })
    }

    /// 撤回刚提交、尚未被领取的任务
    fn withdraw(&mut self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        for id in ids {
            self.tasks.remove(id);
        }
        self.order.retain(|id| !ids.contains(id));
        for list in self.dependents.values_mut() {
            list.retain(|d| !ids.contains(d));
        }
        self.dependents.retain(|_, list| !list.is_empty());
        debug!(tasks = ?ids, "↩️ 批量提交已撤回");
    }

    fn index_dependents(&mut self, task: &Task) {
        for dep in &task.dependencies {
            let list = self.dependents.entry(dep.clone()).or_default();
            if !list.contains(&task.id) {
                list.push(task.id.clone());
            }
        }
    }

    fn promote_dependents(&mut self, id: &str) -> Vec<String> {
        let candidates = self.dependents.get(id).cloned().unwrap_or_default();
        let ready: Vec<String> = candidates
            .into_iter()
            .filter(|dep_id| {
                self.tasks.get(dep_id).is_some_and(|t| {
                    t.status == TaskStatus::Pending && self.dependencies_completed(t)
                })
            })
            .collect();
        for dep_id in &ready {
            if let Some(task) = self.tasks.get_mut(dep_id) {
                task.status = TaskStatus::Ready;
                task.touch();
            }
        }
        ready
    }
}
