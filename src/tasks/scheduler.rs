//! 线程安全的任务调度句柄
//!
//! 所有状态变更都在同一把互斥锁内完成，`next_runnable` 的"挑选 + 标记 Running"
//! 是一个原子步骤，两个并发调用者永远拿不到同一个任务。

use crate::error::{NovelError, Result, StoreError};
use crate::tasks::manager::{Progress, TaskManager};
use crate::tasks::task::{Task, TaskStatus};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// 可克隆的调度器句柄，内部共享同一个 [`TaskManager`]
#[derive(Clone, Default)]
pub struct Scheduler {
    inner: Arc<Mutex<TaskManager>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_manager(manager: TaskManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    pub fn submit(&self, task: Task) -> Result<()> {
        self.lock()?.submit(task)
    }

    /// 批量提交，全部成功或全部撤回
    pub fn submit_all(&self, tasks: impl IntoIterator<Item = Task>) -> Result<()> {
        self.lock()?.submit_all(tasks)
    }

    /// 见 [`TaskManager::expand`]
    pub fn expand(&self, parent_id: &str, subtasks: Vec<Task>) -> Result<()> {
        self.lock()?.expand(parent_id, subtasks)
    }

    pub fn next_runnable(&self) -> Result<Option<Task>> {
        Ok(self.lock()?.next_runnable())
    }

    pub fn complete(&self, id: &str, result: impl Into<String>) -> Result<Vec<String>> {
        self.lock()?.complete(id, result)
    }

    pub fn fail(&self, id: &str, error: impl Into<String>) -> Result<()> {
        self.lock()?.fail(id, error)
    }

    pub fn resubmit(&self, task: Task) -> Result<()> {
        self.lock()?.resubmit(task)
    }

    pub fn get(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.lock()?.get(id).cloned())
    }

    /// 按提交顺序复制出全部任务
    pub fn snapshot(&self) -> Result<Vec<Task>> {
        Ok(self.lock()?.tasks().into_iter().cloned().collect())
    }

    pub fn progress(&self) -> Result<Progress> {
        Ok(self.lock()?.progress())
    }

    pub fn is_stalled(&self) -> Result<bool> {
        Ok(self.lock()?.is_stalled())
    }

    pub fn summary(&self) -> Result<String> {
        Ok(self.lock()?.summary())
    }

    /// 在锁内对只读视图执行任意查询（拓扑排序、可视化等）
    pub fn inspect<R>(&self, f: impl FnOnce(&TaskManager) -> R) -> Result<R> {
        Ok(f(&*self.lock()?))
    }

    /// 将任务状态写入 JSON 文件
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = {
            let manager = self.lock()?;
            serde_json::to_string_pretty(&*manager)
                .map_err(|e| StoreError::SerializationError(e.to_string()))?
        };
        tokio::fs::write(path.as_ref(), json)
            .await
            .map_err(|e| StoreError::IoError(format!("写入任务文件失败: {e}")))?;
        debug!(path = %path.as_ref().display(), "💾 任务状态已持久化");
        Ok(())
    }

    /// 从 JSON 文件恢复。重启前仍在运行的任务回到 Ready，等待重新领取。
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref())
            .await
            .map_err(|e| StoreError::IoError(format!("读取任务文件失败: {e}")))?;
        let mut manager: TaskManager = serde_json::from_str(&raw)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;
        let mut requeued = 0usize;
        for task in manager.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Ready;
                requeued += 1;
            }
        }
        info!(
            path = %path.as_ref().display(),
            tasks = manager.len(),
            requeued = requeued,
            "🗂️ 任务状态已恢复"
        );
        Ok(Self::from_manager(manager))
    }

    fn lock(&self) -> Result<MutexGuard<'_, TaskManager>> {
        self.inner
            .lock()
            .map_err(|e| NovelError::Other(format!("Lock poisoned: {}", e)))
    }
}
