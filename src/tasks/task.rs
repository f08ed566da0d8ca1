//! 任务定义

use crate::now_secs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 任务状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// 等待依赖完成
    Pending,
    /// 依赖已全部完成，可被领取
    Ready,
    /// 正在某个 Worker 上执行
    Running,
    /// 已完成（终态）
    Completed,
    /// 失败（终态），附带错误原因
    Failed(String),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed(_))
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Ready => "Ready",
            TaskStatus::Running => "Running",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed(_) => "Failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// 任务 ID
    pub id: String,
    /// 任务描述
    pub description: String,
    /// 依赖的任务 ID 集合
    pub dependencies: BTreeSet<String>,
    /// 任务状态
    pub status: TaskStatus,
    /// 任务结果
    pub result: Option<String>,
    /// 负责执行的 Worker 名称
    pub assigned_worker: String,
    /// 由哪个任务拆解而来
    pub parent_id: Option<String>,
    /// 所属分组（如同一章的写作、审阅、检查），结果在上下文树中挂到同一个分组节点下
    #[serde(default)]
    pub group: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        let now = now_secs();
        Self {
            id: id.into(),
            description: description.into(),
            dependencies: BTreeSet::new(),
            status: TaskStatus::Pending,
            result: None,
            assigned_worker: String::new(),
            parent_id: None,
            group: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_dependency(&mut self, dep: impl Into<String>) {
        self.dependencies.insert(dep.into());
    }

    pub fn assigned_to(mut self, worker: impl Into<String>) -> Self {
        self.assigned_worker = worker.into();
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// 失败原因（仅 `Failed` 状态下存在）
    pub fn error(&self) -> Option<&str> {
        match &self.status {
            TaskStatus::Failed(cause) => Some(cause),
            _ => None,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = now_secs();
    }
}

