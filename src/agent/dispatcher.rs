//! 调度执行循环
//!
//! ```text
//! Scheduler::next_runnable ─▶ 选择 Worker ─▶ 构建上下文 ─▶ Agent::run (重试)
//!        ▲                  └──────── 同一个超时 + 取消范围 ────────┘      │
//!        └──── complete / fail ◀──── BoundedMemory + ContextTree ◀─────────┘
//! ```
//!
//! 每个任务从领取后的全部生成调用（Worker 选择、树摘要、Worker 本身）都在 `JoinSet`
//! 中执行，并受同一个时限与取消令牌约束；调度器的临界区里从不等待生成服务。
//! 长期记忆的嵌入写入在后台执行，同样有时限。

use crate::Metadata;
use crate::agent::{Agent, AgentRegistry};
use crate::context::{NodeId, SharedContextTree};
use crate::error::{AgentError, NovelError, Result, TaskError};
use crate::llm::LlmClient;
use crate::memory::{BoundedMemory, MemoryItem};
use crate::tasks::{Progress, Scheduler, Task, decompose_or_fallback, fallback_subtask};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 记忆中任务结果条目的类型
const TASK_RESULT_TYPE: &str = "task_result";

/// 上下文树中分组节点的元数据键
const GROUP_KEY: &str = "group";

/// 调度参数
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// 同时执行的任务数上限
    pub max_concurrency: usize,
    /// 单个任务的总时限，覆盖 Worker 选择、上下文构建与全部重试
    pub task_timeout: Duration,
    /// 每个任务最多尝试次数，只对可重试错误生效
    pub max_attempts: u32,
    /// 首次重试前的等待，之后指数翻倍
    pub retry_delay: Duration,
    /// 注入上下文的近期记忆条数
    pub memory_window: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            task_timeout: Duration::from_millis(300_000),
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            memory_window: 5,
        }
    }
}

/// 一次 [`Dispatcher::run`] 的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub progress: Progress,
    /// 仍有任务等待，但因依赖失败永远不会就绪
    pub stalled: bool,
    pub cancelled: bool,
    /// `(task_id, 错误原因)`，按失败先后排列
    pub failures: Vec<(String, String)>,
}

/// 任务上下文的各个来源，每个执行中的任务持有一份克隆
#[derive(Clone)]
struct ContextSources {
    scheduler: Scheduler,
    memory: Arc<BoundedMemory>,
    tree: Option<SharedContextTree>,
    summarizer: Option<Arc<dyn LlmClient>>,
    memory_window: usize,
}

impl ContextSources {
    async fn build(&self, task: &Task) -> Result<String> {
        let mut sections = vec![format!("Task ({}): {}", task.id, task.description)];

        let mut prerequisites = Vec::new();
        let mut subtasks = Vec::new();
        for dep in &task.dependencies {
            let Some(dep_task) = self.scheduler.get(dep)? else {
                continue;
            };
            let Some(result) = dep_task.result else {
                continue;
            };
            let entry = format!("[{dep}]\n{result}");
            if dep_task.parent_id.as_deref() == Some(task.id.as_str()) {
                subtasks.push(entry);
            } else {
                prerequisites.push(entry);
            }
        }
        if !prerequisites.is_empty() {
            sections.push(format!(
                "Results of prerequisite tasks:\n{}",
                prerequisites.join("\n\n")
            ));
        }
        if !subtasks.is_empty() {
            sections.push(format!(
                "Results of subtasks to integrate into a cohesive response:\n{}",
                subtasks.join("\n\n")
            ));
        }

        let recent = self.memory.recent(self.memory_window).await;
        if !recent.is_empty() {
            sections.push(format!("Recent memory:\n{}", BoundedMemory::digest(&recent)));
        }

        if let Some(summary) = self.tree_summary().await {
            sections.push(format!("Story so far:\n{summary}"));
        }

        sections.push(self.scheduler.summary()?);
        Ok(sections.join("\n\n"))
    }

    /// 摘要失败时不注入，任务照常执行
    async fn tree_summary(&self) -> Option<String> {
        let (tree, llm) = (self.tree.as_ref()?, self.summarizer.as_ref()?);
        if tree.len().await <= 1 {
            return None;
        }
        match tree.cached_summary(tree.root(), llm.as_ref()).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                warn!(error = %e, "⚠️ 上下文树摘要失败，本次不注入摘要");
                None
            }
        }
    }
}

/// 单个任务执行所需的全部句柄
struct Job {
    registry: Arc<AgentRegistry>,
    coordinator: Option<Arc<dyn LlmClient>>,
    sources: ContextSources,
    config: DispatchConfig,
    cancel: CancellationToken,
}

impl Job {
    /// 成功时返回 `(实际执行的 Worker, 输出)`
    async fn execute(
        &self,
        task: &Task,
        agent: Option<Arc<dyn Agent>>,
    ) -> Result<(String, String)> {
        let work = async {
            let agent = match agent {
                Some(agent) => agent,
                None => {
                    self.registry
                        .select(self.coordinator.as_deref(), &task.description)
                        .await?
                }
            };
            let context = self.sources.build(task).await?;
            debug!(task_id = %task.id, agent = %agent.name(), context_len = context.len(), "🧾 上下文已构建");
            let output = attempt(agent.as_ref(), &task.id, &context, &self.config).await?;
            Ok::<_, NovelError>((agent.name().to_string(), output))
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(NovelError::Cancelled(format!("task '{}'", task.id))),
            outcome = tokio::time::timeout(self.config.task_timeout, work) => match outcome {
                Ok(result) => result,
                Err(_) => Err(NovelError::Timeout {
                    task_id: task.id.clone(),
                    timeout_ms: self.config.task_timeout.as_millis() as u64,
                }),
            },
        }
    }
}

/// 对可重试错误按指数退避重试
async fn attempt(
    agent: &dyn Agent,
    task_id: &str,
    context: &str,
    config: &DispatchConfig,
) -> Result<String> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1u32;
    loop {
        match agent.run(context).await {
            Ok(output) => return Ok(output),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = config.retry_delay * (1u32 << (attempt - 1).min(5));
                warn!(
                    task_id = %task_id,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "🔁 任务失败，稍后重试"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    sources: ContextSources,
    /// 为未指派 Worker 的任务做选择
    coordinator: Option<Arc<dyn LlmClient>>,
    config: DispatchConfig,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(registry: AgentRegistry, scheduler: Scheduler, memory: Arc<BoundedMemory>) -> Self {
        let config = DispatchConfig::default();
        Self {
            registry: Arc::new(registry),
            sources: ContextSources {
                scheduler,
                memory,
                tree: None,
                summarizer: None,
                memory_window: config.memory_window,
            },
            coordinator: None,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: DispatchConfig) -> Self {
        self.sources.memory_window = config.memory_window;
        self.config = config;
        self
    }

    /// 每个完成的任务都挂到上下文树上，同组任务共用一个分组节点
    pub fn with_context_tree(mut self, tree: SharedContextTree) -> Self {
        self.sources.tree = Some(tree);
        self
    }

    /// 用该生成服务把上下文树折叠成摘要，注入每个任务的上下文
    pub fn with_tree_summaries(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.sources.summarizer = Some(llm);
        self
    }

    /// `assigned_worker` 为空的任务交给该生成服务挑选 Worker；
    /// 未设置时使用第一个注册的 Worker
    pub fn with_coordinator(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.coordinator = Some(llm);
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sources.scheduler
    }

    pub fn memory(&self) -> &Arc<BoundedMemory> {
        &self.sources.memory
    }

    pub fn context_tree(&self) -> Option<&SharedContextTree> {
        self.sources.tree.as_ref()
    }

    /// 取消后不再领取新任务，执行中的任务以 `Cancelled` 失败
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// 执行直到没有可运行任务且没有任务在途
    pub async fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let limit = self.config.max_concurrency.max(1);
        info!(run_id = %run_id, max_concurrency = limit, "🚀 开始调度");

        let mut in_flight: JoinSet<(Task, Result<(String, String)>)> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut persisting: JoinSet<()> = JoinSet::new();
        let mut failures = Vec::new();

        loop {
            while !self.cancel.is_cancelled() && in_flight.len() < limit {
                let Some(task) = self.scheduler().next_runnable()? else {
                    break;
                };
                let agent = if task.assigned_worker.is_empty() {
                    None
                } else {
                    match self.registry.get(&task.assigned_worker) {
                        Some(agent) => Some(agent),
                        None => {
                            let err =
                                NovelError::from(AgentError::NotFound(task.assigned_worker.clone()));
                            self.settle(task, Err(err), &mut failures, &mut persisting)
                                .await?;
                            continue;
                        }
                    }
                };
                info!(task_id = %task.id, worker = %task.assigned_worker, "▶️ 任务开始");

                let job = Job {
                    registry: self.registry.clone(),
                    coordinator: self.coordinator.clone(),
                    sources: self.sources.clone(),
                    config: self.config.clone(),
                    cancel: self.cancel.clone(),
                };
                let task_id = task.id.clone();
                let handle = in_flight.spawn(async move {
                    let outcome = AssertUnwindSafe(job.execute(&task, agent))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(NovelError::Other("worker panicked".to_string())));
                    (task, outcome)
                });
                running.insert(handle.id(), task_id);
            }

            let Some(joined) = in_flight.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, (task, outcome))) => {
                    running.remove(&id);
                    self.settle(task, outcome, &mut failures, &mut persisting)
                        .await?;
                }
                Err(e) => {
                    let Some(task_id) = running.remove(&e.id()) else {
                        error!(error = %e, "❌ 未知任务句柄异常退出");
                        continue;
                    };
                    let cause = format!("worker task aborted: {e}");
                    error!(task_id = %task_id, error = %cause, "❌ 任务句柄异常退出");
                    self.scheduler().fail(&task_id, cause.clone())?;
                    failures.push((task_id, cause));
                }
            }
        }

        while let Some(joined) = persisting.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "⚠️ 长期记忆写入任务异常退出");
            }
        }

        let progress = self.scheduler().progress()?;
        let stalled = self.scheduler().is_stalled()?;
        let cancelled = self.cancel.is_cancelled();
        if stalled {
            warn!(
                run_id = %run_id,
                pending = progress.pending,
                "⚠️ 调度停滞：剩余任务依赖的任务已失败"
            );
        }
        info!(
            run_id = %run_id,
            completed = progress.completed,
            failed = progress.failed,
            total = progress.total,
            "🏁 调度结束"
        );
        Ok(RunReport {
            run_id,
            progress,
            stalled,
            cancelled,
            failures,
        })
    }

    /// 让 `planner` 拆解任务，提交子任务并让父任务依赖它们，返回子任务 ID。
    ///
    /// 父任务随后在全部子任务完成后运行，上下文中带有子任务结果以便整合。
    /// 拆解结果不符合 schema 或无法提交时改用单个兜底子任务；
    /// 生成服务本身失败或父任务已被领取则返回错误。
    pub async fn decompose(&self, task_id: &str, planner: &str) -> Result<Vec<String>> {
        let parent = self
            .scheduler()
            .get(task_id)?
            .ok_or_else(|| TaskError::Unknown(task_id.to_string()))?;
        let known_ids: HashSet<String> = self
            .scheduler()
            .snapshot()?
            .into_iter()
            .map(|t| t.id)
            .collect();

        let prompt = format!(
            "Decompose the following task into subtasks that can be handled by the available workers.\n\n\
             Task ({}): {}\n\n\
             Available workers: {}\n\n\
             Respond with JSON only, in exactly this shape:\n\
             {{\"subtasks\":[{{\"id\":\"...\",\"description\":\"...\",\"dependencies\":[\"...\"],\"assigned_worker\":\"...\"}}]}}",
            parent.id,
            parent.description,
            self.registry.names().join(", ")
        );
        let raw = self.registry.invoke(planner, &prompt).await?;

        let default_worker = if parent.assigned_worker.is_empty() {
            planner
        } else {
            parent.assigned_worker.as_str()
        };
        let fallback = inherit_group(fallback_subtask(&parent, default_worker), &parent);
        let subtasks: Vec<Task> = decompose_or_fallback(&raw, &parent, default_worker, &known_ids)
            .into_iter()
            .map(|t| inherit_group(t, &parent))
            .collect();
        let ids: Vec<String> = subtasks.iter().map(|t| t.id.clone()).collect();

        let ids = match self.scheduler().expand(&parent.id, subtasks) {
            Ok(()) => ids,
            Err(e @ NovelError::Task(TaskError::InvalidState { .. })) => return Err(e),
            Err(e) if ids == [fallback.id.clone()] => return Err(e),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "⚠️ 子任务无法提交，使用默认子任务");
                let fallback_id = fallback.id.clone();
                self.scheduler().expand(&parent.id, vec![fallback])?;
                vec![fallback_id]
            }
        };
        info!(task_id = %task_id, subtasks = ids.len(), "🧩 任务已拆解");
        Ok(ids)
    }

    async fn settle(
        &self,
        task: Task,
        outcome: Result<(String, String)>,
        failures: &mut Vec<(String, String)>,
        persisting: &mut JoinSet<()>,
    ) -> Result<()> {
        match outcome {
            Ok((worker, output)) => {
                self.record(&task, &worker, &output, persisting).await;
                let unblocked = self.scheduler().complete(&task.id, output)?;
                info!(task_id = %task.id, worker = %worker, unblocked = ?unblocked, "✅ 任务完成");
            }
            Err(e) => {
                let cause = e.to_string();
                error!(task_id = %task.id, error = %cause, "❌ 任务失败");
                self.scheduler().fail(&task.id, cause.clone())?;
                failures.push((task.id, cause));
            }
        }
        Ok(())
    }

    /// 结果写入记忆与上下文树。记录失败不影响任务完成。
    ///
    /// 短期缓冲区在返回前写入；长期存储的嵌入写入放到 `persisting` 中后台执行。
    async fn record(
        &self,
        task: &Task,
        worker: &str,
        output: &str,
        persisting: &mut JoinSet<()>,
    ) {
        let item = MemoryItem::new(TASK_RESULT_TYPE, output)
            .with_metadata("task_id", task.id.clone())
            .with_metadata("worker", worker.to_string());
        if let Some(persist) = self.sources.memory.add_deferred(item, true).await {
            let task_id = task.id.clone();
            let limit = self.config.task_timeout;
            persisting.spawn(async move {
                match tokio::time::timeout(limit, persist).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(task_id = %task_id, error = %e, "⚠️ 任务结果未能写入长期记忆")
                    }
                    Err(_) => warn!(
                        task_id = %task_id,
                        timeout_ms = limit.as_millis() as u64,
                        "⚠️ 长期记忆写入超时，已放弃"
                    ),
                }
            });
        }

        let Some(tree) = &self.sources.tree else {
            return;
        };
        let parent = match tree_parent(tree, task).await {
            Ok(parent) => parent,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "⚠️ 无法定位上下文树中的父节点");
                return;
            }
        };
        let metadata: Metadata = [
            ("task_id".to_string(), json!(task.id)),
            ("worker".to_string(), json!(worker)),
        ]
        .into_iter()
        .collect();
        if let Err(e) = tree.add_child(parent, output, metadata).await {
            warn!(task_id = %task.id, error = %e, "⚠️ 任务结果未能挂到上下文树");
        }
    }
}

fn inherit_group(task: Task, parent: &Task) -> Task {
    match (&task.group, &parent.group) {
        (None, Some(group)) => {
            let group = group.clone();
            task.in_group(group)
        }
        _ => task,
    }
}

/// 拆解出的任务挂在父任务节点下；否则挂在所属分组节点下（不存在时新建）；都没有则挂在根下
async fn tree_parent(tree: &SharedContextTree, task: &Task) -> Result<NodeId> {
    if let Some(parent_id) = &task.parent_id
        && let Some(node) = tree
            .find_by_metadata("task_id", &json!(parent_id))
            .await
            .first()
            .copied()
    {
        return Ok(node);
    }
    let Some(group) = &task.group else {
        return Ok(tree.root());
    };
    if let Some(node) = tree
        .find_by_metadata(GROUP_KEY, &json!(group))
        .await
        .first()
        .copied()
    {
        return Ok(node);
    }
    let metadata: Metadata = [(GROUP_KEY.to_string(), json!(group))].into_iter().collect();
    let node = tree.add_child(tree.root(), group.clone(), metadata).await?;
    debug!(group = %group, node = %node, "🌿 新建分组节点");
    Ok(node)
}
