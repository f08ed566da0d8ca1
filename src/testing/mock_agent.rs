//! Mock Agent，实现 [`Agent`] trait，用于测试注册表与调度器时替换真实 Worker。
//!
//! 在测试编排逻辑时，我们通常希望：
//! - 不发起真实生成服务调用
//! - 控制每个 Worker 的返回内容
//! - 验证 Worker 被调用了几次，以及每次收到什么上下文
//!
//! # 示例
//!
//! ```rust
//! use novel_agent::testing::MockAgent;
//! use novel_agent::agent::Agent;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let agent = MockAgent::new("Planner")
//!     .with_response("大纲 v1")
//!     .with_response("大纲 v2");
//!
//! let r1 = agent.run("写一个大纲").await.unwrap();
//! let r2 = agent.run("再写一个").await.unwrap();
//! assert_eq!(r1, "大纲 v1");
//! assert_eq!(r2, "大纲 v2");
//! assert_eq!(agent.call_count(), 2);
//! assert_eq!(agent.calls()[0], "写一个大纲");
//! # }
//! ```

use crate::agent::Agent;
use crate::error::{LlmError, NovelError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ── MockAgent ─────────────────────────────────────────────────────────────────

/// 可脚本化的 Mock Agent。
///
/// 按顺序返回预设的响应；队列耗尽后每次调用都返回 `"<name> output"`。
/// 可克隆，克隆体共享响应队列与调用记录，便于注册到 [`AgentRegistry`](crate::agent::AgentRegistry)
/// 后仍能在测试里检查调用情况。
#[derive(Clone)]
pub struct MockAgent {
    name: String,
    responses: Arc<Mutex<VecDeque<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
    transient_failures: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            transient_failures: Arc::new(AtomicUsize::new(0)),
            delay: None,
        }
    }

    /// 追加一条预设响应
    pub fn with_response(self, text: impl Into<String>) -> Self {
        guard(&self.responses).push_back(text.into());
        self
    }

    /// 批量追加多条预设响应
    pub fn with_responses(self, texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        {
            let mut q = guard(&self.responses);
            for t in texts {
                q.push_back(t.into());
            }
        }
        self
    }

    /// 前 `n` 次调用返回可重试的网络错误，用于测试重试退避
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// 每次调用前等待一段时间，用于测试超时与并发
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// 已被调用的总次数（包括失败的调用）
    pub fn call_count(&self) -> usize {
        guard(&self.calls).len()
    }

    /// 所有历史调用的上下文字符串（按时序排列）
    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    pub fn last_context(&self) -> Option<String> {
        guard(&self.calls).last().cloned()
    }

    pub fn reset_calls(&self) {
        guard(&self.calls).clear();
    }

    fn next_response(&self) -> String {
        guard(&self.responses)
            .pop_front()
            .unwrap_or_else(|| format!("{} output", self.name))
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, context: &str) -> Result<String> {
        guard(&self.calls).push(context.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NovelError::Llm(LlmError::NetworkError(
                "mock transient failure".to_string(),
            )));
        }
        Ok(self.next_response())
    }
}

// ── FailingMockAgent ──────────────────────────────────────────────────────────

/// 总是返回错误的 Mock Agent（用于测试编排容错行为）
///
/// 默认返回不可重试的生成服务错误；[`retryable`](FailingMockAgent::retryable)
/// 切换为可重试的网络错误。
#[derive(Clone)]
pub struct FailingMockAgent {
    name: String,
    error_message: String,
    retryable: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FailingMockAgent {
    pub fn new(name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error_message: error_message.into(),
            retryable: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn call_count(&self) -> usize {
        guard(&self.calls).len()
    }
}

#[async_trait]
impl Agent for FailingMockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, context: &str) -> Result<String> {
        guard(&self.calls).push(context.to_string());
        let err = if self.retryable {
            LlmError::NetworkError(self.error_message.clone())
        } else {
            LlmError::ApiError {
                status: 400,
                message: self.error_message.clone(),
            }
        };
        Err(NovelError::Llm(err))
    }
}
