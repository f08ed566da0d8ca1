//! Mock 生成服务客户端，用于在不发起真实 HTTP 请求的情况下测试依赖 [`LlmClient`] 的组件。
//!
//! # 示例
//!
//! ```rust
//! use novel_agent::testing::MockLlmClient;
//! use novel_agent::llm::LlmClient;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mock = MockLlmClient::new()
//!     .with_response("第一次响应")
//!     .with_response("第二次响应");
//!
//! let r1 = mock.generate("hi", None, 0.7).await.unwrap();
//! assert_eq!(r1, "第一次响应");
//! assert_eq!(mock.call_count(), 1);
//! # }
//! ```

use crate::error::{LlmError, NovelError, Result};
use crate::llm::LlmClient;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// 预设响应（文本或错误）
enum MockLlmResponse {
    Content(String),
    Err(NovelError),
}

/// 一次调用的入参记录
#[derive(Debug, Clone, PartialEq)]
pub struct MockLlmCall {
    pub prompt: String,
    pub system_message: Option<String>,
    pub temperature: f32,
}

/// 可脚本化的 Mock 生成服务。
///
/// 按顺序返回预设的响应；队列耗尽后返回默认响应（若设置），否则返回 `EmptyResponse` 错误。
/// 所有调用都被记录，可通过 [`call_count`](MockLlmClient::call_count) /
/// [`last_prompt`](MockLlmClient::last_prompt) 等方法检查。
#[derive(Clone)]
pub struct MockLlmClient {
    responses: Arc<Mutex<VecDeque<MockLlmResponse>>>,
    calls: Arc<Mutex<Vec<MockLlmCall>>>,
    default_response: Option<String>,
    delay: Option<Duration>,
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            default_response: None,
            delay: None,
        }
    }

    /// 追加一条成功响应文本
    pub fn with_response(self, text: impl Into<String>) -> Self {
        guard(&self.responses).push_back(MockLlmResponse::Content(text.into()));
        self
    }

    /// 批量追加多条成功响应
    pub fn with_responses(self, texts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        {
            let mut q = guard(&self.responses);
            for t in texts {
                q.push_back(MockLlmResponse::Content(t.into()));
            }
        }
        self
    }

    /// 追加一条错误响应（用于测试错误处理路径）
    pub fn with_error(self, err: NovelError) -> Self {
        guard(&self.responses).push_back(MockLlmResponse::Err(err));
        self
    }

    pub fn with_network_error(self, msg: impl Into<String>) -> Self {
        self.with_error(NovelError::Llm(LlmError::NetworkError(msg.into())))
    }

    /// 追加一条限流错误（429），用于测试重试逻辑
    pub fn with_rate_limit_error(self) -> Self {
        self.with_error(NovelError::Llm(LlmError::ApiError {
            status: 429,
            message: "Too Many Requests".to_string(),
        }))
    }

    /// 预设队列耗尽后始终返回该文本
    pub fn with_default_response(mut self, text: impl Into<String>) -> Self {
        self.default_response = Some(text.into());
        self
    }

    /// 每次调用前等待一段时间，用于测试超时
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        guard(&self.calls).len()
    }

    pub fn last_prompt(&self) -> Option<String> {
        guard(&self.calls).last().map(|c| c.prompt.clone())
    }

    /// 所有历史调用（按时序排列）
    pub fn all_calls(&self) -> Vec<MockLlmCall> {
        guard(&self.calls).clone()
    }

    /// 剩余未消费的预设响应数量
    pub fn remaining(&self) -> usize {
        guard(&self.responses).len()
    }

    pub fn reset_calls(&self) {
        guard(&self.calls).clear();
    }

    async fn next_response(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
    ) -> Result<String> {
        guard(&self.calls).push(MockLlmCall {
            prompt: prompt.to_string(),
            system_message: system_message.map(str::to_string),
            temperature,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = guard(&self.responses).pop_front();
        match next {
            Some(MockLlmResponse::Content(text)) => Ok(text),
            Some(MockLlmResponse::Err(e)) => Err(e),
            None => self
                .default_response
                .clone()
                .ok_or(NovelError::Llm(LlmError::EmptyResponse)),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
    ) -> Result<String> {
        self.next_response(prompt, system_message, temperature)
            .await
    }

    /// 把预设文本按空格切成多段依次产出
    async fn generate_stream(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let text = self
            .next_response(prompt, system_message, temperature)
            .await?;
        let chunks: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
