mod client;
pub mod config;
mod stream;
pub mod types;

pub use client::assemble_req_header;
pub use config::{LlmConfig, ModelConfig};

use crate::error::{LlmError, Result};
use crate::llm::client::post;
use crate::llm::types::{ChatCompletionRequest, Message};
use async_trait::async_trait;
use futures::stream::BoxStream;
use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

/// 未提供 system message 时使用的默认值
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful assistant.";

/// 生成服务边界。失败时返回 [`LlmError`]，从不返回占位文本。
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 单次生成，返回完整文本
    async fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
    ) -> Result<String>;

    /// 流式生成，逐段产出增量文本；出错时产出一个 `Err` 后结束
    async fn generate_stream(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
    ) -> Result<BoxStream<'static, Result<String>>>;
}

/// 构造 `[system, user]` 两条消息
pub fn build_messages(prompt: &str, system_message: Option<&str>) -> Vec<Message> {
    vec![
        Message::system(system_message.unwrap_or(DEFAULT_SYSTEM_MESSAGE)),
        Message::user(prompt),
    ]
}

/// 基于 OpenAI 兼容接口的默认实现
pub struct DefaultLlmClient {
    client: Arc<Client>,
    model: ModelConfig,
    max_tokens: Option<u32>,
}

impl DefaultLlmClient {
    pub fn new(client: Arc<Client>, model: ModelConfig) -> Self {
        Self {
            client,
            model,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    fn request(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
        stream: bool,
    ) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: self.model.model.clone(),
            messages: build_messages(prompt, system_message),
            temperature: Some(temperature),
            max_tokens: self.max_tokens,
            stream: stream.then_some(true),
        }
    }
}

#[async_trait]
impl LlmClient for DefaultLlmClient {
    async fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
    ) -> Result<String> {
        let request = self.request(prompt, system_message, temperature, false);
        debug!(model = %self.model.model, prompt_len = prompt.len(), "🧠 调用生成服务");
        let response = post(&self.client, &request, &self.model).await?;
        response
            .first_content()
            .ok_or_else(|| LlmError::EmptyResponse.into())
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        temperature: f32,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let request = self.request(prompt, system_message, temperature, true);
        debug!(model = %self.model.model, "🌊 发起流式生成");
        Ok(stream::stream_chat(
            self.client.clone(),
            self.model.clone(),
            request,
        ))
    }
}
