//! SSE 流式响应解析
//!
//! 服务端以 `data: {...}\n\n` 分隔事件，`data: [DONE]` 表示正常结束。

use crate::error::{LlmError, NovelError, Result};
use crate::llm::client::send;
use crate::llm::config::ModelConfig;
use crate::llm::types::{ChatCompletionChunk, ChatCompletionRequest};
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, warn};

/// 单个 SSE 事件解析后的结果
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Error(String),
}

/// 从字节缓冲区中取出所有完整事件，未结束的尾部留在缓冲区中。
///
/// 只对完整事件做 UTF-8 解码，跨网络分片的多字节字符不会被截断。
pub(crate) fn drain_events(buffer: &mut Vec<u8>) -> Vec<SseEvent> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
        let raw: Vec<u8> = buffer.drain(..pos + 2).collect();
        let event_str = String::from_utf8_lossy(&raw);
        for line in event_str.lines() {
            if let Some(event) = parse_line(line) {
                events.push(event);
            }
        }
    }
    events
}

pub(crate) fn parse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => {
            if let Some(error) = chunk.error {
                return Some(SseEvent::Error(error.message));
            }
            let text: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| c.delta.content)
                .collect();
            (!text.is_empty()).then_some(SseEvent::Delta(text))
        }
        Err(e) => {
            debug!(error = %e, "跳过无法解析的 SSE 数据");
            None
        }
    }
}

/// 发起流式请求，返回增量文本流。遇到错误事件时产出一个 `Err` 后结束。
pub(crate) fn stream_chat(
    client: Arc<Client>,
    model: ModelConfig,
    request_body: ChatCompletionRequest,
) -> BoxStream<'static, Result<String>> {
    Box::pin(async_stream::stream! {
        let response = match send(&client, &request_body, &model).await {
            Ok(resp) => resp,
            Err(e) => {
                yield Err(e);
                return;
            }
        };

        let mut byte_stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(NovelError::Llm(LlmError::StreamError(e.to_string())));
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            for event in drain_events(&mut buffer) {
                match event {
                    SseEvent::Delta(text) => yield Ok(text),
                    SseEvent::Done => return,
                    SseEvent::Error(message) => {
                        warn!(model = %model.model, error = %message, "⚠️ 流式响应返回错误事件");
                        yield Err(NovelError::Llm(LlmError::StreamError(message)));
                        return;
                    }
                }
            }
        }

        // 最后一个事件可能缺少结尾的空行
        for line in String::from_utf8_lossy(&buffer).lines() {
            match parse_line(line) {
                Some(SseEvent::Delta(text)) => yield Ok(text),
                Some(SseEvent::Error(message)) => {
                    yield Err(NovelError::Llm(LlmError::StreamError(message)));
                    return;
                }
                Some(SseEvent::Done) | None => {}
            }
        }
    })
}
