use crate::error::{LlmError, NovelError, Result};
use crate::llm::config::ModelConfig;
use crate::llm::types::{ChatCompletionRequest, ChatCompletionResponse};
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use tracing::debug;

pub fn assemble_req_header(model: &ModelConfig) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();

    header_map.insert(
        "Authorization",
        format!("Bearer {}", model.apikey)
            .parse()
            .map_err(|e| NovelError::Other(format!("Invalid Authorization header: {}", e)))?,
    );
    header_map.insert(
        "Content-Type",
        "application/json"
            .parse()
            .map_err(|e| NovelError::Other(format!("Invalid Content-Type header: {}", e)))?,
    );
    Ok(header_map)
}

/// 发送请求并检查状态码，非 2xx 转换为 [`LlmError::ApiError`]
pub(crate) async fn send(
    client: &Client,
    request_body: &ChatCompletionRequest,
    model: &ModelConfig,
) -> Result<Response> {
    let response = client
        .post(model.baseurl.as_str())
        .headers(assemble_req_header(model)?)
        .json(request_body)
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(LlmError::ApiError {
            status,
            message: error_text,
        }
        .into());
    }
    Ok(response)
}

pub async fn post(
    client: &Client,
    request_body: &ChatCompletionRequest,
    model: &ModelConfig,
) -> Result<ChatCompletionResponse> {
    let response = send(client, request_body, model).await?;

    let completion_response = response
        .json::<ChatCompletionResponse>()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

    debug!(
        model = %model.model,
        choices = completion_response.choices.len(),
        "📨 收到生成服务响应"
    );

    Ok(completion_response)
}
