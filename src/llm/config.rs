//! 生成服务的模型注册表
//!
//! 从环境变量读取模型配置，格式：
//! ```text
//! NOVEL_MODEL_<ID>_MODEL=gpt-4o
//! NOVEL_MODEL_<ID>_BASEURL=https://api.openai.com/v1/chat/completions
//! NOVEL_MODEL_<ID>_APIKEY=sk-...
//! ```
//! `<ID>` 为自定义标识（如 `GPT4O`、`QWEN`），不区分大小写。
//! 不做进程级缓存：调用方解析出 [`ModelConfig`] 后交给客户端持有。

use crate::error::{ConfigError, NovelError, Result};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const PREFIX: &str = "NOVEL_MODEL_";

/// 单个模型的连接配置
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ModelConfig {
    /// 接口中使用的模型名（如 `gpt-4o`）
    pub model: String,
    /// Chat Completions 接口完整 URL
    pub baseurl: String,
    pub apikey: String,
}

/// 已加载的模型配置表，同时可按 `<ID>` 与模型名查找
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LlmConfig {
    pub models: HashMap<String, ModelConfig>,
}

impl LlmConfig {
    /// 加载 `.env` 后读取进程环境变量
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let mut model_configs: HashMap<String, HashMap<String, String>> = HashMap::new();
        for (key, value) in vars {
            let Some(suffix) = key.strip_prefix(PREFIX) else {
                continue;
            };
            let Some((model_id, config_key)) = suffix.rsplit_once('_') else {
                return Err(ConfigError::EnvFormatError(key).into());
            };
            if model_id.is_empty() {
                return Err(ConfigError::EnvFormatError(key).into());
            }
            let model_id = model_id.to_lowercase();
            let config_key = config_key.to_lowercase();

            match config_key.as_str() {
                "model" | "baseurl" | "apikey" => {}
                _ => {
                    return Err(ConfigError::UnknownKey {
                        key: config_key,
                        env: key,
                    }
                    .into());
                }
            }
            model_configs
                .entry(model_id)
                .or_default()
                .insert(config_key, value);
        }

        let mut models = HashMap::new();
        for (model_id, mut config_map) in model_configs {
            let mut take = |field: &str| {
                config_map
                    .remove(field)
                    .ok_or_else(|| ConfigError::MissingField {
                        model: model_id.clone(),
                        field: field.to_string(),
                    })
            };
            let config = ModelConfig {
                model: take("model")?,
                baseurl: take("baseurl")?,
                apikey: take("apikey")?,
            };
            models.insert(model_id, config);
        }

        Ok(Self { models })
    }

    /// 先按 `<ID>`（小写）查找，再按模型名查找
    pub fn get_model(&self, name: &str) -> Result<ModelConfig> {
        let lowered = name.to_lowercase();
        self.models
            .get(&lowered)
            .or_else(|| self.models.values().find(|m| m.model == name))
            .cloned()
            .ok_or_else(|| NovelError::Config(ConfigError::ModelNotFound(name.to_string())))
    }
}
