//! 运行配置
//!
//! 从 YAML 读取，所有段落都有默认值，空文件即可运行：
//!
//! ```yaml
//! model: gpt4o            # 对应 NOVEL_MODEL_GPT4O_* 环境变量
//! memory:
//!   capacity: 100
//! scheduler:
//!   max_concurrency: 4
//!   task_timeout_ms: 300000
//! store:
//!   enabled: true
//!   path: ~/.novel-agent/vectors.json
//! ```

use crate::agent::DispatchConfig;
use crate::embedding::{DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL};
use crate::error::{ConfigError, Result};
use crate::memory::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct NovelConfig {
    /// 模型 ID 或模型名，经 [`LlmConfig::get_model`](crate::llm::LlmConfig::get_model) 解析
    pub model: String,
    pub memory: MemoryConfig,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

impl Default for NovelConfig {
    fn default() -> Self {
        Self {
            model: "default".to_string(),
            memory: MemoryConfig::default(),
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub capacity: usize,
    /// 每个任务上下文中注入的近期记忆条数
    pub window: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            window: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    pub max_concurrency: usize,
    pub task_timeout_ms: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            task_timeout_ms: 300_000,
            max_attempts: 3,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// 是否挂接长期相似度存储
    pub enabled: bool,
    pub dimension: usize,
    /// JSON 持久化文件；为空时只保存在内存中
    pub path: Option<String>,
    pub embedding_model: String,
    pub embedding_url: String,
    /// 存放嵌入服务 API key 的环境变量名
    pub apikey_env: String,
    /// 嵌入服务失败时以零向量兜底
    pub zero_fallback: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dimension: 1536,
            path: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_url: DEFAULT_EMBEDDING_URL.to_string(),
            apikey_env: "NOVEL_EMBEDDING_APIKEY".to_string(),
            zero_fallback: false,
        }
    }
}

impl NovelConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: NovelConfig = serde_yaml::from_reader(file)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: NovelConfig = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.memory.capacity == 0 {
            return Err(ConfigError::ParseFailed("memory.capacity must be at least 1".into()).into());
        }
        if self.store.enabled && self.store.dimension == 0 {
            return Err(ConfigError::ParseFailed("store.dimension must be at least 1".into()).into());
        }
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            max_concurrency: self.scheduler.max_concurrency,
            task_timeout: Duration::from_millis(self.scheduler.task_timeout_ms),
            max_attempts: self.scheduler.max_attempts,
            retry_delay: Duration::from_millis(self.scheduler.retry_delay_ms),
            memory_window: self.memory.window,
        }
    }
}
