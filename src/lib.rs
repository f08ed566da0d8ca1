pub mod agent;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod memory;
pub mod pipeline;
pub mod store;
pub mod tasks;
pub mod testing;

/// 记录与节点上附带的任意元数据
pub type Metadata = std::collections::HashMap<String, serde_json::Value>;

/// 当前 Unix 时间（秒）
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub mod prelude {
    pub use crate::Metadata;
    pub use crate::agent::{
        Agent, AgentRegistry, DispatchConfig, Dispatcher, NovelRole, RunReport, WorkerAgent,
    };
    pub use crate::config::NovelConfig;
    pub use crate::context::{ContextTree, NodeId, SharedContextTree};
    pub use crate::embedding::EmbeddingService;
    pub use crate::error::{NovelError, Result};
    pub use crate::llm::{DefaultLlmClient, LlmClient, LlmConfig, ModelConfig};
    pub use crate::memory::{BoundedMemory, MemoryItem};
    pub use crate::store::{SimilarityStore, VectorStore};
    pub use crate::tasks::{Scheduler, Task, TaskStatus};
}
