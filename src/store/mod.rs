//! 相似度检索存储
//!
//! 以 `{content, embedding, metadata, created_at}` 记录为单位持久化内容，
//! 按余弦距离回答最近邻查询。
//!
//! ## 内置实现
//!
//! - [`SimilarityStore::in_memory`]：进程内存，适合测试
//! - [`SimilarityStore::open`]：JSON 文件持久化，每次修改后落盘
//!
//! ## 快速上手
//!
//! ```rust,no_run
//! use novel_agent::store::{SimilarityStore, VectorStore};
//! use novel_agent::testing::MockEmbedding;
//! use std::sync::Arc;
//!
//! # async fn example() -> novel_agent::error::Result<()> {
//! let store = SimilarityStore::open("~/.novel-agent/vectors.json", Arc::new(MockEmbedding::new(8)), 8)?;
//! store.put("主角在雨夜离开了小镇", Default::default()).await?;
//!
//! let hits = store.query("主角离开", 5).await?;
//! println!("最相似: {:?}", hits.first().map(|h| &h.content));
//! # Ok(())
//! # }
//! ```

mod similarity;

pub use similarity::{SimilarityStore, cosine_distance};

use crate::Metadata;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 存储中的单条记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: u64,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    /// 创建时间（Unix 秒）
    pub created_at: u64,
}

/// 一条检索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: u64,
    pub content: String,
    pub metadata: Metadata,
    /// 与查询的余弦距离，越小越相似
    pub distance: f32,
}

/// 相似度存储接口
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 计算嵌入并写入，返回新记录的 ID。嵌入失败时不写入任何内容。
    async fn put(&self, content: &str, metadata: Metadata) -> Result<u64>;

    /// 返回距离最小的至多 `k` 条记录，按距离升序，距离相同保持插入顺序
    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>>;

    /// 立即删除，返回是否存在该记录
    async fn delete(&self, id: u64) -> Result<bool>;

    async fn clear(&self) -> Result<()>;
}
