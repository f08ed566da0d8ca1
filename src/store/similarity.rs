use crate::embedding::EmbeddingService;
use crate::error::{Result, StoreError};
use crate::store::{SearchHit, VectorRecord, VectorStore};
use crate::{Metadata, now_secs};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// 持久化文件的内容
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    dimension: usize,
    /// 下一个待分配的 ID，删除或清空后也不回退
    next_id: u64,
    /// 按插入顺序排列
    records: Vec<VectorRecord>,
}

/// 基于余弦距离的相似度存储。
///
/// - 所有向量维度必须等于构造时给定的 `dimension`，否则返回
///   [`StoreError::DimensionMismatch`]
/// - 嵌入服务失败时原样返回错误，不做零向量替换
/// - ID 在写锁内单调分配，不会有两次写入落到同一个 ID 上
///
/// 存储格式：
/// ```json
/// { "dimension": 1536, "next_id": 3, "records": [ { "id": 0, "content": "...", "embedding": [...], "metadata": {...}, "created_at": 123 } ] }
/// ```
pub struct SimilarityStore {
    embedder: Arc<dyn EmbeddingService>,
    dimension: usize,
    path: Option<PathBuf>,
    data: RwLock<StoreData>,
    /// 串行化文件写入，保证最后一次落盘的是最新状态
    flush_lock: Mutex<()>,
}

impl SimilarityStore {
    /// 纯内存存储
    pub fn in_memory(embedder: Arc<dyn EmbeddingService>, dimension: usize) -> Self {
        Self {
            embedder,
            dimension,
            path: None,
            data: RwLock::new(StoreData {
                dimension,
                ..StoreData::default()
            }),
            flush_lock: Mutex::new(()),
        }
    }

    /// 打开或创建 JSON 文件存储，自动建父目录。
    ///
    /// 文件头或任意一条记录的维度与 `dimension` 不符时返回 [`StoreError::DimensionMismatch`]。
    pub fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn EmbeddingService>,
        dimension: usize,
    ) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::IoError(format!("创建目录失败: {e}")))?;
        }
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| StoreError::IoError(format!("读取存储文件失败: {e}")))?;
            let data: StoreData = serde_json::from_str(&raw)
                .map_err(|e| StoreError::SerializationError(e.to_string()))?;
            if data.dimension != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    actual: data.dimension,
                }
                .into());
            }
            if let Some(record) = data.records.iter().find(|r| r.embedding.len() != dimension) {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    actual: record.embedding.len(),
                }
                .into());
            }
            data
        } else {
            StoreData {
                dimension,
                ..StoreData::default()
            }
        };
        info!(
            path = %path.display(),
            records = data.records.len(),
            dimension = dimension,
            "🗄️ 相似度存储已打开"
        );
        Ok(Self {
            embedder,
            dimension,
            path: Some(path),
            data: RwLock::new(data),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub async fn len(&self) -> usize {
        self.data.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.data.read().await.records.is_empty()
    }

    pub async fn get(&self, id: u64) -> Option<VectorRecord> {
        self.data
            .read()
            .await
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    /// 写入预先计算好的向量。
    ///
    /// 落盘失败时撤回这条记录并返回错误；已分配的 ID 不再使用。
    pub async fn put_embedding(
        &self,
        content: &str,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Result<u64> {
        self.check_dimension(&embedding)?;
        let id = {
            let mut data = self.data.write().await;
            let id = data.next_id;
            data.next_id += 1;
            data.records.push(VectorRecord {
                id,
                content: content.to_string(),
                embedding,
                metadata,
                created_at: now_secs(),
            });
            id
        };
        if let Err(e) = self.flush().await {
            self.data.write().await.records.retain(|r| r.id != id);
            warn!(id = id, error = %e, "⚠️ 落盘失败，撤回向量记录");
            return Err(e);
        }
        debug!(id = id, "📌 写入向量记录");
        Ok(id)
    }

    /// 用预先计算好的查询向量检索
    pub async fn query_embedding(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;
        let data = self.data.read().await;
        let mut scored: Vec<(f32, &VectorRecord)> = data
            .records
            .iter()
            .map(|r| (cosine_distance(query, &r.embedding), r))
            .collect();
        // sort_by 是稳定排序，距离相同时保持插入顺序
        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        Ok(scored
            .into_iter()
            .take(k)
            .map(|(distance, r)| SearchHit {
                id: r.id,
                content: r.content.clone(),
                metadata: r.metadata.clone(),
                distance,
            })
            .collect())
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            }
            .into());
        }
        Ok(())
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.flush_lock.lock().await;
        let json = {
            let data = self.data.read().await;
            serde_json::to_string(&*data)
                .map_err(|e| StoreError::SerializationError(e.to_string()))?
        };
        tokio::fs::write(path, json)
            .await
            .map_err(|e| StoreError::IoError(format!("写入存储文件失败: {e}")))?;
        debug!(path = %path.display(), "💾 相似度存储已持久化");
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SimilarityStore {
    async fn put(&self, content: &str, metadata: Metadata) -> Result<u64> {
        let embedding = self.embedder.embed(content).await?;
        self.put_embedding(content, embedding, metadata).await
    }

    async fn query(&self, text: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(text).await?;
        let hits = self.query_embedding(&embedding, k).await?;
        debug!(k = k, hits = hits.len(), "🔍 相似度检索");
        Ok(hits)
    }

    async fn delete(&self, id: u64) -> Result<bool> {
        let removed = {
            let mut data = self.data.write().await;
            let before = data.records.len();
            data.records.retain(|r| r.id != id);
            data.records.len() != before
        };
        if removed {
            self.flush().await?;
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let cleared = {
            let mut data = self.data.write().await;
            let n = data.records.len();
            data.records.clear();
            n
        };
        info!(records = cleared, "🧹 相似度存储已清空");
        self.flush().await
    }
}

/// 余弦距离 `1 - cos(a, b)`；任一向量范数为 0 时返回 1.0
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.starts_with("~/")
        && let Some(home) = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())
    {
        return PathBuf::from(home).join(&s[2..]);
    }
    path.to_path_buf()
}
