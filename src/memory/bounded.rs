use crate::error::Result;
use crate::store::{SearchHit, VectorStore};
use crate::{Metadata, now_secs};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// 默认的环形缓冲区容量
pub const DEFAULT_CAPACITY: usize = 100;

/// [`BoundedMemory::digest`] 中每条内容保留的字符数
const DIGEST_CHARS: usize = 100;

/// 记忆条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// 创建时间（Unix 秒）
    pub timestamp: u64,
    /// 与查询的距离（仅相似度检索返回时非 None）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

impl MemoryItem {
    pub fn new(item_type: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            content: content.into(),
            metadata: Metadata::new(),
            timestamp: now_secs(),
            distance: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 写入长期存储时附带的元数据：`type`、`timestamp` 加上条目自身的元数据
    fn long_term_metadata(&self) -> Metadata {
        let mut metadata = self.metadata.clone();
        metadata.insert("type".to_string(), Value::from(self.item_type.clone()));
        metadata.insert("timestamp".to_string(), Value::from(self.timestamp));
        metadata
    }

    fn from_hit(hit: SearchHit) -> Self {
        let mut metadata = hit.metadata;
        let item_type = match metadata.remove("type") {
            Some(Value::String(s)) => s,
            _ => "unknown".to_string(),
        };
        let timestamp = metadata
            .remove("timestamp")
            .and_then(|v| v.as_u64())
            .unwrap_or_default();
        Self {
            item_type,
            content: hit.content,
            metadata,
            timestamp,
            distance: Some(hit.distance),
        }
    }

    fn matches(&self, needle: &str) -> bool {
        self.item_type.to_lowercase().contains(needle)
            || self.content.to_lowercase().contains(needle)
            || self
                .metadata
                .values()
                .any(|v| value_to_searchable_text(v).to_lowercase().contains(needle))
    }
}

/// 固定容量的近期记忆，可选挂接长期相似度存储。
///
/// - 超出容量时按 FIFO 淘汰最旧的条目，与 `important` 标志无关
/// - `important` 条目额外写入长期存储；淘汰不会删除长期副本
/// - `clear` 只清空环形缓冲区
pub struct BoundedMemory {
    buffer: RwLock<VecDeque<MemoryItem>>,
    capacity: usize,
    long_term: Option<Arc<dyn VectorStore>>,
}

impl Default for BoundedMemory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BoundedMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            long_term: None,
        }
    }

    pub fn with_long_term(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.long_term = Some(store);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_long_term(&self) -> bool {
        self.long_term.is_some()
    }

    /// 追加条目。持久化在写入缓冲区之后、锁外进行；
    /// 嵌入失败时错误返回给调用方，缓冲区中的副本保留。
    pub async fn add(&self, item: MemoryItem, important: bool) -> Result<()> {
        match self.add_deferred(item, important).await {
            Some(persist) => persist.await,
            None => Ok(()),
        }
    }

    /// 立即写入缓冲区，把长期存储写入作为独立的 future 返回，由调用方决定何时、
    /// 在什么时限内执行。不需要持久化时返回 `None`。
    pub async fn add_deferred(
        &self,
        item: MemoryItem,
        important: bool,
    ) -> Option<BoxFuture<'static, Result<()>>> {
        let persisted = match (&self.long_term, important) {
            (Some(store), true) => Some((
                store.clone(),
                item.content.clone(),
                item.long_term_metadata(),
            )),
            _ => None,
        };
        {
            let mut buffer = self.buffer.write().await;
            buffer.push_back(item);
            while buffer.len() > self.capacity {
                if let Some(evicted) = buffer.pop_front() {
                    debug!(item_type = %evicted.item_type, "🗑️ 淘汰最旧的记忆条目");
                }
            }
        }

        let (store, content, metadata) = persisted?;
        Some(
            async move {
                match store.put(&content, metadata).await {
                    Ok(id) => {
                        debug!(id = id, "🧠 重要记忆已写入长期存储");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(error = %e, "⚠️ 重要记忆写入长期存储失败");
                        Err(e)
                    }
                }
            }
            .boxed(),
        )
    }

    /// 最近 `n` 条，按插入顺序；`n` 超过缓冲区大小时返回全部
    pub async fn recent(&self, n: usize) -> Vec<MemoryItem> {
        let buffer = self.buffer.read().await;
        let skip = buffer.len().saturating_sub(n);
        buffer.iter().skip(skip).cloned().collect()
    }

    /// 有长期存储时做相似度检索；否则在缓冲区内做不区分大小写的子串匹配，
    /// 按缓冲区顺序返回前 `n` 条
    pub async fn search(&self, query: &str, n: usize) -> Result<Vec<MemoryItem>> {
        if let Some(store) = &self.long_term {
            let hits = store.query(query, n).await?;
            return Ok(hits.into_iter().map(MemoryItem::from_hit).collect());
        }

        let needle = query.to_lowercase();
        let buffer = self.buffer.read().await;
        Ok(buffer
            .iter()
            .filter(|item| item.matches(&needle))
            .take(n)
            .cloned()
            .collect())
    }

    pub async fn by_type(&self, item_type: &str) -> Vec<MemoryItem> {
        self.buffer
            .read()
            .await
            .iter()
            .filter(|item| item.item_type == item_type)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<MemoryItem> {
        self.buffer.read().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.buffer.read().await.is_empty()
    }

    /// 清空缓冲区，长期存储不受影响
    pub async fn clear(&self) {
        self.buffer.write().await.clear();
    }

    /// 紧凑摘要：每条一行 `type: 前 100 个字符...`
    pub fn digest(items: &[MemoryItem]) -> String {
        items
            .iter()
            .map(|item| {
                let mut head: String = item.content.chars().take(DIGEST_CHARS).collect();
                if item.content.chars().count() > DIGEST_CHARS {
                    head.push_str("...");
                }
                format!("{}: {}", item.item_type, head)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn value_to_searchable_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(arr) => arr
            .iter()
            .map(value_to_searchable_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(map) => map
            .values()
            .map(value_to_searchable_text)
            .collect::<Vec<_>>()
            .join(" "),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SimilarityStore;
    use crate::testing::MockEmbedding;
    use serde_json::json;

    fn item(n: usize) -> MemoryItem {
        MemoryItem::new("note", n.to_string())
    }

    fn contents(items: &[MemoryItem]) -> Vec<String> {
        items.iter().map(|i| i.content.clone()).collect()
    }

    #[tokio::test]
    async fn test_capacity_three_keeps_last_three() {
        let memory = BoundedMemory::new(3);
        for n in 1..=5 {
            memory.add(item(n), false).await.unwrap();
        }
        assert_eq!(memory.len().await, 3);
        assert_eq!(contents(&memory.recent(3).await), vec!["3", "4", "5"]);
        assert_eq!(contents(&memory.recent(2).await), vec!["4", "5"]);
        assert_eq!(contents(&memory.recent(10).await), vec!["3", "4", "5"]);
    }

    #[tokio::test]
    async fn test_eviction_ignores_important_flag() {
        let store = Arc::new(SimilarityStore::in_memory(Arc::new(MockEmbedding::new(4)), 4));
        let memory = BoundedMemory::new(2).with_long_term(store.clone());
        memory.add(item(1), true).await.unwrap();
        memory.add(item(2), false).await.unwrap();
        memory.add(item(3), false).await.unwrap();

        assert_eq!(contents(&memory.all().await), vec!["2", "3"]);
        // 被淘汰的重要条目仍然保存在长期存储中
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(0).await.unwrap().content, "1");
    }

    #[tokio::test]
    async fn test_default_capacity() {
        let memory = BoundedMemory::default();
        assert_eq!(memory.capacity(), DEFAULT_CAPACITY);
        assert!(!memory.has_long_term());
    }

    #[tokio::test]
    async fn test_substring_search_without_long_term() {
        let memory = BoundedMemory::new(10);
        memory
            .add(MemoryItem::new("character", "Lin Wei, a retired detective"), false)
            .await
            .unwrap();
        memory
            .add(MemoryItem::new("world", "A harbor city of fog"), false)
            .await
            .unwrap();
        memory
            .add(
                MemoryItem::new("character", "Mara").with_metadata("role", "Detective's sister"),
                false,
            )
            .await
            .unwrap();

        let hits = memory.search("DETECTIVE", 5).await.unwrap();
        assert_eq!(contents(&hits), vec!["Lin Wei, a retired detective", "Mara"]);
        assert!(hits.iter().all(|h| h.distance.is_none()));

        let first = memory.search("detective", 1).await.unwrap();
        assert_eq!(contents(&first), vec!["Lin Wei, a retired detective"]);
        assert!(memory.search("dragon", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_delegates_to_long_term() {
        let embedder = MockEmbedding::new(2)
            .with_vector("harbor", vec![1.0, 0.0])
            .with_vector("The harbor at dawn", vec![0.9, 0.1])
            .with_vector("A desert caravan", vec![0.0, 1.0]);
        let store = Arc::new(SimilarityStore::in_memory(Arc::new(embedder), 2));
        let memory = BoundedMemory::new(10).with_long_term(store);

        memory
            .add(
                MemoryItem::new("scene", "A desert caravan").with_metadata("chapter", 2),
                true,
            )
            .await
            .unwrap();
        memory
            .add(
                MemoryItem::new("scene", "The harbor at dawn").with_metadata("chapter", 1),
                true,
            )
            .await
            .unwrap();
        // 非重要条目只留在缓冲区
        memory
            .add(MemoryItem::new("scene", "harbor gossip"), false)
            .await
            .unwrap();

        let hits = memory.search("harbor", 5).await.unwrap();
        assert_eq!(contents(&hits), vec!["The harbor at dawn", "A desert caravan"]);
        assert_eq!(hits[0].item_type, "scene");
        assert_eq!(hits[0].metadata["chapter"], json!(1));
        assert!(!hits[0].metadata.contains_key("type"));
        assert!(hits[0].distance.unwrap() < hits[1].distance.unwrap());
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_buffer_copy() {
        let store = Arc::new(SimilarityStore::in_memory(
            Arc::new(MockEmbedding::new(2).failing()),
            2,
        ));
        let memory = BoundedMemory::new(5).with_long_term(store);
        let err = memory.add(item(1), true).await.unwrap_err();
        assert!(matches!(err, crate::error::NovelError::Embedding(_)));
        assert_eq!(contents(&memory.all().await), vec!["1"]);
    }

    #[tokio::test]
    async fn test_deferred_add_buffers_before_persisting() {
        let store = Arc::new(SimilarityStore::in_memory(Arc::new(MockEmbedding::new(2)), 2));
        let memory = BoundedMemory::new(5).with_long_term(store.clone());

        let persist = memory.add_deferred(item(1), true).await.unwrap();
        assert_eq!(contents(&memory.recent(1).await), vec!["1"]);
        assert!(store.is_empty().await, "持久化尚未执行");
        persist.await.unwrap();
        assert_eq!(store.len().await, 1);

        assert!(memory.add_deferred(item(2), false).await.is_none());
        assert!(BoundedMemory::new(5).add_deferred(item(3), true).await.is_none());
    }

    #[tokio::test]
    async fn test_by_type_and_clear() {
        let store = Arc::new(SimilarityStore::in_memory(Arc::new(MockEmbedding::new(4)), 4));
        let memory = BoundedMemory::new(10).with_long_term(store.clone());
        memory.add(MemoryItem::new("outline", "o"), true).await.unwrap();
        memory.add(MemoryItem::new("chapter", "c1"), false).await.unwrap();
        memory.add(MemoryItem::new("chapter", "c2"), false).await.unwrap();

        assert_eq!(contents(&memory.by_type("chapter").await), vec!["c1", "c2"]);

        memory.clear().await;
        assert!(memory.is_empty().await);
        assert_eq!(store.len().await, 1, "长期存储不受 clear 影响");
    }

    #[test]
    fn test_digest_truncates_long_content() {
        let long = "字".repeat(150);
        let digest = BoundedMemory::digest(&[
            MemoryItem::new("outline", "short"),
            MemoryItem::new("chapter", long),
        ]);
        let lines: Vec<&str> = digest.lines().collect();
        assert_eq!(lines[0], "outline: short");
        assert!(lines[1].starts_with("chapter: 字"));
        assert!(lines[1].ends_with("..."));
        assert_eq!(lines[1].chars().count(), "chapter: ".len() + 100 + 3);
    }
}
