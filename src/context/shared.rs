use crate::Metadata;
use crate::context::summary::{DefaultSummaryPrompt, SummaryPromptBuilder};
use crate::context::tree::{ContextRecord, ContextTree, NodeId, SUMMARY_TEMPERATURE};
use crate::error::Result;
use crate::llm::LlmClient;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

/// 多个 Worker 共享的上下文树句柄。
///
/// 修改持有写锁；`summarize` 只在读锁下复制子树快照，调用生成服务时不持有任何锁，
/// 因此慢速摘要不会阻塞并发的 `add_child`。
#[derive(Clone)]
pub struct SharedContextTree {
    inner: Arc<RwLock<ContextTree>>,
    prompt: Arc<dyn SummaryPromptBuilder>,
    /// 节点 → (生成摘要时的子树节点数, 摘要)
    summaries: Arc<Mutex<HashMap<NodeId, (usize, String)>>>,
}

impl SharedContextTree {
    pub fn new(root_content: impl Into<String>) -> Self {
        Self::from_tree(ContextTree::new(root_content))
    }

    pub fn from_tree(tree: ContextTree) -> Self {
        Self {
            inner: Arc::new(RwLock::new(tree)),
            prompt: Arc::new(DefaultSummaryPrompt),
            summaries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_prompt(mut self, prompt: impl SummaryPromptBuilder + 'static) -> Self {
        self.prompt = Arc::new(prompt);
        self
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub async fn add_child(
        &self,
        parent: NodeId,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<NodeId> {
        self.inner.write().await.add_child(parent, content, metadata)
    }

    pub async fn content(&self, id: NodeId) -> Result<String> {
        Ok(self.inner.read().await.node(id)?.content().to_string())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn path(&self, id: NodeId) -> Result<Vec<String>> {
        self.inner.read().await.path(id)
    }

    pub async fn find_by_metadata(&self, key: &str, value: &Value) -> Vec<NodeId> {
        self.inner.read().await.find_by_metadata(key, value)
    }

    pub async fn render(&self) -> String {
        self.inner.read().await.render()
    }

    pub async fn snapshot(&self, id: NodeId) -> Result<ContextRecord> {
        self.inner.read().await.to_record(id)
    }

    pub async fn summarize(&self, id: NodeId, llm: &dyn LlmClient) -> Result<String> {
        let record = self.snapshot(id).await?;
        record.summarize(llm, self.prompt.as_ref()).await
    }

    /// 增量摘要：子树自上次摘要后没有新增节点时直接复用缓存。
    ///
    /// 每次生成调用的输入只有直接子节点的摘要，已完成的分支不会被重复摘要。
    pub async fn cached_summary(&self, id: NodeId, llm: &dyn LlmClient) -> Result<String> {
        let tree = self.to_tree().await;
        self.cached_summary_of(&tree, id, llm).await
    }

    fn cached_summary_of<'a>(
        &'a self,
        tree: &'a ContextTree,
        id: NodeId,
        llm: &'a dyn LlmClient,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            let node = tree.node(id)?;
            if node.is_leaf() {
                return Ok(node.content().to_string());
            }
            let size = tree.subtree_size(id)?;
            let cached = self.summaries.lock().await.get(&id).cloned();
            if let Some((cached_size, summary)) = cached
                && cached_size == size
            {
                return Ok(summary);
            }

            let mut parts = Vec::with_capacity(node.children().len());
            for child in node.children() {
                parts.push(self.cached_summary_of(tree, *child, llm).await?);
            }
            let summary = llm
                .generate(&self.prompt.build(&parts), None, SUMMARY_TEMPERATURE)
                .await?;
            debug!(node = %id, subtree = size, "📚 子树摘要已刷新");
            self.summaries
                .lock()
                .await
                .insert(id, (size, summary.clone()));
            Ok(summary)
        }
        .boxed()
    }

    /// 在读锁下复制整棵树
    pub async fn to_tree(&self) -> ContextTree {
        self.inner.read().await.clone()
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        self.to_tree().await.save(path).await
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let tree = ContextTree::load(path.as_ref()).await?;
        info!(path = %path.as_ref().display(), nodes = tree.len(), "🌳 上下文树已加载");
        Ok(Self::from_tree(tree))
    }
}
