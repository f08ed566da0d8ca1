use crate::Metadata;
use crate::context::summary::SummaryPromptBuilder;
use crate::error::{ContextError, Result};
use crate::llm::LlmClient;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use tracing::debug;

/// 生成摘要时使用的温度
pub const SUMMARY_TEMPERATURE: f32 = 0.7;

/// 节点句柄，只在创建它的树内有效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    /// 每棵树的根节点
    pub const ROOT: NodeId = NodeId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct ContextNode {
    content: String,
    level: usize,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    metadata: Metadata,
}

impl ContextNode {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// 按挂载顺序排列的子节点
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// 嵌套记录格式，用于序列化与摘要快照；不包含父引用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRecord {
    pub content: String,
    pub level: usize,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub children: Vec<ContextRecord>,
}

impl ContextRecord {
    /// 递归摘要：叶子原样返回；否则后序摘要全部子节点，拼接后调用一次生成服务
    pub fn summarize<'a>(
        &'a self,
        llm: &'a dyn LlmClient,
        prompt: &'a dyn SummaryPromptBuilder,
    ) -> BoxFuture<'a, Result<String>> {
        async move {
            if self.children.is_empty() {
                return Ok(self.content.clone());
            }
            let mut parts = Vec::with_capacity(self.children.len());
            for child in &self.children {
                parts.push(child.summarize(llm, prompt).await?);
            }
            debug!(level = self.level, children = parts.len(), "🧩 合并子节点摘要");
            llm.generate(&prompt.build(&parts), None, SUMMARY_TEMPERATURE)
                .await
        }
        .boxed()
    }
}

/// 以 arena 方式存储的 n 叉上下文树。
///
/// 节点只能通过 [`add_child`](ContextTree::add_child) 挂到已有节点下，
/// 父子关系都是索引，树在构造上就不可能成环。
#[derive(Debug, Clone)]
pub struct ContextTree {
    nodes: Vec<ContextNode>,
}

impl ContextTree {
    pub fn new(root_content: impl Into<String>) -> Self {
        Self::with_root(root_content, 0, Metadata::new())
    }

    pub fn with_root(root_content: impl Into<String>, level: usize, metadata: Metadata) -> Self {
        Self {
            nodes: vec![ContextNode {
                content: root_content.into(),
                level,
                parent: None,
                children: Vec::new(),
                metadata,
            }],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::ROOT
    }

    pub fn node(&self, id: NodeId) -> Result<&ContextNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ContextError::UnknownNode(id.0).into())
    }

    /// 在 `parent` 下挂一个新节点，`level = parent.level + 1`
    pub fn add_child(
        &mut self,
        parent: NodeId,
        content: impl Into<String>,
        metadata: Metadata,
    ) -> Result<NodeId> {
        let level = self.node(parent)?.level + 1;
        let id = NodeId(self.nodes.len());
        self.nodes.push(ContextNode {
            content: content.into(),
            level,
            parent: Some(parent),
            children: Vec::new(),
            metadata,
        });
        self.nodes[parent.0].children.push(id);
        Ok(id)
    }

    /// 节点总数，包括根
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// 根节点在构造时创建且不可删除，因此恒为 `false`
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 以 `id` 为根的子树节点数。树只增不改，子树节点数不变即子树内容不变。
    pub fn subtree_size(&self, id: NodeId) -> Result<usize> {
        let mut count = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            count += 1;
            stack.extend_from_slice(self.node(current)?.children());
        }
        Ok(count)
    }

    /// 根以下的最大层数（只有根时为 0）
    pub fn depth(&self) -> usize {
        let base = self.nodes[0].level;
        self.nodes
            .iter()
            .map(|n| n.level - base)
            .max()
            .unwrap_or(0)
    }

    /// 从根到该节点的内容序列
    pub fn path(&self, id: NodeId) -> Result<Vec<String>> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.node(node_id)?;
            path.push(node.content.clone());
            current = node.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// 深度优先前序遍历，收集 `metadata[key] == value` 的节点
    pub fn find_by_metadata(&self, key: &str, value: &Value) -> Vec<NodeId> {
        let mut found = Vec::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if node.metadata.get(key) == Some(value) {
                found.push(id);
            }
            stack.extend(node.children.iter().rev().copied());
        }
        found
    }

    /// 缩进形式的大纲
    pub fn render(&self) -> String {
        let base = self.nodes[0].level;
        let mut out = String::new();
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            out.push_str(&"  ".repeat(node.level - base));
            out.push_str(&format!("{} (Level {})\n", node.content, node.level));
            stack.extend(node.children.iter().rev().copied());
        }
        out
    }

    /// 以 `id` 为根的子树快照
    pub fn to_record(&self, id: NodeId) -> Result<ContextRecord> {
        let node = self.node(id)?;
        let children = node
            .children
            .iter()
            .map(|child| self.to_record(*child))
            .collect::<Result<Vec<_>>>()?;
        Ok(ContextRecord {
            content: node.content.clone(),
            level: node.level,
            metadata: node.metadata.clone(),
            children,
        })
    }

    /// 从嵌套记录重建。根保留记录中的 level，子节点一律重算为 `parent.level + 1`。
    pub fn from_record(record: &ContextRecord) -> Self {
        let mut tree = Self::with_root(
            record.content.clone(),
            record.level,
            record.metadata.clone(),
        );
        let mut stack: Vec<(NodeId, &ContextRecord)> = vec![(tree.root(), record)];
        while let Some((id, current)) = stack.pop() {
            for child in &current.children {
                let level = tree.nodes[id.0].level + 1;
                let child_id = NodeId(tree.nodes.len());
                tree.nodes.push(ContextNode {
                    content: child.content.clone(),
                    level,
                    parent: Some(id),
                    children: Vec::new(),
                    metadata: child.metadata.clone(),
                });
                tree.nodes[id.0].children.push(child_id);
                stack.push((child_id, child));
            }
        }
        tree
    }

    pub async fn summarize(
        &self,
        id: NodeId,
        llm: &dyn LlmClient,
        prompt: &dyn SummaryPromptBuilder,
    ) -> Result<String> {
        let record = self.to_record(id)?;
        record.summarize(llm, prompt).await
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_record(self.root())?)?;
        if let Some(parent) = path.as_ref().parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path.as_ref(), json).await?;
        debug!(path = %path.as_ref().display(), nodes = self.len(), "💾 上下文树已保存");
        Ok(())
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let record: ContextRecord = serde_json::from_str(&raw)?;
        Ok(Self::from_record(&record))
    }
}
