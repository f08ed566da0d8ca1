//! Mock 嵌入服务
//!
//! 未预设的文本得到一个由字节内容决定的确定性向量（永不为零向量），
//! 预设文本返回指定向量，便于精确控制相似度排序。

use crate::embedding::EmbeddingService;
use crate::error::{EmbeddingError, NovelError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Clone)]
pub struct MockEmbedding {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    fail_all: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockEmbedding {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: HashMap::new(),
            failing: HashSet::new(),
            fail_all: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// 为某段文本预设向量（长度可以故意与 `dimension` 不符，用于测试维度校验）
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.into(), vector);
        self
    }

    /// 对该文本返回网络错误
    pub fn fail_on(mut self, text: impl Into<String>) -> Self {
        self.failing.insert(text.into());
        self
    }

    /// 所有调用都返回网络错误
    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    pub fn call_count(&self) -> usize {
        guard(&self.calls).len()
    }

    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    fn deterministic(&self, text: &str) -> Vec<f32> {
        let seed: u32 = text.bytes().map(u32::from).sum();
        (0..self.dimension)
            .map(|i| {
                let mixed = seed.wrapping_mul(31).wrapping_add((i as u32 + 1) * 17) % 97;
                (mixed as f32 + 1.0) / 98.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        guard(&self.calls).push(text.to_string());
        if self.fail_all || self.failing.contains(text) {
            return Err(NovelError::Embedding(EmbeddingError::NetworkError(format!(
                "mock embedding failure for '{}'",
                text
            ))));
        }
        Ok(self
            .vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.deterministic(text)))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}
