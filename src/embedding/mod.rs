//! 嵌入服务边界
//!
//! [`EmbeddingService`] 把文本映射为固定维度的向量。失败时返回
//! [`EmbeddingError`](crate::error::EmbeddingError)；是否用零向量兜底由服务自己决定
//! （见 [`ZeroVectorFallback`]），相似度存储从不替调用方做这个决定。

mod http;

pub use http::{DEFAULT_EMBEDDING_MODEL, DEFAULT_EMBEDDING_URL, HttpEmbeddingClient};

use crate::error::Result;
use async_trait::async_trait;
use tracing::warn;

#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// 计算单段文本的嵌入向量
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 该服务产出的向量维度
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// 内层服务失败时返回全零向量的包装器
pub struct ZeroVectorFallback<E> {
    inner: E,
}

impl<E: EmbeddingService> ZeroVectorFallback<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

#[async_trait]
impl<E: EmbeddingService> EmbeddingService for ZeroVectorFallback<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.inner.embed(text).await {
            Ok(embedding) => Ok(embedding),
            Err(e) => {
                warn!(
                    model = %self.inner.model_name(),
                    error = %e,
                    "⚠️ 嵌入失败，返回零向量"
                );
                Ok(vec![0.0; self.inner.dimension()])
            }
        }
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockEmbedding;

    #[tokio::test]
    async fn test_fallback_returns_zero_vector_on_failure() {
        let inner = MockEmbedding::new(4).fail_on("broken");
        let service = ZeroVectorFallback::new(inner);

        let ok = service.embed("fine").await.unwrap();
        assert_eq!(ok.len(), 4);
        assert!(ok.iter().any(|v| *v != 0.0));

        let zero = service.embed("broken").await.unwrap();
        assert_eq!(zero, vec![0.0; 4]);
    }

    #[tokio::test]
    async fn test_inner_error_surfaces_without_wrapper() {
        let service = MockEmbedding::new(4).fail_on("broken");
        assert!(service.embed("broken").await.is_err());
    }
}
