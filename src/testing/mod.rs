//! 测试基础设施
//!
//! 提供在不依赖真实生成服务 / 嵌入服务的情况下测试 novel-agent 各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockLlmClient`] | 替代真实生成服务，用于测试上下文树摘要、`WorkerAgent` 等依赖 `LlmClient` 的组件 |
//! | [`MockEmbedding`] | 替代真实嵌入服务，可为指定文本预设向量或制造失败 |
//! | [`MockAgent`] | 替代真实 Worker，用于测试注册表与调度器 |
//! | [`FailingMockAgent`] | 总是返回错误，用于测试调度的容错路径 |
//!
//! # 设计原则
//!
//! - **零网络请求**：所有 Mock 都完全在内存中运行
//! - **可脚本化**：通过 `with_response()` / `with_error()` / `with_vector()` 精确控制返回值
//! - **可观测**：通过 `call_count()` / `calls()` 等方法检查调用情况
//! - **线程安全**：内部使用 `Arc<Mutex<_>>`，可安全地在多任务测试中共享
//!
//! # 使用示例
//!
//! ```rust
//! use novel_agent::context::SharedContextTree;
//! use novel_agent::testing::MockLlmClient;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> novel_agent::error::Result<()> {
//! let llm = Arc::new(MockLlmClient::new().with_response("第一卷摘要"));
//! let tree = SharedContextTree::new("第一卷");
//! let root = tree.root();
//! tree.add_child(root, "第一章", HashMap::new()).await?;
//! tree.add_child(root, "第二章", HashMap::new()).await?;
//!
//! let summary = tree.summarize(root, llm.as_ref()).await?;
//! assert_eq!(summary, "第一卷摘要");
//! assert_eq!(llm.call_count(), 1);
//! # Ok(())
//! # }
//! ```

mod mock_agent;
mod mock_embedding;
mod mock_llm;

pub use mock_agent::{FailingMockAgent, MockAgent};
pub use mock_embedding::MockEmbedding;
pub use mock_llm::{MockLlmCall, MockLlmClient};
