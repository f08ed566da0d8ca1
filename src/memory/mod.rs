//! 有界记忆
//!
//! 分两层，职责各不相同：
//!
//! | 层次 | 实现 | 作用域 |
//! |------|------|--------|
//! | 近期记忆 | [`BoundedMemory`] 环形缓冲区 | 最近 `capacity` 条，FIFO 淘汰 |
//! | 长期记忆 | [`VectorStore`](crate::store::VectorStore) | 重要条目，按相似度检索 |
//!
//! ```rust
//! use novel_agent::memory::{BoundedMemory, MemoryItem};
//!
//! # #[tokio::main]
//! # async fn main() -> novel_agent::error::Result<()> {
//! let memory = BoundedMemory::new(3);
//! for n in 1..=5 {
//!     memory.add(MemoryItem::new("note", n.to_string()), false).await?;
//! }
//! let recent: Vec<String> = memory.recent(3).await.into_iter().map(|i| i.content).collect();
//! assert_eq!(recent, vec!["3", "4", "5"]);
//! # Ok(())
//! # }
//! ```

mod bounded;

pub use bounded::{BoundedMemory, DEFAULT_CAPACITY, MemoryItem};
