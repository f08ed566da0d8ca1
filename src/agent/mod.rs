//! Worker 与编排
//!
//! - [`Agent`]：唯一的能力接口 `run(context) -> text`
//! - [`WorkerAgent`]：由提示词策略配置出来的生成 Worker，不需要为每个角色写子类
//! - [`AgentRegistry`]：按名称查找 Worker，支持点对点消息与广播
//! - [`Dispatcher`]：从调度器领取任务、并发执行、回写记忆与上下文树

use crate::error::Result;
use async_trait::async_trait;

mod dispatcher;
mod registry;
mod worker;

pub use dispatcher::{DispatchConfig, Dispatcher, RunReport};
pub use registry::AgentRegistry;
pub use worker::{
    DEFAULT_TEMPERATURE, FnPromptStrategy, NovelRole, PromptStrategy, TemplateStrategy,
    WorkerAgent,
};

/// 一个 Worker：给定上下文字符串，产出一段文本
#[async_trait]
pub trait Agent: Send + Sync {
    /// Worker 名称，注册表以此为键
    fn name(&self) -> &str;

    async fn run(&self, context: &str) -> Result<String>;
}
