//! Worker 注册表

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::llm::LlmClient;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 选择 Worker 时使用的温度
const SELECTION_TEMPERATURE: f32 = 0.0;

/// 按名称索引的 Worker 集合，保留注册顺序。
///
/// 由 [`Dispatcher`](crate::agent::Dispatcher) 持有，不存在进程级单例。
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<Arc<dyn Agent>>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册 Worker；同名 Worker 会被替换，注册位置不变
    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        if let Some(&pos) = self.index.get(&name) {
            warn!(agent = %name, "⚠️ 同名 Worker 已存在，替换");
            self.agents[pos] = agent;
        } else {
            self.index.insert(name.clone(), self.agents.len());
            self.agents.push(agent);
            info!(agent = %name, "📋 注册 Worker");
        }
    }

    pub fn with_agent(mut self, agent: impl Agent + 'static) -> Self {
        self.register(Arc::new(agent));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.index.get(name).map(|&pos| self.agents[pos].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// 按注册顺序
    pub fn names(&self) -> Vec<&str> {
        self.agents.iter().map(|a| a.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    fn require(&self, name: &str) -> Result<Arc<dyn Agent>> {
        self.get(name)
            .ok_or_else(|| AgentError::NotFound(name.to_string()).into())
    }

    /// 直接调用
    pub async fn invoke(&self, name: &str, context: &str) -> Result<String> {
        let agent = self.require(name)?;
        debug!(agent = %name, "📨 调用 Worker");
        agent.run(context).await
    }

    /// 点对点消息，返回接收方的回复
    pub async fn send(&self, from: &str, to: &str, message: &str) -> Result<String> {
        let agent = self.require(to)?;
        debug!(from = %from, to = %to, "📨 Worker 间消息");
        agent
            .run(&format!(
                "Message from {from}:\n\n{message}\n\nPlease respond to this message."
            ))
            .await
    }

    /// 为任务挑选最合适的 Worker。
    ///
    /// 有 `llm` 时让它在已注册的名称中选择；回答不是已注册名称、生成失败或没有 `llm`
    /// 时都退回第一个注册的 Worker。
    pub async fn select(
        &self,
        llm: Option<&dyn LlmClient>,
        description: &str,
    ) -> Result<Arc<dyn Agent>> {
        let first = self.agents.first().cloned().ok_or(AgentError::NoAgents)?;
        let Some(llm) = llm else {
            return Ok(first);
        };

        let prompt = format!(
            "Based on the following task, which agent would be best suited to handle it?\n\n\
             Task: {description}\n\n\
             Available agents:\n{}\n\n\
             Respond with just the name of the most suitable agent.",
            self.names().join(", ")
        );
        let answer = match llm.generate(&prompt, None, SELECTION_TEMPERATURE).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, fallback = %first.name(), "⚠️ Worker 选择失败，使用默认 Worker");
                return Ok(first);
            }
        };
        let name = answer.trim().trim_matches(|c: char| c == '"' || c == '\'' || c == '.' || c == '`');
        match self
            .agents
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
        {
            Some(agent) => {
                info!(agent = %agent.name(), "🎯 已选择 Worker");
                Ok(agent.clone())
            }
            None => {
                warn!(answer = %name, fallback = %first.name(), "⚠️ 选择了未注册的 Worker，使用默认 Worker");
                Ok(first)
            }
        }
    }

    /// 向除发送方以外的所有 Worker 并发广播，结果按注册顺序返回
    pub async fn broadcast(&self, from: &str, message: &str) -> Vec<(String, Result<String>)> {
        let context = format!(
            "Broadcast message from {from}:\n\n{message}\n\nPlease respond to this broadcast message."
        );
        let recipients: Vec<&Arc<dyn Agent>> =
            self.agents.iter().filter(|a| a.name() != from).collect();
        info!(from = %from, recipients = recipients.len(), "📢 广播消息");

        let replies = join_all(recipients.iter().map(|agent| agent.run(&context))).await;
        recipients
            .into_iter()
            .map(|a| a.name().to_string())
            .zip(replies)
            .collect()
    }
}
