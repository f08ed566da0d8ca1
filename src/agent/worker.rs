//! 策略驱动的生成 Worker

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::llm::LlmClient;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// 模板中被替换为上下文的占位符
const CONTEXT_PLACEHOLDER: &str = "{context}";

/// 提示词策略：决定 Worker 如何把上下文变成一次生成请求
pub trait PromptStrategy: Send + Sync {
    fn system_message(&self) -> Option<&str>;

    fn build_prompt(&self, context: &str) -> String;
}

/// 基于模板的策略。
///
/// 模板含 `{context}` 时原地替换；不含时把上下文追加在模板之后。
#[derive(Debug, Clone)]
pub struct TemplateStrategy {
    template: String,
    system_message: Option<String>,
}

impl TemplateStrategy {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            system_message: None,
        }
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }
}

impl PromptStrategy for TemplateStrategy {
    fn system_message(&self) -> Option<&str> {
        self.system_message.as_deref()
    }

    fn build_prompt(&self, context: &str) -> String {
        if self.template.contains(CONTEXT_PLACEHOLDER) {
            self.template.replace(CONTEXT_PLACEHOLDER, context)
        } else if self.template.is_empty() {
            context.to_string()
        } else {
            format!("{}\n\n{}", self.template, context)
        }
    }
}

/// 用闭包构造提示词
pub struct FnPromptStrategy<F> {
    f: F,
    system_message: Option<String>,
}

impl<F> FnPromptStrategy<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            system_message: None,
        }
    }

    pub fn with_system_message(mut self, system_message: impl Into<String>) -> Self {
        self.system_message = Some(system_message.into());
        self
    }
}

impl<F> PromptStrategy for FnPromptStrategy<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn system_message(&self) -> Option<&str> {
        self.system_message.as_deref()
    }

    fn build_prompt(&self, context: &str) -> String {
        (self.f)(context)
    }
}

/// 小说流水线中的六种 Worker 角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NovelRole {
    /// 大纲与结构规划
    Planner,
    CharacterDesigner,
    WorldBuilder,
    ChapterWriter,
    Editor,
    /// 跨章节一致性检查
    ContinuityChecker,
}

impl NovelRole {
    pub const ALL: [NovelRole; 6] = [
        NovelRole::Planner,
        NovelRole::CharacterDesigner,
        NovelRole::WorldBuilder,
        NovelRole::ChapterWriter,
        NovelRole::Editor,
        NovelRole::ContinuityChecker,
    ];

    /// 注册表中的默认名称
    pub fn name(&self) -> &'static str {
        match self {
            NovelRole::Planner => "Planner",
            NovelRole::CharacterDesigner => "CharacterDesigner",
            NovelRole::WorldBuilder => "WorldBuilder",
            NovelRole::ChapterWriter => "ChapterWriter",
            NovelRole::Editor => "Editor",
            NovelRole::ContinuityChecker => "ContinuityChecker",
        }
    }

    pub fn system_message(&self, agent_name: &str) -> String {
        let duty = match self {
            NovelRole::Planner => {
                "a professional novel planner. Your job is to create detailed novel outlines, plan story arcs, and design the overall structure of long-form fiction."
            }
            NovelRole::CharacterDesigner => {
                "a professional character designer for novels. Your job is to create detailed character profiles, design character relationships, and ensure consistent character development throughout the story."
            }
            NovelRole::WorldBuilder => {
                "a professional world-building expert for novels. Your job is to create detailed, consistent, and immersive fictional worlds with rich histories, cultures, and environments."
            }
            NovelRole::ChapterWriter => {
                "a professional novelist specializing in writing engaging and cohesive novel chapters. Your writing is vivid, character-driven, and maintains consistent pacing and tone."
            }
            NovelRole::Editor => {
                "a professional editor with expertise in fiction. Your job is to review and improve novel content, ensuring high quality, consistency, and engaging prose."
            }
            NovelRole::ContinuityChecker => {
                "a meticulous continuity editor for novels. Your job is to identify and resolve continuity errors, inconsistencies, and plot holes across chapters."
            }
        };
        format!("You are {agent_name}, {duty}")
    }

    fn template(&self) -> &'static str {
        match self {
            NovelRole::Planner => {
                "Plan the following part of the novel. Be specific about plot points, pacing and chapter boundaries.\n\n{context}"
            }
            NovelRole::CharacterDesigner => {
                "Design the characters needed for the following work. For each character give name, background, personality, motivation and arc.\n\n{context}"
            }
            NovelRole::WorldBuilder => {
                "Build the setting for the following work: geography, history, cultures, rules and the places where scenes happen.\n\n{context}"
            }
            NovelRole::ChapterWriter => {
                "Write the requested chapter as polished prose. Stay consistent with the outline, characters, world and previous chapters below.\n\n{context}"
            }
            NovelRole::Editor => {
                "Review the following material. List concrete problems with prose, pacing and characterization, then give the revised text.\n\n{context}"
            }
            NovelRole::ContinuityChecker => {
                "Check the following material for continuity errors in characters, timeline, setting and plot. Report each issue with a suggested fix.\n\n{context}"
            }
        }
    }

    pub fn strategy(&self) -> TemplateStrategy {
        self.strategy_for(self.name())
    }

    pub fn strategy_for(&self, agent_name: &str) -> TemplateStrategy {
        TemplateStrategy::new(self.template()).with_system_message(self.system_message(agent_name))
    }
}

/// 由提示词策略配置的生成 Worker
pub struct WorkerAgent {
    name: String,
    llm: Arc<dyn LlmClient>,
    strategy: Arc<dyn PromptStrategy>,
    temperature: f32,
}

impl WorkerAgent {
    pub fn new(
        name: impl Into<String>,
        llm: Arc<dyn LlmClient>,
        strategy: impl PromptStrategy + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            llm,
            strategy: Arc::new(strategy),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    /// 使用角色的默认名称和策略
    pub fn for_role(role: NovelRole, llm: Arc<dyn LlmClient>) -> Self {
        Self::new(role.name(), llm, role.strategy())
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

#[async_trait]
impl Agent for WorkerAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, context: &str) -> Result<String> {
        let prompt = self.strategy.build_prompt(context);
        debug!(agent = %self.name, prompt_len = prompt.len(), "🧠 Worker 开始生成");
        let output = self
            .llm
            .generate(&prompt, self.strategy.system_message(), self.temperature)
            .await?;
        if output.trim().is_empty() {
            return Err(AgentError::EmptyOutput(self.name.clone()).into());
        }
        info!(agent = %self.name, output_len = output.len(), "✍️ Worker 生成完成");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NovelError;
    use crate::testing::MockLlmClient;

    #[test]
    fn test_template_placeholder_and_append() {
        let inline = TemplateStrategy::new("Outline:\n{context}\nEnd");
        assert_eq!(inline.build_prompt("a heist"), "Outline:\na heist\nEnd");

        let appended = TemplateStrategy::new("Write it.");
        assert_eq!(appended.build_prompt("ctx"), "Write it.\n\nctx");
        assert_eq!(TemplateStrategy::new("").build_prompt("ctx"), "ctx");
        assert_eq!(appended.system_message(), None);
    }

    #[tokio::test]
    async fn test_worker_passes_prompt_system_message_and_temperature() {
        let llm = Arc::new(MockLlmClient::new().with_response("Chapter one text"));
        let worker = WorkerAgent::for_role(NovelRole::ChapterWriter, llm.clone())
            .with_temperature(0.9);

        let out = worker.run("Chapter 1: the storm").await.unwrap();
        assert_eq!(out, "Chapter one text");
        assert_eq!(worker.name(), "ChapterWriter");

        let calls = llm.all_calls();
        let call = &calls[0];
        assert!(call.prompt.ends_with("Chapter 1: the storm"));
        assert!(!call.prompt.contains("{context}"));
        assert!(
            call.system_message
                .as_deref()
                .unwrap()
                .starts_with("You are ChapterWriter, a professional novelist")
        );
        assert_eq!(call.temperature, 0.9);
    }

    #[tokio::test]
    async fn test_fn_strategy() {
        let llm = Arc::new(MockLlmClient::new().with_response("ok"));
        let strategy =
            FnPromptStrategy::new(|ctx: &str| format!("<<{}>>", ctx.to_uppercase()))
                .with_system_message("sys");
        let worker = WorkerAgent::new("Shouter", llm.clone(), strategy);
        worker.run("hello").await.unwrap();

        let calls = llm.all_calls();
        let call = &calls[0];
        assert_eq!(call.prompt, "<<HELLO>>");
        assert_eq!(call.system_message.as_deref(), Some("sys"));
        assert_eq!(call.temperature, DEFAULT_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_empty_output_is_error() {
        let llm = Arc::new(MockLlmClient::new().with_response("   "));
        let worker = WorkerAgent::for_role(NovelRole::Editor, llm);
        let err = worker.run("draft").await.unwrap_err();
        assert!(matches!(err, NovelError::Agent(AgentError::EmptyOutput(ref n)) if n == "Editor"));
    }

    #[tokio::test]
    async fn test_generation_error_propagates_unchanged() {
        let llm = Arc::new(MockLlmClient::new().with_network_error("down"));
        let worker = WorkerAgent::for_role(NovelRole::Planner, llm);
        let err = worker.run("brief").await.unwrap_err();
        assert!(matches!(err, NovelError::Llm(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_role_names_are_distinct() {
        let mut names: Vec<&str> = NovelRole::ALL.iter().map(|r| r.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 6);
        assert!(
            NovelRole::WorldBuilder
                .system_message("Atlas")
                .starts_with("You are Atlas, a professional world-building expert")
        );
    }
}
