/// 子节点摘要之间的固定分隔符
pub const SUMMARY_SEPARATOR: &str = "\n\n";

/// 摘要提示词构建接口，支持自定义摘要策略。
///
/// 入参为按挂载顺序排列的子节点摘要。
pub trait SummaryPromptBuilder: Send + Sync {
    fn build(&self, child_summaries: &[String]) -> String;
}

/// 默认摘要提示词：要求在保留关键情节的前提下比原文更简洁
pub struct DefaultSummaryPrompt;

impl SummaryPromptBuilder for DefaultSummaryPrompt {
    fn build(&self, child_summaries: &[String]) -> String {
        format!(
            "Summarize the following content into a coherent and comprehensive summary:\n\n\
            {}\n\n\
            Your summary should capture all key points while being more concise than the original.",
            child_summaries.join(SUMMARY_SEPARATOR)
        )
    }
}

/// 用闭包自定义提示词的便捷包装
///
/// # 示例
///
/// ```rust
/// use novel_agent::context::FnSummaryPrompt;
///
/// let prompt = FnSummaryPrompt(|parts: &[String]| {
///     format!("用一段话总结以下章节：\n{}", parts.join("\n"))
/// });
/// ```
pub struct FnSummaryPrompt<F>(pub F)
where
    F: Fn(&[String]) -> String + Send + Sync;

impl<F> SummaryPromptBuilder for FnSummaryPrompt<F>
where
    F: Fn(&[String]) -> String + Send + Sync,
{
    fn build(&self, child_summaries: &[String]) -> String {
        (self.0)(child_summaries)
    }
}
