//! 任务拆解结果的严格 schema
//!
//! 规划 Worker 返回的 JSON 必须满足：
//!
//! ```json
//! {
//!   "subtasks": [
//!     { "id": "ch1-scene1", "description": "...", "dependencies": [], "assigned_worker": "ChapterWriter" }
//!   ]
//! }
//! ```
//!
//! 任何偏离都会成为 [`ParseError::MalformedResponse`]；
//! [`decompose_or_fallback`] 在此时给出唯一的兜底子任务，不做重试。

use crate::error::{NovelError, ParseError, Result};
use crate::tasks::task::Task;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubtaskSpec {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub assigned_worker: String,
    #[serde(default)]
    pub complexity: Option<Complexity>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Decomposition {
    pub subtasks: Vec<SubtaskSpec>,
}

/// 解析并校验拆解结果，转换为挂在 `parent_id` 下的任务列表。
///
/// `known_ids` 为调度器中已存在的任务 ID，子任务可以依赖它们或彼此。
pub fn parse_decomposition(
    raw: &str,
    parent_id: &str,
    known_ids: &HashSet<String>,
) -> Result<Vec<Task>> {
    let payload = strip_code_fence(raw);
    let decomposition: Decomposition = serde_json::from_str(payload)
        .map_err(|e| ParseError::MalformedResponse(format!("invalid decomposition JSON: {e}")))?;

    if decomposition.subtasks.is_empty() {
        return Err(malformed("decomposition contains no subtasks"));
    }

    let mut sibling_ids = HashSet::new();
    for spec in &decomposition.subtasks {
        if spec.id.trim().is_empty() {
            return Err(malformed("subtask id must not be empty"));
        }
        if spec.assigned_worker.trim().is_empty() {
            return Err(malformed(&format!(
                "subtask '{}' has no assigned_worker",
                spec.id
            )));
        }
        if known_ids.contains(&spec.id) || !sibling_ids.insert(spec.id.clone()) {
            return Err(malformed(&format!("duplicate subtask id '{}'", spec.id)));
        }
    }

    for spec in &decomposition.subtasks {
        if let Some(dep) = spec
            .dependencies
            .iter()
            .find(|dep| !sibling_ids.contains(*dep) && !known_ids.contains(*dep))
        {
            return Err(malformed(&format!(
                "subtask '{}' depends on unknown task '{}'",
                spec.id, dep
            )));
        }
    }

    if let Some(path) = sibling_cycle(&decomposition.subtasks) {
        return Err(malformed(&format!(
            "subtasks form a dependency cycle: {}",
            path.join(" -> ")
        )));
    }

    Ok(decomposition
        .subtasks
        .into_iter()
        .map(|spec| {
            Task::new(spec.id, spec.description)
                .with_dependencies(spec.dependencies)
                .assigned_to(spec.assigned_worker)
                .with_parent(parent_id)
        })
        .collect())
}

/// 解析失败时退化为单个默认子任务
pub fn decompose_or_fallback(
    raw: &str,
    parent: &Task,
    default_worker: &str,
    known_ids: &HashSet<String>,
) -> Vec<Task> {
    match parse_decomposition(raw, &parent.id, known_ids) {
        Ok(tasks) => tasks,
        Err(e) => {
            warn!(task_id = %parent.id, error = %e, "⚠️ 拆解结果无效，使用默认子任务");
            vec![fallback_subtask(parent, default_worker)]
        }
    }
}

pub fn fallback_subtask(parent: &Task, default_worker: &str) -> Task {
    Task::new(format!("{}-fallback", parent.id), parent.description.clone())
        .assigned_to(default_worker)
        .with_parent(parent.id.clone())
}

/// 只在兄弟子任务之间找环；已存在的任务不会依赖尚未提交的子任务
fn sibling_cycle(subtasks: &[SubtaskSpec]) -> Option<Vec<String>> {
    let edges: HashMap<&str, &[String]> = subtasks
        .iter()
        .map(|spec| (spec.id.as_str(), spec.dependencies.as_slice()))
        .collect();
    let mut finished: HashSet<&str> = HashSet::new();
    for spec in subtasks {
        let mut path = Vec::new();
        if visit(&spec.id, &edges, &mut finished, &mut path) {
            return Some(path);
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    edges: &HashMap<&'a str, &'a [String]>,
    finished: &mut HashSet<&'a str>,
    path: &mut Vec<String>,
) -> bool {
    if let Some(start) = path.iter().position(|p| p == id) {
        path.drain(..start);
        path.push(id.to_string());
        return true;
    }
    if finished.contains(id) {
        return false;
    }
    let Some(&deps) = edges.get(id) else {
        return false;
    };
    path.push(id.to_string());
    for dep in deps.iter() {
        if visit(dep, edges, finished, path) {
            return true;
        }
    }
    path.pop();
    finished.insert(id);
    false
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn malformed(reason: &str) -> NovelError {
    ParseError::MalformedResponse(reason.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_known() -> HashSet<String> {
        HashSet::new()
    }

    #[test]
    fn test_parse_valid_decomposition() {
        let raw = r#"```json
        {"subtasks": [
            {"id": "a", "description": "first", "assigned_worker": "Writer", "complexity": "low"},
            {"id": "b", "description": "second", "dependencies": ["a"], "assigned_worker": "Editor"}
        ]}
        ```"#;
        let tasks = parse_decomposition(raw, "parent", &no_known()).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].dependencies.iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(tasks[1].assigned_worker, "Editor");
        assert!(tasks.iter().all(|t| t.parent_id.as_deref() == Some("parent")));
    }

    #[test]
    fn test_unknown_field_is_malformed() {
        let raw = r#"{"subtasks": [{"id": "a", "description": "x", "assigned_worker": "W", "agent": "W"}]}"#;
        let err = parse_decomposition(raw, "p", &no_known()).unwrap_err();
        assert!(matches!(
            err,
            NovelError::Parse(ParseError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_dangling_dependency_is_malformed() {
        let raw = r#"{"subtasks": [{"id": "a", "description": "x", "dependencies": ["ghost"], "assigned_worker": "W"}]}"#;
        assert!(parse_decomposition(raw, "p", &no_known()).is_err());

        let known: HashSet<String> = ["ghost".to_string()].into_iter().collect();
        assert!(parse_decomposition(raw, "p", &known).is_ok());
    }

    #[test]
    fn test_empty_and_duplicate_subtasks_rejected() {
        assert!(parse_decomposition(r#"{"subtasks": []}"#, "p", &no_known()).is_err());
        let dup = r#"{"subtasks": [
            {"id": "a", "description": "x", "assigned_worker": "W"},
            {"id": "a", "description": "y", "assigned_worker": "W"}
        ]}"#;
        assert!(parse_decomposition(dup, "p", &no_known()).is_err());
    }

    #[test]
    fn test_sibling_cycle_is_malformed() {
        let raw = r#"{"subtasks": [
            {"id": "s0", "description": "x", "assigned_worker": "W"},
            {"id": "s1", "description": "y", "dependencies": ["s0", "s2"], "assigned_worker": "W"},
            {"id": "s2", "description": "z", "dependencies": ["s1"], "assigned_worker": "W"}
        ]}"#;
        let err = parse_decomposition(raw, "p", &no_known()).unwrap_err();
        match err {
            NovelError::Parse(ParseError::MalformedResponse(msg)) => {
                assert!(msg.contains("s1 -> s2 -> s1"), "{msg}");
            }
            other => panic!("unexpected error: {other}"),
        }

        let self_loop = r#"{"subtasks": [{"id": "a", "description": "x", "dependencies": ["a"], "assigned_worker": "W"}]}"#;
        assert!(parse_decomposition(self_loop, "p", &no_known()).is_err());

        let parent = Task::new("p", "plan");
        let tasks = decompose_or_fallback(raw, &parent, "Writer", &no_known());
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "p-fallback");
    }

    #[test]
    fn test_fallback_on_prose_response() {
        let parent = Task::new("chapter_3", "Write chapter three");
        let tasks = decompose_or_fallback(
            "Sure! Here are some ideas for chapter three...",
            &parent,
            "ChapterWriter",
            &no_known(),
        );
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, "chapter_3-fallback");
        assert_eq!(tasks[0].assigned_worker, "ChapterWriter");
        assert!(tasks[0].dependencies.is_empty());
    }
}
