//! 小说生成的标准任务图
//!
//! ```text
//! create_outline ─┬─▶ create_chapter_structure ─────────────────────┐
//!                 ├─▶ design_characters ─┬─▶ create_continuity_notes ┤
//!                 └─▶ design_world ──────┘                           ▼
//!                     write_chapter_1 ─▶ review_chapter_1 ─▶ check_continuity_chapter_1
//!                     write_chapter_2 ─▶ ...                        （依赖上一章的连贯性检查）
//! ```

use crate::agent::NovelRole;
use crate::tasks::Task;

pub const CREATE_OUTLINE: &str = "create_outline";
pub const CREATE_CHAPTER_STRUCTURE: &str = "create_chapter_structure";
pub const DESIGN_CHARACTERS: &str = "design_characters";
pub const DESIGN_WORLD: &str = "design_world";
pub const CREATE_CONTINUITY_NOTES: &str = "create_continuity_notes";

/// 大纲、人物、世界观等基础设定任务的分组
pub const FOUNDATION_GROUP: &str = "foundation";

/// 同一章的写作、审阅与连贯性检查共用的分组
pub fn chapter_group(chapter: usize) -> String {
    format!("chapter_{chapter}")
}

pub fn write_chapter_id(chapter: usize) -> String {
    format!("write_chapter_{chapter}")
}

pub fn review_chapter_id(chapter: usize) -> String {
    format!("review_chapter_{chapter}")
}

pub fn check_continuity_id(chapter: usize) -> String {
    format!("check_continuity_chapter_{chapter}")
}

/// 构建 `chapters` 章小说的任务图，按可执行顺序排列
pub fn novel_task_graph(chapters: usize) -> Vec<Task> {
    let mut tasks = vec![
        Task::new(CREATE_OUTLINE, "Create the novel outline").assigned_to(NovelRole::Planner.name()),
        Task::new(
            CREATE_CHAPTER_STRUCTURE,
            format!("Create the chapter structure for {chapters} chapters"),
        )
        .with_dependencies([CREATE_OUTLINE])
        .assigned_to(NovelRole::Planner.name()),
        Task::new(DESIGN_CHARACTERS, "Design the main and supporting characters")
            .with_dependencies([CREATE_OUTLINE])
            .assigned_to(NovelRole::CharacterDesigner.name()),
        Task::new(DESIGN_WORLD, "Design the world and setting")
            .with_dependencies([CREATE_OUTLINE])
            .assigned_to(NovelRole::WorldBuilder.name()),
        Task::new(
            CREATE_CONTINUITY_NOTES,
            "Create continuity notes covering characters and world rules",
        )
        .with_dependencies([DESIGN_CHARACTERS, DESIGN_WORLD])
        .assigned_to(NovelRole::ContinuityChecker.name()),
    ]
    .into_iter()
    .map(|task| task.in_group(FOUNDATION_GROUP))
    .collect::<Vec<_>>();

    for chapter in 1..=chapters {
        let previous = if chapter == 1 {
            CREATE_CONTINUITY_NOTES.to_string()
        } else {
            check_continuity_id(chapter - 1)
        };
        tasks.push(
            Task::new(write_chapter_id(chapter), format!("Write chapter {chapter}"))
                .with_dependencies([CREATE_CHAPTER_STRUCTURE.to_string(), previous])
                .assigned_to(NovelRole::ChapterWriter.name())
                .in_group(chapter_group(chapter)),
        );
        tasks.push(
            Task::new(review_chapter_id(chapter), format!("Review and edit chapter {chapter}"))
                .with_dependencies([write_chapter_id(chapter)])
                .assigned_to(NovelRole::Editor.name())
                .in_group(chapter_group(chapter)),
        );
        tasks.push(
            Task::new(
                check_continuity_id(chapter),
                format!("Check continuity of chapter {chapter} against earlier chapters"),
            )
            .with_dependencies([review_chapter_id(chapter)])
            .assigned_to(NovelRole::ContinuityChecker.name())
            .in_group(chapter_group(chapter)),
        );
    }
    tasks
}

/// 小说的基本设定
#[derive(Debug, Clone)]
pub struct NovelBrief {
    pub title: String,
    pub genre: String,
    pub chapters: usize,
}

impl NovelBrief {
    pub fn new(title: impl Into<String>, genre: impl Into<String>, chapters: usize) -> Self {
        Self {
            title: title.into(),
            genre: genre.into(),
            chapters,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "\"{}\", a {} novel in {} chapters",
            self.title, self.genre, self.chapters
        )
    }

    /// 与 [`novel_task_graph`] 相同，大纲任务的描述带上书名与类型
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks = novel_task_graph(self.chapters);
        if let Some(outline) = tasks.iter_mut().find(|t| t.id == CREATE_OUTLINE) {
            outline.description = format!("Create the novel outline for {}", self.describe());
        }
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::Scheduler;

    fn deps(task: &Task) -> Vec<&str> {
        task.dependencies.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_graph_shape() {
        let tasks = novel_task_graph(2);
        assert_eq!(tasks.len(), 5 + 2 * 3);

        let find = |id: &str| tasks.iter().find(|t| t.id == id).unwrap();
        assert!(find(CREATE_OUTLINE).dependencies.is_empty());
        assert_eq!(
            deps(find(CREATE_CONTINUITY_NOTES)),
            vec![DESIGN_CHARACTERS, DESIGN_WORLD]
        );
        assert_eq!(
            deps(find("write_chapter_1")),
            vec![CREATE_CHAPTER_STRUCTURE, CREATE_CONTINUITY_NOTES]
        );
        assert_eq!(
            deps(find("write_chapter_2")),
            vec!["check_continuity_chapter_1", CREATE_CHAPTER_STRUCTURE]
        );
        assert_eq!(deps(find("check_continuity_chapter_2")), vec!["review_chapter_2"]);
        assert_eq!(find("review_chapter_1").assigned_worker, "Editor");
        assert_eq!(find("design_world").assigned_worker, "WorldBuilder");

        assert_eq!(find(DESIGN_WORLD).group.as_deref(), Some(FOUNDATION_GROUP));
        assert_eq!(find("write_chapter_2").group.as_deref(), Some("chapter_2"));
        assert_eq!(find("review_chapter_2").group, find("check_continuity_chapter_2").group);
    }

    #[test]
    fn test_graph_is_schedulable_in_order() {
        let scheduler = Scheduler::new();
        scheduler.submit_all(novel_task_graph(2)).unwrap();

        let mut order = Vec::new();
        while let Some(task) = scheduler.next_runnable().unwrap() {
            scheduler.complete(&task.id, "done").unwrap();
            order.push(task.id);
        }
        assert_eq!(
            order,
            vec![
                "create_outline",
                "create_chapter_structure",
                "design_characters",
                "design_world",
                "create_continuity_notes",
                "write_chapter_1",
                "review_chapter_1",
                "check_continuity_chapter_1",
                "write_chapter_2",
                "review_chapter_2",
                "check_continuity_chapter_2",
            ]
        );
        assert!(scheduler.inspect(|m| m.is_finished()).unwrap());
    }

    #[test]
    fn test_brief_names_the_novel_in_outline_task() {
        let tasks = NovelBrief::new("The Salt Road", "fantasy", 0).tasks();
        assert_eq!(tasks.len(), 5);
        assert_eq!(
            tasks[0].description,
            "Create the novel outline for \"The Salt Road\", a fantasy novel in 0 chapters"
        );
    }
}
