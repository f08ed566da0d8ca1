//! 层次化上下文树
//!
//! 每个节点可以递归折叠为一段摘要：叶子原样返回，非叶子先后序摘要所有子节点，
//! 再用一次生成服务调用把它们合并。无论子树多深，根节点的摘要大小都是有界的。

mod shared;
mod summary;
mod tree;

pub use shared::SharedContextTree;
pub use summary::{DefaultSummaryPrompt, FnSummaryPrompt, SUMMARY_SEPARATOR, SummaryPromptBuilder};
pub use tree::{ContextNode, ContextRecord, ContextTree, NodeId, SUMMARY_TEMPERATURE};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Metadata;
    use crate::error::{ContextError, NovelError};
    use crate::testing::MockLlmClient;
    use serde_json::json;

    fn meta(pairs: &[(&str, serde_json::Value)]) -> Metadata {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    /// 卷 → {第一章 → {场景1, 场景2}, 第二章}
    fn volume() -> (ContextTree, NodeId, NodeId) {
        let mut tree = ContextTree::new("卷一");
        let root = tree.root();
        let ch1 = tree
            .add_child(root, "第一章", meta(&[("kind", json!("chapter"))]))
            .unwrap();
        tree.add_child(ch1, "场景1", meta(&[("kind", json!("scene"))]))
            .unwrap();
        tree.add_child(ch1, "场景2", meta(&[("kind", json!("scene"))]))
            .unwrap();
        let ch2 = tree
            .add_child(root, "第二章", meta(&[("kind", json!("chapter"))]))
            .unwrap();
        (tree, ch1, ch2)
    }

    #[test]
    fn test_child_levels() {
        let (tree, ch1, _) = volume();
        assert_eq!(tree.node(tree.root()).unwrap().level(), 0);
        assert_eq!(tree.node(ch1).unwrap().level(), 1);
        let scene = tree.node(ch1).unwrap().children()[0];
        assert_eq!(tree.node(scene).unwrap().level(), 2);
        assert_eq!(tree.node(scene).unwrap().parent(), Some(ch1));
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_fresh_tree_holds_root() {
        let tree = ContextTree::new("卷一");
        assert_eq!(tree.len(), 1);
        assert!(!tree.is_empty());
        assert_eq!(tree.subtree_size(tree.root()).unwrap(), 1);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let (mut tree, _, _) = volume();
        let mut other = ContextTree::new("另一棵树");
        let foreign = other.add_child(other.root(), "a", Metadata::new()).unwrap();
        let foreign = other.add_child(foreign, "b", Metadata::new()).unwrap();
        let foreign = other.add_child(foreign, "c", Metadata::new()).unwrap();
        let foreign = other.add_child(foreign, "d", Metadata::new()).unwrap();
        let foreign = other.add_child(foreign, "e", Metadata::new()).unwrap();

        let err = tree.add_child(foreign, "x", Metadata::new()).unwrap_err();
        assert!(matches!(err, NovelError::Context(ContextError::UnknownNode(5))));
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_find_by_metadata_is_preorder() {
        let (tree, ch1, ch2) = volume();
        let chapters = tree.find_by_metadata("kind", &json!("chapter"));
        assert_eq!(chapters, vec![ch1, ch2]);

        let scenes: Vec<String> = tree
            .find_by_metadata("kind", &json!("scene"))
            .into_iter()
            .map(|id| tree.node(id).unwrap().content().to_string())
            .collect();
        assert_eq!(scenes, vec!["场景1", "场景2"]);
        assert!(tree.find_by_metadata("kind", &json!("volume")).is_empty());
    }

    #[test]
    fn test_path_and_render() {
        let (tree, ch1, _) = volume();
        let scene = tree.node(ch1).unwrap().children()[1];
        assert_eq!(tree.path(scene).unwrap(), vec!["卷一", "第一章", "场景2"]);
        assert_eq!(
            tree.render(),
            "卷一 (Level 0)\n  第一章 (Level 1)\n    场景1 (Level 2)\n    场景2 (Level 2)\n  第二章 (Level 1)\n"
        );
    }

    #[tokio::test]
    async fn test_leaf_summary_is_identity() {
        let (tree, _, ch2) = volume();
        let llm = MockLlmClient::new();
        let summary = tree
            .summarize(ch2, &llm, &DefaultSummaryPrompt)
            .await
            .unwrap();
        assert_eq!(summary, "第二章");
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_summary_is_post_order() {
        let (tree, _, _) = volume();
        let llm = MockLlmClient::new()
            .with_response("第一章摘要")
            .with_response("全卷摘要");
        let prompt = FnSummaryPrompt(|parts: &[String]| parts.join(SUMMARY_SEPARATOR));

        let summary = tree.summarize(tree.root(), &llm, &prompt).await.unwrap();
        assert_eq!(summary, "全卷摘要");

        let calls = llm.all_calls();
        assert_eq!(calls.len(), 2, "只有两个非叶子节点");
        assert_eq!(calls[0].prompt, "场景1\n\n场景2");
        assert_eq!(calls[1].prompt, "第一章摘要\n\n第二章");
        assert_eq!(calls[1].temperature, SUMMARY_TEMPERATURE);
    }

    #[tokio::test]
    async fn test_summary_propagates_generation_error() {
        let (tree, ch1, _) = volume();
        let llm = MockLlmClient::new().with_network_error("connection reset");
        let err = tree
            .summarize(ch1, &llm, &DefaultSummaryPrompt)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_record_round_trip_is_isomorphic() {
        let (tree, _, _) = volume();
        let record = tree.to_record(tree.root()).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("parent"));

        let restored = ContextTree::from_record(&serde_json::from_str(&json).unwrap());
        assert_eq!(restored.to_record(restored.root()).unwrap(), record);
        assert_eq!(restored.render(), tree.render());
    }

    #[test]
    fn test_load_recomputes_child_levels() {
        let record: ContextRecord = serde_json::from_value(json!({
            "content": "root",
            "level": 3,
            "children": [
                {"content": "a", "level": 9, "children": [{"content": "b", "level": 0}]}
            ]
        }))
        .unwrap();
        let tree = ContextTree::from_record(&record);
        assert_eq!(tree.len(), 3);

        let a = tree.node(tree.root()).unwrap().children()[0];
        let b = tree.node(a).unwrap().children()[0];
        assert_eq!(tree.node(tree.root()).unwrap().level(), 3);
        assert_eq!(tree.node(a).unwrap().level(), 4);
        assert_eq!(tree.node(b).unwrap().level(), 5);
        assert_eq!(tree.depth(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load_file() {
        let dir = std::env::temp_dir().join(format!("novel-agent-ctx-{}", uuid::Uuid::new_v4()));
        let path = dir.join("nested").join("tree.json");
        let (tree, _, _) = volume();
        tree.save(&path).await.unwrap();

        let shared = SharedContextTree::load(&path).await.unwrap();
        assert_eq!(shared.len().await, 5);
        assert_eq!(shared.render().await, tree.render());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_shared_tree_concurrent_add_child() {
        let shared = SharedContextTree::new("小说");
        let root = shared.root();
        let mut handles = Vec::new();
        for i in 0..16 {
            let tree = shared.clone();
            handles.push(tokio::spawn(async move {
                tree.add_child(root, format!("片段{i}"), Metadata::new())
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(shared.len().await, 17);
        let snapshot = shared.snapshot(root).await.unwrap();
        assert_eq!(snapshot.children.len(), 16);
        assert!(snapshot.children.iter().all(|c| c.level == 1));
    }

    #[tokio::test]
    async fn test_shared_summarize_uses_configured_prompt() {
        let shared = SharedContextTree::new("卷")
            .with_prompt(FnSummaryPrompt(|parts: &[String]| format!("SUM[{}]", parts.join("|"))));
        let root = shared.root();
        shared.add_child(root, "a", Metadata::new()).await.unwrap();
        shared.add_child(root, "b", Metadata::new()).await.unwrap();

        let llm = MockLlmClient::new().with_response("ok");
        assert_eq!(shared.summarize(root, &llm).await.unwrap(), "ok");
        assert_eq!(llm.last_prompt().as_deref(), Some("SUM[a|b]"));
    }

    #[tokio::test]
    async fn test_cached_summary_only_refreshes_changed_branches() {
        let shared = SharedContextTree::new("小说")
            .with_prompt(FnSummaryPrompt(|parts: &[String]| parts.join("|")));
        let root = shared.root();
        let ch1 = shared.add_child(root, "第一章", Metadata::new()).await.unwrap();
        shared.add_child(ch1, "正文1", Metadata::new()).await.unwrap();
        shared.add_child(ch1, "审阅1", Metadata::new()).await.unwrap();

        let llm = MockLlmClient::new().with_responses(["章1摘要", "全书摘要v1", "章2摘要", "全书摘要v2"]);
        assert_eq!(shared.cached_summary(root, &llm).await.unwrap(), "全书摘要v1");
        assert_eq!(shared.cached_summary(root, &llm).await.unwrap(), "全书摘要v1");
        assert_eq!(llm.call_count(), 2);

        let ch2 = shared.add_child(root, "第二章", Metadata::new()).await.unwrap();
        shared.add_child(ch2, "正文2", Metadata::new()).await.unwrap();
        assert_eq!(shared.cached_summary(root, &llm).await.unwrap(), "全书摘要v2");

        let prompts: Vec<String> = llm.all_calls().into_iter().map(|c| c.prompt).collect();
        assert_eq!(prompts, vec!["正文1|审阅1", "章1摘要", "正文2", "章1摘要|章2摘要"]);
    }
}
