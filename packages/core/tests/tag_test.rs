//! Tag Tests
//!
//! Best-effort tagging of node batches, golden snapshot lookup and tag
//! removal.

#[cfg(test)]
mod tag_tests {
    use anyhow::Result;
    use saverestore_core::db::MemoryDocumentStore;
    use saverestore_core::models::{ConfigPv, Configuration, Node, NodeType, Snapshot, Tag, TagData};
    use saverestore_core::services::{ErrorKind, TreeDao};
    use saverestore_core::StoreConfig;
    use std::sync::Arc;

    /// A DAO holding /Top/Cfg with two snapshots; returns (dao, folder, snapshots)
    async fn create_tagging_tree() -> Result<(TreeDao, Node, Vec<Node>)> {
        let dao = TreeDao::new(Arc::new(MemoryDocumentStore::new()), StoreConfig::default())?;
        let root = dao.get_root_node().await?;
        let top = dao
            .create_node(&root.unique_id, Node::new("Top", NodeType::Folder, "user"))
            .await?;
        let cfg = dao
            .create_configuration(
                &top.unique_id,
                Configuration::new("Cfg", "user", vec![ConfigPv::new("sys:temp")]),
            )
            .await?
            .configuration_node;

        let mut snapshots = Vec::new();
        for name in ["Morning", "Evening"] {
            let snapshot = dao
                .save_snapshot(&cfg.unique_id, Snapshot::new(name, "user", Vec::new()))
                .await?;
            snapshots.push(snapshot.snapshot_node);
        }
        Ok((dao, top, snapshots))
    }

    #[tokio::test]
    async fn test_golden_tag_lands_only_on_snapshots() -> Result<()> {
        let (dao, top, snapshots) = create_tagging_tree().await?;

        let updated = dao
            .add_tag(TagData {
                tag: Tag::golden("operator"),
                unique_node_ids: vec![
                    snapshots[0].unique_id.clone(),
                    top.unique_id.clone(),
                    "does-not-exist".to_string(),
                ],
            })
            .await?;

        // Folder and missing id are skipped, the snapshot is tagged
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].unique_id, snapshots[0].unique_id);
        assert!(!dao.get_node(&top.unique_id).await?.has_tag(Tag::GOLDEN));

        let golden = dao.get_golden_snapshots().await?;
        assert_eq!(golden.len(), 1);
        assert_eq!(golden[0].name, "Morning");
        Ok(())
    }

    #[tokio::test]
    async fn test_golden_match_is_case_sensitive() -> Result<()> {
        let (dao, top, snapshots) = create_tagging_tree().await?;

        // An upper-case variant is an ordinary tag, accepted on any node type
        let updated = dao
            .add_tag(TagData {
                tag: Tag::new("GOLDEN", "operator"),
                unique_node_ids: vec![snapshots[1].unique_id.clone(), top.unique_id.clone()],
            })
            .await?;
        assert_eq!(updated.len(), 2);
        assert!(dao.get_golden_snapshots().await?.is_empty());

        dao.add_tag(TagData {
            tag: Tag::golden("operator"),
            unique_node_ids: vec![snapshots[0].unique_id.clone()],
        })
        .await?;
        let golden = dao.get_golden_snapshots().await?;
        assert_eq!(golden.len(), 1);
        assert_eq!(golden[0].unique_id, snapshots[0].unique_id);
        Ok(())
    }

    #[tokio::test]
    async fn test_all_tags_and_delete_tag() -> Result<()> {
        let (dao, _top, snapshots) = create_tagging_tree().await?;
        let ids: Vec<String> = snapshots.iter().map(|s| s.unique_id.clone()).collect();

        dao.add_tag(TagData {
            tag: Tag::new("beam-study", "operator"),
            unique_node_ids: ids.clone(),
        })
        .await?;
        dao.add_tag(TagData {
            tag: Tag::golden("operator"),
            unique_node_ids: vec![ids[1].clone()],
        })
        .await?;

        let tags = dao.get_all_tags().await?;
        assert_eq!(tags.iter().filter(|t| t.name == "beam-study").count(), 2);
        assert_eq!(tags.iter().filter(|t| t.is_golden()).count(), 1);

        let updated = dao
            .delete_tag(TagData {
                tag: Tag::new("beam-study", "operator"),
                unique_node_ids: ids.clone(),
            })
            .await?;
        assert_eq!(updated.len(), 2);
        assert!(updated.iter().all(|n| !n.has_tag("beam-study")));

        // Removing again is a no-op
        let updated = dao
            .delete_tag(TagData {
                tag: Tag::new("beam-study", "operator"),
                unique_node_ids: ids,
            })
            .await?;
        assert!(updated.is_empty());

        let tags = dao.get_all_tags().await?;
        assert_eq!(tags.len(), 1);
        assert!(tags[0].is_golden());
        Ok(())
    }

    #[tokio::test]
    async fn test_tag_without_name_is_rejected() -> Result<()> {
        let (dao, _top, snapshots) = create_tagging_tree().await?;

        let err = dao
            .add_tag(TagData {
                tag: Tag::new("  ", "operator"),
                unique_node_ids: vec![snapshots[0].unique_id.clone()],
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(dao.get_all_tags().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_tag_keeps_node_metadata() -> Result<()> {
        let (dao, _top, snapshots) = create_tagging_tree().await?;
        let before = dao.get_node(&snapshots[0].unique_id).await?;

        let mut tag = Tag::new("reference", "operator");
        tag.created = None;
        tag.comment = Some("keep for commissioning".to_string());
        let updated = dao
            .add_tag(TagData {
                tag,
                unique_node_ids: vec![before.unique_id.clone()],
            })
            .await?;

        let after = &updated[0];
        assert_eq!(after.name, before.name);
        assert_eq!(after.user_name, before.user_name);
        assert_eq!(after.created, before.created);
        assert!(after.tags[0].created.is_some());
        assert_eq!(
            after.tags[0].comment.as_deref(),
            Some("keep for commissioning")
        );
        Ok(())
    }
}
