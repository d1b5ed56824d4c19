use std::sync::Arc;

use colloquy_core::{
    CoordinatorOptions, FileStorage, HistoryIndex, HistorySearch, HttpGateway, SessionConfig,
    SessionCoordinator, SessionMode, StageConfig, Storage, TelemetryStore,
};
use tempfile::TempDir;

fn coordinator(root: &TempDir, options: CoordinatorOptions) -> SessionCoordinator {
    let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(root.path()));
    SessionCoordinator::new(Arc::new(HttpGateway::new()), HistoryIndex::new(storage.clone()))
        .with_telemetry(TelemetryStore::new(storage))
        .with_options(options)
}

fn mock_stage(model: &str) -> StageConfig {
    StageConfig::new("mock", model)
}

async fn save_chat(
    coordinator: &SessionCoordinator,
    config: SessionConfig,
    turns: &[&str],
) -> String {
    let mut session = coordinator.open_session(config).await.unwrap();
    for turn in turns {
        coordinator.submit_turn(&mut session, turn).await.unwrap();
    }
    coordinator.close_session(&mut session).await;
    session.id().to_string()
}

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_history_survives_restart() {
        let dir = TempDir::new().unwrap();
        let id = {
            let first = coordinator(&dir, CoordinatorOptions::default());
            save_chat(
                &first,
                SessionConfig::single(mock_stage("echo")),
                &["what is a borrow checker"],
            )
            .await
        };

        assert!(dir.path().join("history").join("index.json").exists());
        let records = dir.path().join("history").join("conversations");
        assert!(records.join(format!("{id}.json")).exists());
        assert!(dir.path().join("metrics.json").exists());

        let second = coordinator(&dir, CoordinatorOptions::default());
        let entries = second.history().list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, id);
        assert_eq!(entries[0].preview, "[mock/echo] Echo: what is a borrow checker");

        let record = second.history().get(&id).await.unwrap().unwrap();
        assert_eq!(record.messages.len(), 2);
        assert!(record.trace.is_none());
    }

    #[tokio::test]
    async fn test_trace_is_embedded_when_requested() {
        let dir = TempDir::new().unwrap();
        let options = CoordinatorOptions {
            include_trace_in_history: true,
            workspace: "demo".to_string(),
            ..CoordinatorOptions::default()
        };
        let coordinator = coordinator(&dir, options);

        let id = save_chat(
            &coordinator,
            SessionConfig::single(mock_stage("echo")),
            &["hi"],
        )
        .await;

        let record = coordinator.history().get(&id).await.unwrap().unwrap();
        let trace = record.trace.unwrap();
        assert_eq!(trace.entries.len(), 4);
        assert!(trace.end_time.is_some());
        assert_eq!(record.index.workspace, "demo");
    }

    #[tokio::test]
    async fn test_resaving_keeps_single_entry() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, CoordinatorOptions::default());
        let config = SessionConfig::single(mock_stage("echo"));

        let mut session = coordinator
            .open_session_with_id("conv-7", config.clone())
            .await
            .unwrap();
        coordinator.submit_turn(&mut session, "one").await.unwrap();
        let first = coordinator.close_session(&mut session).await.unwrap();

        let mut resumed = coordinator
            .open_session_with_id("conv-7", config)
            .await
            .unwrap();
        coordinator.submit_turn(&mut resumed, "two").await.unwrap();
        let second = coordinator.close_session(&mut resumed).await.unwrap();

        let entries = coordinator.history().list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(second.message_count, 4);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }
}

mod record_naming_tests {
    use super::*;

    async fn save_with_id(coordinator: &SessionCoordinator, id: &str) {
        let mut session = coordinator
            .open_session_with_id(id, SessionConfig::single(mock_stage("echo")))
            .await
            .unwrap();
        coordinator.submit_turn(&mut session, "hello").await.unwrap();
        coordinator.close_session(&mut session).await.unwrap();
    }

    #[tokio::test]
    async fn test_id_named_index_does_not_clobber_the_index() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, CoordinatorOptions::default());
        save_with_id(&coordinator, "index").await;
        save_with_id(&coordinator, "other").await;

        assert_eq!(coordinator.history().list().await.unwrap().len(), 2);
        let record = coordinator.history().get("index").await.unwrap().unwrap();
        assert_eq!(record.messages.len(), 2);

        let resumed = coordinator
            .open_session_with_id("index", SessionConfig::single(mock_stage("echo")))
            .await
            .unwrap();
        assert_eq!(resumed.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_id_with_path_separators_stays_one_file() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, CoordinatorOptions::default());
        save_with_id(&coordinator, "team/../notes").await;

        let record = coordinator.history().get("team/../notes").await.unwrap().unwrap();
        assert_eq!(record.index.id, "team/../notes");
        assert!(!dir.path().join("notes.json").exists());

        assert!(coordinator.history().delete_conversation("team/../notes").await.unwrap());
        assert!(coordinator.history().get("team/../notes").await.unwrap().is_none());
    }
}

mod concurrency_tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_closes_keep_every_entry() {
        let dir = TempDir::new().unwrap();
        let coordinator = Arc::new(coordinator(&dir, CoordinatorOptions::default()));

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move {
                    let prompt = format!("question {i}");
                    save_chat(
                        &coordinator,
                        SessionConfig::single(mock_stage("echo")),
                        &[prompt.as_str()],
                    )
                    .await
                })
            })
            .collect();

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        coordinator.flush().await.unwrap();

        let entries = coordinator.history().list().await.unwrap();
        assert_eq!(entries.len(), 16);
        for id in &ids {
            assert!(coordinator.history().get(id).await.unwrap().is_some());
        }

        let reloaded = TelemetryStore::new(Arc::new(FileStorage::new(dir.path())));
        assert_eq!(reloaded.load_metrics().await.unwrap().len(), 16);
    }
}

mod search_tests {
    use super::*;

    #[tokio::test]
    async fn test_search_by_mode_provider_and_text() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, CoordinatorOptions::default());

        save_chat(
            &coordinator,
            SessionConfig::single(mock_stage("echo")),
            &["tokio runtime question"],
        )
        .await;
        save_chat(
            &coordinator,
            SessionConfig::two_stage(mock_stage("planner"), mock_stage("writer")),
            &["serde derive question"],
        )
        .await;

        let two_stage = coordinator
            .history()
            .search(&HistorySearch::new().with_mode(SessionMode::TwoStage))
            .await
            .unwrap();
        assert_eq!(two_stage.len(), 1);
        assert_eq!(two_stage[0].plan_model.as_deref(), Some("planner"));

        let by_model = coordinator
            .history()
            .search(&HistorySearch::new().with_model("writer"))
            .await
            .unwrap();
        assert_eq!(by_model.len(), 1);

        let by_text = coordinator
            .history()
            .search(&HistorySearch::new().with_query("TOKIO"))
            .await
            .unwrap();
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].mode, SessionMode::Single);

        let stats = coordinator.history().stats().await.unwrap();
        assert_eq!(stats.total_conversations, 2);
        assert_eq!(stats.total_messages, 4);
        assert_eq!(stats.two_stage, 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir, CoordinatorOptions::default());
        let config = SessionConfig::single(mock_stage("echo"));

        let first = save_chat(&coordinator, config.clone(), &["a"]).await;
        save_chat(&coordinator, config.clone(), &["b"]).await;
        save_chat(&coordinator, config, &["c"]).await;

        assert!(coordinator.history().delete_conversation(&first).await.unwrap());
        assert!(!coordinator.history().delete_conversation(&first).await.unwrap());
        let records = dir.path().join("history").join("conversations");
        assert!(!records.join(format!("{first}.json")).exists());

        assert_eq!(coordinator.history().clear_all().await.unwrap(), 2);
        assert!(coordinator.history().list().await.unwrap().is_empty());
    }
}
