//! History Store Integration Tests
//!
//! The same contract exercised against both backends: append order, windows,
//! monotonic timestamps, concurrent writers, and reopening.

use std::sync::Arc;

use chrono::Duration;
use foreman::core::{HistoryStore, JsonlHistoryStore, SqliteHistoryStore};
use foreman::domain::{ActionRequest, ActionResult, Role, Transcript, Turn};
use serde_json::json;
use tempfile::TempDir;

async fn backends(temp: &TempDir) -> Vec<Arc<dyn HistoryStore>> {
    let jsonl = JsonlHistoryStore::open(temp.path().join("sessions"))
        .await
        .unwrap();
    let sqlite = SqliteHistoryStore::open(&temp.path().join("history.db")).unwrap();
    vec![Arc::new(jsonl), Arc::new(sqlite)]
}

#[tokio::test]
async fn test_round_trip_preserves_fields() {
    let temp = TempDir::new().unwrap();

    for store in backends(&temp).await {
        let request = ActionRequest::with_id("c1", "docker", json!({"task_description": "build"}));
        store.append(Turn::user("s1", "deploy")).await.unwrap();
        let record = store
            .append(Turn::actor_requests("s1", &[request.clone()]))
            .await
            .unwrap();
        let result = store
            .append(Turn::action_result(
                "s1",
                &ActionResult::error("c1", "docker", "timeout"),
            ))
            .await
            .unwrap();

        let turns = store.replay("s1").await.unwrap();
        assert_eq!(turns.len(), 3, "backend {}", store.name());
        assert_eq!(turns[1], record, "backend {}", store.name());
        assert_eq!(turns[2], result, "backend {}", store.name());
        assert_eq!(turns[1].recorded_requests(), Some(vec![request]));
    }
}

#[tokio::test]
async fn test_recent_returns_latest_in_chronological_order() {
    let temp = TempDir::new().unwrap();

    for store in backends(&temp).await {
        for i in 0..6 {
            store.append(Turn::user("s1", format!("m{}", i))).await.unwrap();
        }

        let recent = store.recent("s1", 3).await.unwrap();
        let contents: Vec<&str> = recent.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m3", "m4", "m5"], "backend {}", store.name());

        assert_eq!(store.recent("s1", 100).await.unwrap().len(), 6);
        assert!(store.recent("other", 3).await.unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_timestamps_are_monotonic() {
    let temp = TempDir::new().unwrap();

    for store in backends(&temp).await {
        let first = store.append(Turn::user("s1", "first")).await.unwrap();

        let mut stale = Turn::actor("s1", "second");
        stale.timestamp = first.timestamp - Duration::minutes(5);
        let written = store.append(stale).await.unwrap();

        assert!(written.timestamp >= first.timestamp, "backend {}", store.name());
        let replayed = store.replay("s1").await.unwrap();
        assert_eq!(replayed[1].timestamp, written.timestamp);
    }
}

#[tokio::test]
async fn test_concurrent_appends_are_all_kept() {
    let temp = TempDir::new().unwrap();

    for store in backends(&temp).await {
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append(Turn::user("shared", format!("m{}", i))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let turns = store.replay("shared").await.unwrap();
        assert_eq!(turns.len(), 16, "backend {}", store.name());
        assert!(turns.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}

#[tokio::test]
async fn test_sessions_listing_uses_original_ids() {
    let temp = TempDir::new().unwrap();

    for store in backends(&temp).await {
        store.append(Turn::user("plain", "a")).await.unwrap();
        store.append(Turn::user("user@example.com/chat 1", "b")).await.unwrap();

        let sessions = store.sessions().await.unwrap();
        assert_eq!(
            sessions,
            vec!["plain".to_string(), "user@example.com/chat 1".to_string()],
            "backend {}",
            store.name()
        );
    }
}

#[tokio::test]
async fn test_reopened_store_replays_same_transcript() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("reopen.db");
    let dir = temp.path().join("reopen");

    let before = {
        let sqlite = SqliteHistoryStore::open(&db).unwrap();
        let jsonl = JsonlHistoryStore::open(dir.clone()).await.unwrap();
        for store in [&sqlite as &dyn HistoryStore, &jsonl] {
            store.append(Turn::user("s1", "hello")).await.unwrap();
            store.append(Turn::actor("s1", "hi there")).await.unwrap();
        }
        Transcript::from_history(sqlite.replay("s1").await.unwrap()).fingerprint()
    };

    let sqlite = SqliteHistoryStore::open(&db).unwrap();
    let jsonl = JsonlHistoryStore::open(dir.clone()).await.unwrap();

    let from_sqlite = Transcript::from_history(sqlite.replay("s1").await.unwrap());
    let from_jsonl = Transcript::from_history(jsonl.replay("s1").await.unwrap());
    assert_eq!(from_sqlite.fingerprint(), before);
    assert_eq!(from_jsonl.fingerprint(), before);
    assert_eq!(from_jsonl.turns()[0].role, Role::User);
}
