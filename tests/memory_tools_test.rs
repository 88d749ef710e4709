//! Create, list, retrieve and delete through the tool layer

mod common;

use common::{facts, handler_with, initialized_handler, scope, FakeBackend};
use memory_bank::{MemoryBankError, MemoryScope, MemoryTopic, ServerSettings, ToolName};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_create_then_list_in_scope() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;

    let created = handler
        .execute(
            ToolName::CreateMemory,
            json!({
                "fact": "  User prefers dark mode  ",
                "scope": scope("alice123"),
                "topics": ["USER_PREFERENCES"]
            }),
        )
        .await
        .unwrap();
    assert_eq!(created["status"], "success");
    assert_eq!(created["memory"]["fact"], "User prefers dark mode");
    assert_eq!(created["memory"]["topics"], json!(["USER_PREFERENCES"]));
    assert!(created["memory"]["expire_time"].is_null());

    handler
        .execute(
            ToolName::CreateMemory,
            json!({"fact": "Bob lives in Oslo", "scope": scope("bob")}),
        )
        .await
        .unwrap();

    let listed = handler
        .execute(ToolName::ListMemories, json!({"scope": scope("alice123")}))
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);
    assert_eq!(facts(&listed), vec!["User prefers dark mode"]);
    assert_eq!(listed["memories"][0]["id"], created["memory"]["id"]);
}

#[tokio::test]
async fn test_context_scope_is_distinct() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;

    backend.seed("Work laptop is a ThinkPad", MemoryScope::user("alice").with_context("work"), &[]);
    backend.seed("Has a cat named Miso", MemoryScope::user("alice"), &[]);

    let work = handler
        .execute(
            ToolName::ListMemories,
            json!({"scope": {"user_id": "alice", "context_id": "work"}}),
        )
        .await
        .unwrap();
    assert_eq!(facts(&work), vec!["Work laptop is a ThinkPad"]);
    assert_eq!(work["scope"], json!({"user_id": "alice", "context_id": "work"}));

    let plain = handler
        .execute(ToolName::ListMemories, json!({"scope": scope("alice")}))
        .await
        .unwrap();
    assert_eq!(facts(&plain), vec!["Has a cat named Miso"]);
}

#[tokio::test]
async fn test_list_newest_first_with_topic_filter() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;
    let alice = MemoryScope::user("alice");

    backend.seed("Prefers tea", alice.clone(), &[MemoryTopic::UserPreferences]);
    backend.seed("Born in Lisbon", alice.clone(), &[MemoryTopic::UserPersonalInfo]);
    backend.seed("Prefers aisle seats", alice.clone(), &[MemoryTopic::UserPreferences]);

    let all = handler
        .execute(ToolName::ListMemories, json!({"scope": scope("alice")}))
        .await
        .unwrap();
    assert_eq!(
        facts(&all),
        vec!["Prefers aisle seats", "Born in Lisbon", "Prefers tea"]
    );

    let preferences = handler
        .execute(
            ToolName::ListMemories,
            json!({"scope": scope("alice"), "topics": ["USER_PREFERENCES"]}),
        )
        .await
        .unwrap();
    assert_eq!(facts(&preferences), vec!["Prefers aisle seats", "Prefers tea"]);
    assert_eq!(preferences["topics"], json!(["USER_PREFERENCES"]));
}

#[tokio::test]
async fn test_create_rejects_bad_arguments() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;

    let cases = [
        (json!({"fact": "x", "scope": {}}), "invalid_scope"),
        (json!({"fact": "x", "scope": {"user_id": "   "}}), "invalid_scope"),
        (json!({"fact": "x", "scope": {"user_id": "a", "team": "t"}}), "invalid_scope"),
        (json!({"fact": "   ", "scope": scope("a")}), "invalid_argument"),
        (json!({"fact": "x", "scope": scope("a"), "topics": ["HOBBIES"]}), "invalid_topic"),
        (json!({"fact": "x", "scope": scope("a"), "ttl_seconds": 0}), "invalid_argument"),
        (json!({"fact": 7, "scope": scope("a")}), "invalid_argument"),
    ];

    for (args, kind) in cases {
        let err = handler
            .execute(ToolName::CreateMemory, args.clone())
            .await
            .expect_err("arguments should be rejected");
        assert_eq!(err.kind(), kind, "args: {}", args);
    }

    assert!(backend.stored().is_empty());
}

#[tokio::test]
async fn test_create_with_ttl_sets_expiry() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;

    let created = handler
        .execute(
            ToolName::CreateMemory,
            json!({"fact": "Is travelling this week", "scope": scope("a"), "ttl_seconds": 604800}),
        )
        .await
        .unwrap();

    assert!(created["memory"]["expire_time"].is_string());
    assert!(backend.stored()[0].expire_time.is_some());
}

#[tokio::test]
async fn test_create_rejects_oversized_fact() {
    let settings = ServerSettings {
        max_fact_len: 16,
        ..ServerSettings::default()
    };
    let backend = FakeBackend::new();
    let handler = handler_with(Arc::clone(&backend), settings);
    handler
        .execute(ToolName::InitializeMemoryBank, json!({}))
        .await
        .unwrap();

    match handler
        .execute(
            ToolName::CreateMemory,
            json!({"fact": "This fact is far too long", "scope": scope("a")}),
        )
        .await
    {
        Err(MemoryBankError::InvalidArgument(msg)) => assert!(msg.contains("too long")),
        other => panic!("Expected InvalidArgument, got {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_then_not_found() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;
    let id = backend.seed("Allergic to peanuts", MemoryScope::user("alice"), &[]);

    let deleted = handler
        .execute(
            ToolName::DeleteMemory,
            json!({"scope": scope("alice"), "memory_id": id}),
        )
        .await
        .unwrap();
    assert_eq!(deleted["status"], "success");
    assert_eq!(deleted["deleted"], true);
    assert!(backend.stored().is_empty());

    let again = handler
        .execute(
            ToolName::DeleteMemory,
            json!({"scope": scope("alice"), "memory_id": id}),
        )
        .await
        .unwrap();
    assert_eq!(again["status"], "not_found");
    assert_eq!(again["deleted"], false);
}

#[tokio::test]
async fn test_delete_from_other_scope_is_not_found() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;
    let id = backend.seed("Allergic to peanuts", MemoryScope::user("alice"), &[]);

    let result = handler
        .execute(
            ToolName::DeleteMemory,
            json!({"scope": scope("mallory"), "memory_id": id}),
        )
        .await
        .unwrap();

    assert_eq!(result["status"], "not_found");
    assert_eq!(backend.stored().len(), 1);
}

#[tokio::test]
async fn test_retrieve_ranks_and_clamps() {
    let settings = ServerSettings {
        max_top_k: 2,
        default_top_k: 1,
        ..ServerSettings::default()
    };
    let backend = FakeBackend::new();
    let handler = handler_with(Arc::clone(&backend), settings);
    handler
        .execute(ToolName::InitializeMemoryBank, json!({}))
        .await
        .unwrap();

    let alice = MemoryScope::user("alice");
    backend.seed("Enjoys hiking in the mountains", alice.clone(), &[]);
    backend.seed("Prefers dark mode in the editor", alice.clone(), &[]);
    backend.seed("Uses a dark mode theme in every editor", alice.clone(), &[]);
    backend.seed("Prefers dark mode editor", MemoryScope::user("bob"), &[]);

    let result = handler
        .execute(
            ToolName::RetrieveMemories,
            json!({"scope": scope("alice"), "search_query": "dark mode editor", "top_k": 10}),
        )
        .await
        .unwrap();

    assert_eq!(result["count"], 2);
    let scores: Vec<f64> = result["memories"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["score"].as_f64().unwrap())
        .collect();
    assert!(scores[0] >= scores[1]);
    for memory in result["memories"].as_array().unwrap() {
        assert_eq!(memory["scope"], json!({"user_id": "alice"}));
    }

    let default_k = handler
        .execute(
            ToolName::RetrieveMemories,
            json!({"scope": scope("alice"), "search_query": "hiking"}),
        )
        .await
        .unwrap();
    assert_eq!(facts(&default_k), vec!["Enjoys hiking in the mountains"]);
}

#[tokio::test]
async fn test_retrieve_rejects_bad_top_k_and_blank_query() {
    let handler = initialized_handler(FakeBackend::new()).await;

    let err = handler
        .execute(
            ToolName::RetrieveMemories,
            json!({"scope": scope("a"), "search_query": "x", "top_k": 0}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");

    let err = handler
        .execute(
            ToolName::RetrieveMemories,
            json!({"scope": scope("a"), "search_query": "  "}),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_argument");
}

#[tokio::test]
async fn test_retrieve_without_query_lists_scope() {
    let backend = FakeBackend::new();
    let handler = initialized_handler(Arc::clone(&backend)).await;
    backend.seed("First", MemoryScope::user("alice"), &[]);
    backend.seed("Second", MemoryScope::user("alice"), &[]);

    let result = handler
        .execute(ToolName::RetrieveMemories, json!({"scope": scope("alice")}))
        .await
        .unwrap();

    assert_eq!(facts(&result), vec!["Second", "First"]);
    assert!(result["memories"][0].get("score").is_none());
}

#[tokio::test]
async fn test_foreign_scope_results_are_discarded() {
    let backend = FakeBackend::leaky();
    let handler = initialized_handler(Arc::clone(&backend)).await;
    backend.seed("Alice likes jazz", MemoryScope::user("alice"), &[]);
    backend.seed("Bob likes jazz", MemoryScope::user("bob"), &[]);

    let listed = handler
        .execute(ToolName::ListMemories, json!({"scope": scope("alice")}))
        .await
        .unwrap();
    assert_eq!(facts(&listed), vec!["Alice likes jazz"]);

    let searched = handler
        .execute(
            ToolName::RetrieveMemories,
            json!({"scope": scope("alice"), "search_query": "jazz"}),
        )
        .await
        .unwrap();
    assert_eq!(facts(&searched), vec!["Alice likes jazz"]);
}
