//! Argument validation for tool calls
//!
//! Pure functions that reject malformed tool arguments and normalize the rest.
//! Nothing here touches the network or process state.

use crate::error::{MemoryBankError, Result};
use crate::types::{ConversationTurn, MemoryScope, MemoryTopic, Role};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

/// Conversation turn as received from the caller, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTurn {
    pub role: Option<String>,
    pub content: Option<String>,
}

impl RawTurn {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: Some(role.to_string()),
            content: Some(content.to_string()),
        }
    }
}

/// Validate a scope object: `{"user_id": "...", "context_id": "..."?}`
///
/// Ids are trimmed. Keys other than `user_id` and `context_id` are rejected
/// because each distinct key set is a distinct scope on the backend.
pub fn validate_scope(scope: &Value) -> Result<MemoryScope> {
    let map = match scope {
        Value::Object(map) => map,
        Value::Null => return Err(MemoryBankError::InvalidScope("scope is required".to_string())),
        _ => {
            return Err(MemoryBankError::InvalidScope(
                "scope must be an object".to_string(),
            ))
        }
    };

    if let Some(key) = map
        .keys()
        .find(|k| k.as_str() != "user_id" && k.as_str() != "context_id")
    {
        return Err(MemoryBankError::InvalidScope(format!(
            "unsupported scope key: {}",
            key
        )));
    }

    let user_id = match map.get("user_id") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return Err(MemoryBankError::InvalidScope(
                "user_id must be a non-empty string".to_string(),
            ))
        }
        Some(_) => {
            return Err(MemoryBankError::InvalidScope(
                "user_id must be a string".to_string(),
            ))
        }
    };

    let context_id = match map.get("context_id") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(_) => {
            return Err(MemoryBankError::InvalidScope(
                "context_id must be a non-empty string when present".to_string(),
            ))
        }
    };

    Ok(MemoryScope {
        user_id,
        context_id,
    })
}

/// Parse topic names. Unknown names are rejected, never dropped.
pub fn validate_topics<S: AsRef<str>>(topics: &[S]) -> Result<BTreeSet<MemoryTopic>> {
    topics
        .iter()
        .map(|raw| {
            raw.as_ref().trim().parse::<MemoryTopic>().map_err(|unknown| {
                let known: Vec<&str> = MemoryTopic::ALL.iter().map(|t| t.as_str()).collect();
                MemoryBankError::InvalidTopic(format!(
                    "{:?} (expected one of {})",
                    unknown,
                    known.join(", ")
                ))
            })
        })
        .collect()
}

/// Resolve `top_k`: absent means `default`, above `max` is clamped,
/// zero or negative is rejected
pub fn validate_top_k(top_k: Option<i64>, default: usize, max: usize) -> Result<usize> {
    match top_k {
        None => Ok(default.min(max)),
        Some(k) if k <= 0 => Err(MemoryBankError::InvalidArgument(format!(
            "top_k must be at least 1, got {}",
            k
        ))),
        Some(k) => {
            let k = usize::try_from(k).unwrap_or(usize::MAX);
            if k > max {
                tracing::debug!("Clamping top_k {} to {}", k, max);
            }
            Ok(k.min(max))
        }
    }
}

/// Require non-blank text and return it trimmed
pub fn validate_text(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(MemoryBankError::InvalidArgument(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(trimmed.to_string())
}

/// Validate a memory fact, bounded to `max_len` characters
pub fn validate_fact(fact: &str, max_len: usize) -> Result<String> {
    let fact = validate_text("fact", fact)?;
    let len = fact.chars().count();
    if len > max_len {
        return Err(MemoryBankError::InvalidArgument(format!(
            "fact too long: {} characters (max {})",
            len, max_len
        )));
    }
    Ok(fact)
}

/// Validate an ordered conversation
pub fn validate_conversation(turns: &[RawTurn]) -> Result<Vec<ConversationTurn>> {
    if turns.is_empty() {
        return Err(MemoryBankError::InvalidArgument(
            "conversation cannot be empty".to_string(),
        ));
    }

    turns
        .iter()
        .enumerate()
        .map(|(i, turn)| {
            let role = turn.role.as_deref().ok_or_else(|| {
                MemoryBankError::InvalidArgument(format!("turn {} missing 'role' field", i))
            })?;
            let role = role.trim().parse::<Role>().map_err(|role| {
                MemoryBankError::InvalidArgument(format!("turn {} has invalid role: {}", i, role))
            })?;

            let content = turn.content.as_deref().ok_or_else(|| {
                MemoryBankError::InvalidArgument(format!("turn {} missing 'content' field", i))
            })?;
            let content = validate_text(&format!("turn {} content", i), content)?;

            Ok(ConversationTurn { role, content })
        })
        .collect()
}

/// `wait_for_completion` defaults to false
pub fn wait_for_completion(flag: Option<bool>) -> bool {
    flag.unwrap_or(false)
}

/// Turn an optional TTL into an absolute expiry measured from `now`
pub fn validate_ttl(ttl_seconds: Option<i64>, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
    match ttl_seconds {
        None => Ok(None),
        Some(secs) if secs <= 0 => Err(MemoryBankError::InvalidArgument(format!(
            "ttl_seconds must be positive, got {}",
            secs
        ))),
        Some(secs) => Duration::try_seconds(secs)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .map(Some)
            .ok_or_else(|| {
                MemoryBankError::InvalidArgument(format!("ttl_seconds out of range: {}", secs))
            }),
    }
}

/// Validate a memory id supplied by the caller
pub fn validate_memory_id(memory_id: &str) -> Result<String> {
    let id = validate_text("memory_id", memory_id)?;
    if id.chars().any(|c| c.is_whitespace() || c == '?' || c == '#') {
        return Err(MemoryBankError::InvalidArgument(format!(
            "memory_id contains invalid characters: {:?}",
            id
        )));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scope_requires_user_id() {
        assert!(matches!(
            validate_scope(&json!({})),
            Err(MemoryBankError::InvalidScope(_))
        ));
        assert!(matches!(
            validate_scope(&json!({"user_id": "   "})),
            Err(MemoryBankError::InvalidScope(_))
        ));
        assert!(matches!(
            validate_scope(&json!("alice123")),
            Err(MemoryBankError::InvalidScope(_))
        ));
        assert!(matches!(
            validate_scope(&json!({"user_id": 42})),
            Err(MemoryBankError::InvalidScope(_))
        ));
    }

    #[test]
    fn test_scope_normalization() {
        let scope = validate_scope(&json!({"user_id": " alice123 "})).unwrap();
        assert_eq!(scope, MemoryScope::user("alice123"));

        let scope = validate_scope(&json!({"user_id": "alice123", "context_id": "chat-7"})).unwrap();
        assert_eq!(scope.context_id.as_deref(), Some("chat-7"));

        let scope = validate_scope(&json!({"user_id": "alice123", "context_id": null})).unwrap();
        assert_eq!(scope.context_id, None);
    }

    #[test]
    fn test_scope_rejects_unknown_keys() {
        let err = validate_scope(&json!({"user_id": "alice123", "tenant": "x"})).unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn test_topics_reject_unknown() {
        let topics = validate_topics(&["USER_PREFERENCES", "USER_PERSONAL_INFO"]).unwrap();
        assert_eq!(topics.len(), 2);

        let err = validate_topics(&["USER_PREFERENCES", "FAVORITE_FOODS"]).unwrap_err();
        assert!(matches!(err, MemoryBankError::InvalidTopic(_)));
        assert!(err.to_string().contains("FAVORITE_FOODS"));

        assert!(validate_topics::<&str>(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_top_k_clamps_and_rejects() {
        assert_eq!(validate_top_k(None, 5, 50).unwrap(), 5);
        assert_eq!(validate_top_k(Some(3), 5, 50).unwrap(), 3);
        assert_eq!(validate_top_k(Some(5000), 5, 50).unwrap(), 50);
        assert!(matches!(
            validate_top_k(Some(0), 5, 50),
            Err(MemoryBankError::InvalidArgument(_))
        ));
        assert!(matches!(
            validate_top_k(Some(-3), 5, 50),
            Err(MemoryBankError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fact_validation() {
        assert_eq!(validate_fact("  likes tea \n", 100).unwrap(), "likes tea");
        assert!(validate_fact(" \t ", 100).is_err());

        let err = validate_fact(&"x".repeat(101), 100).unwrap_err();
        assert!(err.to_string().contains("max 100"));
    }

    #[test]
    fn test_conversation_validation() {
        let turns = vec![
            RawTurn::new("user", "I'm Alice and I love Python"),
            RawTurn::new("assistant", "Nice to meet you, Alice!"),
        ];
        let validated = validate_conversation(&turns).unwrap();
        assert_eq!(validated[0].role, Role::User);
        assert_eq!(validated[1].content, "Nice to meet you, Alice!");

        assert!(validate_conversation(&[]).is_err());

        let err = validate_conversation(&[RawTurn::new("user", "hi"), RawTurn::new("bot", "hey")])
            .unwrap_err();
        assert!(err.to_string().contains("turn 1 has invalid role"));

        let missing = RawTurn {
            role: Some("user".to_string()),
            content: None,
        };
        let err = validate_conversation(&[missing]).unwrap_err();
        assert!(err.to_string().contains("missing 'content'"));

        assert!(validate_conversation(&[RawTurn::new("user", "  ")]).is_err());
    }

    #[test]
    fn test_wait_for_completion_default() {
        assert!(!wait_for_completion(None));
        assert!(wait_for_completion(Some(true)));
    }

    #[test]
    fn test_ttl() {
        let now = Utc::now();
        assert_eq!(validate_ttl(None, now).unwrap(), None);
        assert_eq!(
            validate_ttl(Some(86400), now).unwrap(),
            Some(now + Duration::days(1))
        );
        assert!(validate_ttl(Some(0), now).is_err());
        assert!(validate_ttl(Some(i64::MAX), now).is_err());
    }

    #[test]
    fn test_memory_id() {
        assert_eq!(validate_memory_id(" mem-1 ").unwrap(), "mem-1");
        assert!(validate_memory_id("").is_err());
        assert!(validate_memory_id("mem 1").is_err());
        assert!(validate_memory_id("mem?x=1").is_err());
    }
}
