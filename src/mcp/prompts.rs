//! MCP prompt templates
//!
//! Reusable prompts for working with memories: extracting facts from a
//! conversation, turning a question into a search query, and deciding how a
//! new fact relates to what is already stored.

use crate::error::{MemoryBankError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;

/// Argument declared by a prompt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
}

/// Prompt listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub name: String,
    pub description: String,
    pub arguments: Vec<PromptArgument>,
}

/// The available prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptName {
    MemoryExtraction,
    MemorySearch,
    MemoryConsolidation,
}

impl PromptName {
    pub const ALL: [PromptName; 3] = [
        PromptName::MemoryExtraction,
        PromptName::MemorySearch,
        PromptName::MemoryConsolidation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PromptName::MemoryExtraction => "memory_extraction_prompt",
            PromptName::MemorySearch => "memory_search_prompt",
            PromptName::MemoryConsolidation => "memory_consolidation_prompt",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            PromptName::MemoryExtraction => "Extract facts worth remembering from a conversation",
            PromptName::MemorySearch => "Turn a user question into a memory search query",
            PromptName::MemoryConsolidation => {
                "Decide whether a new fact adds to, updates, contradicts or repeats stored memories"
            }
        }
    }

    fn arguments(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            PromptName::MemoryExtraction => &[("conversation", "The conversation text to analyze")],
            PromptName::MemorySearch => &[("user_query", "The user's question")],
            PromptName::MemoryConsolidation => &[
                ("existing_memories", "Stored memories as text"),
                ("new_fact", "The fact to consider"),
            ],
        }
    }
}

impl FromStr for PromptName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        PromptName::ALL
            .into_iter()
            .find(|prompt| prompt.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Every prompt with its arguments
pub fn list_prompts() -> Vec<Prompt> {
    PromptName::ALL
        .into_iter()
        .map(|prompt| Prompt {
            name: prompt.as_str().to_string(),
            description: prompt.description().to_string(),
            arguments: prompt
                .arguments()
                .iter()
                .map(|(name, description)| PromptArgument {
                    name: name.to_string(),
                    description: description.to_string(),
                    required: true,
                })
                .collect(),
        })
        .collect()
}

fn argument<'a>(arguments: &'a Value, name: &str) -> Result<&'a str> {
    arguments
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| MemoryBankError::InvalidArgument(format!("missing prompt argument: {}", name)))
}

/// Render a prompt into the `prompts/get` result shape
pub fn get_prompt(prompt: PromptName, arguments: &Value) -> Result<Value> {
    let text = match prompt {
        PromptName::MemoryExtraction => {
            extraction_prompt(argument(arguments, "conversation")?)
        }
        PromptName::MemorySearch => search_prompt(argument(arguments, "user_query")?),
        PromptName::MemoryConsolidation => consolidation_prompt(
            argument(arguments, "existing_memories")?,
            argument(arguments, "new_fact")?,
        ),
    };

    Ok(json!({
        "description": prompt.description(),
        "messages": [{
            "role": "user",
            "content": {"type": "text", "text": text}
        }]
    }))
}

fn extraction_prompt(conversation: &str) -> String {
    format!(
        "Read the conversation below and pull out what is worth remembering:\n\n\
         {}\n\n\
         Look for:\n\
         1. Personal information such as names, relationships and preferences\n\
         2. Important facts that came up\n\
         3. Decisions or commitments\n\
         4. Anything the user explicitly asked to be remembered\n\n\
         Write each memory as one specific, standalone fact that makes sense without the conversation.",
        conversation
    )
}

fn search_prompt(user_query: &str) -> String {
    format!(
        "Rewrite this question as a search query over stored memories:\n\n\
         Question: {}\n\n\
         Keep the concepts, entities and topics a matching memory would mention:\n\
         - nouns and proper names\n\
         - specific terms\n\
         - important descriptors\n\
         - verbs, when the action matters\n\n\
         Reply with a short query suited to similarity search.",
        user_query
    )
}

fn consolidation_prompt(existing_memories: &str, new_fact: &str) -> String {
    format!(
        "Compare a new fact with the memories already stored.\n\n\
         Stored memories:\n{}\n\n\
         New fact:\n{}\n\n\
         Decide whether the new fact:\n\
         1. Is new and belongs in its own memory\n\
         2. Refines an existing memory (say which one and how to merge them)\n\
         3. Contradicts an existing memory (say which one to keep)\n\
         4. Repeats what is already stored and should be dropped\n\n\
         Give your recommendation and the reasoning behind it.",
        existing_memories, new_fact
    )
}
