//! Common types for chat-completion interactions

use serde::{Deserialize, Serialize};

/// Chat-completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub temperature: f64,
    pub messages: Vec<Message>,
    pub functions: Vec<FunctionSpec>,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Message in a conversation.
///
/// This is also the unit stored in a history list, so its JSON form is a
/// contract: `content` is always written (as `null` when the model answered
/// with a function call only) and `role` must be one of the known roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: Some(text.into()),
            function_call: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: Some(text.into()),
            function_call: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: Some(text.into()),
            function_call: None,
        }
    }
}

/// Function call the model chose to make
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Function offered to the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionSpec {
    pub name: String,
    pub parameters: serde_json::Value,
}

/// Chat-completion response
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletion {
    /// The top choice's message, if the provider returned any choice
    #[allow(dead_code)] // Used in tests
    pub fn first_message(&self) -> Option<&Message> {
        self.choices.first().map(|c| &c.message)
    }
}

/// One completion alternative
#[derive(Debug, Clone)]
pub struct Choice {
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// Usage statistics
#[derive(Debug, Clone, Default)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}
