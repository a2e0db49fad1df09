//! Mock completion client for turn tests

use crate::llm::{
    ChatCompletion, ChatRequest, Choice, FunctionCall, LlmError, LlmService, Message, MessageRole,
    Usage,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Mock LLM client that returns queued responses
pub struct MockLlmClient {
    responses: Mutex<VecDeque<Result<ChatCompletion, LlmError>>>,
    /// Record of all requests made
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response
    pub fn queue_response(&self, response: ChatCompletion) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    /// Queue an error response
    pub fn queue_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    /// Get recorded requests
    pub fn recorded_requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmService for MockLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::network("No mock response queued")))
    }

    fn model_id(&self) -> &str {
        "mock-model"
    }
}

pub fn completion(message: Message) -> ChatCompletion {
    ChatCompletion {
        choices: vec![Choice {
            message,
            finish_reason: Some("stop".to_string()),
        }],
        usage: Usage::default(),
    }
}

pub fn text_reply(text: &str) -> ChatCompletion {
    completion(Message::assistant(text))
}

pub fn function_call_reply(arguments: &str) -> ChatCompletion {
    completion(Message {
        role: MessageRole::Assistant,
        content: None,
        function_call: Some(FunctionCall {
            name: super::SCHEMA_FUNCTION_NAME.to_string(),
            arguments: arguments.to_string(),
        }),
    })
}
