//! Conversation turn processing
//!
//! One turn runs three stages in a straight line:
//! 1. load cached history for the conversation key
//! 2. dispatch the completion request (and remember the exchange)
//! 3. shape the reply into the requested output format
//!
//! Any stage failure aborts the turn. Nothing is retried here; callers own
//! backoff for [`TurnError::RateLimitExceeded`].

mod dispatch;
mod format;
mod history;
#[cfg(test)]
pub(crate) mod testing;

pub use format::OutputFormat;

use crate::cache::{CacheError, ListCache};
use crate::llm::{LlmError, LlmService};
use serde::{Deserialize, Deserializer, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::Instrument;

pub const DEFAULT_MODEL: &str = "gpt-4-0613";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_NAMESPACE: &str = "chatgpt";

/// Name of the single function offered in schema mode
pub const SCHEMA_FUNCTION_NAME: &str = "user-schema";

/// Input to one turn
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_key: Option<String>,
    #[serde(default)]
    pub system_context: Option<String>,
    #[serde(default)]
    pub schema: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub remember_response: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub trim: bool,
    #[serde(default, deserialize_with = "null_as_false")]
    pub trim_front: bool,
    #[serde(default)]
    pub output_format: Option<String>,
}

/// Flags accept `null` as well as a missing field
fn null_as_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

impl TurnRequest {
    #[allow(dead_code)] // Used in tests
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Conversation key, treating an empty key as absent
    pub fn conversation_key(&self) -> Option<&str> {
        self.conversation_key.as_deref().filter(|k| !k.is_empty())
    }

    /// System context, treating empty text as absent
    pub fn system_context(&self) -> Option<&str> {
        self.system_context.as_deref().filter(|s| !s.is_empty())
    }

    pub fn schema(&self) -> Option<&serde_json::Value> {
        self.schema.as_ref()
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat::parse(self.output_format.as_deref())
    }

    /// Whether the exchange is appended to history after the completion
    pub fn should_remember(&self) -> bool {
        self.remember_response && self.conversation_key().is_some()
    }
}

/// Shaped reply
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseValue {
    Json(serde_json::Value),
    /// May be NaN when the text was not numeric; serializes as `null` then
    Number(f64),
    Text(String),
}

/// Output of one turn
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnResponse {
    pub response: ResponseValue,
}

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("{message}")]
    RateLimitExceeded { message: String },
    #[error("{0}")]
    Upstream(LlmError),
    #[error("History entry {index} for '{key}' is not a valid message: {source}")]
    CacheDeserialization {
        key: String,
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Extraction(String),
    #[error("Response is not valid JSON: {0}")]
    Format(#[source] serde_json::Error),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl TurnError {
    pub fn kind(&self) -> TurnErrorKind {
        match self {
            TurnError::RateLimitExceeded { .. } => TurnErrorKind::RateLimitExceeded,
            TurnError::Upstream(_) => TurnErrorKind::UpstreamError,
            TurnError::CacheDeserialization { .. } => TurnErrorKind::CacheDeserializationError,
            TurnError::Extraction(_) => TurnErrorKind::ExtractionError,
            TurnError::Format(_) => TurnErrorKind::FormatError,
            TurnError::Cache(_) => TurnErrorKind::CacheError,
        }
    }
}

/// Discriminator callers match on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnErrorKind {
    RateLimitExceeded,
    UpstreamError,
    CacheDeserializationError,
    ExtractionError,
    FormatError,
    CacheError,
}

impl TurnErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnErrorKind::RateLimitExceeded => "RateLimitExceeded",
            TurnErrorKind::UpstreamError => "UpstreamError",
            TurnErrorKind::CacheDeserializationError => "CacheDeserializationError",
            TurnErrorKind::ExtractionError => "ExtractionError",
            TurnErrorKind::FormatError => "FormatError",
            TurnErrorKind::CacheError => "CacheError",
        }
    }
}

/// Fixed per-process completion settings
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    pub model: String,
    pub temperature: f64,
    pub namespace: String,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

/// Runs turns against already-constructed clients
#[derive(Clone)]
pub struct TurnProcessor {
    llm: Arc<dyn LlmService>,
    cache: Arc<dyn ListCache>,
    settings: TurnSettings,
}

impl TurnProcessor {
    pub fn new(llm: Arc<dyn LlmService>, cache: Arc<dyn ListCache>, settings: TurnSettings) -> Self {
        Self {
            llm,
            cache,
            settings,
        }
    }

    pub async fn process(&self, request: &TurnRequest) -> Result<TurnResponse, TurnError> {
        let span = tracing::info_span!(
            "turn",
            turn_id = %uuid::Uuid::new_v4(),
            conversation_key = request.conversation_key().unwrap_or(""),
        );

        async {
            let history = history::load_history(
                self.cache.as_ref(),
                &self.settings.namespace,
                request.conversation_key(),
            )
            .await?;

            let reply = dispatch::dispatch(
                self.llm.as_ref(),
                self.cache.as_ref(),
                &self.settings,
                request,
                history,
            )
            .await?;

            let response = format::format_reply(&reply, request)?;
            tracing::info!(schema_mode = request.schema().is_some(), "Turn completed");
            Ok::<_, TurnError>(TurnResponse { response })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{function_call_reply, text_reply, MockLlmClient};
    use super::*;
    use crate::cache::InMemoryListCache;
    use crate::llm::{Message, MessageRole};
    use serde_json::json;

    fn processor(llm: &Arc<MockLlmClient>, cache: &Arc<InMemoryListCache>) -> TurnProcessor {
        TurnProcessor::new(llm.clone(), cache.clone(), TurnSettings::default())
    }

    fn stored(msg: &Message) -> String {
        serde_json::to_string(msg).unwrap()
    }

    #[test]
    fn test_request_deserializes_camel_case() {
        let req: TurnRequest = serde_json::from_value(json!({
            "query": "hi",
            "conversationKey": "c1",
            "systemContext": "be terse",
            "rememberResponse": true,
            "trimFront": true,
            "outputFormat": "JSON"
        }))
        .unwrap();
        assert_eq!(req.conversation_key(), Some("c1"));
        assert_eq!(req.system_context(), Some("be terse"));
        assert!(req.should_remember());
        assert!(req.trim_front && !req.trim);
        assert_eq!(req.output_format(), OutputFormat::Json);
    }

    #[test]
    fn test_null_flags_read_as_false() {
        let req: TurnRequest = serde_json::from_value(json!({
            "query": "hi",
            "conversationKey": "c1",
            "rememberResponse": null,
            "trim": null,
            "trimFront": null,
            "outputFormat": null
        }))
        .unwrap();
        assert!(!req.remember_response && !req.trim && !req.trim_front);
        assert!(!req.should_remember());
        assert_eq!(req.output_format(), OutputFormat::Text);
    }

    #[test]
    fn test_non_boolean_flag_is_rejected() {
        let result = serde_json::from_value::<TurnRequest>(json!({"query": "hi", "trim": "yes"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_key_counts_as_absent() {
        let req = TurnRequest {
            conversation_key: Some(String::new()),
            remember_response: true,
            ..TurnRequest::new("hi")
        };
        assert_eq!(req.conversation_key(), None);
        assert!(!req.should_remember());
    }

    #[tokio::test]
    async fn test_without_key_no_cache_read_and_prompt_is_system_then_user() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_response(text_reply("Hello"));
        let cache = Arc::new(InMemoryListCache::new());

        let req = TurnRequest {
            system_context: Some("be terse".to_string()),
            ..TurnRequest::new("hi")
        };
        let out = processor(&llm, &cache).process(&req).await.unwrap();

        assert_eq!(out.response, ResponseValue::Text("Hello".to_string()));
        assert!(cache.recorded_fetches().is_empty());
        assert!(cache.recorded_appends().is_empty());
        let sent = &llm.recorded_requests()[0];
        assert_eq!(sent.messages, vec![Message::system("be terse"), Message::user("hi")]);
    }

    #[tokio::test]
    async fn test_history_then_system_then_user_and_exchange_remembered() {
        let history = vec![Message::user("first"), Message::assistant("reply one")];
        let cache = Arc::new(InMemoryListCache::new().with_list(
            "chatgpt",
            "c1",
            history.iter().map(stored).collect(),
        ));
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_response(text_reply("reply two"));

        let req = TurnRequest {
            conversation_key: Some("c1".to_string()),
            system_context: Some("ctx".to_string()),
            remember_response: true,
            ..TurnRequest::new("second")
        };
        processor(&llm, &cache).process(&req).await.unwrap();

        let sent = &llm.recorded_requests()[0];
        assert_eq!(
            sent.messages,
            vec![
                Message::user("first"),
                Message::assistant("reply one"),
                Message::system("ctx"),
                Message::user("second"),
            ]
        );

        let appends = cache.recorded_appends();
        assert_eq!(appends.len(), 1);
        let (ns, key, values) = &appends[0];
        assert_eq!((ns.as_str(), key.as_str()), ("chatgpt", "c1"));
        assert_eq!(
            values,
            &vec![stored(&Message::user("second")), stored(&Message::assistant("reply two"))]
        );
    }

    #[tokio::test]
    async fn test_nothing_appended_unless_remembering() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_response(text_reply("a"));
        llm.queue_response(text_reply("b"));
        let cache = Arc::new(InMemoryListCache::new());
        let turns = processor(&llm, &cache);

        let keyed_only = TurnRequest {
            conversation_key: Some("c1".to_string()),
            ..TurnRequest::new("q")
        };
        turns.process(&keyed_only).await.unwrap();

        let remember_only = TurnRequest {
            remember_response: true,
            ..TurnRequest::new("q")
        };
        turns.process(&remember_only).await.unwrap();

        assert!(cache.recorded_appends().is_empty());
    }

    #[tokio::test]
    async fn test_schema_mode_ignores_trim_and_format() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_response(function_call_reply("{\"answer\": 42}"));
        let cache = Arc::new(InMemoryListCache::new());

        let req = TurnRequest {
            schema: Some(json!({"type": "object", "properties": {"answer": {"type": "number"}}})),
            trim: true,
            output_format: Some("number".to_string()),
            ..TurnRequest::new("q")
        };
        let out = processor(&llm, &cache).process(&req).await.unwrap();

        assert_eq!(out.response, ResponseValue::Json(json!({"answer": 42})));
        let sent = &llm.recorded_requests()[0];
        assert_eq!(sent.functions.len(), 1);
        assert_eq!(sent.functions[0].name, SCHEMA_FUNCTION_NAME);
    }

    #[tokio::test]
    async fn test_remembered_function_call_reply_replays_from_history() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_response(function_call_reply("{}"));
        llm.queue_response(text_reply("ok"));
        let cache = Arc::new(InMemoryListCache::new());
        let turns = processor(&llm, &cache);

        let first = TurnRequest {
            conversation_key: Some("c1".to_string()),
            remember_response: true,
            schema: Some(json!({"type": "object"})),
            ..TurnRequest::new("extract")
        };
        turns.process(&first).await.unwrap();

        let second = TurnRequest {
            conversation_key: Some("c1".to_string()),
            ..TurnRequest::new("thanks")
        };
        turns.process(&second).await.unwrap();

        let replayed = &llm.recorded_requests()[1].messages;
        assert_eq!(replayed.len(), 3);
        assert_eq!(replayed[1].role, MessageRole::Assistant);
        assert_eq!(replayed[1].content, None);
        assert!(replayed[1].function_call.is_some());
    }

    #[tokio::test]
    async fn test_format_error_after_history_was_appended() {
        let llm = Arc::new(MockLlmClient::new());
        llm.queue_response(text_reply("not json"));
        let cache = Arc::new(InMemoryListCache::new());

        let req = TurnRequest {
            conversation_key: Some("c1".to_string()),
            remember_response: true,
            output_format: Some("json".to_string()),
            ..TurnRequest::new("q")
        };
        let err = processor(&llm, &cache).process(&req).await.unwrap_err();

        assert_eq!(err.kind(), TurnErrorKind::FormatError);
        assert_eq!(cache.recorded_appends().len(), 1);
    }

    #[test]
    fn test_error_kind_names() {
        let err = TurnError::RateLimitExceeded {
            message: "slow down".to_string(),
        };
        assert_eq!(err.kind().as_str(), "RateLimitExceeded");
        assert_eq!(err.to_string(), "slow down");
        assert_eq!(
            TurnError::Extraction("x".to_string()).kind().as_str(),
            "ExtractionError"
        );
    }
}
