//! Completion dispatch and history append

use super::{TurnError, TurnRequest, TurnSettings, SCHEMA_FUNCTION_NAME};
use crate::cache::{CacheError, ListCache};
use crate::llm::{ChatRequest, FunctionSpec, LlmError, LlmService, Message};

/// Assemble the prompt: history, then the optional system message, then the
/// new user message.
pub(super) fn build_messages(history: Vec<Message>, request: &TurnRequest) -> Vec<Message> {
    let mut messages = history;
    if let Some(context) = request.system_context() {
        messages.push(Message::system(context));
    }
    messages.push(Message::user(&request.query));
    messages
}

fn build_request(settings: &TurnSettings, request: &TurnRequest, messages: Vec<Message>) -> ChatRequest {
    let functions = request
        .schema()
        .map(|schema| {
            vec![FunctionSpec {
                name: SCHEMA_FUNCTION_NAME.to_string(),
                parameters: schema.clone(),
            }]
        })
        .unwrap_or_default();

    ChatRequest {
        model: settings.model.clone(),
        temperature: settings.temperature,
        messages,
        functions,
    }
}

/// Log a provider failure and map it to the turn error the caller sees
fn classify(error: LlmError) -> TurnError {
    match (error.status, &error.body) {
        (Some(status), Some(body)) => {
            tracing::error!(status, body = %body, "Completion request failed");
        }
        _ => {
            tracing::error!(error = %error.message, "Completion request failed");
        }
    }

    if error.is_rate_limited() {
        tracing::info!("Throwing RateLimitExceeded");
        TurnError::RateLimitExceeded {
            message: error.message,
        }
    } else {
        TurnError::Upstream(error)
    }
}

/// Send the completion request and return the top choice's message.
///
/// When the request asks to be remembered, the user message and the reply
/// are appended to the conversation's history list in one call.
pub(super) async fn dispatch(
    llm: &dyn LlmService,
    cache: &dyn ListCache,
    settings: &TurnSettings,
    request: &TurnRequest,
    history: Vec<Message>,
) -> Result<Message, TurnError> {
    let messages = build_messages(history, request);
    let user_message = messages.last().cloned();
    let chat_request = build_request(settings, request, messages);

    let completion = llm.complete(&chat_request).await.map_err(classify)?;
    let reply = completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| classify(LlmError::unknown("No choices in response")))?;

    if let (true, Some(key), Some(user_message)) =
        (request.should_remember(), request.conversation_key(), user_message)
    {
        let entries = [&user_message, &reply]
            .into_iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(CacheError::from)?;
        cache
            .list_concatenate_back(&settings.namespace, key, &entries)
            .await?;
        tracing::debug!(key, "Exchange appended to history");
    }

    Ok(reply)
}
