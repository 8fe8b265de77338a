use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::core::types::{
    ChatChoice, ChatMessage, Message, ModelResponse, TextCompletionResponse,
};

const ASSISTANT_ROLE: &str = "assistant";
const CHAT_COMPLETION_OBJECT: &str = "chat.completion";

/// Flattens role-tagged messages into the single prompt string the legacy
/// completions endpoint expects.
pub fn prompt_from_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|message| message.content.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Outbound request body: `{model, prompt, ...passthrough options}`.
///
/// `model` is serialized as an explicit JSON null when the gateway rewrite
/// has already moved it into the URL path.
pub fn build_payload(
    model: Option<&str>,
    prompt: &str,
    optional_params: &IndexMap<String, Value>,
) -> Value {
    let mut body = Map::new();
    body.insert(
        "model".to_string(),
        match model {
            Some(model) => Value::String(model.to_string()),
            None => Value::Null,
        },
    );
    body.insert("prompt".to_string(), Value::String(prompt.to_string()));
    for (key, value) in optional_params {
        body.insert(key.clone(), value.clone());
    }
    Value::Object(body)
}

/// Remaps a raw text-completion object into the caller-supplied chat-shaped
/// response target: each choice's text becomes an assistant message.
pub fn convert_to_chat_response(
    response: TextCompletionResponse,
    model_response: &mut ModelResponse,
) {
    if !response.id.is_empty() {
        model_response.id = response.id;
    }
    if response.created != 0 {
        model_response.created = response.created;
    }
    if !response.model.is_empty() {
        model_response.model = response.model;
    }
    model_response.object = CHAT_COMPLETION_OBJECT.to_string();
    model_response.choices = response
        .choices
        .into_iter()
        .map(|choice| ChatChoice {
            index: choice.index,
            message: ChatMessage {
                role: ASSISTANT_ROLE.to_string(),
                content: Some(choice.text),
            },
            finish_reason: choice.finish_reason,
        })
        .collect();
    if let Some(usage) = response.usage {
        model_response.usage = usage;
    }
}
