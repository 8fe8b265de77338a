use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::AzureClient;
use crate::core::traits::{CompletionLogger, TokenCredential};
use crate::logging::TracingLogger;

pub const AZURE_TEXT_PROVIDER: &str = "azure_text";

const TEXT_COMPLETION_OBJECT: &str = "text_completion";
const CHAT_COMPLETION_OBJECT: &str = "chat.completion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A single completion call. Built fresh at every call site; nothing here is
/// shared across calls except an explicitly supplied client handle.
#[derive(Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Passthrough provider options (temperature, stream, max_retries, ...).
    /// Insertion order is preserved into the outbound payload.
    pub optional_params: IndexMap<String, Value>,
    pub api_key: Option<String>,
    pub azure_ad_token: Option<String>,
    pub token_credential: Option<Arc<dyn TokenCredential>>,
    pub api_base: String,
    pub api_version: Option<String>,
    pub timeout: Option<Duration>,
    pub headers: IndexMap<String, String>,
    pub client: Option<Arc<AzureClient>>,
    pub logger: Arc<dyn CompletionLogger>,
    /// Response target populated by the non-streaming paths.
    pub model_response: ModelResponse,
}

impl CompletionRequest {
    pub fn new(
        model: impl Into<String>,
        messages: Vec<Message>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            optional_params: IndexMap::new(),
            api_key: None,
            azure_ad_token: None,
            token_credential: None,
            api_base: api_base.into(),
            api_version: None,
            timeout: None,
            headers: IndexMap::new(),
            client: None,
            logger: Arc::new(TracingLogger),
            model_response: ModelResponse::default(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_azure_ad_token(mut self, token: impl Into<String>) -> Self {
        self.azure_ad_token = Some(token.into());
        self
    }

    pub fn with_token_credential(mut self, credential: Arc<dyn TokenCredential>) -> Self {
        self.token_credential = Some(credential);
        self
    }

    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.optional_params.insert(key.into(), value);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_client(mut self, client: Arc<AzureClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn CompletionLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_model_response(mut self, model_response: ModelResponse) -> Self {
        self.model_response = model_response;
        self
    }

    pub fn stream_requested(&self) -> bool {
        self.optional_params
            .get("stream")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

impl fmt::Debug for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRequest")
            .field("model", &self.model)
            .field("messages", &self.messages)
            .field("optional_params", &self.optional_params)
            .field("api_base", &self.api_base)
            .field("api_version", &self.api_version)
            .field("timeout", &self.timeout)
            .field("headers", &self.headers)
            .field("has_api_key", &self.api_key.is_some())
            .field("has_azure_ad_token", &self.azure_ad_token.is_some())
            .field("has_token_credential", &self.token_credential.is_some())
            .field("has_client", &self.client.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChoice {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<Value>,
}

/// Raw vendor completion object, as returned by the completions endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default = "text_completion_object")]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<TextChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A single incremental event on the streaming paths.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default = "text_completion_object")]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<TextChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

fn text_completion_object() -> String {
    TEXT_COMPLETION_OBJECT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Canonical chat-shaped completion result. The text-completion fields of the
/// vendor response are remapped into this shape before being returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Usage,
}

impl Default for ModelResponse {
    fn default() -> Self {
        Self {
            id: String::new(),
            object: CHAT_COMPLETION_OBJECT.to_string(),
            created: 0,
            model: String::new(),
            choices: Vec::new(),
            usage: Usage::default(),
        }
    }
}

/// The closed set of call paths. Selecting a variant up front keeps the
/// shared validation and error wrapping on a single dispatch seam instead of
/// four duplicated branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallVariant {
    BlockingCompletion,
    BlockingStreaming,
    AsyncCompletion,
    AsyncStreaming,
}

impl CallVariant {
    pub fn select(asynchronous: bool, streaming: bool) -> Self {
        match (asynchronous, streaming) {
            (false, false) => Self::BlockingCompletion,
            (false, true) => Self::BlockingStreaming,
            (true, false) => Self::AsyncCompletion,
            (true, true) => Self::AsyncStreaming,
        }
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, Self::BlockingStreaming | Self::AsyncStreaming)
    }

    pub fn is_asynchronous(self) -> bool {
        matches!(self, Self::AsyncCompletion | Self::AsyncStreaming)
    }
}

#[cfg(test)]
mod tests;
