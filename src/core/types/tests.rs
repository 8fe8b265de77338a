use serde_json::json;

use super::*;

#[test]
fn test_call_variant_select_covers_all_four_paths() {
    assert_eq!(
        CallVariant::select(false, false),
        CallVariant::BlockingCompletion
    );
    assert_eq!(
        CallVariant::select(false, true),
        CallVariant::BlockingStreaming
    );
    assert_eq!(
        CallVariant::select(true, false),
        CallVariant::AsyncCompletion
    );
    assert_eq!(CallVariant::select(true, true), CallVariant::AsyncStreaming);

    assert!(CallVariant::BlockingStreaming.is_streaming());
    assert!(!CallVariant::AsyncCompletion.is_streaming());
    assert!(CallVariant::AsyncStreaming.is_asynchronous());
    assert!(!CallVariant::BlockingCompletion.is_asynchronous());
}

#[test]
fn test_message_role_serializes_snake_case() {
    let message = Message::new(MessageRole::System, "be brief");
    let rendered = serde_json::to_value(&message).expect("serialize message");
    assert_eq!(rendered, json!({"role": "system", "content": "be brief"}));

    let parsed: Message =
        serde_json::from_value(json!({"role": "assistant", "content": "ok"})).expect("parse");
    assert_eq!(parsed.role, MessageRole::Assistant);
}

#[test]
fn test_text_completion_response_tolerates_missing_fields() {
    let parsed: TextCompletionResponse = serde_json::from_str("{}").expect("parse empty object");
    assert_eq!(parsed.object, "text_completion");
    assert!(parsed.id.is_empty());
    assert!(parsed.choices.is_empty());
    assert!(parsed.usage.is_none());
}

#[test]
fn test_stream_requested_reads_optional_params() {
    let request = CompletionRequest::new(
        "gpt-3",
        vec![Message::new(MessageRole::User, "hi")],
        "https://resource.openai.azure.com",
    );
    assert!(!request.stream_requested());

    let request = request.with_option("stream", json!(true));
    assert!(request.stream_requested());

    let request = request.with_option("stream", json!("yes"));
    assert!(!request.stream_requested());
}

#[test]
fn test_completion_request_defaults() {
    let request = CompletionRequest::new(
        "gpt-3",
        vec![Message::new(MessageRole::User, "hi")],
        "https://resource.openai.azure.com",
    );

    assert!(request.api_key.is_none());
    assert!(request.azure_ad_token.is_none());
    assert!(request.token_credential.is_none());
    assert!(request.client.is_none());
    assert!(request.timeout.is_none());
    assert!(request.optional_params.is_empty());
    assert_eq!(request.model_response, ModelResponse::default());
}

#[test]
fn test_model_response_default_is_chat_shaped() {
    let response = ModelResponse::default();
    assert_eq!(response.object, "chat.completion");
    assert!(response.choices.is_empty());
    assert_eq!(response.usage, Usage::default());
}
