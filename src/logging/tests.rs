use std::collections::BTreeMap;

use serde_json::json;

use super::*;

fn sample_pre_call() -> PreCallEvent {
    let mut headers = BTreeMap::new();
    headers.insert("content-type".to_string(), "application/json".to_string());
    headers.insert("api-key".to_string(), "sk-test".to_string());

    PreCallEvent {
        input: "hello".to_string(),
        api_key: Some("sk-test".to_string()),
        headers,
        api_version: Some("2024-02-01".to_string()),
        api_base: "https://resource.openai.azure.com".to_string(),
        payload: json!({"model": "gpt-3", "prompt": "hello"}),
    }
}

#[test]
fn test_pre_call_event_carries_full_payload() {
    let event = sample_pre_call();
    assert_eq!(event.payload["prompt"], "hello");
    assert_eq!(
        event.headers.get("api-key"),
        Some(&"sk-test".to_string()),
        "auth material is logged deliberately, not redacted"
    );
}

#[test]
fn test_post_call_event_carries_raw_response() {
    let event = PostCallEvent {
        input: "hello".to_string(),
        api_key: Some("sk-test".to_string()),
        original_response: json!({"id": "cmpl-1", "choices": [{"text": "hi"}]}),
        headers: BTreeMap::new(),
        api_version: None,
        api_base: "https://resource.openai.azure.com".to_string(),
    };
    assert_eq!(event.original_response["choices"][0]["text"], "hi");
}

#[test]
fn test_tracing_logger_accepts_events() {
    let logger = TracingLogger;
    let pre = sample_pre_call();
    logger.pre_call(&pre);
    logger.post_call(&PostCallEvent {
        input: pre.input,
        api_key: pre.api_key,
        original_response: json!({"id": "cmpl-1"}),
        headers: pre.headers,
        api_version: pre.api_version,
        api_base: pre.api_base,
    });
}
