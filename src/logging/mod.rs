use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::traits::CompletionLogger;

/// Emitted immediately before the network call. The full payload and the
/// resolved auth material are included on purpose: these events exist for
/// request-level debugging against the upstream, and the sink is trusted.
#[derive(Debug, Clone, PartialEq)]
pub struct PreCallEvent {
    pub input: String,
    pub api_key: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub api_version: Option<String>,
    pub api_base: String,
    pub payload: Value,
}

/// Emitted after a successful non-streaming call, carrying the raw vendor
/// response before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct PostCallEvent {
    pub input: String,
    pub api_key: Option<String>,
    pub original_response: Value,
    pub headers: BTreeMap<String, String>,
    pub api_version: Option<String>,
    pub api_base: String,
}

/// Default sink: structured `tracing` debug events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl CompletionLogger for TracingLogger {
    fn pre_call(&self, event: &PreCallEvent) {
        tracing::debug!(
            input = %event.input,
            api_key = event.api_key.as_deref().unwrap_or(""),
            headers = ?event.headers,
            api_version = event.api_version.as_deref().unwrap_or(""),
            api_base = %event.api_base,
            payload = %event.payload,
            "azure_text pre_call"
        );
    }

    fn post_call(&self, event: &PostCallEvent) {
        tracing::debug!(
            input = %event.input,
            api_key = event.api_key.as_deref().unwrap_or(""),
            original_response = %event.original_response,
            headers = ?event.headers,
            api_version = event.api_version.as_deref().unwrap_or(""),
            api_base = %event.api_base,
            "azure_text post_call"
        );
    }
}

#[cfg(test)]
mod tests;
