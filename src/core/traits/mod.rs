use async_trait::async_trait;

use crate::core::error::AdapterError;
use crate::logging::{PostCallEvent, PreCallEvent};

/// Bearer-token-producing credential for callers that authenticate with a
/// managed identity instead of a static API key. Token refresh and lifecycle
/// stay on the caller's side of this seam.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn bearer_token(&self) -> Result<String, AdapterError>;
}

/// Observability sink for the request/response lifecycle. The adapter
/// guarantees that `pre_call` fires strictly before the network call and
/// `post_call` strictly after it; what the sink does with the events is its
/// own business.
pub trait CompletionLogger: Send + Sync {
    fn pre_call(&self, event: &PreCallEvent);
    fn post_call(&self, event: &PostCallEvent);
}
