use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::Value;

use crate::client::{
    API_VERSION_QUERY_KEY, AzureClient, AzureClientParams, AzureEndpoint, DEFAULT_MAX_RETRIES,
    validate_environment,
};
use crate::core::error::{AdapterError, UpstreamFailure};
use crate::core::traits::CompletionLogger;
use crate::core::types::{
    CallVariant, CompletionRequest, ModelResponse, TextCompletionResponse,
};
use crate::logging::{PostCallEvent, PreCallEvent};
use crate::streaming::{BlockingCompletionStream, CompletionStream};
use crate::translate;

pub const GATEWAY_HOST_MARKER: &str = "gateway.ai.cloudflare.com";

const MAX_RETRIES_PARAM: &str = "max_retries";

/// Result of a blocking call: either a fully normalized response or the
/// stream wrapper, never partially consumed data.
#[derive(Debug)]
pub enum BlockingCompletionOutcome {
    Completed(ModelResponse),
    Streaming(BlockingCompletionStream),
}

/// Result of an asynchronous call.
#[derive(Debug)]
pub enum CompletionOutcome {
    Completed(ModelResponse),
    Streaming(CompletionStream),
}

/// Translates unified completion requests into calls against the hosted
/// completions endpoint and normalizes whatever comes back. Four call paths
/// (blocking/async x streaming/non-streaming) share one prepare step and one
/// error-normalization policy.
#[derive(Debug, Default, Clone, Copy)]
pub struct AzureTextCompletion;

impl AzureTextCompletion {
    pub fn new() -> Self {
        Self
    }

    /// Blocking entry point. The async core runs on a throwaway
    /// current-thread runtime; for streaming calls the runtime moves into
    /// the returned iterator so the established connection stays usable.
    pub fn completion(
        &self,
        request: CompletionRequest,
    ) -> Result<BlockingCompletionOutcome, AdapterError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|error| {
                AdapterError::from(UpstreamFailure::message(format!(
                    "failed to start blocking runtime: {error}"
                )))
            })?;

        let variant = CallVariant::select(false, request.stream_requested());
        let outcome = runtime.block_on(self.execute(request, variant))?;

        Ok(match outcome {
            CompletionOutcome::Completed(response) => {
                BlockingCompletionOutcome::Completed(response)
            }
            CompletionOutcome::Streaming(stream) => {
                BlockingCompletionOutcome::Streaming(BlockingCompletionStream::new(runtime, stream))
            }
        })
    }

    /// Asynchronous entry point.
    pub async fn acompletion(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionOutcome, AdapterError> {
        let variant = CallVariant::select(true, request.stream_requested());
        self.execute(request, variant).await
    }

    async fn execute(
        &self,
        request: CompletionRequest,
        variant: CallVariant,
    ) -> Result<CompletionOutcome, AdapterError> {
        let prepared = self.prepare(request).await?;

        match variant {
            CallVariant::BlockingCompletion | CallVariant::AsyncCompletion => {
                let response = self.complete(prepared).await?;
                Ok(CompletionOutcome::Completed(response))
            }
            CallVariant::BlockingStreaming | CallVariant::AsyncStreaming => {
                let stream = self.establish_stream(prepared).await?;
                Ok(CompletionOutcome::Streaming(stream))
            }
        }
    }

    /// Shared validation and request assembly, run exactly once per call.
    pub(crate) async fn prepare(
        &self,
        mut request: CompletionRequest,
    ) -> Result<PreparedCall, AdapterError> {
        if request.model.trim().is_empty() || request.messages.is_empty() {
            return Err(AdapterError::config("missing model or messages"));
        }

        let max_retries = pop_max_retries(&mut request.optional_params)?;
        let prompt = translate::prompt_from_messages(&request.messages);

        let mut params = AzureClientParams::initialize(&request, max_retries).await?;
        let mut api_base = request.api_base.clone();
        let mut deployment = Some(request.model.clone());

        // AI-gateway routing: the gateway base already encodes the route, so
        // the body always carries an explicit null model and no deployment
        // path is appended. Only the base-URL rewrite (model into the URL,
        // client parameters rebuilt from scratch) is skipped when the caller
        // supplied a client that is assumed to be routed already.
        if api_base.contains(GATEWAY_HOST_MARKER) {
            if request.client.is_none() {
                if !api_base.ends_with('/') {
                    api_base.push('/');
                }
                api_base.push_str(&request.model);

                params = AzureClientParams::initialize(&request, max_retries)
                    .await?
                    .with_endpoint(AzureEndpoint::BaseUrl(
                        api_base.trim_end_matches('/').to_string(),
                    ));
            }
            deployment = None;
        }

        let payload = translate::build_payload(deployment.as_deref(), &prompt, &request.optional_params);

        Ok(PreparedCall {
            model: request.model,
            deployment,
            prompt,
            payload,
            params,
            client: request.client,
            api_key: request.api_key,
            api_version: request.api_version,
            api_base,
            timeout: request.timeout,
            header_overrides: request.headers,
            logger: request.logger,
            model_response: request.model_response,
        })
    }

    /// Non-streaming: pre-call log, network call, post-call log with the raw
    /// vendor response, then normalization into the caller's response target.
    async fn complete(&self, call: PreparedCall) -> Result<ModelResponse, AdapterError> {
        let client = self.resolve_client(&call)?;

        call.logger.pre_call(&self.pre_call_event(&call, &client));

        let raw: TextCompletionResponse = client
            .post_completion(
                call.deployment.as_deref(),
                &call.payload,
                call.timeout,
                &call.header_overrides,
            )
            .await?;

        let original_response = serde_json::to_value(&raw).map_err(|error| {
            AdapterError::from(UpstreamFailure::message(format!(
                "failed to render raw completion response: {error}"
            )))
        })?;
        call.logger.post_call(&PostCallEvent {
            input: call.prompt.clone(),
            api_key: client.api_key().map(str::to_string),
            original_response,
            headers: validate_environment(client.api_key(), client.bearer_token()),
            api_version: call.api_version.clone(),
            api_base: call.api_base.clone(),
        });

        let mut model_response = call.model_response;
        translate::convert_to_chat_response(raw, &mut model_response);
        Ok(model_response)
    }

    /// Streaming: pre-call log, establishment call, then the opaque wrapper
    /// is returned as-is. Iteration errors belong to the wrapper; only the
    /// establishment call is normalized here.
    async fn establish_stream(&self, call: PreparedCall) -> Result<CompletionStream, AdapterError> {
        let client = self.resolve_client(&call)?;

        call.logger.pre_call(&self.pre_call_event(&call, &client));

        let response = client
            .post_completion_stream(
                call.deployment.as_deref(),
                &call.payload,
                call.timeout,
                &call.header_overrides,
            )
            .await?;

        Ok(CompletionStream::new(response, call.model, call.logger))
    }

    /// Reuses a caller-supplied handle or builds a fresh client from the
    /// per-call parameters. On reuse, an explicitly passed API version is
    /// merged into the handle's query defaults first-write-wins.
    fn resolve_client(&self, call: &PreparedCall) -> Result<Arc<AzureClient>, AdapterError> {
        match &call.client {
            Some(client) => {
                if let Some(api_version) = call.api_version.as_deref() {
                    client.set_query_param_if_absent(API_VERSION_QUERY_KEY, api_version);
                }
                Ok(Arc::clone(client))
            }
            None => Ok(Arc::new(AzureClient::from_params(call.params.clone())?)),
        }
    }

    fn pre_call_event(&self, call: &PreparedCall, client: &AzureClient) -> PreCallEvent {
        PreCallEvent {
            input: call.prompt.clone(),
            api_key: call.api_key.clone(),
            headers: validate_environment(client.api_key(), client.bearer_token()),
            api_version: call.api_version.clone(),
            api_base: call.api_base.clone(),
            payload: call.payload.clone(),
        }
    }
}

/// Everything the four call paths need, assembled once by `prepare`.
pub(crate) struct PreparedCall {
    pub(crate) model: String,
    pub(crate) deployment: Option<String>,
    pub(crate) prompt: String,
    pub(crate) payload: Value,
    pub(crate) params: AzureClientParams,
    pub(crate) client: Option<Arc<AzureClient>>,
    pub(crate) api_key: Option<String>,
    pub(crate) api_version: Option<String>,
    pub(crate) api_base: String,
    pub(crate) timeout: Option<Duration>,
    pub(crate) header_overrides: IndexMap<String, String>,
    pub(crate) logger: Arc<dyn CompletionLogger>,
    pub(crate) model_response: ModelResponse,
}

/// Any JSON integer is accepted; negative values are clamped to zero since a
/// retry count below that has no meaning for the transport.
fn pop_max_retries(optional_params: &mut IndexMap<String, Value>) -> Result<u32, AdapterError> {
    match optional_params.shift_remove(MAX_RETRIES_PARAM) {
        None => Ok(DEFAULT_MAX_RETRIES),
        Some(value) => value
            .as_i64()
            .map(|retries| u32::try_from(retries.max(0)).unwrap_or(u32::MAX))
            .ok_or_else(|| AdapterError::config("max retries must be an int")),
    }
}
