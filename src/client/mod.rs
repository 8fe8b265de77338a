use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use indexmap::IndexMap;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::{AdapterError, ErrorResponseParts, UpstreamFailure};
use crate::core::types::CompletionRequest;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const API_VERSION_QUERY_KEY: &str = "api-version";

const API_KEY_HEADER: &str = "api-key";
const CONTENT_TYPE_HEADER: &str = "content-type";
const JSON_CONTENT_TYPE: &str = "application/json";
const DEPLOYMENTS_PATH_MARKER: &str = "/openai/deployments";

const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2_000;

/// Exactly one of these authenticates a request: `api-key: <key>` or
/// `Authorization: Bearer <token>`, with the key taking precedence when a
/// caller supplies both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AzureCredential {
    ApiKey(String),
    BearerToken(String),
}

impl AzureCredential {
    pub fn api_key(&self) -> Option<&str> {
        match self {
            Self::ApiKey(key) => Some(key),
            Self::BearerToken(_) => None,
        }
    }

    pub fn bearer_token(&self) -> Option<&str> {
        match self {
            Self::ApiKey(_) => None,
            Self::BearerToken(token) => Some(token),
        }
    }
}

/// Where completion URLs are rooted. An `api_base` that already carries the
/// deployments path segment is a full base URL, not a resource endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AzureEndpoint {
    /// Resource endpoint; the deployment path is appended per call.
    Endpoint(String),
    /// Full base URL, deployment (or gateway-routed model) already embedded.
    BaseUrl(String),
}

impl AzureEndpoint {
    pub fn detect(api_base: &str) -> Self {
        let trimmed = api_base.trim_end_matches('/').to_string();
        if trimmed.contains(DEPLOYMENTS_PATH_MARKER) {
            Self::BaseUrl(trimmed)
        } else {
            Self::Endpoint(trimmed)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Endpoint(url) | Self::BaseUrl(url) => url,
        }
    }

    pub fn completions_url(&self, deployment: Option<&str>) -> String {
        match (self, deployment) {
            (Self::BaseUrl(base), _) => format!("{base}/completions"),
            (Self::Endpoint(endpoint), Some(model)) => {
                format!("{endpoint}{DEPLOYMENTS_PATH_MARKER}/{model}/completions")
            }
            (Self::Endpoint(endpoint), None) => format!("{endpoint}/completions"),
        }
    }
}

/// Auth-header preview for a key/token pair, key first.
pub fn validate_environment(
    api_key: Option<&str>,
    azure_ad_token: Option<&str>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(CONTENT_TYPE_HEADER.to_string(), JSON_CONTENT_TYPE.to_string());
    if let Some(key) = api_key {
        headers.insert(API_KEY_HEADER.to_string(), key.to_string());
    } else if let Some(token) = azure_ad_token {
        headers.insert(AUTHORIZATION.as_str().to_string(), format!("Bearer {token}"));
    }
    headers
}

/// Per-call client construction parameters. Assembled fresh inside every
/// call; the gateway rewrite rebuilds this from scratch rather than patching
/// a shared value.
#[derive(Debug, Clone)]
pub struct AzureClientParams {
    pub endpoint: AzureEndpoint,
    pub api_version: Option<String>,
    pub credential: AzureCredential,
    pub timeout: Option<Duration>,
    pub max_retries: u32,
    pub http_client: Option<reqwest::Client>,
}

impl AzureClientParams {
    pub async fn initialize(
        request: &CompletionRequest,
        max_retries: u32,
    ) -> Result<Self, AdapterError> {
        let credential = resolve_credential(request).await?;

        Ok(Self {
            endpoint: AzureEndpoint::detect(&request.api_base),
            api_version: request.api_version.clone(),
            credential,
            timeout: request.timeout,
            max_retries,
            http_client: None,
        })
    }

    pub fn with_endpoint(mut self, endpoint: AzureEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = Some(http_client);
        self
    }
}

async fn resolve_credential(request: &CompletionRequest) -> Result<AzureCredential, AdapterError> {
    if let Some(key) = request.api_key.as_deref() {
        return Ok(AzureCredential::ApiKey(key.to_string()));
    }
    if let Some(token) = request.azure_ad_token.as_deref() {
        return Ok(AzureCredential::BearerToken(token.to_string()));
    }
    if let Some(credential) = request.token_credential.as_ref() {
        let token = credential.bearer_token().await?;
        return Ok(AzureCredential::BearerToken(token));
    }

    Err(UpstreamFailure::message(
        "missing credentials: set api_key, azure_ad_token, or a token credential",
    )
    .into())
}

/// Vendor HTTP client: connection pooling and TLS come from reqwest, retries
/// from the loop below driven by `max_retries`. A handle may be shared across
/// calls; the only thing ever mutated on a shared handle is the query
/// parameter defaults, and only through [`set_query_param_if_absent`].
///
/// [`set_query_param_if_absent`]: AzureClient::set_query_param_if_absent
#[derive(Debug)]
pub struct AzureClient {
    http: reqwest::Client,
    endpoint: AzureEndpoint,
    credential: AzureCredential,
    timeout: Option<Duration>,
    max_retries: u32,
    custom_query: Mutex<BTreeMap<String, String>>,
}

impl AzureClient {
    pub fn from_params(params: AzureClientParams) -> Result<Self, AdapterError> {
        let http = match params.http_client {
            Some(client) => client,
            None => reqwest::Client::builder().build().map_err(|error| {
                AdapterError::from(UpstreamFailure::message(format!(
                    "failed to build http transport: {error}"
                )))
            })?,
        };

        let mut custom_query = BTreeMap::new();
        if let Some(api_version) = params.api_version {
            custom_query.insert(API_VERSION_QUERY_KEY.to_string(), api_version);
        }

        Ok(Self {
            http,
            endpoint: params.endpoint,
            credential: params.credential,
            timeout: params.timeout,
            max_retries: params.max_retries,
            custom_query: Mutex::new(custom_query),
        })
    }

    pub fn endpoint(&self) -> &AzureEndpoint {
        &self.endpoint
    }

    pub fn credential(&self) -> &AzureCredential {
        &self.credential
    }

    pub fn api_key(&self) -> Option<&str> {
        self.credential.api_key()
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.credential.bearer_token()
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// First-write-wins merge into the per-request query defaults. Returns
    /// whether the value was written.
    pub fn set_query_param_if_absent(&self, key: &str, value: &str) -> bool {
        let mut query = self.lock_query();
        if query.contains_key(key) {
            return false;
        }
        query.insert(key.to_string(), value.to_string());
        true
    }

    pub fn query_param(&self, key: &str) -> Option<String> {
        self.lock_query().get(key).cloned()
    }

    fn lock_query(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.custom_query
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Non-streaming completion call with the retry loop applied.
    pub async fn post_completion<TResp>(
        &self,
        deployment: Option<&str>,
        payload: &Value,
        timeout: Option<Duration>,
        extra_headers: &IndexMap<String, String>,
    ) -> Result<TResp, AdapterError>
    where
        TResp: DeserializeOwned,
    {
        let url = self.endpoint.completions_url(deployment);
        let headers = self.request_headers(extra_headers)?;
        let query = self.query_pairs();
        let effective_timeout = timeout.or(self.timeout);
        let attempts = self.max_retries + 1;

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let mut request_builder = self
                .http
                .post(&url)
                .headers(headers.clone())
                .query(&query)
                .json(payload);
            if let Some(timeout) = effective_timeout {
                request_builder = request_builder.timeout(timeout);
            }

            match request_builder.send().await {
                Ok(response) => {
                    let status_code = response.status().as_u16();

                    if !response.status().is_success() {
                        let failure = build_status_failure(status_code, response).await;
                        if attempt < attempts && RETRYABLE_STATUS_CODES.contains(&status_code) {
                            sleep_before_retry(attempt).await;
                            continue;
                        }
                        return Err(failure.into());
                    }

                    let parsed = response.json::<TResp>().await.map_err(|error| {
                        AdapterError::from(UpstreamFailure::message(format!(
                            "failed to decode completion response: {error}"
                        )))
                    })?;

                    return Ok(parsed);
                }
                Err(error) => {
                    if attempt < attempts && is_retryable_transport(&error) {
                        sleep_before_retry(attempt).await;
                        continue;
                    }
                    return Err(UpstreamFailure::from_reqwest(&error).into());
                }
            }
        }
    }

    /// Streaming establishment call. No retry loop here: `max_retries` is not
    /// a valid parameter on the streaming call, which is why the adapter pops
    /// it from the payload first.
    pub async fn post_completion_stream(
        &self,
        deployment: Option<&str>,
        payload: &Value,
        timeout: Option<Duration>,
        extra_headers: &IndexMap<String, String>,
    ) -> Result<reqwest::Response, AdapterError> {
        let url = self.endpoint.completions_url(deployment);
        let headers = self.request_headers(extra_headers)?;
        let query = self.query_pairs();

        let mut request_builder = self
            .http
            .post(&url)
            .headers(headers)
            .query(&query)
            .json(payload);
        if let Some(timeout) = timeout.or(self.timeout) {
            request_builder = request_builder.timeout(timeout);
        }

        let response = request_builder
            .send()
            .await
            .map_err(|error| AdapterError::from(UpstreamFailure::from_reqwest(&error)))?;

        if !response.status().is_success() {
            let status_code = response.status().as_u16();
            return Err(build_status_failure(status_code, response).await.into());
        }

        Ok(response)
    }

    fn query_pairs(&self) -> Vec<(String, String)> {
        self.lock_query()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    fn request_headers(
        &self,
        extra_headers: &IndexMap<String, String>,
    ) -> Result<HeaderMap, AdapterError> {
        let mut headers = HeaderMap::new();

        match &self.credential {
            AzureCredential::ApiKey(key) => {
                let value = parse_header_value(key, "api key")?;
                headers.insert(HeaderName::from_static(API_KEY_HEADER), value);
            }
            AzureCredential::BearerToken(token) => {
                let value = parse_header_value(&format!("Bearer {token}"), "bearer token")?;
                headers.insert(AUTHORIZATION, value);
            }
        }

        for (name, value) in extra_headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
                AdapterError::from(UpstreamFailure::message(format!(
                    "invalid header name {name}: {error}"
                )))
            })?;
            headers.insert(header_name, parse_header_value(value, name)?);
        }

        Ok(headers)
    }
}

fn parse_header_value(value: &str, what: &str) -> Result<HeaderValue, AdapterError> {
    HeaderValue::from_str(value).map_err(|error| {
        AdapterError::from(UpstreamFailure::message(format!(
            "invalid {what} header value: {error}"
        )))
    })
}

async fn build_status_failure(status_code: u16, response: reqwest::Response) -> UpstreamFailure {
    let headers = headers_to_map(response.headers());
    let message = match response.text().await {
        Ok(body) if !body.trim().is_empty() => body,
        Ok(_) => format!("http status {status_code}"),
        Err(error) => format!("http status {status_code}; failed to read response body: {error}"),
    };

    UpstreamFailure {
        status_code: Some(status_code),
        message,
        headers: None,
        response: Some(ErrorResponseParts {
            headers: Some(headers),
        }),
    }
}

fn headers_to_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn is_retryable_transport(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

async fn sleep_before_retry(attempt: u32) {
    let retry_index = attempt.saturating_sub(1).min(63);
    let multiplier = 1_u64.checked_shl(retry_index).unwrap_or(u64::MAX);
    let backoff_ms = INITIAL_BACKOFF_MS
        .saturating_mul(multiplier)
        .min(MAX_BACKOFF_MS);
    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
}
