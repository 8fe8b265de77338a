use std::collections::BTreeMap;

use thiserror::Error;

pub const CONFIG_ERROR_STATUS: u16 = 422;
pub const DEFAULT_UPSTREAM_STATUS: u16 = 500;

/// The only error kind callers ever observe. Every failure on every call
/// path is normalized into one of these two variants before leaving the
/// adapter, and an `AdapterError` is never wrapped a second time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    #[error("invalid completion call [status_code={CONFIG_ERROR_STATUS}]: {message}")]
    Config { message: String },
    #[error("completion call failed [status_code={status_code}]: {message}")]
    Upstream {
        status_code: u16,
        message: String,
        headers: Option<BTreeMap<String, String>>,
    },
}

impl AdapterError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn upstream(status_code: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status_code,
            message: message.into(),
            headers: None,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config { .. } => CONFIG_ERROR_STATUS,
            Self::Upstream { status_code, .. } => *status_code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Config { message } => message,
            Self::Upstream { message, .. } => message,
        }
    }

    pub fn headers(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Config { .. } => None,
            Self::Upstream { headers, .. } => headers.as_ref(),
        }
    }
}

/// Pieces recovered from a failed upstream call before normalization.
///
/// Header recovery is best-effort: headers attached directly to the failure
/// win, otherwise the nested response's headers are used, and a failure with
/// neither still normalizes cleanly with no headers at all.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpstreamFailure {
    pub status_code: Option<u16>,
    pub message: String,
    pub headers: Option<BTreeMap<String, String>>,
    pub response: Option<ErrorResponseParts>,
}

/// What could be salvaged from the upstream HTTP response itself.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorResponseParts {
    pub headers: Option<BTreeMap<String, String>>,
}

impl UpstreamFailure {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            status_code: error.status().map(|status| status.as_u16()),
            message: error.to_string(),
            headers: None,
            response: None,
        }
    }
}

impl From<UpstreamFailure> for AdapterError {
    fn from(failure: UpstreamFailure) -> Self {
        let status_code = failure.status_code.unwrap_or(DEFAULT_UPSTREAM_STATUS);
        let headers = failure
            .headers
            .or_else(|| failure.response.and_then(|response| response.headers));

        Self::Upstream {
            status_code,
            message: failure.message,
            headers,
        }
    }
}
