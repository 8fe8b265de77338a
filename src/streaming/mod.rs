use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::core::error::{AdapterError, UpstreamFailure};
use crate::core::traits::CompletionLogger;
use crate::core::types::{AZURE_TEXT_PROVIDER, TextCompletionChunk};

const SSE_DATA_PREFIX: &str = "data:";
const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Incremental SSE parser fed with raw byte-stream chunks. Events can be
/// split across chunk boundaries, so a partial line is buffered until its
/// newline arrives.
#[derive(Debug, Default)]
pub(crate) struct SseParser {
    buffer: String,
}

impl SseParser {
    pub(crate) fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\r', '\n']);
            if let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) {
                let data = data.trim_start();
                if !data.is_empty() {
                    events.push(data.to_string());
                }
            }
        }
        events
    }
}

/// The canonical stream wrapper handed back from the streaming paths.
///
/// This stays opaque on purpose: consuming it into a bare iterator before
/// returning would swallow the error-raising behavior on later iteration.
/// Errors during iteration surface here; errors during establishment never
/// reach this type.
pub struct CompletionStream {
    provider: &'static str,
    model: String,
    logger: Arc<dyn CompletionLogger>,
    inner: Pin<Box<dyn Stream<Item = Result<TextCompletionChunk, AdapterError>> + Send>>,
}

impl CompletionStream {
    pub(crate) fn new(
        response: reqwest::Response,
        model: impl Into<String>,
        logger: Arc<dyn CompletionLogger>,
    ) -> Self {
        Self {
            provider: AZURE_TEXT_PROVIDER,
            model: model.into(),
            logger,
            inner: Box::pin(chunk_stream(response)),
        }
    }

    pub fn provider(&self) -> &str {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn logger(&self) -> &Arc<dyn CompletionLogger> {
        &self.logger
    }
}

impl Stream for CompletionStream {
    type Item = Result<TextCompletionChunk, AdapterError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for CompletionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionStream")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Iterator facade over [`CompletionStream`] for the blocking call paths.
/// Owns the runtime that established the stream so the underlying connection
/// outlives the entry call.
pub struct BlockingCompletionStream {
    runtime: tokio::runtime::Runtime,
    stream: CompletionStream,
}

impl BlockingCompletionStream {
    pub(crate) fn new(runtime: tokio::runtime::Runtime, stream: CompletionStream) -> Self {
        Self { runtime, stream }
    }

    pub fn provider(&self) -> &str {
        self.stream.provider()
    }

    pub fn model(&self) -> &str {
        self.stream.model()
    }
}

impl Iterator for BlockingCompletionStream {
    type Item = Result<TextCompletionChunk, AdapterError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

impl fmt::Debug for BlockingCompletionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingCompletionStream")
            .field("provider", &self.provider())
            .field("model", &self.stream.model)
            .finish_non_exhaustive()
    }
}

fn chunk_stream(
    response: reqwest::Response,
) -> impl Stream<Item = Result<TextCompletionChunk, AdapterError>> + Send {
    async_stream::stream! {
        let mut parser = SseParser::default();
        let mut bytes = response.bytes_stream();

        while let Some(next) = bytes.next().await {
            let chunk = match next {
                Ok(chunk) => chunk,
                Err(error) => {
                    yield Err(UpstreamFailure::from_reqwest(&error).into());
                    return;
                }
            };

            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
            };

            for data in parser.feed(text) {
                if data == SSE_DONE_SENTINEL {
                    return;
                }
                match serde_json::from_str::<TextCompletionChunk>(&data) {
                    Ok(parsed) => yield Ok(parsed),
                    Err(error) => {
                        tracing::warn!(error = %error, "skipping undecodable stream event");
                    }
                }
            }
        }
    }
}
