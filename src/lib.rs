pub mod adapter;
pub mod client;
pub mod core;
pub mod logging;
pub mod streaming;
pub mod translate;

pub use crate::adapter::{AzureTextCompletion, BlockingCompletionOutcome, CompletionOutcome};
pub use crate::core::error::AdapterError;
pub use crate::core::types::*;
pub use crate::streaming::{BlockingCompletionStream, CompletionStream};
