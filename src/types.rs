//! Core data types shared by the coordinator, workers, and bridge.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Internal correlation id stamped on each accepted request.
///
/// The wire protocol is order-based (single request in flight), but the
/// coordinator verifies this id on the completion path so any future
/// concurrency relaxation fails loudly instead of silently mis-pairing
/// embeddings and prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One user request: the raw question plus the image it refers to.
#[derive(Debug, Clone)]
pub struct Request {
    /// The caller's text with the `{{...}}` delimiter already replaced by
    /// the backend's image placeholder and wrapped in the chat framing.
    pub prompt: String,
    /// Path extracted from the `{{...}}` delimiter.
    pub image: PathBuf,
}

/// Fixed-shape image embedding produced by the vision backend.
///
/// Produced once per request, handed to the generation worker, and dropped
/// after consumption.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub data: Vec<f32>,
    /// NHWC-style shape the vision backend emitted, batch dim included.
    pub shape: [usize; 4],
}

impl Embedding {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Terminal state of a streamed token fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// More fragments follow.
    Normal,
    /// Stream complete; the aggregate is final.
    Finish,
    /// Stream aborted; no usable aggregate.
    Error,
}

/// Incremental text unit delivered by the generation backend's callback.
#[derive(Debug, Clone)]
pub struct TokenFragment {
    pub text: String,
    pub state: TokenState,
}

impl TokenFragment {
    pub fn normal(text: impl Into<String>) -> Self {
        Self { text: text.into(), state: TokenState::Normal }
    }

    pub fn finish() -> Self {
        Self { text: String::new(), state: TokenState::Finish }
    }

    pub fn error() -> Self {
        Self { text: String::new(), state: TokenState::Error }
    }
}

/// How a response was sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionStatus {
    Success,
    Error,
}

/// Timing metadata gathered while a response streamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingInfo {
    /// Wall time from submitting the generation call to the first token.
    pub time_to_first_token: Duration,
    /// Total wall time of the generation call.
    pub generation_time: Duration,
    pub generated_tokens: usize,
    pub tokens_per_sec: f64,
}

/// A sealed answer for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResponse {
    /// NORMAL fragments concatenated in arrival order. Empty on error.
    pub answer: String,
    pub status: CompletionStatus,
    pub timing: Option<TimingInfo>,
}

impl PipelineResponse {
    pub fn success(answer: String, timing: TimingInfo) -> Self {
        Self { answer, status: CompletionStatus::Success, timing: Some(timing) }
    }

    pub fn error() -> Self {
        Self { answer: String::new(), status: CompletionStatus::Error, timing: None }
    }

    pub fn is_success(&self) -> bool {
        self.status == CompletionStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_has_no_answer() {
        let resp = PipelineResponse::error();
        assert!(resp.answer.is_empty());
        assert_eq!(resp.status, CompletionStatus::Error);
        assert!(resp.timing.is_none());
    }

    #[test]
    fn test_fragment_constructors() {
        assert_eq!(TokenFragment::normal("hi").state, TokenState::Normal);
        assert_eq!(TokenFragment::finish().state, TokenState::Finish);
        assert_eq!(TokenFragment::error().state, TokenState::Error);
    }
}
