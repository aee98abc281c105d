//! Error taxonomy for the pipeline and the subprocess bridge.
//!
//! Fatal vs recoverable: backend load failures and bridge protocol timeouts
//! are surfaced to the operator and never retried; per-request failures
//! (image decode, generation backend error) are converted to error responses
//! at the job boundary and leave the pipeline usable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A backend failed to load its model. Fatal for the owning worker.
    #[error("backend load failed for {model}: {reason}")]
    BackendLoad { model: String, reason: String },

    /// Both workers did not finish loading within the deadline.
    #[error("workers not ready after {0:?}")]
    LoadTimeout(std::time::Duration),

    /// A request arrived before the readiness barrier released.
    #[error("pipeline not ready")]
    NotReady,

    /// The raw request carried no `{{image path}}` delimiter.
    #[error("no image path found in input")]
    MissingImageDelimiter,

    /// The vision worker could not decode or read the image. Recoverable.
    #[error("image encoding failed: {0}")]
    EncodeFailed(String),

    /// The generation backend reported an error mid-stream. Recoverable.
    #[error("generation failed: {0}")]
    GenerationFailed(String),

    /// The child never printed its request banner within the deadline.
    #[error("pipeline process not ready after {elapsed_secs:.1}s: {stderr}")]
    StartupTimeout { elapsed_secs: f64, stderr: String },

    /// No completion marker arrived within the per-request deadline.
    #[error("no response within {elapsed_secs:.1}s")]
    RequestTimeout { elapsed_secs: f64 },

    /// The child process exited before sealing the current response.
    #[error("pipeline process exited unexpectedly: {0}")]
    ChildExited(String),

    /// A worker produced a completion for a job we did not submit.
    #[error("response correlation mismatch: expected job {expected}, got {got}")]
    JobMismatch { expected: u64, got: u64 },

    /// The worker channels closed while a request was in flight.
    #[error("pipeline channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Whether the pipeline remains usable for subsequent requests.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::MissingImageDelimiter
                | PipelineError::EncodeFailed(_)
                | PipelineError::GenerationFailed(_)
        )
    }
}
