//! Two-stage multimodal inference pipeline.
//!
//! An image is encoded by a vision worker, then a generation worker streams
//! an answer conditioned on the embedding. Both workers are long-lived,
//! load their backends asynchronously, and start accepting work only after
//! a one-shot readiness barrier releases. The whole pipeline can run as a
//! child process supervised by [`bridge::PipelineBridge`], which speaks the
//! pipeline's unstructured line protocol.

pub mod backend;
pub mod bridge;
pub mod config;
pub mod error;
pub mod logger;
pub mod pipeline;
pub mod types;
pub mod worker;

pub use config::{BridgeConfig, PipelineConfig};
pub use error::PipelineError;
pub use pipeline::Coordinator;
pub use types::{CompletionStatus, PipelineResponse, Request, TimingInfo};
