//! Out-of-process supervision of the pipeline.
//!
//! The whole coordinator (plus both workers) runs as one opaque child
//! process; the only channel is line-buffered stdio, and protocol state is
//! inferred from literal markers in the output stream.

pub mod pipeline_bridge;
pub mod process_manager;
pub mod protocol;

pub use pipeline_bridge::PipelineBridge;
pub use protocol::{BridgeReply, ParsePhase, ResponseParser};
