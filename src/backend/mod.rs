//! Backend capability interfaces.
//!
//! The real vision/generation engines are external (NPU runtimes reached
//! through FFI); the workers only ever see these traits. Handles are owned
//! values so teardown happens on every worker exit path instead of through
//! global cleanup hooks.

pub mod mock;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::{Embedding, TokenFragment};

/// Preprocessed image input: RGB f32 pixels in NHWC order, batch dim 1.
#[derive(Debug, Clone)]
pub struct ImageTensor {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

/// Runtime knobs applied after the vision model loads.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Bitmask of compute cores the runtime may schedule on.
    pub core_mask: u32,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        // All three NPU cores on the target SoC.
        Self { core_mask: 0b111 }
    }
}

/// Converts an image tensor into a fixed-shape embedding.
pub trait VisionBackend: Send {
    fn load(&mut self, model_path: &Path) -> Result<(), PipelineError>;
    fn configure(&mut self, options: &RuntimeOptions) -> Result<(), PipelineError>;
    fn infer(&mut self, image: &ImageTensor) -> Result<Embedding, PipelineError>;
    fn release(&mut self);
}

/// Sink for streamed token fragments. May be invoked from a backend-owned
/// thread; implementations must not block on backend-internal locks.
pub type TokenCallback = Box<dyn FnMut(TokenFragment) + Send>;

/// Flag the worker flips to stop an in-flight generation call early.
/// Aborting is fatal for that job only, never for the worker.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Re-arm before the next generation call.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sampling parameters for one generation call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { max_tokens: 512, temperature: 0.8 }
    }
}

/// Streams an answer for a (prompt, embedding) pair.
pub trait GenerationBackend: Send {
    /// Load the model and register the token sink. `on_token` is invoked
    /// zero or more times with `Normal` state, then exactly once with
    /// `Finish` or `Error`.
    fn init(&mut self, model_path: &Path, on_token: TokenCallback) -> Result<(), PipelineError>;

    /// Run one generation call. Blocks until the stream is sealed.
    fn run(
        &mut self,
        prompt: &str,
        embedding: &Embedding,
        params: &GenerationParams,
    ) -> Result<(), PipelineError>;

    /// Handle the worker can use to abort an in-flight call from another
    /// thread while `run` is still blocked.
    fn abort_handle(&self) -> AbortHandle;

    /// Release the model. Idempotent.
    fn destroy(&mut self);
}

/// Instantiate the backend pair named by the config.
pub fn create_backends(
    config: &PipelineConfig,
) -> Result<(Box<dyn VisionBackend>, Box<dyn GenerationBackend>), PipelineError> {
    match config.backend.as_str() {
        // TODO: add the rknn/rkllm FFI backends once the sys bindings are published.
        "mock" => Ok((
            Box::new(mock::MockVisionBackend::new()),
            Box::new(mock::MockGenerationBackend::new()),
        )),
        other => Err(PipelineError::Config(format!(
            "unknown backend '{other}' (available: mock)"
        ))),
    }
}
