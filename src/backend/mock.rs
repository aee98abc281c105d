//! Deterministic stub backends.
//!
//! Used by the test suite and by the `"mock"` backend selection so the whole
//! pipeline (workers, coordinator, stdio protocol, bridge) can be exercised
//! on machines without the NPU runtimes.

use std::path::Path;

use crate::error::PipelineError;
use crate::types::{Embedding, TokenFragment};

use super::{
    AbortHandle, GenerationBackend, GenerationParams, ImageTensor, RuntimeOptions, TokenCallback,
    VisionBackend,
};

/// A prompt containing this substring makes the mock generation backend
/// seal the stream with an `Error` fragment instead of `Finish`.
pub const ERROR_TRIGGER: &str = "force backend error";

const EMBEDDING_DIM: usize = 64;

pub struct MockVisionBackend {
    loaded: bool,
}

impl MockVisionBackend {
    pub fn new() -> Self {
        Self { loaded: false }
    }
}

impl Default for MockVisionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl VisionBackend for MockVisionBackend {
    fn load(&mut self, _model_path: &Path) -> Result<(), PipelineError> {
        self.loaded = true;
        Ok(())
    }

    fn configure(&mut self, _options: &RuntimeOptions) -> Result<(), PipelineError> {
        Ok(())
    }

    fn infer(&mut self, image: &ImageTensor) -> Result<Embedding, PipelineError> {
        if !self.loaded {
            return Err(PipelineError::EncodeFailed("backend not loaded".to_string()));
        }
        // Derive a stable embedding from the pixel mean so tests can assert
        // the embedding actually depends on the input.
        let mean = if image.data.is_empty() {
            0.0
        } else {
            image.data.iter().sum::<f32>() / image.data.len() as f32
        };
        let data = (0..EMBEDDING_DIM).map(|i| mean + i as f32).collect();
        Ok(Embedding { data, shape: [1, 1, 1, EMBEDDING_DIM] })
    }

    fn release(&mut self) {
        self.loaded = false;
    }
}

pub struct MockGenerationBackend {
    on_token: Option<TokenCallback>,
    abort: AbortHandle,
    loaded: bool,
}

impl MockGenerationBackend {
    pub fn new() -> Self {
        Self { on_token: None, abort: AbortHandle::new(), loaded: false }
    }
}

impl Default for MockGenerationBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GenerationBackend for MockGenerationBackend {
    fn init(&mut self, _model_path: &Path, on_token: TokenCallback) -> Result<(), PipelineError> {
        self.on_token = Some(on_token);
        self.loaded = true;
        Ok(())
    }

    fn run(
        &mut self,
        prompt: &str,
        embedding: &Embedding,
        params: &GenerationParams,
    ) -> Result<(), PipelineError> {
        let Some(on_token) = self.on_token.as_mut() else {
            return Err(PipelineError::GenerationFailed("backend not initialized".to_string()));
        };

        if prompt.contains(ERROR_TRIGGER) {
            on_token(TokenFragment::error());
            return Ok(());
        }

        let answer = format!(
            "The mock model looked at an embedding of {} values and answers your {}-byte prompt.",
            embedding.len(),
            prompt.len(),
        );
        for word in answer.split_inclusive(' ').take(params.max_tokens) {
            if self.abort.is_aborted() {
                on_token(TokenFragment::error());
                return Ok(());
            }
            on_token(TokenFragment::normal(word));
        }
        on_token(TokenFragment::finish());
        Ok(())
    }

    fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    fn destroy(&mut self) {
        self.on_token = None;
        self.loaded = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenState;
    use std::sync::mpsc;

    fn dummy_tensor() -> ImageTensor {
        ImageTensor { data: vec![10.0; 12], width: 2, height: 2 }
    }

    #[test]
    fn test_vision_infer_requires_load() {
        let mut backend = MockVisionBackend::new();
        assert!(backend.infer(&dummy_tensor()).is_err());
        backend.load(Path::new("model/vision_transformer.rknn")).unwrap();
        let embedding = backend.infer(&dummy_tensor()).unwrap();
        assert_eq!(embedding.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_generation_streams_normal_then_finish() {
        let (tx, rx) = mpsc::channel();
        let mut backend = MockGenerationBackend::new();
        backend
            .init(Path::new("model/qwen.rkllm"), Box::new(move |f| tx.send(f).unwrap()))
            .unwrap();

        let embedding = Embedding { data: vec![0.5; 8], shape: [1, 1, 1, 8] };
        backend.run("describe this", &embedding, &GenerationParams::default()).unwrap();

        let fragments: Vec<TokenFragment> = rx.try_iter().collect();
        assert!(fragments.len() > 1);
        assert!(fragments[..fragments.len() - 1]
            .iter()
            .all(|f| f.state == TokenState::Normal));
        assert_eq!(fragments.last().unwrap().state, TokenState::Finish);
    }

    #[test]
    fn test_generation_error_trigger_seals_with_error() {
        let (tx, rx) = mpsc::channel();
        let mut backend = MockGenerationBackend::new();
        backend
            .init(Path::new("model/qwen.rkllm"), Box::new(move |f| tx.send(f).unwrap()))
            .unwrap();

        let embedding = Embedding { data: vec![0.5; 8], shape: [1, 1, 1, 8] };
        backend
            .run(&format!("please {ERROR_TRIGGER}"), &embedding, &GenerationParams::default())
            .unwrap();

        let fragments: Vec<TokenFragment> = rx.try_iter().collect();
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].state, TokenState::Error);
    }
}
