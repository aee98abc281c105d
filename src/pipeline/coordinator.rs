//! Pipeline coordinator: owns both workers and the request flow.
//!
//! Requests are served strictly one at a time. The image path and the
//! templated prompt are fed to the two input queues in lockstep, stamped
//! with the same job id, and the coordinator blocks until the generation
//! worker seals a response for that id.

use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::backend::{self, GenerationBackend, VisionBackend};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::pipeline::{stdin_loop, templates};
use crate::types::{JobId, PipelineResponse};
use crate::worker::barrier::ReadyBarrier;
use crate::worker::{
    generation, vision, Completion, GenerationJob, VisionJob, WorkerHandle,
};

pub struct Coordinator {
    vision_tx: Sender<VisionJob>,
    prompt_tx: Sender<GenerationJob>,
    completions: Receiver<Completion>,
    barrier: Arc<ReadyBarrier>,
    workers: Vec<WorkerHandle>,
    next_job: u64,
    load_timeout: Duration,
    shutdown_timeout: Duration,
}

impl Coordinator {
    /// Spawn both workers with the backend pair named in the config.
    pub fn spawn(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let (vision_backend, generation_backend) = backend::create_backends(config)?;
        Ok(Self::spawn_with_backends(config, vision_backend, generation_backend))
    }

    /// Spawn both workers around caller-supplied backends.
    pub fn spawn_with_backends(
        config: &PipelineConfig,
        vision_backend: Box<dyn VisionBackend>,
        generation_backend: Box<dyn GenerationBackend>,
    ) -> Self {
        let (vision_tx, vision_rx) = unbounded::<VisionJob>();
        let (prompt_tx, prompt_rx) = unbounded::<GenerationJob>();
        let (embedding_tx, embedding_rx) = unbounded();
        let (done_tx, done_rx) = unbounded::<Completion>();
        let barrier = Arc::new(ReadyBarrier::new(2));

        let workers = vec![
            vision::spawn(
                config.clone(),
                vision_backend,
                vision_rx,
                embedding_tx,
                barrier.clone(),
            ),
            generation::spawn(
                config.clone(),
                generation_backend,
                prompt_rx,
                embedding_rx,
                done_tx,
                barrier.clone(),
            ),
        ];

        Self {
            vision_tx,
            prompt_tx,
            completions: done_rx,
            barrier,
            workers,
            next_job: 0,
            load_timeout: Duration::from_secs(config.load_timeout_secs),
            shutdown_timeout: Duration::from_secs(config.shutdown_timeout_secs),
        }
    }

    /// Block until both workers finished loading. A worker that died during
    /// load never signals, so this fails after the configured deadline.
    pub fn wait_ready(&self) -> Result<(), PipelineError> {
        if self.barrier.wait_timeout(self.load_timeout) {
            Ok(())
        } else {
            Err(PipelineError::LoadTimeout(self.load_timeout))
        }
    }

    pub fn is_ready(&self) -> bool {
        self.barrier.is_ready()
    }

    /// Route one raw request through both workers and block until its
    /// response is sealed. Exactly one request is in flight at a time;
    /// `&mut self` enforces that for in-process callers.
    pub fn submit(&mut self, raw: &str) -> Result<PipelineResponse, PipelineError> {
        if !self.barrier.is_ready() {
            return Err(PipelineError::NotReady);
        }
        let request = templates::build_request(raw)?;

        self.next_job += 1;
        let id = JobId(self.next_job);

        self.vision_tx
            .send(VisionJob::Encode { id, image: request.image })
            .map_err(|_| PipelineError::ChannelClosed("vision input"))?;
        self.prompt_tx
            .send(GenerationJob::Generate { id, prompt: request.prompt })
            .map_err(|_| PipelineError::ChannelClosed("generation input"))?;

        let done = self
            .completions
            .recv()
            .map_err(|_| PipelineError::ChannelClosed("completions"))?;
        if done.id != id {
            return Err(PipelineError::JobMismatch { expected: id.0, got: done.id.0 });
        }
        Ok(done.response)
    }

    /// Enqueue a stop sentinel on each input queue and join both workers
    /// with a bounded wait.
    pub fn shutdown(mut self) {
        let _ = self.vision_tx.send(VisionJob::Stop);
        let _ = self.prompt_tx.send(GenerationJob::Stop);
        for handle in self.workers.drain(..) {
            let name = handle.name;
            if !handle.join_timeout(self.shutdown_timeout) {
                eprintln!("[COORD] Abandoning {name} worker");
            }
        }
    }

    /// Serve requests from a line reader until EOF. This is the child
    /// process's main loop; answers stream to stdout as they generate.
    pub fn run_interactive<R: BufRead>(mut self, reader: &mut R) -> Result<(), PipelineError> {
        self.wait_ready()?;
        println!("All models loaded, starting interactive mode...");

        loop {
            stdin_loop::print_banner();
            let raw = match stdin_loop::read_request(reader)? {
                Some(r) => r,
                None => break,
            };
            if raw.trim().is_empty() {
                continue;
            }

            match self.submit(&raw) {
                Ok(response) => {
                    if !response.is_success() {
                        println!("Inference failed");
                    }
                }
                Err(PipelineError::MissingImageDelimiter) => {
                    println!("No image path found in input");
                }
                Err(e) if e.is_recoverable() => {
                    eprintln!("[COORD] Request failed: {e}");
                    println!("Inference failed");
                }
                Err(e) => {
                    eprintln!("[COORD] Fatal: {e}");
                    self.shutdown();
                    return Err(e);
                }
            }
        }

        eprintln!("[COORD] Input closed, shutting down");
        self.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::{MockGenerationBackend, MockVisionBackend};
    use crate::backend::{
        AbortHandle, GenerationParams, ImageTensor, RuntimeOptions, TokenCallback,
    };
    use crate::types::{CompletionStatus, Embedding};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn test_image() -> PathBuf {
        let dir = std::env::temp_dir().join("vlm_coordinator_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cat.png");
        image::RgbImage::from_pixel(8, 8, image::Rgb([10, 200, 30]))
            .save(&path)
            .unwrap();
        path
    }

    fn mock_coordinator() -> Coordinator {
        Coordinator::spawn_with_backends(
            &PipelineConfig::default(),
            Box::new(MockVisionBackend::new()),
            Box::new(MockGenerationBackend::new()),
        )
    }

    #[test]
    fn test_sequential_requests_each_produce_one_sealed_response() {
        let mut coord = mock_coordinator();
        coord.wait_ready().unwrap();

        let image = test_image();
        for _ in 0..3 {
            let response = coord
                .submit(&format!("describe {{{{{}}}}}", image.display()))
                .unwrap();
            assert!(response.is_success());
            assert!(!response.answer.is_empty());
        }

        // A bad image still seals exactly one (error) response.
        let response = coord.submit("describe {{/no/such/image.jpg}}").unwrap();
        assert_eq!(response.status, CompletionStatus::Error);
        assert!(response.answer.is_empty());

        coord.shutdown();
    }

    #[test]
    fn test_malformed_request_rejected_before_workers() {
        let mut coord = mock_coordinator();
        coord.wait_ready().unwrap();
        assert!(matches!(
            coord.submit("no delimiter here"),
            Err(PipelineError::MissingImageDelimiter)
        ));
        coord.shutdown();
    }

    /// Vision backend whose load blocks until released, keeping the
    /// barrier closed so pre-ready submissions can be observed.
    struct GatedVisionBackend {
        gate: crossbeam_channel::Receiver<()>,
        inner: MockVisionBackend,
    }

    impl VisionBackend for GatedVisionBackend {
        fn load(&mut self, model_path: &Path) -> Result<(), PipelineError> {
            self.gate.recv().map_err(|_| PipelineError::BackendLoad {
                model: model_path.display().to_string(),
                reason: "gate dropped".to_string(),
            })?;
            self.inner.load(model_path)
        }
        fn configure(&mut self, options: &RuntimeOptions) -> Result<(), PipelineError> {
            self.inner.configure(options)
        }
        fn infer(&mut self, image: &ImageTensor) -> Result<Embedding, PipelineError> {
            self.inner.infer(image)
        }
        fn release(&mut self) {
            self.inner.release();
        }
    }

    #[test]
    fn test_no_request_routed_before_barrier_releases() {
        let (gate_tx, gate_rx) = unbounded();
        let mut coord = Coordinator::spawn_with_backends(
            &PipelineConfig::default(),
            Box::new(GatedVisionBackend { gate: gate_rx, inner: MockVisionBackend::new() }),
            Box::new(MockGenerationBackend::new()),
        );

        let image = test_image();
        let raw = format!("describe {{{{{}}}}}", image.display());
        assert!(matches!(coord.submit(&raw), Err(PipelineError::NotReady)));

        gate_tx.send(()).unwrap();
        coord.wait_ready().unwrap();
        assert!(coord.submit(&raw).unwrap().is_success());
        coord.shutdown();
    }

    /// Counts backend entry-point invocations.
    struct CountingGenerationBackend {
        runs: Arc<AtomicUsize>,
        inner: Mutex<MockGenerationBackend>,
    }

    impl GenerationBackend for CountingGenerationBackend {
        fn init(&mut self, model_path: &Path, on_token: TokenCallback) -> Result<(), PipelineError> {
            self.inner.lock().unwrap().init(model_path, on_token)
        }
        fn run(
            &mut self,
            prompt: &str,
            embedding: &Embedding,
            params: &GenerationParams,
        ) -> Result<(), PipelineError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.inner.lock().unwrap().run(prompt, embedding, params)
        }
        fn abort_handle(&self) -> AbortHandle {
            self.inner.lock().unwrap().abort_handle()
        }
        fn destroy(&mut self) {
            self.inner.lock().unwrap().destroy();
        }
    }

    #[test]
    fn test_encode_failure_skips_generation_backend() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut coord = Coordinator::spawn_with_backends(
            &PipelineConfig::default(),
            Box::new(MockVisionBackend::new()),
            Box::new(CountingGenerationBackend {
                runs: runs.clone(),
                inner: Mutex::new(MockGenerationBackend::new()),
            }),
        );
        coord.wait_ready().unwrap();

        let response = coord.submit("describe {{/definitely/missing.png}}").unwrap();
        assert_eq!(response.status, CompletionStatus::Error);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        // The pipeline stays usable afterwards.
        let image = test_image();
        let response = coord
            .submit(&format!("describe {{{{{}}}}}", image.display()))
            .unwrap();
        assert!(response.is_success());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        coord.shutdown();
    }

    #[test]
    fn test_interactive_loop_serves_until_eof() {
        let coord = mock_coordinator();
        let image = test_image();
        let script = format!("what is in {{{{{}}}}}\n\n\n\n", image.display());
        let mut reader = std::io::Cursor::new(script);
        coord.run_interactive(&mut reader).unwrap();
    }
}
