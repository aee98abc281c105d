//! Long-lived worker threads, one per backend.
//!
//! Each worker owns exactly one backend handle and processes one job at a
//! time from its input queue, strictly FIFO. A `Stop` sentinel unblocks the
//! idle wait and causes an orderly exit with backend teardown.

pub mod barrier;
pub mod generation;
pub mod vision;

use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::types::{Embedding, JobId, PipelineResponse};

/// Input queue values for the vision worker.
pub enum VisionJob {
    Encode { id: JobId, image: PathBuf },
    /// Stop processing and exit.
    Stop,
}

/// Embedding handoff from the vision worker to the generation worker.
pub enum EmbeddingResult {
    Ready { id: JobId, embedding: Embedding },
    /// Encoding failed; the generation worker must skip its backend call.
    Failed { id: JobId },
}

/// Input queue values for the generation worker.
pub enum GenerationJob {
    Generate { id: JobId, prompt: String },
    Stop,
}

/// Sealed per-request outcome delivered back to the coordinator.
pub struct Completion {
    pub id: JobId,
    pub response: PipelineResponse,
}

/// Join handle plus name for shutdown diagnostics.
pub struct WorkerHandle {
    pub name: &'static str,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn new(name: &'static str, join: JoinHandle<()>) -> Self {
        Self { name, join }
    }

    /// Bounded join: poll until the thread finishes or the timeout elapses.
    /// Returns `false` (and leaks the handle) on timeout.
    pub fn join_timeout(self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.join.is_finished() {
            if Instant::now() >= deadline {
                eprintln!("[COORD] {} worker did not exit within {timeout:?}", self.name);
                return false;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let _ = self.join.join();
        true
    }
}
