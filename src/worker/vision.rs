//! Vision worker: image reference in, embedding out.
//!
//! States: Loading → AwaitingBarrier → Idle ⇄ Encoding → Terminated.
//! A load failure is fatal and ends the worker without signaling readiness.
//! A per-image decode failure yields a `Failed` marker instead of an
//! embedding and the worker returns to Idle.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use image::imageops::FilterType;

use crate::backend::{ImageTensor, RuntimeOptions, VisionBackend};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::types::Embedding;

use super::barrier::ReadyBarrier;
use super::{EmbeddingResult, VisionJob, WorkerHandle};

pub fn spawn(
    config: PipelineConfig,
    backend: Box<dyn VisionBackend>,
    jobs: Receiver<VisionJob>,
    embeddings: Sender<EmbeddingResult>,
    barrier: Arc<ReadyBarrier>,
) -> WorkerHandle {
    let join = std::thread::spawn(move || run(config, backend, jobs, embeddings, barrier));
    WorkerHandle::new("vision", join)
}

fn run(
    config: PipelineConfig,
    mut backend: Box<dyn VisionBackend>,
    jobs: Receiver<VisionJob>,
    embeddings: Sender<EmbeddingResult>,
    barrier: Arc<ReadyBarrier>,
) {
    // Loading. Progress goes to stdout like the rest of the pipeline's
    // chatter; the bridge parser filters these lines by prefix.
    if let Ok(meta) = std::fs::metadata(&config.vision_model_path) {
        println!(
            "Start loading vision encoder model (size: {:.2} MB)",
            meta.len() as f64 / 1024.0 / 1024.0
        );
    } else {
        println!("Start loading vision encoder model");
    }
    let load_start = Instant::now();
    if let Err(e) = backend.load(&config.vision_model_path) {
        eprintln!("[VISION] Fatal: {e}");
        return;
    }
    println!(
        "Vision encoder loaded in {:.2} seconds",
        load_start.elapsed().as_secs_f64()
    );
    if let Err(e) = backend.configure(&RuntimeOptions::default()) {
        eprintln!("[VISION] Fatal: runtime init failed: {e}");
        backend.release();
        return;
    }

    // AwaitingBarrier: report loaded, then block until both workers are up.
    barrier.signal_ready();
    barrier.wait();

    // Idle loop. Strictly one job in flight, FIFO.
    loop {
        let job = match jobs.recv() {
            Ok(j) => j,
            // Coordinator dropped the queue; treat like a stop sentinel.
            Err(_) => break,
        };
        match job {
            VisionJob::Stop => break,
            VisionJob::Encode { id, image } => {
                let result = match encode(backend.as_mut(), &image, config.img_size) {
                    Ok(embedding) => EmbeddingResult::Ready { id, embedding },
                    Err(e) => {
                        eprintln!("[VISION] Encode failed for job {id}: {e}");
                        EmbeddingResult::Failed { id }
                    }
                };
                if embeddings.send(result).is_err() {
                    break;
                }
            }
        }
    }

    backend.release();
    eprintln!("[VISION] Exiting");
}

/// Decode, resize and run the backend on one image.
fn encode(
    backend: &mut dyn VisionBackend,
    path: &Path,
    img_size: u32,
) -> Result<Embedding, PipelineError> {
    let tensor = load_image_tensor(path, img_size)?;
    let infer_start = Instant::now();
    let embedding = backend.infer(&tensor)?;
    println!(
        "Vision encoder inference time: {:.2} seconds",
        infer_start.elapsed().as_secs_f64()
    );
    let _ = std::io::stdout().flush();
    Ok(embedding)
}

/// Preprocess an image file into the backend's expected tensor: square
/// resize, RGB, f32 in the 0..255 range, NHWC with batch dim 1.
fn load_image_tensor(path: &Path, img_size: u32) -> Result<ImageTensor, PipelineError> {
    let img = image::open(path)
        .map_err(|e| PipelineError::EncodeFailed(format!("{}: {e}", path.display())))?;
    println!("Start vision inference...");
    let rgb = img
        .resize_exact(img_size, img_size, FilterType::Triangle)
        .to_rgb8();
    let data = rgb.pixels().flat_map(|p| p.0.map(f32::from)).collect();
    Ok(ImageTensor { data, width: img_size, height: img_size })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockVisionBackend;
    use crate::types::JobId;
    use crossbeam_channel::unbounded;

    fn write_test_png(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("probe.png");
        let img = image::RgbImage::from_pixel(8, 8, image::Rgb([120, 40, 200]));
        img.save(&path).unwrap();
        path
    }

    #[test]
    fn test_load_image_tensor_shape() {
        let dir = std::env::temp_dir().join("vlm_vision_tensor_test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_test_png(&dir);

        let tensor = load_image_tensor(&path, 16).unwrap();
        assert_eq!(tensor.data.len(), 16 * 16 * 3);
        assert!(tensor.data.iter().all(|v| (0.0..=255.0).contains(v)));
    }

    #[test]
    fn test_missing_image_yields_failure_marker_not_crash() {
        let (job_tx, job_rx) = unbounded();
        let (emb_tx, emb_rx) = unbounded();
        let barrier = Arc::new(ReadyBarrier::new(1));

        let handle = spawn(
            PipelineConfig::default(),
            Box::new(MockVisionBackend::new()),
            job_rx,
            emb_tx,
            barrier,
        );

        job_tx
            .send(VisionJob::Encode { id: JobId(1), image: "no/such/file.jpg".into() })
            .unwrap();
        match emb_rx.recv().unwrap() {
            EmbeddingResult::Failed { id } => assert_eq!(id, JobId(1)),
            EmbeddingResult::Ready { .. } => panic!("expected encode failure"),
        }

        // Worker is still alive and serves the next job.
        let dir = std::env::temp_dir().join("vlm_vision_worker_test");
        std::fs::create_dir_all(&dir).unwrap();
        let good = write_test_png(&dir);
        job_tx.send(VisionJob::Encode { id: JobId(2), image: good }).unwrap();
        match emb_rx.recv().unwrap() {
            EmbeddingResult::Ready { id, embedding } => {
                assert_eq!(id, JobId(2));
                assert!(!embedding.is_empty());
            }
            EmbeddingResult::Failed { .. } => panic!("expected embedding"),
        }

        job_tx.send(VisionJob::Stop).unwrap();
        assert!(handle.join_timeout(std::time::Duration::from_secs(5)));
    }
}
