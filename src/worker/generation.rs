//! Generation worker: (prompt, embedding) in, streamed answer out.
//!
//! States mirror the vision worker. `Generating` is driven by the backend's
//! token callback, rerouted through a bounded channel into this thread so
//! the callback never blocks inside backend code while we aggregate, echo,
//! and seal the response.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::backend::{GenerationBackend, GenerationParams};
use crate::config::PipelineConfig;
use crate::types::{Embedding, PipelineResponse, TimingInfo, TokenFragment, TokenState};

use super::barrier::ReadyBarrier;
use super::{Completion, EmbeddingResult, GenerationJob, WorkerHandle};

/// Fragments buffered between the backend callback and the worker loop.
const FRAGMENT_CHANNEL_CAPACITY: usize = 64;

/// Rule line bounding the performance table on stdout. The bridge parser
/// keys on this exact width, so it must not change.
const TABLE_RULE: &str =
    "--------------------------------------------------------------------------------------";

pub fn spawn(
    config: PipelineConfig,
    backend: Box<dyn GenerationBackend>,
    jobs: Receiver<GenerationJob>,
    embeddings: Receiver<EmbeddingResult>,
    completions: Sender<Completion>,
    barrier: Arc<ReadyBarrier>,
) -> WorkerHandle {
    let join =
        std::thread::spawn(move || run(config, backend, jobs, embeddings, completions, barrier));
    WorkerHandle::new("generation", join)
}

fn run(
    config: PipelineConfig,
    mut backend: Box<dyn GenerationBackend>,
    jobs: Receiver<GenerationJob>,
    embeddings: Receiver<EmbeddingResult>,
    completions: Sender<Completion>,
    barrier: Arc<ReadyBarrier>,
) {
    // Loading.
    if let Ok(meta) = std::fs::metadata(&config.language_model_path) {
        println!(
            "Start loading language model (size: {:.2} MB)",
            meta.len() as f64 / 1024.0 / 1024.0
        );
    } else {
        println!("Start loading language model");
    }
    let (frag_tx, frag_rx) = bounded::<TokenFragment>(FRAGMENT_CHANNEL_CAPACITY);
    let load_start = Instant::now();
    let callback_tx = frag_tx.clone();
    if let Err(e) = backend.init(
        &config.language_model_path,
        Box::new(move |fragment| {
            // Receiver gone means the worker is exiting; drop the fragment.
            let _ = callback_tx.send(fragment);
        }),
    ) {
        eprintln!("[LLM] Fatal: {e}");
        return;
    }
    println!(
        "Language model loaded in {:.2} seconds",
        load_start.elapsed().as_secs_f64()
    );

    barrier.signal_ready();
    barrier.wait();

    let params = GenerationParams::default();
    let deadline = Duration::from_secs(config.generation_timeout_secs);

    loop {
        let job = match jobs.recv() {
            Ok(j) => j,
            Err(_) => break,
        };
        let (id, prompt) = match job {
            GenerationJob::Stop => break,
            GenerationJob::Generate { id, prompt } => (id, prompt),
        };

        // The embedding channel is fed in lockstep with the prompt queue;
        // the id check turns any future violation into a loud error.
        let response = match embeddings.recv() {
            Err(_) => break,
            Ok(EmbeddingResult::Failed { id: emb_id }) => {
                if emb_id != id {
                    eprintln!("[LLM] Correlation mismatch: job {id}, failure marker {emb_id}");
                }
                println!("Error processing image");
                PipelineResponse::error()
            }
            Ok(EmbeddingResult::Ready { id: emb_id, embedding }) => {
                if emb_id != id {
                    eprintln!("[LLM] Correlation mismatch: job {id}, embedding {emb_id}");
                    PipelineResponse::error()
                } else {
                    generate(backend.as_mut(), &frag_rx, &prompt, &embedding, &params, deadline)
                }
            }
        };

        if completions.send(Completion { id, response }).is_err() {
            break;
        }
    }

    backend.destroy();
    eprintln!("[LLM] Exiting");
}

/// Drive one generation call: run the backend on a scoped thread, drain the
/// fragment channel here, seal on FINISH/ERROR or on the deadline.
fn generate(
    backend: &mut dyn GenerationBackend,
    frag_rx: &Receiver<TokenFragment>,
    prompt: &str,
    embedding: &Embedding,
    params: &GenerationParams,
    deadline: Duration,
) -> PipelineResponse {
    // Discard fragments left over from a previously aborted call.
    while frag_rx.try_recv().is_ok() {}

    let abort = backend.abort_handle();
    abort.reset();

    let started = Instant::now();
    let mut answer = String::new();
    let mut first_token: Option<Duration> = None;
    let mut token_count = 0usize;
    let mut finished = false;

    let run_result = std::thread::scope(|s| {
        let runner = s.spawn(|| backend.run(prompt, embedding, params));

        loop {
            match frag_rx.recv_timeout(deadline) {
                Ok(fragment) => match fragment.state {
                    TokenState::Normal => {
                        if first_token.is_none() {
                            let elapsed = started.elapsed();
                            println!("Time to first token: {:.2} seconds", elapsed.as_secs_f64());
                            first_token = Some(elapsed);
                        }
                        token_count += 1;
                        print!("{}", fragment.text);
                        let _ = std::io::stdout().flush();
                        answer.push_str(&fragment.text);
                    }
                    TokenState::Finish => {
                        println!("\n\n(finished)");
                        finished = true;
                        break;
                    }
                    TokenState::Error => {
                        println!("\nError occurred during LLM call");
                        break;
                    }
                },
                Err(RecvTimeoutError::Timeout) => {
                    eprintln!("[LLM] No token within {deadline:?}, aborting backend call");
                    abort.abort();
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        runner.join()
    });

    match run_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            eprintln!("[LLM] Backend call failed: {e}");
            finished = false;
        }
        Err(_) => {
            eprintln!("[LLM] Backend call panicked");
            finished = false;
        }
    }

    if !finished {
        return PipelineResponse::error();
    }

    let generation_time = started.elapsed();
    let timing = TimingInfo {
        time_to_first_token: first_token.unwrap_or(generation_time),
        generation_time,
        generated_tokens: token_count,
        tokens_per_sec: token_count as f64 / generation_time.as_secs_f64().max(1e-9),
    };
    print_performance_table(&timing);
    PipelineResponse::success(answer, timing)
}

/// Fixed-width table bounded by two rule lines, mirroring the NPU runtime's
/// own stats dump. The bridge preserves it verbatim as a fenced block.
fn print_performance_table(timing: &TimingInfo) {
    println!("{TABLE_RULE}");
    println!(" {:<12} {:>10} {:>12} {:>16}", "Stage", "Tokens", "Time (s)", "Speed (tok/s)");
    println!(
        " {:<12} {:>10} {:>12.2} {:>16.2}",
        "Generate",
        timing.generated_tokens,
        timing.generation_time.as_secs_f64(),
        timing.tokens_per_sec
    );
    println!("{TABLE_RULE}");
    let _ = std::io::stdout().flush();
}
