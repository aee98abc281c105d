//! Pipeline child process entry point.
//!
//! Runs the coordinator and both workers, serving requests over stdio.
//! Stdout carries the line protocol (banner, streamed answer, markers);
//! diagnostics go to stderr, which the supervising bridge captures.

use std::io;
use std::path::Path;

use vlm_pipeline::{Coordinator, PipelineConfig};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let config = match args.windows(2).find(|w| w[0] == "--config") {
        Some(pair) => PipelineConfig::from_file(Path::new(&pair[1]))?,
        None => PipelineConfig::default(),
    };

    eprintln!(
        "[COORD] Starting pipeline (pid={}, backend={})",
        std::process::id(),
        config.backend
    );

    let coordinator = Coordinator::spawn(&config)?;
    let stdin = io::stdin();
    let mut reader = stdin.lock();
    coordinator.run_interactive(&mut reader)?;
    Ok(())
}
