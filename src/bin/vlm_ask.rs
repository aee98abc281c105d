//! Minimal host CLI for the pipeline bridge.
//!
//! Usage: `vlm_ask <image> [question...]`
//!
//! Spawns the `vlm_pipeline` binary as a supervised subprocess, submits one
//! question about one image, and prints the parsed answer. The child binary
//! can be overridden with the `VLM_PIPELINE_BIN` environment variable.

use std::path::Path;

use vlm_pipeline::bridge::PipelineBridge;
use vlm_pipeline::{logger, BridgeConfig, CompletionStatus};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = logger::setup_logging() {
        eprintln!("Warning: file logging disabled: {e}");
    }

    let mut args = std::env::args().skip(1);
    let Some(image) = args.next() else {
        eprintln!("Usage: vlm_ask <image> [question...]");
        std::process::exit(2);
    };
    let question = {
        let rest: Vec<String> = args.collect();
        if rest.is_empty() {
            "Describe this image.".to_string()
        } else {
            rest.join(" ")
        }
    };

    let mut config = BridgeConfig::default();
    if let Ok(path) = std::env::var("VLM_PIPELINE_BIN") {
        config.child_path = Some(path.into());
    }

    eprintln!("Starting pipeline (this may take a while; models are loading)...");
    let mut bridge = PipelineBridge::start(config).await?;

    let reply = bridge.ask(&question, Path::new(&image)).await?;
    match reply.status {
        CompletionStatus::Success => println!("{}", reply.render_markdown()),
        CompletionStatus::Error => {
            eprintln!(
                "Inference failed{}",
                reply
                    .failure
                    .map(|f| format!(": {f}"))
                    .unwrap_or_default()
            );
            bridge.shutdown().await;
            std::process::exit(1);
        }
    }

    bridge.shutdown().await;
    Ok(())
}
