//! Host-side handle to the pipeline subprocess.
//!
//! Spawns the child, runs a stdin writer task and a stdout reader thread,
//! and reconstructs structured replies from the child's free-form output.
//! Reads are deadline-bounded per phase (startup, per-request) because the
//! text-marker protocol has no reliable end-of-stream signal.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::config::BridgeConfig;
use crate::error::PipelineError;

use super::process_manager::ProcessManager;
use super::protocol::{markers, BridgeReply, ResponseParser};

/// One unit from the stdout reader thread.
enum StdoutEvent {
    Line(String),
    /// The pipe closed: the child exited or closed its stdout.
    Eof,
}

pub struct PipelineBridge {
    process: ProcessManager,
    /// Lines handed to the stdin writer task. Dropped on shutdown so the
    /// child sees EOF and exits its request loop.
    cmd_tx: Option<mpsc::UnboundedSender<String>>,
    line_rx: mpsc::UnboundedReceiver<StdoutEvent>,
    stderr_buf: Arc<Mutex<Vec<String>>>,
    config: BridgeConfig,
}

impl PipelineBridge {
    /// Spawn the child and wait for its request banner.
    ///
    /// The child never prints a dedicated ready message; readiness is the
    /// first appearance of the recurring input banner. Until then no
    /// request may be sent.
    pub async fn start(config: BridgeConfig) -> Result<Self, PipelineError> {
        let process = ProcessManager::spawn(&config)?;

        let stdin = process
            .take_stdin()
            .ok_or(PipelineError::ChannelClosed("child stdin"))?;
        let stdout = process
            .take_stdout()
            .ok_or(PipelineError::ChannelClosed("child stdout"))?;
        let stderr = process
            .take_stderr()
            .ok_or(PipelineError::ChannelClosed("child stderr"))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(stdin_writer_task(cmd_rx, stdin));

        // Pipe reads are blocking; run them on real threads feeding async
        // channels (blank lines are kept, the parser needs them).
        let (line_tx, line_rx) = mpsc::unbounded_channel::<StdoutEvent>();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                match line {
                    Ok(l) => {
                        if line_tx.send(StdoutEvent::Line(l)).is_err() {
                            return;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = line_tx.send(StdoutEvent::Eof);
        });

        let stderr_buf: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let stderr_sink = stderr_buf.clone();
        std::thread::spawn(move || {
            let reader = BufReader::new(stderr);
            for line in reader.lines().map_while(Result::ok) {
                log::info!("[child] {line}");
                if let Ok(mut buf) = stderr_sink.lock() {
                    buf.push(line);
                }
            }
        });

        let mut bridge = Self {
            process,
            cmd_tx: Some(cmd_tx),
            line_rx,
            stderr_buf,
            config,
        };
        bridge.await_banner().await?;
        Ok(bridge)
    }

    async fn await_banner(&mut self) -> Result<(), PipelineError> {
        let timeout = Duration::from_secs(self.config.startup_timeout_secs);
        let started = Instant::now();
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                self.process.kill();
                return Err(PipelineError::StartupTimeout {
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    stderr: self.stderr_tail(),
                });
            }
            match tokio::time::timeout(remaining, self.line_rx.recv()).await {
                Err(_) => {
                    self.process.kill();
                    return Err(PipelineError::StartupTimeout {
                        elapsed_secs: started.elapsed().as_secs_f64(),
                        stderr: self.stderr_tail(),
                    });
                }
                Ok(None) | Ok(Some(StdoutEvent::Eof)) => {
                    self.process.kill();
                    return Err(PipelineError::ChildExited(self.stderr_tail()));
                }
                Ok(Some(StdoutEvent::Line(line))) => {
                    log::debug!("startup: {line}");
                    if line.contains(markers::READY_BANNER) {
                        log::info!(
                            "Pipeline ready after {:.1}s",
                            started.elapsed().as_secs_f64()
                        );
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Submit one question about one image and block until the reply seals.
    ///
    /// Wire format: the image reference goes inside a doubled-brace
    /// delimiter on the first line, the question on the next, then exactly
    /// three empty lines as the child's end-of-input marker.
    pub async fn ask(
        &mut self,
        question: &str,
        image_path: &Path,
    ) -> Result<BridgeReply, PipelineError> {
        let image_line = format!("Read the image in {{{{{}}}}} carefully.", image_path.display());
        self.send_line(&image_line)?;
        self.send_line(question)?;
        for _ in 0..3 {
            self.send_line("")?;
        }

        let timeout = Duration::from_secs(self.config.request_timeout_secs);
        let started = Instant::now();
        let mut parser = ResponseParser::new();

        while !parser.is_terminal() {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                // The child's state is suspect now; the caller should
                // restart it rather than reuse this bridge.
                return Err(PipelineError::RequestTimeout {
                    elapsed_secs: started.elapsed().as_secs_f64(),
                });
            }
            match tokio::time::timeout(remaining, self.line_rx.recv()).await {
                Err(_) => {
                    return Err(PipelineError::RequestTimeout {
                        elapsed_secs: started.elapsed().as_secs_f64(),
                    });
                }
                Ok(None) | Ok(Some(StdoutEvent::Eof)) => {
                    parser.fail(format!("process exited: {}", self.stderr_tail()));
                }
                Ok(Some(StdoutEvent::Line(line))) => {
                    log::debug!("stdout: {line}");
                    parser.push_line(&line);
                }
            }
        }

        Ok(parser.into_reply())
    }

    fn send_line(&self, line: &str) -> Result<(), PipelineError> {
        self.cmd_tx
            .as_ref()
            .ok_or(PipelineError::ChannelClosed("child stdin"))?
            .send(line.to_string())
            .map_err(|_| PipelineError::ChannelClosed("child stdin"))
    }

    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    /// Last captured stderr lines, newest last.
    pub fn stderr_tail(&self) -> String {
        match self.stderr_buf.lock() {
            Ok(buf) => {
                let start = buf.len().saturating_sub(20);
                buf[start..].join("\n")
            }
            Err(_) => String::new(),
        }
    }

    /// Close the child's stdin and wait for it to exit; kill on timeout.
    pub async fn shutdown(mut self) {
        // Dropping the sender ends the writer task, which closes the
        // child's stdin; the child's request loop exits on EOF.
        self.cmd_tx = None;
        let process = self.process;
        let _ = tokio::task::spawn_blocking(move || {
            if !process.wait_timeout(Duration::from_secs(5)) {
                process.kill();
            }
        })
        .await;
    }
}

/// Writes request lines to the child's stdin, one per send, flushing each.
async fn stdin_writer_task(
    mut cmd_rx: mpsc::UnboundedReceiver<String>,
    mut stdin: std::process::ChildStdin,
) {
    while let Some(line) = cmd_rx.recv().await {
        if writeln!(stdin, "{line}").is_err() {
            log::error!("Failed to write to pipeline stdin");
            break;
        }
        if stdin.flush().is_err() {
            log::error!("Failed to flush pipeline stdin");
            break;
        }
    }
    log::debug!("Stdin writer task exiting");
}
