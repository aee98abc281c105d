//! Child process lifecycle for the pipeline subprocess.
//!
//! Spawns the `vlm_pipeline` binary with piped stdio, hands the pipe ends
//! to the bridge's IO tasks, and force-kills on teardown if the child did
//! not exit on its own.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::BridgeConfig;
use crate::error::PipelineError;

pub struct ProcessManager {
    child: Mutex<Option<Child>>,
}

impl ProcessManager {
    /// Spawn the pipeline child process.
    pub fn spawn(config: &BridgeConfig) -> Result<Self, PipelineError> {
        let exe = resolve_child_path(config)?;
        log::info!("Spawning pipeline: {} {:?}", exe.display(), config.child_args);

        let child = Command::new(&exe)
            .args(&config.child_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                PipelineError::Config(format!("failed to spawn {}: {e}", exe.display()))
            })?;

        log::info!("Pipeline process started (pid={})", child.id());
        Ok(Self { child: Mutex::new(Some(child)) })
    }

    /// Take the child's stdin handle for the writer task.
    pub fn take_stdin(&self) -> Option<std::process::ChildStdin> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdin.take()))
    }

    /// Take the child's stdout handle for the reader task.
    pub fn take_stdout(&self) -> Option<std::process::ChildStdout> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stdout.take()))
    }

    /// Take the child's stderr handle for diagnostics capture.
    pub fn take_stderr(&self) -> Option<std::process::ChildStderr> {
        self.child
            .lock()
            .ok()
            .and_then(|mut guard| guard.as_mut().and_then(|c| c.stderr.take()))
    }

    pub fn is_alive(&self) -> bool {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(ref mut child) = *guard {
                return matches!(child.try_wait(), Ok(None));
            }
        }
        false
    }

    /// Kill the child immediately and reap it.
    pub fn kill(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(ref mut child) = *guard {
                log::warn!("Killing pipeline process");
                let _ = child.kill();
                let _ = child.wait();
            }
            *guard = None;
        }
    }

    /// Wait for the child to exit on its own; returns `false` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if !self.is_alive() {
                // Reap.
                if let Ok(mut guard) = self.child.lock() {
                    if let Some(ref mut child) = *guard {
                        let _ = child.wait();
                    }
                    *guard = None;
                }
                return true;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        false
    }
}

impl Drop for ProcessManager {
    fn drop(&mut self) {
        self.kill();
    }
}

fn resolve_child_path(config: &BridgeConfig) -> Result<PathBuf, PipelineError> {
    if let Some(path) = &config.child_path {
        return Ok(path.clone());
    }
    let exe = std::env::current_exe()
        .map_err(|e| PipelineError::Config(format!("cannot find own executable: {e}")))?;
    let sibling = exe
        .parent()
        .map(|dir| dir.join("vlm_pipeline"))
        .ok_or_else(|| PipelineError::Config("executable has no parent directory".to_string()))?;
    Ok(sibling)
}
