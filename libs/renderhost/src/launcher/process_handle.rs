// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! OS process handle of a spawned helper.

use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus};
use std::time::{Duration, Instant};

use super::{HelperProcess, TerminationStatus};
use crate::error::LaunchError;

/// How long a helper whose channel dropped may take to finish exiting before
/// it is killed.
const KNOWN_DEAD_GRACE: Duration = Duration::from_millis(500);

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Handle to a running helper subprocess. Killed on drop if still running.
pub struct HelperProcessHandle {
    child: Child,
    name: String,
    exit_status: Option<ExitStatus>,
}

impl HelperProcessHandle {
    /// Spawn a helper from a fully built command.
    pub fn spawn(mut command: Command, name: &str) -> Result<Self, LaunchError> {
        let child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LaunchError::ExecutableNotFound(name.to_string())
            } else {
                LaunchError::Spawn {
                    program: name.to_string(),
                    source: e,
                }
            }
        })?;

        tracing::info!("[Launcher] Spawned helper '{}' with PID {}", name, child.id());

        Ok(Self {
            child,
            name: name.to_string(),
            exit_status: None,
        })
    }

    /// Get the helper name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take the helper's stdin pipe.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.child.stdin.take()
    }

    /// Take the helper's stdout pipe.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Non-blocking exit check. The status is remembered once observed.
    pub fn try_wait(&mut self) -> Option<ExitStatus> {
        if self.exit_status.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exit_status = status,
                Err(e) => {
                    tracing::warn!("[Launcher] Failed to check helper '{}' status: {}", self.name, e);
                }
            }
        }
        self.exit_status
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        self.try_wait().is_none()
    }

    fn wait_for_exit(&mut self, timeout: Duration) -> Option<ExitStatus> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.try_wait() {
                return Some(status);
            }
            if start.elapsed() >= timeout {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn kill_and_reap(&mut self) -> TerminationStatus {
        if let Err(e) = self.child.kill() {
            tracing::warn!("[Launcher] Failed to kill helper '{}': {}", self.name, e);
        }
        match self.child.wait() {
            Ok(status) => {
                self.exit_status = Some(status);
                TerminationStatus::from_exit_status(status)
            }
            Err(e) => {
                tracing::warn!("[Launcher] Failed to reap helper '{}': {}", self.name, e);
                TerminationStatus::ProcessWasKilled
            }
        }
    }
}

impl HelperProcess for HelperProcessHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn poll_exit(&mut self, known_dead: bool) -> TerminationStatus {
        if !known_dead {
            return match self.try_wait() {
                Some(status) => TerminationStatus::from_exit_status(status),
                None => TerminationStatus::StillRunning,
            };
        }

        match self.wait_for_exit(KNOWN_DEAD_GRACE) {
            Some(status) => TerminationStatus::from_exit_status(status),
            None => {
                tracing::warn!(
                    "[Launcher] Helper '{}' lost its channel but kept running, killing",
                    self.name
                );
                self.kill_and_reap()
            }
        }
    }

    fn terminate(&mut self, exit_code: i32) {
        if !self.is_running() {
            return;
        }
        // std can only deliver SIGKILL; the exit code is informational.
        tracing::warn!(
            "[Launcher] Terminating helper '{}' (requested exit code {})",
            self.name,
            exit_code
        );
        self.kill_and_reap();
    }

    fn shutdown(&mut self, timeout: Duration) -> TerminationStatus {
        if let Some(status) = self.wait_for_exit(timeout) {
            tracing::info!("[Launcher] Helper '{}' exited with status: {:?}", self.name, status);
            return TerminationStatus::from_exit_status(status);
        }

        tracing::warn!(
            "[Launcher] Helper '{}' did not exit within {:?}, force killing",
            self.name,
            timeout
        );
        self.kill_and_reap()
    }
}

impl Drop for HelperProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!(
                "[Launcher] Handle for helper '{}' dropped while still running, killing",
                self.name
            );
            self.kill_and_reap();
        }
    }
}
