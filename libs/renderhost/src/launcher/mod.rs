// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Spawning and terminating helper processes.
//!
//! The launcher knows nothing about the protocol spoken over the channel it
//! returns. Launches run on a dedicated worker thread because process
//! creation can block; results are posted back to the control thread.

mod child;
mod process_handle;
mod worker;

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

pub use child::ChildProcessLauncher;
pub use process_handle::HelperProcessHandle;
pub(crate) use worker::LaunchWorker;

use crate::channel::{InboundSink, MessageChannel};
use crate::error::LaunchError;
use crate::ids::HostId;
use crate::kinds::{BackendKind, HelperKind, LaunchCause};

/// Exit code requested when the host kills a helper it no longer trusts.
pub const FORCED_SHUTDOWN_EXIT_CODE: i32 = 1;

/// Everything a launcher needs to start one helper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub host_id: HostId,
    pub kind: HelperKind,
    pub backend: BackendKind,
    /// Identifier handed to the helper so it can name its channel endpoint.
    pub channel_id: String,
    pub cause: LaunchCause,
}

/// A started helper: its process and the channel to talk to it.
pub struct LaunchedHelper {
    pub process: Box<dyn HelperProcess>,
    pub channel: Box<dyn MessageChannel>,
}

impl fmt::Debug for LaunchedHelper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchedHelper")
            .field("pid", &self.process.pid())
            .finish_non_exhaustive()
    }
}

/// Process spawn facility.
///
/// `launch` runs on the launcher worker. Inbound traffic and the final
/// disconnect of the returned channel are reported through `sink`.
pub trait ProcessLauncher: Send + Sync + 'static {
    fn launch(
        &self,
        request: &LaunchRequest,
        sink: InboundSink,
    ) -> Result<LaunchedHelper, LaunchError>;
}

/// OS handle of one running helper, owned by its record.
pub trait HelperProcess: Send {
    fn pid(&self) -> Option<u32>;

    /// Current termination status. With `known_dead` the caller already saw
    /// the channel drop, so the process is reaped (and killed if it lingers).
    fn poll_exit(&mut self, known_dead: bool) -> TerminationStatus;

    fn terminate(&mut self, exit_code: i32);

    /// Wait up to `timeout` for a voluntary exit, then terminate.
    fn shutdown(&mut self, _timeout: Duration) -> TerminationStatus {
        self.terminate(FORCED_SHUTDOWN_EXIT_CODE);
        self.poll_exit(true)
    }
}

/// How a helper process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStatus {
    NormalTermination,
    AbnormalTermination(i32),
    ProcessWasKilled,
    ProcessCrashed,
    StillRunning,
    LaunchFailed,
}

impl TerminationStatus {
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if status.success() {
            return Self::NormalTermination;
        }
        if let Some(code) = status.code() {
            return Self::AbnormalTermination(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            match status.signal() {
                Some(libc::SIGKILL) | Some(libc::SIGTERM) | Some(libc::SIGINT) => {
                    Self::ProcessWasKilled
                }
                _ => Self::ProcessCrashed,
            }
        }

        #[cfg(not(unix))]
        {
            Self::ProcessCrashed
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::NormalTermination => "exited normally".to_string(),
            Self::AbnormalTermination(code) => format!("exited with code {}", code),
            Self::ProcessWasKilled => "was killed".to_string(),
            Self::ProcessCrashed => "crashed".to_string(),
            Self::StillRunning => "is still running".to_string(),
            Self::LaunchFailed => "failed to launch".to_string(),
        }
    }
}

impl fmt::Display for TerminationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}
