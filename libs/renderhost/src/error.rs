// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use thiserror::Error;

use crate::launcher::TerminationStatus;

/// Failure to bring a helper process up. Never counted as a crash: the
/// process never ran.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Helper executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to spawn helper '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Helper exited before handshake: {}", .0.describe())]
    ExitedBeforeHandshake(TerminationStatus),

    #[error("Helper pipes unavailable: {0}")]
    Pipes(String),

    #[error("Launcher unavailable: {0}")]
    Unavailable(String),
}

/// Failure delivered to a request callback. Every pending request resolves
/// with either its result or one of these, exactly once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("No helper process is available")]
    HelperUnavailable,

    #[error("Helper channel lost before the request completed")]
    ChannelLost,

    #[error("Failed to send request to helper")]
    SendFailed,

    #[error("Access to the rendering helper is disabled")]
    AccessDenied,

    #[error("Helper rejected the request")]
    Rejected,

    #[error("No channel established")]
    NoChannel,

    #[error("Render host has shut down")]
    HostShutDown,
}

/// Crate-level error for setup operations (config, threads, I/O).
#[derive(Error, Debug)]
pub enum RenderHostError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, RenderHostError>;

/// How a launched helper failed. Launch failures and protocol anomalies
/// are reported through their own events and never reach the crash policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperFailure {
    /// Spawned but did not acknowledge `Initialize`.
    Handshake,
    /// Died after a successful handshake.
    Crash,
}

impl fmt::Display for HelperFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Handshake => "handshake",
            Self::Crash => "crash",
        })
    }
}
