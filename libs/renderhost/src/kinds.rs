// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use serde::{Deserialize, Serialize};

/// Registry slot of a helper process. At most one live record per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HelperKind {
    /// The rendering helper. Runs sandboxed and feeds the crash policy.
    Sandboxed,
    /// Fallback helper used for capability probing; its crashes are reported
    /// but never counted against a backend.
    Unsandboxed,
}

impl HelperKind {
    pub const COUNT: usize = 2;
    pub const ALL: [HelperKind; Self::COUNT] = [HelperKind::Sandboxed, HelperKind::Unsandboxed];

    pub(crate) fn index(self) -> usize {
        match self {
            Self::Sandboxed => 0,
            Self::Unsandboxed => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sandboxed => "sandboxed",
            Self::Unsandboxed => "unsandboxed",
        }
    }

    /// Whether a crash of this kind counts against its backend.
    pub fn records_crashes(self) -> bool {
        matches!(self, Self::Sandboxed)
    }
}

impl fmt::Display for HelperKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rendering backend a helper was launched with. Crash accounting is per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Hardware,
    /// Software rasterizer; the fallback once hardware is disabled.
    Software,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hardware => "hardware",
            Self::Software => "software",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a helper is being requested. `NoLaunch` turns a request into a pure lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchCause {
    NoLaunch,
    BrowserStartup,
    Canvas2d,
    Webgl,
    VideoDecode,
    Compositing,
    GetInfo,
    EstablishChannel,
}

impl LaunchCause {
    pub fn allows_launch(self) -> bool {
        !matches!(self, Self::NoLaunch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoLaunch => "no_launch",
            Self::BrowserStartup => "browser_startup",
            Self::Canvas2d => "canvas_2d",
            Self::Webgl => "webgl",
            Self::VideoDecode => "video_decode",
            Self::Compositing => "compositing",
            Self::GetInfo => "get_info",
            Self::EstablishChannel => "establish_channel",
        }
    }
}

impl fmt::Display for LaunchCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
