// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Identifiers and handles shared between the control thread, clients and the
//! helper wire protocol.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::kinds::{BackendKind, HelperKind};

/// Identity of one helper process record.
///
/// Assigned by the registry from a monotonically increasing counter; never
/// reused within a session, so a stale id can only fail lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(u32);

impl HostId {
    /// Wrap a raw id.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw id.
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host-{}", self.0)
    }
}

/// Identity of a client context asking for channels (e.g. one renderer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(u32);

impl ClientId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Compositing surface a resource or buffer is bound to. Zero is the null surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SurfaceId(u32);

impl SurfaceId {
    pub const NULL: SurfaceId = SurfaceId(0);

    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Check if this is the null surface.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Client-chosen identity of a shared buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BufferId(u32);

impl BufferId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

/// Capability report sent by the helper when it acknowledges `Initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HelperInfo {
    pub gl_vendor: String,
    pub gl_renderer: String,
    pub driver_version: String,
    pub driver_vendor: String,
}

/// A client's private channel to a helper process.
///
/// Only meaningful while the helper identified by `host_id` is alive; clients
/// drop their cached copy when that helper crashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub host_id: HostId,
    pub kind: HelperKind,
    pub backend: BackendKind,
    /// Name the helper assigned to the channel endpoint.
    pub name: String,
    pub helper_info: HelperInfo,
}
