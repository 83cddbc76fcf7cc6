// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Messages exchanged with a helper process and their framing.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON body, the same
//! bridge framing used for other subprocess hosts. The host only relies on
//! reply categories for correlation; payloads are opaque to the queues.

use std::fmt;
use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ids::{BufferId, ClientId, HelperInfo, SurfaceId};

/// Upper bound on a single frame body.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Host → helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum HostMessage {
    Initialize,
    EstablishChannel { client_id: ClientId },
    CreateResource(ResourceParams),
    CreateBuffer(BufferParams),
    DestroyBuffer {
        id: BufferId,
        client_id: ClientId,
        sync_token: u32,
    },
    CloseChannel { name: String },
    LoadedShader { data: String },
    Shutdown,
}

/// Helper → host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum HelperMessage {
    Initialized {
        ok: bool,
        #[serde(default)]
        info: HelperInfo,
    },
    /// `name` is `None` when the helper could not create the channel.
    ChannelEstablished { name: Option<String> },
    ResourceCreated { result: ResourceCreationResult },
    ResourceDestroyed { surface_id: SurfaceId },
    /// `handle` is `None` when allocation failed.
    BufferCreated { handle: Option<BufferHandle> },
    CacheShader {
        client_id: ClientId,
        key: String,
        data: String,
    },
    DestroyChannel { client_id: ClientId },
    LogMessage { level: String, message: String },
}

impl HelperMessage {
    /// Reply category this message resolves, if it is a reply at all.
    pub fn reply_category(&self) -> Option<ReplyCategory> {
        match self {
            Self::ChannelEstablished { .. } => Some(ReplyCategory::EstablishChannel),
            Self::ResourceCreated { .. } => Some(ReplyCategory::CreateResource),
            Self::BufferCreated { .. } => Some(ReplyCategory::CreateBuffer),
            _ => None,
        }
    }
}

/// The three request/reply streams correlated per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyCategory {
    EstablishChannel,
    CreateResource,
    CreateBuffer,
}

impl fmt::Display for ReplyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EstablishChannel => "establish_channel",
            Self::CreateResource => "create_resource",
            Self::CreateBuffer => "create_buffer",
        })
    }
}

/// Parameters for a surface-bound rendering resource (command buffer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceParams {
    pub client_id: ClientId,
    pub surface_id: SurfaceId,
    pub route_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCreationResult {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferFormat {
    Rgba8888,
    Bgra8888,
    Yuv420,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferUsage {
    Map,
    PersistentMap,
    Scanout,
}

/// Parameters for a shared buffer allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferParams {
    pub id: BufferId,
    pub width: u32,
    pub height: u32,
    pub format: BufferFormat,
    pub usage: BufferUsage,
    pub client_id: ClientId,
    /// Surface the buffer will be presented to; `SurfaceId::NULL` if none.
    #[serde(default)]
    pub surface_id: SurfaceId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferHandleKind {
    SharedMemory,
    NativePixmap,
}

/// Handle to a buffer allocated by the helper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferHandle {
    pub id: BufferId,
    pub kind: BufferHandleKind,
    pub stride: u32,
}

/// Encode one length-prefixed JSON frame.
pub fn encode_frame<T: Serialize>(message: &T) -> io::Result<Vec<u8>> {
    let body = serde_json::to_vec(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if body.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", body.len()),
        ));
    }
    let mut frame = Vec::with_capacity(4 + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Write one length-prefixed JSON frame and flush.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, message: &T) -> io::Result<()> {
    writer.write_all(&encode_frame(message)?)?;
    writer.flush()
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream between frames.
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> io::Result<Option<T>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds limit", len),
        ));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
