// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Helper-process host for GPU rendering.
//!
//! A [`RenderHost`] owns a control thread holding the registry of helper
//! processes (at most one per [`HelperKind`]), the reply queues of each
//! helper and the crash policy. Clients reach it through a
//! [`ChannelEstablishClient`] or a raw [`ControlHandle`]; helpers are started
//! by a [`ProcessLauncher`] on a separate worker thread.

pub mod channel;
pub mod client;
pub mod config;
pub mod control;
pub mod crash_policy;
pub mod error;
pub mod events;
pub mod host;
pub mod ids;
pub mod kinds;
pub mod launcher;
pub mod queue;
pub mod record;
pub mod registry;
pub mod reply;
pub mod shader_cache;
pub mod wire;

pub use channel::{InboundSink, MessageChannel, StdioMessageChannel};
pub use client::{ChannelEstablishClient, ChannelObserver, ClientState};
pub use config::{BackendCrashLimits, CrashPolicyConfig, HostConfig, LaunchConfig, ShaderCacheConfig};
pub use control::ControlHandle;
pub use crash_policy::{CrashCounters, CrashPolicyTracker};
pub use error::{HelperFailure, LaunchError, RenderHostError, RequestError, Result};
pub use events::{HostEvent, HostEventBus, HostEventListener};
pub use host::RenderHost;
pub use ids::{BufferId, ChannelHandle, ClientId, HelperInfo, HostId, SurfaceId};
pub use kinds::{BackendKind, HelperKind, LaunchCause};
pub use launcher::{
    ChildProcessLauncher, HelperProcess, HelperProcessHandle, LaunchRequest, LaunchedHelper,
    ProcessLauncher, TerminationStatus,
};
pub use record::RecordSummary;
pub use registry::{BackendStatus, RegistrySnapshot};
pub use reply::{Reply, ReplyResult};
pub use wire::{
    BufferFormat, BufferHandle, BufferHandleKind, BufferParams, BufferUsage, HelperMessage,
    HostMessage, ReplyCategory, ResourceCreationResult, ResourceParams,
};
