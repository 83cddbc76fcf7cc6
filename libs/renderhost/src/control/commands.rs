// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crossbeam_channel::Sender;

use crate::error::{LaunchError, RequestError};
use crate::ids::{BufferId, ChannelHandle, ClientId, HostId};
use crate::kinds::{HelperKind, LaunchCause};
use crate::launcher::LaunchedHelper;
use crate::record::RecordSummary;
use crate::registry::RegistrySnapshot;
use crate::reply::Reply;
use crate::wire::{BufferHandle, BufferParams, HelperMessage, ResourceParams};

type Answer<T> = Sender<T>;

/// Everything that reaches the control thread, from clients, the launcher
/// worker and channel readers alike.
pub(crate) enum ControlCommand {
    EstablishChannel {
        kind: HelperKind,
        client_id: ClientId,
        cause: LaunchCause,
        reply: Reply<ChannelHandle>,
    },
    CreateResource {
        host_id: HostId,
        params: ResourceParams,
        reply: Reply<()>,
    },
    CreateBuffer {
        host_id: HostId,
        params: BufferParams,
        reply: Reply<BufferHandle>,
    },
    DestroyBuffer {
        host_id: HostId,
        id: BufferId,
        client_id: ClientId,
        sync_token: u32,
    },
    LoadShader {
        host_id: HostId,
        key: String,
        data: String,
    },
    GetOrCreate {
        kind: HelperKind,
        cause: LaunchCause,
        answer: Answer<Option<RecordSummary>>,
    },
    FindById {
        host_id: HostId,
        answer: Answer<Option<RecordSummary>>,
    },
    Snapshot {
        answer: Answer<RegistrySnapshot>,
    },
    LaunchCompleted {
        host_id: HostId,
        result: Result<LaunchedHelper, LaunchError>,
    },
    Inbound {
        host_id: HostId,
        message: HelperMessage,
    },
    Disconnected {
        host_id: HostId,
    },
    Shutdown,
}

impl ControlCommand {
    /// Resolve whatever reply this command carries with `error`. Blocking
    /// answers are simply dropped; their callers see a closed channel.
    pub(crate) fn fail(self, error: RequestError) {
        match self {
            Self::EstablishChannel { reply, .. } => reply.fail(error),
            Self::CreateResource { reply, .. } => reply.fail(error),
            Self::CreateBuffer { reply, .. } => reply.fail(error),
            _ => {}
        }
    }
}
