// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;

use super::commands::ControlCommand;
use crate::error::{RenderHostError, RequestError, Result};
use crate::events::{HostEventBus, HostEventListener};
use crate::ids::{BufferId, ChannelHandle, ClientId, HostId};
use crate::kinds::{HelperKind, LaunchCause};
use crate::record::RecordSummary;
use crate::registry::RegistrySnapshot;
use crate::reply::Reply;
use crate::wire::{BufferHandle, BufferParams, ResourceParams};

/// Cloneable entry point to the control thread.
///
/// Request methods never block: results arrive through the [`Reply`], which
/// is resolved on the control thread. Callbacks must therefore not call the
/// blocking methods of this handle. The diagnostic methods block until the
/// control thread answers.
#[derive(Clone)]
pub struct ControlHandle {
    command_tx: Sender<ControlCommand>,
    events: Arc<HostEventBus>,
    closed: Arc<AtomicBool>,
}

impl ControlHandle {
    pub(crate) fn new(
        command_tx: Sender<ControlCommand>,
        events: Arc<HostEventBus>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            command_tx,
            events,
            closed,
        }
    }

    fn post(&self, cmd: ControlCommand) {
        if self.closed.load(Ordering::SeqCst) {
            cmd.fail(RequestError::HostShutDown);
            return;
        }
        if let Err(returned) = self.command_tx.send(cmd) {
            returned.into_inner().fail(RequestError::HostShutDown);
        }
    }

    fn send_and_recv<T>(&self, make_cmd: impl FnOnce(Sender<T>) -> ControlCommand) -> Result<T> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RequestError::HostShutDown.into());
        }
        let (answer_tx, answer_rx) = crossbeam_channel::bounded(1);
        self.command_tx
            .send(make_cmd(answer_tx))
            .map_err(|_| RenderHostError::Request(RequestError::HostShutDown))?;
        answer_rx
            .recv()
            .map_err(|_| RenderHostError::Request(RequestError::HostShutDown))
    }

    /// Ask helper `kind` for a channel for `client_id`, launching it if needed.
    pub fn establish_channel(
        &self,
        kind: HelperKind,
        client_id: ClientId,
        cause: LaunchCause,
        reply: Reply<ChannelHandle>,
    ) {
        self.post(ControlCommand::EstablishChannel {
            kind,
            client_id,
            cause,
            reply,
        });
    }

    /// Create a rendering resource on helper `host_id`.
    pub fn create_resource(&self, host_id: HostId, params: ResourceParams, reply: Reply<()>) {
        self.post(ControlCommand::CreateResource {
            host_id,
            params,
            reply,
        });
    }

    /// Allocate a shared buffer on helper `host_id`.
    pub fn create_buffer(&self, host_id: HostId, params: BufferParams, reply: Reply<BufferHandle>) {
        self.post(ControlCommand::CreateBuffer {
            host_id,
            params,
            reply,
        });
    }

    /// Fire-and-forget; no reply is expected from the helper.
    pub fn destroy_buffer(&self, host_id: HostId, id: BufferId, client_id: ClientId, sync_token: u32) {
        self.post(ControlCommand::DestroyBuffer {
            host_id,
            id,
            client_id,
            sync_token,
        });
    }

    /// Offer a program loaded from persistent storage back to helper `host_id`.
    pub fn load_shader(&self, host_id: HostId, key: impl Into<String>, data: impl Into<String>) {
        self.post(ControlCommand::LoadShader {
            host_id,
            key: key.into(),
            data: data.into(),
        });
    }

    /// Find or launch the helper of `kind`. `LaunchCause::NoLaunch` only looks up.
    ///
    /// Returns as soon as the launch is submitted; the handshake completes later.
    pub fn get_or_create(&self, kind: HelperKind, cause: LaunchCause) -> Result<Option<RecordSummary>> {
        self.send_and_recv(|answer| ControlCommand::GetOrCreate {
            kind,
            cause,
            answer,
        })
    }

    /// Look up a live, valid helper by id. Never launches.
    pub fn find_by_id(&self, host_id: HostId) -> Result<Option<RecordSummary>> {
        self.send_and_recv(|answer| ControlCommand::FindById { host_id, answer })
    }

    /// Get a point-in-time view of every record and backend.
    pub fn snapshot(&self) -> Result<RegistrySnapshot> {
        self.send_and_recv(|answer| ControlCommand::Snapshot { answer })
    }

    /// Get the PIDs of every launched helper.
    pub fn live_process_ids(&self) -> Result<Vec<u32>> {
        Ok(self.snapshot()?.process_ids())
    }

    /// Subscribe to host events. The listener is held weakly.
    pub fn subscribe<L: HostEventListener + 'static>(&self, listener: &Arc<L>) {
        self.events.subscribe(listener);
    }

    /// Check if the host has shut down.
    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn request_shutdown(&self) -> bool {
        self.command_tx.send(ControlCommand::Shutdown).is_ok()
    }
}
