// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use super::commands::ControlCommand;
use crate::error::RequestError;
use crate::registry::HelperRegistry;

pub(crate) trait CommandReceiver {
    fn process_command(&mut self, cmd: ControlCommand);
}

impl CommandReceiver for HelperRegistry {
    fn process_command(&mut self, cmd: ControlCommand) {
        match cmd {
            ControlCommand::EstablishChannel {
                kind,
                client_id,
                cause,
                reply,
            } => self.establish_channel(kind, client_id, cause, reply),
            ControlCommand::CreateResource {
                host_id,
                params,
                reply,
            } => self.create_resource(host_id, params, reply),
            ControlCommand::CreateBuffer {
                host_id,
                params,
                reply,
            } => self.create_buffer(host_id, params, reply),
            ControlCommand::DestroyBuffer {
                host_id,
                id,
                client_id,
                sync_token,
            } => self.destroy_buffer(host_id, id, client_id, sync_token),
            ControlCommand::LoadShader { host_id, key, data } => {
                self.load_shader(host_id, &key, data)
            }
            ControlCommand::GetOrCreate {
                kind,
                cause,
                answer,
            } => {
                let summary = self
                    .get_or_create(kind, cause)
                    .and_then(|host_id| self.summary_for(host_id));
                let _ = answer.send(summary);
            }
            ControlCommand::FindById { host_id, answer } => {
                let _ = answer.send(self.find_by_id(host_id));
            }
            ControlCommand::Snapshot { answer } => {
                let _ = answer.send(self.snapshot());
            }
            ControlCommand::LaunchCompleted { host_id, result } => {
                self.on_launch_completed(host_id, result)
            }
            ControlCommand::Inbound { host_id, message } => self.on_message(host_id, message),
            ControlCommand::Disconnected { host_id } => self.on_disconnected(host_id),
            ControlCommand::Shutdown => {}
        }
    }
}

/// The control thread: sole owner of the registry and everything in it.
pub(crate) struct ControlContext {
    registry: HelperRegistry,
    commands: Receiver<ControlCommand>,
    closed: Arc<AtomicBool>,
}

impl ControlContext {
    pub(crate) fn new(
        registry: HelperRegistry,
        commands: Receiver<ControlCommand>,
        closed: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry,
            commands,
            closed,
        }
    }

    pub(crate) fn run(mut self) {
        tracing::info!("[RenderHost] Control thread started");

        while let Ok(cmd) = self.commands.recv() {
            if matches!(cmd, ControlCommand::Shutdown) {
                break;
            }
            self.registry.process_command(cmd);
        }

        tracing::info!("[RenderHost] Shutting down helpers");
        self.closed.store(true, Ordering::SeqCst);
        self.registry.shutdown_all();

        let mut refused = 0;
        for cmd in self.commands.try_iter() {
            cmd.fail(RequestError::HostShutDown);
            refused += 1;
        }
        if refused > 0 {
            tracing::debug!("[RenderHost] Refused {} command(s) posted during shutdown", refused);
        }
        tracing::info!("[RenderHost] Control thread stopped");
    }
}
