// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The helper process registry: one slot per helper kind.
//!
//! Owned by the control thread. Finds or launches the record for a kind,
//! validates it against the crash policy, routes inbound traffic by host id
//! and turns disconnects into crash accounting.

use std::sync::Arc;

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::channel::InboundSink;
use crate::config::HostConfig;
use crate::control::ControlCommand;
use crate::crash_policy::{CrashCounters, CrashPolicyTracker};
use crate::error::{HelperFailure, LaunchError, RequestError};
use crate::events::{HostEvent, HostEventBus};
use crate::ids::{BufferId, ChannelHandle, ClientId, HostId};
use crate::kinds::{BackendKind, HelperKind, LaunchCause};
use crate::launcher::{LaunchRequest, LaunchWorker, LaunchedHelper, TerminationStatus};
use crate::record::{HelperProcessRecord, RecordSignal, RecordSummary, Teardown};
use crate::reply::Reply;
use crate::wire::{BufferHandle, BufferParams, HelperMessage, HostMessage, ResourceParams};

/// Crash accounting of one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub backend: BackendKind,
    pub allowed: bool,
    pub counters: CrashCounters,
}

/// Point-in-time view of the registry, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub records: Vec<RecordSummary>,
    pub backends: Vec<BackendStatus>,
    pub access_allowed: bool,
}

impl RegistrySnapshot {
    /// Get the record in the slot of `kind`.
    pub fn record(&self, kind: HelperKind) -> Option<&RecordSummary> {
        self.records.iter().find(|r| r.kind == kind)
    }

    /// Get the crash accounting of `backend`.
    pub fn backend(&self, backend: BackendKind) -> Option<&BackendStatus> {
        self.backends.iter().find(|b| b.backend == backend)
    }

    pub fn process_ids(&self) -> Vec<u32> {
        self.records.iter().filter_map(|r| r.pid).collect()
    }
}

pub(crate) struct HelperRegistry {
    config: HostConfig,
    slots: [Option<HelperProcessRecord>; HelperKind::COUNT],
    last_host_id: u32,
    crash_policy: CrashPolicyTracker,
    launcher: LaunchWorker,
    events: Arc<HostEventBus>,
    control_tx: Sender<ControlCommand>,
}

impl HelperRegistry {
    pub(crate) fn new(
        config: HostConfig,
        launcher: LaunchWorker,
        events: Arc<HostEventBus>,
        control_tx: Sender<ControlCommand>,
    ) -> Self {
        let crash_policy = CrashPolicyTracker::new(config.crash_policy.clone());
        Self {
            config,
            slots: [None, None],
            last_host_id: 0,
            crash_policy,
            launcher,
            events,
            control_tx,
        }
    }

    fn slot(&self, host_id: HostId) -> Option<usize> {
        self.slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.host_id() == host_id))
    }

    fn record_mut(&mut self, host_id: HostId) -> Option<&mut HelperProcessRecord> {
        let index = self.slot(host_id)?;
        self.slots[index].as_mut()
    }

    fn take_record(&mut self, host_id: HostId) -> Option<HelperProcessRecord> {
        let index = self.slot(host_id)?;
        self.slots[index].take()
    }

    /// A record is usable while it is valid and its backend is still allowed.
    fn validate(&mut self, index: usize) -> bool {
        let Some((valid, backend)) = self.slots[index]
            .as_ref()
            .map(|r| (r.is_valid(), r.backend()))
        else {
            return false;
        };
        valid && self.crash_policy.is_allowed(backend)
    }

    /// Live, validated record for `host_id`.
    fn valid_record_mut(&mut self, host_id: HostId) -> Option<&mut HelperProcessRecord> {
        let index = self.slot(host_id)?;
        if !self.validate(index) {
            return None;
        }
        self.slots[index].as_mut()
    }

    /// Record for `kind`, launching one for `cause` if none is usable.
    pub(crate) fn get_or_create(&mut self, kind: HelperKind, cause: LaunchCause) -> Option<HostId> {
        let index = kind.index();
        if self.slots[index].is_some() {
            if self.validate(index) {
                return self.slots[index].as_ref().map(HelperProcessRecord::host_id);
            }
            if let Some(mut stale) = self.slots[index].take() {
                tracing::info!(
                    "[RenderHost] Replacing invalid {} helper {} ({})",
                    kind,
                    stale.host_id(),
                    stale.backend()
                );
                let status = stale.teardown(Teardown::Kill);
                self.publish_exit(&stale, status);
            }
        }

        if !cause.allows_launch() {
            return None;
        }

        let Some(backend) = self.crash_policy.preferred_backend() else {
            tracing::warn!(
                "[RenderHost] Every backend is disabled, not launching a {} helper",
                kind
            );
            return None;
        };

        self.last_host_id += 1;
        let host_id = HostId::new(self.last_host_id);
        let mut record = HelperProcessRecord::new(host_id, kind, backend, cause, &self.config);
        record.send(HostMessage::Initialize);

        let request = LaunchRequest {
            host_id,
            kind,
            backend,
            channel_id: format!("renderhost.{}.{}", std::process::id(), host_id.get()),
            cause,
        };
        tracing::info!(
            "[RenderHost] Launching {} helper {} ({}) for {}",
            kind,
            host_id,
            backend,
            cause
        );

        let sink = InboundSink::new(host_id, self.control_tx.clone());
        if !self.launcher.submit(request, sink) {
            let error = LaunchError::Unavailable("launcher worker has stopped".into());
            tracing::error!("[RenderHost] Cannot launch {}: {}", host_id, error);
            self.events.publish(&HostEvent::HelperLaunchFailed {
                host_id,
                kind,
                backend,
                reason: error.to_string(),
            });
            record.send_outstanding_replies(RequestError::HelperUnavailable);
            return None;
        }

        self.slots[index] = Some(record);
        Some(host_id)
    }

    /// Summary of the live, valid record `host_id`. Never launches.
    pub(crate) fn find_by_id(&mut self, host_id: HostId) -> Option<RecordSummary> {
        self.valid_record_mut(host_id).map(|r| r.summary())
    }

    pub(crate) fn summary_for(&self, host_id: HostId) -> Option<RecordSummary> {
        let index = self.slot(host_id)?;
        self.slots[index].as_ref().map(HelperProcessRecord::summary)
    }

    pub(crate) fn establish_channel(
        &mut self,
        kind: HelperKind,
        client_id: ClientId,
        cause: LaunchCause,
        reply: Reply<ChannelHandle>,
    ) {
        if !self.crash_policy.access_allowed() {
            tracing::debug!("[RenderHost] Channel for {} refused, access disabled", client_id);
            reply.fail(RequestError::AccessDenied);
            return;
        }

        let Some(host_id) = self.get_or_create(kind, cause) else {
            reply.fail(RequestError::HelperUnavailable);
            return;
        };
        match self.record_mut(host_id) {
            Some(record) => record.establish_channel(client_id, reply),
            None => reply.fail(RequestError::HelperUnavailable),
        }
    }

    pub(crate) fn create_resource(&mut self, host_id: HostId, params: ResourceParams, reply: Reply<()>) {
        match self.valid_record_mut(host_id) {
            Some(record) => record.create_resource(params, reply),
            None => reply.fail(RequestError::ChannelLost),
        }
    }

    pub(crate) fn create_buffer(
        &mut self,
        host_id: HostId,
        params: BufferParams,
        reply: Reply<BufferHandle>,
    ) {
        match self.valid_record_mut(host_id) {
            Some(record) => record.create_buffer(params, reply),
            None => reply.fail(RequestError::ChannelLost),
        }
    }

    pub(crate) fn destroy_buffer(
        &mut self,
        host_id: HostId,
        id: BufferId,
        client_id: ClientId,
        sync_token: u32,
    ) {
        if let Some(record) = self.valid_record_mut(host_id) {
            record.destroy_buffer(id, client_id, sync_token);
        }
    }

    pub(crate) fn load_shader(&mut self, host_id: HostId, key: &str, data: String) {
        if let Some(record) = self.valid_record_mut(host_id) {
            record.load_shader(key, data);
        }
    }

    pub(crate) fn on_launch_completed(
        &mut self,
        host_id: HostId,
        result: Result<LaunchedHelper, LaunchError>,
    ) {
        let Some(index) = self.slot(host_id) else {
            tracing::debug!(
                "[RenderHost] Launch of {} completed after its record went away",
                host_id
            );
            return;
        };

        match result {
            Ok(helper) => {
                let pid = helper.process.pid();
                let Some(record) = self.slots[index].as_mut() else {
                    return;
                };
                let (kind, backend, cause) = (record.kind(), record.backend(), record.cause());
                let flushed = record.attach(helper);
                let died_early = record.disconnected_before_launch();

                tracing::info!(
                    "[RenderHost] {} helper {} ({}) launched with PID {:?}",
                    kind,
                    host_id,
                    backend,
                    pid
                );
                self.events.publish(&HostEvent::HelperLaunched {
                    host_id,
                    kind,
                    backend,
                    pid,
                    cause,
                });

                if died_early {
                    self.handle_failure(host_id, HelperFailure::Handshake, Teardown::Disconnected);
                } else if !flushed {
                    tracing::warn!("[RenderHost] Could not send Initialize to {}", host_id);
                }
            }
            Err(e) => {
                tracing::warn!("[RenderHost] Failed to launch helper {}: {}", host_id, e);
                let Some(mut record) = self.slots[index].take() else {
                    return;
                };
                record.send_outstanding_replies(RequestError::HelperUnavailable);
                record.teardown(Teardown::Kill);
                self.events.publish(&HostEvent::HelperLaunchFailed {
                    host_id,
                    kind: record.kind(),
                    backend: record.backend(),
                    reason: e.to_string(),
                });
            }
        }
    }

    pub(crate) fn on_message(&mut self, host_id: HostId, message: HelperMessage) {
        let access_allowed = self.crash_policy.access_allowed();
        let Some(record) = self.record_mut(host_id) else {
            tracing::debug!("[RenderHost] Dropping message for departed helper {}", host_id);
            return;
        };
        let (kind, backend) = (record.kind(), record.backend());

        match record.on_message(message, access_allowed) {
            RecordSignal::None => {}
            RecordSignal::Initialized(info) => {
                tracing::info!(
                    "[RenderHost] Helper {} initialized ({} / {})",
                    host_id,
                    info.gl_vendor,
                    info.gl_renderer
                );
                self.events.publish(&HostEvent::HelperInitialized {
                    host_id,
                    kind,
                    backend,
                    info,
                });
            }
            RecordSignal::InitializeFailed => {
                tracing::warn!("[RenderHost] Helper {} failed to initialize", host_id);
                self.handle_failure(host_id, HelperFailure::Handshake, Teardown::Kill);
            }
            RecordSignal::Anomaly(category) => {
                tracing::warn!(
                    "[RenderHost] Helper {} sent an unmatched {} reply, assuming it is compromised",
                    host_id,
                    category
                );
                self.events
                    .publish(&HostEvent::ProtocolAnomaly { host_id, category });
            }
            RecordSignal::ShaderCached {
                client_id,
                key,
                data,
            } => {
                tracing::trace!("[RenderHost] Helper {} cached program {}", host_id, key);
                self.events.publish(&HostEvent::ShaderCached {
                    host_id,
                    client_id,
                    key,
                    data,
                });
            }
        }
    }

    pub(crate) fn on_disconnected(&mut self, host_id: HostId) {
        let Some(record) = self.record_mut(host_id) else {
            return;
        };

        if !record.is_launched() {
            // The reader can beat the launch result; settle it on attach.
            record.note_disconnect_before_launch();
            return;
        }

        if !record.is_initialized() {
            self.handle_failure(host_id, HelperFailure::Handshake, Teardown::Disconnected);
            return;
        }

        let Some(mut record) = self.take_record(host_id) else {
            return;
        };
        let status = record.teardown(Teardown::Disconnected);
        if status == TerminationStatus::NormalTermination {
            self.publish_exit(&record, status);
        } else {
            self.record_crash(&mut record, HelperFailure::Crash, status);
        }
    }

    /// Remove the record, fail what it owed, count the crash and notify.
    fn handle_failure(&mut self, host_id: HostId, failure: HelperFailure, mode: Teardown) {
        let Some(mut record) = self.take_record(host_id) else {
            return;
        };
        let status = record.teardown(mode);
        self.record_crash(&mut record, failure, status);
    }

    fn record_crash(
        &mut self,
        record: &mut HelperProcessRecord,
        failure: HelperFailure,
        status: TerminationStatus,
    ) {
        let backend = record.backend();
        tracing::warn!(
            "[RenderHost] {} helper {} ({}) failed: {} ({})",
            record.kind(),
            record.host_id(),
            backend,
            failure,
            status
        );

        if record.kind().records_crashes() && record.take_crash_record() {
            let disabled = match failure {
                HelperFailure::Handshake => self.crash_policy.record_handshake_failure(backend),
                HelperFailure::Crash => self.crash_policy.record_crash(backend),
            };
            if disabled {
                self.events.publish(&HostEvent::BackendDisabled { backend });
            }
        }

        self.events.publish(&HostEvent::HelperCrashed {
            host_id: record.host_id(),
            kind: record.kind(),
            backend,
            failure,
            status,
        });
    }

    fn publish_exit(&self, record: &HelperProcessRecord, status: TerminationStatus) {
        self.events.publish(&HostEvent::HelperExited {
            host_id: record.host_id(),
            kind: record.kind(),
            backend: record.backend(),
            status,
        });
    }

    /// Tear down every record in an orderly way and stop the launcher.
    pub(crate) fn shutdown_all(&mut self) {
        let timeout = self.config.launch.shutdown_timeout();
        for index in 0..HelperKind::COUNT {
            if let Some(mut record) = self.slots[index].take() {
                let status = record.teardown(Teardown::Graceful(timeout));
                self.publish_exit(&record, status);
            }
        }
        self.launcher.stop();
    }

    pub(crate) fn snapshot(&mut self) -> RegistrySnapshot {
        self.crash_policy.record_recovery_tick();
        let backends = [BackendKind::Hardware, BackendKind::Software]
            .into_iter()
            .map(|backend| BackendStatus {
                backend,
                allowed: self.crash_policy.is_allowed(backend),
                counters: self.crash_policy.counters(backend).clone(),
            })
            .collect();

        RegistrySnapshot {
            records: self
                .slots
                .iter()
                .flatten()
                .map(HelperProcessRecord::summary)
                .collect(),
            backends,
            access_allowed: self.crash_policy.access_allowed(),
        }
    }
}
