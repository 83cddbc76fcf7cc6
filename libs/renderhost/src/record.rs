// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! One live helper process and everything waiting on it.
//!
//! A record lives on the control thread only. It owns the process handle,
//! the channel, the three reply queues and the per-client shader caches.
//! Every queued request is failed before the process and channel are
//! released, whatever the reason for teardown.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::Serialize;

use crate::channel::MessageChannel;
use crate::config::HostConfig;
use crate::error::RequestError;
use crate::ids::{BufferId, ChannelHandle, ClientId, HelperInfo, HostId, SurfaceId};
use crate::kinds::{BackendKind, HelperKind, LaunchCause};
use crate::launcher::{FORCED_SHUTDOWN_EXIT_CODE, HelperProcess, LaunchedHelper, TerminationStatus};
use crate::queue::{BufferRequest, ChannelRequest, RequestQueues, ResourceRequest};
use crate::reply::Reply;
use crate::shader_cache::ShaderCaches;
use crate::wire::{
    BufferHandle, BufferParams, HelperMessage, HostMessage, ReplyCategory, ResourceCreationResult,
    ResourceParams,
};

/// What the registry has to act on after an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordSignal {
    None,
    Initialized(HelperInfo),
    InitializeFailed,
    Anomaly(ReplyCategory),
    /// A program was stored and should be handed to the embedder.
    ShaderCached {
        client_id: ClientId,
        key: String,
        data: String,
    },
}

/// How a record is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Teardown {
    /// The channel dropped on its own.
    Disconnected,
    /// The host no longer trusts the helper.
    Kill,
    /// Orderly host shutdown.
    Graceful(Duration),
}

/// Diagnostic view of one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSummary {
    pub host_id: HostId,
    pub kind: HelperKind,
    pub backend: BackendKind,
    pub cause: LaunchCause,
    pub pid: Option<u32>,
    pub launched: bool,
    pub initialized: bool,
    pub valid: bool,
    pub pending_channels: usize,
    pub pending_resources: usize,
    pub pending_buffers: usize,
    pub live_surfaces: usize,
    pub shader_clients: usize,
}

pub(crate) struct HelperProcessRecord {
    host_id: HostId,
    kind: HelperKind,
    backend: BackendKind,
    cause: LaunchCause,
    process: Option<Box<dyn HelperProcess>>,
    channel: Option<Box<dyn MessageChannel>>,
    /// Messages sent before the launch completed, flushed in order on attach.
    outbound: VecDeque<HostMessage>,
    launched: bool,
    initialized: bool,
    valid: bool,
    crash_recorded: bool,
    disconnected_before_launch: bool,
    queues: RequestQueues,
    surface_refs: HashMap<SurfaceId, usize>,
    shader_caches: ShaderCaches,
    info: HelperInfo,
}

impl HelperProcessRecord {
    pub(crate) fn new(
        host_id: HostId,
        kind: HelperKind,
        backend: BackendKind,
        cause: LaunchCause,
        config: &HostConfig,
    ) -> Self {
        Self {
            host_id,
            kind,
            backend,
            cause,
            process: None,
            channel: None,
            outbound: VecDeque::new(),
            launched: false,
            initialized: false,
            valid: true,
            crash_recorded: false,
            disconnected_before_launch: false,
            queues: RequestQueues::new(),
            surface_refs: HashMap::new(),
            shader_caches: ShaderCaches::new(config.shader_cache.clone()),
            info: HelperInfo::default(),
        }
    }

    pub(crate) fn host_id(&self) -> HostId {
        self.host_id
    }

    pub(crate) fn kind(&self) -> HelperKind {
        self.kind
    }

    pub(crate) fn backend(&self) -> BackendKind {
        self.backend
    }

    pub(crate) fn cause(&self) -> LaunchCause {
        self.cause
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn is_launched(&self) -> bool {
        self.launched
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    /// Returns true the first time only; a record feeds the crash policy once.
    pub(crate) fn take_crash_record(&mut self) -> bool {
        if self.crash_recorded || !self.launched {
            return false;
        }
        self.crash_recorded = true;
        true
    }

    pub(crate) fn note_disconnect_before_launch(&mut self) {
        self.disconnected_before_launch = true;
    }

    pub(crate) fn disconnected_before_launch(&self) -> bool {
        self.disconnected_before_launch
    }

    /// Take ownership of the launched process and flush queued messages.
    /// Returns false if flushing failed.
    pub(crate) fn attach(&mut self, helper: LaunchedHelper) -> bool {
        self.process = Some(helper.process);
        self.channel = Some(helper.channel);
        self.launched = true;

        tracing::debug!(
            "[RenderHost] Helper {} launched, flushing {} queued message(s)",
            self.host_id,
            self.outbound.len()
        );
        while let Some(message) = self.outbound.pop_front() {
            if !self.send(message) {
                self.outbound.clear();
                return false;
            }
        }
        true
    }

    /// Send now, or queue until the launch completes. A failed send fails
    /// every outstanding request and invalidates the record so callers can
    /// retry against a new process right away.
    pub(crate) fn send(&mut self, message: HostMessage) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            if self.launched {
                return false;
            }
            self.outbound.push_back(message);
            return true;
        };

        if channel.send(&message) {
            return true;
        }

        tracing::warn!(
            "[RenderHost] Send to helper {} failed, failing outstanding requests",
            self.host_id
        );
        self.send_outstanding_replies(RequestError::SendFailed);
        false
    }

    /// Fail every queued request and mark the record unusable.
    pub(crate) fn send_outstanding_replies(&mut self, error: RequestError) -> usize {
        self.valid = false;
        let failed = self.queues.fail_all(error);
        if failed > 0 {
            tracing::debug!(
                "[RenderHost] Failed {} outstanding request(s) on helper {}",
                failed,
                self.host_id
            );
        }
        failed
    }

    pub(crate) fn establish_channel(
        &mut self,
        client_id: ClientId,
        reply: Reply<ChannelHandle>,
    ) {
        if self.send(HostMessage::EstablishChannel { client_id }) {
            self.queues.channels.enqueue(ChannelRequest { client_id, reply });
        } else {
            reply.fail(RequestError::SendFailed);
        }
        self.shader_caches.create_for_client(client_id);
    }

    pub(crate) fn create_resource(&mut self, params: ResourceParams, reply: Reply<()>) {
        if params.surface_id.is_null() {
            tracing::warn!(
                "[RenderHost] Resource for {} requested on the null surface",
                params.client_id
            );
            reply.fail(RequestError::Rejected);
            return;
        }

        let surface_id = params.surface_id;
        if self.send(HostMessage::CreateResource(params.clone())) {
            self.queues.resources.enqueue(ResourceRequest { params, reply });
            self.add_surface_ref(surface_id);
        } else {
            reply.fail(RequestError::ChannelLost);
        }
    }

    pub(crate) fn create_buffer(&mut self, params: BufferParams, reply: Reply<BufferHandle>) {
        let surface_id = params.surface_id;
        if self.send(HostMessage::CreateBuffer(params.clone())) {
            self.queues.buffers.enqueue(BufferRequest { params, reply });
            if !surface_id.is_null() {
                self.add_surface_ref(surface_id);
            }
        } else {
            reply.fail(RequestError::ChannelLost);
        }
    }

    pub(crate) fn destroy_buffer(&mut self, id: BufferId, client_id: ClientId, sync_token: u32) {
        self.send(HostMessage::DestroyBuffer {
            id,
            client_id,
            sync_token,
        });
    }

    /// Hand a stored program back to the helper if it was built by the same driver.
    pub(crate) fn load_shader(&mut self, key: &str, data: String) -> bool {
        if !self.shader_caches.matches_prefix(key) {
            return false;
        }
        self.send(HostMessage::LoadedShader { data })
    }

    fn add_surface_ref(&mut self, surface_id: SurfaceId) {
        *self.surface_refs.entry(surface_id).or_insert(0) += 1;
    }

    fn release_surface_ref(&mut self, surface_id: SurfaceId) {
        if let Some(count) = self.surface_refs.get_mut(&surface_id) {
            *count -= 1;
            if *count == 0 {
                self.surface_refs.remove(&surface_id);
            }
        }
    }

    pub(crate) fn live_surface_count(&self) -> usize {
        self.surface_refs.len()
    }

    pub(crate) fn on_message(&mut self, message: HelperMessage, access_allowed: bool) -> RecordSignal {
        match message {
            HelperMessage::Initialized { ok: true, info } => {
                self.initialized = true;
                self.shader_caches.set_helper_info(&info);
                self.info = info.clone();
                RecordSignal::Initialized(info)
            }
            HelperMessage::Initialized { ok: false, .. } => RecordSignal::InitializeFailed,
            HelperMessage::ChannelEstablished { name } => {
                self.on_channel_established(name, access_allowed)
            }
            HelperMessage::ResourceCreated { result } => self.on_resource_created(result),
            HelperMessage::ResourceDestroyed { surface_id } => {
                self.release_surface_ref(surface_id);
                RecordSignal::None
            }
            HelperMessage::BufferCreated { handle } => self.on_buffer_created(handle),
            HelperMessage::CacheShader {
                client_id,
                key,
                data,
            } => match self.shader_caches.cache(client_id, &key, data.clone()) {
                Some(key) => RecordSignal::ShaderCached {
                    client_id,
                    key,
                    data,
                },
                None => RecordSignal::None,
            },
            HelperMessage::DestroyChannel { client_id } => {
                self.shader_caches.remove_client(client_id);
                RecordSignal::None
            }
            HelperMessage::LogMessage { level, message } => {
                match level.as_str() {
                    "error" => tracing::error!("[Helper {}] {}", self.host_id, message),
                    "warn" | "warning" => tracing::warn!("[Helper {}] {}", self.host_id, message),
                    "debug" => tracing::debug!("[Helper {}] {}", self.host_id, message),
                    _ => tracing::info!("[Helper {}] {}", self.host_id, message),
                }
                RecordSignal::None
            }
        }
    }

    fn on_channel_established(&mut self, name: Option<String>, access_allowed: bool) -> RecordSignal {
        let Some(request) = self.queues.channels.dequeue() else {
            return RecordSignal::Anomaly(ReplyCategory::EstablishChannel);
        };

        match name {
            Some(name) if !access_allowed => {
                tracing::warn!(
                    "[RenderHost] Access revoked while establishing channel for {}, closing it",
                    request.client_id
                );
                self.send(HostMessage::CloseChannel { name });
                request.reply.fail(RequestError::AccessDenied);
            }
            Some(name) => {
                tracing::debug!(
                    "[RenderHost] Channel '{}' established for {} on helper {}",
                    name,
                    request.client_id,
                    self.host_id
                );
                request.reply.resolve(Ok(ChannelHandle {
                    host_id: self.host_id,
                    kind: self.kind,
                    backend: self.backend,
                    name,
                    helper_info: self.info.clone(),
                }));
            }
            None => request.reply.fail(RequestError::Rejected),
        }
        RecordSignal::None
    }

    fn on_resource_created(&mut self, result: ResourceCreationResult) -> RecordSignal {
        let Some(request) = self.queues.resources.dequeue() else {
            return RecordSignal::Anomaly(ReplyCategory::CreateResource);
        };

        match result {
            ResourceCreationResult::Succeeded => request.reply.resolve(Ok(())),
            ResourceCreationResult::Failed => {
                self.release_surface_ref(request.params.surface_id);
                request.reply.fail(RequestError::Rejected);
            }
        }
        RecordSignal::None
    }

    fn on_buffer_created(&mut self, handle: Option<BufferHandle>) -> RecordSignal {
        let Some(request) = self.queues.buffers.dequeue() else {
            return RecordSignal::Anomaly(ReplyCategory::CreateBuffer);
        };

        let surface_id = request.surface_id();
        if !surface_id.is_null() {
            self.release_surface_ref(surface_id);
        }
        match handle {
            Some(handle) => request.reply.resolve(Ok(handle)),
            None => request.reply.fail(RequestError::Rejected),
        }
        RecordSignal::None
    }

    /// Fail everything queued, then release the channel and the process.
    pub(crate) fn teardown(&mut self, mode: Teardown) -> TerminationStatus {
        self.valid = false;
        self.outbound.clear();
        self.queues.fail_all(RequestError::ChannelLost);

        if let (Teardown::Graceful(_), Some(channel)) = (mode, self.channel.as_mut()) {
            channel.send(&HostMessage::Shutdown);
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }

        let status = match self.process.take() {
            Some(mut process) => match mode {
                Teardown::Disconnected => process.poll_exit(true),
                Teardown::Kill => {
                    process.terminate(FORCED_SHUTDOWN_EXIT_CODE);
                    process.poll_exit(true)
                }
                Teardown::Graceful(timeout) => process.shutdown(timeout),
            },
            None => TerminationStatus::LaunchFailed,
        };

        tracing::info!(
            "[RenderHost] {} helper {} ({}) {}",
            self.kind,
            self.host_id,
            self.backend,
            status
        );
        status
    }

    pub(crate) fn summary(&self) -> RecordSummary {
        RecordSummary {
            host_id: self.host_id,
            kind: self.kind,
            backend: self.backend,
            cause: self.cause,
            pid: self.pid(),
            launched: self.launched,
            initialized: self.initialized,
            valid: self.valid,
            pending_channels: self.queues.channels.len(),
            pending_resources: self.queues.resources.len(),
            pending_buffers: self.queues.buffers.len(),
            live_surfaces: self.surface_refs.len(),
            shader_clients: self.shader_caches.client_count(),
        }
    }
}

impl Drop for HelperProcessRecord {
    fn drop(&mut self) {
        if self.process.is_some() || self.queues.pending() > 0 {
            self.teardown(Teardown::Kill);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::ReplyResult;
    use crate::wire::{BufferFormat, BufferHandleKind, BufferUsage};
    use crossbeam_channel::{Receiver, Sender};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct TestChannel {
        sent: Sender<HostMessage>,
        fail: Arc<Mutex<bool>>,
    }

    impl MessageChannel for TestChannel {
        fn send(&mut self, message: &HostMessage) -> bool {
            !*self.fail.lock() && self.sent.send(message.clone()).is_ok()
        }

        fn close(&mut self) {}
    }

    struct TestProcess;

    impl HelperProcess for TestProcess {
        fn pid(&self) -> Option<u32> {
            Some(42)
        }

        fn poll_exit(&mut self, _known_dead: bool) -> TerminationStatus {
            TerminationStatus::ProcessCrashed
        }

        fn terminate(&mut self, _exit_code: i32) {}
    }

    fn launched_record() -> (HelperProcessRecord, Receiver<HostMessage>, Arc<Mutex<bool>>) {
        let mut record = HelperProcessRecord::new(
            HostId::new(1),
            HelperKind::Sandboxed,
            BackendKind::Hardware,
            LaunchCause::Webgl,
            &HostConfig::default(),
        );
        let (tx, rx) = crossbeam_channel::unbounded();
        let fail = Arc::new(Mutex::new(false));
        assert!(record.send(HostMessage::Initialize));
        assert!(rx.try_recv().is_err());
        assert!(record.attach(LaunchedHelper {
            process: Box::new(TestProcess),
            channel: Box::new(TestChannel {
                sent: tx,
                fail: Arc::clone(&fail),
            }),
        }));
        assert_eq!(rx.try_recv().unwrap(), HostMessage::Initialize);
        (record, rx, fail)
    }

    fn buffer_params(id: u32, surface: u32) -> BufferParams {
        BufferParams {
            id: BufferId::new(id),
            width: 16,
            height: 16,
            format: BufferFormat::Bgra8888,
            usage: BufferUsage::Scanout,
            client_id: ClientId::new(1),
            surface_id: SurfaceId::new(surface),
        }
    }

    #[test]
    fn test_messages_queue_until_attach() {
        let (record, _rx, _fail) = launched_record();
        assert!(record.is_launched());
        assert_eq!(record.pid(), Some(42));
    }

    #[test]
    fn test_channel_reply_carries_helper_info() {
        let (mut record, rx, _fail) = launched_record();
        let info = HelperInfo {
            gl_vendor: "Acme".into(),
            ..HelperInfo::default()
        };
        assert_eq!(
            record.on_message(
                HelperMessage::Initialized {
                    ok: true,
                    info: info.clone()
                },
                true
            ),
            RecordSignal::Initialized(info.clone())
        );

        let (reply, result) = Reply::channel();
        record.establish_channel(ClientId::new(3), reply);
        assert_eq!(
            rx.try_recv().unwrap(),
            HostMessage::EstablishChannel {
                client_id: ClientId::new(3)
            }
        );

        record.on_message(
            HelperMessage::ChannelEstablished {
                name: Some("chan".into()),
            },
            true,
        );
        let handle = result.recv().unwrap().unwrap();
        assert_eq!(handle.name, "chan");
        assert_eq!(handle.helper_info, info);
        assert_eq!(record.summary().shader_clients, 1);
    }

    #[test]
    fn test_cached_shader_key_is_accepted_back() {
        let (mut record, rx, _fail) = launched_record();
        record.on_message(
            HelperMessage::Initialized {
                ok: true,
                info: HelperInfo::default(),
            },
            true,
        );
        let (reply, _result) = Reply::channel();
        record.establish_channel(ClientId::new(3), reply);
        rx.try_recv().unwrap();

        let signal = record.on_message(
            HelperMessage::CacheShader {
                client_id: ClientId::new(3),
                key: "blit".into(),
                data: "binary".into(),
            },
            true,
        );
        let (client_id, key, data) = match signal {
            RecordSignal::ShaderCached {
                client_id,
                key,
                data,
            } => (client_id, key, data),
            other => panic!("expected ShaderCached, got {:?}", other),
        };
        assert_eq!(client_id, ClientId::new(3));
        assert!(key.ends_with(":blit"));

        assert!(record.load_shader(&key, data));
        assert_eq!(
            rx.try_recv().unwrap(),
            HostMessage::LoadedShader {
                data: "binary".into()
            }
        );

        // Clients without a cache store nothing.
        assert_eq!(
            record.on_message(
                HelperMessage::CacheShader {
                    client_id: ClientId::new(8),
                    key: "blit".into(),
                    data: "binary".into(),
                },
                true,
            ),
            RecordSignal::None
        );
    }

    #[test]
    fn test_revoked_access_closes_channel() {
        let (mut record, rx, _fail) = launched_record();
        let (reply, result) = Reply::channel();
        record.establish_channel(ClientId::new(3), reply);
        rx.try_recv().unwrap();

        record.on_message(
            HelperMessage::ChannelEstablished {
                name: Some("chan".into()),
            },
            false,
        );
        assert_eq!(result.recv().unwrap(), Err(RequestError::AccessDenied));
        assert_eq!(
            rx.try_recv().unwrap(),
            HostMessage::CloseChannel {
                name: "chan".into()
            }
        );
    }

    #[test]
    fn test_unmatched_reply_is_an_anomaly() {
        let (mut record, _rx, _fail) = launched_record();
        assert_eq!(
            record.on_message(HelperMessage::BufferCreated { handle: None }, true),
            RecordSignal::Anomaly(ReplyCategory::CreateBuffer)
        );
        assert!(record.is_valid());
    }

    #[test]
    fn test_null_surface_fails_without_wire_message() {
        let (mut record, rx, _fail) = launched_record();
        let (reply, result) = Reply::channel();
        record.create_resource(
            ResourceParams {
                client_id: ClientId::new(1),
                surface_id: SurfaceId::NULL,
                route_id: 1,
            },
            reply,
        );
        assert_eq!(result.recv().unwrap(), Err(RequestError::Rejected));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_surface_refs_follow_replies() {
        let (mut record, _rx, _fail) = launched_record();
        let (reply, _result) = Reply::channel();
        record.create_resource(
            ResourceParams {
                client_id: ClientId::new(1),
                surface_id: SurfaceId::new(7),
                route_id: 1,
            },
            reply,
        );
        let (reply, buffer) = Reply::<BufferHandle>::channel();
        record.create_buffer(buffer_params(1, 8), reply);
        assert_eq!(record.live_surface_count(), 2);

        record.on_message(
            HelperMessage::BufferCreated {
                handle: Some(BufferHandle {
                    id: BufferId::new(1),
                    kind: BufferHandleKind::NativePixmap,
                    stride: 64,
                }),
            },
            true,
        );
        assert_eq!(buffer.recv().unwrap().unwrap().stride, 64);
        assert_eq!(record.live_surface_count(), 1);

        record.on_message(
            HelperMessage::ResourceCreated {
                result: ResourceCreationResult::Succeeded,
            },
            true,
        );
        assert_eq!(record.live_surface_count(), 1);
        record.on_message(
            HelperMessage::ResourceDestroyed {
                surface_id: SurfaceId::new(7),
            },
            true,
        );
        assert_eq!(record.live_surface_count(), 0);
    }

    #[test]
    fn test_send_failure_fails_outstanding_and_invalidates() {
        let (mut record, _rx, fail) = launched_record();
        let results: Arc<Mutex<Vec<ReplyResult<BufferHandle>>>> = Arc::default();
        for id in 0..2 {
            let results = Arc::clone(&results);
            record.create_buffer(
                buffer_params(id, 0),
                Reply::new(move |r| results.lock().push(r)),
            );
        }
        assert_eq!(record.summary().pending_buffers, 2);

        *fail.lock() = true;
        let (reply, third) = Reply::channel();
        record.create_buffer(buffer_params(3, 0), reply);

        assert_eq!(
            *results.lock(),
            vec![Err(RequestError::SendFailed), Err(RequestError::SendFailed)]
        );
        assert_eq!(third.recv().unwrap(), Err(RequestError::ChannelLost));
        assert!(!record.is_valid());
        assert_eq!(record.summary().pending_buffers, 0);
    }

    #[test]
    fn test_teardown_fails_pending_and_counts_once() {
        let (mut record, _rx, _fail) = launched_record();
        let (reply, first) = Reply::<BufferHandle>::channel();
        record.create_buffer(buffer_params(1, 0), reply);

        assert_eq!(
            record.teardown(Teardown::Disconnected),
            TerminationStatus::ProcessCrashed
        );
        assert_eq!(first.recv().unwrap(), Err(RequestError::ChannelLost));
        assert!(record.take_crash_record());
        assert!(!record.take_crash_record());
    }

    #[test]
    fn test_graceful_teardown_sends_shutdown_first() {
        let (mut record, rx, _fail) = launched_record();
        let (reply, pending) = Reply::<BufferHandle>::channel();
        record.create_buffer(buffer_params(1, 0), reply);
        rx.try_recv().unwrap();

        // `TestProcess` keeps the default `shutdown`, which terminates.
        assert_eq!(
            record.teardown(Teardown::Graceful(Duration::from_millis(10))),
            TerminationStatus::ProcessCrashed
        );
        assert_eq!(pending.recv().unwrap(), Err(RequestError::ChannelLost));
        assert_eq!(rx.try_recv().unwrap(), HostMessage::Shutdown);
        assert!(record.pid().is_none());
    }

    #[test]
    fn test_unlaunched_record_never_counts() {
        let mut record = HelperProcessRecord::new(
            HostId::new(9),
            HelperKind::Sandboxed,
            BackendKind::Software,
            LaunchCause::Canvas2d,
            &HostConfig::default(),
        );
        assert_eq!(record.teardown(Teardown::Kill), TerminationStatus::LaunchFailed);
        assert!(!record.take_crash_record());
    }
}
