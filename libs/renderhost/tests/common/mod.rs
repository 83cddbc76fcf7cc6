// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-memory launcher and helpers for driving a [`RenderHost`] from tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use renderhost::{
    ClientId, HelperInfo, HelperMessage, HelperProcess, HostConfig, HostEvent, HostEventListener,
    HostMessage, InboundSink, LaunchError, LaunchRequest, LaunchedHelper, MessageChannel,
    ProcessLauncher, RenderHost, TerminationStatus,
};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("renderhost=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Test-side view of one launched fake helper.
pub struct FakeHelper {
    pub request: LaunchRequest,
    pub sink: InboundSink,
    pub outbound: Receiver<HostMessage>,
    pub pid: u32,
    status: Arc<Mutex<TerminationStatus>>,
    fail_sends: Arc<AtomicBool>,
    terminated: Arc<AtomicBool>,
}

impl FakeHelper {
    /// Next message the host sent, failing the test if none arrives.
    pub fn expect_message(&self) -> HostMessage {
        self.outbound
            .recv_timeout(TIMEOUT)
            .unwrap_or_else(|e| panic!("helper {} got no message: {}", self.request.host_id, e))
    }

    pub fn try_message(&self) -> Option<HostMessage> {
        self.outbound.try_recv().ok()
    }

    pub fn send(&self, message: HelperMessage) {
        assert!(self.sink.deliver(message), "host is gone");
    }

    /// Read `Initialize` and acknowledge it.
    pub fn initialize(&self) {
        assert_eq!(self.expect_message(), HostMessage::Initialize);
        self.send(HelperMessage::Initialized {
            ok: true,
            info: fake_info(),
        });
    }

    /// Read an `EstablishChannel` request and answer it with a named channel.
    pub fn accept_channel(&self) -> ClientId {
        match self.expect_message() {
            HostMessage::EstablishChannel { client_id } => {
                self.send(HelperMessage::ChannelEstablished {
                    name: Some(format!("chan-{}-{}", self.request.host_id.get(), client_id.get())),
                });
                client_id
            }
            other => panic!("expected EstablishChannel, got {:?}", other),
        }
    }

    /// Die with `status` and drop the channel.
    pub fn crash_with(&self, status: TerminationStatus) {
        *self.status.lock() = status;
        self.sink.disconnected();
    }

    pub fn crash(&self) {
        self.crash_with(TerminationStatus::ProcessCrashed);
    }

    /// Make every further host → helper send fail.
    pub fn break_pipe(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn was_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

pub fn fake_info() -> HelperInfo {
    HelperInfo {
        gl_vendor: "Fake Vendor".into(),
        gl_renderer: "Fake Renderer".into(),
        driver_version: "1.0".into(),
        driver_vendor: "Fake".into(),
    }
}

struct FakeChannel {
    tx: Sender<HostMessage>,
    fail_sends: Arc<AtomicBool>,
}

impl MessageChannel for FakeChannel {
    fn send(&mut self, message: &HostMessage) -> bool {
        !self.fail_sends.load(Ordering::SeqCst) && self.tx.send(message.clone()).is_ok()
    }

    fn close(&mut self) {}
}

struct FakeProcess {
    pid: u32,
    status: Arc<Mutex<TerminationStatus>>,
    terminated: Arc<AtomicBool>,
}

impl HelperProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn poll_exit(&mut self, _known_dead: bool) -> TerminationStatus {
        if self.terminated.load(Ordering::SeqCst) {
            return TerminationStatus::ProcessWasKilled;
        }
        *self.status.lock()
    }

    fn terminate(&mut self, _exit_code: i32) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    fn shutdown(&mut self, _timeout: Duration) -> TerminationStatus {
        *self.status.lock() = TerminationStatus::NormalTermination;
        TerminationStatus::NormalTermination
    }
}

/// Launcher that hands each "process" to the test instead of spawning one.
pub struct FakeLauncher {
    helpers: Sender<FakeHelper>,
    launches: AtomicUsize,
    next_pid: AtomicU32,
    fail_launches: AtomicBool,
}

impl FakeLauncher {
    pub fn new() -> (Arc<Self>, Receiver<FakeHelper>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let launcher = Arc::new(Self {
            helpers: tx,
            launches: AtomicUsize::new(0),
            next_pid: AtomicU32::new(1000),
            fail_launches: AtomicBool::new(false),
        });
        (launcher, rx)
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(
        &self,
        request: &LaunchRequest,
        sink: InboundSink,
    ) -> Result<LaunchedHelper, LaunchError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(LaunchError::ExecutableNotFound("fake-helper".into()));
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let status = Arc::new(Mutex::new(TerminationStatus::StillRunning));
        let fail_sends = Arc::new(AtomicBool::new(false));
        let terminated = Arc::new(AtomicBool::new(false));
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let _ = self.helpers.send(FakeHelper {
            request: request.clone(),
            sink,
            outbound: rx,
            pid,
            status: Arc::clone(&status),
            fail_sends: Arc::clone(&fail_sends),
            terminated: Arc::clone(&terminated),
        });

        Ok(LaunchedHelper {
            process: Box::new(FakeProcess {
                pid,
                status,
                terminated,
            }),
            channel: Box::new(FakeChannel { tx, fail_sends }),
        })
    }
}

/// Records every host event and lets tests wait for specific ones.
pub struct EventRecorder {
    events: Mutex<Vec<HostEvent>>,
    tx: Sender<HostEvent>,
    rx: Receiver<HostEvent>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            tx,
            rx,
        })
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().clone()
    }

    /// Wait for the next event matching `pred`, skipping others.
    pub fn wait_for(&self, pred: impl Fn(&HostEvent) -> bool) -> HostEvent {
        loop {
            let event = self
                .rx
                .recv_timeout(TIMEOUT)
                .unwrap_or_else(|e| panic!("no matching event: {}", e));
            if pred(&event) {
                return event;
            }
        }
    }
}

impl HostEventListener for EventRecorder {
    fn on_host_event(&self, event: &HostEvent) {
        self.events.lock().push(event.clone());
        let _ = self.tx.send(event.clone());
    }
}

/// A host on a fake launcher, with an event recorder attached.
pub struct Harness {
    pub host: RenderHost,
    pub launcher: Arc<FakeLauncher>,
    pub helpers: Receiver<FakeHelper>,
    pub events: Arc<EventRecorder>,
}

impl Harness {
    pub fn start() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        init_tracing();
        let (launcher, helpers) = FakeLauncher::new();
        let host = RenderHost::start(config, launcher.clone()).unwrap();
        let events = EventRecorder::new();
        host.handle().subscribe(&events);
        Self {
            host,
            launcher,
            helpers,
            events,
        }
    }

    pub fn next_helper(&self) -> FakeHelper {
        self.helpers
            .recv_timeout(TIMEOUT)
            .unwrap_or_else(|e| panic!("no helper launched: {}", e))
    }

    /// Block until the control thread has processed everything posted so far.
    pub fn sync(&self) {
        self.host.handle().snapshot().unwrap();
    }
}
