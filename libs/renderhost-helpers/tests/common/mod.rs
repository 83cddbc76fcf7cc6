// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Event capture for tests against real helper processes.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use renderhost::{HostEvent, HostEventListener};

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

    /// Everything published so far, in order.
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
