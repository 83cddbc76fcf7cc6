// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The owned host service: control thread plus launcher worker.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::HostConfig;
use crate::control::{ControlContext, ControlHandle};
use crate::error::{RenderHostError, Result};
use crate::events::HostEventBus;
use crate::launcher::{ChildProcessLauncher, LaunchWorker, ProcessLauncher};
use crate::registry::HelperRegistry;

/// Running render host.
///
/// Constructed once by the embedding application and shared through
/// [`ControlHandle`]s. Dropping it shuts every helper down.
pub struct RenderHost {
    handle: ControlHandle,
    thread: Option<JoinHandle<()>>,
}

impl RenderHost {
    pub fn start(config: HostConfig, launcher: Arc<dyn ProcessLauncher>) -> Result<Self> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let events = Arc::new(HostEventBus::new());
        let closed = Arc::new(AtomicBool::new(false));

        let worker = LaunchWorker::start(launcher, command_tx.clone())?;
        let registry = HelperRegistry::new(config, worker, Arc::clone(&events), command_tx.clone());
        let context = ControlContext::new(registry, command_rx, Arc::clone(&closed));

        let thread = std::thread::Builder::new()
            .name("renderhost-control".into())
            .spawn(move || context.run())
            .map_err(|e| RenderHostError::Runtime(format!("Failed to start control thread: {}", e)))?;

        Ok(Self {
            handle: ControlHandle::new(command_tx, events, closed),
            thread: Some(thread),
        })
    }

    /// Start with [`ChildProcessLauncher`] configured from `config.launch`.
    pub fn with_child_launcher(config: HostConfig) -> Result<Self> {
        let launcher = Arc::new(ChildProcessLauncher::new(config.launch.clone()));
        Self::start(config, launcher)
    }

    /// Get a handle to the control thread.
    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Stop the control thread after tearing down every helper. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if !self.handle.request_shutdown() {
            tracing::debug!("[RenderHost] Control thread already gone");
        }
        thread
            .join()
            .map_err(|_| RenderHostError::Runtime("Control thread panicked".into()))
    }
}

impl Drop for RenderHost {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!("[RenderHost] Shutdown failed: {}", e);
        }
    }
}
