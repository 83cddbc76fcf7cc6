// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use super::{LaunchRequest, ProcessLauncher};
use crate::channel::InboundSink;
use crate::control::ControlCommand;

struct LaunchJob {
    request: LaunchRequest,
    sink: InboundSink,
}

/// Runs launches off the control thread, one at a time, in submit order.
pub(crate) struct LaunchWorker {
    jobs: Option<Sender<LaunchJob>>,
    thread: Option<JoinHandle<()>>,
}

impl LaunchWorker {
    pub(crate) fn start(
        launcher: Arc<dyn ProcessLauncher>,
        control_tx: Sender<ControlCommand>,
    ) -> std::io::Result<Self> {
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded::<LaunchJob>();

        let thread = std::thread::Builder::new()
            .name("renderhost-launcher".into())
            .spawn(move || {
                for job in jobs_rx.iter() {
                    let host_id = job.request.host_id;
                    tracing::debug!(
                        "[Launcher] Launching {} helper {} ({})",
                        job.request.kind,
                        host_id,
                        job.request.backend
                    );

                    let result = launcher.launch(&job.request, job.sink);
                    if control_tx
                        .send(ControlCommand::LaunchCompleted { host_id, result })
                        .is_err()
                    {
                        // The returned command owns the helper; dropping it kills the process.
                        tracing::debug!(
                            "[Launcher] Control thread gone, discarding launch of {}",
                            host_id
                        );
                    }
                }
                tracing::debug!("[Launcher] Worker stopped");
            })?;

        Ok(Self {
            jobs: Some(jobs_tx),
            thread: Some(thread),
        })
    }

    /// Queue a launch. False once the worker has stopped.
    pub(crate) fn submit(&self, request: LaunchRequest, sink: InboundSink) -> bool {
        match &self.jobs {
            Some(jobs) => jobs.send(LaunchJob { request, sink }).is_ok(),
            None => false,
        }
    }

    /// Finish queued launches and join the worker.
    pub(crate) fn stop(&mut self) {
        self.jobs.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("[Launcher] Worker thread panicked");
            }
        }
    }
}

impl Drop for LaunchWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
