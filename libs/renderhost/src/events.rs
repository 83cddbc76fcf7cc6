// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Helper lifecycle notifications.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::error::HelperFailure;
use crate::ids::{ClientId, HelperInfo, HostId};
use crate::kinds::{BackendKind, HelperKind, LaunchCause};
use crate::launcher::TerminationStatus;
use crate::wire::ReplyCategory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    HelperLaunched {
        host_id: HostId,
        kind: HelperKind,
        backend: BackendKind,
        pid: Option<u32>,
        cause: LaunchCause,
    },
    HelperLaunchFailed {
        host_id: HostId,
        kind: HelperKind,
        backend: BackendKind,
        reason: String,
    },
    HelperInitialized {
        host_id: HostId,
        kind: HelperKind,
        backend: BackendKind,
        info: HelperInfo,
    },
    /// The helper died or failed its handshake. Clients holding a channel to
    /// `host_id` must stop using it.
    HelperCrashed {
        host_id: HostId,
        kind: HelperKind,
        backend: BackendKind,
        failure: HelperFailure,
        status: TerminationStatus,
    },
    /// The helper went away through an orderly teardown.
    HelperExited {
        host_id: HostId,
        kind: HelperKind,
        backend: BackendKind,
        status: TerminationStatus,
    },
    BackendDisabled {
        backend: BackendKind,
    },
    ProtocolAnomaly {
        host_id: HostId,
        category: ReplyCategory,
    },
    /// The helper compiled a program worth persisting. `key` already
    /// carries the driver prefix and is what `load_shader` expects back.
    ShaderCached {
        host_id: HostId,
        client_id: ClientId,
        key: String,
        data: String,
    },
}

impl HostEvent {
    /// Host the event concerns, if any.
    pub fn host_id(&self) -> Option<HostId> {
        match self {
            Self::HelperLaunched { host_id, .. }
            | Self::HelperLaunchFailed { host_id, .. }
            | Self::HelperInitialized { host_id, .. }
            | Self::HelperCrashed { host_id, .. }
            | Self::HelperExited { host_id, .. }
            | Self::ProtocolAnomaly { host_id, .. }
            | Self::ShaderCached { host_id, .. } => Some(*host_id),
            Self::BackendDisabled { .. } => None,
        }
    }

    /// True for events after which channels to the host are dead.
    pub fn ends_host(&self) -> bool {
        matches!(self, Self::HelperCrashed { .. } | Self::HelperExited { .. })
    }
}

pub trait HostEventListener: Send + Sync {
    fn on_host_event(&self, event: &HostEvent);
}

/// Fan-out of [`HostEvent`]s to weakly held listeners.
///
/// Listeners are never unsubscribed explicitly; dropping the last `Arc`
/// removes them on the next publish. Listeners run on the publishing thread
/// (the control thread) and must not block.
#[derive(Default)]
pub struct HostEventBus {
    listeners: Mutex<Vec<Weak<dyn HostEventListener>>>,
}

impl HostEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a weakly held listener.
    pub fn subscribe<L: HostEventListener + 'static>(&self, listener: &Arc<L>) {
        let listener: Arc<dyn HostEventListener> = listener.clone();
        let weak = Arc::downgrade(&listener);
        self.listeners.lock().push(weak);
    }

    /// Deliver `event` to every live listener, in subscription order.
    pub fn publish(&self, event: &HostEvent) {
        let live: Vec<Arc<dyn HostEventListener>> = {
            let mut listeners = self.listeners.lock();
            listeners.retain(|weak| weak.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        tracing::trace!(
            "[RenderHost] Publishing {:?} to {} listener(s)",
            event,
            live.len()
        );

        // Lock released so listeners may subscribe from inside a callback.
        for listener in live {
            listener.on_host_event(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
