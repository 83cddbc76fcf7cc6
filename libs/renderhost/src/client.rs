// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Client-side channel establishment.
//!
//! Many callers share one [`ChannelEstablishClient`]. Concurrent requests are
//! coalesced into a single in-flight request whose outcome fans out to every
//! waiter; the last good channel is cached until its helper goes away.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::control::ControlHandle;
use crate::error::RequestError;
use crate::events::{HostEvent, HostEventListener};
use crate::ids::{BufferId, ChannelHandle, ClientId, SurfaceId};
use crate::kinds::{HelperKind, LaunchCause};
use crate::reply::{Reply, ReplyResult};
use crate::wire::{BufferHandle, BufferParams, ResourceParams};

type EstablishCallback = Box<dyn FnOnce(ReplyResult<ChannelHandle>) + Send + 'static>;

/// Told when a previously established channel becomes unusable.
pub trait ChannelObserver: Send + Sync {
    fn on_channel_lost(&self, channel: &ChannelHandle);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Requesting,
    Established,
}

struct InFlight {
    request_id: u64,
    callbacks: Vec<EstablishCallback>,
}

#[derive(Default)]
struct ClientShared {
    current: Option<ChannelHandle>,
    in_flight: Option<InFlight>,
    next_request_id: u64,
}

struct ClientInner {
    client_id: ClientId,
    kind: HelperKind,
    control: ControlHandle,
    shared: Mutex<ClientShared>,
    observers: Mutex<Vec<Weak<dyn ChannelObserver>>>,
}

impl ClientInner {
    fn complete(&self, request_id: u64, result: ReplyResult<ChannelHandle>) {
        let callbacks = {
            let mut shared = self.shared.lock();
            match shared.in_flight.take() {
                Some(in_flight) if in_flight.request_id == request_id => {
                    if let Ok(channel) = &result {
                        shared.current = Some(channel.clone());
                    }
                    in_flight.callbacks
                }
                other => {
                    shared.in_flight = other;
                    return;
                }
            }
        };

        match &result {
            Ok(channel) => tracing::debug!(
                "[Client] {} established '{}' for {} waiter(s)",
                self.client_id,
                channel.name,
                callbacks.len()
            ),
            Err(e) => tracing::warn!(
                "[Client] {} channel request failed for {} waiter(s): {}",
                self.client_id,
                callbacks.len(),
                e
            ),
        }

        for callback in callbacks {
            callback(result.clone());
        }
    }

    fn notify_lost(&self, channel: &ChannelHandle) {
        let live: Vec<Arc<dyn ChannelObserver>> = {
            let mut observers = self.observers.lock();
            observers.retain(|weak| weak.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        for observer in live {
            observer.on_channel_lost(channel);
        }
    }
}

impl HostEventListener for ClientInner {
    fn on_host_event(&self, event: &HostEvent) {
        if !event.ends_host() {
            return;
        }
        let Some(host_id) = event.host_id() else {
            return;
        };

        let lost = {
            let mut shared = self.shared.lock();
            if shared.current.as_ref().is_some_and(|c| c.host_id == host_id) {
                shared.current.take()
            } else {
                None
            }
        };

        if let Some(channel) = lost {
            tracing::warn!(
                "[Client] {} lost channel '{}' to helper {}",
                self.client_id,
                channel.name,
                host_id
            );
            self.notify_lost(&channel);
        }
    }
}

/// Per-client facade over the control thread.
///
/// Dropping the client cancels delivery to its pending callbacks; launches
/// and wire requests already under way are left to complete.
pub struct ChannelEstablishClient {
    inner: Arc<ClientInner>,
}

impl ChannelEstablishClient {
    pub fn new(control: ControlHandle, client_id: ClientId, kind: HelperKind) -> Self {
        let inner = Arc::new(ClientInner {
            client_id,
            kind,
            control,
            shared: Mutex::new(ClientShared::default()),
            observers: Mutex::new(Vec::new()),
        });
        inner.control.subscribe(&inner);
        Self { inner }
    }

    /// Get the client id sent with every request.
    pub fn client_id(&self) -> ClientId {
        self.inner.client_id
    }

    /// Get the helper kind this client talks to.
    pub fn kind(&self) -> HelperKind {
        self.inner.kind
    }

    /// Current establishment state.
    pub fn state(&self) -> ClientState {
        let shared = self.inner.shared.lock();
        if shared.in_flight.is_some() {
            ClientState::Requesting
        } else if shared.current.is_some() {
            ClientState::Established
        } else {
            ClientState::Idle
        }
    }

    /// Last established channel, unless its helper has since gone away.
    pub fn current_channel(&self) -> Option<ChannelHandle> {
        self.inner.shared.lock().current.clone()
    }

    /// Ask for a channel. Satisfied immediately from the cache, joined onto
    /// the request in flight, or sent as a new request.
    ///
    /// The callback may run on the control thread and must not block on it.
    pub fn establish_async(
        &self,
        cause: LaunchCause,
        callback: impl FnOnce(ReplyResult<ChannelHandle>) + Send + 'static,
    ) {
        let request_id = {
            let mut shared = self.inner.shared.lock();
            if let Some(channel) = shared.current.clone() {
                drop(shared);
                callback(Ok(channel));
                return;
            }
            if let Some(in_flight) = shared.in_flight.as_mut() {
                in_flight.callbacks.push(Box::new(callback));
                tracing::trace!(
                    "[Client] {} joined request in flight ({} waiting)",
                    self.inner.client_id,
                    in_flight.callbacks.len()
                );
                return;
            }

            shared.next_request_id += 1;
            let request_id = shared.next_request_id;
            shared.in_flight = Some(InFlight {
                request_id,
                callbacks: vec![Box::new(callback)],
            });
            request_id
        };

        tracing::debug!(
            "[Client] {} requesting {} channel for {}",
            self.inner.client_id,
            self.inner.kind,
            cause
        );

        let weak = Arc::downgrade(&self.inner);
        let reply = Reply::new(move |result| {
            if let Some(inner) = weak.upgrade() {
                inner.complete(request_id, result);
            }
        });
        self.inner
            .control
            .establish_channel(self.inner.kind, self.inner.client_id, cause, reply);
    }

    /// Blocking form of [`establish_async`](Self::establish_async).
    ///
    /// Only for callers that cannot make progress without a channel. Never
    /// call it from a reply callback.
    pub fn establish_sync(&self, cause: LaunchCause) -> ReplyResult<ChannelHandle> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.establish_async(cause, move |result| {
            let _ = tx.send(result);
        });
        rx.recv().unwrap_or(Err(RequestError::HostShutDown))
    }

    /// Register an observer for channel loss. Held weakly.
    pub fn add_observer<O: ChannelObserver + 'static>(&self, observer: &Arc<O>) {
        let observer: Arc<dyn ChannelObserver> = observer.clone();
        self.inner.observers.lock().push(Arc::downgrade(&observer));
    }

    /// Create a rendering resource on the current channel's helper.
    pub fn create_resource(
        &self,
        surface_id: SurfaceId,
        route_id: u32,
        callback: impl FnOnce(ReplyResult<()>) + Send + 'static,
    ) {
        let Some(channel) = self.current_channel() else {
            callback(Err(RequestError::NoChannel));
            return;
        };
        let params = ResourceParams {
            client_id: self.inner.client_id,
            surface_id,
            route_id,
        };
        self.inner
            .control
            .create_resource(channel.host_id, params, Reply::new(callback));
    }

    /// Allocate a shared buffer on the current channel's helper. The client
    /// id in `params` is replaced with this client's.
    pub fn create_buffer(
        &self,
        mut params: BufferParams,
        callback: impl FnOnce(ReplyResult<BufferHandle>) + Send + 'static,
    ) {
        let Some(channel) = self.current_channel() else {
            callback(Err(RequestError::NoChannel));
            return;
        };
        params.client_id = self.inner.client_id;
        self.inner
            .control
            .create_buffer(channel.host_id, params, Reply::new(callback));
    }

    /// Release a buffer on the current channel's helper. Dropped without a channel.
    pub fn destroy_buffer(&self, id: BufferId, sync_token: u32) {
        if let Some(channel) = self.current_channel() {
            self.inner
                .control
                .destroy_buffer(channel.host_id, id, self.inner.client_id, sync_token);
        }
    }
}

impl Drop for ChannelEstablishClient {
    fn drop(&mut self) {
        let cancelled = self.inner.shared.lock().in_flight.take();
        if let Some(in_flight) = cancelled {
            tracing::debug!(
                "[Client] {} dropped, cancelling {} waiter(s)",
                self.inner.client_id,
                in_flight.callbacks.len()
            );
        }
    }
}
