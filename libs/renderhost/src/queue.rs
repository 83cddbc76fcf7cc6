// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-record FIFO request queues.
//!
//! A record has one in-order wire channel, so replies of one category come
//! back in the order the requests were sent. Each queue pops its front on the
//! matching reply. A reply with nothing queued is tolerated and dropped.

use std::collections::VecDeque;

use crate::error::RequestError;
use crate::ids::{BufferId, ChannelHandle, ClientId, SurfaceId};
use crate::reply::Reply;
use crate::wire::{BufferHandle, BufferParams, ReplyCategory, ResourceParams};

pub struct ChannelRequest {
    pub client_id: ClientId,
    pub reply: Reply<ChannelHandle>,
}

pub struct ResourceRequest {
    pub params: ResourceParams,
    pub reply: Reply<()>,
}

pub struct BufferRequest {
    pub params: BufferParams,
    pub reply: Reply<BufferHandle>,
}

impl BufferRequest {
    pub fn buffer_id(&self) -> BufferId {
        self.params.id
    }

    pub fn surface_id(&self) -> SurfaceId {
        self.params.surface_id
    }
}

/// A request waiting for its reply, tagged by category.
pub enum PendingRequest {
    EstablishChannel(ChannelRequest),
    CreateResource(ResourceRequest),
    CreateBuffer(BufferRequest),
}

impl PendingRequest {
    /// Reply category this request waits for.
    pub fn category(&self) -> ReplyCategory {
        match self {
            Self::EstablishChannel(_) => ReplyCategory::EstablishChannel,
            Self::CreateResource(_) => ReplyCategory::CreateResource,
            Self::CreateBuffer(_) => ReplyCategory::CreateBuffer,
        }
    }

    pub fn fail(self, error: RequestError) {
        match self {
            Self::EstablishChannel(request) => request.reply.fail(error),
            Self::CreateResource(request) => request.reply.fail(error),
            Self::CreateBuffer(request) => request.reply.fail(error),
        }
    }
}

/// Strict FIFO of requests of one category.
pub struct RequestQueue<T> {
    category: ReplyCategory,
    entries: VecDeque<T>,
}

impl<T> RequestQueue<T> {
    pub fn new(category: ReplyCategory) -> Self {
        Self {
            category,
            entries: VecDeque::new(),
        }
    }

    pub fn category(&self) -> ReplyCategory {
        self.category
    }

    /// Append a request that was just sent.
    pub fn enqueue(&mut self, request: T) {
        self.entries.push_back(request);
        tracing::trace!(
            "[RenderHost] Queued {} request (depth {})",
            self.category,
            self.entries.len()
        );
    }

    /// Pop the oldest request for an inbound reply.
    ///
    /// `None` means the reply had nothing to answer. The caller reports it
    /// as a protocol anomaly and drops the reply.
    pub fn dequeue(&mut self) -> Option<T> {
        let request = self.entries.pop_front();
        if request.is_none() {
            tracing::warn!(
                "[RenderHost] Received a {} reply but no requests in queue",
                self.category
            );
        }
        request
    }

    /// Number of requests still waiting.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every queued request in send order.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..)
    }
}

/// The three queues a record owns.
pub struct RequestQueues {
    pub channels: RequestQueue<ChannelRequest>,
    pub resources: RequestQueue<ResourceRequest>,
    pub buffers: RequestQueue<BufferRequest>,
}

impl RequestQueues {
    pub fn new() -> Self {
        Self {
            channels: RequestQueue::new(ReplyCategory::EstablishChannel),
            resources: RequestQueue::new(ReplyCategory::CreateResource),
            buffers: RequestQueue::new(ReplyCategory::CreateBuffer),
        }
    }

    /// Route a request to the queue of its category.
    pub fn push(&mut self, request: PendingRequest) {
        match request {
            PendingRequest::EstablishChannel(r) => self.channels.enqueue(r),
            PendingRequest::CreateResource(r) => self.resources.enqueue(r),
            PendingRequest::CreateBuffer(r) => self.buffers.enqueue(r),
        }
    }

    /// Requests waiting across all three queues.
    pub fn pending(&self) -> usize {
        self.channels.len() + self.resources.len() + self.buffers.len()
    }

    /// Resolve every queued request with `error`: channels first, then
    /// resources, then buffers. Returns how many were failed.
    pub fn fail_all(&mut self, error: RequestError) -> usize {
        let mut failed = 0;
        for request in self.channels.drain() {
            request.reply.fail(error.clone());
            failed += 1;
        }
        for request in self.resources.drain() {
            request.reply.fail(error.clone());
            failed += 1;
        }
        for request in self.buffers.drain() {
            request.reply.fail(error.clone());
            failed += 1;
        }
        failed
    }
}

impl Default for RequestQueues {
    fn default() -> Self {
        Self::new()
    }
}
