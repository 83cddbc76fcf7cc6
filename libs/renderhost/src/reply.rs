// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Owned, consume-once reply slots.

use std::fmt;

use crossbeam_channel::Receiver;

use crate::error::RequestError;

pub type ReplyResult<T> = std::result::Result<T, RequestError>;

type Callback<T> = Box<dyn FnOnce(ReplyResult<T>) + Send + 'static>;

/// The single way a pending request gets answered.
///
/// `resolve` consumes the slot. A slot dropped without being resolved fires
/// its callback with [`RequestError::ChannelLost`], so a request can never be
/// silently abandoned.
pub struct Reply<T> {
    callback: Option<Callback<T>>,
}

impl<T> Reply<T> {
    pub fn new(callback: impl FnOnce(ReplyResult<T>) + Send + 'static) -> Self {
        Self {
            callback: Some(Box::new(callback)),
        }
    }

    pub fn resolve(mut self, result: ReplyResult<T>) {
        if let Some(callback) = self.callback.take() {
            callback(result);
        }
    }

    pub fn fail(self, error: RequestError) {
        self.resolve(Err(error));
    }
}

impl<T: Send + 'static> Reply<T> {
    /// A slot whose outcome is received on the returned channel.
    pub fn channel() -> (Self, Receiver<ReplyResult<T>>) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let reply = Self::new(move |result| {
            let _ = tx.send(result);
        });
        (reply, rx)
    }
}

impl<T> Drop for Reply<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            tracing::debug!("[RenderHost] Reply dropped unresolved, failing with ChannelLost");
            callback(Err(RequestError::ChannelLost));
        }
    }
}

impl<T> fmt::Debug for Reply<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reply")
            .field("pending", &self.callback.is_some())
            .finish()
    }
}
