// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The message channel between a record and its helper.

mod stdio;

use crossbeam_channel::Sender;

pub use stdio::StdioMessageChannel;

use crate::control::ControlCommand;
use crate::ids::HostId;
use crate::wire::{HelperMessage, HostMessage};

/// Outbound half of a helper connection. Messages are delivered in send order.
pub trait MessageChannel: Send {
    /// False when the message could not be handed to the transport; the
    /// connection should be considered broken.
    fn send(&mut self, message: &HostMessage) -> bool;

    /// Stop sending. The inbound side reports its own disconnect.
    fn close(&mut self);
}

/// Inbound half: where a channel delivers helper messages and its disconnect.
///
/// Everything delivered here is processed on the control thread, in order.
#[derive(Clone)]
pub struct InboundSink {
    host_id: HostId,
    tx: Sender<ControlCommand>,
}

impl InboundSink {
    pub(crate) fn new(host_id: HostId, tx: Sender<ControlCommand>) -> Self {
        Self { host_id, tx }
    }

    /// Get the helper this sink delivers for.
    pub fn host_id(&self) -> HostId {
        self.host_id
    }

    /// False once the host has shut down.
    pub fn deliver(&self, message: HelperMessage) -> bool {
        self.tx
            .send(ControlCommand::Inbound {
                host_id: self.host_id,
                message,
            })
            .is_ok()
    }

    /// Report that the helper end of the channel is gone.
    pub fn disconnected(&self) -> bool {
        self.tx
            .send(ControlCommand::Disconnected {
                host_id: self.host_id,
            })
            .is_ok()
    }
}
