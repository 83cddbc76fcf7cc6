// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! The control thread and the handle used to post to it.

mod command_receiver;
mod commands;
mod handle;

pub(crate) use command_receiver::ControlContext;
pub(crate) use commands::ControlCommand;
pub use handle::ControlHandle;
