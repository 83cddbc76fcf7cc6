// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::io::{BufReader, BufWriter, Read, Write};

use crossbeam_channel::{Receiver, Sender};

use super::{InboundSink, MessageChannel};
use crate::ids::HostId;
use crate::wire::{encode_frame, read_frame, HelperMessage, HostMessage};

/// Length-prefixed JSON over a pair of byte streams (normally the helper's
/// stdin and stdout).
///
/// Two detached threads do the I/O. The reader forwards every inbound frame
/// to the sink and reports the disconnect when the stream ends or a frame is
/// malformed. The writer drains an unbounded frame queue, so `send` never
/// blocks on a helper that has stopped reading; a failed write is reported
/// to the sink as a disconnect.
pub struct StdioMessageChannel {
    host_id: HostId,
    frames: Option<Sender<Vec<u8>>>,
}

impl StdioMessageChannel {
    /// Start the reader and writer threads for one helper.
    pub fn spawn<W, R>(writer: W, reader: R, sink: InboundSink) -> std::io::Result<Self>
    where
        W: Write + Send + 'static,
        R: Read + Send + 'static,
    {
        let host_id = sink.host_id();
        let (frames, queued) = crossbeam_channel::unbounded();

        let writer_sink = sink.clone();
        std::thread::Builder::new()
            .name(format!("renderhost-writer-{}", host_id.get()))
            .spawn(move || write_loop(writer, queued, writer_sink))?;
        std::thread::Builder::new()
            .name(format!("renderhost-reader-{}", host_id.get()))
            .spawn(move || read_loop(reader, sink))?;

        Ok(Self {
            host_id,
            frames: Some(frames),
        })
    }

    /// Whether `close` has not been called yet.
    pub fn is_open(&self) -> bool {
        self.frames.is_some()
    }
}

fn read_loop<R: Read>(reader: R, sink: InboundSink) {
    let host_id = sink.host_id();
    let mut reader = BufReader::new(reader);
    loop {
        match read_frame::<_, HelperMessage>(&mut reader) {
            Ok(Some(message)) => {
                if !sink.deliver(message) {
                    tracing::debug!("[RenderHost] Host gone, stopping reader for {}", host_id);
                    return;
                }
            }
            Ok(None) => {
                tracing::debug!("[RenderHost] Helper {} closed its channel", host_id);
                break;
            }
            Err(e) => {
                tracing::warn!("[RenderHost] Bad frame from helper {}: {}", host_id, e);
                break;
            }
        }
    }
    sink.disconnected();
}

/// Ends when the queue closes (the helper's stdin is closed on return) or
/// on the first write error.
fn write_loop<W: Write>(writer: W, queued: Receiver<Vec<u8>>, sink: InboundSink) {
    let host_id = sink.host_id();
    let mut writer = BufWriter::new(writer);
    let result = queued.iter().try_for_each(|frame| {
        writer.write_all(&frame)?;
        // Only flush once the backlog is drained.
        if queued.is_empty() { writer.flush() } else { Ok(()) }
    });

    match result.and_then(|()| writer.flush()) {
        Ok(()) => tracing::debug!("[RenderHost] Writer for helper {} closed", host_id),
        Err(e) => {
            tracing::warn!("[RenderHost] Failed to write to helper {}: {}", host_id, e);
            // Later sends fail before the disconnect is processed.
            drop(queued);
            sink.disconnected();
        }
    }
}

impl MessageChannel for StdioMessageChannel {
    fn send(&mut self, message: &HostMessage) -> bool {
        let Some(frames) = self.frames.as_ref() else {
            return false;
        };
        let frame = match encode_frame(message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("[RenderHost] Cannot encode message for helper {}: {}", self.host_id, e);
                return false;
            }
        };
        // Fails only once the writer has exited.
        frames.send(frame).is_ok()
    }

    fn close(&mut self) {
        // The writer drains what is queued, then drops the helper's stdin.
        // The reader ends on its own once the helper closes stdout.
        self.frames.take();
    }
}

impl Drop for StdioMessageChannel {
    fn drop(&mut self) {
        self.close();
    }
}
