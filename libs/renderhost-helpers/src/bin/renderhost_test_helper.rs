// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Stand-in rendering helper.
//!
//! Speaks the host wire protocol over stdin/stdout and fakes every
//! allocation. Logs go to stderr; stdout carries frames only.

use std::io::{self, BufReader, BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;

use renderhost::wire::{read_frame, write_frame};
use renderhost::{
    BufferHandle, BufferHandleKind, BufferParams, ClientId, HelperInfo, HelperMessage, HostMessage,
    ResourceCreationResult,
};

#[derive(Parser)]
#[command(name = "renderhost_test_helper")]
#[command(about = "Fake rendering helper for renderhost tests")]
struct Cli {
    /// Endpoint name chosen by the host
    #[arg(long)]
    channel_id: String,

    /// Rendering backend to pretend to use
    #[arg(long, default_value = "hardware")]
    backend: String,

    /// Registry slot this helper fills
    #[arg(long, default_value = "sandboxed")]
    kind: String,

    #[arg(long)]
    disable_sandbox: bool,

    /// Answer Initialize with a failure
    #[arg(long)]
    fail_init: bool,

    /// Abort on receiving the Nth request (channel, resource or buffer)
    #[arg(long)]
    crash_after: Option<u32>,

    #[arg(long, env = "RENDERHOST_TEST_HELPER_VERBOSE")]
    verbose: bool,
}

struct Helper<W: Write> {
    cli: Cli,
    out: W,
    requests: u32,
    next_channel: u32,
}

impl<W: Write> Helper<W> {
    fn send(&mut self, message: &HelperMessage) -> Result<()> {
        write_frame(&mut self.out, message).context("failed to write frame")
    }

    fn info(&self) -> HelperInfo {
        let sandbox = if self.cli.disable_sandbox {
            "unsandboxed"
        } else {
            "sandboxed"
        };
        HelperInfo {
            gl_vendor: "renderhost".into(),
            gl_renderer: format!("test-{}-{}", self.cli.backend, sandbox),
            driver_version: env!("CARGO_PKG_VERSION").into(),
            driver_vendor: "renderhost-test".into(),
        }
    }

    /// Count a request and abort once the configured limit is reached.
    fn count_request(&mut self) {
        self.requests += 1;
        if self.cli.crash_after.is_some_and(|n| self.requests >= n) {
            tracing::warn!("[TestHelper] Crashing on request {}", self.requests);
            std::process::abort();
        }
    }

    fn establish_channel(&mut self, client_id: ClientId) -> Result<()> {
        self.count_request();
        self.next_channel += 1;
        let name = format!("{}.{}", self.cli.channel_id, self.next_channel);
        self.send(&HelperMessage::ChannelEstablished {
            name: Some(name.clone()),
        })?;
        self.send(&HelperMessage::CacheShader {
            client_id,
            key: format!("{}-program", name),
            data: "compiled".into(),
        })
    }

    fn create_buffer(&mut self, params: BufferParams) -> Result<()> {
        self.count_request();
        let handle = BufferHandle {
            id: params.id,
            kind: BufferHandleKind::SharedMemory,
            stride: params.width * 4,
        };
        self.send(&HelperMessage::BufferCreated {
            handle: Some(handle),
        })
    }

    /// Serve frames until `Shutdown` or end of input.
    fn run(&mut self, input: &mut impl io::Read) -> Result<()> {
        while let Some(message) = read_frame::<_, HostMessage>(input).context("failed to read frame")? {
            tracing::debug!("[TestHelper] <- {:?}", message);
            match message {
                HostMessage::Initialize => {
                    let ok = !self.cli.fail_init;
                    let info = self.info();
                    self.send(&HelperMessage::Initialized { ok, info })?;
                    self.send(&HelperMessage::LogMessage {
                        level: "info".into(),
                        message: format!("{} helper up on {}", self.cli.kind, self.cli.backend),
                    })?;
                }
                HostMessage::EstablishChannel { client_id } => self.establish_channel(client_id)?,
                HostMessage::CreateResource(_) => {
                    self.count_request();
                    self.send(&HelperMessage::ResourceCreated {
                        result: ResourceCreationResult::Succeeded,
                    })?;
                }
                HostMessage::CreateBuffer(params) => self.create_buffer(params)?,
                HostMessage::DestroyBuffer { id, .. } => {
                    tracing::debug!("[TestHelper] Released buffer {}", id.get());
                }
                HostMessage::CloseChannel { name } => {
                    tracing::debug!("[TestHelper] Closed channel {}", name);
                }
                HostMessage::LoadedShader { .. } => {}
                HostMessage::Shutdown => {
                    tracing::info!("[TestHelper] Shutdown requested");
                    return Ok(());
                }
            }
        }
        tracing::info!("[TestHelper] Host closed the pipe");
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    tracing::info!(
        "[TestHelper] Starting on {} (PID: {})",
        cli.channel_id,
        std::process::id()
    );

    let mut input = BufReader::new(io::stdin().lock());
    let mut helper = Helper {
        cli,
        out: BufWriter::new(io::stdout().lock()),
        requests: 0,
        next_channel: 0,
    };
    helper.run(&mut input)
}
