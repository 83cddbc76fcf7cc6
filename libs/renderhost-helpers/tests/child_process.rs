// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! End-to-end against a real helper executable over stdio pipes.

#![cfg(unix)]

mod common;

use std::path::PathBuf;

use common::{EventRecorder, TIMEOUT, init_tracing};
use serial_test::serial;

use renderhost::{
    BackendKind, BufferFormat, BufferId, BufferParams, BufferUsage, ChannelEstablishClient,
    ClientId, HelperFailure, HelperKind, HostConfig, HostEvent, LaunchCause, LaunchConfig,
    RenderHost, Reply, RequestError, SurfaceId, TerminationStatus,
};

fn helper_config(args: &[&str]) -> HostConfig {
    HostConfig {
        launch: LaunchConfig {
            program: PathBuf::from(env!("CARGO_BIN_EXE_renderhost_test_helper")),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn start(config: HostConfig) -> (RenderHost, std::sync::Arc<EventRecorder>) {
    init_tracing();
    let host = RenderHost::with_child_launcher(config).unwrap();
    let events = EventRecorder::new();
    host.handle().subscribe(&events);
    (host, events)
}

#[test]
#[serial]
fn test_real_helper_serves_channel_and_buffers() {
    let (mut host, events) = start(helper_config(&[]));
    let client = ChannelEstablishClient::new(host.handle(), ClientId::new(1), HelperKind::Sandboxed);

    let channel = client.establish_sync(LaunchCause::Webgl).unwrap();
    assert_eq!(channel.backend, BackendKind::Hardware);
    assert_eq!(channel.helper_info.gl_renderer, "test-hardware-sandboxed");
    assert!(channel.name.starts_with("renderhost."));

    let (tx, rx) = crossbeam_channel::bounded(1);
    client.create_buffer(
        BufferParams {
            id: BufferId::new(5),
            width: 100,
            height: 10,
            format: BufferFormat::Rgba8888,
            usage: BufferUsage::Map,
            client_id: ClientId::new(1),
            surface_id: SurfaceId::NULL,
        },
        move |r| {
            let _ = tx.send(r);
        },
    );
    let handle = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!((handle.id, handle.stride), (BufferId::new(5), 400));

    let snapshot = host.handle().snapshot().unwrap();
    let record = snapshot.record(HelperKind::Sandboxed).unwrap();
    assert!(record.initialized);
    assert!(record.pid.is_some());
    assert_eq!(record.shader_clients, 1);

    host.shutdown().unwrap();
    assert!(events.events().contains(&HostEvent::HelperExited {
        host_id: channel.host_id,
        kind: HelperKind::Sandboxed,
        backend: BackendKind::Hardware,
        status: TerminationStatus::NormalTermination,
    }));
}

#[test]
#[serial]
fn test_unsandboxed_helper_is_told_so() {
    let (host, _events) = start(helper_config(&[]));
    let client = ChannelEstablishClient::new(host.handle(), ClientId::new(2), HelperKind::Unsandboxed);

    let channel = client.establish_sync(LaunchCause::GetInfo).unwrap();
    assert_eq!(channel.helper_info.gl_renderer, "test-hardware-unsandboxed");
}

#[test]
#[serial]
fn test_helper_abort_fails_request_and_counts_crash() {
    let (host, events) = start(helper_config(&["--crash-after=1"]));
    let client = ChannelEstablishClient::new(host.handle(), ClientId::new(1), HelperKind::Sandboxed);

    assert_eq!(
        client.establish_sync(LaunchCause::Webgl),
        Err(RequestError::ChannelLost)
    );
    let crashed = events.wait_for(|e| matches!(e, HostEvent::HelperCrashed { .. }));
    assert!(matches!(
        crashed,
        HostEvent::HelperCrashed {
            failure: HelperFailure::Crash,
            status: TerminationStatus::ProcessCrashed,
            ..
        }
    ));

    let snapshot = host.handle().snapshot().unwrap();
    assert_eq!(
        snapshot
            .backend(BackendKind::Hardware)
            .unwrap()
            .counters
            .lifetime_count,
        1
    );
    assert!(snapshot.records.is_empty());
}

#[test]
#[serial]
fn test_failed_initialize_falls_back_to_software() {
    let (host, events) = start(helper_config(&["--fail-init"]));
    let client = ChannelEstablishClient::new(host.handle(), ClientId::new(1), HelperKind::Sandboxed);

    assert_eq!(
        client.establish_sync(LaunchCause::Webgl),
        Err(RequestError::ChannelLost)
    );
    events.wait_for(|e| {
        matches!(
            e,
            HostEvent::HelperCrashed {
                failure: HelperFailure::Handshake,
                ..
            }
        )
    });
    assert!(events.events().contains(&HostEvent::BackendDisabled {
        backend: BackendKind::Hardware
    }));

    let summary = host
        .handle()
        .get_or_create(HelperKind::Sandboxed, LaunchCause::Webgl)
        .unwrap()
        .unwrap();
    assert_eq!(summary.backend, BackendKind::Software);
}

#[test]
#[serial]
fn test_missing_executable_is_a_launch_failure() {
    let config = HostConfig {
        launch: LaunchConfig {
            program: PathBuf::from("/nonexistent/renderhost-helper"),
            ..Default::default()
        },
        ..Default::default()
    };
    let (host, events) = start(config);
    let client = ChannelEstablishClient::new(host.handle(), ClientId::new(1), HelperKind::Sandboxed);

    assert_eq!(
        client.establish_sync(LaunchCause::Webgl),
        Err(RequestError::HelperUnavailable)
    );
    events.wait_for(|e| matches!(e, HostEvent::HelperLaunchFailed { .. }));

    let snapshot = host.handle().snapshot().unwrap();
    assert!(snapshot.backend(BackendKind::Hardware).unwrap().allowed);
    assert!(snapshot.records.is_empty());
}

#[test]
#[serial]
fn test_helper_that_stops_reading_does_not_stall_the_host() {
    let config = HostConfig {
        launch: LaunchConfig {
            program: PathBuf::from("/bin/sh"),
            args: vec!["-c".into(), "exec sleep 30".into()],
            shutdown_timeout_ms: 100,
            ..Default::default()
        },
        ..Default::default()
    };
    let (mut host, events) = start(config);
    let handle = host.handle();
    let record = handle
        .get_or_create(HelperKind::Sandboxed, LaunchCause::Webgl)
        .unwrap()
        .unwrap();

    // Far more than a pipe buffer holds.
    for id in 0..2000 {
        let params = BufferParams {
            id: BufferId::new(id),
            width: 256,
            height: 256,
            format: BufferFormat::Rgba8888,
            usage: BufferUsage::Scanout,
            client_id: ClientId::new(1),
            surface_id: SurfaceId::NULL,
        };
        handle.create_buffer(record.host_id, params, Reply::new(|_| {}));
    }
    events.wait_for(|e| matches!(e, HostEvent::HelperLaunched { .. }));

    let (tx, rx) = crossbeam_channel::bounded(1);
    let side = host.handle();
    std::thread::spawn(move || {
        let _ = tx.send(side.snapshot());
    });
    let snapshot = rx.recv_timeout(TIMEOUT).unwrap().unwrap();
    let summary = snapshot.record(HelperKind::Sandboxed).unwrap();
    assert!(summary.launched);
    assert_eq!(summary.pending_buffers, 2000);

    host.shutdown().unwrap();
}
