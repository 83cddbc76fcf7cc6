// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Concurrent channel requests share one launch and one wire request.

mod common;

use std::sync::{Arc, Barrier};
use std::thread;

use common::{Harness, TIMEOUT};
use renderhost::{
    ChannelEstablishClient, ClientId, ClientState, HelperKind, HostEvent, HostMessage, LaunchCause,
};

#[test]
fn test_concurrent_requests_coalesce_into_one_launch() {
    let harness = Harness::start();
    let client = Arc::new(ChannelEstablishClient::new(
        harness.host.handle(),
        ClientId::new(1),
        HelperKind::Sandboxed,
    ));

    let (results_tx, results_rx) = crossbeam_channel::unbounded();
    let barrier = Arc::new(Barrier::new(3));
    let callers: Vec<_> = (0..3)
        .map(|_| {
            let client = Arc::clone(&client);
            let barrier = Arc::clone(&barrier);
            let results_tx = results_tx.clone();
            thread::spawn(move || {
                barrier.wait();
                client.establish_async(LaunchCause::Webgl, move |result| {
                    let _ = results_tx.send(result);
                });
            })
        })
        .collect();
    for caller in callers {
        caller.join().unwrap();
    }
    assert_eq!(client.state(), ClientState::Requesting);

    let helper = harness.next_helper();
    helper.initialize();
    assert_eq!(helper.accept_channel(), ClientId::new(1));

    let results: Vec<_> = (0..3)
        .map(|_| results_rx.recv_timeout(TIMEOUT).unwrap().unwrap())
        .collect();
    assert!(results.iter().all(|channel| *channel == results[0]));
    assert_eq!(results[0].host_id, helper.request.host_id);

    harness.sync();
    assert_eq!(harness.launcher.launch_count(), 1);
    assert!(helper.try_message().is_none(), "only one EstablishChannel on the wire");
    assert_eq!(client.state(), ClientState::Established);
    assert_eq!(client.current_channel(), Some(results[0].clone()));
}

#[test]
fn test_cached_channel_satisfies_without_wire_traffic() {
    let harness = Harness::start();
    let client = ChannelEstablishClient::new(harness.host.handle(), ClientId::new(5), HelperKind::Sandboxed);

    let waiter = {
        let (tx, rx) = crossbeam_channel::bounded(1);
        client.establish_async(LaunchCause::Canvas2d, move |r| {
            let _ = tx.send(r);
        });
        rx
    };
    let helper = harness.next_helper();
    helper.initialize();
    helper.accept_channel();
    let first = waiter.recv_timeout(TIMEOUT).unwrap().unwrap();

    let second = client.establish_sync(LaunchCause::Canvas2d).unwrap();
    assert_eq!(first, second);
    harness.sync();
    assert!(helper.try_message().is_none());
}

#[test]
fn test_two_clients_share_one_helper() {
    let harness = Harness::start();
    let a = ChannelEstablishClient::new(harness.host.handle(), ClientId::new(1), HelperKind::Sandboxed);
    let b = ChannelEstablishClient::new(harness.host.handle(), ClientId::new(2), HelperKind::Sandboxed);

    let (tx, rx) = crossbeam_channel::unbounded();
    for client in [&a, &b] {
        let tx = tx.clone();
        client.establish_async(LaunchCause::Compositing, move |r| {
            let _ = tx.send(r);
        });
    }

    let helper = harness.next_helper();
    helper.initialize();
    let first = helper.accept_channel();
    let second = helper.accept_channel();
    assert_eq!((first, second), (ClientId::new(1), ClientId::new(2)));

    let names: Vec<String> = (0..2)
        .map(|_| rx.recv_timeout(TIMEOUT).unwrap().unwrap().name)
        .collect();
    assert_ne!(names[0], names[1]);

    let snapshot = harness.host.handle().snapshot().unwrap();
    assert_eq!(snapshot.records.len(), 1);
    assert_eq!(snapshot.record(HelperKind::Sandboxed).unwrap().shader_clients, 2);
    assert_eq!(harness.launcher.launch_count(), 1);
}

#[test]
fn test_initialize_is_first_and_launch_is_reported() {
    let harness = Harness::start();
    let handle = harness.host.handle();

    let summary = handle
        .get_or_create(HelperKind::Sandboxed, LaunchCause::BrowserStartup)
        .unwrap()
        .unwrap();
    assert!(!summary.launched);

    // A pure lookup finds the same record and never launches another.
    let again = handle
        .get_or_create(HelperKind::Sandboxed, LaunchCause::NoLaunch)
        .unwrap()
        .unwrap();
    assert_eq!(again.host_id, summary.host_id);
    assert!(
        handle
            .get_or_create(HelperKind::Unsandboxed, LaunchCause::NoLaunch)
            .unwrap()
            .is_none()
    );

    let helper = harness.next_helper();
    assert_eq!(helper.expect_message(), HostMessage::Initialize);

    let launched = harness
        .events
        .wait_for(|e| matches!(e, HostEvent::HelperLaunched { .. }));
    assert_eq!(
        launched,
        HostEvent::HelperLaunched {
            host_id: summary.host_id,
            kind: HelperKind::Sandboxed,
            backend: renderhost::BackendKind::Hardware,
            pid: Some(helper.pid),
            cause: LaunchCause::BrowserStartup,
        }
    );
    assert_eq!(handle.live_process_ids().unwrap(), vec![helper.pid]);
    assert_eq!(
        handle.find_by_id(summary.host_id).unwrap().map(|s| s.launched),
        Some(true)
    );
}
