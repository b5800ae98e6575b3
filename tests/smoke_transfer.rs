// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! §8 scenario 1: a single `GET` transfer followed by `End{count=1}`.

mod common;

use std::{
    rc::Rc,
    time::{Duration, Instant},
};
use tgen::{
    driver::Driver,
    graph::{Action, ActionGraph, EndParams, StartParams, TransferParams, TransferType},
    peer::Peer,
};

fn drive_until(driver: &Driver, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !driver.has_ended() && Instant::now() < deadline {
        driver.activate().expect("multiplexer tick");
    }
}

#[test]
fn smoke_transfer_completes_and_ends() {
    let peer_port = common::spawn_get_peer(1024);
    let peer = Rc::new(Peer::new("P1", common::loopback(), peer_port));

    let start = StartParams {
        server_port: common::free_port(),
        peers: Rc::new(vec![peer]),
        socks_proxy: None,
        default_timeout_ms: 5000,
        default_stallout_ms: 5000,
        start_delay_ms: 0,
        heartbeat_ms: 1000,
        transfer_type: TransferType::None,
        wait_time_pool_ns: vec![],
        percent_servers: 1.0,
        end_time_ms: 0,
    };
    let xfer = TransferParams {
        transfer_type: TransferType::Get,
        size_bytes: 1024,
        timeout_ms: 0,
        stallout_ms: 0,
        send_rate_bps: 0,
        peers: None,
    };
    let end = EndParams {
        size: 0,
        count: 1,
        time_ms: 0,
    };

    let actions = vec![
        ("start".to_string(), Action::Start(start)),
        ("xfer".to_string(), Action::Transfer(xfer)),
        ("end".to_string(), Action::End(end)),
    ];
    let graph = ActionGraph::build(actions, vec![(0, 1), (1, 2)]).unwrap();
    let driver = Driver::new(graph).unwrap();

    drive_until(&driver, Duration::from_secs(5));

    assert!(driver.has_ended(), "driver did not end within timeout");
    assert!(driver.total_bytes_read() >= 1024);
    assert_eq!(driver.total_transfers_succeeded(), 1);
    assert_eq!(driver.total_transfers_failed(), 0);
}
