// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! §8 scenario 6: an `End{time_ms}` threshold reached via a chain of
//! fixed-duration pauses shuts down both the client and the server side; a
//! peer that connects afterward is closed immediately rather than wrapped
//! in a passive transfer.
//!
//! `check_end` is only evaluated when the `End` vertex is actually visited
//! (§11: "end-condition evaluation is local to the `End` vertex reached");
//! there is no periodic re-check, so this graph walks a chain of `Pause`
//! vertices whose cumulative duration exceeds the threshold before finally
//! reaching `End`.

mod common;

use std::{
    io::Read,
    net::TcpStream,
    rc::Rc,
    time::{Duration, Instant},
};
use tgen::{
    driver::Driver,
    graph::{Action, ActionGraph, EndParams, PauseParams, StartParams, TransferType},
    peer::Peer,
};

const PAUSE_MS: u64 = 60;
const PAUSE_COUNT: usize = 6; // 360ms cumulative, past the 300ms threshold
const END_TIME_MS: u64 = 300;

#[test]
fn end_on_time_shuts_down_client_and_server() {
    let server_port = common::free_port();
    // Unused by this scenario (no Transfer vertex), but Start requires a
    // peer list field regardless.
    let peer = Rc::new(Peer::new("P1", common::loopback(), common::free_port()));

    let start = StartParams {
        server_port,
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

    let mut actions = vec![("start".to_string(), Action::Start(start))];
    let mut edges = Vec::new();
    let mut prev = 0usize;
    for i in 0..PAUSE_COUNT {
        actions.push((format!("pause{i}"), Action::Pause(PauseParams::with_duration(PAUSE_MS))));
        let v = actions.len() - 1;
        edges.push((prev, v));
        prev = v;
    }
    actions.push((
        "end".to_string(),
        Action::End(EndParams {
            size: 0,
            count: 0,
            time_ms: END_TIME_MS,
        }),
    ));
    edges.push((prev, actions.len() - 1));

    let graph = ActionGraph::build(actions, edges).unwrap();
    let driver = Driver::new(graph).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !driver.has_ended() && Instant::now() < deadline {
        driver.activate().expect("multiplexer tick");
    }

    assert!(driver.has_ended());
    assert!(driver.client_has_ended());
    assert!(driver.server_has_ended());

    let mut stream = TcpStream::connect(("127.0.0.1", server_port)).expect("connect to driver");
    stream.set_read_timeout(Some(Duration::from_millis(500))).unwrap();

    // Give the driver a few more ticks to accept and act on the connection.
    let grace = Instant::now() + Duration::from_millis(500);
    while Instant::now() < grace {
        let _ = driver.activate();
    }

    let mut buf = [0u8; 1];
    let result = stream.read(&mut buf);
    assert!(
        matches!(result, Ok(0)),
        "expected the post-end connection to be closed immediately, got {result:?}"
    );
}
