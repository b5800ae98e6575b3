// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Loopback TCP helpers shared by the end-to-end scenario tests (§8). Each
//! "peer" here speaks the minimal wire framing `transfer.rs` implements: a
//! 9-byte header (`type: u8`, `size: u64` big-endian), an optional
//! length-prefixed label for the forwarding roles, then `size` bytes of
//! payload.

#![allow(dead_code)]

use std::{
    io::{Read, Write},
    net::{IpAddr, TcpListener, TcpStream},
    thread,
};

/// Binds an ephemeral port and immediately releases it. Racy in theory, used
/// only to hand the driver's own listening server a free port in tests that
/// never actually connect to it.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

pub fn loopback() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn read_header(stream: &mut TcpStream) -> (u8, u64) {
    let mut hdr = [0u8; 9];
    stream.read_exact(&mut hdr).expect("read transfer header");
    (hdr[0], u64::from_be_bytes(hdr[1..9].try_into().unwrap()))
}

fn read_label(stream: &mut TcpStream) -> String {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).expect("read label length");
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).expect("read label bytes");
    String::from_utf8(buf).expect("label is utf8")
}

/// A peer for a `GET` transfer: accepts connections forever, and on each one
/// reads the header then writes `body_size` zero bytes back.
pub fn spawn_get_peer(body_size: u64) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind peer");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(_) => continue,
            };
            let (_kind, _size) = read_header(&mut stream);
            let chunk = vec![0u8; body_size as usize];
            let _ = stream.write_all(&chunk);
        }
    });
    port
}

/// Like [spawn_get_peer], but increments `counter` on every accepted
/// connection so a test can tell which peers were actually dialed.
pub fn spawn_counting_get_peer(body_size: u64, counter: std::sync::Arc<std::sync::atomic::AtomicUsize>) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind peer");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(_) => continue,
            };
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let (_kind, _size) = read_header(&mut stream);
            let chunk = vec![0u8; body_size as usize];
            let _ = stream.write_all(&chunk);
        }
    });
    port
}

/// A peer for a `PUT` transfer: accepts connections forever, reads the
/// header, then drains exactly `expected_size` bytes from the socket.
pub fn spawn_put_peer(expected_size: u64) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind peer");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(s) => s,
                Err(_) => continue,
            };
            let (_kind, _size) = read_header(&mut stream);
            let mut remaining = expected_size;
            let mut scratch = [0u8; 4096];
            while remaining > 0 {
                let want = remaining.min(scratch.len() as u64) as usize;
                match stream.read(&mut scratch[..want]) {
                    Ok(0) => break,
                    Ok(n) => remaining -= n as u64,
                    Err(_) => break,
                }
            }
        }
    });
    port
}

/// A peer that reads the header, writes a single byte, then goes silent
/// without closing the connection -- triggers stallout on the driver side.
pub fn spawn_silent_peer() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind peer");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let (_kind, _size) = read_header(&mut stream);
            let _ = stream.write_all(&[0u8]);
            // Hold the connection open and silent; dropping `stream` here
            // would close it and let the transfer see a clean EOF instead.
            thread::sleep(std::time::Duration::from_secs(30));
        }
    });
    port
}

/// A peer for a `FORWARD_SERVE` transfer: accepts one connection, reads the
/// header and label, then drains `size` payload bytes. Returns the label it
/// observed through the given sink once the exchange completes.
pub fn spawn_forward_serve_peer(sink: std::sync::Arc<std::sync::Mutex<Option<String>>>) -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind peer");
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let (_kind, size) = read_header(&mut stream);
            let label = read_label(&mut stream);
            let mut remaining = size;
            let mut scratch = [0u8; 4096];
            while remaining > 0 {
                let want = remaining.min(scratch.len() as u64) as usize;
                match stream.read(&mut scratch[..want]) {
                    Ok(0) => break,
                    Ok(n) => remaining -= n as u64,
                    Err(_) => break,
                }
            }
            *sink.lock().unwrap() = Some(label);
        }
    });
    port
}
