// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! One logical request/response exchange on top of a [Transport] (§4.5).
//!
//! The wire format spec.md places out of scope; what follows is the
//! smallest framing that lets the state machine actually move bytes:
//! a 9-byte header (`type: u8`, `size: u64` big-endian) optionally followed
//! by a length-prefixed peer-name label for the forwarding roles, then
//! `size` bytes of payload. `GET`/`PUT` never carry a label.

use crate::{
    driver::Driver,
    fail::Fail,
    graph::TransferType,
    multiplexer::{Disposition, HandlerObj},
    time::now_millis,
    transport::Transport,
};
use std::io::{self, ErrorKind};

//==============================================================================
// Constants & Structures
//==============================================================================

const HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Handshake,
    Active,
    Success,
    Error,
    Timeout,
    Stalled,
}

impl State {
    fn is_terminal(self) -> bool {
        !matches!(self, State::Handshake | State::Active)
    }

    fn succeeded(self) -> bool {
        matches!(self, State::Success)
    }
}

enum Direction {
    /// We constructed the transport and send the header ourselves.
    Outbound { label: Option<String> },
    /// We're on the server side of an accepted socket, waiting to learn
    /// what the peer wants.
    Inbound,
}

/// Identity tuple from §3: `(graph_vertex_id?, sequence_number)`.
#[derive(Debug, Clone, Copy)]
pub struct TransferId {
    pub graph_vertex_id: Option<usize>,
    pub sequence_number: u64,
}

/// A single transfer's state machine. Driver-initiated transfers carry
/// `graph_vertex_id`; passive (accepted) transfers do not and never call
/// `continue_next` on completion (§4.8 `on_transfer_complete`).
pub struct Transfer {
    id: TransferId,
    transfer_type: TransferType,
    /// What role a *passive* transfer was accepted under, so it can
    /// recognize forwarded payloads (§4.5's `my_role`).
    role: TransferType,
    transport: Transport,
    direction: Direction,
    state: State,
    header_buf: Vec<u8>,
    header_sent: usize,
    header_received: usize,
    label_buf: Vec<u8>,
    label_len: Option<u32>,
    size_bytes: u64,
    moved_bytes: u64,
    scratch: [u8; 4096],
    start_ms: i64,
    deadline_ms: i64,
    stall_deadline_ms: i64,
    stallout_ms: i64,
    send_rate_bps: u64,
    tokens: f64,
    last_refill_ms: i64,
    on_complete: Option<Box<dyn FnMut(&Driver, TransferId, bool)>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Transfer].
impl Transfer {
    /// Builds a driver-initiated (active) transfer. `label` is the outbound
    /// payload body for `FORWARD_SERVE` (the peer name popped by
    /// `Driver::get_payload`); `None` for `GET`/`PUT`/plain `FORWARD`.
    #[allow(clippy::too_many_arguments)]
    pub fn new_active(
        id: TransferId,
        transfer_type: TransferType,
        size_bytes: u64,
        timeout_ms: u64,
        stallout_ms: u64,
        send_rate_bps: u64,
        transport: Transport,
        label: Option<String>,
        on_complete: Box<dyn FnMut(&Driver, TransferId, bool)>,
    ) -> Self {
        let now = now_millis();
        let mut header = Vec::with_capacity(HEADER_LEN + label.as_ref().map_or(0, |l| 4 + l.len()));
        header.push(transfer_type as u8);
        header.extend_from_slice(&size_bytes.to_be_bytes());
        if let Some(l) = &label {
            header.extend_from_slice(&(l.len() as u32).to_be_bytes());
            header.extend_from_slice(l.as_bytes());
        }

        Transfer {
            id,
            transfer_type,
            role: TransferType::None,
            transport,
            direction: Direction::Outbound { label },
            state: State::Handshake,
            header_buf: header,
            header_sent: 0,
            header_received: 0,
            label_buf: Vec::new(),
            label_len: None,
            size_bytes,
            moved_bytes: 0,
            scratch: [0u8; 4096],
            start_ms: now,
            deadline_ms: now + timeout_ms as i64,
            stall_deadline_ms: now + stallout_ms as i64,
            stallout_ms: stallout_ms as i64,
            send_rate_bps,
            tokens: 0.0,
            last_refill_ms: now,
            on_complete: Some(on_complete),
        }
    }

    /// Builds a passive (accepted) transfer of type `NONE`, carrying `role`
    /// so the driver can tell it apart once the header arrives (§4.8
    /// `on_new_peer`).
    pub fn new_passive(
        id: TransferId,
        role: TransferType,
        timeout_ms: u64,
        stallout_ms: u64,
        transport: Transport,
        on_complete: Box<dyn FnMut(&Driver, TransferId, bool)>,
    ) -> Self {
        let now = now_millis();
        Transfer {
            id,
            transfer_type: TransferType::None,
            role,
            transport,
            direction: Direction::Inbound,
            state: State::Handshake,
            header_buf: vec![0u8; HEADER_LEN],
            header_sent: 0,
            header_received: 0,
            label_buf: Vec::new(),
            label_len: None,
            size_bytes: 0,
            moved_bytes: 0,
            scratch: [0u8; 4096],
            start_ms: now,
            deadline_ms: now + timeout_ms as i64,
            stall_deadline_ms: now + stallout_ms as i64,
            stallout_ms: stallout_ms as i64,
            send_rate_bps: 0,
            tokens: 0.0,
            last_refill_ms: now,
            on_complete: Some(on_complete),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    fn refill_tokens(&mut self, now: i64) {
        if self.send_rate_bps == 0 {
            return;
        }
        let elapsed_ms = (now - self.last_refill_ms).max(0) as f64;
        self.tokens += elapsed_ms / 1000.0 * self.send_rate_bps as f64;
        self.last_refill_ms = now;
    }

    fn is_sender(&self) -> bool {
        matches!(self.transfer_type, TransferType::Put | TransferType::Forward | TransferType::ForwardServe)
            || matches!(self.direction, Direction::Inbound)
    }

    fn send_header(&mut self) -> io::Result<bool> {
        while self.header_sent < self.header_buf.len() {
            match self.transport.write(&self.header_buf[self.header_sent..]) {
                Ok(0) => return Ok(false),
                Ok(n) => self.header_sent += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    fn recv_header(&mut self) -> io::Result<bool> {
        while self.header_received < HEADER_LEN {
            let mut byte = [0u8; 1];
            match self.transport.read(&mut byte) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    self.header_buf[self.header_received] = byte[0];
                    self.header_received += 1;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        if self.label_len.is_none() {
            self.transfer_type = match self.header_buf[0] {
                1 => TransferType::Get,
                2 => TransferType::Put,
                3 => TransferType::Forward,
                4 => TransferType::ForwardServe,
                5 => TransferType::ForwardReturn,
                _ => TransferType::None,
            };
            self.size_bytes = u64::from_be_bytes(self.header_buf[1..9].try_into().unwrap());
            self.label_len = Some(0);
        }
        Ok(true)
    }

    fn terminate(&mut self, state: State, driver: &Driver) -> Disposition {
        self.state = state;
        if let Direction::Inbound = self.direction {
            match self.role {
                TransferType::ForwardServe if state.succeeded() => {
                    if let Ok(label) = String::from_utf8(self.label_buf.clone()) {
                        driver.set_payload(label, self.start_ms);
                    }
                }
                TransferType::ForwardReturn if state.succeeded() => {
                    if let Ok(label) = String::from_utf8(self.label_buf.clone()) {
                        driver.set_forward_peer(label, self.start_ms);
                    }
                }
                _ => {}
            }
        }
        if let Some(mut cb) = self.on_complete.take() {
            cb(driver, self.id, state.succeeded());
        }
        Disposition::Deregister
    }

    fn step(&mut self, driver: &Driver, readable: bool, writable: bool) -> Result<Option<State>, io::Error> {
        if let Direction::Inbound = self.direction {
            if self.header_received < HEADER_LEN {
                if !readable || !self.recv_header()? {
                    return Ok(None);
                }
            }
            if matches!(self.role, TransferType::ForwardServe | TransferType::ForwardReturn) && self.label_buf.is_empty()
            {
                let mut label_len_buf = [0u8; 4];
                match self.transport.read(&mut label_len_buf) {
                    Ok(4) => {
                        let len = u32::from_be_bytes(label_len_buf) as usize;
                        self.label_buf = vec![0u8; len];
                        let _ = self.transport.read(&mut self.label_buf);
                    }
                    Ok(_) => return Ok(None),
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                    Err(e) => return Err(e),
                }
            }
            self.state = State::Active;
        } else if !self.send_header()? {
            return Ok(None);
        } else {
            self.state = State::Active;
        }

        let now = now_millis();
        if self.is_sender() {
            if !writable {
                return Ok(None);
            }
            self.refill_tokens(now);
            let remaining = self.size_bytes.saturating_sub(self.moved_bytes);
            if remaining == 0 {
                return Ok(Some(State::Success));
            }
            let mut chunk = remaining.min(self.scratch.len() as u64) as usize;
            if self.send_rate_bps > 0 {
                chunk = chunk.min(self.tokens.max(0.0) as usize);
                if chunk == 0 {
                    return Ok(None);
                }
            }
            match self.transport.write(&self.scratch[..chunk]) {
                Ok(0) => Ok(None),
                Ok(n) => {
                    self.moved_bytes += n as u64;
                    self.tokens -= n as f64;
                    self.stall_deadline_ms = now + self.stallout_ms;
                    if self.moved_bytes >= self.size_bytes {
                        Ok(Some(State::Success))
                    } else {
                        Ok(None)
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            }
        } else {
            if !readable {
                return Ok(None);
            }
            match self.transport.read(&mut self.scratch) {
                Ok(0) => Ok(Some(if self.moved_bytes >= self.size_bytes || self.size_bytes == 0 {
                    State::Success
                } else {
                    State::Error
                })),
                Ok(n) => {
                    self.moved_bytes += n as u64;
                    self.stall_deadline_ms = now + self.stallout_ms;
                    if self.size_bytes > 0 && self.moved_bytes >= self.size_bytes {
                        Ok(Some(State::Success))
                    } else {
                        Ok(None)
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
                Err(e) => Err(e),
            }
        }
    }
}

impl HandlerObj for Transfer {
    fn on_event(&mut self, driver: &Driver, readable: bool, writable: bool) -> Disposition {
        if self.state.is_terminal() {
            return Disposition::Deregister;
        }
        let now = now_millis();
        if now > self.deadline_ms {
            return self.terminate(State::Timeout, driver);
        }
        if now > self.stall_deadline_ms {
            return self.terminate(State::Stalled, driver);
        }

        match self.step(driver, readable, writable) {
            Ok(Some(state)) => self.terminate(state, driver),
            Ok(None) => Disposition::Continue,
            Err(_) => self.terminate(State::Error, driver),
        }
    }

    fn on_check_timeout(&mut self, driver: &Driver) -> bool {
        if self.state.is_terminal() {
            return true;
        }
        let now = now_millis();
        if now > self.deadline_ms {
            self.terminate(State::Timeout, driver);
            return true;
        }
        if now > self.stall_deadline_ms {
            self.terminate(State::Stalled, driver);
            return true;
        }
        false
    }
}
