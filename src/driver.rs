// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The orchestration core (§4.8). Owns the multiplexer, the forwarding
//! queues, the action graph, and every counter driving heartbeats and end
//! conditions. Everything here takes `&self`: state lives behind a single
//! `Rc<RefCell<Inner>>`, the same peer-wrapper idiom used throughout this
//! crate, so handler callbacks dispatched from deep inside the multiplexer
//! can call back into the driver (e.g. to initiate the next transfer)
//! without a borrow checker fight.

use crate::{
    fail::Fail,
    forwarding::{ForwardEntry, ForwardingQueues},
    graph::{Action, ActionGraph, StartParams, TransferParams, TransferType, VertexId},
    multiplexer::{HandlerObj, Multiplexer, OwnedSource},
    peer::Peer,
    pool::PeerPool,
    server::Server,
    time::{now_micros, now_millis},
    timer::Timer,
    transfer::{Transfer, TransferId},
    transport::{DirectDialer, Transport},
};
use mio::Interest;
use rand::Rng;
use std::{cell::RefCell, os::unix::io::RawFd, rc::Rc};

//==============================================================================
// Constants & Structures
//==============================================================================

const DEFAULT_HEARTBEAT_MS: u64 = 1000;
const TRANSFER_HEARTBEAT_MS: u64 = 1500;

#[derive(Default)]
struct Counters {
    window_bytes_read: u64,
    window_bytes_written: u64,
    window_transfers_ok: u64,
    window_transfers_err: u64,
    total_bytes_read: u64,
    total_bytes_written: u64,
    total_transfers_ok: u64,
    total_transfers_err: u64,
}

struct Inner {
    graph: ActionGraph,
    start: StartParams,
    mux: Multiplexer,
    forwarding: ForwardingQueues,
    chosen_peers: Option<PeerPool>,
    honor_per_action_peers: bool,
    client_has_ended: bool,
    server_has_ended: bool,
    start_time_ms: i64,
    next_seq: u64,
    counters: Counters,
    // Kept alive for the driver's lifetime; the multiplexer holds its own
    // `Rc` clone of the handler, so dropping this would not close the
    // listening socket early, but there is no reason to let it go.
    _server: Rc<RefCell<Server>>,
}

/// Cheaply-cloneable driver handle. See module docs for the ownership model.
#[derive(Clone)]
pub struct Driver {
    inner: Rc<RefCell<Inner>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Driver].
impl Driver {
    /// Builds a driver from a validated graph (§4.8 lifecycle steps 1-5).
    /// Failure at the listening-server step aborts construction, matching
    /// the C original's `tgendriver_new` returning `NULL`.
    pub fn new(graph: ActionGraph) -> Result<Self, Fail> {
        let start_vertex = graph.start();
        let start = match graph.action(start_vertex) {
            Action::Start(s) => s.clone(),
            _ => {
                return Err(Fail::GraphFailure {
                    details: "start vertex is not a Start action",
                })
            }
        };

        let mux = Multiplexer::new()?;
        let server = Server::bind(&mux, start.server_port)?;
        let has_edges = graph.has_edges();
        let transfer_type = start.transfer_type;
        let start_delay_ms = start.start_delay_ms;
        let heartbeat_ms = if start.heartbeat_ms == 0 {
            DEFAULT_HEARTBEAT_MS
        } else {
            start.heartbeat_ms
        };

        let inner = Inner {
            graph,
            start,
            mux: mux.clone(),
            forwarding: ForwardingQueues::new(),
            chosen_peers: None,
            honor_per_action_peers: false,
            client_has_ended: false,
            server_has_ended: false,
            start_time_ms: now_millis(),
            next_seq: 0,
            counters: Counters::default(),
            _server: server,
        };
        let driver = Driver {
            inner: Rc::new(RefCell::new(inner)),
        };

        // Step 2: heartbeat timer, periodic, never self-cancels.
        let hb_driver = driver.clone();
        Timer::arm(
            &mux,
            heartbeat_ms,
            heartbeat_ms,
            Box::new(move |_driver| hb_driver.heartbeat_tick()),
        )?;

        // Step 4: transfer heartbeat for forwarding roles.
        if matches!(transfer_type, TransferType::ForwardServe | TransferType::ForwardReturn) {
            let th_driver = driver.clone();
            Timer::arm(
                &mux,
                TRANSFER_HEARTBEAT_MS,
                TRANSFER_HEARTBEAT_MS,
                Box::new(move |driver| {
                    th_driver.process(start_vertex);
                    driver.mux_check_timeouts();
                }),
            )?;
        }

        // Step 5: one-shot start-client timer, only if there's anything to walk.
        if has_edges {
            let sc_driver = driver.clone();
            Timer::arm(&mux, start_delay_ms, 0, Box::new(move |_driver| sc_driver.process(start_vertex)))?;
        }

        Ok(driver)
    }

    //--------------------------------------------------------------------
    // Action processing (§4.8)
    //--------------------------------------------------------------------

    /// Dispatches a vertex by its action variant.
    pub fn process(&self, v: VertexId) {
        enum Kind {
            Start,
            Transfer,
            Pause,
            End,
        }
        let kind = {
            let inner = self.inner.borrow();
            match inner.graph.action(v) {
                Action::Start(_) => Kind::Start,
                Action::Transfer(_) => Kind::Transfer,
                Action::Pause(_) => Kind::Pause,
                Action::End(_) => Kind::End,
            }
        };
        match kind {
            Kind::Start => self.continue_next(v),
            Kind::Transfer => self.initiate_transfer(v),
            Kind::Pause => self.handle_pause(v),
            Kind::End => {
                self.check_end(v);
                self.continue_next(v);
            }
        }
    }

    /// Drains `v`'s successor queue in order. A no-op once `clientHasEnded`.
    pub fn continue_next(&self, v: VertexId) {
        if self.inner.borrow().client_has_ended {
            return;
        }
        let successors = self.inner.borrow().graph.successors(v);
        for s in successors {
            self.process(s);
        }
    }

    /// Peer selection, transport construction, and transfer registration
    /// (§4.8 `initiate_transfer`, steps 1-8).
    fn initiate_transfer(&self, v: VertexId) {
        let params: TransferParams = {
            let inner = self.inner.borrow();
            match inner.graph.action(v) {
                Action::Transfer(t) => t.clone(),
                _ => return,
            }
        };

        let now_us = now_micros();

        // Step 3: FORWARD_RETURN destination comes from forwardPeers.
        let mut forward_return_name: Option<String> = None;
        if params.transfer_type == TransferType::ForwardReturn {
            match self.inner.borrow_mut().forwarding.take_eligible_peer(now_us) {
                Some(entry) => forward_return_name = Some(entry.peer_name),
                None => return, // retried by the 1500ms transfer heartbeat
            }
        }

        // Step 4: FORWARD_SERVE payload body comes from forwardPayloads.
        let mut forward_label: Option<String> = None;
        if params.transfer_type == TransferType::ForwardServe {
            let eligible = self.inner.borrow().forwarding.payload_head_eligible(now_us);
            if !eligible {
                return;
            }
            forward_label = self.inner.borrow_mut().forwarding.get_payload().map(|e| e.peer_name);
        }

        // Steps 1-2: candidate pool + one-time chosenPeers materialization.
        self.ensure_chosen_peers(&params);

        let honor_override = self.inner.borrow().honor_per_action_peers;
        let peer = match &forward_return_name {
            Some(name) => self.find_peer_by_name(name).or_else(|| self.random_chosen_peer()),
            None if honor_override && params.peers.is_some() => {
                let overridden = PeerPool::from_peers((*params.peers.clone().unwrap()).clone());
                overridden.random().cloned().or_else(|| self.random_chosen_peer())
            }
            None => self.random_chosen_peer(),
        };

        let peer = match peer {
            Some(p) => p,
            None => {
                let id_string = self.inner.borrow().graph.id_string(v).to_string();
                log::warn!(target: "tgen::driver", "no candidate peer for {id_string}, skipping");
                self.continue_next(v);
                return;
            }
        };

        // Step 6: active transport, optionally through the SOCKS proxy.
        let proxy = self.inner.borrow().start.socks_proxy.clone();
        let byte_hook = self.make_byte_hook();
        let transport = match Transport::connect_active(self, proxy.as_deref(), peer, &DirectDialer, byte_hook) {
            Ok(t) => t,
            Err(e) => {
                log::warn!(target: "tgen::driver", "transport setup failed: {e}");
                self.continue_next(v);
                return;
            }
        };

        // Step 7: transfer construction.
        let (default_timeout, default_stallout) = {
            let inner = self.inner.borrow();
            (inner.start.default_timeout_ms, inner.start.default_stallout_ms)
        };
        let timeout_ms = if params.timeout_ms == 0 { default_timeout } else { params.timeout_ms };
        let stallout_ms = if params.stallout_ms == 0 { default_stallout } else { params.stallout_ms };

        let id = TransferId {
            graph_vertex_id: Some(v),
            sequence_number: self.next_sequence(),
        };
        let transfer_type = params.transfer_type;
        let fd = transport.as_raw_fd();
        let transfer: Rc<RefCell<dyn HandlerObj>> = Rc::new(RefCell::new(Transfer::new_active(
            id,
            params.transfer_type,
            params.size_bytes,
            timeout_ms,
            stallout_ms,
            params.send_rate_bps,
            transport,
            forward_label,
            Box::new(move |driver: &Driver, id, success| driver.on_transfer_complete(id, transfer_type, success)),
        )));

        // Step 8: register with the multiplexer.
        let mux = self.inner.borrow().mux.clone();
        if let Err(e) = mux.register(OwnedSource::new(fd), Interest::READABLE | Interest::WRITABLE, transfer) {
            log::warn!(target: "tgen::driver", "failed to register transfer: {e}");
            self.continue_next(v);
        }
    }

    /// Fixed-duration pause installs a one-shot timer; a synchronization
    /// barrier advances only on the visit that first reaches its in-degree.
    fn handle_pause(&self, v: VertexId) {
        let duration_ms = {
            let inner = self.inner.borrow();
            match inner.graph.action(v) {
                Action::Pause(p) => p.duration_ms,
                _ => return,
            }
        };

        match duration_ms {
            Some(ms) => {
                let mux = self.inner.borrow().mux.clone();
                let d = self.clone();
                if Timer::arm(&mux, ms, 0, Box::new(move |_driver| d.continue_next(v))).is_err() {
                    self.continue_next(v);
                }
            }
            None => {
                let in_degree = self.inner.borrow().graph.in_degree(v);
                let (before, fires) = {
                    let inner = self.inner.borrow();
                    match inner.graph.action(v) {
                        Action::Pause(p) => (p.visited_count(), p.increment_visited(in_degree)),
                        _ => return,
                    }
                };
                if fires && before < in_degree.max(1) {
                    self.continue_next(v);
                }
            }
        }
    }

    /// Evaluates an `End` vertex's thresholds against cumulative counters
    /// (§4.8 `check_end`). Pure, never fails.
    fn check_end(&self, v: VertexId) {
        let params = {
            let inner = self.inner.borrow();
            match inner.graph.action(v) {
                Action::End(e) => *e,
                _ => return,
            }
        };

        let mut inner = self.inner.borrow_mut();
        let total = inner.counters.total_bytes_read + inner.counters.total_bytes_written;
        let completed = inner.counters.total_transfers_ok;
        let elapsed_ms = now_millis() - inner.start_time_ms;

        let mut ended = false;
        if params.size != 0 && total >= params.size {
            ended = true;
        }
        if params.count != 0 && completed >= params.count {
            ended = true;
        }
        if params.time_ms != 0 && elapsed_ms >= params.time_ms as i64 {
            ended = true;
            inner.server_has_ended = true;
        }
        if ended {
            inner.client_has_ended = true;
        }
    }

    //--------------------------------------------------------------------
    // Server and transfer callbacks (§4.8)
    //--------------------------------------------------------------------

    /// Called by [crate::server::Server] on every accepted connection.
    pub fn on_new_peer(&self, fd: RawFd, peer: Peer) {
        if self.inner.borrow().client_has_ended {
            unsafe {
                libc::close(fd);
            }
            return;
        }

        let role = self.inner.borrow().start.transfer_type;
        let (default_timeout, default_stallout) = {
            let inner = self.inner.borrow();
            (inner.start.default_timeout_ms, inner.start.default_stallout_ms)
        };
        let byte_hook = self.make_byte_hook();
        let transport = Transport::from_passive(self, fd, Rc::new(peer), byte_hook);

        let id = TransferId {
            graph_vertex_id: None,
            sequence_number: self.next_sequence(),
        };
        let transfer: Rc<RefCell<dyn HandlerObj>> = Rc::new(RefCell::new(Transfer::new_passive(
            id,
            role,
            default_timeout,
            default_stallout,
            transport,
            Box::new(move |driver: &Driver, id, success| driver.on_transfer_complete(id, role, success)),
        )));

        let mux = self.inner.borrow().mux.clone();
        if let Err(e) = mux.register(OwnedSource::new(fd), Interest::READABLE | Interest::WRITABLE, transfer) {
            log::warn!(target: "tgen::driver", "failed to register accepted peer: {e}");
        }
    }

    /// Called by a [crate::transfer::Transfer] exactly once, on termination.
    pub fn on_transfer_complete(&self, id: TransferId, transfer_type: TransferType, success: bool) {
        {
            let mut inner = self.inner.borrow_mut();
            if success {
                inner.counters.window_transfers_ok += 1;
                inner.counters.total_transfers_ok += 1;
            } else {
                inner.counters.window_transfers_err += 1;
                inner.counters.total_transfers_err += 1;
            }

            // §11: on a successful `FORWARD_SERVE` completion the original
            // peeks (never pops) the tail of `forwardPayloads` purely to log
            // it; reproduced here as a log-only side effect with no effect
            // on queue state.
            if success && transfer_type == TransferType::ForwardServe {
                match inner.forwarding.peek_payload_tail() {
                    Some(entry) => log::debug!(
                        target: "tgen::driver",
                        "forward-serve complete; forwardPayloads tail is now '{}'",
                        entry.peer_name
                    ),
                    None => log::debug!(target: "tgen::driver", "forward-serve complete; forwardPayloads is empty"),
                }
            }
        }
        if let Some(v) = id.graph_vertex_id {
            self.continue_next(v);
        }
    }

    /// Called by a passive `FORWARD_SERVE` transfer once it finishes
    /// receiving a labeled payload (§4.8 "Forwarding ingress").
    pub fn set_payload(&self, peer_name: String, arrival_time_ms: i64) {
        self.enqueue_forward(peer_name, arrival_time_ms, true);
    }

    /// Called by a passive `FORWARD_RETURN` transfer once it finishes.
    pub fn set_forward_peer(&self, peer_name: String, arrival_time_ms: i64) {
        self.enqueue_forward(peer_name, arrival_time_ms, false);
    }

    fn enqueue_forward(&self, peer_name: String, arrival_time_ms: i64, is_payload: bool) {
        let arrival_us = arrival_time_ms * 1_000;
        let wait_us = self.sample_wait_time_us();
        let entry = ForwardEntry {
            peer_name,
            arrival_time_us: arrival_us,
            wait_time_us: wait_us,
        };

        let start_vertex = {
            let mut inner = self.inner.borrow_mut();
            if is_payload {
                inner.forwarding.enqueue_payload(entry);
            } else {
                inner.forwarding.enqueue_peer(entry);
            }
            inner.graph.start()
        };

        // SPEC_FULL.md §12: the original computed this timer's deadline as
        // an absolute instant (`arrival + wait`) and fed it to a timer API
        // that expects a relative delay. Here the conversion happens once,
        // at the boundary, instead of leaking the unit mismatch downstream.
        let now_us = now_micros();
        let fire_at_us = arrival_us + wait_us;
        let delay_ms = ((fire_at_us - now_us).max(0) / 1_000) as u64;

        let mux = self.inner.borrow().mux.clone();
        let d = self.clone();
        let _ = Timer::arm(&mux, delay_ms.max(1), 0, Box::new(move |_driver| d.process(start_vertex)));
    }

    fn sample_wait_time_us(&self) -> i64 {
        let inner = self.inner.borrow();
        if inner.start.wait_time_pool_ns.is_empty() {
            return 0;
        }
        let mut rng = rand::thread_rng();
        let ix = rng.gen_range(0, inner.start.wait_time_pool_ns.len());
        (inner.start.wait_time_pool_ns[ix] / 1_000) as i64
    }

    //--------------------------------------------------------------------
    // Heartbeat (§4.8)
    //--------------------------------------------------------------------

    fn heartbeat_tick(&self) {
        let mux = {
            let mut inner = self.inner.borrow_mut();
            log::info!(
                target: "tgen::heartbeat",
                "window_bytes_read={} window_bytes_written={} window_transfers_ok={} window_transfers_err={} \
                 total_bytes_read={} total_bytes_written={} total_transfers_ok={} total_transfers_err={}",
                inner.counters.window_bytes_read,
                inner.counters.window_bytes_written,
                inner.counters.window_transfers_ok,
                inner.counters.window_transfers_err,
                inner.counters.total_bytes_read,
                inner.counters.total_bytes_written,
                inner.counters.total_transfers_ok,
                inner.counters.total_transfers_err,
            );
            inner.counters.window_bytes_read = 0;
            inner.counters.window_bytes_written = 0;
            inner.counters.window_transfers_ok = 0;
            inner.counters.window_transfers_err = 0;
            inner.mux.clone()
        };
        mux.check_timeouts(self);
    }

    fn mux_check_timeouts(&self) {
        let mux = self.inner.borrow().mux.clone();
        mux.check_timeouts(self);
    }

    //--------------------------------------------------------------------
    // Peer selection helpers
    //--------------------------------------------------------------------

    fn ensure_chosen_peers(&self, params: &TransferParams) {
        if self.inner.borrow().chosen_peers.is_some() {
            return;
        }
        let (pool_source, percent) = {
            let inner = self.inner.borrow();
            let pool_source = params.peers.clone().unwrap_or_else(|| inner.start.peers.clone());
            (pool_source, inner.start.percent_servers)
        };
        let pool = PeerPool::from_peers((*pool_source).clone());
        let sampled = pool.sample_fraction(percent);
        self.inner.borrow_mut().chosen_peers = Some(sampled);
    }

    fn random_chosen_peer(&self) -> Option<Rc<Peer>> {
        self.inner.borrow().chosen_peers.as_ref().and_then(|p| p.random().cloned())
    }

    fn find_peer_by_name(&self, name: &str) -> Option<Rc<Peer>> {
        let inner = self.inner.borrow();
        if let Some(p) = inner.start.peers.iter().find(|p| p.name() == name) {
            return Some(p.clone());
        }
        if let Some(pool) = &inner.chosen_peers {
            for i in 0..pool.len() {
                if let Some(p) = pool.at(i) {
                    if p.name() == name {
                        return Some(p.clone());
                    }
                }
            }
        }
        None
    }

    fn make_byte_hook(&self) -> crate::transport::ByteHook {
        Rc::new(|driver: &Driver, bytes_read: u64, bytes_written: u64| {
            let mut inner = driver.inner.borrow_mut();
            inner.counters.window_bytes_read += bytes_read;
            inner.counters.total_bytes_read += bytes_read;
            inner.counters.window_bytes_written += bytes_written;
            inner.counters.total_bytes_written += bytes_written;
        })
    }

    fn next_sequence(&self) -> u64 {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        seq
    }

    //--------------------------------------------------------------------
    // Public surface (§6)
    //--------------------------------------------------------------------

    /// Opts into honoring a `Transfer` action's own `peers` override even
    /// after `chosenPeers` has been committed (SPEC_FULL.md §12). Default
    /// `false` matches the original's literal (and likely unintended)
    /// behavior of always reusing the first sampled set.
    pub fn with_honor_per_action_peers(self, flag: bool) -> Self {
        self.inner.borrow_mut().honor_per_action_peers = flag;
        self
    }

    /// Runs one multiplexer tick.
    pub fn activate(&self) -> Result<(), Fail> {
        let mux = self.inner.borrow().mux.clone();
        mux.loop_once(self)
    }

    /// Whether the client side has stopped initiating new transfers.
    pub fn has_ended(&self) -> bool {
        self.inner.borrow().client_has_ended
    }

    pub fn client_has_ended(&self) -> bool {
        self.inner.borrow().client_has_ended
    }

    pub fn server_has_ended(&self) -> bool {
        self.inner.borrow().server_has_ended
    }

    /// Aggregate readiness descriptor, for embedding in a larger host loop.
    pub fn epoll_descriptor(&self) -> RawFd {
        self.inner.borrow().mux.epoll_fd()
    }

    /// Cumulative bytes read across every transport this driver has owned.
    pub fn total_bytes_read(&self) -> u64 {
        self.inner.borrow().counters.total_bytes_read
    }

    /// Cumulative bytes written across every transport this driver has owned.
    pub fn total_bytes_written(&self) -> u64 {
        self.inner.borrow().counters.total_bytes_written
    }

    /// Cumulative count of transfers that terminated successfully.
    pub fn total_transfers_succeeded(&self) -> u64 {
        self.inner.borrow().counters.total_transfers_ok
    }

    /// Cumulative count of transfers that terminated any other way.
    pub fn total_transfers_failed(&self) -> u64 {
        self.inner.borrow().counters.total_transfers_err
    }

    /// Cardinality of the one-time `chosenPeers` subsample, once
    /// materialized by the first `initiate_transfer` call (§4.8 step 2).
    pub fn chosen_peer_count(&self) -> Option<usize> {
        self.inner.borrow().chosen_peers.as_ref().map(|p| p.len())
    }

    /// Whether `name` is a member of the committed `chosenPeers` subsample.
    /// `None` if `chosenPeers` has not been materialized yet.
    pub fn chosen_peers_contains(&self, name: &str) -> Option<bool> {
        let inner = self.inner.borrow();
        let pool = inner.chosen_peers.as_ref()?;
        Some((0..pool.len()).any(|i| pool.at(i).map_or(false, |p| p.name() == name)))
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{EndParams, PauseParams};

    fn bare_start(server_port: u16) -> StartParams {
        StartParams {
            server_port,
            peers: Rc::new(vec![]),
            socks_proxy: None,
            default_timeout_ms: 1000,
            default_stallout_ms: 1000,
            start_delay_ms: 0,
            heartbeat_ms: 0,
            transfer_type: TransferType::None,
            wait_time_pool_ns: vec![],
            percent_servers: 1.0,
            end_time_ms: 0,
        }
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap().local_addr().unwrap().port()
    }

    #[test]
    fn all_zero_end_thresholds_never_end_the_client() {
        let actions = vec![
            ("start".to_string(), Action::Start(bare_start(free_port()))),
            (
                "end".to_string(),
                Action::End(EndParams {
                    size: 0,
                    count: 0,
                    time_ms: 0,
                }),
            ),
        ];
        let graph = ActionGraph::build(actions, vec![(0, 1)]).unwrap();
        let driver = Driver::new(graph).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(200);
        while std::time::Instant::now() < deadline {
            driver.activate().unwrap();
        }

        assert!(!driver.has_ended());
        assert!(!driver.server_has_ended());
    }

    #[test]
    fn empty_successor_queue_is_a_no_op() {
        let actions = vec![("start".to_string(), Action::Start(bare_start(free_port())))];
        let graph = ActionGraph::build(actions, vec![]).unwrap();
        let driver = Driver::new(graph).unwrap();
        // has_edges() is false, so no start-client timer was even armed;
        // continue_next on the lone Start vertex must still be a safe no-op.
        driver.continue_next(0);
        assert!(!driver.has_ended());
    }

    #[test]
    fn on_new_peer_after_client_has_ended_closes_without_registering() {
        let port = free_port();
        let actions = vec![
            ("start".to_string(), Action::Start(bare_start(port))),
            (
                "end".to_string(),
                Action::End(EndParams {
                    size: 0,
                    count: 0,
                    time_ms: 0,
                }),
            ),
        ];
        let graph = ActionGraph::build(actions, vec![(0, 1)]).unwrap();
        let driver = Driver::new(graph).unwrap();
        driver.inner.borrow_mut().client_has_ended = true;

        let sock = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        let peer = Peer::new("p", "127.0.0.1".parse().unwrap(), 0);
        driver.on_new_peer(sock, peer);
        // No panic, no registration: the multiplexer's slab must be empty of
        // anything keyed to `sock` (it was never a valid key to begin with,
        // this just exercises the early-return path for a clean run).
    }

    #[test]
    fn barrier_pause_waits_for_every_in_edge() {
        let actions = vec![
            ("start".to_string(), Action::Start(bare_start(free_port()))),
            ("a".to_string(), Action::Pause(PauseParams::with_duration(0))),
            ("b".to_string(), Action::Pause(PauseParams::with_duration(0))),
            ("barrier".to_string(), Action::Pause(PauseParams::barrier())),
            (
                "end".to_string(),
                Action::End(EndParams {
                    size: 0,
                    count: 0,
                    time_ms: 1,
                }),
            ),
        ];
        let edges = vec![(0, 1), (0, 2), (1, 3), (2, 3), (3, 4)];
        let graph = ActionGraph::build(actions, edges).unwrap();
        let driver = Driver::new(graph).unwrap();

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        while !driver.has_ended() && std::time::Instant::now() < deadline {
            driver.activate().unwrap();
        }
        assert!(driver.has_ended());
    }
}
