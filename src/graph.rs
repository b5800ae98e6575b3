// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::{fail::Fail, peer::Peer};
use serde::Deserialize;
use std::{cell::Cell, collections::HashMap, rc::Rc};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Stable index of a vertex within an [ActionGraph]. Also used as the
/// "graph_vertex_id" half of a transfer's identity tuple (§3).
pub type VertexId = usize;

/// The concrete kind of transfer a `Transfer` action (or a passive transfer
/// accepted off the listening socket) represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferType {
    None,
    Get,
    Put,
    Forward,
    ForwardServe,
    ForwardReturn,
}

/// Parameters carried by a `Start` action.
#[derive(Debug, Clone)]
pub struct StartParams {
    pub server_port: u16,
    pub peers: PeerList,
    pub socks_proxy: Option<Rc<Peer>>,
    pub default_timeout_ms: u64,
    pub default_stallout_ms: u64,
    pub start_delay_ms: u64,
    pub heartbeat_ms: u64,
    pub transfer_type: TransferType,
    pub wait_time_pool_ns: Vec<u64>,
    pub percent_servers: f64,
    pub end_time_ms: u64,
}

/// Parameters carried by a `Transfer` action.
#[derive(Debug, Clone)]
pub struct TransferParams {
    pub transfer_type: TransferType,
    pub size_bytes: u64,
    /// Zero means "use `Start::default_timeout_ms`" (§11).
    pub timeout_ms: u64,
    /// Zero means "use `Start::default_stallout_ms`" (§11).
    pub stallout_ms: u64,
    pub send_rate_bps: u64,
    /// Per-action peer override. Whether this actually takes priority over
    /// the driver's committed `chosenPeers` subsample is governed by
    /// `Driver::with_honor_per_action_peers` (see SPEC_FULL.md §12).
    pub peers: Option<PeerList>,
}

/// Parameters carried by a `Pause` action: either a fixed duration, or (when
/// `duration_ms` is `None`) a synchronization barrier whose visit counter is
/// the only mutable state in the whole graph.
#[derive(Debug)]
pub struct PauseParams {
    pub duration_ms: Option<u64>,
    visited: Cell<u32>,
}

/// Parameters carried by an `End` action. Zero disables a threshold.
#[derive(Debug, Clone, Copy)]
pub struct EndParams {
    pub size: u64,
    pub count: u64,
    pub time_ms: u64,
}

/// A tagged action vertex.
#[derive(Debug)]
pub enum Action {
    Start(StartParams),
    Transfer(TransferParams),
    Pause(PauseParams),
    End(EndParams),
}

/// A shared, name-resolved list of peers, as referenced by a `Start` or
/// `Transfer` action.
pub type PeerList = Rc<Vec<Rc<Peer>>>;

struct Vertex {
    id_string: String,
    action: Action,
    successors: Vec<VertexId>,
}

/// Read-only DAG of typed action vertices with exactly one `Start`.
///
/// Actions are immutable after load; the only mutable state anywhere in the
/// graph is a `Pause` barrier's visit counter (monotonic, see
/// [Action::Pause]).
pub struct ActionGraph {
    vertices: Vec<Vertex>,
    start: VertexId,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [PauseParams].
impl PauseParams {
    pub fn with_duration(duration_ms: u64) -> Self {
        Self {
            duration_ms: Some(duration_ms),
            visited: Cell::new(0),
        }
    }

    pub fn barrier() -> Self {
        Self {
            duration_ms: None,
            visited: Cell::new(0),
        }
    }

    /// Increments the visit counter and reports whether every in-edge has
    /// now visited. Visit counts are never decremented; a barrier fires at
    /// most once (once `visited >= in_degree`, every later call also
    /// returns `true`, but `continue_next` is only ever invoked the first
    /// time by the driver).
    pub fn increment_visited(&self, in_degree: u32) -> bool {
        let v = self.visited.get() + 1;
        self.visited.set(v);
        v >= in_degree.max(1)
    }

    /// Visit count before any pending increment, so callers can tell a
    /// crossing increment (the one that first reaches `in_degree`) apart
    /// from a later one that finds the barrier already fired.
    pub fn visited_count(&self) -> u32 {
        self.visited.get()
    }
}

/// Associate functions for [ActionGraph].
impl ActionGraph {
    /// Builds a graph from an ordered vertex list plus an edge list
    /// (`from -> to`, duplicates permitted and preserved in order). Exactly
    /// one vertex must carry a `Start` action.
    pub fn build(
        actions: Vec<(String, Action)>,
        edges: Vec<(VertexId, VertexId)>,
    ) -> Result<Self, Fail> {
        let mut vertices: Vec<Vertex> = actions
            .into_iter()
            .map(|(id_string, action)| Vertex {
                id_string,
                action,
                successors: Vec::new(),
            })
            .collect();

        for (from, to) in edges {
            let v = vertices.get_mut(from).ok_or(Fail::GraphFailure {
                details: "edge references unknown source vertex",
            })?;
            if to >= vertices.len() {
                return Err(Fail::GraphFailure {
                    details: "edge references unknown destination vertex",
                });
            }
            v.successors.push(to);
        }

        let starts: Vec<VertexId> = vertices
            .iter()
            .enumerate()
            .filter(|(_, v)| matches!(v.action, Action::Start(_)))
            .map(|(ix, _)| ix)
            .collect();

        if starts.len() != 1 {
            return Err(Fail::GraphFailure {
                details: "graph must have exactly one Start action",
            });
        }

        Ok(Self {
            vertices,
            start: starts[0],
        })
    }

    /// The single `Start` vertex.
    pub fn start(&self) -> VertexId {
        self.start
    }

    /// Whether the graph has any edges beyond the implicit entry, i.e.
    /// whether there is anything for the client side to walk.
    pub fn has_edges(&self) -> bool {
        self.vertices.iter().any(|v| !v.successors.is_empty())
    }

    /// Order-preserving successor list. Returns a fresh queue each call; the
    /// same successor may appear via multiple in-edges (observable on
    /// `Pause` barriers via [PauseParams::increment_visited]).
    pub fn successors(&self, v: VertexId) -> Vec<VertexId> {
        self.vertices[v].successors.clone()
    }

    /// In-degree of a vertex, computed by scanning all edges. `Pause`
    /// barriers use this to know how many visits to wait for.
    pub fn in_degree(&self, v: VertexId) -> u32 {
        self.vertices
            .iter()
            .map(|vertex| vertex.successors.iter().filter(|&&s| s == v).count() as u32)
            .sum()
    }

    /// Stable identifier for logs.
    pub fn id_string(&self, v: VertexId) -> &str {
        &self.vertices[v].id_string
    }

    /// Borrows the action at a vertex.
    pub fn action(&self, v: VertexId) -> &Action {
        &self.vertices[v].action
    }
}

//==============================================================================
// GraphSpec: a serde-based stand-in for the out-of-scope XML/GraphML loader
//==============================================================================

/// On-disk description of a graph, deserialized from JSON. Not a faithful
/// rendition of any real TGen GraphML schema -- just enough structure to
/// build an [ActionGraph] for the binary entry point and for tests, in lieu
/// of the XML/GraphML parser that spec.md places out of scope.
#[derive(Debug, Deserialize)]
pub struct GraphSpec {
    pub peers: HashMap<String, PeerSpec>,
    pub vertices: Vec<VertexSpec>,
    pub edges: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
pub struct PeerSpec {
    pub address: std::net::IpAddr,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum VertexSpec {
    Start {
        id: String,
        server_port: u16,
        #[serde(default)]
        peers: Vec<String>,
        #[serde(default)]
        socks_proxy: Option<String>,
        #[serde(default)]
        default_timeout_ms: u64,
        #[serde(default)]
        default_stallout_ms: u64,
        #[serde(default)]
        start_delay_ms: u64,
        #[serde(default)]
        heartbeat_ms: u64,
        #[serde(default)]
        transfer_type: TransferTypeSpec,
        #[serde(default)]
        wait_time_pool_ns: Vec<u64>,
        #[serde(default = "default_percent_servers")]
        percent_servers: f64,
        #[serde(default)]
        end_time_ms: u64,
    },
    Transfer {
        id: String,
        transfer_type: TransferTypeSpec,
        size_bytes: u64,
        #[serde(default)]
        timeout_ms: u64,
        #[serde(default)]
        stallout_ms: u64,
        #[serde(default)]
        send_rate_bps: u64,
        #[serde(default)]
        peers: Option<Vec<String>>,
    },
    Pause {
        id: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    End {
        id: String,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        count: u64,
        #[serde(default)]
        time_ms: u64,
    },
}

fn default_percent_servers() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub enum TransferTypeSpec {
    #[default]
    None,
    Get,
    Put,
    Forward,
    ForwardServe,
    ForwardReturn,
}

impl From<TransferTypeSpec> for TransferType {
    fn from(s: TransferTypeSpec) -> Self {
        match s {
            TransferTypeSpec::None => TransferType::None,
            TransferTypeSpec::Get => TransferType::Get,
            TransferTypeSpec::Put => TransferType::Put,
            TransferTypeSpec::Forward => TransferType::Forward,
            TransferTypeSpec::ForwardServe => TransferType::ForwardServe,
            TransferTypeSpec::ForwardReturn => TransferType::ForwardReturn,
        }
    }
}

/// Associate functions for [GraphSpec].
impl GraphSpec {
    /// Parses a [GraphSpec] from JSON text.
    pub fn from_json(text: &str) -> Result<Self, Fail> {
        serde_json::from_str(text).map_err(|_| Fail::GraphFailure {
            details: "malformed graph document",
        })
    }

    /// Resolves peer names into [Peer] objects and builds an [ActionGraph].
    pub fn into_graph(self) -> Result<ActionGraph, Fail> {
        let peers: HashMap<String, Rc<Peer>> = self
            .peers
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    Rc::new(Peer::new(name.clone(), spec.address, spec.port)),
                )
            })
            .collect();

        let resolve = |names: &[String]| -> Result<PeerList, Fail> {
            let mut out = Vec::with_capacity(names.len());
            for name in names {
                let peer = peers.get(name).ok_or(Fail::GraphFailure {
                    details: "vertex references unknown peer name",
                })?;
                out.push(peer.clone());
            }
            Ok(Rc::new(out))
        };

        let ids: HashMap<String, VertexId> = self
            .vertices
            .iter()
            .enumerate()
            .map(|(ix, v)| (vertex_id_string(v).to_string(), ix))
            .collect();

        let mut actions = Vec::with_capacity(self.vertices.len());
        for spec in &self.vertices {
            let id_string = vertex_id_string(spec).to_string();
            let action = match spec {
                VertexSpec::Start {
                    server_port,
                    peers: peer_names,
                    socks_proxy,
                    default_timeout_ms,
                    default_stallout_ms,
                    start_delay_ms,
                    heartbeat_ms,
                    transfer_type,
                    wait_time_pool_ns,
                    percent_servers,
                    end_time_ms,
                    ..
                } => Action::Start(StartParams {
                    server_port: *server_port,
                    peers: resolve(peer_names)?,
                    socks_proxy: socks_proxy.as_ref().and_then(|n| peers.get(n).cloned()),
                    default_timeout_ms: *default_timeout_ms,
                    default_stallout_ms: *default_stallout_ms,
                    start_delay_ms: *start_delay_ms,
                    heartbeat_ms: *heartbeat_ms,
                    transfer_type: (*transfer_type).into(),
                    wait_time_pool_ns: wait_time_pool_ns.clone(),
                    percent_servers: *percent_servers,
                    end_time_ms: *end_time_ms,
                }),
                VertexSpec::Transfer {
                    transfer_type,
                    size_bytes,
                    timeout_ms,
                    stallout_ms,
                    send_rate_bps,
                    peers: peer_names,
                    ..
                } => Action::Transfer(TransferParams {
                    transfer_type: (*transfer_type).into(),
                    size_bytes: *size_bytes,
                    timeout_ms: *timeout_ms,
                    stallout_ms: *stallout_ms,
                    send_rate_bps: *send_rate_bps,
                    peers: match peer_names {
                        Some(names) => Some(resolve(names)?),
                        None => None,
                    },
                }),
                VertexSpec::Pause { duration_ms, .. } => Action::Pause(match duration_ms {
                    Some(ms) => PauseParams::with_duration(*ms),
                    None => PauseParams::barrier(),
                }),
                VertexSpec::End {
                    size,
                    count,
                    time_ms,
                    ..
                } => Action::End(EndParams {
                    size: *size,
                    count: *count,
                    time_ms: *time_ms,
                }),
            };
            actions.push((id_string, action));
        }

        let mut edges = Vec::with_capacity(self.edges.len());
        for (from, to) in &self.edges {
            let from_ix = *ids.get(from).ok_or(Fail::GraphFailure {
                details: "edge references unknown vertex id",
            })?;
            let to_ix = *ids.get(to).ok_or(Fail::GraphFailure {
                details: "edge references unknown vertex id",
            })?;
            edges.push((from_ix, to_ix));
        }

        ActionGraph::build(actions, edges)
    }
}

fn vertex_id_string(spec: &VertexSpec) -> &str {
    match spec {
        VertexSpec::Start { id, .. } => id,
        VertexSpec::Transfer { id, .. } => id,
        VertexSpec::Pause { id, .. } => id,
        VertexSpec::End { id, .. } => id,
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn end(size: u64, count: u64, time_ms: u64) -> Action {
        Action::End(EndParams { size, count, time_ms })
    }

    #[test]
    fn rejects_graph_without_exactly_one_start() {
        let actions = vec![("e".to_string(), end(0, 1, 0))];
        assert!(ActionGraph::build(actions, vec![]).is_err());
    }

    #[test]
    fn successors_preserve_order_and_duplicates() {
        let actions = vec![
            (
                "start".to_string(),
                Action::Start(StartParams {
                    server_port: 9000,
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
                }),
            ),
            ("pause".to_string(), Action::Pause(PauseParams::barrier())),
        ];
        // two edges into the same successor, in order
        let graph = ActionGraph::build(actions, vec![(0, 1), (0, 1)]).unwrap();
        assert_eq!(graph.successors(0), vec![1, 1]);
        assert_eq!(graph.in_degree(1), 2);
    }

    #[test]
    fn barrier_fires_after_exactly_in_degree_visits() {
        let pause = PauseParams::barrier();
        assert!(!pause.increment_visited(2));
        assert!(pause.increment_visited(2));
        // stays fired (never decrements), subsequent visits still report true
        assert!(pause.increment_visited(2));
    }
}
