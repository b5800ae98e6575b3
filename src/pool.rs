// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use crate::peer::Peer;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::{cell::RefCell, rc::Rc};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Append-only semantic multiset of peers.
///
/// `random()` draws uniformly; `at(i)` is positional. An empty pool's
/// `random()` returns `None` rather than panicking, matching
/// `tgenpool_getRandom` returning `NULL` on an empty pool.
#[derive(Clone)]
pub struct PeerPool {
    peers: Vec<Rc<Peer>>,
    rng: Rc<RefCell<SmallRng>>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [PeerPool].
impl PeerPool {
    /// Creates an empty peer pool.
    pub fn new() -> Self {
        Self {
            peers: Vec::new(),
            rng: Rc::new(RefCell::new(SmallRng::from_entropy())),
        }
    }

    /// Creates a peer pool from an existing list of peers.
    pub fn from_peers(peers: Vec<Rc<Peer>>) -> Self {
        Self {
            peers,
            rng: Rc::new(RefCell::new(SmallRng::from_entropy())),
        }
    }

    /// Appends a peer to the pool.
    pub fn add(&mut self, peer: Rc<Peer>) {
        self.peers.push(peer);
    }

    /// Number of peers currently in the pool.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether the pool has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Positional access into the pool.
    pub fn at(&self, index: usize) -> Option<&Rc<Peer>> {
        self.peers.get(index)
    }

    /// Draws a uniformly random peer from the pool, or `None` if empty.
    pub fn random(&self) -> Option<&Rc<Peer>> {
        if self.peers.is_empty() {
            return None;
        }
        let ix = self.rng.borrow_mut().gen_range(0, self.peers.len());
        self.peers.get(ix)
    }

    /// Returns a new pool containing a uniform-random subsample of
    /// `floor(fraction * len())` entries, via a Fisher-Yates-style shuffle
    /// that keeps the first `count` swapped-in entries. Mirrors
    /// `_tgendriver_initiateTransfer`'s one-time `chosenPeers` construction.
    pub fn sample_fraction(&self, fraction: f64) -> PeerPool {
        let mut shuffled: Vec<Rc<Peer>> = self.peers.clone();
        let count = ((fraction * self.peers.len() as f64).floor() as usize).min(shuffled.len());

        let mut rng = self.rng.borrow_mut();
        let n = shuffled.len();
        for i in 0..n {
            let new_loc = rng.gen_range(0, n);
            shuffled.swap(i, new_loc);
        }
        drop(rng);

        shuffled.truncate(count);
        PeerPool {
            peers: shuffled,
            rng: self.rng.clone(),
        }
    }
}

impl Default for PeerPool {
    fn default() -> Self {
        Self::new()
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn peers(n: usize) -> Vec<Rc<Peer>> {
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        (0..n).map(|i| Rc::new(Peer::new(format!("p{i}"), addr, 9000 + i as u16))).collect()
    }

    #[test]
    fn empty_pool_random_is_none() {
        let pool = PeerPool::new();
        assert!(pool.random().is_none());
    }

    #[test]
    fn sample_fraction_has_exact_cardinality() {
        let pool = PeerPool::from_peers(peers(10));
        let sampled = pool.sample_fraction(0.3);
        assert_eq!(sampled.len(), 3);
    }

    #[test]
    fn sample_fraction_never_exceeds_source_len() {
        let pool = PeerPool::from_peers(peers(3));
        let sampled = pool.sample_fraction(1.0);
        assert_eq!(sampled.len(), 3);
    }

    #[test]
    fn at_is_positional() {
        let pool = PeerPool::from_peers(peers(3));
        assert_eq!(pool.at(0).unwrap().name(), "p0");
        assert_eq!(pool.at(2).unwrap().name(), "p2");
        assert!(pool.at(3).is_none());
    }
}
