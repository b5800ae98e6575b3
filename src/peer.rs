// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use std::net::IpAddr;

//==============================================================================
// Constants & Structures
//==============================================================================

/// A remote endpoint the driver can connect to, or that connected to us.
///
/// Immutable once constructed; shared by reference (graph actions and the
/// peer pool hold `Rc`s to the same instances, never copies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    name: String,
    address: IpAddr,
    port: u16,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Peer].
impl Peer {
    /// Creates a peer.
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            address,
            port,
        }
    }

    /// Returns the stable name used to match forwarding-queue entries
    /// against graph peer lists.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the IP address of this peer.
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Returns the TCP port of this peer.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the socket address of this peer.
    pub fn socket_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::new(self.address, self.port)
    }
}
