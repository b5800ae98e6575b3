// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

use mio::{unix::SourceFd, Interest, Registry, Token};
use std::{io, os::unix::io::RawFd};

//==============================================================================
// Constants & Structures
//==============================================================================

/// A borrowed file descriptor used purely for epoll (de)registration.
///
/// Every descriptor the crate registers -- listening socket, connected
/// socket, or kernel timer -- is owned by the component that created it
/// (`Server`, `Transport`, `Timer`), which closes it on `Drop`. `OwnedSource`
/// never closes anything itself; it exists only so the multiplexer's slab
/// has something uniform to hand to `mio::Registry`.
pub struct OwnedSource(pub(super) RawFd);

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [OwnedSource].
impl OwnedSource {
    /// Wraps a raw descriptor for registration. The caller retains ownership.
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    pub(super) fn register(&mut self, registry: &Registry, token: Token, interest: Interest) -> io::Result<()> {
        registry.register(&mut SourceFd(&self.0), token, interest)
    }

    pub(super) fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut SourceFd(&self.0))
    }
}
