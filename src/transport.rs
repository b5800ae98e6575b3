// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! One TCP connection, active or passive (§4.4). SOCKS negotiation is a
//! seam, not an implementation: the actual handshake bytes are out of scope
//! (spec §1), so `Transport` only calls an injected [SocksDialer] before
//! reporting itself ready, and ships a no-op default for direct connections.

use crate::{driver::Driver, fail::Fail, peer::Peer};
use std::{cell::Cell, io, mem, net::IpAddr, os::unix::io::RawFd, rc::Rc};

//==============================================================================
// Constants & Structures
//==============================================================================

/// Performs the proxy handshake for an active [Transport]. The wire format
/// of a real SOCKS exchange is out of scope; implementors plug in their own
/// dialer here. [DirectDialer] is the default, used whenever no proxy peer
/// is configured.
pub trait SocksDialer {
    fn handshake(&self, fd: RawFd, target: &Peer) -> Result<(), Fail>;
}

/// No-op dialer used for unproxied connections.
pub struct DirectDialer;

impl SocksDialer for DirectDialer {
    fn handshake(&self, _fd: RawFd, _target: &Peer) -> Result<(), Fail> {
        Ok(())
    }
}

/// Counts bytes moved by a transport and reports them to the driver.
pub type ByteHook = Rc<dyn Fn(&Driver, u64, u64)>;

/// One connected (or connecting) socket, active or passive. Every
/// successful `read`/`write` reports through `byte_hook`.
pub struct Transport {
    fd: RawFd,
    peer: Rc<Peer>,
    driver: Driver,
    byte_hook: ByteHook,
    connected: Cell<bool>,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Transport].
impl Transport {
    /// Opens a non-blocking connection to `target`, optionally through
    /// `proxy` via `dialer`. The connection completes asynchronously; the
    /// caller registers the descriptor for writability to detect completion.
    pub fn connect_active(
        driver: &Driver,
        proxy: Option<&Peer>,
        target: Rc<Peer>,
        dialer: &dyn SocksDialer,
        byte_hook: ByteHook,
    ) -> Result<Self, Fail> {
        let connect_to: &Peer = proxy.unwrap_or(&target);
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(Fail::TransportFailure {
                details: "socket() failed",
            });
        }
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        let (addr, len) = sockaddr_of(connect_to.address(), connect_to.port());
        let rc = unsafe { libc::connect(fd, &addr as *const _ as *const libc::sockaddr, len) };
        if rc < 0 {
            let errno = io::Error::last_os_error();
            if errno.raw_os_error() != Some(libc::EINPROGRESS) {
                unsafe { libc::close(fd) };
                return Err(Fail::TransportFailure {
                    details: "connect() failed",
                });
            }
        }

        if proxy.is_some() {
            dialer.handshake(fd, &target)?;
        }

        Ok(Transport {
            fd,
            peer: target,
            driver: driver.clone(),
            byte_hook,
            connected: Cell::new(proxy.is_none() && rc == 0),
        })
    }

    /// Wraps an already-accepted descriptor (§4.3's `Server::accept_one`).
    pub fn from_passive(driver: &Driver, fd: RawFd, peer: Rc<Peer>, byte_hook: ByteHook) -> Self {
        Transport {
            fd,
            peer,
            driver: driver.clone(),
            byte_hook,
            connected: Cell::new(true),
        }
    }

    pub fn peer(&self) -> &Rc<Peer> {
        &self.peer
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Whether a nonblocking `connect()` has finished, per `SO_ERROR`.
    pub fn poll_connected(&self) -> Result<bool, Fail> {
        if self.connected.get() {
            return Ok(true);
        }
        let mut err: libc::c_int = 0;
        let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                self.fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut err as *mut _ as *mut libc::c_void,
                &mut len,
            )
        };
        if rc < 0 || err != 0 {
            return Err(Fail::TransportFailure {
                details: "connect() completed with error",
            });
        }
        self.connected.set(true);
        Ok(true)
    }

    /// Non-blocking read. Reports nonzero reads through `byte_hook`.
    pub fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = unsafe { libc::read(self.fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n > 0 {
            (self.byte_hook)(&self.driver, n as u64, 0);
        }
        Ok(n as usize)
    }

    /// Non-blocking write. Reports nonzero writes through `byte_hook`.
    pub fn write(&self, buf: &[u8]) -> io::Result<usize> {
        let n = unsafe { libc::write(self.fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        if n > 0 {
            (self.byte_hook)(&self.driver, 0, n as u64);
        }
        Ok(n as usize)
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn sockaddr_of(address: IpAddr, port: u16) -> (libc::sockaddr_in, libc::socklen_t) {
    let ip = match address {
        IpAddr::V4(v4) => v4,
        IpAddr::V6(_) => panic!("IPv6 peers are not supported by the raw-socket transport"),
    };
    let addr = libc::sockaddr_in {
        sin_family: libc::AF_INET as libc::sa_family_t,
        sin_port: port.to_be(),
        sin_addr: libc::in_addr {
            s_addr: u32::from(ip).to_be(),
        },
        sin_zero: [0; 8],
    };
    (addr, mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
}
