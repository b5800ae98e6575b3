// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Listening endpoint (§4.3). Accepts are drained in a loop until the kernel
//! reports `EWOULDBLOCK`; each accepted peer is handed to the driver, which
//! decides whether to wrap it in a passive transfer or close it outright.

use crate::{
    driver::Driver,
    fail::Fail,
    multiplexer::{Disposition, HandlerObj, Multiplexer, OwnedSource},
    peer::Peer,
};
use mio::Interest;
use std::{
    cell::RefCell,
    mem,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    os::unix::io::RawFd,
    rc::Rc,
};

//==============================================================================
// Constants & Structures
//==============================================================================

const LISTEN_BACKLOG: i32 = 1024;

/// A bound, listening, non-blocking TCP socket registered with the
/// multiplexer. Never deregisters itself; it outlives every transfer.
pub struct Server {
    fd: RawFd,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate functions for [Server].
impl Server {
    /// Binds `0.0.0.0:port`, starts listening, and registers with `mux`.
    /// Aborts driver construction on failure per §4.8 step 3.
    pub fn bind(mux: &Multiplexer, port: u16) -> Result<Rc<RefCell<Server>>, Fail> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        if fd < 0 {
            return Err(Fail::ResourceCreationFailure {
                resource: "server",
                details: "socket() failed",
            });
        }

        let reuse: libc::c_int = 1;
        unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_REUSEADDR,
                &reuse as *const _ as *const libc::c_void,
                mem::size_of_val(&reuse) as libc::socklen_t,
            );
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        let addr = libc::sockaddr_in {
            sin_family: libc::AF_INET as libc::sa_family_t,
            sin_port: port.to_be(),
            sin_addr: libc::in_addr { s_addr: 0 },
            sin_zero: [0; 8],
        };
        let bind_rc = unsafe {
            libc::bind(
                fd,
                &addr as *const libc::sockaddr_in as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if bind_rc < 0 {
            unsafe { libc::close(fd) };
            return Err(Fail::ResourceCreationFailure {
                resource: "server",
                details: "bind() failed",
            });
        }
        if unsafe { libc::listen(fd, LISTEN_BACKLOG) } < 0 {
            unsafe { libc::close(fd) };
            return Err(Fail::ResourceCreationFailure {
                resource: "server",
                details: "listen() failed",
            });
        }

        let server = Rc::new(RefCell::new(Server { fd }));
        mux.register(
            OwnedSource::new(fd),
            Interest::READABLE,
            server.clone() as Rc<RefCell<dyn HandlerObj>>,
        )?;

        Ok(server)
    }

    fn accept_one(&self) -> Option<(RawFd, Peer)> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept(
                self.fd,
                &mut storage as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if fd < 0 {
            return None;
        }
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL, 0);
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
        }

        let (address, port) = sockaddr_to_parts(&storage);
        let name = format!("{address}:{port}");
        Some((fd, Peer::new(name, address, port)))
    }
}

impl HandlerObj for Server {
    fn on_event(&mut self, driver: &Driver, readable: bool, _writable: bool) -> Disposition {
        if !readable {
            return Disposition::Continue;
        }
        while let Some((fd, peer)) = self.accept_one() {
            driver.on_new_peer(fd, peer);
        }
        Disposition::Continue
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn sockaddr_to_parts(storage: &libc::sockaddr_storage) -> (IpAddr, u16) {
    unsafe {
        match storage.ss_family as libc::c_int {
            libc::AF_INET => {
                let sin = &*(storage as *const _ as *const libc::sockaddr_in);
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                (IpAddr::V4(ip), u16::from_be(sin.sin_port))
            }
            libc::AF_INET6 => {
                let sin6 = &*(storage as *const _ as *const libc::sockaddr_in6);
                let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
                (IpAddr::V6(ip), u16::from_be(sin6.sin6_port))
            }
            _ => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        }
    }
}
