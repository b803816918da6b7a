//! Listening socket.
//!
//! Owns the bound socket and hands out freshly accepted client streams.
//! Setup failures are fatal and reported as [`SetupError`]; accept failures
//! are plain I/O errors for the event loop to skip.

use crate::runtime::SetupError;
use mio::event::Source;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

/// The server's listening socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind on all IPv4 interfaces at `port`.
    pub fn bind(port: u16, backlog: i32) -> Result<Self, SetupError> {
        Self::bind_addr(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), backlog)
    }

    /// Bind on an explicit address.
    pub fn bind_addr(addr: SocketAddr, backlog: i32) -> Result<Self, SetupError> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )
        .map_err(SetupError::Socket)?;

        socket
            .set_reuse_address(true)
            .map_err(SetupError::Socket)?;
        socket
            .bind(&addr.into())
            .map_err(|source| SetupError::Bind { addr, source })?;
        socket.listen(backlog).map_err(SetupError::Listen)?;
        socket.set_nonblocking(true).map_err(SetupError::Listen)?;

        let std_listener: std::net::TcpListener = socket.into();
        let local_addr = std_listener.local_addr().map_err(SetupError::Listen)?;

        Ok(Self {
            inner: TcpListener::from_std(std_listener),
            local_addr,
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept one pending connection.
    ///
    /// Returns `WouldBlock` once the backlog is empty.
    pub fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept()
    }
}

impl Source for Listener {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.inner.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.inner.deregister(registry)
    }
}
