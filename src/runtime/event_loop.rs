//! mio event loop implementation.
//!
//! Single-threaded reactor. Each tick polls with a bounded timeout, then
//! handles ready slots in table order:
//! - the listener slot accepts until the backlog is empty and registers each
//!   new stream, refusing it when the table is full;
//! - a client slot gets exactly one echo burst and is then released.
//!
//! Connections are single-shot by protocol: whatever the client sent in the
//! burst that woke us is echoed, and the server closes its side. Later data
//! from the same client is never read.
//!
//! ## Blocking echo
//!
//! The echo burst runs on a blocking socket. A client that stalls mid-burst
//! (or stops reading its echo) stalls the whole loop, shutdown included,
//! until its read or write returns. There is no per-connection timeout.

use crate::config::Config;
use crate::runtime::{
    echo_burst, Connection, ConnectionTable, Listener, RegisterError, SetupError,
    ShutdownCoordinator, ShutdownHandle, SlotId,
};
use bytes::BytesMut;
use mio::net::TcpStream;
use mio::{Events, Poll, Token};
use std::io;
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counters reported when the loop stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    /// Connections returned by accept.
    pub accepted: usize,
    /// Bursts echoed without error.
    pub served: usize,
    /// Connections closed unserved because no slot was free.
    pub refused: usize,
    /// Connections shut down by the final drain.
    pub drained: usize,
}

/// The reactor and everything it owns.
pub struct EventLoop {
    poll: Poll,
    events: Events,
    listener: Listener,
    table: ConnectionTable,
    shutdown: ShutdownCoordinator,
    buf: BytesMut,
    poll_timeout: Duration,
    summary: RunSummary,
}

impl EventLoop {
    /// Bind the configured port and prepare the loop.
    pub fn new(config: &Config) -> Result<Self, SetupError> {
        let listener = Listener::bind(config.port, config.backlog)?;
        Self::with_listener(listener, config)
    }

    /// Prepare the loop around an already bound listener.
    pub fn with_listener(mut listener: Listener, config: &Config) -> Result<Self, SetupError> {
        config.validate().map_err(SetupError::Config)?;
        let poll = Poll::new().map_err(SetupError::Poll)?;
        let mut table = ConnectionTable::new(config.max_connections);
        let listener_slot = table
            .register_listener(poll.registry(), &mut listener)
            .map_err(SetupError::Poll)?;
        debug!(slot = listener_slot, "Listener held in slot");
        let shutdown = ShutdownCoordinator::new(poll.registry())?;

        Ok(Self {
            poll,
            // Room for every slot plus both shutdown sources.
            events: Events::with_capacity(config.max_connections + 2),
            listener,
            table,
            shutdown,
            buf: BytesMut::zeroed(config.buffer_size),
            poll_timeout: config.poll_timeout,
            summary: RunSummary::default(),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Handle for stopping the loop from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.handle()
    }

    /// Run until shutdown is requested, then drain every open connection.
    pub fn run(mut self) -> io::Result<RunSummary> {
        while !self.shutdown.is_requested() {
            if let Err(e) = self.tick() {
                error!(error = %e, "Poll failed");
                self.drain();
                return Err(e);
            }
        }

        self.drain();
        Ok(self.summary)
    }

    fn tick(&mut self) -> io::Result<()> {
        match self.poll.poll(&mut self.events, Some(self.poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        // Slot ids are tokens, so sorting gives table order; the shutdown
        // tokens sit at the top of the range and come last.
        let mut ready: Vec<Token> = self.events.iter().map(|event| event.token()).collect();
        ready.sort_unstable();
        ready.dedup();

        for token in ready {
            if ShutdownCoordinator::owns(token) {
                self.shutdown.on_ready(token);
            } else if self.table.is_listener(token.0) {
                self.accept_connections();
            } else {
                self.serve(token.0);
            }
        }
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.summary.accepted += 1;
                    info!(peer = %peer, "Received connection");
                    self.admit(stream, peer);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    debug!(error = %e, "Accept skipped");
                }
                Err(e) => {
                    warn!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        match self.table.register(self.poll.registry(), stream, peer) {
            Ok(slot_id) => {
                debug!(slot = slot_id, active = self.table.len(), "Connection registered");
            }
            Err(RegisterError::Full(stream)) => {
                warn!(
                    peer = %peer,
                    capacity = self.table.capacity(),
                    "Maximum connections exceeded, refusing"
                );
                refuse(stream);
                self.summary.refused += 1;
            }
            Err(RegisterError::Io(stream, e)) => {
                warn!(peer = %peer, error = %e, "Cannot watch connection, refusing");
                refuse(stream);
                self.summary.refused += 1;
            }
        }
    }

    fn serve(&mut self, slot_id: SlotId) {
        let Some(conn) = self.table.get_mut(slot_id) else {
            return;
        };

        match serve_connection(conn, &mut self.buf) {
            Ok(echoed) => {
                debug!(slot = slot_id, bytes = echoed, "Echoed burst");
                self.summary.served += 1;
            }
            Err(e) => {
                debug!(slot = slot_id, error = %e, "Connection error");
            }
        }

        // Single-shot: one burst per connection.
        self.table.release(self.poll.registry(), slot_id);
    }

    fn drain(&mut self) {
        let drained = self.table.drain(self.poll.registry());
        for &(slot, peer) in &drained {
            info!(slot, peer = %peer, "Connection shut down");
        }
        self.summary.drained = drained.len();

        info!(
            accepted = self.summary.accepted,
            served = self.summary.served,
            refused = self.summary.refused,
            drained = self.summary.drained,
            "Event loop stopped"
        );
    }
}

fn serve_connection(conn: &mut Connection, buf: &mut [u8]) -> io::Result<usize> {
    socket2::SockRef::from(&conn.stream).set_nonblocking(false)?;
    echo_burst(&mut conn.stream, buf)
}

fn refuse(stream: TcpStream) {
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        debug!(error = %e, "Shutdown on refused connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::mpsc;
    use std::thread::{self, JoinHandle};
    use std::time::Instant;

    struct TestServer {
        addr: SocketAddr,
        handle: ShutdownHandle,
        join: JoinHandle<io::Result<RunSummary>>,
    }

    impl TestServer {
        fn start(max_connections: usize, buffer_size: usize) -> Self {
            let config = Config {
                backlog: 128,
                max_connections,
                buffer_size,
                poll_timeout: Duration::from_millis(200),
                ..Config::default()
            };

            let (tx, rx) = mpsc::channel();
            let join = thread::spawn(move || {
                let listener = Listener::bind_addr("127.0.0.1:0".parse().unwrap(), config.backlog)
                    .unwrap();
                let event_loop = EventLoop::with_listener(listener, &config).unwrap();
                tx.send((event_loop.local_addr(), event_loop.shutdown_handle()))
                    .unwrap();
                event_loop.run()
            });
            let (addr, handle) = rx.recv().unwrap();

            Self { addr, handle, join }
        }

        fn connect(&self) -> std::net::TcpStream {
            let stream = std::net::TcpStream::connect(self.addr).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();
            stream
        }

        fn stop(self) -> RunSummary {
            self.handle.trigger().unwrap();
            self.join.join().unwrap().unwrap()
        }
    }

    /// Send `payload` in one write and collect everything until the server
    /// closes.
    fn round_trip(stream: &mut std::net::TcpStream, payload: &[u8]) -> Vec<u8> {
        stream.write_all(payload).unwrap();
        let mut echoed = Vec::new();
        stream.read_to_end(&mut echoed).unwrap();
        echoed
    }

    fn assert_closed_by_server(stream: &mut std::net::TcpStream) {
        let mut buf = [0u8; 16];
        match stream.read(&mut buf) {
            Ok(0) => {}
            Ok(n) => panic!("expected close, got {n} bytes"),
            Err(e) => assert_eq!(e.kind(), io::ErrorKind::ConnectionReset),
        }
    }

    #[test]
    fn test_rejects_unvalidated_config() {
        let listener = Listener::bind_addr("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        let config = Config {
            buffer_size: 0,
            ..Config::default()
        };
        assert!(matches!(
            EventLoop::with_listener(listener, &config),
            Err(SetupError::Config(_))
        ));

        let listener = Listener::bind_addr("127.0.0.1:0".parse().unwrap(), 1).unwrap();
        let config = Config {
            max_connections: usize::MAX,
            ..Config::default()
        };
        assert!(matches!(
            EventLoop::with_listener(listener, &config),
            Err(SetupError::Config(_))
        ));
    }

    #[test]
    fn test_echo_short_message_then_close() {
        let server = TestServer::start(16, 64);
        let mut client = server.connect();

        assert_eq!(round_trip(&mut client, b"hello, world"), b"hello, world");

        let summary = server.stop();
        assert_eq!(summary.served, 1);
        assert_eq!(summary.drained, 0);
    }

    #[test]
    fn test_echo_spanning_several_buffers() {
        let server = TestServer::start(16, 64);
        let mut client = server.connect();
        let payload: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        assert_eq!(round_trip(&mut client, &payload), payload);

        server.stop();
    }

    #[test]
    fn test_single_shot_close() {
        let server = TestServer::start(16, 64);
        let mut client = server.connect();

        client.write_all(b"first").unwrap();
        let mut echoed = [0u8; 5];
        client.read_exact(&mut echoed).unwrap();
        assert_eq!(&echoed, b"first");

        assert_closed_by_server(&mut client);
        // Anything sent afterwards is never echoed.
        let _ = client.write_all(b"second");
        assert_closed_by_server(&mut client);

        server.stop();
    }

    #[test]
    fn test_empty_burst_closes() {
        let server = TestServer::start(16, 64);
        let mut client = server.connect();
        client.shutdown(Shutdown::Write).unwrap();

        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).unwrap();
        assert!(echoed.is_empty());

        server.stop();
    }

    #[test]
    fn test_concurrent_clients() {
        let server = TestServer::start(128, 256);
        let addr = server.addr;

        let clients: Vec<_> = (0..20)
            .map(|i| {
                thread::spawn(move || {
                    let mut stream = std::net::TcpStream::connect(addr).unwrap();
                    stream
                        .set_read_timeout(Some(Duration::from_secs(5)))
                        .unwrap();
                    let message = format!("client {i} says hi");
                    let echoed = round_trip(&mut stream, message.as_bytes());
                    assert_eq!(echoed, message.as_bytes());
                })
            })
            .collect();
        for client in clients {
            client.join().unwrap();
        }

        let summary = server.stop();
        assert_eq!(summary.accepted, 20);
        assert_eq!(summary.served, 20);
        assert_eq!(summary.refused, 0);
    }

    #[test]
    fn test_refuses_when_table_full() {
        // Listener plus two clients.
        let server = TestServer::start(3, 64);

        let mut a = server.connect();
        let mut b = server.connect();
        let mut overflow = server.connect();

        // Accepted by the kernel, closed by the server without an echo.
        let _ = overflow.write_all(b"ignored");
        assert_closed_by_server(&mut overflow);

        assert_eq!(round_trip(&mut a, b"from a"), b"from a");
        assert_eq!(round_trip(&mut b, b"from b"), b"from b");

        // Freed slots are reused.
        let mut c = server.connect();
        assert_eq!(round_trip(&mut c, b"from c"), b"from c");

        let summary = server.stop();
        assert_eq!(summary.accepted, 4);
        assert_eq!(summary.refused, 1);
        assert_eq!(summary.served, 3);
    }

    #[test]
    fn test_shutdown_drains_open_connections() {
        let server = TestServer::start(16, 64);
        let addr = server.addr;

        let mut idle = server.connect();
        // Once this round trip completes the idle connection has been
        // accepted too, since accept order follows connect order.
        let mut witness = server.connect();
        assert_eq!(round_trip(&mut witness, b"witness"), b"witness");

        let started = Instant::now();
        let summary = server.stop();
        assert!(started.elapsed() < Duration::from_secs(2));

        assert_eq!(summary.drained, 1);
        assert_closed_by_server(&mut idle);

        // The listener is gone with the loop.
        assert!(std::net::TcpStream::connect(addr).is_err());
    }
}
