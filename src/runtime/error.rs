//! Fatal setup errors.
//!
//! Anything in here stops the process before the event loop starts.
//! Per-connection failures never surface as a `SetupError`.

use crate::config::ConfigError;
use std::fmt;
use std::io;
use std::net::SocketAddr;

/// Failure while preparing the listener, poller or signal source.
#[derive(Debug)]
pub enum SetupError {
    /// The configuration is outside what the runtime supports.
    Config(ConfigError),
    /// Socket allocation failed.
    Socket(io::Error),
    /// The address could not be bound.
    Bind { addr: SocketAddr, source: io::Error },
    /// `listen(2)` or switching the socket to non-blocking failed.
    Listen(io::Error),
    /// The poller could not be created or a source could not be registered.
    Poll(io::Error),
    /// Interrupt handlers could not be installed.
    Signals(io::Error),
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupError::Config(e) => write!(f, "{e}"),
            SetupError::Socket(e) => write!(f, "Cannot allocate socket: {e}"),
            SetupError::Bind { addr, source } => write!(f, "Bind error on {addr}: {source}"),
            SetupError::Listen(e) => write!(f, "Cannot listen: {e}"),
            SetupError::Poll(e) => write!(f, "Cannot set up poller: {e}"),
            SetupError::Signals(e) => write!(f, "Cannot install interrupt handlers: {e}"),
        }
    }
}

impl std::error::Error for SetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SetupError::Config(e) => Some(e),
            SetupError::Socket(e)
            | SetupError::Listen(e)
            | SetupError::Poll(e)
            | SetupError::Signals(e) => Some(e),
            SetupError::Bind { source, .. } => Some(source),
        }
    }
}
