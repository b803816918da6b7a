//! Poll-driven echo runtime.
//!
//! Readiness-based I/O through mio (epoll on Linux, kqueue on macOS):
//! - `Listener`: the bound listening socket
//! - `ConnectionTable`: fixed-capacity slot table of watched descriptors
//! - `echo_burst`: drains one burst and writes it back
//! - `ShutdownCoordinator`: turns interrupts into poll events
//! - `EventLoop`: ties the above together on a single thread

mod connection;
mod echo;
mod error;
mod event_loop;
mod listener;
mod shutdown;

pub use connection::{Connection, ConnectionTable, RegisterError, Slot, SlotId};
pub use echo::echo_burst;
pub use error::SetupError;
pub use event_loop::{EventLoop, RunSummary};
pub use listener::Listener;
pub use shutdown::{ShutdownCoordinator, ShutdownHandle};

use crate::config::Config;
use tracing::info;

/// Serve until interrupted.
///
/// Setup failures are returned before any connection is accepted; once the
/// loop is running only a poller failure ends it early.
pub fn run(config: Config) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let event_loop = EventLoop::new(&config)?;

    info!(
        addr = %event_loop.local_addr(),
        capacity = config.max_connections,
        backlog = config.backlog,
        "Listening on port {}...",
        event_loop.local_addr().port()
    );

    Ok(event_loop.run()?)
}
