//! Shutdown coordination.
//!
//! Interrupts never touch server state directly. `signal-hook` records the
//! signal and wakes the poller through its self-pipe; a [`ShutdownHandle`]
//! does the same through a [`Waker`]. Either way the event loop sees an
//! ordinary readiness event and flips its own stop flag on its own thread.

use crate::runtime::SetupError;
use mio::{Interest, Registry, Token, Waker};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_mio::v1_0::Signals;
use std::io;
use std::os::raw::c_int;
use std::sync::Arc;
use tracing::info;

/// Token for the signal self-pipe.
pub const SIGNAL_TOKEN: Token = Token(usize::MAX);

/// Token for programmatic shutdown requests.
pub const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Owns the stop flag and the sources that can set it.
pub struct ShutdownCoordinator {
    signals: Signals,
    waker: Arc<Waker>,
    requested: bool,
}

impl ShutdownCoordinator {
    /// Watch SIGINT and SIGTERM.
    pub fn new(registry: &Registry) -> Result<Self, SetupError> {
        Self::with_signals(registry, &[SIGINT, SIGTERM])
    }

    /// Watch an explicit signal set.
    pub fn with_signals(registry: &Registry, watched: &[c_int]) -> Result<Self, SetupError> {
        let mut signals = Signals::new(watched).map_err(SetupError::Signals)?;
        registry
            .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)
            .map_err(SetupError::Poll)?;
        let waker = Waker::new(registry, WAKE_TOKEN).map_err(SetupError::Poll)?;

        Ok(Self {
            signals,
            waker: Arc::new(waker),
            requested: false,
        })
    }

    /// A handle that requests shutdown from any thread.
    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            waker: Arc::clone(&self.waker),
        }
    }

    /// Whether `token` belongs to one of the shutdown sources.
    pub fn owns(token: Token) -> bool {
        token == SIGNAL_TOKEN || token == WAKE_TOKEN
    }

    /// Consume a readiness event from a shutdown source.
    pub fn on_ready(&mut self, token: Token) {
        match token {
            SIGNAL_TOKEN => {
                for signal in self.signals.pending() {
                    info!(signal, "Shutdown gracefully...");
                    self.requested = true;
                }
            }
            WAKE_TOKEN => {
                info!("Shutdown requested");
                self.requested = true;
            }
            _ => {}
        }
    }

    /// The stop flag. Once set it stays set.
    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// Cloneable trigger for an orderly stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Ask the event loop to drain and stop.
    pub fn trigger(&self) -> io::Result<()> {
        self.waker.wake()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use signal_hook::consts::SIGUSR1;
    use std::time::Duration;

    fn poll_tokens(poll: &mut Poll) -> Vec<Token> {
        let mut events = Events::with_capacity(8);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        events.iter().map(|e| e.token()).collect()
    }

    #[test]
    fn test_handle_sets_flag() {
        let mut poll = Poll::new().unwrap();
        let mut coordinator = ShutdownCoordinator::with_signals(poll.registry(), &[SIGUSR1]).unwrap();
        assert!(!coordinator.is_requested());

        let handle = coordinator.handle();
        std::thread::spawn(move || handle.trigger().unwrap())
            .join()
            .unwrap();

        let tokens = poll_tokens(&mut poll);
        assert!(tokens.contains(&WAKE_TOKEN));
        for token in tokens {
            assert!(ShutdownCoordinator::owns(token));
            coordinator.on_ready(token);
        }
        assert!(coordinator.is_requested());
    }

    #[test]
    fn test_signal_sets_flag() {
        let mut poll = Poll::new().unwrap();
        let mut coordinator = ShutdownCoordinator::with_signals(poll.registry(), &[SIGUSR1]).unwrap();

        signal_hook::low_level::raise(SIGUSR1).unwrap();

        let tokens = poll_tokens(&mut poll);
        assert!(tokens.contains(&SIGNAL_TOKEN));
        coordinator.on_ready(SIGNAL_TOKEN);
        assert!(coordinator.is_requested());

        // Never cleared by later events.
        coordinator.on_ready(Token(3));
        assert!(coordinator.is_requested());
    }

    #[test]
    fn test_owns_only_shutdown_tokens() {
        assert!(ShutdownCoordinator::owns(SIGNAL_TOKEN));
        assert!(ShutdownCoordinator::owns(WAKE_TOKEN));
        assert!(!ShutdownCoordinator::owns(Token(0)));
    }
}
