//! poll-echo: a single-threaded TCP echo server
//!
//! Multiplexes client connections over one mio poller and echoes back
//! whatever each client sends in its first burst, then closes it.
//!
//! Features:
//! - Fixed-capacity connection table; overflow connections are refused
//! - Single-shot echo: one burst per connection, no multi-message sessions
//! - Graceful drain on SIGINT/SIGTERM
//! - Configuration via CLI arguments or TOML file

pub mod config;
pub mod runtime;
