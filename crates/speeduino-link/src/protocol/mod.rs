//! Serial Protocol Communication
//!
//! Half-duplex request/response engine for the Speeduino serial protocol.
//! Every command is written on its own and answered by either a fixed number
//! of bytes or whatever arrives within a capture window.

pub mod commands;
mod engine;
mod error;
pub mod serial;
mod spec;

pub use commands::{Command, OutputChannelsParams};
pub use engine::{HalfDuplex, LinkEvent, LinkState, StatsSnapshot};
pub use error::ProtocolError;
pub use serial::{list_ports, open_port, PortInfo};
pub use spec::{Evaluation, ResponseSpec};

/// Default baud rate for ECU communication
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default idle guard for fixed-length responses in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Capture window for the signature and version queries in milliseconds
pub const IDENTIFY_WINDOW_MS: u64 = 300;
