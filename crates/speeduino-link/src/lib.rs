//! # speeduino-link
//!
//! Client-side driver for the Speeduino serial protocol.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A half-duplex request/response engine over any async byte stream
//! - Response specs: fixed-length replies and time-bounded capture windows
//! - Signature, version and output-channel commands
//! - Serial port discovery and opening
//! - A simulated ECU for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use speeduino_link::{LinkConfig, Speeduino};
//!
//! let ecu = Speeduino::open(&LinkConfig::for_port("/dev/ttyACM0"))?;
//!
//! println!("Signature: {}", ecu.signature().await?);
//! let realtime = ecu.output_channels(16).await?;
//! println!("RPM: {}", u16::from_le_bytes([realtime[14], realtime[15]]));
//! ```

pub mod config;
pub mod demo;
pub mod protocol;
pub mod speeduino;

pub use config::LinkConfig;
pub use speeduino::{Speeduino, SpeeduinoRaw};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LinkConfig;
    pub use crate::demo::DemoEcu;
    pub use crate::protocol::{
        HalfDuplex, LinkEvent, LinkState, OutputChannelsParams, ProtocolError, ResponseSpec,
    };
    pub use crate::speeduino::{Speeduino, SpeeduinoRaw};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
