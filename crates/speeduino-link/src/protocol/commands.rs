//! Protocol commands
//!
//! Defines the Speeduino commands this driver issues and the response spec
//! each one expects.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use super::{ResponseSpec, IDENTIFY_WINDOW_MS};

/// Protocol commands for ECU communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Query ECU signature ('Q' command)
    QuerySignature,

    /// Query firmware version string ('S' command)
    QueryVersion,

    /// Read a block of output channels ('r' command)
    ReadOutputChannels,
}

impl Command {
    /// Get the command byte
    pub fn byte(&self) -> u8 {
        match self {
            Command::QuerySignature => b'Q',
            Command::QueryVersion => b'S',
            Command::ReadOutputChannels => 0x72,
        }
    }

    /// Response spec for commands without parameters.
    ///
    /// Output channel reads are sized by their request, see
    /// [`OutputChannelsParams::response_spec`].
    pub fn response_spec(&self) -> Option<ResponseSpec> {
        match self {
            Command::QuerySignature | Command::QueryVersion => {
                Some(ResponseSpec::time_bounded_ms(IDENTIFY_WINDOW_MS))
            }
            Command::ReadOutputChannels => None,
        }
    }
}

/// Output channel read parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChannelsParams {
    /// CAN ID for CAN-enabled ECUs (0 for local)
    pub can_id: u8,
    /// Sub-command; 0x30 selects the realtime data block
    pub subcommand: u8,
    /// Offset into the output channel block
    pub offset: u16,
    /// Number of bytes to read
    pub length: u16,
}

impl OutputChannelsParams {
    /// Default sub-command: realtime data
    pub const REALTIME_SUBCOMMAND: u8 = 0x30;

    /// Frame size on the wire
    pub const FRAME_LEN: usize = 7;

    /// Read `length` bytes of realtime data from the start of the block
    pub fn new(length: u16) -> Self {
        Self {
            can_id: 0,
            subcommand: Self::REALTIME_SUBCOMMAND,
            offset: 0,
            length,
        }
    }

    /// Target a CAN-attached ECU
    pub fn with_can_id(mut self, can_id: u8) -> Self {
        self.can_id = can_id;
        self
    }

    /// Select another output channel block
    pub fn with_subcommand(mut self, subcommand: u8) -> Self {
        self.subcommand = subcommand;
        self
    }

    /// Start reading at `offset`
    pub fn with_offset(mut self, offset: u16) -> Self {
        self.offset = offset;
        self
    }

    /// Encode the request frame (multi-byte fields little-endian)
    pub fn to_bytes(&self) -> [u8; Self::FRAME_LEN] {
        let mut frame = [0u8; Self::FRAME_LEN];
        frame[0] = Command::ReadOutputChannels.byte();
        frame[1] = self.can_id;
        frame[2] = self.subcommand;
        LittleEndian::write_u16(&mut frame[3..5], self.offset);
        LittleEndian::write_u16(&mut frame[5..7], self.length);
        frame
    }

    /// Decode a request frame
    pub fn from_bytes(frame: &[u8]) -> Option<Self> {
        if frame.len() < Self::FRAME_LEN || frame[0] != Command::ReadOutputChannels.byte() {
            return None;
        }
        Some(Self {
            can_id: frame[1],
            subcommand: frame[2],
            offset: LittleEndian::read_u16(&frame[3..5]),
            length: LittleEndian::read_u16(&frame[5..7]),
        })
    }

    /// The reply is exactly `length` bytes
    pub fn response_spec(&self) -> ResponseSpec {
        ResponseSpec::FixedLength(self.length as usize)
    }
}
