//! Demo Mode - simulated Speeduino for testing without hardware
//!
//! Answers the signature, version and output-channel commands over an
//! in-memory duplex stream. The realtime block imitates an engine idling at
//! ~850 RPM with some sensor noise.
//!
//! Realtime block fields filled in by the simulator (other bytes read as 0):
//!
//! | offset | field                 | encoding          |
//! |--------|-----------------------|-------------------|
//! | 0      | seconds since start   | u8, wrapping      |
//! | 4-5    | MAP                   | u16 LE, kPa       |
//! | 6      | intake air temp       | u8, °C + 40       |
//! | 7      | coolant temp          | u8, °C + 40       |
//! | 9      | battery voltage       | u8, V × 10        |
//! | 10     | AFR                   | u8, AFR × 10      |
//! | 14-15  | RPM                   | u16 LE            |
//! | 24     | throttle position     | u8, % × 2         |

use byteorder::{ByteOrder, LittleEndian};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::time::Instant;
use tracing::debug;

use crate::protocol::{Command, OutputChannelsParams};

/// Signature reported by the demo ECU
pub const DEMO_SIGNATURE: &str = "speeduino 202402";

/// Version string reported by the demo ECU
pub const DEMO_VERSION: &str = "Speeduino 2024.02.4";

/// Size of the simulated realtime block
pub const REALTIME_BLOCK_LEN: usize = 130;

/// Simulated ECU
pub struct DemoEcu {
    /// Delay before each reply, standing in for serial latency
    reply_delay: Duration,
    /// Time the simulation started
    started: Instant,
    rng: StdRng,
}

impl Default for DemoEcu {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoEcu {
    /// Create a demo ECU with random sensor noise
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a demo ECU with reproducible noise
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            reply_delay: Duration::from_millis(20),
            started: Instant::now(),
            rng,
        }
    }

    /// Set the delay before each reply
    pub fn reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Serve on a background task and return the host end of the stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(self) -> DuplexStream {
        let (host, ecu) = duplex(1024);
        tokio::spawn(self.serve(ecu));
        host
    }

    async fn serve(mut self, mut stream: DuplexStream) {
        let mut pending = Vec::new();
        let mut buf = [0u8; 256];

        loop {
            let n = match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            pending.extend_from_slice(&buf[..n]);

            while let Some(reply) = self.next_reply(&mut pending) {
                tokio::time::sleep(self.reply_delay).await;
                if stream.write_all(&reply).await.is_err() {
                    return;
                }
            }
        }
        debug!("demo: host disconnected");
    }

    /// Consume one complete command from `pending` and build its reply.
    /// Returns `None` once `pending` holds no complete command.
    fn next_reply(&mut self, pending: &mut Vec<u8>) -> Option<Vec<u8>> {
        loop {
            let first = *pending.first()?;

            if first == Command::QuerySignature.byte() {
                pending.remove(0);
                return Some(DEMO_SIGNATURE.as_bytes().to_vec());
            }
            if first == Command::QueryVersion.byte() {
                pending.remove(0);
                return Some(DEMO_VERSION.as_bytes().to_vec());
            }
            if first == Command::ReadOutputChannels.byte() {
                // Wait for the rest of the frame
                let params = OutputChannelsParams::from_bytes(pending)?;
                pending.drain(..OutputChannelsParams::FRAME_LEN);
                return Some(self.output_channels(&params));
            }

            debug!("demo: ignoring command byte {:#04x}", first);
            pending.remove(0);
        }
    }

    fn output_channels(&mut self, params: &OutputChannelsParams) -> Vec<u8> {
        let block = if params.subcommand == OutputChannelsParams::REALTIME_SUBCOMMAND {
            self.realtime_block()
        } else {
            vec![0u8; REALTIME_BLOCK_LEN]
        };

        let offset = params.offset as usize;
        (offset..offset + params.length as usize)
            .map(|i| block.get(i).copied().unwrap_or(0))
            .collect()
    }

    /// Current realtime block
    pub fn realtime_block(&mut self) -> Vec<u8> {
        let t = self.started.elapsed().as_secs_f64();
        let mut block = vec![0u8; REALTIME_BLOCK_LEN];

        let rpm = 850.0 + 20.0 * (t * 2.5).sin() + self.rng.gen_range(-15.0f64..15.0);
        let map = 35.0 + 3.0 * (t * 1.7).sin() + self.rng.gen_range(-1.0f64..1.0);
        let afr = 14.7 + 0.3 * (t * 0.9).sin() + self.rng.gen_range(-0.1f64..0.1);
        let tps = 1.5 + (t * 0.3).sin().abs();
        let battery = 13.8 + self.rng.gen_range(-0.1f64..0.1);
        // Coolant warms from 20°C to 85°C over the first five minutes
        let coolant = (20.0 + t * (65.0 / 300.0)).min(85.0);

        block[0] = (t as u64 % 256) as u8;
        LittleEndian::write_u16(&mut block[4..6], map.round() as u16);
        block[6] = 25 + 40;
        block[7] = (coolant + 40.0).round() as u8;
        block[9] = (battery * 10.0).round() as u8;
        block[10] = (afr * 10.0).round() as u8;
        LittleEndian::write_u16(&mut block[14..16], rpm.round() as u16);
        block[24] = (tps * 2.0).round() as u8;

        block
    }
}
