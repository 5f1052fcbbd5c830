//! Speeduino ECU access
//!
//! [`SpeeduinoRaw`] turns named operations into command bytes and response
//! specs and hands back raw responses. [`Speeduino`] sits on top and decodes
//! the identification strings.
//!
//! Any failed request closes the link: after a broken exchange there is no
//! way to tell which bytes on the wire belong to which request.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::broadcast;
use tracing::warn;

use crate::config::LinkConfig;
use crate::protocol::{
    open_port, Command, HalfDuplex, LinkEvent, LinkState, OutputChannelsParams, ProtocolError,
    ResponseSpec, StatsSnapshot,
};

/// Byte-level command layer over a half-duplex link
#[derive(Clone)]
pub struct SpeeduinoRaw {
    link: HalfDuplex,
}

impl SpeeduinoRaw {
    /// Wrap an already running engine
    pub fn new(link: HalfDuplex) -> Self {
        Self { link }
    }

    /// Run the engine over an already open stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S>(stream: S, config: &LinkConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(HalfDuplex::spawn(stream, config))
    }

    /// Open the configured serial port and run the engine over it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        let port = open_port(config)?;
        Ok(Self::from_stream(port, config))
    }

    /// Send a command, closing the link if the exchange fails
    pub async fn write_and_close_if_error(
        &self,
        command: impl Into<Vec<u8>>,
        spec: ResponseSpec,
    ) -> Result<Vec<u8>, ProtocolError> {
        let result = self.link.write(command, spec).await;
        if let Err(e) = &result {
            if !self.link.is_closed() {
                warn!("closing link after failed request: {}", e);
            }
            self.link.close();
        }
        result
    }

    /// Raw signature response ('Q')
    pub async fn signature(&self) -> Result<Vec<u8>, ProtocolError> {
        self.simple_command(Command::QuerySignature).await
    }

    /// Raw version response ('S')
    pub async fn version_info(&self) -> Result<Vec<u8>, ProtocolError> {
        self.simple_command(Command::QueryVersion).await
    }

    /// Read a block of output channels
    pub async fn output_channels(
        &self,
        params: OutputChannelsParams,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.write_and_close_if_error(params.to_bytes().to_vec(), params.response_spec())
            .await
    }

    /// The underlying engine handle
    pub fn link(&self) -> &HalfDuplex {
        &self.link
    }

    async fn simple_command(&self, command: Command) -> Result<Vec<u8>, ProtocolError> {
        let spec = command.response_spec().ok_or_else(|| {
            ProtocolError::InvalidConfig(format!("{:?} needs request parameters", command))
        })?;
        self.write_and_close_if_error(vec![command.byte()], spec)
            .await
    }
}

/// Speeduino ECU connection
#[derive(Clone)]
pub struct Speeduino {
    raw: SpeeduinoRaw,
}

impl Speeduino {
    /// Run over an already open stream (a serial port, a socket, or a test double).
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S>(stream: S, config: &LinkConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            raw: SpeeduinoRaw::from_stream(stream, config),
        }
    }

    /// Open the serial port named in `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &LinkConfig) -> Result<Self, ProtocolError> {
        Ok(Self {
            raw: SpeeduinoRaw::open(config)?,
        })
    }

    /// ECU signature, e.g. "speeduino 202402"
    pub async fn signature(&self) -> Result<String, ProtocolError> {
        self.raw.signature().await.map(|r| decode_ascii(&r))
    }

    /// Firmware version string
    pub async fn version_info(&self) -> Result<String, ProtocolError> {
        self.raw.version_info().await.map(|r| decode_ascii(&r))
    }

    /// Read `length` bytes of realtime data from the local ECU.
    /// Decoding the block is up to the caller.
    pub async fn output_channels(&self, length: u16) -> Result<Vec<u8>, ProtocolError> {
        self.raw
            .output_channels(OutputChannelsParams::new(length))
            .await
    }

    /// Read output channels with explicit CAN ID, sub-command and offset
    pub async fn read_output_channels(
        &self,
        params: OutputChannelsParams,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.raw.output_channels(params).await
    }

    /// Send arbitrary command bytes under the same close-on-failure policy
    pub async fn raw_command(
        &self,
        command: impl Into<Vec<u8>>,
        spec: ResponseSpec,
    ) -> Result<Vec<u8>, ProtocolError> {
        self.raw.write_and_close_if_error(command, spec).await
    }

    /// Subscribe to unexpected-data and transport-error notifications
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.raw.link().subscribe()
    }

    /// Close the connection
    pub fn close(&self) {
        self.raw.link().close();
    }

    /// Wait until the connection has been closed
    pub async fn closed(&self) {
        self.raw.link().closed().await;
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.raw.link().state()
    }

    /// Traffic counters
    pub fn stats(&self) -> StatsSnapshot {
        self.raw.link().stats()
    }

    /// Byte-level access
    pub fn raw(&self) -> &SpeeduinoRaw {
        &self.raw
    }
}

/// 7-bit ASCII; the high bit of each byte is cleared
fn decode_ascii(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b & 0x7f)).collect()
}
