//! Serial port handling
//!
//! Opens the async serial stream the engine runs on, and enumerates ports.

use serialport::{ErrorKind, SerialPortInfo, SerialPortType};
use tokio_serial::{
    DataBits, FlowControl, Parity, SerialPort, SerialPortBuilderExt, SerialStream, StopBits,
};
use tracing::{debug, warn};

use super::ProtocolError;
use crate::config::LinkConfig;

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyUSB0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self {
                name: info.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        }
    }
}

/// Sort key placing ttyACM* first, then ttyUSB*, each numerically, then the rest
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "ttyACM"), (1u8, "ttyUSB")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (2, 0, basename.to_string())
}

/// List available serial ports in a stable order
pub fn list_ports() -> Vec<PortInfo> {
    let mut ports: Vec<PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(PortInfo::from)
        .collect();
    ports.sort_by_key(|p| port_sort_key(&p.name));
    ports.dedup_by(|a, b| a.name == b.name);
    ports
}

/// Open the configured port as an async stream (8N1, no flow control)
pub fn open_port(config: &LinkConfig) -> Result<SerialStream, ProtocolError> {
    config.validate()?;

    let mut port = tokio_serial::new(&config.port_name, config.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| match e.kind {
            ErrorKind::NoDevice => ProtocolError::PortNotFound(config.port_name.clone()),
            _ => ProtocolError::SerialError(e.to_string()),
        })?;

    // Opening toggles DTR, which resets Arduino-based ECUs into the bootloader
    if config.assert_dtr {
        if let Err(e) = port.write_data_terminal_ready(true) {
            warn!("open_port: failed to set DTR high: {} (continuing)", e);
        }
    }

    debug!(
        "open_port: opened {} at {} baud",
        config.port_name, config.baud_rate
    );
    Ok(port)
}
