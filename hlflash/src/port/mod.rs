//! Port abstraction for the serial link to the module.
//!
//! The update session itself never touches I/O. It is driven by the
//! [`Updater`](crate::updater::Updater) event pump, which owns a `Port` and
//! feeds whatever bytes arrive into the state machine.
//!
//! ```text
//! +------------------+
//! |     Session      |   sans-I/O state machine
//! | (detect, xmodem) |
//! +--------+---------+
//!          | events / effects
//!          v
//! +--------+---------+
//! |     Updater      |   event pump
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! |   Port Trait     |
//! +--------+---------+
//!          |
//!          v
//! +--------+---------+
//! | Native SerialPort|
//! |   (serialport)   |
//! +------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use hlflash::port::Port;
//! use std::io::{Read, Write};
//!
//! fn query_version<P: Port>(port: &mut P) -> hlflash::Result<()> {
//!     port.write_all(b"ATI3\r")?;
//!     port.flush()?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}, CTS: {}", &buf[..n], port.read_cts()?);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Default baud rate of the module's UART.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout used by the event pump's polling reads.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (hardware for the module's bridge UART).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(50),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::Hardware,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the flow control mode.
    #[must_use]
    pub fn with_flow_control(mut self, flow_control: FlowControl) -> Self {
        self.flow_control = flow_control;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FlowControl {
    /// No flow control.
    None,
    /// Hardware flow control (RTS/CTS).
    #[default]
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

impl FromStr for FlowControl {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "none" | "off" => Ok(Self::None),
            "hardware" | "rtscts" => Ok(Self::Hardware),
            "software" | "xonxoff" => Ok(Self::Software),
            _ => Err(Error::Config(format!(
                "unknown flow control '{name}', expected none, hardware or software"
            ))),
        }
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial_number: Option<String>,
}

/// Byte transport to the module.
///
/// Reads are expected to time out (`ErrorKind::TimedOut`) when no data is
/// pending; the event pump treats that as "nothing arrived yet".
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Read CTS (Clear To Send) pin state.
    fn read_cts(&mut self) -> Result<bool>;

    /// Whether the port is still open.
    fn is_open(&self) -> bool;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;
}

/// Trait for listing available serial ports.
///
/// This is separated from `Port` because it's a static operation that
/// doesn't require an open port instance.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115_200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::Hardware);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 921_600)
            .with_timeout(Duration::from_secs(5))
            .with_flow_control(FlowControl::None);

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 921_600);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn test_flow_control_from_str() {
        assert_eq!("none".parse::<FlowControl>().unwrap(), FlowControl::None);
        assert_eq!("Hardware".parse::<FlowControl>().unwrap(), FlowControl::Hardware);
        assert_eq!("xonxoff".parse::<FlowControl>().unwrap(), FlowControl::Software);
        assert!(matches!(
            "rs485".parse::<FlowControl>(),
            Err(Error::Config(msg)) if msg.contains("rs485")
        ));
    }
}
