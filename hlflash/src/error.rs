//! Error types for hlflash.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for hlflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for hlflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The port was used after it was closed.
    #[error("Port is closed")]
    PortClosed,

    /// The firmware image could not be opened for reading.
    #[error("Failed to open firmware file '{}' for reading: {source}", path.display())]
    FirmwareOpen {
        /// Path of the image.
        path: PathBuf,
        /// Underlying cause.
        #[source]
        source: io::Error,
    },

    /// Reading or seeking the firmware image failed mid-transfer.
    #[error("Failed to read firmware file: {0}")]
    FirmwareRead(#[source] io::Error),

    /// The module never asserted CTS after the bootloader trigger.
    #[error("CTS is de-asserted, module has failed to enter bootloader mode after {checks} checks")]
    BootloaderEntry {
        /// Number of status checks performed.
        checks: u8,
    },

    /// A data packet was negatively acknowledged too many times.
    #[error("Packet #{sequence} rejected {retries} times, giving up")]
    RetryLimit {
        /// Sequence number of the rejected packet.
        sequence: u8,
        /// Retransmissions performed.
        retries: u32,
    },

    /// The embedding application asked the session to stop.
    #[error("Interrupted")]
    Interrupted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
