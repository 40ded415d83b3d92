//! Device mode classification.
//!
//! After the version query is sent the module may answer as the
//! bootloader, the modem, or the user application. The reply is matched
//! against the whole receive buffer in a fixed priority order:
//!
//! 1. bootloader error reply (`'f' 0x04` at the start),
//! 2. modem model string with a complete version,
//! 3. generic AT `ERROR` (UARTs already bridged),
//! 4. `not found` or a long unrecognised burst (user application console),
//! 5. anything else: wait for more bytes.

use std::fmt;

use crate::protocol::command::{
    APPLICATION_NOISE_LEN, BOOTLOADER_ERROR, BOOTLOADER_UNRECOGNISED, MODEM_ERROR, MODEM_MODEL,
    NOT_FOUND, VERSION_MIN_LEN, VERSION_OFFSET, VERSION_RESPONSE_MIN_LEN, contains, find,
};

/// Mode the module is running in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Not enough data to tell.
    Unknown,
    /// Secondary bootloader.
    Bootloader,
    /// Modem reachable through the bridged UART.
    ModemAccessible,
    /// User application console.
    UserApplication,
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Bootloader => write!(f, "bootloader"),
            Self::ModemAccessible => write!(f, "modem"),
            Self::UserApplication => write!(f, "user application"),
        }
    }
}

/// Result of classifying the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// The bootloader rejected the query.
    Bootloader,
    /// The modem answered with a complete version string.
    Modem {
        /// Firmware version reported by the modem.
        version: String,
    },
    /// The modem model was seen but its version is not complete yet.
    ModemPartial,
    /// The modem rejected the command; the bridge is already up.
    ModemError,
    /// The user application is running.
    UserApplication,
    /// Nothing recognisable yet.
    Undetermined,
}

impl Classification {
    /// The device mode this classification implies.
    pub fn device_mode(&self) -> DeviceMode {
        match self {
            Self::Bootloader => DeviceMode::Bootloader,
            Self::Modem { .. } | Self::ModemPartial | Self::ModemError => {
                DeviceMode::ModemAccessible
            },
            Self::UserApplication => DeviceMode::UserApplication,
            Self::Undetermined => DeviceMode::Unknown,
        }
    }
}

/// Classify everything received since the last recognised response.
pub fn classify(buf: &[u8]) -> Classification {
    if buf.len() > 1 && buf[0] == BOOTLOADER_ERROR && buf[1] == BOOTLOADER_UNRECOGNISED {
        return Classification::Bootloader;
    }

    if contains(buf, MODEM_MODEL) {
        return match extract_version(buf) {
            Some(version)
                if buf.len() >= VERSION_RESPONSE_MIN_LEN && version.len() >= VERSION_MIN_LEN =>
            {
                Classification::Modem { version }
            },
            _ => Classification::ModemPartial,
        };
    }

    if contains(buf, MODEM_ERROR) {
        return Classification::ModemError;
    }

    if contains(buf, NOT_FOUND) || buf.len() > APPLICATION_NOISE_LEN {
        return Classification::UserApplication;
    }

    Classification::Undetermined
}

/// Extract the firmware version following the modem model string.
///
/// The version starts [`VERSION_OFFSET`] bytes after the model and runs to
/// the next carriage return. Returns `None` until that carriage return has
/// arrived.
pub fn extract_version(buf: &[u8]) -> Option<String> {
    let model = find(buf, MODEM_MODEL, 0)?;
    let start = model + VERSION_OFFSET;
    let end = find(buf, b"\r", model + 1)?;

    if end <= start {
        return Some(String::new());
    }

    Some(String::from_utf8_lossy(&buf[start..end]).into_owned())
}
