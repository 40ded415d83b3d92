//! Commands understood by the module and the responses that identify its mode.
//!
//! The module answers on one UART in three different personalities:
//!
//! - the secondary bootloader, which speaks a tiny binary protocol and
//!   replies `'f' 0x04` to anything it does not recognise,
//! - the HL7800 modem (AT commands), reachable once the bootloader has
//!   bridged its UART through,
//! - the user application, which prints free-form console output.

use std::fmt;

/// Bootloader error marker, first byte of an error reply.
pub const BOOTLOADER_ERROR: u8 = b'f';

/// Bootloader "unrecognised command" code, second byte of an error reply.
pub const BOOTLOADER_UNRECOGNISED: u8 = 0x04;

/// Model string printed by the modem in its `ATI3` reply.
pub const MODEM_MODEL: &[u8] = b"HL7800";

/// Generic AT error reply.
pub const MODEM_ERROR: &[u8] = b"\r\nERROR\r\n";

/// Shell reply of the user application to an unknown command.
pub const NOT_FOUND: &[u8] = b"not found";

/// Offset from the start of [`MODEM_MODEL`] to the version string (`"HL7800."`).
pub const VERSION_OFFSET: usize = 7;

/// Minimum buffered length before a version reply is trusted.
pub const VERSION_RESPONSE_MIN_LEN: usize = 14;

/// Minimum length of a plausible version string.
pub const VERSION_MIN_LEN: usize = 7;

/// Bytes the modem must print after bridging before it is queried.
pub const WAKEUP_RESPONSE_MIN_LEN: usize = 3;

/// Unclassified output longer than this is treated as application console noise.
pub const APPLICATION_NOISE_LEN: usize = 30;

/// Commands sent to the module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Unlock the secondary bootloader.
    BootloaderUnlock,
    /// Ask the bootloader to bridge the host UART through to the modem.
    BridgeUarts,
    /// `ATI3`, firmware version query.
    VersionQuery,
    /// `AT+WDSD=<len>`, announce a firmware image of `len` bytes.
    UpgradeStart(u64),
    /// `AT+WDSR=4`, accept the downloaded image and install it.
    UpgradeAccept,
    /// Shell commands that reboot the user application into its bootloader.
    EnterBootloader,
}

impl Command {
    /// Encode the command into the exact bytes put on the wire.
    pub fn encode(self) -> Vec<u8> {
        match self {
            Self::BootloaderUnlock => vec![0x70, 0x0F, 0x51, 0x2A, 0x51],
            Self::BridgeUarts => vec![0x7E, 0x01, 0x06, 0x01, 0x06],
            Self::VersionQuery => b"ATI3\r".to_vec(),
            Self::UpgradeStart(len) => format!("AT+WDSD={len}\r\n").into_bytes(),
            Self::UpgradeAccept => b"AT+WDSR=4\r\n".to_vec(),
            Self::EnterBootloader => b"mg100 bootloader\r\noob bootloader\r\n".to_vec(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BootloaderUnlock => write!(f, "bootloader unlock"),
            Self::BridgeUarts => write!(f, "bridge UARTs"),
            Self::VersionQuery => write!(f, "ATI3"),
            Self::UpgradeStart(len) => write!(f, "AT+WDSD={len}"),
            Self::UpgradeAccept => write!(f, "AT+WDSR=4"),
            Self::EnterBootloader => write!(f, "enter bootloader"),
        }
    }
}

/// Position of `needle` in `haystack`, searching from `from`.
pub fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Whether `haystack` contains `needle`.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    find(haystack, needle, 0).is_some()
}
