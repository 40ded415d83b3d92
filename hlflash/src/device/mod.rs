//! Serial adapter discovery and classification.
//!
//! HL7800 carrier boards expose the module UART through a USB-to-UART
//! bridge (FTDI on the DVKs, CP210x or CH340 on most others), or the
//! module's own Sierra Wireless USB interface. Ports are classified by
//! VID/PID so the CLI can suggest the likely one.

use std::fmt;

use crate::error::Result;
use crate::port::PortInfo;
#[cfg(feature = "native")]
use crate::port::{NativePortEnumerator, PortEnumerator};

#[cfg(feature = "native")]
use log::{debug, trace};

/// Known USB devices behind a serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Sierra Wireless module USB interface.
    SierraWireless,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs. An empty PID list matches any product.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (
        0x0403,
        &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015],
        DeviceKind::Ftdi,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71, 0xEA63], DeviceKind::Cp210x),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x5512, 0x55D4],
        DeviceKind::Ch340,
    ),
    (0x067B, &[0x2303, 0x23A3, 0x23C3, 0x23D3], DeviceKind::Prolific),
    (0x1199, &[], DeviceKind::SierraWireless),
];

impl DeviceKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Human-readable name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ftdi => "FTDI",
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Prolific => "PL2303",
            Self::SierraWireless => "Sierra Wireless",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether the kind was recognised.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    /// Ordering used when suggesting ports; lower sorts first.
    fn priority(self) -> u8 {
        match self {
            Self::SierraWireless => 0,
            Self::Ftdi => 1,
            Self::Cp210x | Self::Ch340 => 2,
            Self::Prolific => 3,
            Self::Unknown => 4,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A serial port with its classification.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl From<PortInfo> for DetectedPort {
    fn from(info: PortInfo) -> Self {
        let device = match (info.vid, info.pid) {
            (Some(vid), Some(pid)) => DeviceKind::from_vid_pid(vid, pid),
            _ => DeviceKind::Unknown,
        };
        Self {
            name: info.name,
            device,
            vid: info.vid,
            pid: info.pid,
            manufacturer: info.manufacturer,
            product: info.product,
            serial: info.serial_number,
        }
    }
}

impl DetectedPort {
    /// Whether this port is likely wired to a module.
    pub fn is_likely_module(&self) -> bool {
        self.device
            .is_known()
    }
}

impl fmt::Display for DetectedPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.device.is_known() {
            write!(f, " [{}]", self.device)?;
        } else if let (Some(vid), Some(pid)) = (self.vid, self.pid) {
            write!(f, " [VID:{vid:04X} PID:{pid:04X}]")?;
        }
        if let Some(product) = &self.product {
            write!(f, " - {product}")?;
        }
        Ok(())
    }
}

/// Enumerate serial ports, recognised adapters first.
#[cfg(feature = "native")]
pub fn detect_ports() -> Result<Vec<DetectedPort>> {
    let mut ports: Vec<DetectedPort> = NativePortEnumerator::list_ports()?
        .into_iter()
        .map(DetectedPort::from)
        .inspect(|p| trace!("Found port {p}"))
        .collect();
    sort_by_priority(&mut ports);
    debug!("Detected {} serial ports", ports.len());
    Ok(ports)
}

/// Enumerate serial ports. Without native support there are none.
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Result<Vec<DetectedPort>> {
    Ok(Vec::new())
}

fn sort_by_priority(ports: &mut [DetectedPort]) {
    ports.sort_by(|a, b| {
        a.device
            .priority()
            .cmp(&b.device.priority())
            .then_with(|| a.name.cmp(&b.name))
    });
}
