//! Firmware images handed to the transfer engine.
//!
//! The engine only needs to open an image, know its length, seek and read.
//! [`FirmwareSource`] captures that; [`FirmwareImage`] reads from disk and
//! [`MemoryImage`] serves an in-memory buffer.

pub mod foto;

use std::fmt;
use std::io::{Cursor, Read, Seek};

use crate::error::Result;

pub use foto::FirmwareImage;

/// Separator between the source and target version in image file names.
pub const VERSION_SEPARATOR: &str = "_to";

/// An image opened for reading.
pub struct OpenImage<R> {
    /// Reader positioned at the start of the image.
    pub reader: R,
    /// Image length in bytes.
    pub size: u64,
}

/// A firmware image the session can open and stream.
pub trait FirmwareSource {
    /// Reader type produced by [`open`](Self::open).
    type Reader: Read + Seek;

    /// Display name, used in logs and confirmation prompts.
    fn name(&self) -> &str;

    /// Open the image for reading.
    fn open(&self) -> Result<OpenImage<Self::Reader>>;

    /// Whether the image declares that it upgrades from `version`.
    ///
    /// Images are named `<from>_to<to>`, so a name containing
    /// `<version>_to` was built for modems running `version`.
    fn matches_version(&self, version: &str) -> bool {
        self.name()
            .contains(&format!("{version}{VERSION_SEPARATOR}"))
    }
}

/// Source and target versions parsed from an image file name.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VersionTag {
    /// Version the image upgrades from.
    pub from: String,
    /// Version the image installs.
    pub to: String,
}

impl VersionTag {
    /// Parse `<from>_to<to>[.ext]` out of a file name.
    pub fn parse(name: &str) -> Option<Self> {
        let (from, rest) = name.split_once(VERSION_SEPARATOR)?;
        let rest = rest.trim_start_matches(['_', '-']);
        let to = match rest.rsplit_once('.') {
            Some((stem, ext)) if is_image_extension(ext) => stem,
            _ => rest,
        };

        if from.is_empty() || to.is_empty() {
            return None;
        }

        Some(Self {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

fn is_image_extension(ext: &str) -> bool {
    matches!(ext.to_ascii_lowercase().as_str(), "foto" | "ua" | "bin")
}

/// An image held in memory.
#[derive(Debug, Clone)]
pub struct MemoryImage {
    name: String,
    data: Vec<u8>,
}

impl MemoryImage {
    /// Create an image named `name` holding `data`.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Image contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl FirmwareSource for MemoryImage {
    type Reader = Cursor<Vec<u8>>;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<OpenImage<Self::Reader>> {
        Ok(OpenImage {
            reader: Cursor::new(self.data.clone()),
            size: self.data.len() as u64,
        })
    }
}
