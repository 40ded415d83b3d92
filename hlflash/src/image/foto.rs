//! FOTA images (`.foto`, `.ua`) read from disk.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{Error, Result};
use crate::image::{FirmwareSource, OpenImage, VersionTag};
use crate::protocol::xmodem::DATA_SIZE;

/// A firmware image stored in a file.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    path: PathBuf,
    name: String,
}

impl FirmwareImage {
    /// Refer to the image at `path`. The file is not touched until opened.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path
            .as_ref()
            .to_path_buf();
        let name = path
            .file_name()
            .map_or_else(
                || path.display().to_string(),
                |n| n.to_string_lossy().into_owned(),
            );
        Self { path, name }
    }

    /// Path of the image.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Versions declared by the file name, if any.
    pub fn version_tag(&self) -> Option<VersionTag> {
        VersionTag::parse(&self.name)
    }

    /// Image length in bytes.
    pub fn size(&self) -> Result<u64> {
        std::fs::metadata(&self.path)
            .map(|m| m.len())
            .map_err(|source| Error::FirmwareOpen {
                path: self.path.clone(),
                source,
            })
    }

    /// Number of data packets needed to send the image.
    pub fn packet_count(&self) -> Result<u64> {
        Ok(self.size()?.div_ceil(DATA_SIZE as u64))
    }
}

impl FirmwareSource for FirmwareImage {
    type Reader = BufReader<File>;

    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<OpenImage<Self::Reader>> {
        debug!("Opening firmware image: {}", self.path.display());

        let to_open_error = |source| Error::FirmwareOpen {
            path: self.path.clone(),
            source,
        };
        let file = File::open(&self.path).map_err(to_open_error)?;
        let size = file
            .metadata()
            .map_err(to_open_error)?
            .len();

        Ok(OpenImage {
            reader: BufReader::new(file),
            size,
        })
    }
}
