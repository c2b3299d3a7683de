//! Device image files (`.eepi`).
//!
//! A dumped or to-be-burned device image, stored with bincode serialization
//! and deflate compression so a mostly-erased 32 KiB part costs almost
//! nothing on disk.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "EEPI"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Chip kind        |  u8 (0 = EEPROM, 1 = mask ROM)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Magic bytes identifying a device image file.
const MAGIC: &[u8; 4] = b"EEPI";
/// Current image format version.
const FORMAT_VERSION: u32 = 1;

/// One device's worth of data plus the technology it was captured from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceImage {
    /// Chip kind byte (see [`crate::sim::ChipKind::to_byte`]).
    pub kind: u8,
    /// Raw device contents, address 0 first.
    pub rom: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file too small to be a device image")]
    Truncated,
    #[error("not a device image file (bad magic)")]
    BadMagic,
    #[error("unsupported image version {0} (expected {FORMAT_VERSION})")]
    UnsupportedVersion(u32),
    #[error("corrupt image payload: {0}")]
    Corrupt(String),
}

/// Save an image to file with header and deflate compression.
pub fn save_to_file(image: &DeviceImage, path: &Path) -> Result<(), ImageError> {
    let payload =
        bincode::serialize(image).map_err(|e| ImageError::Corrupt(e.to_string()))?;

    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(9 + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(image.kind);
    out.extend_from_slice(&compressed);

    std::fs::write(path, &out)?;
    Ok(())
}

/// Load an image from file, verifying magic and version. The header's kind
/// byte is authoritative (the payload repeats it for self-containment).
pub fn load_from_file(path: &Path) -> Result<DeviceImage, ImageError> {
    let data = std::fs::read(path)?;

    if data.len() < 9 {
        return Err(ImageError::Truncated);
    }
    if &data[0..4] != MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[9..])
        .map_err(|e| ImageError::Corrupt(format!("{:?}", e)))?;

    let mut image: DeviceImage = bincode::deserialize(&decompressed)
        .map_err(|e| ImageError::Corrupt(e.to_string()))?;
    image.kind = data[8];
    Ok(image)
}
