//! ESP-IDF firmware assembly.
//!
//! An ESP-IDF build leaves a `flasher_args.json` next to its binaries whose
//! `flash_files` maps hex flash offsets to file paths relative to that JSON.
//! The simulator wants one flat image, so the parts are laid out at their
//! offsets over an erased (`0xFF`) flash.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::error::{ClientError, Result};

/// File name that marks an ESP-IDF build.
pub const FLASHER_ARGS_FILE: &str = "flasher_args.json";

/// Name the assembled image is uploaded under.
pub const IDF_FIRMWARE_NAME: &str = "firmware.bin";

/// Largest image the simulator accepts.
pub const MAX_FIRMWARE_SIZE: usize = 4 * 1024 * 1024;

const ERASED_FLASH: u8 = 0xFF;

#[derive(Deserialize)]
struct FlasherArgs {
    flash_files: Option<BTreeMap<String, String>>,
}

/// One binary placed at a flash offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwarePart {
    pub offset: usize,
    pub data: Vec<u8>,
}

/// True when `path` names a `flasher_args.json`.
#[must_use]
pub fn is_flasher_args(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == FLASHER_ARGS_FILE)
}

/// Read `flasher_args.json` and every part it lists, and merge them into one image.
///
/// # Errors
///
/// [`ClientError::Validation`] if the JSON is unreadable or malformed, an
/// offset is not hex, a part is missing, or the image exceeds
/// [`MAX_FIRMWARE_SIZE`].
pub async fn resolve_idf_firmware(flasher_args_path: &Path) -> Result<Vec<u8>> {
    let raw = tokio::fs::read(flasher_args_path)
        .await
        .map_err(|e| ClientError::Validation(format!("failed to read {}: {e}", flasher_args_path.display())))?;
    let args: FlasherArgs = serde_json::from_slice(&raw)
        .map_err(|e| ClientError::Validation(format!("failed to parse {}: {e}", flasher_args_path.display())))?;
    let flash_files = args
        .flash_files
        .ok_or_else(|| ClientError::Validation(format!("flash_files is not defined in {FLASHER_ARGS_FILE}")))?;

    let base = flasher_args_path.parent().unwrap_or_else(|| Path::new(""));
    let mut parts = Vec::with_capacity(flash_files.len());
    for (offset, relative) in flash_files {
        let offset = parse_offset(&offset)?;
        let path = base.join(&relative);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| ClientError::Validation(format!("firmware file {}: {e}", path.display())))?;
        debug!(offset, size = data.len(), file = %path.display(), "idf: firmware part");
        parts.push(FirmwarePart { offset, data });
    }
    // Keys arrive in string order; overlaps resolve by ascending flash address.
    parts.sort_by_key(|part| part.offset);
    assemble(&parts)
}

/// Lay `parts` out over erased flash.
///
/// # Errors
///
/// [`ClientError::Validation`] when the image would exceed [`MAX_FIRMWARE_SIZE`].
pub fn assemble(parts: &[FirmwarePart]) -> Result<Vec<u8>> {
    let size = parts.iter().map(|part| part.offset.saturating_add(part.data.len())).max().unwrap_or(0);
    if size > MAX_FIRMWARE_SIZE {
        return Err(ClientError::Validation(format!(
            "firmware size ({size} bytes) exceeds the maximum supported size ({MAX_FIRMWARE_SIZE} bytes)"
        )));
    }
    let mut image = vec![ERASED_FLASH; size];
    for part in parts {
        image[part.offset..part.offset + part.data.len()].copy_from_slice(&part.data);
    }
    Ok(image)
}

fn parse_offset(offset: &str) -> Result<usize> {
    let digits = offset.trim().trim_start_matches("0x").trim_start_matches("0X");
    usize::from_str_radix(digits, 16)
        .map_err(|_| ClientError::Validation(format!("invalid offset in {FLASHER_ARGS_FILE} flash_files: {offset}")))
}

#[cfg(test)]
#[path = "idf_test.rs"]
mod tests;
