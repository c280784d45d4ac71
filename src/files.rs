//! File transfer to and from the simulator's workspace.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tracing::info;

use crate::client::WokwiClient;
use crate::error::{ClientError, Result};
use crate::idf;

impl WokwiClient {
    /// Upload `content` under `name`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for an empty name, otherwise any call error.
    pub async fn upload(&self, name: &str, content: impl AsRef<[u8]>) -> Result<()> {
        if name.trim().is_empty() {
            return Err(ClientError::Validation("upload name must not be empty".into()));
        }
        let content = content.as_ref();
        self.call("file:upload", json!({ "name": name, "binary": STANDARD.encode(content) })).await?;
        info!(name, size = content.len(), "wokwi: uploaded file");
        Ok(())
    }

    /// Upload a local file and return the name it was stored under.
    ///
    /// `local_path` defaults to `name`. A `flasher_args.json` is resolved
    /// into a merged ESP-IDF image and uploaded as `firmware.bin`.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] if the file does not exist or the IDF
    /// image cannot be assembled, [`ClientError::Io`] for other read failures.
    pub async fn upload_file(&self, name: &str, local_path: Option<&Path>) -> Result<String> {
        let path = local_path.unwrap_or_else(|| Path::new(name));
        if idf::is_flasher_args(path) {
            let image = idf::resolve_idf_firmware(path).await?;
            self.upload(idf::IDF_FIRMWARE_NAME, &image).await?;
            return Ok(idf::IDF_FIRMWARE_NAME.to_owned());
        }

        let content = tokio::fs::read(path).await.map_err(|e| ClientError::file(path, e))?;
        self.upload(name, &content).await?;
        Ok(name.to_owned())
    }

    /// Fetch a file from the simulator workspace.
    ///
    /// # Errors
    ///
    /// [`ClientError::Protocol`] when the response carries no valid base64
    /// `binary`, otherwise any call error.
    pub async fn download(&self, name: &str) -> Result<Vec<u8>> {
        let response = self.call("file:download", json!({ "name": name })).await?;
        let encoded = response
            .result
            .get("binary")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Protocol("malformed file:download response: missing 'binary'".into()))?;
        STANDARD
            .decode(encoded)
            .map_err(|e| ClientError::Protocol(format!("malformed file:download response: {e}")))
    }

    /// Download `name` and write it to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Any error from [`download`](Self::download), or [`ClientError::Io`]
    /// if the file cannot be written.
    pub async fn download_file(&self, name: &str, path: &Path) -> Result<()> {
        let content = self.download(name).await?;
        write_file(path, &content).await
    }
}

/// Write `content` to `path`, creating missing parent directories.
pub(crate) async fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| ClientError::file(parent, e))?;
    }
    tokio::fs::write(path, content).await.map_err(|e| ClientError::file(path, e))
}

/// Refuse to clobber `path` unless `overwrite` is set.
pub(crate) async fn check_overwrite(path: &Path, overwrite: bool) -> Result<()> {
    if !overwrite && tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ClientError::Validation(format!(
            "file already exists and overwrite is false: {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "files_test.rs"]
mod tests;
