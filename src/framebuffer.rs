//! Display capture via `framebuffer:read`, returned by the server as a base64 PNG.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use protocol::Response;
use serde_json::{Value, json};
use tracing::info;

use crate::client::WokwiClient;
use crate::error::{ClientError, Result};
use crate::files::{check_overwrite, write_file};

impl WokwiClient {
    /// Raw `framebuffer:read` response for display part `id` (e.g. `"lcd1"`).
    ///
    /// # Errors
    ///
    /// Any call error.
    pub async fn framebuffer_read(&self, id: &str) -> Result<Response> {
        self.call("framebuffer:read", json!({ "id": id })).await
    }

    /// Decoded PNG bytes of the display's current contents.
    ///
    /// # Errors
    ///
    /// [`ClientError::Protocol`] when the response has no valid base64 `png`.
    pub async fn framebuffer_png_bytes(&self, id: &str) -> Result<Vec<u8>> {
        let response = self.framebuffer_read(id).await?;
        decode_png(&response.result)
    }

    /// Save the display's PNG to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] if `path` exists and `overwrite` is false.
    pub async fn save_framebuffer_png(&self, id: &str, path: &Path, overwrite: bool) -> Result<PathBuf> {
        check_overwrite(path, overwrite).await?;
        let png = self.framebuffer_png_bytes(id).await?;
        write_file(path, &png).await?;
        info!(id, path = %path.display(), size = png.len(), "wokwi: framebuffer saved");
        Ok(path.to_path_buf())
    }

    /// Byte-compare the display's PNG against `reference`.
    ///
    /// On mismatch the current PNG is written to `save_mismatch` when given.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] if `reference` does not exist.
    pub async fn compare_framebuffer_png(
        &self,
        id: &str,
        reference: &Path,
        save_mismatch: Option<&Path>,
    ) -> Result<bool> {
        let expected = match tokio::fs::read(reference).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ClientError::Validation(format!(
                    "reference image does not exist: {}",
                    reference.display()
                )));
            }
            Err(e) => return Err(ClientError::file(reference, e)),
        };

        let current = self.framebuffer_png_bytes(id).await?;
        if current == expected {
            return Ok(true);
        }
        if let Some(path) = save_mismatch {
            write_file(path, &current).await?;
            info!(id, path = %path.display(), "wokwi: framebuffer mismatch saved");
        }
        Ok(false)
    }
}

fn decode_png(result: &Value) -> Result<Vec<u8>> {
    let encoded = result
        .get("png")
        .and_then(Value::as_str)
        .ok_or_else(|| ClientError::Protocol("malformed framebuffer:read response: missing 'png'".into()))?;
    STANDARD
        .decode(encoded)
        .map_err(|e| ClientError::Protocol(format!("malformed framebuffer:read response: {e}")))
}

#[cfg(test)]
#[path = "framebuffer_test.rs"]
mod tests;
