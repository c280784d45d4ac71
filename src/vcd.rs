//! Logic analyzer export (`sim:read-vcd`) as Value Change Dump text.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::client::WokwiClient;
use crate::error::{ClientError, Result};
use crate::files::{check_overwrite, write_file};

/// Capture from the diagram's logic analyzer.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VcdData {
    /// VCD file contents, viewable in PulseView or GTKWave.
    pub vcd: String,
    pub channel_count: u64,
    pub sample_count: u64,
}

impl WokwiClient {
    /// Read the logic analyzer capture.
    ///
    /// # Errors
    ///
    /// [`ClientError::Protocol`] for a malformed result; a diagram without a
    /// logic analyzer is reported by the server as [`ClientError::Server`].
    pub async fn read_vcd(&self) -> Result<VcdData> {
        let response = self.call("sim:read-vcd", json!({})).await?;
        parse_vcd(response.result)
    }

    /// Read the capture and write it to `path` if it holds any samples.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] if `path` exists and `overwrite` is false.
    pub async fn save_vcd(&self, path: &Path, overwrite: bool) -> Result<VcdData> {
        check_overwrite(path, overwrite).await?;
        let data = self.read_vcd().await?;
        if data.sample_count > 0 {
            write_file(path, data.vcd.as_bytes()).await?;
            info!(path = %path.display(), samples = data.sample_count, channels = data.channel_count, "wokwi: vcd saved");
        } else {
            warn!(path = %path.display(), "wokwi: logic analyzer captured no samples, nothing written");
        }
        Ok(data)
    }
}

fn parse_vcd(result: Value) -> Result<VcdData> {
    serde_json::from_value(result).map_err(|e| ClientError::Protocol(format!("malformed sim:read-vcd response: {e}")))
}

#[cfg(test)]
#[path = "vcd_test.rs"]
mod tests;
