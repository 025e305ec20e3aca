//! JSON metadata block sent ahead of every image.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};

/// Where and when an image was captured.
///
/// Only the string forms are used to name files; the raw forms are kept as
/// sent, whatever their JSON type.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageMetadata {
    #[serde(default)]
    pub originator_hardware_address: Value,
    pub originator_hardware_address_string: String,
    #[serde(rename = "OriginatorTimeStampUTC", default)]
    pub originator_time_stamp_utc: Value,
    #[serde(rename = "OriginatorTimeStampUTCString")]
    pub originator_time_stamp_utc_string: String,
}

/// Decode a metadata block. Unknown keys are ignored.
pub fn parse_metadata(block: &[u8]) -> Result<ImageMetadata> {
    serde_json::from_slice(block)
        .map_err(|e| ProtocolError::Metadata(format!("Invalid image metadata: {e}")))
}
