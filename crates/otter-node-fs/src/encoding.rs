//! Buffer encodings accepted by `readFile` / `writeFile`.

use crate::error::{FsError, FsResult};
use base64::{Engine as _, engine::general_purpose};

/// A Node buffer encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Utf8,
    Hex,
    Base64,
    Latin1,
}

impl Encoding {
    /// Parse an encoding name. `None` means raw bytes.
    pub fn parse(name: Option<&str>) -> FsResult<Option<Self>> {
        let Some(name) = name else {
            return Ok(None);
        };
        let encoding = match name.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Self::Utf8,
            "hex" => Self::Hex,
            "base64" => Self::Base64,
            "latin1" | "binary" => Self::Latin1,
            _ => return Err(FsError::invalid(format!("unknown encoding: {name}"))),
        };
        Ok(Some(encoding))
    }

    /// Bytes to text.
    pub fn decode(self, bytes: &[u8]) -> FsResult<String> {
        match self {
            Self::Utf8 => Ok(String::from_utf8_lossy(bytes).into_owned()),
            Self::Hex => Ok(hex::encode(bytes)),
            Self::Base64 => Ok(general_purpose::STANDARD.encode(bytes)),
            Self::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Text to bytes.
    pub fn encode(self, text: &str) -> FsResult<Vec<u8>> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Hex => {
                hex::decode(text).map_err(|e| FsError::invalid(format!("invalid hex: {e}")))
            }
            Self::Base64 => general_purpose::STANDARD
                .decode(text)
                .map_err(|e| FsError::invalid(format!("invalid base64: {e}"))),
            // Node truncates code points to their low byte.
            Self::Latin1 => Ok(text.chars().map(|c| c as u32 as u8).collect()),
        }
    }
}
