//! Payload Decoding
//!
//! Signature-based validation of origin payloads. Full bitmap decoding is left
//! to the presentation layer; here we only establish that the bytes are a
//! non-empty image in a recognised container format.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Image container formats recognised by signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    WebP,
    Bmp,
    Ico,
    /// Signature not recognised
    Unknown,
}

impl ImageFormat {
    /// Detect the format from the leading bytes of a payload
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(b"\x89PNG\r\n\x1a\n") {
            ImageFormat::Png
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            ImageFormat::Jpeg
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            ImageFormat::Gif
        } else if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WEBP" {
            ImageFormat::WebP
        } else if data.starts_with(b"BM") && data.len() >= 14 {
            ImageFormat::Bmp
        } else if data.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
            ImageFormat::Ico
        } else {
            ImageFormat::Unknown
        }
    }

    /// MIME type for HTTP responses
    pub fn mime_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
            ImageFormat::WebP => "image/webp",
            ImageFormat::Bmp => "image/bmp",
            ImageFormat::Ico => "image/x-icon",
            ImageFormat::Unknown => "application/octet-stream",
        }
    }

    /// Conventional file extension
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Gif => "gif",
            ImageFormat::WebP => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Ico => "ico",
            ImageFormat::Unknown => "bin",
        }
    }

    /// Check if the format was recognised
    pub fn is_known(&self) -> bool {
        !matches!(self, ImageFormat::Unknown)
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Validate a downloaded payload for `key`.
///
/// Empty bodies are always rejected. With `verify_image` set, the payload must
/// also carry a known image signature.
pub fn decode_payload(
    key: &str,
    data: Bytes,
    verify_image: bool,
) -> std::result::Result<(Bytes, ImageFormat), FetchError> {
    if data.is_empty() {
        return Err(FetchError::Decode {
            key: key.to_string(),
            reason: "empty response body".to_string(),
        });
    }

    let format = ImageFormat::detect(&data);
    if verify_image && !format.is_known() {
        return Err(FetchError::Decode {
            key: key.to_string(),
            reason: format!(
                "unrecognised image signature ({} bytes, starts with {:02x?})",
                data.len(),
                &data[..data.len().min(8)]
            ),
        });
    }

    Ok((data, format))
}

// =============================================================================
// Tests
// =============================================================================
