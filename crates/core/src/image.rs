//! Image identifiers, content types and object keys.

use crate::{DEFAULT_CONTENT_TYPE, MAX_IMAGE_ID_LEN};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of a cached image.
///
/// Ids are 1 to 128 characters drawn from `[A-Za-z0-9_-]`, which keeps them
/// safe to embed in file names and object keys without escaping.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageId(String);

impl ImageId {
    /// Generate a new random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse and validate an id.
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidImageId("id is empty".to_string()));
        }
        if s.len() > MAX_IMAGE_ID_LEN {
            return Err(crate::Error::InvalidImageId(format!(
                "id is {} characters, maximum is {MAX_IMAGE_ID_LEN}",
                s.len()
            )));
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(crate::Error::InvalidImageId(format!(
                "invalid character {c:?} in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ImageId({})", self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ImageId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<ImageId> for String {
    fn from(value: ImageId) -> Self {
        value.0
    }
}

impl AsRef<str> for ImageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize and validate a MIME type. Only `image/*` types are accepted.
pub fn normalize_content_type(content_type: &str) -> crate::Result<String> {
    // Drop parameters such as "; charset=binary".
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if essence.is_empty() {
        return Ok(DEFAULT_CONTENT_TYPE.to_string());
    }
    match essence.strip_prefix("image/") {
        Some(subtype) if !subtype.is_empty() => Ok(essence),
        _ => Err(crate::Error::InvalidContentType(content_type.to_string())),
    }
}

/// File extension (with leading dot) for a content type.
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => ".png",
        "image/jpeg" | "image/jpg" => ".jpg",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/avif" => ".avif",
        "image/svg+xml" => ".svg",
        "image/bmp" => ".bmp",
        "image/tiff" => ".tiff",
        "image/heic" => ".heic",
        "image/heif" => ".heif",
        "image/x-icon" | "image/vnd.microsoft.icon" => ".ico",
        _ => ".png",
    }
}

/// Object key shared by the local and remote tiers: `{id}{ext}`.
pub fn object_key(id: &ImageId, content_type: &str) -> String {
    format!("{}{}", id.as_str(), extension_for(content_type))
}

/// A decoded image payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Decode a base64 image, optionally wrapped in a `data:<mime>;base64,` URL.
///
/// The MIME type carried by a data URL takes precedence over `content_type_hint`.
pub fn decode_base64_image(
    payload: &str,
    content_type_hint: Option<&str>,
) -> crate::Result<ImagePayload> {
    let payload = payload.trim();
    let (declared, data) = match payload.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest.split_once(',').ok_or_else(|| {
                crate::Error::InvalidPayload("data URL is missing ','".to_string())
            })?;
            if !header.ends_with(";base64") {
                return Err(crate::Error::InvalidPayload(
                    "data URL is not base64 encoded".to_string(),
                ));
            }
            let mime = header.trim_end_matches(";base64");
            (Some(mime).filter(|m| !m.is_empty()), data)
        }
        None => (None, payload),
    };

    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(&compact)
        .or_else(|_| base64::engine::general_purpose::STANDARD_NO_PAD.decode(&compact))
        .map_err(|e| crate::Error::InvalidPayload(format!("invalid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(crate::Error::InvalidPayload("image is empty".to_string()));
    }

    let content_type =
        normalize_content_type(declared.or(content_type_hint).unwrap_or(DEFAULT_CONTENT_TYPE))?;
    Ok(ImagePayload {
        bytes,
        content_type,
    })
}
