//! Core domain types and shared logic for the picvault image cache.
//!
//! This crate defines the data model used across all other crates:
//! - Image identifiers, content types and object keys
//! - Content checksums
//! - Upload status lifecycle and delete scopes
//! - Archival retry policy
//! - Configuration

pub mod config;
pub mod error;
pub mod hash;
pub mod image;
pub mod retry;
pub mod upload;

pub use error::{Error, Result};
pub use hash::Checksum;
pub use image::{ImageId, ImagePayload, decode_base64_image, extension_for, object_key};
pub use retry::RetryPolicy;
pub use upload::{DeleteScope, UploadStatus};

/// Maximum length of an image identifier.
pub const MAX_IMAGE_ID_LEN: usize = 128;

/// Content type assumed when none is supplied.
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";
