//! Upload and link validation
//!
//! Checks user submissions before they enter a buffer:
//! - Photo and file uploads (extension whitelist, size limit, MIME type)
//! - Video links (HTTP/HTTPS only)
//! - Display names (filesystem-unsafe characters stripped)

use std::path::Path;
use thiserror::Error;
use url::Url;

use crate::core::config::validation::{FILE_EXTENSIONS, MAX_UPLOAD_SIZE_BYTES, PHOTO_EXTENSIONS};
use crate::core::types::ContentType;

/// Validation errors
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Extension not accepted for this content type
    #[error("Unsupported {content_type} format: {extension}")]
    UnsupportedExtension {
        content_type: ContentType,
        extension: String,
    },

    /// Upload exceeds the size limit
    #[error("File too large: {size_mb:.1} MB (limit {limit_mb} MB)")]
    TooLarge { size_mb: f64, limit_mb: u64 },

    /// Extension accepted but no MIME type is known for it
    #[error("Unknown MIME type for extension {0}")]
    UnknownMimeType(String),

    /// Not an http(s) URL
    #[error("Invalid video link: {0}")]
    InvalidUrl(String),
}

/// Maps a lowercase extension to its MIME type
pub fn mime_type_for(extension: &str) -> Option<&'static str> {
    match extension {
        "txt" => Some("text/plain"),
        "pdf" => Some("application/pdf"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

fn allowed_extensions(content_type: ContentType) -> &'static [&'static str] {
    match content_type {
        ContentType::Photo => PHOTO_EXTENSIONS,
        ContentType::File => FILE_EXTENSIONS,
        ContentType::Video => &[],
    }
}

/// Content type an upload will be filed under, judged by its extension.
pub fn content_type_for_filename(filename: &str) -> Option<ContentType> {
    let extension = Path::new(filename).extension()?.to_str()?.to_ascii_lowercase();
    [ContentType::Photo, ContentType::File]
        .into_iter()
        .find(|ct| allowed_extensions(*ct).contains(&extension.as_str()))
}

/// Validates an uploaded photo or file and returns its MIME type.
///
/// # Examples
/// ```
/// use cogito_ingest::core::types::ContentType;
/// use cogito_ingest::core::validation::validate_upload;
///
/// assert_eq!(validate_upload(ContentType::File, "notes.txt", 1024), Ok("text/plain"));
/// assert!(validate_upload(ContentType::Photo, "scan.gif", 1024).is_err());
/// ```
pub fn validate_upload(content_type: ContentType, filename: &str, size_bytes: u64) -> Result<&'static str, ValidationError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if !allowed_extensions(content_type).contains(&extension.as_str()) {
        log::warn!("Rejected {} upload with extension '{}'", content_type, extension);
        return Err(ValidationError::UnsupportedExtension {
            content_type,
            extension,
        });
    }

    if size_bytes > MAX_UPLOAD_SIZE_BYTES {
        return Err(ValidationError::TooLarge {
            size_mb: size_bytes as f64 / (1024.0 * 1024.0),
            limit_mb: MAX_UPLOAD_SIZE_BYTES / (1024 * 1024),
        });
    }

    mime_type_for(&extension).ok_or(ValidationError::UnknownMimeType(extension))
}

/// Validates that a video link is an absolute http(s) URL with a host
pub fn validate_video_url(link: &str) -> Result<Url, ValidationError> {
    let parsed = Url::parse(link.trim()).map_err(|_| ValidationError::InvalidUrl(link.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::InvalidUrl(format!(
            "{} (invalid scheme: {})",
            link,
            parsed.scheme()
        )));
    }

    if parsed.host_str().is_none() {
        return Err(ValidationError::InvalidUrl(format!("{} (no host)", link)));
    }

    Ok(parsed)
}

/// Strips filesystem-unsafe and control characters from a display name.
///
/// ```
/// use cogito_ingest::core::validation::sanitize_filename;
///
/// assert_eq!(sanitize_filename("report:v2.pdf"), "reportv2.pdf");
/// ```
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .filter(|c| !['/', '\\', ':', '*', '?', '"', '<', '>', '|'].contains(c))
        .filter(|c| !c.is_control())
        .collect()
}
