//! Input resolution: decide what kind of document an upload is.
//!
//! Detection order: filename extension, then declared content type, then the
//! leading magic bytes. A declaration outside the allowed set is rejected
//! outright; sniffing is only a fallback for uploads with no declaration.
//! Whether the bytes actually decode is the renderer's job.

use crate::error::FormError;
use std::path::Path;
use tracing::debug;

/// A supported upload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Png,
    Jpeg,
    Pdf,
}

impl DocumentKind {
    /// Canonical file extension, used when storing the source artifact.
    pub fn extension(&self) -> &'static str {
        match self {
            DocumentKind::Png => "png",
            DocumentKind::Jpeg => "jpg",
            DocumentKind::Pdf => "pdf",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentKind::Png => "image/png",
            DocumentKind::Jpeg => "image/jpeg",
            DocumentKind::Pdf => "application/pdf",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(DocumentKind::Png),
            "jpg" | "jpeg" => Some(DocumentKind::Jpeg),
            "pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }

    fn from_content_type(ct: &str) -> Option<Self> {
        // Ignore parameters such as "; charset=binary".
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/png" => Some(DocumentKind::Png),
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(DocumentKind::Jpeg),
            "application/pdf" | "application/x-pdf" => Some(DocumentKind::Pdf),
            _ => None,
        }
    }

    /// Identify a format from its leading bytes.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"%PDF") {
            Some(DocumentKind::Pdf)
        } else if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
            Some(DocumentKind::Png)
        } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(DocumentKind::Jpeg)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DocumentKind::Png => "PNG",
            DocumentKind::Jpeg => "JPEG",
            DocumentKind::Pdf => "PDF",
        })
    }
}

/// Determine the document kind of an upload.
///
/// # Errors
/// [`FormError::UnsupportedFormat`] when the declared extension or content
/// type is not PNG/JPEG/PDF, or when nothing is declared and the magic
/// bytes are not recognised.
pub fn detect_kind(
    filename: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<DocumentKind, FormError> {
    if let Some(ext) = filename.and_then(|name| Path::new(name).extension()) {
        let ext = ext.to_string_lossy();
        let kind = DocumentKind::from_extension(&ext).ok_or_else(|| {
            FormError::UnsupportedFormat {
                format: format!(".{}", ext.to_ascii_lowercase()),
            }
        })?;
        debug!("Detected {} from extension", kind);
        return Ok(kind);
    }

    if let Some(ct) = content_type.filter(|ct| !ct.trim().is_empty()) {
        // Generic binary types carry no information; fall through to sniffing.
        if !ct.trim().eq_ignore_ascii_case("application/octet-stream") {
            let kind = DocumentKind::from_content_type(ct).ok_or_else(|| {
                FormError::UnsupportedFormat {
                    format: ct.to_string(),
                }
            })?;
            debug!("Detected {} from content type", kind);
            return Ok(kind);
        }
    }

    DocumentKind::sniff(bytes).ok_or_else(|| FormError::UnsupportedFormat {
        format: "unknown".to_string(),
    })
}
