//! Upload storage for Inkwell POS.
//!
//! Files land in `{data_dir}/uploads/<purpose>/` with generated names,
//! so client-supplied filenames never touch the filesystem. Content is
//! sniffed rather than trusted: images must carry a real PNG/JPEG
//! signature, PDFs (payment and expense proofs only) the `%PDF-` magic.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

/// Upload size cap.
pub const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Purposes
// ---------------------------------------------------------------------------

/// Directory key for an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPurpose {
    Expenses,
    Products,
    Payments,
    Settings,
    Qris,
}

impl UploadPurpose {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_lowercase().as_str() {
            "expenses" => Ok(Self::Expenses),
            "products" => Ok(Self::Products),
            "payments" => Ok(Self::Payments),
            "settings" => Ok(Self::Settings),
            "qris" => Ok(Self::Qris),
            other => Err(format!(
                "Invalid upload purpose: {other}. Must be expenses, products, payments, settings, or qris"
            )),
        }
    }

    pub fn dir(&self) -> &'static str {
        match self {
            Self::Expenses => "expenses",
            Self::Products => "products",
            Self::Payments => "payments",
            Self::Settings => "settings",
            Self::Qris => "qris",
        }
    }

    /// Proof uploads may be PDFs; catalog and settings images may not.
    fn allows_pdf(&self) -> bool {
        matches!(self, Self::Expenses | Self::Payments)
    }
}

// ---------------------------------------------------------------------------
// Sniffing
// ---------------------------------------------------------------------------

/// Identify the content type from the bytes themselves.
fn sniff(bytes: &[u8], allows_pdf: bool) -> Result<(&'static str, &'static str), String> {
    if let Ok(format) = image::guess_format(bytes) {
        match format {
            image::ImageFormat::Png => return Ok(("png", "image/png")),
            image::ImageFormat::Jpeg => return Ok(("jpg", "image/jpeg")),
            other => {
                return Err(format!(
                    "Unsupported image format: {other:?}. Only PNG and JPEG are accepted"
                ))
            }
        }
    }
    if bytes.starts_with(b"%PDF-") {
        if allows_pdf {
            return Ok(("pdf", "application/pdf"));
        }
        return Err("PDF uploads are only accepted as payment or expense proofs".into());
    }
    Err("Unrecognized file content. Upload a PNG, JPEG, or PDF".into())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A stored upload.
#[derive(Debug, Clone)]
pub struct SavedUpload {
    /// Path relative to the uploads root (`payments/<uuid>.jpg`).
    pub relative_path: String,
    pub mime_type: &'static str,
    pub size: usize,
}

/// Filesystem-backed upload store rooted at `{data_dir}/uploads`.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate and persist one upload, returning its relative path.
    pub fn save(&self, purpose: UploadPurpose, bytes: &[u8]) -> Result<SavedUpload, String> {
        if bytes.is_empty() {
            return Err("Uploaded file is empty".into());
        }
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(format!(
                "File is too large ({} bytes). Limit is {} bytes",
                bytes.len(),
                MAX_UPLOAD_BYTES
            ));
        }

        let (ext, mime_type) = sniff(bytes, purpose.allows_pdf())?;

        let dir = self.root.join(purpose.dir());
        fs::create_dir_all(&dir).map_err(|e| format!("create upload dir: {e}"))?;

        let file_name = format!("{}.{ext}", Uuid::new_v4());
        let path = dir.join(&file_name);
        fs::write(&path, bytes).map_err(|e| format!("write upload: {e}"))?;

        let relative_path = format!("{}/{file_name}", purpose.dir());
        info!(path = %relative_path, size = bytes.len(), "upload stored");

        Ok(SavedUpload {
            relative_path,
            mime_type,
            size: bytes.len(),
        })
    }

    /// Remove a previously stored upload (best-effort, for replaced files).
    pub fn remove(&self, relative_path: &str) -> Result<(), String> {
        // The stored paths are always `<purpose>/<uuid>.<ext>`; anything
        // else is not ours to delete.
        let mut parts = relative_path.split('/');
        let (Some(dir), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(format!("Not an upload path: {relative_path}"));
        };
        UploadPurpose::parse(dir)?;
        if name.contains("..") || name.contains('\\') {
            return Err(format!("Not an upload path: {relative_path}"));
        }

        let path = self.root.join(dir).join(name);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| format!("remove upload: {e}"))?;
        }
        Ok(())
    }
}

/// Decode a base64 upload body, tolerating `data:` URL prefixes.
pub fn decode_base64_payload(raw: &str) -> Result<Vec<u8>, String> {
    let trimmed = raw.trim();
    let encoded = match trimmed.split_once(";base64,") {
        Some((_, rest)) => rest,
        None => trimmed,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64_STANDARD
        .decode(compact)
        .map_err(|e| format!("Invalid base64 payload: {e}"))
}

// ===========================================================================
// Tests
// ===========================================================================
