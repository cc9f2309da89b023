//! Text extraction for uploaded policy documents
//!
//! Two formats are recognized:
//! - Plain text (and anything we don't recognize): bytes are decoded directly
//! - PDF: parsed page by page with lopdf, never decoded as raw bytes
//!
//! ## Output
//!
//! PDF pages are joined with [`PAGE_BREAK`], so a 3-page document yields
//! three blocks separated by two markers:
//!
//! ```text
//! page one text
//!
//! --- Page Break ---
//!
//! page two text
//! ```

pub mod pdf;
pub mod quality;

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::Result;

pub use pdf::{PdfRuntime, PAGE_BREAK};

/// Default cap on the number of PDF pages processed
pub const DEFAULT_MAX_PAGES: usize = 50;

const PDF_MIME: &str = "application/pdf";
const OCTET_STREAM_MIME: &str = "application/octet-stream";

/// An uploaded file: display name, optional MIME type and its bytes
#[derive(Clone)]
pub struct UploadedFile {
    name: String,
    mime_type: Option<String>,
    bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, mime_type: Option<&str>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.map(|m| m.to_string()),
            bytes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
    }

    /// Essence of the MIME type: lowercased, parameters stripped
    fn mime_essence(&self) -> Option<String> {
        self.mime_type.as_deref().map(|m| {
            m.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_lowercase()
        })
    }

    /// Whether this file must go through the PDF parser
    pub fn is_pdf(&self) -> bool {
        let mime = self.mime_essence();
        if mime.as_deref() == Some(PDF_MIME) {
            return true;
        }

        match self.extension() {
            Some(ext) => ext == "pdf",
            // No extension and no useful MIME type: trust the header
            None => {
                matches!(mime.as_deref(), None | Some("") | Some(OCTET_STREAM_MIME))
                    && self.bytes.starts_with(b"%PDF-")
            }
        }
    }
}

impl fmt::Debug for UploadedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Per-call extraction options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractOptions {
    pub max_pages: usize,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// Converts uploaded files into a single text string
#[derive(Debug, Clone)]
pub struct TextExtractor {
    options: ExtractOptions,
    runtime: &'static PdfRuntime,
}

impl TextExtractor {
    /// Create an extractor, initializing the PDF runtime on first use
    pub fn new(options: ExtractOptions) -> Self {
        Self {
            options,
            runtime: pdf::init(),
        }
    }

    pub fn options(&self) -> ExtractOptions {
        self.options
    }

    /// Extract with the extractor's default options
    pub fn extract(&self, file: &UploadedFile) -> Result<String> {
        self.extract_with(file, self.options)
    }

    pub fn extract_with(&self, file: &UploadedFile, options: ExtractOptions) -> Result<String> {
        if file.is_pdf() {
            info!(
                "Extracting PDF text from {} ({} bytes, max {} pages)",
                file.name(),
                file.bytes().len(),
                options.max_pages
            );
            let text = pdf::extract_text(self.runtime, file.bytes(), options.max_pages)?;

            if !text.is_empty() {
                let quality = quality::assess(&text);
                if quality.is_suspect() {
                    warn!("{}: {}", file.name(), quality.details);
                }
            }
            info!("PDF extraction produced {} characters", text.len());
            Ok(text)
        } else {
            debug!("Decoding {} as plain text", file.name());
            Ok(decode_plain(file.name(), file.bytes()))
        }
    }
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self::new(ExtractOptions::default())
    }
}

fn decode_plain(name: &str, bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(e) => {
            warn!("{} is not valid UTF-8 ({}), replacing invalid sequences", name, e);
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
