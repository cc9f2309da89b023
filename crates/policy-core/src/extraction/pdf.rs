//! PDF page walking with lopdf
//!
//! Text runs come from the text-showing operators (`Tj`, `TJ`, `'`, `"`) of
//! each page's content stream. Blank runs are dropped and the rest joined
//! with single spaces; pages are joined with [`PAGE_BREAK`] in page order.

use std::fmt;
use std::sync::OnceLock;

use lopdf::content::Content;
use lopdf::{Document, Object};
use tracing::debug;

use crate::error::{PolicyError, Result};

/// Separator placed between per-page text blocks
pub const PAGE_BREAK: &str = "\n\n--- Page Break ---\n\n";

/// `TJ` offsets below this (in thousandths of an em) read as a word gap
const KERNING_SPACE_THRESHOLD: i64 = -100;

/// WinAnsiEncoding code points 0x80..=0x9F; `None` slots fall back to Latin-1
const WIN_ANSI_HIGH: [Option<char>; 32] = [
    Some('€'),
    None,
    Some('‚'),
    Some('ƒ'),
    Some('„'),
    Some('…'),
    Some('†'),
    Some('‡'),
    Some('ˆ'),
    Some('‰'),
    Some('Š'),
    Some('‹'),
    Some('Œ'),
    None,
    Some('Ž'),
    None,
    None,
    Some('‘'),
    Some('’'),
    Some('“'),
    Some('”'),
    Some('•'),
    Some('–'),
    Some('—'),
    Some('˜'),
    Some('™'),
    Some('š'),
    Some('›'),
    Some('œ'),
    None,
    Some('ž'),
    Some('Ÿ'),
];

static RUNTIME: OnceLock<PdfRuntime> = OnceLock::new();

/// Process-wide parser state, built once and read-only afterwards
pub struct PdfRuntime {
    win_ansi: [char; 256],
}

impl fmt::Debug for PdfRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PdfRuntime").finish_non_exhaustive()
    }
}

/// Initialize the PDF runtime. Repeated calls return the same instance.
pub fn init() -> &'static PdfRuntime {
    RUNTIME.get_or_init(|| {
        debug!("Initializing PDF runtime");
        PdfRuntime::build()
    })
}

/// Text of a single page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

impl PdfRuntime {
    fn build() -> Self {
        let mut win_ansi = ['\0'; 256];
        for (byte, slot) in win_ansi.iter_mut().enumerate() {
            *slot = char::from(byte as u8);
        }
        for (offset, mapped) in WIN_ANSI_HIGH.iter().enumerate() {
            if let Some(c) = mapped {
                win_ansi[0x80 + offset] = *c;
            }
        }
        Self { win_ansi }
    }

    /// Decode a PDF string operand: UTF-16BE with BOM, then UTF-8, then WinAnsi
    pub fn decode_bytes(&self, bytes: &[u8]) -> String {
        if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
            let units: Vec<u16> = bytes[2..]
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            return String::from_utf16_lossy(&units);
        }
        if let Ok(s) = std::str::from_utf8(bytes) {
            return s.to_string();
        }
        bytes.iter().map(|&b| self.win_ansi[b as usize]).collect()
    }

    fn decode_operand(&self, operand: &Object) -> Option<String> {
        match operand {
            Object::String(bytes, _) => Some(self.decode_bytes(bytes)),
            Object::Array(items) => {
                let mut text = String::new();
                for item in items {
                    match item {
                        Object::String(bytes, _) => text.push_str(&self.decode_bytes(bytes)),
                        Object::Integer(n) if *n < KERNING_SPACE_THRESHOLD => text.push(' '),
                        Object::Real(n) if (*n as f64) < KERNING_SPACE_THRESHOLD as f64 => {
                            text.push(' ')
                        }
                        _ => {}
                    }
                }
                Some(text)
            }
            _ => None,
        }
    }

    /// Text runs of one decoded content stream, in stream order
    fn text_runs(&self, content: &Content) -> Vec<String> {
        content
            .operations
            .iter()
            .filter(|op| matches!(op.operator.as_str(), "Tj" | "TJ" | "'" | "\""))
            .map(|op| {
                op.operands
                    .iter()
                    .filter_map(|operand| self.decode_operand(operand))
                    .collect::<String>()
            })
            .collect()
    }
}

/// Drop blank runs and join the rest with single spaces
pub fn join_runs<S: AsRef<str>>(runs: &[S]) -> String {
    runs.iter()
        .map(|run| run.as_ref())
        .filter(|run| !run.trim().is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn load(data: &[u8]) -> Result<Document> {
    let doc = Document::load_mem(data)?;
    if doc.trailer.get(b"Encrypt").is_ok() {
        return Err(PolicyError::Parse("document is encrypted".to_string()));
    }
    Ok(doc)
}

/// Extract the first `max_pages` pages in ascending page order
pub fn extract_pages(
    runtime: &PdfRuntime,
    data: &[u8],
    max_pages: usize,
) -> Result<Vec<PageText>> {
    let doc = load(data)?;
    let page_ids = doc.get_pages();
    debug!(
        "PDF has {} pages, processing up to {}",
        page_ids.len(),
        max_pages
    );

    // BTreeMap iteration is already ascending by page number
    let mut pages = Vec::with_capacity(page_ids.len().min(max_pages));
    for (&number, &page_id) in page_ids.iter().take(max_pages) {
        let raw = doc
            .get_page_content(page_id)
            .map_err(|e| PolicyError::Parse(format!("page {}: {}", number, e)))?;
        let content = Content::decode(&raw)
            .map_err(|e| PolicyError::Parse(format!("page {}: {}", number, e)))?;

        let runs = runtime.text_runs(&content);
        let text = join_runs(&runs);
        debug!(
            "Page {}: {} runs, {} characters",
            number,
            runs.len(),
            text.len()
        );
        pages.push(PageText { number, text });
    }

    Ok(pages)
}

/// Extract text and join pages with [`PAGE_BREAK`]
pub fn extract_text(runtime: &PdfRuntime, data: &[u8], max_pages: usize) -> Result<String> {
    let pages = extract_pages(runtime, data, max_pages)?;
    Ok(pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join(PAGE_BREAK))
}
