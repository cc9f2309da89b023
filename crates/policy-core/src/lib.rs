//! Insurance policy document core
//!
//! Turns uploaded policy documents (plain text or PDF) into text, sends that
//! text to a remote analysis service, keeps a short history of outcomes and
//! runs ordered question/answer sessions about a document.
//!
//! [`PolicyPipeline`] wires the pieces together; each module is also usable
//! on its own.

pub mod analysis;
pub mod chat;
pub mod config;
pub mod document;
pub mod error;
pub mod extraction;
pub mod history;
pub mod pipeline;

pub use analysis::{AnalysisClient, AnalysisMetadata, AnalysisResult, AnalysisService, RiskLevel};
pub use chat::{ChatMessage, ChatRole, ChatService, ChatSession};
pub use config::PolicyConfig;
pub use document::{DocumentRecord, DocumentStatus, DocumentType};
pub use error::{PolicyError, Result};
pub use extraction::{ExtractOptions, TextExtractor, UploadedFile, PAGE_BREAK};
pub use history::{HistoryEntry, HistoryStore, HISTORY_LIMIT};
pub use pipeline::{Ingestor, PolicyPipeline};
