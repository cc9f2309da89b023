//! Document records and their status lifecycle
//!
//! A record moves `uploading -> processing -> ready`, and may drop into
//! `error` from either of the first two states. `ready` and `error` are
//! terminal: a failure discovered after a record is ready replaces the record
//! instead of mutating it (see [`DocumentRecord::superseded_by_failure`]).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PolicyError, Result};
use crate::extraction::UploadedFile;

/// How the document reached us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    File,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Ready,
    Error,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentStatus::Uploading => write!(f, "uploading"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Ready => write!(f, "ready"),
            DocumentStatus::Error => write!(f, "error"),
        }
    }
}

/// Source material owned by a record until extraction consumes it
#[derive(Debug, Clone)]
pub enum RawSource {
    File(UploadedFile),
    Text(String),
}

// Status and its payload travel together, so `ready` without content or
// `error` without a message cannot be constructed.
#[derive(Debug, Clone)]
enum DocumentState {
    Uploading,
    Processing,
    Ready { content: String },
    Error { message: String },
}

impl DocumentState {
    fn status(&self) -> DocumentStatus {
        match self {
            DocumentState::Uploading => DocumentStatus::Uploading,
            DocumentState::Processing => DocumentStatus::Processing,
            DocumentState::Ready { .. } => DocumentStatus::Ready,
            DocumentState::Error { .. } => DocumentStatus::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentRecord {
    id: String,
    name: String,
    doc_type: DocumentType,
    source: Option<RawSource>,
    state: DocumentState,
    created_at: DateTime<Utc>,
}

impl DocumentRecord {
    fn with_state(
        name: String,
        doc_type: DocumentType,
        source: Option<RawSource>,
        state: DocumentState,
    ) -> Self {
        let record = Self {
            id: Uuid::new_v4().to_string(),
            name,
            doc_type,
            source,
            state,
            created_at: Utc::now(),
        };
        debug!(
            "Created {:?} document {} ({}) in state {}",
            record.doc_type,
            record.id,
            record.name,
            record.status()
        );
        record
    }

    /// File-backed record whose bytes are still being read
    pub fn uploading(name: impl Into<String>) -> Self {
        Self::with_state(
            name.into(),
            DocumentType::File,
            None,
            DocumentState::Uploading,
        )
    }

    /// File-backed record whose bytes are already in memory
    pub fn from_file(file: UploadedFile) -> Self {
        let name = file.name().to_string();
        Self::with_state(
            name,
            DocumentType::File,
            Some(RawSource::File(file)),
            DocumentState::Uploading,
        )
    }

    /// Pasted text starts directly in `processing`
    pub fn from_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_state(
            name.into(),
            DocumentType::Text,
            Some(RawSource::Text(text.into())),
            DocumentState::Processing,
        )
    }

    /// Replace the generated id with a caller-chosen one.
    ///
    /// Meant for creation time, so repeated ingests of the same document can
    /// share one identity (and one analysis history).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        debug!("Document {} ({}) uses a caller-chosen id", self.id, self.name);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc_type(&self) -> DocumentType {
        self.doc_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> DocumentStatus {
        self.state.status()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, DocumentState::Ready { .. })
    }

    /// Extracted text, present only when the record is ready
    pub fn content(&self) -> Option<&str> {
        match &self.state {
            DocumentState::Ready { content } => Some(content),
            _ => None,
        }
    }

    /// Failure cause, present only when the record is in error
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            DocumentState::Error { message } => Some(message),
            _ => None,
        }
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Hand the uploaded bytes to a record created with [`DocumentRecord::uploading`]
    pub fn attach_file(&mut self, file: UploadedFile) -> Result<()> {
        if !matches!(self.state, DocumentState::Uploading) {
            return Err(PolicyError::InvalidTransition {
                from: self.status(),
                to: DocumentStatus::Uploading,
            });
        }
        self.source = Some(RawSource::File(file));
        Ok(())
    }

    /// Move the raw source out of the record; extraction owns it from here on
    pub fn take_source(&mut self) -> Option<RawSource> {
        self.source.take()
    }

    pub fn begin_processing(&mut self) -> Result<()> {
        match self.state {
            DocumentState::Uploading => {
                self.transition(DocumentState::Processing);
                Ok(())
            }
            _ => Err(PolicyError::InvalidTransition {
                from: self.status(),
                to: DocumentStatus::Processing,
            }),
        }
    }

    pub fn complete(&mut self, content: String) -> Result<()> {
        match self.state {
            DocumentState::Processing => {
                self.transition(DocumentState::Ready { content });
                Ok(())
            }
            _ => Err(PolicyError::InvalidTransition {
                from: self.status(),
                to: DocumentStatus::Ready,
            }),
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        match self.state {
            DocumentState::Uploading | DocumentState::Processing => {
                self.source = None;
                self.transition(DocumentState::Error {
                    message: message.into(),
                });
                Ok(())
            }
            _ => Err(PolicyError::InvalidTransition {
                from: self.status(),
                to: DocumentStatus::Error,
            }),
        }
    }

    /// New `error` record standing in for this one after a late failure.
    ///
    /// Identity (id, name, type) is preserved so listings and history keep
    /// pointing at the same document.
    pub fn superseded_by_failure(&self, message: impl Into<String>) -> Self {
        let message = message.into();
        info!("Document {} superseded by failure: {}", self.id, message);
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            doc_type: self.doc_type,
            source: None,
            state: DocumentState::Error { message },
            created_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: DocumentState) {
        let from = self.status();
        self.state = next;
        info!("Document {} status {} -> {}", self.id, from, self.status());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariants(record: &DocumentRecord) {
        assert_eq!(
            record.content().is_some(),
            record.status() == DocumentStatus::Ready
        );
        assert_eq!(
            record.error_message().is_some(),
            record.status() == DocumentStatus::Error
        );
    }

    #[test]
    fn test_file_record_happy_path() {
        let file = UploadedFile::new("policy.txt", Some("text/plain"), b"cover".to_vec());
        let mut record = DocumentRecord::from_file(file);
        assert_eq!(record.status(), DocumentStatus::Uploading);
        assert_eq!(record.doc_type(), DocumentType::File);
        assert_eq!(record.name(), "policy.txt");
        assert_invariants(&record);

        record.begin_processing().unwrap();
        assert_eq!(record.status(), DocumentStatus::Processing);
        assert_invariants(&record);

        assert!(matches!(record.take_source(), Some(RawSource::File(_))));
        assert!(record.take_source().is_none());

        record.complete("cover".to_string()).unwrap();
        assert!(record.is_ready());
        assert_eq!(record.content(), Some("cover"));
        assert_invariants(&record);
    }

    #[test]
    fn test_text_record_starts_processing() {
        let record = DocumentRecord::from_text("Pasted policy", "body");
        assert_eq!(record.status(), DocumentStatus::Processing);
        assert_eq!(record.doc_type(), DocumentType::Text);
        assert!(record.has_source());
    }

    #[test]
    fn test_error_reachable_from_uploading_and_processing() {
        let mut uploading = DocumentRecord::uploading("a.pdf");
        uploading.fail("could not read").unwrap();
        assert_eq!(uploading.error_message(), Some("could not read"));
        assert_invariants(&uploading);

        let mut processing = DocumentRecord::from_text("b", "text");
        processing.fail("broken").unwrap();
        assert_eq!(processing.status(), DocumentStatus::Error);
        assert!(!processing.has_source());
        assert_invariants(&processing);
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut record = DocumentRecord::from_text("doc", "text");
        record.complete("text".into()).unwrap();

        assert!(record.fail("late").is_err());
        assert!(record.begin_processing().is_err());
        assert!(record.complete("other".into()).is_err());
        assert_eq!(record.content(), Some("text"));
        assert_invariants(&record);

        let mut failed = DocumentRecord::uploading("x");
        failed.fail("nope").unwrap();
        let err = failed.complete("text".into()).unwrap_err();
        assert!(matches!(
            err,
            PolicyError::InvalidTransition {
                from: DocumentStatus::Error,
                to: DocumentStatus::Ready
            }
        ));
        assert_invariants(&failed);
    }

    #[test]
    fn test_complete_requires_processing() {
        let mut record = DocumentRecord::uploading("x.pdf");
        assert!(record.complete("early".into()).is_err());
        assert_eq!(record.status(), DocumentStatus::Uploading);
    }

    #[test]
    fn test_attach_file_only_while_uploading() {
        let mut record = DocumentRecord::uploading("x.txt");
        record
            .attach_file(UploadedFile::new("x.txt", None, b"hi".to_vec()))
            .unwrap();
        assert!(record.has_source());

        record.begin_processing().unwrap();
        assert!(record
            .attach_file(UploadedFile::new("y.txt", None, vec![]))
            .is_err());
    }

    #[test]
    fn test_superseded_record_keeps_identity() {
        let mut record = DocumentRecord::from_text("doc", "text");
        record.complete("text".into()).unwrap();

        let replacement = record.superseded_by_failure("service down");
        assert_eq!(replacement.id(), record.id());
        assert_eq!(replacement.name(), record.name());
        assert_eq!(replacement.status(), DocumentStatus::Error);
        assert_eq!(replacement.error_message(), Some("service down"));
        assert_invariants(&replacement);

        // the original is untouched
        assert!(record.is_ready());
    }

    #[test]
    fn test_with_id_keeps_lifecycle() {
        let record = DocumentRecord::from_text("pasted", "cover").with_id("homeowners-2024");
        assert_eq!(record.id(), "homeowners-2024");
        assert_eq!(record.status(), DocumentStatus::Processing);
        assert!(record.has_source());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = DocumentRecord::uploading("a");
        let b = DocumentRecord::uploading("a");
        assert_ne!(a.id(), b.id());
    }
}
