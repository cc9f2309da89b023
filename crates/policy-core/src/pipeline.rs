//! End-to-end flow: ingest → extract → analyze → history, plus chat hand-off

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::analysis::{AnalysisClient, AnalysisMetadata, AnalysisResult};
use crate::chat::{ChatService, ChatSession};
use crate::config::PolicyConfig;
use crate::document::{DocumentRecord, RawSource};
use crate::error::{PolicyError, Result};
use crate::extraction::{ExtractOptions, TextExtractor, UploadedFile};
use crate::history::{HistoryStore, SqliteHistory};

/// Turns uploads and pasted text into document records.
///
/// Needs only an extractor, so text-only flows (printing a document, chatting
/// about it) don't have to configure an analysis service.
#[derive(Debug, Clone)]
pub struct Ingestor {
    extractor: TextExtractor,
}

impl Ingestor {
    pub fn new(extractor: TextExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Run an in-memory upload through extraction.
    ///
    /// The returned record is either `ready` or `error`; failures are carried
    /// by the record rather than returned.
    pub fn ingest_file(&self, file: UploadedFile) -> DocumentRecord {
        self.ingest_record(DocumentRecord::from_file(file))
    }

    pub async fn ingest_path(&self, path: &Path) -> DocumentRecord {
        self.ingest_path_as(path, None).await
    }

    /// Read a file from disk and ingest it, optionally under a fixed id.
    ///
    /// The record exists (as `uploading`) before the read starts, so read
    /// failures land on it too.
    pub async fn ingest_path_as(&self, path: &Path, document_id: Option<String>) -> DocumentRecord {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mut record = DocumentRecord::uploading(name.clone());
        if let Some(id) = document_id {
            record = record.with_id(id);
        }

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = PolicyError::from(e);
                warn!("Failed to read {}: {}", path.display(), err);
                settle(record.fail(err.user_message()));
                return record;
            }
        };

        if let Err(e) = record.attach_file(UploadedFile::new(name, None, bytes)) {
            warn!("Could not attach upload to {}: {}", record.id(), e);
            return record;
        }
        self.ingest_record(record)
    }

    pub fn ingest_text(&self, name: impl Into<String>, text: impl Into<String>) -> DocumentRecord {
        self.ingest_record(DocumentRecord::from_text(name, text))
    }

    /// Extract the source of a freshly created record
    pub fn ingest_record(&self, mut record: DocumentRecord) -> DocumentRecord {
        let Some(source) = record.take_source() else {
            settle(record.fail("No content was provided"));
            return record;
        };

        let extracted = match source {
            RawSource::File(file) => {
                if let Err(e) = record.begin_processing() {
                    warn!("Cannot process {}: {}", record.id(), e);
                    return record;
                }
                self.extractor.extract(&file)
            }
            RawSource::Text(text) => {
                if text.trim().is_empty() {
                    Err(PolicyError::Validation("the pasted text is empty".to_string()))
                } else {
                    Ok(text)
                }
            }
        };

        match extracted {
            Ok(content) => settle(record.complete(content)),
            Err(e) => {
                warn!("Extraction failed for {} ({}): {}", record.name(), record.id(), e);
                settle(record.fail(e.user_message()));
            }
        }
        record
    }
}

#[derive(Clone)]
pub struct PolicyPipeline {
    ingestor: Ingestor,
    analysis: AnalysisClient,
    history: HistoryStore,
}

impl PolicyPipeline {
    pub fn new(extractor: TextExtractor, analysis: AnalysisClient, history: HistoryStore) -> Self {
        Self {
            ingestor: Ingestor::new(extractor),
            analysis,
            history,
        }
    }

    /// HTTP analysis client and SQLite history, both taken from `config`
    pub async fn from_config(config: &PolicyConfig) -> Result<Self> {
        let extractor = TextExtractor::new(ExtractOptions {
            max_pages: config.max_pages,
        });
        let analysis = AnalysisClient::from_config(config)?;
        let backend = SqliteHistory::connect(&config.database_url).await?;
        Ok(Self::new(
            extractor,
            analysis,
            HistoryStore::new(Arc::new(backend)),
        ))
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn extractor(&self) -> &TextExtractor {
        self.ingestor.extractor()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn ingest_file(&self, file: UploadedFile) -> DocumentRecord {
        self.ingestor.ingest_file(file)
    }

    pub async fn ingest_path(&self, path: &Path) -> DocumentRecord {
        self.ingestor.ingest_path(path).await
    }

    pub async fn ingest_path_as(&self, path: &Path, document_id: Option<String>) -> DocumentRecord {
        self.ingestor.ingest_path_as(path, document_id).await
    }

    pub fn ingest_text(&self, name: impl Into<String>, text: impl Into<String>) -> DocumentRecord {
        self.ingestor.ingest_text(name, text)
    }

    pub fn ingest_record(&self, record: DocumentRecord) -> DocumentRecord {
        self.ingestor.ingest_record(record)
    }

    /// Analyze a ready document.
    ///
    /// On failure `record` is replaced by an `error` record with the same
    /// identity, and the error is returned. On success the history write runs
    /// in the background; see [`HistoryStore::flush`].
    pub async fn analyze(&self, record: &mut DocumentRecord) -> Result<AnalysisResult> {
        let Some(content) = record.content() else {
            return Err(PolicyError::NotReady(record.id().to_string()));
        };

        let metadata = AnalysisMetadata::for_record(record);
        match self.analysis.analyze(content, Some(metadata)).await {
            Ok(result) => {
                self.history.record_detached(&result);
                Ok(result)
            }
            Err(e) => {
                warn!("Analysis failed for {}: {}", record.id(), e);
                *record = record.superseded_by_failure(e.user_message());
                Err(e)
            }
        }
    }

    pub fn open_chat(&self, record: &DocumentRecord, service: Arc<dyn ChatService>) -> ChatSession {
        info!("Opening chat for document {}", record.id());
        ChatSession::open(record, service)
    }
}

/// Transitions driven here follow the lifecycle; a rejection means a bug, so
/// it is logged rather than surfaced to the uploader.
fn settle(outcome: Result<()>) {
    if let Err(e) = outcome {
        warn!("Unexpected lifecycle transition: {}", e);
    }
}
