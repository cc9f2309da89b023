//! Question/answer sessions about one analyzed document
//!
//! A session is an in-memory, append-only message list. Asking is two-phase:
//!
//! 1. The user message is appended immediately and the ask is given the
//!    next sequence number.
//! 2. The service call runs; its answer is appended only once every earlier
//!    ask has been settled, so answers follow question order even when a
//!    later request finishes first.
//!
//! Failed asks leave the user message in place and append nothing. Sessions
//! are never persisted.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::PolicyConfig;
use crate::document::DocumentRecord;
use crate::error::{PolicyError, Result};

const GENERIC_CHAT_FAILURE: &str = "No response from chat service";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    /// Document section the answer was drawn from, if the service said so
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            source_id: None,
            source_type: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            source_id: None,
            source_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub document_id: String,
    pub question: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
}

impl ChatResponse {
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            success: Some(true),
            response: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn failure(message: Option<String>) -> Self {
        Self {
            success: Some(false),
            error: message,
            ..Default::default()
        }
    }

    fn into_message(self) -> Result<ChatMessage> {
        let failure = |error: Option<String>| {
            PolicyError::Chat(
                error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| GENERIC_CHAT_FAILURE.to_string()),
            )
        };

        if self.success == Some(false) {
            return Err(failure(self.error));
        }
        match self.response {
            Some(content) => Ok(ChatMessage {
                role: ChatRole::Assistant,
                content,
                source_id: self.source_id,
                source_type: self.source_type,
            }),
            None => Err(failure(self.error)),
        }
    }
}

/// Transport to the chat service
#[async_trait]
pub trait ChatService: Send + Sync {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse>;
}

/// reqwest-backed chat service
pub struct HttpChatService {
    client: Client,
    endpoint: String,
}

impl HttpChatService {
    pub fn new(endpoint: impl Into<String>, client: Client) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| PolicyError::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::new(config.chat_url.clone(), client))
    }
}

#[async_trait]
impl ChatService for HttpChatService {
    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        debug!("POST {} for document {}", self.endpoint, request.document_id);
        let response = self.client.post(&self.endpoint).json(request).send().await?;
        let status = response.status();
        let body = response.text().await?;

        let parsed = serde_json::from_str::<ChatResponse>(&body);
        if !status.is_success() {
            let message = parsed
                .ok()
                .and_then(|r| r.error)
                .unwrap_or_else(|| format!("chat service returned HTTP {}", status.as_u16()));
            return Ok(ChatResponse::failure(Some(message)));
        }

        parsed.map_err(|e| PolicyError::Chat(format!("malformed chat response: {}", e)))
    }
}

/// Ordering state for in-flight asks
#[derive(Debug, Default)]
struct Turns {
    /// Sequence number handed to the next ask
    issued: u64,
    /// Sequence number allowed to append next
    next: u64,
    /// Asks dropped before their turn came up
    abandoned: BTreeSet<u64>,
}

impl Turns {
    fn advance(&mut self) {
        self.next += 1;
        while self.abandoned.remove(&self.next) {
            self.next += 1;
        }
    }
}

pub struct ChatSession {
    document_id: String,
    document_ready: AtomicBool,
    service: Arc<dyn ChatService>,
    messages: Mutex<Vec<ChatMessage>>,
    turns: Mutex<Turns>,
    turn_changed: Notify,
}

impl ChatSession {
    /// Open a session anchored to `document`
    pub fn open(document: &DocumentRecord, service: Arc<dyn ChatService>) -> Self {
        info!("Opening chat session for document {}", document.id());
        Self {
            document_id: document.id().to_string(),
            document_ready: AtomicBool::new(document.is_ready()),
            service,
            messages: Mutex::new(Vec::new()),
            turns: Mutex::new(Turns::default()),
            turn_changed: Notify::new(),
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Refresh the readiness of the anchored document
    pub fn sync_document(&self, document: &DocumentRecord) {
        if document.id() != self.document_id {
            warn!(
                "Ignoring status of document {} in session for {}",
                document.id(),
                self.document_id
            );
            return;
        }
        self.document_ready
            .store(document.is_ready(), Ordering::SeqCst);
    }

    /// Snapshot of the conversation for display
    pub fn messages(&self) -> Vec<ChatMessage> {
        lock(&self.messages).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask a question; returns the assistant message that was appended
    pub async fn ask(&self, question: &str) -> Result<ChatMessage> {
        if !self.document_ready.load(Ordering::SeqCst) {
            return Err(PolicyError::NotReady(self.document_id.clone()));
        }
        if question.trim().is_empty() {
            return Err(PolicyError::Validation("question is empty".to_string()));
        }

        let turn = self.issue(question);
        let request = ChatRequest {
            document_id: self.document_id.clone(),
            question: question.to_string(),
        };

        let outcome = match self.service.send(&request).await {
            Ok(response) => response.into_message(),
            Err(e) => Err(e),
        };

        turn.wait().await;
        match &outcome {
            Ok(message) => {
                lock(&self.messages).push(message.clone());
                debug!("Ask #{} answered", turn.seq);
            }
            Err(e) => warn!("Ask #{} on {} failed: {}", turn.seq, self.document_id, e),
        }
        turn.finish();

        outcome
    }

    /// Append the user message and take a sequence number in one step
    fn issue(&self, question: &str) -> Turn<'_> {
        let mut turns = lock(&self.turns);
        let seq = turns.issued;
        turns.issued += 1;
        lock(&self.messages).push(ChatMessage::user(question));
        Turn {
            session: self,
            seq,
            finished: false,
        }
    }
}

/// An ask's place in line. Dropping it unfinished gives up the slot.
struct Turn<'a> {
    session: &'a ChatSession,
    seq: u64,
    finished: bool,
}

impl Turn<'_> {
    async fn wait(&self) {
        loop {
            let changed = self.session.turn_changed.notified();
            if lock(&self.session.turns).next == self.seq {
                return;
            }
            changed.await;
        }
    }

    fn finish(mut self) {
        self.finished = true;
        lock(&self.session.turns).advance();
        self.session.turn_changed.notify_waiters();
    }
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!("Ask #{} abandoned", self.seq);
        let mut turns = lock(&self.session.turns);
        if turns.next == self.seq {
            turns.advance();
        } else {
            turns.abandoned.insert(self.seq);
        }
        drop(turns);
        self.session.turn_changed.notify_waiters();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
