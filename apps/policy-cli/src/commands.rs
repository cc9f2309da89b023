//! Subcommand handlers

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use policy_core::chat::HttpChatService;
use policy_core::history::SqliteHistory;
use policy_core::{
    AnalysisResult, ChatMessage, ChatSession, DocumentRecord, ExtractOptions, HistoryEntry,
    HistoryStore, Ingestor, PolicyConfig, PolicyPipeline, TextExtractor,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;

pub enum Input {
    File(PathBuf),
    Text(String),
}

/// Extraction only; `extract` and `chat` never talk to the analysis service
fn ingestor(config: &PolicyConfig) -> Ingestor {
    Ingestor::new(TextExtractor::new(ExtractOptions {
        max_pages: config.max_pages,
    }))
}

pub async fn extract(config: &PolicyConfig, path: &Path) -> anyhow::Result<()> {
    let record = ready_document(&ingestor(config), path).await?;
    println!("{}", record.content().unwrap_or_default());
    Ok(())
}

pub async fn analyze(
    config: &PolicyConfig,
    input: Input,
    document_id: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let pipeline = PolicyPipeline::from_config(config).await?;
    let (record, result) = analyze_input(&pipeline, input, document_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print!("{}", render_analysis(record.id(), &result));
    }
    Ok(())
}

/// Ingest, analyze and wait for the history write.
///
/// With a `document_id`, every run for the same document shares one history.
async fn analyze_input(
    pipeline: &PolicyPipeline,
    input: Input,
    document_id: Option<String>,
) -> anyhow::Result<(DocumentRecord, AnalysisResult)> {
    let mut record = match input {
        Input::File(path) => pipeline.ingest_path_as(&path, document_id).await,
        Input::Text(text) => {
            let record = DocumentRecord::from_text("pasted text", text);
            let record = match document_id {
                Some(id) => record.with_id(id),
                None => record,
            };
            pipeline.ingest_record(record)
        }
    };
    ensure_ready(&record)?;

    let outcome = pipeline.analyze(&mut record).await;
    // let the detached history write land before the process exits
    pipeline.history().flush().await;

    match outcome {
        Ok(result) => Ok((record, result)),
        Err(e) => bail!("{}", e.user_message()),
    }
}

pub async fn chat(
    config: &PolicyConfig,
    path: &Path,
    questions: Vec<String>,
) -> anyhow::Result<()> {
    let record = ready_document(&ingestor(config), path).await?;
    let service = Arc::new(HttpChatService::from_config(config)?);
    info!("Opening chat for document {}", record.id());
    let session = ChatSession::open(&record, service);

    if questions.is_empty() {
        return interactive_chat(&session).await;
    }

    for question in questions {
        println!("> {}", question);
        ask_and_print(&session, &question).await;
    }
    Ok(())
}

async fn interactive_chat(session: &ChatSession) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("Ask about the document. Empty line or Ctrl-D to quit.");
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            break;
        }
        ask_and_print(session, question).await;
    }

    info!("Chat ended after {} messages", session.len());
    Ok(())
}

async fn ask_and_print(session: &ChatSession, question: &str) {
    match session.ask(question).await {
        Ok(answer) => println!("{}", render_answer(&answer)),
        // a failed question leaves the session usable
        Err(e) => eprintln!("error: {}", e.user_message()),
    }
}

pub async fn history(config: &PolicyConfig, document_id: &str, json: bool) -> anyhow::Result<()> {
    let backend = SqliteHistory::connect(&config.database_url)
        .await
        .with_context(|| format!("opening history database {}", config.database_url))?;
    let entries = HistoryStore::new(Arc::new(backend)).list(document_id).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if entries.is_empty() {
        println!("No analysis history for {}", document_id);
    } else {
        print!("{}", render_history(&entries));
    }
    Ok(())
}

async fn ready_document(ingestor: &Ingestor, path: &Path) -> anyhow::Result<DocumentRecord> {
    let record = ingestor.ingest_path(path).await;
    ensure_ready(&record)?;
    Ok(record)
}

fn ensure_ready(record: &DocumentRecord) -> anyhow::Result<()> {
    if let Some(message) = record.error_message() {
        bail!("{}: {}", record.name(), message);
    }
    if !record.is_ready() {
        bail!("{}: document is {}", record.name(), record.status());
    }
    Ok(())
}

fn render_analysis(document_id: &str, result: &AnalysisResult) -> String {
    let mut out = format!("Document: {}\n", document_id);
    if let Some(risk) = result.risk_level {
        out.push_str(&format!("Risk level: {}\n", risk));
    }
    out.push_str(&format!("\n{}\n", result.summary));

    for (title, items) in [
        ("Coverage gaps", &result.gaps),
        ("Overpayments", &result.overpayments),
        ("Recommendations", &result.recommendations),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{}:\n", title));
        for item in items {
            out.push_str(&format!("  - {}\n", item));
        }
    }
    out
}

fn render_answer(answer: &ChatMessage) -> String {
    match (&answer.source_type, &answer.source_id) {
        (Some(kind), Some(id)) => format!("{}\n  [source: {} {}]", answer.content, kind, id),
        _ => answer.content.clone(),
    }
}

fn render_history(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let risk = entry
                .risk_level
                .map(|r| r.to_string())
                .unwrap_or_else(|| "-".to_string());
            format!(
                "{}  [{}]  {}\n",
                entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                risk,
                entry.summary
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use policy_core::analysis::{AnalysisRequest, AnalysisResponse};
    use policy_core::{AnalysisClient, AnalysisService, ChatRole, RiskLevel};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    /// Summarizes the submitted text so repeated runs are distinguishable
    struct EchoAnalysis;

    #[async_trait]
    impl AnalysisService for EchoAnalysis {
        async fn submit(&self, request: &AnalysisRequest) -> policy_core::Result<AnalysisResponse> {
            Ok(serde_json::from_value(json!({
                "success": true,
                "data": {"summary": format!("Reviewed: {}", request.document_text)}
            }))
            .unwrap())
        }
    }

    fn test_pipeline() -> PolicyPipeline {
        PolicyPipeline::new(
            TextExtractor::default(),
            AnalysisClient::new(Arc::new(EchoAnalysis)),
            HistoryStore::in_memory(),
        )
    }

    #[tokio::test]
    async fn test_document_id_accumulates_history_across_runs() {
        let pipeline = test_pipeline();
        for text in ["Coverage A: $200,000", "Coverage A: $250,000"] {
            let (record, _) = analyze_input(
                &pipeline,
                Input::Text(text.to_string()),
                Some("home-policy".to_string()),
            )
            .await
            .unwrap();
            assert_eq!(record.id(), "home-policy");
        }

        let summaries: Vec<String> = pipeline
            .history()
            .list("home-policy")
            .await
            .into_iter()
            .map(|e| e.summary)
            .collect();
        assert_eq!(
            summaries,
            vec!["Reviewed: Coverage A: $250,000", "Reviewed: Coverage A: $200,000"]
        );
    }

    #[tokio::test]
    async fn test_runs_without_document_id_get_fresh_ids() {
        let pipeline = test_pipeline();
        let (first, _) = analyze_input(&pipeline, Input::Text("Policy".into()), None)
            .await
            .unwrap();
        let (second, _) = analyze_input(&pipeline, Input::Text("Policy".into()), None)
            .await
            .unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(pipeline.history().list(first.id()).await.len(), 1);
    }

    #[tokio::test]
    async fn test_blank_text_is_reported_before_analysis() {
        let err = analyze_input(&test_pipeline(), Input::Text("  ".into()), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Nothing to analyze"));
    }

    #[tokio::test]
    async fn test_extract_needs_no_services() {
        let dir = std::env::temp_dir().join(format!("policy-cli-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("notes.txt");
        tokio::fs::write(&path, "Liability: $300,000").await.unwrap();

        let config = PolicyConfig {
            analysis_url: "not a url".to_string(),
            ..PolicyConfig::default()
        };
        let record = ready_document(&ingestor(&config), &path).await.unwrap();
        assert_eq!(record.content(), Some("Liability: $300,000"));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    fn result() -> AnalysisResult {
        AnalysisResult {
            document_id: Some("doc-1".to_string()),
            summary: "Homeowners policy with low liability limits".to_string(),
            gaps: vec!["Flood: not covered".to_string()],
            overpayments: vec![],
            recommendations: vec!["Raise liability to $500,000".to_string()],
            risk_level: Some(RiskLevel::High),
            analyzed_at: "2024-03-01T12:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn test_render_analysis_skips_empty_sections() {
        let text = render_analysis("doc-1", &result());
        assert_eq!(
            text,
            "Document: doc-1\n\
             Risk level: high\n\
             \n\
             Homeowners policy with low liability limits\n\
             \n\
             Coverage gaps:\n  - Flood: not covered\n\
             \n\
             Recommendations:\n  - Raise liability to $500,000\n"
        );
    }

    #[test]
    fn test_render_answer_with_source() {
        let answer = ChatMessage {
            role: ChatRole::Assistant,
            content: "Your deductible is $1,000.".to_string(),
            source_id: Some("doc-1".to_string()),
            source_type: Some("document".to_string()),
        };
        assert_eq!(
            render_answer(&answer),
            "Your deductible is $1,000.\n  [source: document doc-1]"
        );
        assert_eq!(
            render_answer(&ChatMessage::assistant("plain")),
            "plain"
        );
    }

    #[test]
    fn test_render_history() {
        let entries = vec![HistoryEntry {
            document_id: "doc-1".to_string(),
            summary: "Auto policy".to_string(),
            risk_level: None,
            created_at: "2024-03-01T12:30:00Z".parse().unwrap(),
        }];
        assert_eq!(render_history(&entries), "2024-03-01 12:30:00  [-]  Auto policy\n");
    }

    #[test]
    fn test_ensure_ready_reports_failure_message() {
        let mut record = DocumentRecord::uploading("scan.pdf");
        record.fail("The document could not be read.").unwrap();
        let err = ensure_ready(&record).unwrap_err();
        assert_eq!(err.to_string(), "scan.pdf: The document could not be read.");
    }
}
