//! Answerer (spec §4.7): loads bounded history, assembles the four-block
//! prompt, streams the model's answer, and emits a trailing sources record.
//! New module — grounded on the teacher's `answer_with_openai` for the
//! completion call and on `perstarkse-minne`'s SSE stream assembly
//! (`html-router/src/routes/chat/message_response_stream.rs`) for the
//! producer/consumer shape that lets the full text be buffered while
//! fragments are forwarded live.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;

use crate::app_state::CancellationToken;
use crate::error::{AppError, AppResult};
use crate::generative_model::GenerativeModel;
use crate::language;
use crate::models::MessageRole;
use crate::relational_store::RelationalStore;
use crate::retriever::{RetrievalResult, Retriever};

const DISCLAIMER: &str = "This is not legal advice.";

#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
}

pub enum AnswerEvent {
    Fragment(String),
    Done { sources: Vec<SourceRef> },
}

pub struct Answerer {
    relational: Arc<RelationalStore>,
    retriever: Arc<Retriever>,
    generative: Arc<dyn GenerativeModel>,
    history_token_budget: i64,
}

impl Answerer {
    pub fn new(
        relational: Arc<RelationalStore>,
        retriever: Arc<Retriever>,
        generative: Arc<dyn GenerativeModel>,
        history_token_budget: i64,
    ) -> Self {
        Self {
            relational,
            retriever,
            generative,
            history_token_budget,
        }
    }

    pub async fn answer(
        &self,
        session_id: &str,
        question: &str,
        cancellation: CancellationToken,
    ) -> AppResult<BoxStream<'static, AppResult<AnswerEvent>>> {
        if self.relational.get_session(session_id).await?.is_none() {
            return Err(AppError::SessionGone(session_id.to_string()));
        }

        let question_tokens = estimate_tokens(question);
        self.relational
            .append_message(session_id, MessageRole::User, question, question_tokens)
            .await?;

        let history = self
            .relational
            .recent_messages_within_budget(session_id, self.history_token_budget)
            .await?;

        if cancellation.load(Ordering::SeqCst) {
            return Err(AppError::SessionGone(session_id.to_string()));
        }

        let retrieval = self
            .retriever
            .retrieve(session_id, question, 10, None)
            .await
            .map_err(AppError::Internal)?;

        if cancellation.load(Ordering::SeqCst) {
            return Err(AppError::SessionGone(session_id.to_string()));
        }

        if retrieval.chunks.is_empty() && retrieval.entities.is_empty() {
            let fragment = match retrieval.query_language {
                crate::models::Language::Ar => {
                    "لا توجد مستندات مرفوعة لهذه الجلسة بعد. يرجى رفع مستند للمتابعة.".to_string()
                }
                _ => "No documents have been uploaded to this session yet. Please upload a document to continue.".to_string(),
            };
            self.relational
                .append_message(
                    session_id,
                    MessageRole::Assistant,
                    &fragment,
                    estimate_tokens(&fragment),
                )
                .await?;

            let stream = futures::stream::iter(vec![
                Ok(AnswerEvent::Fragment(fragment)),
                Ok(AnswerEvent::Done { sources: Vec::new() }),
            ]);
            return Ok(Box::pin(stream));
        }

        let system_preamble = self.generative.answer_system_preamble(retrieval.query_language);
        let context = build_context_block(&retrieval, &history);
        let sources = build_sources(&retrieval);

        let model_stream = self
            .generative
            .answer(system_preamble, &context, question)
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        let relational = self.relational.clone();
        let session_id = session_id.to_string();

        let stream = async_stream::stream! {
            let mut assembled = String::new();
            let mut model_stream = model_stream;
            while let Some(fragment) = model_stream.next().await {
                if cancellation.load(Ordering::SeqCst) {
                    yield Err(AppError::SessionGone(session_id.clone()));
                    return;
                }
                match fragment {
                    Ok(text) => {
                        assembled.push_str(&text);
                        yield Ok(AnswerEvent::Fragment(text));
                    }
                    Err(e) => {
                        yield Err(AppError::UpstreamUnavailable(e.to_string()));
                        return;
                    }
                }
            }

            if !assembled.is_empty() {
                if let Err(e) = relational
                    .append_message(
                        &session_id,
                        MessageRole::Assistant,
                        &assembled,
                        estimate_tokens(&assembled),
                    )
                    .await
                {
                    yield Err(AppError::Internal(e));
                    return;
                }
            }

            yield Ok(AnswerEvent::Done { sources });
        };

        Ok(Box::pin(stream))
    }
}

/// Builds the Context + Recent History blocks (the Disclaimer and User
/// Question are assembled by the caller/model call directly).
fn build_context_block(retrieval: &RetrievalResult, history: &[crate::models::Message]) -> String {
    let mut out = String::new();

    out.push_str("Disclaimer: ");
    out.push_str(DISCLAIMER);
    out.push_str("\n\nContext from Knowledge Graph:\n");

    if !retrieval.entities.is_empty() {
        out.push_str("Entities:\n");
        for entity in &retrieval.entities {
            out.push_str(&format!("- {} ({})", entity.display, entity.label));
            if let Some(description) = &entity.description {
                out.push_str(&format!(": {description}"));
            }
            out.push('\n');
        }
    }

    if !retrieval.relationships.is_empty() {
        out.push_str("Relationships:\n");
        for edge in &retrieval.relationships {
            out.push_str(&format!(
                "- {} -[{}]-> {}\n",
                edge.from_id, edge.relationship_type, edge.to_display
            ));
        }
    }

    if !retrieval.expanded.is_empty() {
        out.push_str("Related nodes:\n");
        for node in &retrieval.expanded {
            out.push_str(&format!("- {} ({})\n", node.display, node.label));
        }
    }

    if !retrieval.chunks.is_empty() {
        out.push_str("Document excerpts:\n");
        for chunk in &retrieval.chunks {
            out.push_str(&format!(
                "[source_file={}, page={}, language={}]\n{}\n\n",
                chunk.source_file, chunk.page, chunk.language, chunk.content
            ));
        }
    }

    if !history.is_empty() {
        out.push_str("Recent History:\n");
        for message in history {
            out.push_str(&format!("{}: {}\n", message.role.as_str(), message.content));
        }
    }

    out
}

fn build_sources(retrieval: &RetrievalResult) -> Vec<SourceRef> {
    let mut sources = Vec::new();

    for chunk in &retrieval.chunks {
        sources.push(SourceRef {
            kind: "chunk".to_string(),
            name: None,
            entity_type: None,
            relationship_type: None,
            source_file: Some(chunk.source_file.clone()),
            page: Some(chunk.page),
            language: Some(chunk.language.clone()),
        });
    }
    for entity in &retrieval.entities {
        sources.push(SourceRef {
            kind: entity.label.to_lowercase(),
            name: Some(entity.display.clone()),
            entity_type: if entity.label == "Entity" { Some(entity.label.clone()) } else { None },
            relationship_type: None,
            source_file: None,
            page: None,
            language: Some(entity.language.clone()),
        });
    }
    for edge in &retrieval.relationships {
        sources.push(SourceRef {
            kind: "relationship".to_string(),
            name: Some(edge.to_display.clone()),
            entity_type: None,
            relationship_type: Some(edge.relationship_type.clone()),
            source_file: None,
            page: None,
            language: None,
        });
    }
    for node in &retrieval.expanded {
        sources.push(SourceRef {
            kind: node.label.to_lowercase(),
            name: Some(node.display.clone()),
            entity_type: None,
            relationship_type: None,
            source_file: None,
            page: None,
            language: Some(node.language.clone()),
        });
    }

    sources
}

/// Coarse token estimate (~4 chars/token), used only for the history budget
/// cutoff, not billing.
fn estimate_tokens(text: &str) -> i64 {
    ((text.chars().count() as i64) / 4).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;
    use crate::retriever::ScoredNode;

    #[test]
    fn estimate_tokens_is_at_least_one_for_nonempty_text() {
        assert_eq!(estimate_tokens(""), 0.max(1));
        assert!(estimate_tokens("hi") >= 1);
    }

    #[test]
    fn context_block_includes_disclaimer_and_citations() {
        let retrieval = RetrievalResult {
            chunks: vec![crate::retriever::RetrievedChunk {
                chunk_id: "c1".to_string(),
                content: "Tenant shall pay rent monthly.".to_string(),
                source_file: "lease.pdf".to_string(),
                page: 3,
                language: "en".to_string(),
                score: 0.9,
            }],
            entities: vec![ScoredNode {
                id: "e1".to_string(),
                label: "Entity".to_string(),
                display: "Acme Corp".to_string(),
                description: None,
                language: "en".to_string(),
                score: 2,
            }],
            relationships: Vec::new(),
            expanded: Vec::new(),
            search_terms: vec!["rent".to_string()],
            query_language: Language::En,
        };

        let block = build_context_block(&retrieval, &[]);
        assert!(block.contains(DISCLAIMER));
        assert!(block.contains("source_file=lease.pdf"));
        assert!(block.contains("Acme Corp"));
    }
}
