//! Ingestor (spec §4.2, §4.5): validates a PDF upload, extracts text, chunks
//! and language-tags it, embeds each chunk, extracts knowledge, and upserts
//! everything into the graph under the session's scope (I1). Generalizes
//! the teacher's `ingest_directory`/`ingest_file`/`upsert_graph_data`
//! (`src/ingest.rs`) from a filesystem walk over arbitrary text files to a
//! single in-memory PDF upload.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::CancellationToken;
use crate::chunker::chunk_page;
use crate::embedding::EmbeddingProvider;
use crate::error::{AppError, AppResult};
use crate::generative_model::{ExtractedRelation, ExtractionResult, GenerativeModel};
use crate::graph_store::{AttrValue, Attrs, GraphStore};
use crate::language;
use crate::models::{is_known_node_label, normalise, Language, RelationshipType};
use crate::rate_limiter::ExtractRateLimiter;
use crate::relational_store::RelationalStore;

#[derive(Debug, Default, serde::Serialize)]
pub struct IngestSummary {
    pub chunks_created: usize,
    pub entities_created: usize,
    pub facts_created: usize,
    pub concepts_created: usize,
    pub cases_created: usize,
    pub relations_created: usize,
    pub language: Option<String>,
}

/// Uploads arrive as in-memory bytes, but `pdf-extract` only reads from a
/// filesystem path; round-trip through a scratch file rather than guess at
/// an in-memory extraction entry point.
fn extract_pdf_text(bytes: &[u8]) -> anyhow::Result<String> {
    use std::io::Write;

    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;
    let text = pdf_extract::extract_text(file.path())?;
    Ok(text)
}

/// Rejects anything the upload's file name doesn't resolve to a PDF mime
/// type (spec §4.5 step 1); `pdf_extract` itself only fails late, after
/// spending work on a file that was never going to parse.
fn validate_is_pdf(file_name: &str) -> AppResult<()> {
    match mime_guess::from_path(file_name).first() {
        Some(mime) if mime.essence_str() == "application/pdf" => Ok(()),
        _ => Err(AppError::InvalidInput(format!(
            "expected a PDF upload, got file name '{file_name}'"
        ))),
    }
}

pub struct Ingestor {
    relational: Arc<RelationalStore>,
    graph: Arc<dyn GraphStore>,
    embedding: Arc<dyn EmbeddingProvider>,
    generative: Arc<dyn GenerativeModel>,
    rate_limiter: Arc<ExtractRateLimiter>,
    max_upload_bytes: u64,
}

impl Ingestor {
    pub fn new(
        relational: Arc<RelationalStore>,
        graph: Arc<dyn GraphStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        generative: Arc<dyn GenerativeModel>,
        rate_limiter: Arc<ExtractRateLimiter>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            relational,
            graph,
            embedding,
            generative,
            rate_limiter,
            max_upload_bytes,
        }
    }

    pub async fn ingest_pdf(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: &[u8],
        cancellation: CancellationToken,
    ) -> AppResult<IngestSummary> {
        if self.relational.get_session(session_id).await?.is_none() {
            return Err(AppError::SessionGone(session_id.to_string()));
        }

        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(AppError::InvalidInput(format!(
                "upload exceeds the {} byte limit",
                self.max_upload_bytes
            )));
        }

        validate_is_pdf(file_name)?;

        let byte_size = bytes.len() as i64;
        if self
            .relational
            .find_upload(session_id, file_name, byte_size)
            .await?
            .is_some()
        {
            return Err(AppError::Conflict(format!(
                "{file_name} has already been ingested into this session"
            )));
        }

        let text = extract_pdf_text(bytes)
            .map_err(|e| AppError::InvalidInput(format!("could not read PDF: {e}")))?;

        if text.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "PDF contained no extractable text".to_string(),
            ));
        }

        self.relational.record_upload(session_id, file_name, byte_size).await?;

        self.ingest_text(session_id, file_name, &text, byte_size, cancellation)
            .await
    }

    /// The chunk/embed/extract/persist pipeline, split out from
    /// `ingest_pdf` so it can be exercised directly in tests without a real
    /// PDF byte fixture.
    pub async fn ingest_text(
        &self,
        session_id: &str,
        file_name: &str,
        text: &str,
        byte_size: i64,
        cancellation: CancellationToken,
    ) -> AppResult<IngestSummary> {
        let document_id = Uuid::new_v4().to_string();
        let windows = chunk_page(text, file_name, 1);
        if windows.is_empty() {
            return Err(AppError::InvalidInput(
                "PDF text could not be split into chunks".to_string(),
            ));
        }

        let mut summary = IngestSummary::default();
        let mut document_language: Option<Language> = None;
        let mut natural_keys: HashMap<(String, String), Attrs> = HashMap::new();
        let mut pending_relations: Vec<ExtractedRelation> = Vec::new();

        for window in &windows {
            if cancellation.load(Ordering::SeqCst) {
                return Err(AppError::SessionGone(session_id.to_string()));
            }

            let chunk_language = language::tag(&window.content);
            document_language = Some(match document_language {
                Some(existing) => existing.merge(chunk_language),
                None => chunk_language,
            });

            let embedding = self
                .embedding
                .embed(&window.content)
                .await
                .map_err(|e| AppError::EmbeddingUnavailable(e.to_string()))?;

            let chunk_id = Uuid::new_v4().to_string();
            let chunk_key = Attrs::from([
                ("source_file".to_string(), AttrValue::from(window.source_file.as_str())),
                ("page".to_string(), AttrValue::from(window.page)),
                ("offset".to_string(), AttrValue::from(window.offset)),
            ]);
            let chunk_attrs = Attrs::from([
                ("id".to_string(), AttrValue::from(chunk_id.as_str())),
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("source_file".to_string(), AttrValue::from(window.source_file.as_str())),
                ("page".to_string(), AttrValue::from(window.page)),
                ("offset".to_string(), AttrValue::from(window.offset)),
                ("content".to_string(), AttrValue::from(window.content.as_str())),
                ("language".to_string(), AttrValue::from(chunk_language.as_str())),
                ("embedding".to_string(), AttrValue::from(embedding.clone())),
            ]);
            self.graph.upsert("Chunk", &chunk_key, &chunk_attrs).await?;
            summary.chunks_created += 1;

            self.rate_limiter.acquire().await;
            let extraction = match self.generative.extract(&window.content, chunk_language).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(error = %e, "generative extraction call failed; continuing without it");
                    continue;
                }
            };

            self.persist_extraction(
                session_id,
                &document_id,
                chunk_language,
                &extraction,
                &mut summary,
                &mut natural_keys,
                &mut pending_relations,
            )
            .await?;
        }

        if cancellation.load(Ordering::SeqCst) {
            return Err(AppError::SessionGone(session_id.to_string()));
        }

        self.persist_relations(session_id, &natural_keys, &pending_relations, &mut summary)
            .await?;

        let document_language = document_language.unwrap_or(Language::En);
        let document_attrs = Attrs::from([
            ("id".to_string(), AttrValue::from(document_id.as_str())),
            ("session_id".to_string(), AttrValue::from(session_id)),
            ("title".to_string(), AttrValue::from(file_name)),
            ("document_type".to_string(), AttrValue::from("pdf")),
            ("file_size".to_string(), AttrValue::from(byte_size)),
            ("language".to_string(), AttrValue::from(document_language.as_str())),
            (
                "upload_date".to_string(),
                AttrValue::from(Utc::now().to_rfc3339()),
            ),
        ]);
        self.graph
            .upsert(
                "Document",
                &Attrs::from([("id".to_string(), AttrValue::from(document_id.as_str()))]),
                &document_attrs,
            )
            .await?;

        summary.language = Some(document_language.as_str().to_string());
        info!(
            session_id,
            document_id,
            chunks = summary.chunks_created,
            entities = summary.entities_created,
            "ingest complete"
        );
        Ok(summary)
    }

    /// Persists one chunk's extracted entities/facts/concepts/cases and the
    /// spec's fixed Document-rooted edges (`MENTIONS`, `CONTAINS`). Relations
    /// the model named are only queued here — `LegalConcept`/`Case` nodes
    /// and cross-chunk relation endpoints may not exist yet, so resolving
    /// them happens once, after every chunk in the document has run.
    #[allow(clippy::too_many_arguments)]
    async fn persist_extraction(
        &self,
        session_id: &str,
        document_id: &str,
        language: Language,
        extraction: &ExtractionResult,
        summary: &mut IngestSummary,
        natural_keys: &mut HashMap<(String, String), Attrs>,
        pending_relations: &mut Vec<ExtractedRelation>,
    ) -> AppResult<()> {
        let document_key = Attrs::from([("id".to_string(), AttrValue::from(document_id))]);
        let session_attr = || Attrs::from([("session_id".to_string(), AttrValue::from(session_id))]);

        for entity in &extraction.entities {
            let normalised_name = normalise(&entity.name);
            let entity_id = Uuid::new_v4().to_string();
            let key_attrs = Attrs::from([
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("normalised_name".to_string(), AttrValue::from(normalised_name.as_str())),
            ]);
            let mut all_attrs = Attrs::from([
                ("id".to_string(), AttrValue::from(entity_id.as_str())),
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("normalised_name".to_string(), AttrValue::from(normalised_name.as_str())),
                ("name".to_string(), AttrValue::from(entity.name.as_str())),
                ("entity_type".to_string(), AttrValue::from(entity.entity_type.as_str())),
                ("language".to_string(), AttrValue::from(language.as_str())),
            ]);
            if let Some(description) = &entity.description {
                all_attrs.insert("description".to_string(), AttrValue::from(description.as_str()));
            }
            self.graph.upsert("Entity", &key_attrs, &all_attrs).await?;
            natural_keys
                .entry(("Entity".to_string(), normalised_name))
                .or_insert_with(|| key_attrs.clone());

            self.graph
                .relate(
                    RelationshipType::Mentions.as_cypher_label(),
                    "Document",
                    &document_key,
                    "Entity",
                    &key_attrs,
                    &session_attr(),
                )
                .await?;
            summary.entities_created += 1;
        }

        for fact in &extraction.facts {
            let normalised_content = normalise(&fact.content);
            let fact_id = Uuid::new_v4().to_string();
            let key_attrs = Attrs::from([
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("normalised_content".to_string(), AttrValue::from(normalised_content.as_str())),
            ]);
            let all_attrs = Attrs::from([
                ("id".to_string(), AttrValue::from(fact_id.as_str())),
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("content".to_string(), AttrValue::from(fact.content.as_str())),
                ("fact_type".to_string(), AttrValue::from(fact.fact_type.as_str())),
                ("confidence".to_string(), AttrValue::from(fact.confidence)),
                ("language".to_string(), AttrValue::from(language.as_str())),
            ]);
            self.graph.upsert("Fact", &key_attrs, &all_attrs).await?;
            natural_keys
                .entry(("Fact".to_string(), normalised_content))
                .or_insert_with(|| key_attrs.clone());

            self.graph
                .relate(
                    RelationshipType::Contains.as_cypher_label(),
                    "Document",
                    &document_key,
                    "Fact",
                    &key_attrs,
                    &session_attr(),
                )
                .await?;
            summary.facts_created += 1;
        }

        for concept in &extraction.concepts {
            let normalised_term = normalise(&concept.term);
            let concept_id = Uuid::new_v4().to_string();
            let key_attrs = Attrs::from([
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("normalised_term".to_string(), AttrValue::from(normalised_term.as_str())),
            ]);
            let all_attrs = Attrs::from([
                ("id".to_string(), AttrValue::from(concept_id.as_str())),
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("term".to_string(), AttrValue::from(concept.term.as_str())),
                ("definition".to_string(), AttrValue::from(concept.definition.as_str())),
                ("category".to_string(), AttrValue::from(concept.category.as_str())),
                ("language".to_string(), AttrValue::from(language.as_str())),
            ]);
            self.graph.upsert("LegalConcept", &key_attrs, &all_attrs).await?;
            natural_keys
                .entry(("LegalConcept".to_string(), normalised_term))
                .or_insert_with(|| key_attrs.clone());
            summary.concepts_created += 1;
        }

        for case in &extraction.cases {
            let normalised_case_number = normalise(&case.case_number);
            let case_id = Uuid::new_v4().to_string();
            let key_attrs = Attrs::from([
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("case_number".to_string(), AttrValue::from(normalised_case_number.as_str())),
            ]);
            let mut all_attrs = Attrs::from([
                ("id".to_string(), AttrValue::from(case_id.as_str())),
                ("session_id".to_string(), AttrValue::from(session_id)),
                ("case_number".to_string(), AttrValue::from(case.case_number.as_str())),
                ("case_name".to_string(), AttrValue::from(case.case_name.as_str())),
            ]);
            for (key, value) in [
                ("court", &case.court),
                ("jurisdiction", &case.jurisdiction),
                ("status", &case.status),
            ] {
                if let Some(v) = value {
                    all_attrs.insert(key.to_string(), AttrValue::from(v.as_str()));
                }
            }
            self.graph.upsert("Case", &key_attrs, &all_attrs).await?;
            natural_keys
                .entry(("Case".to_string(), normalised_case_number))
                .or_insert_with(|| key_attrs.clone());
            summary.cases_created += 1;
        }

        pending_relations.extend(extraction.relations.iter().cloned());

        Ok(())
    }

    /// Resolves every relation the model named across the whole document
    /// against the natural-key index built while persisting entities/facts/
    /// concepts/cases, and dispatches the model-named type and endpoint
    /// labels instead of a single hardcoded shape (spec §3's relationship
    /// table covers `ABOUT`/`RELATED_TO`/`APPLIES_TO`/`INVOLVES` this way;
    /// `CONTAINS`/`MENTIONS` are produced automatically above).
    async fn persist_relations(
        &self,
        session_id: &str,
        natural_keys: &HashMap<(String, String), Attrs>,
        pending_relations: &[ExtractedRelation],
        summary: &mut IngestSummary,
    ) -> AppResult<()> {
        for relation in pending_relations {
            let Some(relationship_type) = RelationshipType::from_cypher_label(&relation.relation_type) else {
                warn!(relation_type = %relation.relation_type, "dropping relation with unrecognised type");
                continue;
            };
            if !is_known_node_label(&relation.src_label) || !is_known_node_label(&relation.dst_label) {
                warn!(
                    src_label = %relation.src_label,
                    dst_label = %relation.dst_label,
                    "dropping relation naming an unknown node label"
                );
                continue;
            }

            let src_key = natural_keys.get(&(relation.src_label.clone(), normalise(&relation.src_name)));
            let dst_key = natural_keys.get(&(relation.dst_label.clone(), normalise(&relation.dst_name)));
            let (Some(src_key), Some(dst_key)) = (src_key, dst_key) else {
                continue;
            };

            self.graph
                .relate(
                    relationship_type.as_cypher_label(),
                    &relation.src_label,
                    src_key,
                    &relation.dst_label,
                    dst_key,
                    &Attrs::from([("session_id".to_string(), AttrValue::from(session_id))]),
                )
                .await?;
            summary.relations_created += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalHashEmbeddingProvider;
    use crate::fakes::{FakeGenerativeModel, FakeGraphStore};
    use crate::generative_model::{ExtractedCase, ExtractedConcept, ExtractedEntity, ExtractedFact};
    use std::sync::atomic::AtomicBool;

    fn token() -> CancellationToken {
        Arc::new(AtomicBool::new(false))
    }

    async fn harness(
        extractions: Vec<ExtractionResult>,
    ) -> (Ingestor, Arc<FakeGraphStore>, String) {
        let relational = Arc::new(RelationalStore::connect("sqlite::memory:").await.unwrap());
        let session = relational.create_session("Matter 1").await.unwrap();
        let graph = Arc::new(FakeGraphStore::new());
        let embedding: Arc<dyn EmbeddingProvider> = Arc::new(LocalHashEmbeddingProvider::default());
        let generative: Arc<dyn GenerativeModel> =
            Arc::new(FakeGenerativeModel::new(extractions, "canned"));
        let rate_limiter = Arc::new(ExtractRateLimiter::new(std::time::Duration::from_millis(0)));

        let ingestor = Ingestor::new(
            relational,
            graph.clone() as Arc<dyn GraphStore>,
            embedding,
            generative,
            rate_limiter,
            1024 * 1024,
        );
        (ingestor, graph, session.id)
    }

    fn entity(name: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.to_string(),
            entity_type: "Organization".to_string(),
            description: None,
            confidence: 1.0,
        }
    }

    fn fact(content: &str) -> ExtractedFact {
        ExtractedFact {
            content: content.to_string(),
            fact_type: "obligation".to_string(),
            confidence: 1.0,
        }
    }

    #[tokio::test]
    async fn ingest_creates_document_rooted_edges_not_chunk_routed_ones() {
        let extraction = ExtractionResult {
            entities: vec![entity("Acme Corp")],
            facts: vec![fact("Acme Corp shall pay rent")],
            ..Default::default()
        };
        let (ingestor, graph, session_id) = harness(vec![extraction]).await;

        ingestor
            .ingest_text(&session_id, "lease.pdf", "Acme Corp shall pay rent monthly.", 100, token())
            .await
            .unwrap();

        assert_eq!(graph.edge_count("MENTIONS"), 1);
        assert_eq!(graph.edge_count("CONTAINS"), 1);
        assert_eq!(graph.edge_count("ABOUT"), 0);
        assert_eq!(graph.edge_count("APPLIES_TO"), 0);
        assert_eq!(graph.edge_count("INVOLVES"), 0);
    }

    #[tokio::test]
    async fn relations_dispatch_by_model_named_type_and_labels() {
        let extraction = ExtractionResult {
            entities: vec![entity("Acme Corp")],
            facts: vec![fact("Acme Corp shall pay rent")],
            relations: vec![ExtractedRelation {
                src_name: "Acme Corp shall pay rent".to_string(),
                dst_name: "Acme Corp".to_string(),
                relation_type: "ABOUT".to_string(),
                src_label: "Fact".to_string(),
                dst_label: "Entity".to_string(),
            }],
            ..Default::default()
        };
        let (ingestor, graph, session_id) = harness(vec![extraction]).await;

        let summary = ingestor
            .ingest_text(&session_id, "lease.pdf", "Acme Corp shall pay rent monthly.", 100, token())
            .await
            .unwrap();

        assert_eq!(summary.relations_created, 1);
        assert_eq!(graph.edge_count("ABOUT"), 1);
    }

    #[tokio::test]
    async fn relations_resolve_across_chunk_boundaries() {
        let first_chunk = ExtractionResult {
            entities: vec![entity("Acme Corp")],
            ..Default::default()
        };
        let second_chunk = ExtractionResult {
            entities: vec![entity("Beta LLC")],
            relations: vec![ExtractedRelation {
                src_name: "Acme Corp".to_string(),
                dst_name: "Beta LLC".to_string(),
                relation_type: "RELATED_TO".to_string(),
                src_label: "Entity".to_string(),
                dst_label: "Entity".to_string(),
            }],
            ..Default::default()
        };
        let long_text = "Acme Corp and its dealings. ".repeat(80) + &"Beta LLC counterparty terms. ".repeat(80);
        let (ingestor, graph, session_id) = harness(vec![first_chunk, second_chunk]).await;

        let summary = ingestor
            .ingest_text(&session_id, "contract.pdf", &long_text, 100, token())
            .await
            .unwrap();

        assert_eq!(summary.relations_created, 1);
        assert_eq!(graph.edge_count("RELATED_TO"), 1);
    }

    #[tokio::test]
    async fn unresolvable_relation_endpoint_is_dropped_not_errored() {
        let extraction = ExtractionResult {
            entities: vec![entity("Acme Corp")],
            relations: vec![ExtractedRelation {
                src_name: "Acme Corp".to_string(),
                dst_name: "Nonexistent".to_string(),
                relation_type: "RELATED_TO".to_string(),
                src_label: "Entity".to_string(),
                dst_label: "Entity".to_string(),
            }],
            ..Default::default()
        };
        let (ingestor, graph, session_id) = harness(vec![extraction]).await;

        let summary = ingestor
            .ingest_text(&session_id, "lease.pdf", "Acme Corp shall pay rent monthly.", 100, token())
            .await
            .unwrap();

        assert_eq!(summary.relations_created, 0);
        assert_eq!(graph.edge_count("RELATED_TO"), 0);
    }

    #[tokio::test]
    async fn same_entity_named_twice_upserts_to_one_node() {
        let first_chunk = ExtractionResult {
            entities: vec![entity("Acme Corp")],
            ..Default::default()
        };
        let second_chunk = ExtractionResult {
            entities: vec![entity("ACME CORP")],
            ..Default::default()
        };
        let long_text = "Acme Corp repeated mentions. ".repeat(80) + &"ACME CORP repeated mentions. ".repeat(80);
        let (ingestor, graph, session_id) = harness(vec![first_chunk, second_chunk]).await;

        ingestor
            .ingest_text(&session_id, "contract.pdf", &long_text, 100, token())
            .await
            .unwrap();

        assert_eq!(graph.node_count("Entity"), 1);
    }

    #[tokio::test]
    async fn tripped_cancellation_aborts_with_session_gone() {
        let extraction = ExtractionResult {
            entities: vec![entity("Acme Corp")],
            ..Default::default()
        };
        let (ingestor, _graph, session_id) = harness(vec![extraction]).await;

        let flag = token();
        flag.store(true, Ordering::SeqCst);

        let result = ingestor
            .ingest_text(&session_id, "lease.pdf", "Acme Corp shall pay rent monthly.", 100, flag)
            .await;

        assert!(matches!(result, Err(AppError::SessionGone(_))));
    }

    #[tokio::test]
    async fn duplicate_upload_is_rejected_with_conflict() {
        let (ingestor, _graph, session_id) = harness(vec![ExtractionResult::default()]).await;
        let bytes = b"%PDF-1.4 fake";

        ingestor.relational.record_upload(&session_id, "doc.pdf", bytes.len() as i64).await.unwrap();

        let result = ingestor.ingest_pdf(&session_id, "doc.pdf", bytes, token()).await;
        assert!(matches!(result, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn non_pdf_file_name_is_rejected() {
        let (ingestor, _graph, session_id) = harness(vec![ExtractionResult::default()]).await;
        let result = ingestor.ingest_pdf(&session_id, "doc.txt", b"hello", token()).await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn unknown_concept_and_case_extraction_creates_no_document_edge() {
        let extraction = ExtractionResult {
            concepts: vec![ExtractedConcept {
                term: "force majeure".to_string(),
                definition: "an unforeseeable event".to_string(),
                category: "doctrine".to_string(),
            }],
            cases: vec![ExtractedCase {
                case_number: "12-345".to_string(),
                case_name: "Acme v. Beta".to_string(),
                court: None,
                jurisdiction: None,
                status: None,
            }],
            ..Default::default()
        };
        let (ingestor, graph, session_id) = harness(vec![extraction]).await;

        ingestor
            .ingest_text(&session_id, "lease.pdf", "Force majeure applies to case 12-345.", 100, token())
            .await
            .unwrap();

        assert_eq!(graph.node_count("LegalConcept"), 1);
        assert_eq!(graph.node_count("Case"), 1);
        assert_eq!(graph.edge_count("APPLIES_TO"), 0);
        assert_eq!(graph.edge_count("INVOLVES"), 0);
    }
}
