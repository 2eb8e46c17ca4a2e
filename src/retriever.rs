//! Retriever (spec §4.6): three passes — semantic, graph, one-hop expansion
//! — joined into a single context pack. Generalizes the teacher's
//! `rag_query`/`build_context_from_graph` (`src/rag.rs`) from a single
//! vector-search-then-expand flow into the parallel, session-scoped passes
//! §4.6 names.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::try_join;

use crate::embedding::{similarity, EmbeddingProvider};
use crate::graph_store::{Attrs, GraphStore};
use crate::language;
use crate::models::Language;

const EN_STOPWORDS: &[&str] = &[
    "what", "is", "are", "the", "a", "an", "in", "on", "of", "to", "for", "and", "or", "does",
    "do", "how", "why", "who", "which", "this", "that", "it", "with", "about", "file", "document",
];

const AR_STOPWORDS: &[&str] = &[
    "ما", "ماذا", "هل", "في", "من", "على", "إلى", "هذا", "هذه", "التي", "الذي", "و", "أو", "عن",
    "فالملف", "الملف", "المستند",
];

const GENERAL_QUERY_PHRASES: &[&str] = &[
    "what is in the file",
    "what does the file contain",
    "contents of the file",
    "contents of the document",
    "summarize the document",
    "summarize the file",
    "ماذا يوجد في الملف",
    "ماذا يوجد فالملف",
    "ماذا يحتوي الملف",
    "محتوى الملف",
    "لخص المستند",
];

const SEMANTIC_THRESHOLD_GENERAL: f64 = 0.2;
const SEMANTIC_THRESHOLD_DEFAULT: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub content: String,
    pub source_file: String,
    pub page: i64,
    pub language: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredNode {
    pub id: String,
    pub label: String,
    pub display: String,
    pub description: Option<String>,
    pub language: String,
    pub score: i64,
}

/// A typed edge surfaced by the expansion pass, carried alongside the
/// neighbour node it leads to (spec §4.6 step 6: relationships are one of
/// the four returned sets).
#[derive(Debug, Clone)]
pub struct RelatedEdge {
    pub from_id: String,
    pub relationship_type: String,
    pub to_id: String,
    pub to_display: String,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    pub entities: Vec<ScoredNode>,
    pub relationships: Vec<RelatedEdge>,
    pub expanded: Vec<ScoredNode>,
    pub search_terms: Vec<String>,
    pub query_language: Language,
}

pub struct Retriever {
    graph: Arc<dyn GraphStore>,
    embedding: Arc<dyn EmbeddingProvider>,
}

impl Retriever {
    pub fn new(graph: Arc<dyn GraphStore>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
        Self { graph, embedding }
    }

    pub async fn retrieve(
        &self,
        session_id: &str,
        query_text: &str,
        limit: usize,
        language_filter: Option<Language>,
    ) -> Result<RetrievalResult> {
        let query_language = language::tag(query_text);
        let search_terms = meaningful_terms(query_text);
        let is_general = is_general_content_query(query_text);

        let (chunks, graph_nodes) = try_join!(
            self.semantic_pass(session_id, query_text, is_general),
            self.graph_pass(session_id, &search_terms, limit, language_filter),
        )?;

        let node_ids: Vec<String> = graph_nodes.iter().map(|n| n.id.clone()).collect();
        let (expanded, relationships) = self.expansion_pass(session_id, &node_ids, limit).await?;

        Ok(RetrievalResult {
            chunks,
            entities: graph_nodes,
            relationships,
            expanded,
            search_terms,
            query_language,
        })
    }

    /// Embedding-cosine similarity over every chunk in the session (I1),
    /// ordered descending, cut by a threshold that relaxes for
    /// content-of-file queries so the Answerer can still see full document
    /// coverage (spec §4.6 step 3).
    async fn semantic_pass(
        &self,
        session_id: &str,
        query_text: &str,
        is_general: bool,
    ) -> Result<Vec<RetrievedChunk>> {
        let rows = self
            .graph
            .query(
                "MATCH (c:Chunk) WHERE c.session_id = $session_id \
                 RETURN c.id AS id, c.content AS content, c.source_file AS source_file, \
                        c.page AS page, c.language AS language, c.embedding AS embedding \
                 ORDER BY c.id ASC",
                &Attrs::from([(
                    "session_id".to_string(),
                    crate::graph_store::AttrValue::from(session_id),
                )]),
            )
            .await?;

        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = self.embedding.embed(query_text).await?;
        let threshold = if is_general {
            SEMANTIC_THRESHOLD_GENERAL
        } else {
            SEMANTIC_THRESHOLD_DEFAULT
        };

        let mut scored: Vec<RetrievedChunk> = rows
            .iter()
            .filter_map(|row| {
                let id: String = row.get("id")?;
                let content: String = row.get("content")?;
                let source_file: String = row.get("source_file")?;
                let page: i64 = row.get("page")?;
                let language: String = row.get("language")?;
                let embedding_f64: Vec<f64> = row.get("embedding")?;
                let embedding: Vec<f32> = embedding_f64.into_iter().map(|v| v as f32).collect();
                let score = similarity(&query_vec, &embedding);
                Some(RetrievedChunk {
                    chunk_id: id,
                    content,
                    source_file,
                    page,
                    language,
                    score,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        if is_general {
            // Full document coverage must survive regardless of score.
            return Ok(scored);
        }

        let above_threshold: Vec<RetrievedChunk> =
            scored.iter().filter(|c| c.score >= threshold).cloned().collect();
        if above_threshold.is_empty() {
            Ok(scored)
        } else {
            Ok(above_threshold)
        }
    }

    /// Scores Entity/Fact/LegalConcept/Case nodes against the search terms:
    /// content-field match = 1, name match = 2, description match = 3,
    /// other = 4 (lower is better); ties broken by `created_at` desc then id
    /// (spec §4.6 step 4, determinism clause).
    async fn graph_pass(
        &self,
        session_id: &str,
        search_terms: &[String],
        limit: usize,
        language_filter: Option<Language>,
    ) -> Result<Vec<ScoredNode>> {
        let rows = self
            .graph
            .query(
                "MATCH (n) WHERE n.session_id = $session_id \
                 AND (n:Entity OR n:Fact OR n:LegalConcept OR n:Case) \
                 RETURN n.id AS id, labels(n) AS labels, \
                        coalesce(n.name, n.term, n.case_name, '') AS name_field, \
                        coalesce(n.description, n.definition, '') AS description_field, \
                        coalesce(n.content, '') AS content_field, \
                        coalesce(n.language, '') AS language, \
                        coalesce(n.created_at, '') AS created_at",
                &Attrs::from([(
                    "session_id".to_string(),
                    crate::graph_store::AttrValue::from(session_id),
                )]),
            )
            .await?;

        let needles: Vec<String> = search_terms.iter().map(|t| t.to_lowercase()).collect();

        let mut scored: Vec<(ScoredNode, String)> = Vec::new();
        for row in &rows {
            let id: String = match row.get("id") {
                Some(v) => v,
                None => continue,
            };
            let labels: Vec<String> = row.get("labels").unwrap_or_default();
            let label = labels.into_iter().next().unwrap_or_else(|| "Unknown".to_string());
            let name_field: String = row.get("name_field").unwrap_or_default();
            let description_field: String = row.get("description_field").unwrap_or_default();
            let content_field: String = row.get("content_field").unwrap_or_default();
            let node_language: String = row.get("language").unwrap_or_default();
            let created_at: String = row.get("created_at").unwrap_or_default();

            if let Some(filter) = language_filter {
                if node_language != filter.as_str() {
                    continue;
                }
            }

            let name_lower = name_field.to_lowercase();
            let description_lower = description_field.to_lowercase();
            let content_lower = content_field.to_lowercase();

            let score = needles
                .iter()
                .filter_map(|needle| {
                    if needle.is_empty() {
                        return None;
                    }
                    if content_lower.contains(needle.as_str()) {
                        Some(1)
                    } else if name_lower.contains(needle.as_str()) {
                        Some(2)
                    } else if description_lower.contains(needle.as_str()) {
                        Some(3)
                    } else {
                        None
                    }
                })
                .min();

            let Some(score) = score else { continue };

            let display = if !name_field.is_empty() {
                name_field
            } else {
                content_field
            };

            scored.push((
                ScoredNode {
                    id,
                    label,
                    display,
                    description: if description_field.is_empty() {
                        None
                    } else {
                        Some(description_field)
                    },
                    language: node_language,
                    score,
                },
                created_at,
            ));
        }

        scored.sort_by(|(a, a_created), (b, b_created)| {
            a.score
                .cmp(&b.score)
                .then_with(|| b_created.cmp(a_created))
                .then_with(|| a.id.cmp(&b.id))
        });

        Ok(scored.into_iter().take(limit).map(|(n, _)| n).collect())
    }

    /// One-hop neighbours of the graph pass's node ids, within the same
    /// session, bounded by `limit` (spec §4.6 step 5), plus the typed edges
    /// that led to each neighbour (spec §4.6 step 6's `relationships` set).
    async fn expansion_pass(
        &self,
        session_id: &str,
        node_ids: &[String],
        limit: usize,
    ) -> Result<(Vec<ScoredNode>, Vec<RelatedEdge>)> {
        let mut seen: HashSet<String> = node_ids.iter().cloned().collect();
        let mut expanded = Vec::new();
        let mut relationships = Vec::new();

        for id in node_ids {
            if expanded.len() >= limit {
                break;
            }
            let rows = self
                .graph
                .query(
                    "MATCH (n {id: $id, session_id: $session_id})-[r]-(m) \
                     WHERE m.session_id = $session_id \
                     RETURN DISTINCT m.id AS id, labels(m) AS labels, type(r) AS rel_type, \
                            coalesce(m.name, m.term, m.case_name, m.content, '') AS display, \
                            coalesce(m.language, '') AS language",
                    &Attrs::from([
                        ("id".to_string(), crate::graph_store::AttrValue::from(id.as_str())),
                        (
                            "session_id".to_string(),
                            crate::graph_store::AttrValue::from(session_id),
                        ),
                    ]),
                )
                .await?;

            for row in &rows {
                let neighbour_id: String = match row.get("id") {
                    Some(v) => v,
                    None => continue,
                };
                let labels: Vec<String> = row.get("labels").unwrap_or_default();
                let label = labels.into_iter().next().unwrap_or_else(|| "Unknown".to_string());
                let display: String = row.get("display").unwrap_or_default();
                let language: String = row.get("language").unwrap_or_default();
                let rel_type: String = row.get("rel_type").unwrap_or_default();

                if relationships.len() < limit {
                    relationships.push(RelatedEdge {
                        from_id: id.clone(),
                        relationship_type: rel_type,
                        to_id: neighbour_id.clone(),
                        to_display: display.clone(),
                    });
                }

                if expanded.len() >= limit || !seen.insert(neighbour_id.clone()) {
                    continue;
                }

                expanded.push(ScoredNode {
                    id: neighbour_id,
                    label,
                    display,
                    description: None,
                    language,
                    score: 4,
                });
            }
        }

        Ok((expanded, relationships))
    }
}

/// Tokenises on word boundaries and drops stop words for both languages. If
/// nothing survives, the original query is retained as a single term (spec
/// §4.6 step 2).
pub fn meaningful_terms(query_text: &str) -> Vec<String> {
    let terms: Vec<String> = query_text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .filter(|t| {
            let lower = t.to_lowercase();
            !EN_STOPWORDS.contains(&lower.as_str()) && !AR_STOPWORDS.contains(&t.as_str())
        })
        .collect();

    if terms.is_empty() {
        vec![query_text.trim().to_string()]
    } else {
        terms
    }
}

/// Detects content-of-file-style general queries via a fixed phrase list in
/// both languages (spec §4.6 step 3).
pub fn is_general_content_query(query_text: &str) -> bool {
    let lower = query_text.to_lowercase();
    GENERAL_QUERY_PHRASES
        .iter()
        .any(|phrase| lower.contains(&phrase.to_lowercase()))
}
