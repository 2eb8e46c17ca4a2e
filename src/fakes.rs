//! In-memory test doubles for `GraphStore` and `GenerativeModel`, grounded
//! on the pack's preference for in-memory fakes over live external services
//! in tests (e.g. `perstarkse-minne`'s `SurrealDbClient::memory` helper).
//! Compiled only under `#[cfg(test)]`; exercised from `ingestor`,
//! `retriever`, and `answerer`'s test modules.

use std::collections::VecDeque;
use std::sync::Mutex as StdMutex;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::generative_model::{ExtractionResult, GenerativeModel};
use crate::graph_store::{AttrValue, Attrs, GraphRow, GraphStore};
use crate::models::Language;

fn attr_matches(a: &AttrValue, b: &AttrValue) -> bool {
    match (a, b) {
        (AttrValue::Str(x), AttrValue::Str(y)) => x == y,
        (AttrValue::Int(x), AttrValue::Int(y)) => x == y,
        (AttrValue::Bool(x), AttrValue::Bool(y)) => x == y,
        (AttrValue::Float(x), AttrValue::Float(y)) => (x - y).abs() < f64::EPSILON,
        (AttrValue::StrList(x), AttrValue::StrList(y)) => x == y,
        (AttrValue::FloatVec(x), AttrValue::FloatVec(y)) => x == y,
        _ => false,
    }
}

fn attr_str(attrs: &Attrs, key: &str) -> Option<String> {
    match attrs.get(key) {
        Some(AttrValue::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

fn coalesce_str(attrs: &Attrs, keys: &[&str]) -> String {
    for key in keys {
        if let Some(v) = attr_str(attrs, key) {
            if !v.is_empty() {
                return v;
            }
        }
    }
    String::new()
}

struct FakeNode {
    label: String,
    attrs: Attrs,
}

struct FakeEdge {
    rel_label: String,
    from_id: String,
    to_id: String,
    attrs: Attrs,
}

/// An in-memory stand-in for `Neo4jGraphStore`. Recognises the fixed set of
/// Cypher shapes `Retriever` issues rather than interpreting arbitrary
/// Cypher — the service never hands caller-supplied Cypher to `query()`, so
/// the shapes it needs to recognise are fixed and small.
#[derive(Default)]
pub struct FakeGraphStore {
    nodes: StdMutex<Vec<FakeNode>>,
    edges: StdMutex<Vec<FakeEdge>>,
}

impl FakeGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_node(&self, label: &str, key: &Attrs) -> Option<Attrs> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .iter()
            .find(|n| {
                n.label == label
                    && key
                        .iter()
                        .all(|(k, v)| n.attrs.get(k).is_some_and(|nv| attr_matches(nv, v)))
            })
            .map(|n| n.attrs.clone())
    }

    pub fn node_count(&self, label: &str) -> usize {
        self.nodes.lock().unwrap().iter().filter(|n| n.label == label).count()
    }

    pub fn edge_count(&self, rel_label: &str) -> usize {
        self.edges.lock().unwrap().iter().filter(|e| e.rel_label == rel_label).count()
    }
}

#[async_trait]
impl GraphStore for FakeGraphStore {
    async fn upsert(&self, label: &str, key_attrs: &Attrs, all_attrs: &Attrs) -> Result<()> {
        if !all_attrs.contains_key("session_id") {
            return Err(anyhow::anyhow!("refusing to write {label} without session_id"));
        }

        let mut nodes = self.nodes.lock().unwrap();
        if let Some(existing) = nodes.iter_mut().find(|n| {
            n.label == label
                && key_attrs
                    .iter()
                    .all(|(k, v)| n.attrs.get(k).is_some_and(|nv| attr_matches(nv, v)))
        }) {
            for (k, v) in all_attrs {
                existing.attrs.insert(k.clone(), v.clone());
            }
        } else {
            nodes.push(FakeNode {
                label: label.to_string(),
                attrs: all_attrs.clone(),
            });
        }
        Ok(())
    }

    async fn relate(
        &self,
        rel_label: &str,
        from_label: &str,
        from_key: &Attrs,
        to_label: &str,
        to_key: &Attrs,
        attrs: &Attrs,
    ) -> Result<()> {
        if !attrs.contains_key("session_id") {
            return Err(anyhow::anyhow!("refusing to relate {rel_label} without session_id"));
        }

        let (Some(from_node), Some(to_node)) =
            (self.find_node(from_label, from_key), self.find_node(to_label, to_key))
        else {
            // Mirrors a real MATCH that resolves zero rows: MERGE on an
            // empty match touches nothing.
            return Ok(());
        };

        let from_id = attr_str(&from_node, "id").unwrap_or_default();
        let to_id = attr_str(&to_node, "id").unwrap_or_default();

        let mut edges = self.edges.lock().unwrap();
        if let Some(existing) = edges
            .iter_mut()
            .find(|e| e.rel_label == rel_label && e.from_id == from_id && e.to_id == to_id)
        {
            for (k, v) in attrs {
                existing.attrs.insert(k.clone(), v.clone());
            }
        } else {
            edges.push(FakeEdge {
                rel_label: rel_label.to_string(),
                from_id,
                to_id,
                attrs: attrs.clone(),
            });
        }
        Ok(())
    }

    async fn query(&self, cypher: &str, params: &Attrs) -> Result<Vec<GraphRow>> {
        let session_id = attr_str(params, "session_id").unwrap_or_default();

        if cypher.contains("MATCH (c:Chunk)") {
            let nodes = self.nodes.lock().unwrap();
            let mut matches: Vec<&Attrs> = nodes
                .iter()
                .filter(|n| n.label == "Chunk" && attr_str(&n.attrs, "session_id").as_deref() == Some(session_id.as_str()))
                .map(|n| &n.attrs)
                .collect();
            matches.sort_by_key(|a| attr_str(a, "id").unwrap_or_default());

            return Ok(matches
                .into_iter()
                .map(|attrs| {
                    GraphRow::from_fake(Attrs::from([
                        ("id".to_string(), attrs.get("id").cloned().unwrap_or(AttrValue::from(""))),
                        ("content".to_string(), attrs.get("content").cloned().unwrap_or(AttrValue::from(""))),
                        ("source_file".to_string(), attrs.get("source_file").cloned().unwrap_or(AttrValue::from(""))),
                        ("page".to_string(), attrs.get("page").cloned().unwrap_or(AttrValue::from(0i64))),
                        ("language".to_string(), attrs.get("language").cloned().unwrap_or(AttrValue::from(""))),
                        ("embedding".to_string(), attrs.get("embedding").cloned().unwrap_or(AttrValue::from(Vec::<f32>::new()))),
                    ]))
                })
                .collect());
        }

        if cypher.contains("n:Entity OR n:Fact OR n:LegalConcept OR n:Case") {
            let nodes = self.nodes.lock().unwrap();
            return Ok(nodes
                .iter()
                .filter(|n| {
                    matches!(n.label.as_str(), "Entity" | "Fact" | "LegalConcept" | "Case")
                        && attr_str(&n.attrs, "session_id").as_deref() == Some(session_id.as_str())
                })
                .map(|n| {
                    GraphRow::from_fake(Attrs::from([
                        ("id".to_string(), n.attrs.get("id").cloned().unwrap_or(AttrValue::from(""))),
                        ("labels".to_string(), AttrValue::from(vec![n.label.clone()])),
                        ("name_field".to_string(), AttrValue::from(coalesce_str(&n.attrs, &["name", "term", "case_name"]))),
                        ("description_field".to_string(), AttrValue::from(coalesce_str(&n.attrs, &["description", "definition"]))),
                        ("content_field".to_string(), AttrValue::from(coalesce_str(&n.attrs, &["content"]))),
                        ("language".to_string(), AttrValue::from(coalesce_str(&n.attrs, &["language"]))),
                        ("created_at".to_string(), AttrValue::from(coalesce_str(&n.attrs, &["created_at"]))),
                    ]))
                })
                .collect());
        }

        if cypher.contains("-[r]-(m)") {
            let id = attr_str(params, "id").unwrap_or_default();
            let nodes = self.nodes.lock().unwrap();
            let edges = self.edges.lock().unwrap();

            let mut rows = Vec::new();
            for edge in edges.iter() {
                let neighbour_id = if edge.from_id == id {
                    Some(edge.to_id.clone())
                } else if edge.to_id == id {
                    Some(edge.from_id.clone())
                } else {
                    None
                };
                let Some(neighbour_id) = neighbour_id else { continue };

                let Some(neighbour) = nodes.iter().find(|n| attr_str(&n.attrs, "id").as_deref() == Some(neighbour_id.as_str())) else {
                    continue;
                };
                if attr_str(&neighbour.attrs, "session_id").as_deref() != Some(session_id.as_str()) {
                    continue;
                }

                rows.push(GraphRow::from_fake(Attrs::from([
                    ("id".to_string(), AttrValue::from(neighbour_id.as_str())),
                    ("labels".to_string(), AttrValue::from(vec![neighbour.label.clone()])),
                    ("rel_type".to_string(), AttrValue::from(edge.rel_label.as_str())),
                    (
                        "display".to_string(),
                        AttrValue::from(coalesce_str(&neighbour.attrs, &["name", "term", "case_name", "content"])),
                    ),
                    ("language".to_string(), AttrValue::from(coalesce_str(&neighbour.attrs, &["language"]))),
                ])));
            }
            return Ok(rows);
        }

        Ok(Vec::new())
    }

    async fn delete_where(&self, session_id: &str) -> Result<()> {
        let mut deleted_ids = Vec::new();
        self.nodes.lock().unwrap().retain(|n| {
            let keep = attr_str(&n.attrs, "session_id").as_deref() != Some(session_id);
            if !keep {
                if let Some(id) = attr_str(&n.attrs, "id") {
                    deleted_ids.push(id);
                }
            }
            keep
        });
        self.edges
            .lock()
            .unwrap()
            .retain(|e| !deleted_ids.contains(&e.from_id) && !deleted_ids.contains(&e.to_id));
        Ok(())
    }

    async fn ensure_indices(&self, _embedding_dim: usize) -> Result<()> {
        Ok(())
    }
}

/// A scripted `GenerativeModel`: returns one queued `ExtractionResult` per
/// `extract()` call (FIFO) and a fixed canned answer.
pub struct FakeGenerativeModel {
    extractions: StdMutex<VecDeque<ExtractionResult>>,
    canned_answer: String,
}

impl FakeGenerativeModel {
    pub fn new(extractions: Vec<ExtractionResult>, canned_answer: impl Into<String>) -> Self {
        Self {
            extractions: StdMutex::new(extractions.into()),
            canned_answer: canned_answer.into(),
        }
    }
}

#[async_trait]
impl GenerativeModel for FakeGenerativeModel {
    async fn extract(&self, _text: &str, _language: Language) -> Result<ExtractionResult> {
        Ok(self.extractions.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn answer(
        &self,
        _system_preamble: &str,
        _context: &str,
        _question: &str,
    ) -> Result<BoxStream<'static, Result<String>>> {
        let text = self.canned_answer.clone();
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    fn answer_system_preamble(&self, _language: Language) -> &'static str {
        "fake preamble"
    }
}
