//! Domain model shared by the relational store and the graph store (spec §3).
//!
//! Every entity below carries `session_id` and, where applicable,
//! `language`, per invariant I1 (scope closure). These are plain data
//! carriers; `relational_store` and `graph_store` own persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `ar`, `en`, or `mixed` — the output of the LanguageTagger (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Ar,
    En,
    Mixed,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Ar => "ar",
            Language::En => "en",
            Language::Mixed => "mixed",
        }
    }

    /// I4: merging two chunks' languages; identical languages pass through,
    /// anything else becomes `mixed`.
    pub fn merge(self, other: Language) -> Language {
        if self == other {
            self
        } else {
            Language::Mixed
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ar" => Ok(Language::Ar),
            "en" => Ok(Language::En),
            "mixed" => Ok(Language::Mixed),
            other => Err(anyhow::anyhow!("unknown language tag: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Upload {
    pub id: String,
    pub session_id: String,
    pub file_name: String,
    pub byte_size: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(anyhow::anyhow!("unknown message role: {other}")),
        }
    }
}

/// I5: append-only within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub content: String,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
}

/// A window of extracted PDF text, language-tagged at ingest (I4) and never
/// rewritten thereafter (I5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub session_id: String,
    pub source_file: String,
    pub page: i64,
    pub offset: i64,
    pub content: String,
    pub language: Language,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub session_id: String,
    pub name: String,
    pub entity_type: String,
    pub description: Option<String>,
    pub language: Language,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub fact_type: String,
    pub confidence: f64,
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegalConcept {
    pub id: String,
    pub session_id: String,
    pub term: String,
    pub definition: String,
    pub category: String,
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub session_id: String,
    pub case_number: String,
    pub case_name: String,
    pub court: Option<String>,
    pub jurisdiction: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub session_id: String,
    pub title: String,
    pub document_type: String,
    pub file_size: i64,
    pub upload_date: DateTime<Utc>,
}

/// Typed directed relationship labels from spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipType {
    About,
    Contains,
    Mentions,
    RelatedTo,
    AppliesTo,
    Involves,
}

impl RelationshipType {
    pub fn as_cypher_label(&self) -> &'static str {
        match self {
            RelationshipType::About => "ABOUT",
            RelationshipType::Contains => "CONTAINS",
            RelationshipType::Mentions => "MENTIONS",
            RelationshipType::RelatedTo => "RELATED_TO",
            RelationshipType::AppliesTo => "APPLIES_TO",
            RelationshipType::Involves => "INVOLVES",
        }
    }

    /// Parses a model-supplied relation type string against spec §3's fixed
    /// label set; extraction output that names anything else is dropped
    /// rather than interpolated into Cypher.
    pub fn from_cypher_label(label: &str) -> Option<Self> {
        match label {
            "ABOUT" => Some(RelationshipType::About),
            "CONTAINS" => Some(RelationshipType::Contains),
            "MENTIONS" => Some(RelationshipType::Mentions),
            "RELATED_TO" => Some(RelationshipType::RelatedTo),
            "APPLIES_TO" => Some(RelationshipType::AppliesTo),
            "INVOLVES" => Some(RelationshipType::Involves),
            _ => None,
        }
    }
}

/// Node labels spec §3 defines. A relation whose `src_label`/`dst_label`
/// names anything else is a model hallucination, not a graph edge.
pub const NODE_LABELS: &[&str] = &["Document", "Chunk", "Entity", "Fact", "LegalConcept", "Case"];

pub fn is_known_node_label(label: &str) -> bool {
    NODE_LABELS.contains(&label)
}

/// Normalises a natural key per I3: NFKC + casefold + whitespace collapse.
pub fn normalise(name: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    let nfkc: String = name.nfkc().collect();
    let folded = nfkc.to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_same_language_is_identity() {
        assert_eq!(Language::En.merge(Language::En), Language::En);
        assert_eq!(Language::Ar.merge(Language::Ar), Language::Ar);
    }

    #[test]
    fn merge_different_languages_is_mixed() {
        assert_eq!(Language::En.merge(Language::Ar), Language::Mixed);
        assert_eq!(Language::Mixed.merge(Language::En), Language::Mixed);
    }

    #[test]
    fn normalise_collapses_whitespace_and_case() {
        assert_eq!(normalise("  Acme   Corp "), "acme corp");
        assert_eq!(normalise("ACME CORP"), normalise("acme corp"));
    }

    #[test]
    fn relationship_type_label_round_trips() {
        for rel in [
            RelationshipType::About,
            RelationshipType::Contains,
            RelationshipType::Mentions,
            RelationshipType::RelatedTo,
            RelationshipType::AppliesTo,
            RelationshipType::Involves,
        ] {
            assert_eq!(
                RelationshipType::from_cypher_label(rel.as_cypher_label()),
                Some(rel)
            );
        }
        assert_eq!(RelationshipType::from_cypher_label("MADE_UP"), None);
    }

    #[test]
    fn known_node_labels_reject_hallucinated_labels() {
        assert!(is_known_node_label("Entity"));
        assert!(!is_known_node_label("Chunk_Summary"));
    }
}
