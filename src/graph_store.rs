//! GraphStore (spec §4.4): a thin capability contract over Neo4j.
//!
//! Generalizes the teacher's `neo4j_client.rs` (connection + constraints)
//! and `vector_store.rs` (vector index) into the adapter named in spec
//! §4.4: idempotent `Upsert`/`Relate`, parameterised `Query`, a single
//! logical `DeleteWhere`, and idempotent `EnsureIndices`. All state-mutating
//! calls carry `session_id` explicitly; the adapter refuses writes lacking
//! it (spec §4.4).
//!
//! `GraphStore` is a trait, not the Neo4j adapter directly, the same way
//! `EmbeddingProvider` and `GenerativeModel` are boundaries — so
//! `Ingestor`/`Retriever` can be exercised in tests against an in-memory
//! fake (`crate::fakes::FakeGraphStore`) instead of a live database.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use neo4rs::{query, Graph, Query};
use tracing::info;
use url::Url;

use crate::config::AppConfig;

/// A dynamically-typed attribute value accepted by `Upsert`/`Relate`.
#[derive(Debug, Clone)]
pub enum AttrValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    FloatVec(Vec<f32>),
    StrList(Vec<String>),
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}
impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}
impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}
impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}
impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}
impl From<Vec<f32>> for AttrValue {
    fn from(v: Vec<f32>) -> Self {
        AttrValue::FloatVec(v)
    }
}
impl From<Vec<String>> for AttrValue {
    fn from(v: Vec<String>) -> Self {
        AttrValue::StrList(v)
    }
}

pub type Attrs = HashMap<String, AttrValue>;

/// Node labels carrying `session_id`/`language` per spec §3.
pub const SESSION_SCOPED_LABELS: &[&str] = &[
    "Document",
    "Chunk",
    "Entity",
    "Fact",
    "LegalConcept",
    "Case",
];

/// Edge types carrying `session_id`/`language` per spec §3.
pub const SESSION_SCOPED_RELATIONSHIPS: &[&str] = &[
    "ABOUT",
    "CONTAINS",
    "MENTIONS",
    "RELATED_TO",
    "APPLIES_TO",
    "INVOLVES",
];

/// A single typed field read back out of a `Query` row, backed by either a
/// live `neo4rs::Row` or an in-memory fake row — callers write
/// `row.get::<String>("id")` either way.
pub struct GraphRow(RowInner);

enum RowInner {
    Live(neo4rs::Row),
    Fake(Attrs),
}

impl GraphRow {
    pub fn from_live(row: neo4rs::Row) -> Self {
        GraphRow(RowInner::Live(row))
    }

    pub fn from_fake(attrs: Attrs) -> Self {
        GraphRow(RowInner::Fake(attrs))
    }

    pub fn get<T: RowValue>(&self, key: &str) -> Option<T> {
        match &self.0 {
            RowInner::Live(row) => T::from_live(row, key),
            RowInner::Fake(attrs) => T::from_fake(attrs, key),
        }
    }
}

/// The field types the Retriever/Ingestor actually read out of rows.
pub trait RowValue: Sized {
    fn from_live(row: &neo4rs::Row, key: &str) -> Option<Self>;
    fn from_fake(attrs: &Attrs, key: &str) -> Option<Self>;
}

impl RowValue for String {
    fn from_live(row: &neo4rs::Row, key: &str) -> Option<Self> {
        row.get::<String>(key)
    }
    fn from_fake(attrs: &Attrs, key: &str) -> Option<Self> {
        match attrs.get(key) {
            Some(AttrValue::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }
}

impl RowValue for i64 {
    fn from_live(row: &neo4rs::Row, key: &str) -> Option<Self> {
        row.get::<i64>(key)
    }
    fn from_fake(attrs: &Attrs, key: &str) -> Option<Self> {
        match attrs.get(key) {
            Some(AttrValue::Int(i)) => Some(*i),
            _ => None,
        }
    }
}

impl RowValue for Vec<String> {
    fn from_live(row: &neo4rs::Row, key: &str) -> Option<Self> {
        row.get::<Vec<String>>(key)
    }
    fn from_fake(attrs: &Attrs, key: &str) -> Option<Self> {
        match attrs.get(key) {
            Some(AttrValue::StrList(v)) => Some(v.clone()),
            _ => None,
        }
    }
}

impl RowValue for Vec<f64> {
    fn from_live(row: &neo4rs::Row, key: &str) -> Option<Self> {
        row.get::<Vec<f64>>(key)
    }
    fn from_fake(attrs: &Attrs, key: &str) -> Option<Self> {
        match attrs.get(key) {
            Some(AttrValue::FloatVec(v)) => Some(v.iter().map(|x| *x as f64).collect()),
            _ => None,
        }
    }
}

fn apply_params(mut q: Query, attrs: &Attrs) -> Query {
    for (key, value) in attrs {
        q = match value {
            AttrValue::Str(s) => q.param(key.as_str(), s.clone()),
            AttrValue::Int(i) => q.param(key.as_str(), *i),
            AttrValue::Float(f) => q.param(key.as_str(), *f),
            AttrValue::Bool(b) => q.param(key.as_str(), *b),
            AttrValue::FloatVec(v) => {
                let as_f64: Vec<f64> = v.iter().map(|x| *x as f64).collect();
                q.param(key.as_str(), as_f64)
            }
            AttrValue::StrList(v) => q.param(key.as_str(), v.clone()),
        };
    }
    q
}

fn set_clause(all_attrs: &Attrs, node_alias: &str) -> String {
    all_attrs
        .keys()
        .map(|k| format!("{node_alias}.{k} = ${k}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The capability contract spec §4.4 names. `Ingestor`/`Retriever` hold
/// `Arc<dyn GraphStore>` so a fake can stand in for tests.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Idempotent per `key_attrs`. Refuses writes lacking `session_id` in
    /// `all_attrs` (spec §4.4).
    async fn upsert(&self, label: &str, key_attrs: &Attrs, all_attrs: &Attrs) -> Result<()>;

    /// Idempotent per `(label, from, to)`.
    #[allow(clippy::too_many_arguments)]
    async fn relate(
        &self,
        rel_label: &str,
        from_label: &str,
        from_key: &Attrs,
        to_label: &str,
        to_key: &Attrs,
        attrs: &Attrs,
    ) -> Result<()>;

    /// Parameterised query; never interpolate user text into `cypher`.
    async fn query(&self, cypher: &str, params: &Attrs) -> Result<Vec<GraphRow>>;

    /// Removes every node and edge with the given `session_id` scope, as a
    /// single logical operation (spec §4.4, P6).
    async fn delete_where(&self, session_id: &str) -> Result<()>;

    /// Idempotent creation of indices/constraints for every node label and
    /// edge type of spec §3, plus the chunk vector index.
    async fn ensure_indices(&self, embedding_dim: usize) -> Result<()>;
}

/// The real adapter, generalizing the teacher's `neo4j_client.rs` +
/// `vector_store.rs` over the bolt driver.
pub struct Neo4jGraphStore {
    pub graph: Graph,
}

impl Neo4jGraphStore {
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    /// Connects using the same host/port derivation the teacher uses in
    /// `neo4j_client::connect_from_config`.
    pub async fn connect(cfg: &AppConfig) -> Result<Self> {
        let url = Url::parse(&cfg.graph_uri)?;
        let host = url.host_str().unwrap_or("localhost");
        let port = url.port().unwrap_or(7687);
        let addr = format!("{host}:{port}");

        info!("Connecting to graph store at {addr}...");
        let graph = Graph::new(&addr, &cfg.graph_user, &cfg.graph_password).await?;
        info!("Graph store connection OK");
        Ok(Self::new(graph))
    }

    async fn ensure_vector_index(&self, dim: usize) -> Result<()> {
        let index_name = "chunkEmbeddingIndex";
        let mut cursor = self
            .graph
            .execute(
                query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                    .param("name", index_name),
            )
            .await?;

        if cursor.next().await?.is_some() {
            info!("Vector index '{index_name}' already exists.");
            return Ok(());
        }

        let cypher = format!(
            "CREATE VECTOR INDEX {index_name} FOR (c:Chunk) ON (c.embedding) \
             OPTIONS {{ indexConfig: {{ `vector.dimensions`: {dim}, `vector.similarity_function`: 'cosine' }} }}"
        );
        self.graph.run(query(&cypher)).await?;
        info!("Vector index '{index_name}' created (dim={dim}).");
        Ok(())
    }
}

#[async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn upsert(&self, label: &str, key_attrs: &Attrs, all_attrs: &Attrs) -> Result<()> {
        if !all_attrs.contains_key("session_id") {
            return Err(anyhow!("refusing to write {label} without session_id"));
        }

        let key_clause = key_attrs
            .keys()
            .map(|k| format!("{k}: ${k}"))
            .collect::<Vec<_>>()
            .join(", ");
        let set_clause = set_clause(all_attrs, "n");

        let cypher = if set_clause.is_empty() {
            format!("MERGE (n:`{label}` {{ {key_clause} }})")
        } else {
            format!("MERGE (n:`{label}` {{ {key_clause} }}) SET {set_clause}")
        };

        let mut q = query(&cypher);
        q = apply_params(q, key_attrs);
        q = apply_params(q, all_attrs);
        self.graph.run(q).await?;
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
            return Err(anyhow!(
                "refusing to relate {rel_label} without session_id"
            ));
        }

        let from_clause = from_key
            .keys()
            .map(|k| format!("from_{k}: $from_{k}"))
            .collect::<Vec<_>>()
            .join(", ");
        let to_clause = to_key
            .keys()
            .map(|k| format!("to_{k}: $to_{k}"))
            .collect::<Vec<_>>()
            .join(", ");
        let set_clause = set_clause(attrs, "r");

        let cypher = if set_clause.is_empty() {
            format!(
                "MATCH (a:`{from_label}` {{ {from_clause} }}), (b:`{to_label}` {{ {to_clause} }}) \
                 MERGE (a)-[r:`{rel_label}`]->(b)"
            )
        } else {
            format!(
                "MATCH (a:`{from_label}` {{ {from_clause} }}), (b:`{to_label}` {{ {to_clause} }}) \
                 MERGE (a)-[r:`{rel_label}`]->(b) SET {set_clause}"
            )
        };

        let mut q = query(&cypher);
        for (k, v) in from_key {
            q = apply_params(q, &Attrs::from([(format!("from_{k}"), v.clone())]));
        }
        for (k, v) in to_key {
            q = apply_params(q, &Attrs::from([(format!("to_{k}"), v.clone())]));
        }
        q = apply_params(q, attrs);
        self.graph.run(q).await?;
        Ok(())
    }

    async fn query(&self, cypher: &str, params: &Attrs) -> Result<Vec<GraphRow>> {
        let mut q = query(cypher);
        q = apply_params(q, params);
        let mut cursor = self.graph.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = cursor.next().await? {
            rows.push(GraphRow::from_live(row));
        }
        Ok(rows)
    }

    async fn delete_where(&self, session_id: &str) -> Result<()> {
        let tx = self.graph.start_txn().await?;
        tx.run(
            query(
                "MATCH (n) WHERE n.session_id = $session_id \
                 DETACH DELETE n",
            )
            .param("session_id", session_id.to_string()),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn ensure_indices(&self, embedding_dim: usize) -> Result<()> {
        let constraints = [
            "CREATE CONSTRAINT document_id IF NOT EXISTS FOR (d:Document) REQUIRE d.id IS UNIQUE",
            "CREATE CONSTRAINT chunk_id IF NOT EXISTS FOR (c:Chunk) REQUIRE c.id IS UNIQUE",
            "CREATE CONSTRAINT entity_id IF NOT EXISTS FOR (e:Entity) REQUIRE e.id IS UNIQUE",
            "CREATE CONSTRAINT fact_id IF NOT EXISTS FOR (f:Fact) REQUIRE f.id IS UNIQUE",
            "CREATE CONSTRAINT concept_id IF NOT EXISTS FOR (l:LegalConcept) REQUIRE l.id IS UNIQUE",
            "CREATE CONSTRAINT case_id IF NOT EXISTS FOR (c:Case) REQUIRE c.id IS UNIQUE",
        ];
        for stmt in constraints {
            self.graph.run(query(stmt)).await?;
        }

        for label in SESSION_SCOPED_LABELS {
            let idx = format!(
                "CREATE INDEX {label}_session_id IF NOT EXISTS FOR (n:{label}) ON (n.session_id)"
            );
            self.graph.run(query(&idx)).await?;
            let lang_idx = format!(
                "CREATE INDEX {label}_language IF NOT EXISTS FOR (n:{label}) ON (n.language)"
            );
            self.graph.run(query(&lang_idx)).await?;
        }

        for rel in SESSION_SCOPED_RELATIONSHIPS {
            let idx =
                format!("CREATE INDEX rel_{rel}_session_id IF NOT EXISTS FOR ()-[r:{rel}]-() ON (r.session_id)");
            self.graph.run(query(&idx)).await?;
        }

        self.graph
            .run(query(
                "CREATE INDEX entity_type IF NOT EXISTS FOR (e:Entity) ON (e.entity_type)",
            ))
            .await?;

        self.graph
            .run(query(
                "CREATE FULLTEXT INDEX chunk_text_fulltext IF NOT EXISTS FOR (c:Chunk) ON EACH [c.content]",
            ))
            .await?;

        self.ensure_vector_index(embedding_dim).await?;

        info!("Graph store indices ensured.");
        Ok(())
    }
}
