//! Shared application state, generalizing the teacher's `AppState`
//! (`src/app_state.rs`) from a single-graph/single-LLM struct into the full
//! set of session-scoped collaborators spec §4/§5 wires together, plus the
//! per-session answer-serialization locks §5 requires.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{oneshot, Mutex as AsyncMutex};

use crate::answerer::Answerer;
use crate::config::AppConfig;
use crate::embedding::EmbeddingProvider;
use crate::generative_model::GenerativeModel;
use crate::graph_store::GraphStore;
use crate::ingestor::Ingestor;
use crate::relational_store::RelationalStore;

/// Checked between chunks in `Ingestor` and at each retrieval step in
/// `Answerer` so `Delete(session)` can abort in-flight work (spec §5's
/// delete barrier, P6).
pub type CancellationToken = Arc<AtomicBool>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub relational: Arc<RelationalStore>,
    pub graph: Arc<dyn GraphStore>,
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub generative: Arc<dyn GenerativeModel>,
    pub ingestor: Arc<Ingestor>,
    pub answerer: Arc<Answerer>,
    session_locks: Arc<StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    cancellation_flags: Arc<StdMutex<HashMap<String, CancellationToken>>>,
    pub shutdown_sender: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AppConfig,
        relational: Arc<RelationalStore>,
        graph: Arc<dyn GraphStore>,
        embedding: Arc<dyn EmbeddingProvider>,
        generative: Arc<dyn GenerativeModel>,
        ingestor: Arc<Ingestor>,
        answerer: Arc<Answerer>,
        shutdown_sender: oneshot::Sender<()>,
    ) -> Self {
        Self {
            config,
            relational,
            graph,
            embedding,
            generative,
            ingestor,
            answerer,
            session_locks: Arc::new(StdMutex::new(HashMap::new())),
            cancellation_flags: Arc::new(StdMutex::new(HashMap::new())),
            shutdown_sender: Arc::new(StdMutex::new(Some(shutdown_sender))),
        }
    }

    /// Per-session serialization lock for `Answer` calls (spec §5: "one
    /// answer at a time per session").
    pub fn session_lock(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.session_locks.lock().unwrap();
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Gets or creates the cancellation flag for a session, shared by every
    /// in-flight `Ingest`/`Answer` call for that session id.
    pub fn cancellation_token(&self, session_id: &str) -> CancellationToken {
        let mut flags = self.cancellation_flags.lock().unwrap();
        flags
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    /// Trips the session's cancellation flag so any operation already
    /// holding a clone of the token observes it on its next check (spec §5:
    /// "any in-flight operation for that session must abort with
    /// `SessionGone`").
    pub fn cancel_session(&self, session_id: &str) {
        if let Some(flag) = self.cancellation_flags.lock().unwrap().get(session_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Drops the session's lock and cancellation entries; called after
    /// `Delete(session)` so the maps don't grow unbounded across the
    /// service's lifetime.
    pub fn forget_session_lock(&self, session_id: &str) {
        self.session_locks.lock().unwrap().remove(session_id);
        self.cancellation_flags.lock().unwrap().remove(session_id);
    }
}
