mod answerer;
mod api;
mod app_state;
mod chunker;
mod config;
mod embedding;
mod error;
#[cfg(test)]
mod fakes;
mod generative_model;
mod graph_store;
mod ingestor;
mod language;
mod models;
mod rate_limiter;
mod relational_store;
mod retriever;

use std::sync::Arc;

use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::answerer::Answerer;
use crate::app_state::AppState;
use crate::generative_model::RigGenerativeModel;
use crate::graph_store::{GraphStore as _, Neo4jGraphStore};
use crate::ingestor::Ingestor;
use crate::rate_limiter::ExtractRateLimiter;
use crate::relational_store::RelationalStore;
use crate::retriever::Retriever;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = config::AppConfig::from_env().expect("failed to load configuration");

    let relational = Arc::new(
        RelationalStore::connect(&cfg.database_url)
            .await
            .expect("failed to connect to relational store"),
    );

    let graph: Arc<dyn GraphStore> = Arc::new(
        Neo4jGraphStore::connect(&cfg)
            .await
            .expect("failed to connect to graph store"),
    );

    let embedding = Arc::from(embedding::init_embedding_provider(&cfg).await);

    graph
        .ensure_indices(embedding.dimension())
        .await
        .expect("failed to ensure graph store indices");

    let generative: Arc<dyn generative_model::GenerativeModel> =
        Arc::new(RigGenerativeModel::new(cfg.chat_model.clone()));

    let rate_limiter = Arc::new(ExtractRateLimiter::new(cfg.gen_extract_min_interval));

    let ingestor = Arc::new(Ingestor::new(
        relational.clone(),
        graph.clone(),
        embedding.clone(),
        generative.clone(),
        rate_limiter,
        cfg.max_upload_bytes,
    ));

    let retriever = Arc::new(Retriever::new(graph.clone(), embedding.clone()));
    let answerer = Arc::new(Answerer::new(
        relational.clone(),
        retriever,
        generative.clone(),
        cfg.history_token_budget,
    ));

    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let app_state = AppState::new(
        cfg.clone(),
        relational,
        graph,
        embedding,
        generative,
        ingestor,
        answerer,
        shutdown_tx,
    );

    let app = Router::new().nest("/", api::create_router(app_state.clone())).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    let server_addr = app_state.config.server_addr.clone();
    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .expect("failed to bind server address");
    info!("listening on {server_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("shutdown signal received");
        })
        .await
        .expect("server error");

    info!("server shut down cleanly");
}
