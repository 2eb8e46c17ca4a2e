//! Application configuration, loaded from the environment (spec §6).

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Full configuration for the service.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,

    pub graph_uri: String,
    pub graph_user: String,
    pub graph_password: String,
    pub graph_database: String,

    pub server_addr: String,

    pub gen_model_key: String,
    pub gen_extract_min_interval: Duration,
    pub chat_model: String,

    pub embed_model_priority: Vec<String>,

    pub max_upload_bytes: u64,
    pub max_message_chars: usize,
    pub history_token_budget: i64,
}

impl AppConfig {
    /// Loads configuration from environment variables (using `.env` if
    /// present), the same pattern as the teacher's `config::AppConfig`.
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").context("Missing DATABASE_URL in the environment")?;
        let graph_uri = env::var("GRAPH_URI").context("Missing GRAPH_URI in the environment")?;
        let graph_user =
            env::var("GRAPH_USER").context("Missing GRAPH_USER in the environment")?;
        let graph_password =
            env::var("GRAPH_PASSWORD").context("Missing GRAPH_PASSWORD in the environment")?;
        let graph_database = env::var("GRAPH_DATABASE").unwrap_or_else(|_| "neo4j".to_string());

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());

        let gen_model_key =
            env::var("GEN_MODEL_KEY").context("Missing GEN_MODEL_KEY in the environment")?;
        let chat_model = env::var("GEN_CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let gen_extract_min_interval_ms: u64 = env::var("GEN_EXTRACT_MIN_INTERVAL_MS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| anyhow!("GEN_EXTRACT_MIN_INTERVAL_MS must be an integer"))?
            .unwrap_or(4000);

        let embed_model_priority: Vec<String> = env::var("EMBED_MODEL_PRIORITY")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let max_upload_bytes: u64 = env::var("MAX_UPLOAD_BYTES")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| anyhow!("MAX_UPLOAD_BYTES must be an integer"))?
            .unwrap_or(25 * 1024 * 1024);

        let max_message_chars: usize = env::var("MAX_MESSAGE_CHARS")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| anyhow!("MAX_MESSAGE_CHARS must be an integer"))?
            .unwrap_or(8000);

        let history_token_budget: i64 = env::var("HISTORY_TOKEN_BUDGET")
            .ok()
            .map(|v| v.parse())
            .transpose()
            .map_err(|_| anyhow!("HISTORY_TOKEN_BUDGET must be an integer"))?
            .unwrap_or(4000);

        Ok(Self {
            database_url,
            graph_uri,
            graph_user,
            graph_password,
            graph_database,
            server_addr,
            gen_model_key,
            gen_extract_min_interval: Duration::from_millis(gen_extract_min_interval_ms),
            chat_model,
            embed_model_priority,
            max_upload_bytes,
            max_message_chars,
            history_token_budget,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn set_required_env() {
        env::set_var("DATABASE_URL", "sqlite://test.db");
        env::set_var("GRAPH_URI", "neo4j://localhost:7687");
        env::set_var("GRAPH_USER", "neo4j");
        env::set_var("GRAPH_PASSWORD", "password");
        env::set_var("GEN_MODEL_KEY", "test-key");
    }

    #[test]
    fn defaults_apply_when_optional_vars_are_absent() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_env();
        env::remove_var("GEN_EXTRACT_MIN_INTERVAL_MS");
        env::remove_var("EMBED_MODEL_PRIORITY");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.gen_extract_min_interval, Duration::from_millis(4000));
        assert_eq!(cfg.embed_model_priority, vec!["text-embedding-3-small"]);
    }

    #[test]
    fn embed_model_priority_parses_comma_separated_list() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_env();
        env::set_var("EMBED_MODEL_PRIORITY", "model-a, model-b,model-c");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(
            cfg.embed_model_priority,
            vec!["model-a", "model-b", "model-c"]
        );
    }

    #[test]
    fn missing_required_var_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        set_required_env();
        env::remove_var("GRAPH_USER");
        assert!(AppConfig::from_env().is_err());
        env::set_var("GRAPH_USER", "neo4j");
    }
}
