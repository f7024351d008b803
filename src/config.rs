//! Carga y gestión de configuración de la aplicación (Neo4j + LLM + GitHub).

use std::env;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }

    fn default_chat_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Gemini => "gemini-1.5-flash",
        }
    }

    fn default_embedding_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "text-embedding-3-small",
            Self::Gemini => "embedding-001",
        }
    }

    fn default_embedding_dimensions(&self) -> usize {
        match self {
            Self::OpenAI => 1536,
            Self::Gemini => 768,
        }
    }
}

/// Parámetros del troceado y de la recuperación.
#[derive(Clone, Debug)]
pub struct RetrievalConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub search_top_k: usize,
    pub summary_top_k: usize,
    /// Máximo de textos por petición de embeddings.
    pub embedding_batch_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            search_top_k: 5,
            summary_top_k: 20,
            embedding_batch_size: 100,
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub server_addr: String,
    pub open_browser: bool,

    pub llm_provider: LlmProvider,
    pub llm_embedding_model: String,
    pub llm_chat_model: String,
    pub embedding_dimensions: usize,

    pub github_api_url: String,
    pub github_token: Option<String>,
    pub repo_owner: Option<String>,
    pub repo_name: Option<String>,

    pub retrieval: RetrievalConfig,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        let neo4j_uri = env::var("NEO4J_URI")
            .map_err(|_| anyhow!("Falta NEO4J_URI en el entorno"))?;
        let neo4j_user = env::var("NEO4J_USER")
            .map_err(|_| anyhow!("Falta NEO4J_USER en el entorno"))?;
        let neo4j_password = env::var("NEO4J_PASSWORD")
            .map_err(|_| anyhow!("Falta NEO4J_PASSWORD en el entorno"))?;

        let server_addr =
            env::var("SERVER_ADDR").unwrap_or_else(|_| "127.0.0.1:3322".to_string());
        let open_browser = parse_var("OPEN_BROWSER", true)?;

        let llm_provider_str =
            env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;

        let llm_embedding_model = env::var("LLM_EMBEDDING_MODEL")
            .unwrap_or_else(|_| llm_provider.default_embedding_model().to_string());
        let llm_chat_model = env::var("LLM_CHAT_MODEL")
            .unwrap_or_else(|_| llm_provider.default_chat_model().to_string());
        let embedding_dimensions = parse_var(
            "EMBEDDING_DIMENSIONS",
            llm_provider.default_embedding_dimensions(),
        )?;

        let github_api_url = env::var("GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string());

        let defaults = RetrievalConfig::default();
        let retrieval = RetrievalConfig {
            chunk_size: parse_var("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_var("CHUNK_OVERLAP", defaults.chunk_overlap)?,
            search_top_k: parse_var("SEARCH_TOP_K", defaults.search_top_k)?,
            summary_top_k: parse_var("SUMMARY_TOP_K", defaults.summary_top_k)?,
            embedding_batch_size: parse_var("EMBEDDING_BATCH_SIZE", defaults.embedding_batch_size)?,
        };
        if retrieval.embedding_batch_size == 0 {
            bail!("EMBEDDING_BATCH_SIZE debe ser mayor que 0");
        }
        if retrieval.chunk_overlap >= retrieval.chunk_size {
            bail!(
                "CHUNK_OVERLAP ({}) debe ser menor que CHUNK_SIZE ({})",
                retrieval.chunk_overlap,
                retrieval.chunk_size
            );
        }

        Ok(Self {
            neo4j_uri,
            neo4j_user,
            neo4j_password,
            server_addr,
            open_browser,
            llm_provider,
            llm_embedding_model,
            llm_chat_model,
            embedding_dimensions,
            github_api_url,
            github_token: optional_var("GITHUB_TOKEN"),
            repo_owner: optional_var("REPO_OWNER"),
            repo_name: optional_var("REPO_NAME"),
            retrieval,
        })
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Valor inválido para {key}: '{raw}'")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_names_are_case_insensitive() {
        assert_eq!(LlmProvider::from_str("OpenAI").unwrap(), LlmProvider::OpenAI);
        assert_eq!(LlmProvider::from_str("gemini").unwrap(), LlmProvider::Gemini);
        assert!(LlmProvider::from_str("ollama").is_err());
    }

    #[test]
    fn retrieval_defaults_match_indexing_contract() {
        let cfg = RetrievalConfig::default();
        assert_eq!((cfg.chunk_size, cfg.chunk_overlap), (1000, 100));
        assert_eq!((cfg.search_top_k, cfg.summary_top_k), (5, 20));
        assert_eq!(cfg.embedding_batch_size, 100);
    }
}
