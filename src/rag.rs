//! Recuperación de contenido por similitud vectorial sobre los `:Chunk`.
//!
//! Dos herramientas: búsqueda con la pregunta literal (`k` = 5 por defecto)
//! y "resumen", que es la misma búsqueda con una consulta amplia fija y un
//! `k` mayor para cubrir más ficheros.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    config::RetrievalConfig,
    error::{QueryError, QueryResult},
    llm::Embedder,
    models::ScoredChunk,
    store::RepoStore,
};

/// Consulta fija para reunir una muestra representativa del repositorio.
pub const SUMMARY_QUERY: &str = "overview of the repository content and structure";

pub const NO_CHUNKS_FOUND: &str = "No relevant document chunks found.";
pub const NO_SUMMARY_CONTENT: &str = "Could not retrieve content for a general summary.";

const CHUNK_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentToolName {
    /// Specific question about code, documentation, concepts or details inside files.
    ContentSearch,
    /// General overview or gist of what the repository contains.
    SummarizeRepoContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContentSelection {
    /// The retrieval operation that best serves the question.
    pub tool: ContentToolName,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentTool {
    Search { query: String },
    Summarize,
}

impl ContentTool {
    /// La búsqueda usa siempre la pregunta original, sin reformular.
    pub fn from_selection(selection: &ContentSelection, question: &str) -> Self {
        match selection.tool {
            ContentToolName::ContentSearch => Self::Search {
                query: question.to_string(),
            },
            ContentToolName::SummarizeRepoContent => Self::Summarize,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Search { .. } => "content_search",
            Self::Summarize => "summarize_repo_content",
        }
    }

    /// Texto que ve el usuario cuando no hubo ningún chunk.
    pub fn not_found_message(&self) -> &'static str {
        match self {
            Self::Search { .. } => NO_CHUNKS_FOUND,
            Self::Summarize => NO_SUMMARY_CONTENT,
        }
    }

    pub fn describe_failure(&self, err: &QueryError) -> String {
        match self {
            Self::Search { .. } => format!("Error during content search: {err}"),
            Self::Summarize => format!("Error retrieving content for summary: {err}"),
        }
    }
}

/// `Source: <ruta>\nContent:\n<texto>` por chunk, separados por `---`.
pub fn format_chunks(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|c| format!("Source: {}\nContent:\n{}", c.source, c.text))
        .collect::<Vec<_>>()
        .join(CHUNK_SEPARATOR)
}

pub struct ContentRetriever<'a> {
    store: &'a dyn RepoStore,
    embedder: &'a dyn Embedder,
    config: &'a RetrievalConfig,
}

impl<'a> ContentRetriever<'a> {
    pub fn new(store: &'a dyn RepoStore, embedder: &'a dyn Embedder, config: &'a RetrievalConfig) -> Self {
        Self {
            store,
            embedder,
            config,
        }
    }

    pub async fn run(&self, tool: &ContentTool) -> QueryResult<Vec<ScoredChunk>> {
        info!("Tool: {} {:?}", tool.name(), tool);
        let result = match tool {
            ContentTool::Search { query } => self.search(query, self.config.search_top_k).await,
            ContentTool::Summarize => self.summarize().await,
        };
        match &result {
            Ok(chunks) => debug!("Tool {} encontró {} chunks", tool.name(), chunks.len()),
            Err(e) => warn!("Tool {} falló: {e}", tool.name()),
        }
        result
    }

    /// Los `k` chunks más parecidos a `query`.
    pub async fn search(&self, query: &str, k: usize) -> QueryResult<Vec<ScoredChunk>> {
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(QueryError::embedding)?;
        self.store
            .similarity_search(&vector, k)
            .await
            .map_err(QueryError::store)
    }

    pub async fn summarize(&self) -> QueryResult<Vec<ScoredChunk>> {
        self.search(SUMMARY_QUERY, self.config.summary_top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::HashEmbedder;
    use crate::models::{ChunkRecord, FileMetadata, IndexedFile};
    use crate::store::MemoryStore;

    async fn seeded(embedder: &HashEmbedder, docs: &[(&str, &str)]) -> MemoryStore {
        let store = MemoryStore::new();
        let mut files = Vec::new();
        for (path, text) in docs {
            let embedding = embedder.embed_query(text).await.unwrap();
            files.push(IndexedFile {
                metadata: FileMetadata::from_path(path),
                chunks: vec![ChunkRecord {
                    id: ChunkRecord::key(path, 0),
                    index: 0,
                    text: text.to_string(),
                    embedding,
                }],
            });
        }
        store.upsert_files(&files).await.unwrap();
        store
    }

    #[tokio::test]
    async fn search_returns_formatted_best_match() {
        let embedder = HashEmbedder::default();
        let store = seeded(
            &embedder,
            &[
                ("src/auth.rs", "authentication module validates user tokens"),
                ("docs/cooking.md", "recipes for pasta and bread"),
            ],
        )
        .await;
        let config = RetrievalConfig::default();
        let retriever = ContentRetriever::new(&store, &embedder, &config);

        let hits = retriever.search("authentication tokens", 1).await.unwrap();
        assert_eq!(
            format_chunks(&hits),
            "Source: src/auth.rs\nContent:\nauthentication module validates user tokens"
        );
    }

    #[tokio::test]
    async fn summarize_widens_k() {
        let embedder = HashEmbedder::default();
        let docs: Vec<(String, String)> = (0..30)
            .map(|i| (format!("f{i}.md"), format!("document number {i}")))
            .collect();
        let refs: Vec<(&str, &str)> = docs.iter().map(|(p, t)| (p.as_str(), t.as_str())).collect();
        let store = seeded(&embedder, &refs).await;
        let config = RetrievalConfig::default();
        let retriever = ContentRetriever::new(&store, &embedder, &config);

        assert_eq!(retriever.run(&ContentTool::Summarize).await.unwrap().len(), 20);
        let search = ContentTool::Search { query: "document".into() };
        assert_eq!(retriever.run(&search).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn empty_store_yields_no_chunks() {
        let embedder = HashEmbedder::default();
        let store = MemoryStore::new();
        let config = RetrievalConfig::default();
        let retriever = ContentRetriever::new(&store, &embedder, &config);

        let hits = retriever.summarize().await.unwrap();
        assert!(hits.is_empty());
        assert_eq!(ContentTool::Summarize.not_found_message(), NO_SUMMARY_CONTENT);
    }

    #[test]
    fn chunks_are_joined_with_separator() {
        let chunks = vec![
            ScoredChunk { source: "a.rs".into(), text: "uno".into(), score: 0.9 },
            ScoredChunk { source: "b.rs".into(), text: "dos".into(), score: 0.8 },
        ];
        assert_eq!(
            format_chunks(&chunks),
            "Source: a.rs\nContent:\nuno\n---\nSource: b.rs\nContent:\ndos"
        );
    }
}
