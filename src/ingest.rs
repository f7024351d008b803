//! Ingesta de un repositorio de GitHub en Neo4j: ficheros de texto →
//! documentos con metadatos estructurales → chunks con embeddings.
//!
//! Cualquier fallo (descarga, troceado, embeddings, persistencia) aborta la
//! ejecución completa; nada se escribe hasta que todos los chunks tienen su
//! embedding.

use std::collections::BTreeSet;

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::{
    chunking::RecursiveSplitter,
    config::RetrievalConfig,
    github::GitHubFetcher,
    llm::Embedder,
    models::{ChunkRecord, FileMetadata, IndexedFile, RepoFiles, SourceDocument, ROOT_DIRECTORY},
    store::RepoStore,
};

/// Resumen de los resultados de una operación de ingesta.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestionSummary {
    pub files_fetched: usize,
    pub files_ingested: usize,
    pub files_skipped: usize,
    pub directories: usize,
    pub chunks_created: usize,
}

/// Implementa cómo se mostrará el resumen como texto.
impl std::fmt::Display for IngestionSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Resumen: {} ficheros descargados, {} ingeridos, {} omitidos. {} directorios y {} chunks.",
            self.files_fetched, self.files_ingested, self.files_skipped, self.directories, self.chunks_created
        )
    }
}

/// Descarga `owner/repo` y lo indexa de una sola vez.
pub async fn ingest_repository(
    fetcher: &GitHubFetcher,
    store: &dyn RepoStore,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    owner: &str,
    repo: &str,
) -> Result<IngestionSummary> {
    info!("Descargando documentos de {owner}/{repo}...");
    let files = fetcher.fetch_repository(owner, repo).await?;
    index_files(store, embedder, retrieval, &files).await
}

/// Indexa un mapa ruta → contenido ya descargado.
pub async fn index_files(
    store: &dyn RepoStore,
    embedder: &dyn Embedder,
    retrieval: &RetrievalConfig,
    files: &RepoFiles,
) -> Result<IngestionSummary> {
    let mut summary = IngestionSummary {
        files_fetched: files.len(),
        ..IngestionSummary::default()
    };

    let documents = collect_documents(files);
    summary.files_skipped = files.len() - documents.len();
    if documents.is_empty() {
        bail!("No se encontraron documentos válidos tras procesar los ficheros");
    }

    summary.directories = documents
        .iter()
        .map(|d| d.metadata.directory.as_str())
        .filter(|d| *d != ROOT_DIRECTORY)
        .collect::<BTreeSet<_>>()
        .len();
    info!("Identificados {} directorios únicos.", summary.directories);

    let splitter = RecursiveSplitter::new(retrieval.chunk_size, retrieval.chunk_overlap);
    let split: Vec<(FileMetadata, Vec<String>)> = documents
        .into_iter()
        .map(|doc| (doc.metadata, splitter.split_text(&doc.content)))
        .filter(|(_, chunks)| !chunks.is_empty())
        .collect();
    let total_chunks: usize = split.iter().map(|(_, c)| c.len()).sum();
    if total_chunks == 0 {
        bail!("No hay chunks que indexar tras el troceado");
    }
    info!("Documentos divididos en {total_chunks} chunks.");

    let total_files = split.len();
    let mut indexed = Vec::with_capacity(total_files);
    for (position, (metadata, texts)) in split.into_iter().enumerate() {
        info!("[{}/{total_files}] Embeddings de {}", position + 1, metadata.source);
        indexed.push(embed_file(embedder, retrieval.embedding_batch_size, metadata, texts).await?);
    }

    store.upsert_files(&indexed).await?;

    summary.files_ingested = indexed.len();
    summary.chunks_created = total_chunks;
    info!("{summary}");
    Ok(summary)
}

/// Sólo texto no vacío; los binarios y vacíos se descartan con aviso.
fn collect_documents(files: &RepoFiles) -> Vec<SourceDocument> {
    files
        .iter()
        .filter_map(|(path, content)| match content.as_ref().and_then(|c| c.indexable_text()) {
            Some(text) => Some(SourceDocument {
                metadata: FileMetadata::from_path(path),
                content: text.to_string(),
            }),
            None => {
                warn!("Saltando fichero no-texto o vacío: {path}");
                None
            }
        })
        .collect()
}

/// Embeddings por lotes de `batch_size` textos; el total debe cuadrar.
async fn embed_file(
    embedder: &dyn Embedder,
    batch_size: usize,
    metadata: FileMetadata,
    texts: Vec<String>,
) -> Result<IndexedFile> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        vectors.extend(embedder.embed_texts(batch.to_vec()).await?);
    }
    if vectors.len() != texts.len() {
        bail!(
            "Número de embeddings ({}) distinto al número de chunks ({}) en {}",
            vectors.len(),
            texts.len(),
            metadata.source
        );
    }

    let chunks = texts
        .into_iter()
        .zip(vectors)
        .enumerate()
        .map(|(index, (text, embedding))| ChunkRecord {
            id: ChunkRecord::key(&metadata.source, index),
            index: index as i64,
            text,
            embedding,
        })
        .collect();
    Ok(IndexedFile { metadata, chunks })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::llm::testing::{CountingEmbedder, FailingEmbedder, HashEmbedder};
    use crate::models::{FetchedContent, ScoredChunk};
    use crate::store::{DirectoryFilter, MemoryStore, StoreStats};

    /// Almacén que rechaza cualquier escritura.
    struct ReadOnlyStore;

    #[async_trait]
    impl RepoStore for ReadOnlyStore {
        async fn upsert_files(&self, _files: &[IndexedFile]) -> Result<()> {
            bail!("almacén de sólo lectura")
        }
        async fn distinct_file_names(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn distinct_directories(&self, _filter: DirectoryFilter<'_>) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn find_directory_depth(&self, _directory: &str) -> Result<Option<i64>> {
            Ok(None)
        }
        async fn count_files_in(&self, _directory: &str) -> Result<u64> {
            Ok(0)
        }
        async fn file_names_in(&self, _directory: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn count_by_extension(&self) -> Result<Vec<(String, u64)>> {
            Ok(Vec::new())
        }
        async fn similarity_search(&self, _embedding: &[f64], _k: usize) -> Result<Vec<ScoredChunk>> {
            Ok(Vec::new())
        }
        async fn stats(&self) -> Result<StoreStats> {
            Ok(StoreStats::default())
        }
    }

    fn repo(entries: &[(&str, Option<FetchedContent>)]) -> RepoFiles {
        entries.iter().map(|(p, c)| (p.to_string(), c.clone())).collect()
    }

    fn text(s: &str) -> Option<FetchedContent> {
        Some(FetchedContent::Text(s.to_string()))
    }

    #[tokio::test]
    async fn skips_binary_empty_and_failed_files() {
        let files = repo(&[
            ("a.py", text("print('a')")),
            ("src/b.py", text("def b():\n    pass\n")),
            ("img/logo.png", Some(FetchedContent::Binary(vec![0xff, 0xd8]))),
            ("empty.txt", text("   ")),
            ("broken.md", None),
        ]);
        let store = MemoryStore::new();
        let summary = index_files(&store, &HashEmbedder, &RetrievalConfig::default(), &files)
            .await
            .unwrap();

        assert_eq!(summary.files_fetched, 5);
        assert_eq!(summary.files_ingested, 2);
        assert_eq!(summary.files_skipped, 3);
        assert_eq!(summary.directories, 1);
        assert_eq!(store.stats().await.unwrap().files, 2);
    }

    #[tokio::test]
    async fn no_text_files_is_fatal() {
        let files = repo(&[("logo.png", Some(FetchedContent::Binary(vec![0x00])))]);
        let store = MemoryStore::new();
        let result = index_files(&store, &HashEmbedder, &RetrievalConfig::default(), &files).await;
        assert!(result.is_err());
        assert_eq!(store.stats().await.unwrap().chunks, 0);
    }

    #[tokio::test]
    async fn chunks_inherit_file_metadata() {
        let long = "line of code\n".repeat(200);
        let files = repo(&[("src/utils/big.rs", text(&long))]);
        let store = MemoryStore::new();
        let summary = index_files(&store, &HashEmbedder, &RetrievalConfig::default(), &files)
            .await
            .unwrap();

        assert!(summary.chunks_created > 1);
        let hits = store.similarity_search(&vec![1.0; 64], 100).await.unwrap();
        assert_eq!(hits.len(), summary.chunks_created);
        assert!(hits.iter().all(|h| h.source == "src/utils/big.rs"));
        assert!(hits.iter().all(|h| h.text.chars().count() <= 1000));
    }

    #[tokio::test]
    async fn reindexing_keeps_a_stable_record_set() {
        let files = repo(&[("a.py", text("print('a')")), ("docs/guide.md", text(&"word ".repeat(600)))]);
        let store = MemoryStore::new();
        let cfg = RetrievalConfig::default();

        index_files(&store, &HashEmbedder, &cfg, &files).await.unwrap();
        let first = store.stats().await.unwrap();
        index_files(&store, &HashEmbedder, &cfg, &files).await.unwrap();
        let second = store.stats().await.unwrap();

        assert_eq!((first.files, first.chunks), (second.files, second.chunks));
    }

    #[tokio::test]
    async fn large_files_are_embedded_in_batches() {
        let files = repo(&[("Cargo.lock", text(&"dependency line\n".repeat(500)))]);
        let store = MemoryStore::new();
        let embedder = CountingEmbedder::default();
        let cfg = RetrievalConfig {
            chunk_size: 100,
            chunk_overlap: 10,
            embedding_batch_size: 8,
            ..RetrievalConfig::default()
        };

        let summary = index_files(&store, &embedder, &cfg, &files).await.unwrap();

        let batches = embedder.batch_sizes();
        assert!(batches.len() > 1);
        assert!(batches.iter().all(|&n| n <= 8));
        assert_eq!(batches.iter().sum::<usize>(), summary.chunks_created);
        assert_eq!(store.stats().await.unwrap().chunks as usize, summary.chunks_created);
    }

    #[tokio::test]
    async fn embedding_failure_aborts_without_partial_commit() {
        let files = repo(&[("a.py", text("print('a')")), ("b.py", text("print('b')")), ("c.py", text("print('c')"))]);
        let store = MemoryStore::new();
        let embedder = FailingEmbedder::after_calls(1);

        let result = index_files(&store, &embedder, &RetrievalConfig::default(), &files).await;

        assert!(result.is_err());
        let stats = store.stats().await.unwrap();
        assert_eq!((stats.files, stats.chunks), (0, 0));
    }

    #[tokio::test]
    async fn persist_failure_is_propagated() {
        let files = repo(&[("a.py", text("print('a')"))]);
        let result = index_files(&ReadOnlyStore, &HashEmbedder, &RetrievalConfig::default(), &files).await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("sólo lectura"));
    }
}
