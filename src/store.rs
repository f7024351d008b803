//! Contrato del almacén de documentos + índice vectorial.
//!
//! Las primitivas son las de un almacén documental convencional: valores
//! distintos con filtro, conteos por igualdad, agregación por grupo y
//! búsqueda vectorial. Toda la lógica de profundidad y contención vive en
//! `structure`, encima de este trait.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::models::{IndexedFile, ScoredChunk, ROOT_DIRECTORY};

/// Filtro sobre el campo `directory` de los ficheros indexados.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryFilter<'a> {
    /// Todos salvo el centinela de la raíz.
    NotRoot,
    /// Exactamente a esa profundidad.
    AtDepth(i64),
    /// `pattern` es una regex anclada al inicio (`^src/`) y ya escapada.
    Matching { pattern: &'a str, depth: i64 },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub files: u64,
    pub chunks: u64,
}

#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Inserta los ficheros reemplazando los chunks previos de la misma ruta.
    async fn upsert_files(&self, files: &[IndexedFile]) -> Result<()>;

    async fn distinct_file_names(&self) -> Result<Vec<String>>;

    async fn distinct_directories(&self, filter: DirectoryFilter<'_>) -> Result<Vec<String>>;

    /// Profundidad de cualquier fichero cuyo `directory` sea exactamente el dado.
    async fn find_directory_depth(&self, directory: &str) -> Result<Option<i64>>;

    async fn count_files_in(&self, directory: &str) -> Result<u64>;

    async fn file_names_in(&self, directory: &str) -> Result<Vec<String>>;

    /// Pares (extensión, número de ficheros), sin orden garantizado.
    async fn count_by_extension(&self) -> Result<Vec<(String, u64)>>;

    async fn similarity_search(&self, embedding: &[f64], k: usize) -> Result<Vec<ScoredChunk>>;

    async fn stats(&self) -> Result<StoreStats>;
}

/// Almacén en memoria con la misma semántica que el de Neo4j.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RwLock<BTreeMap<String, IndexedFile>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, IndexedFile>>> {
        self.files.read().map_err(|_| anyhow!("MemoryStore envenenado"))
    }
}

#[async_trait]
impl RepoStore for MemoryStore {
    async fn upsert_files(&self, files: &[IndexedFile]) -> Result<()> {
        let mut guard = self.files.write().map_err(|_| anyhow!("MemoryStore envenenado"))?;
        for file in files {
            guard.insert(file.metadata.source.clone(), file.clone());
        }
        Ok(())
    }

    async fn distinct_file_names(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .read()?
            .values()
            .map(|f| f.metadata.file_name.clone())
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn distinct_directories(&self, filter: DirectoryFilter<'_>) -> Result<Vec<String>> {
        let matcher = match filter {
            DirectoryFilter::Matching { pattern, .. } => Some(Regex::new(pattern)?),
            _ => None,
        };
        let dirs: BTreeSet<String> = self
            .read()?
            .values()
            .map(|f| &f.metadata)
            .filter(|m| match filter {
                DirectoryFilter::NotRoot => m.directory != ROOT_DIRECTORY,
                DirectoryFilter::AtDepth(depth) => m.depth == depth,
                DirectoryFilter::Matching { depth, .. } => {
                    m.depth == depth && matcher.as_ref().is_some_and(|re| re.is_match(&m.directory))
                }
            })
            .map(|m| m.directory.clone())
            .collect();
        Ok(dirs.into_iter().collect())
    }

    async fn find_directory_depth(&self, directory: &str) -> Result<Option<i64>> {
        Ok(self
            .read()?
            .values()
            .find(|f| f.metadata.directory == directory)
            .map(|f| f.metadata.depth))
    }

    async fn count_files_in(&self, directory: &str) -> Result<u64> {
        Ok(self
            .read()?
            .values()
            .filter(|f| f.metadata.directory == directory)
            .count() as u64)
    }

    async fn file_names_in(&self, directory: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .values()
            .filter(|f| f.metadata.directory == directory)
            .map(|f| f.metadata.file_name.clone())
            .collect())
    }

    async fn count_by_extension(&self) -> Result<Vec<(String, u64)>> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for file in self.read()?.values() {
            *counts.entry(file.metadata.file_extension.clone()).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }

    async fn similarity_search(&self, embedding: &[f64], k: usize) -> Result<Vec<ScoredChunk>> {
        let guard = self.read()?;
        let mut scored: Vec<ScoredChunk> = guard
            .values()
            .flat_map(|file| {
                file.chunks.iter().map(move |chunk| ScoredChunk {
                    source: file.metadata.source.clone(),
                    text: chunk.text.clone(),
                    score: cosine_similarity(embedding, &chunk.embedding),
                })
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let guard = self.read()?;
        Ok(StoreStats {
            files: guard.len() as u64,
            chunks: guard.values().map(|f| f.chunks.len() as u64).sum(),
        })
    }
}

/// Similitud coseno; 0.0 si alguno de los vectores es nulo o difieren en tamaño.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}
