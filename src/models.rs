//! Modelos de dominio: contenido descargado de GitHub, metadatos
//! estructurales de cada fichero y los chunks persistidos en Neo4j.

use std::collections::BTreeMap;

/// Centinela con el que se guarda el directorio raíz del repositorio.
pub const ROOT_DIRECTORY: &str = ".";

/// Contenido de un fichero tras decodificar el base64 de la API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchedContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FetchedContent {
    /// Texto útil para indexar: `None` si es binario o está vacío.
    pub fn indexable_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        }
    }
}

/// Resultado de la descarga: ruta → contenido, o `None` si falló.
pub type RepoFiles = BTreeMap<String, Option<FetchedContent>>;

/// Metadatos estructurales de un fichero original.
/// Los comparten el nodo (:File) y todos sus (:Chunk).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub source: String,
    pub file_name: String,
    pub file_extension: String,
    pub directory: String,
    pub depth: i64,
}

impl FileMetadata {
    /// Deriva directorio, nombre, extensión y profundidad a partir de la
    /// ruta relativa que devuelve la API (`src/utils/c.py`).
    pub fn from_path(source: &str) -> Self {
        let (directory, file_name) = match source.rsplit_once('/') {
            Some((dir, name)) if !dir.is_empty() => (dir.to_string(), name.to_string()),
            Some((_, name)) => (ROOT_DIRECTORY.to_string(), name.to_string()),
            None => (ROOT_DIRECTORY.to_string(), source.to_string()),
        };

        Self {
            source: source.to_string(),
            file_extension: file_extension(&file_name),
            depth: directory_depth(&directory),
            directory,
            file_name,
        }
    }
}

/// Profundidad de un directorio: 0 para la raíz, separadores + 1 en otro caso.
pub fn directory_depth(directory: &str) -> i64 {
    if directory == ROOT_DIRECTORY || directory.is_empty() {
        0
    } else {
        directory.matches('/').count() as i64 + 1
    }
}

/// Extensión con el punto incluido (`.py`), o cadena vacía.
/// Los puntos iniciales no cuentan: `.gitignore` no tiene extensión.
fn file_extension(file_name: &str) -> String {
    let stem_start = file_name.len() - file_name.trim_start_matches('.').len();
    match file_name[stem_start..].rfind('.') {
        Some(idx) => file_name[stem_start + idx..].to_string(),
        None => String::new(),
    }
}

/// Documento completo antes de trocearlo.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub metadata: FileMetadata,
    pub content: String,
}

/// Representa un nodo (:Chunk): trozo de texto con su embedding.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub index: i64,
    pub text: String,
    pub embedding: Vec<f64>,
}

impl ChunkRecord {
    /// Clave estable `ruta#índice`, usada para el upsert al reindexar.
    pub fn key(source: &str, index: usize) -> String {
        format!("{source}#{index}")
    }
}

/// Un fichero listo para persistir: metadatos + chunks embebidos.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub metadata: FileMetadata,
    pub chunks: Vec<ChunkRecord>,
}

/// Resultado de una búsqueda vectorial.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub source: String,
    pub text: String,
    pub score: f64,
}
