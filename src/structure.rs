//! Consultas estructurales sobre los metadatos indexados.
//!
//! Todas son de sólo lectura y se apoyan en las primitivas de `RepoStore`.
//! Los directorios no se guardan como entidades: un directorio existe si
//! algún fichero lo tiene como `directory`. Uno que sólo contiene
//! subdirectorios es invisible aquí.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    error::{QueryError, QueryResult},
    models::ROOT_DIRECTORY,
    store::{DirectoryFilter, RepoStore},
};

/// Menú de operaciones estructurales tal y como lo ve el modelo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StructureToolName {
    /// Total count of unique files in the repository.
    CountTotalFiles,
    /// Total count of directories (folders), excluding the root.
    CountTotalDirectories,
    /// Count of directories directly under the repository root.
    CountTopLevelDirectories,
    /// Count of files directly inside `directory_path` (not in its subdirectories).
    CountFilesInDirectory,
    /// Count of immediate subdirectories inside `directory_path` ('.' for the root).
    CountSubdirectoriesInDirectory,
    /// List every directory path, excluding the root.
    ListAllDirectories,
    /// List the directories directly under the repository root.
    ListTopLevelDirectories,
    /// List the files directly inside `directory_path` (not in its subdirectories).
    ListFilesInDirectory,
    /// List the immediate subdirectories inside `directory_path` ('.' for the root).
    ListSubdirectoriesInDirectory,
    /// Count files per file extension (file types).
    CountFilesByExtension,
}

/// Respuesta estructurada del modelo: operación + argumento opcional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StructureSelection {
    /// The single structural operation that answers the question.
    pub tool: StructureToolName,
    /// Directory path taken from the question (e.g. 'src', 'src/utils', '.' for the root).
    /// Required only by the operations that work on a named directory.
    #[serde(default)]
    pub directory_path: Option<String>,
}

/// Operación ya validada, con sus argumentos tipados.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureTool {
    CountTotalFiles,
    CountTotalDirectories,
    CountTopLevelDirectories,
    CountFilesInDirectory { directory_path: String },
    CountSubdirectoriesInDirectory { directory_path: String },
    ListAllDirectories,
    ListTopLevelDirectories,
    ListFilesInDirectory { directory_path: String },
    ListSubdirectoriesInDirectory { directory_path: String },
    CountFilesByExtension,
}

impl TryFrom<StructureSelection> for StructureTool {
    type Error = QueryError;

    fn try_from(selection: StructureSelection) -> Result<Self, Self::Error> {
        use StructureToolName as N;

        let path = || -> QueryResult<String> {
            let raw = selection.directory_path.as_deref().map(normalize_directory);
            match raw {
                Some(p) if !p.is_empty() => Ok(p),
                _ => Err(QueryError::Routing(format!(
                    "the operation {:?} needs a directory_path",
                    selection.tool
                ))),
            }
        };

        Ok(match selection.tool {
            N::CountTotalFiles => Self::CountTotalFiles,
            N::CountTotalDirectories => Self::CountTotalDirectories,
            N::CountTopLevelDirectories => Self::CountTopLevelDirectories,
            N::CountFilesInDirectory => Self::CountFilesInDirectory { directory_path: path()? },
            N::CountSubdirectoriesInDirectory => {
                Self::CountSubdirectoriesInDirectory { directory_path: path()? }
            }
            N::ListAllDirectories => Self::ListAllDirectories,
            N::ListTopLevelDirectories => Self::ListTopLevelDirectories,
            N::ListFilesInDirectory => Self::ListFilesInDirectory { directory_path: path()? },
            N::ListSubdirectoriesInDirectory => {
                Self::ListSubdirectoriesInDirectory { directory_path: path()? }
            }
            N::CountFilesByExtension => Self::CountFilesByExtension,
        })
    }
}

impl StructureTool {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CountTotalFiles => "count_total_files",
            Self::CountTotalDirectories => "count_total_directories",
            Self::CountTopLevelDirectories => "count_top_level_directories",
            Self::CountFilesInDirectory { .. } => "count_files_in_directory",
            Self::CountSubdirectoriesInDirectory { .. } => "count_subdirectories_in_directory",
            Self::ListAllDirectories => "list_all_directories",
            Self::ListTopLevelDirectories => "list_top_level_directories",
            Self::ListFilesInDirectory { .. } => "list_files_in_directory",
            Self::ListSubdirectoriesInDirectory { .. } => "list_subdirectories_in_directory",
            Self::CountFilesByExtension => "count_files_by_extension",
        }
    }

    /// Texto de fallo para el usuario. `DirectoryNotFound` ya es una frase completa.
    pub fn describe_failure(&self, err: &QueryError) -> String {
        if let QueryError::DirectoryNotFound(_) = err {
            return err.to_string();
        }
        let action = match self {
            Self::CountTotalFiles => "counting total unique files".to_string(),
            Self::CountTotalDirectories => "counting total directories".to_string(),
            Self::CountTopLevelDirectories => "counting top-level directories".to_string(),
            Self::CountFilesInDirectory { directory_path } => {
                format!("counting files in directory '{directory_path}'")
            }
            Self::CountSubdirectoriesInDirectory { directory_path } => {
                format!("counting subdirectories in directory '{directory_path}'")
            }
            Self::ListAllDirectories => "listing all directories".to_string(),
            Self::ListTopLevelDirectories => "listing top-level directories".to_string(),
            Self::ListFilesInDirectory { directory_path } => {
                format!("listing files in directory '{directory_path}'")
            }
            Self::ListSubdirectoriesInDirectory { directory_path } => {
                format!("listing subdirectories in directory '{directory_path}'")
            }
            Self::CountFilesByExtension => "counting files by extension".to_string(),
        };
        format!("Error {action}: {err}")
    }
}

/// Resultado tipado de una consulta estructural.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructureAnswer {
    TotalFiles(usize),
    TotalDirectories(usize),
    TopLevelDirectoryCount(usize),
    FilesInDirectory { directory: String, count: u64 },
    SubdirectoryCount { directory: String, count: usize },
    AllDirectories(Vec<String>),
    TopLevelDirectories(Vec<String>),
    FileList { directory: String, files: Vec<String> },
    SubdirectoryList { directory: String, subdirectories: Vec<String> },
    ExtensionCounts(Vec<(String, u64)>),
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "None".to_string()
    } else {
        items.join(", ")
    }
}

impl fmt::Display for StructureAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TotalFiles(n) => write!(f, "Total number of unique original files indexed: {n}"),
            Self::TotalDirectories(n) => write!(
                f,
                "Total number of unique directories indexed (excluding root): {n}"
            ),
            Self::TopLevelDirectoryCount(n) => {
                write!(f, "Total number of top-level directories indexed: {n}")
            }
            Self::FilesInDirectory { directory, count } => write!(
                f,
                "Total number of files directly in directory '{directory}': {count}"
            ),
            Self::SubdirectoryCount { directory, count } => write!(
                f,
                "Total number of subdirectories directly in directory '{directory}': {count}"
            ),
            Self::AllDirectories(dirs) => write!(f, "All unique directories: {}", join_or_none(dirs)),
            Self::TopLevelDirectories(dirs) => {
                write!(f, "Top-level directories: {}", join_or_none(dirs))
            }
            Self::FileList { directory, files } => write!(
                f,
                "Files found directly in directory '{directory}': {}",
                join_or_none(files)
            ),
            Self::SubdirectoryList { directory, subdirectories } => write!(
                f,
                "Subdirectories directly in directory '{directory}': {}",
                join_or_none(subdirectories)
            ),
            Self::ExtensionCounts(counts) if counts.is_empty() => {
                write!(f, "No file extension data found.")
            }
            Self::ExtensionCounts(counts) => {
                write!(f, "File extension counts:")?;
                for (ext, count) in counts {
                    let label = if ext.is_empty() { "None" } else { ext.as_str() };
                    write!(f, "\n- {label}: {count}")?;
                }
                Ok(())
            }
        }
    }
}

/// Normaliza la ruta que extrae el modelo: sin barras ni `./` sobrantes.
pub fn normalize_directory(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() || trimmed == ROOT_DIRECTORY {
        return ROOT_DIRECTORY.to_string();
    }
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
}

/// Regex de prefijo anclada a un separador: `src` nunca casa con `src-old`.
pub fn subdirectory_pattern(directory: &str) -> String {
    format!("^{}/", regex::escape(directory))
}

/// Motor de consultas estructurales sobre un `RepoStore`.
pub struct StructureQueries<'a> {
    store: &'a dyn RepoStore,
}

impl<'a> StructureQueries<'a> {
    pub fn new(store: &'a dyn RepoStore) -> Self {
        Self { store }
    }

    /// Ejecuta la operación elegida por el modelo.
    pub async fn run(&self, tool: &StructureTool) -> QueryResult<StructureAnswer> {
        info!("Tool: {} {:?}", tool.name(), tool);
        let result = match tool {
            StructureTool::CountTotalFiles => self.count_total_files().await,
            StructureTool::CountTotalDirectories => self.count_total_directories().await,
            StructureTool::CountTopLevelDirectories => self.count_top_level_directories().await,
            StructureTool::CountFilesInDirectory { directory_path } => {
                self.count_files_in_directory(directory_path).await
            }
            StructureTool::CountSubdirectoriesInDirectory { directory_path } => {
                self.count_subdirectories_in_directory(directory_path).await
            }
            StructureTool::ListAllDirectories => self.list_all_directories().await,
            StructureTool::ListTopLevelDirectories => self.list_top_level_directories().await,
            StructureTool::ListFilesInDirectory { directory_path } => {
                self.list_files_in_directory(directory_path).await
            }
            StructureTool::ListSubdirectoriesInDirectory { directory_path } => {
                self.list_subdirectories_in_directory(directory_path).await
            }
            StructureTool::CountFilesByExtension => self.count_files_by_extension().await,
        };
        match &result {
            Ok(answer) => debug!("Tool {} -> {answer}", tool.name()),
            Err(e) => warn!("Tool {} falló: {e}", tool.name()),
        }
        result
    }

    /// Cuenta nombres de fichero distintos: dos `mod.rs` en carpetas
    /// diferentes cuentan como uno.
    pub async fn count_total_files(&self) -> QueryResult<StructureAnswer> {
        let names = self.store.distinct_file_names().await.map_err(QueryError::store)?;
        Ok(StructureAnswer::TotalFiles(names.len()))
    }

    pub async fn count_total_directories(&self) -> QueryResult<StructureAnswer> {
        let dirs = self.directories(DirectoryFilter::NotRoot).await?;
        Ok(StructureAnswer::TotalDirectories(dirs.len()))
    }

    pub async fn count_top_level_directories(&self) -> QueryResult<StructureAnswer> {
        let dirs = self.directories(DirectoryFilter::AtDepth(1)).await?;
        Ok(StructureAnswer::TopLevelDirectoryCount(dirs.len()))
    }

    pub async fn count_files_in_directory(&self, directory: &str) -> QueryResult<StructureAnswer> {
        let count = self.store.count_files_in(directory).await.map_err(QueryError::store)?;
        Ok(StructureAnswer::FilesInDirectory {
            directory: directory.to_string(),
            count,
        })
    }

    pub async fn count_subdirectories_in_directory(
        &self,
        directory: &str,
    ) -> QueryResult<StructureAnswer> {
        let subdirectories = self.immediate_subdirectories(directory).await?;
        Ok(StructureAnswer::SubdirectoryCount {
            directory: directory.to_string(),
            count: subdirectories.len(),
        })
    }

    pub async fn list_all_directories(&self) -> QueryResult<StructureAnswer> {
        let dirs = self.directories(DirectoryFilter::NotRoot).await?;
        Ok(StructureAnswer::AllDirectories(dirs))
    }

    pub async fn list_top_level_directories(&self) -> QueryResult<StructureAnswer> {
        let dirs = self.directories(DirectoryFilter::AtDepth(1)).await?;
        Ok(StructureAnswer::TopLevelDirectories(dirs))
    }

    pub async fn list_files_in_directory(&self, directory: &str) -> QueryResult<StructureAnswer> {
        let mut files = self.store.file_names_in(directory).await.map_err(QueryError::store)?;
        files.sort();
        Ok(StructureAnswer::FileList {
            directory: directory.to_string(),
            files,
        })
    }

    pub async fn list_subdirectories_in_directory(
        &self,
        directory: &str,
    ) -> QueryResult<StructureAnswer> {
        let subdirectories = self.immediate_subdirectories(directory).await?;
        Ok(StructureAnswer::SubdirectoryList {
            directory: directory.to_string(),
            subdirectories,
        })
    }

    pub async fn count_files_by_extension(&self) -> QueryResult<StructureAnswer> {
        let mut counts = self.store.count_by_extension().await.map_err(QueryError::store)?;
        counts.sort_by(|(ext_a, a), (ext_b, b)| b.cmp(a).then_with(|| ext_a.cmp(ext_b)));
        Ok(StructureAnswer::ExtensionCounts(counts))
    }

    async fn directories(&self, filter: DirectoryFilter<'_>) -> QueryResult<Vec<String>> {
        let mut dirs = self
            .store
            .distinct_directories(filter)
            .await
            .map_err(QueryError::store)?;
        dirs.sort();
        dirs.dedup();
        Ok(dirs)
    }

    /// Resuelve la profundidad D del padre (0 para la raíz) y devuelve los
    /// directorios a profundidad D+1 que cuelgan de `directory/`.
    async fn immediate_subdirectories(&self, directory: &str) -> QueryResult<Vec<String>> {
        if directory == ROOT_DIRECTORY {
            return self.directories(DirectoryFilter::AtDepth(1)).await;
        }

        let parent_depth = self
            .store
            .find_directory_depth(directory)
            .await
            .map_err(QueryError::store)?
            .ok_or_else(|| QueryError::DirectoryNotFound(directory.to_string()))?;

        let pattern = subdirectory_pattern(directory);
        let mut dirs = self
            .directories(DirectoryFilter::Matching {
                pattern: &pattern,
                depth: parent_depth + 1,
            })
            .await?;
        dirs.retain(|d| d != directory);
        Ok(dirs)
    }
}
