//! Errores tipados del nivel de consulta.
//!
//! Ningún error de una consulta en vivo llega al usuario como fallo: el
//! despachador los convierte en texto. Internamente se conserva el tipo para
//! que los tests puedan comprobar la *clase* de error.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    /// El directorio no aparece en ningún registro indexado.
    #[error("Directory '{0}' not found or has no subdirectories indexed.")]
    DirectoryNotFound(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("llm error: {0}")]
    Llm(String),

    /// El modelo eligió una herramienta con argumentos inválidos.
    #[error("routing error: {0}")]
    Routing(String),
}

impl QueryError {
    pub fn store(err: impl std::fmt::Display) -> Self {
        Self::Store(err.to_string())
    }

    pub fn embedding(err: impl std::fmt::Display) -> Self {
        Self::Embedding(err.to_string())
    }

    pub fn llm(err: impl std::fmt::Display) -> Self {
        Self::Llm(err.to_string())
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
