//! Integración con Neo4j como vector store para los `:Chunk`.
//!
//! API pública:
//!   - `ensure_chunk_vector_index(&Graph, usize)`
//!   - `search_top_chunks(&Graph, &[f64], usize)`.

use anyhow::{anyhow, Result};
use neo4rs::{query, Graph};
use tracing::info;

use crate::models::ScoredChunk;

pub const CHUNK_INDEX_NAME: &str = "chunkEmbeddingIndex";

/// Garantiza que el índice vectorial sobre `:Chunk(embedding)` exista.
pub async fn ensure_chunk_vector_index(graph: &Graph, dimensions: usize) -> Result<()> {
    // ¿Ya existe el índice? Usamos la sintaxis moderna SHOW VECTOR INDEXES.
    let mut cursor = graph
        .execute(
            query("SHOW VECTOR INDEXES YIELD name WHERE name = $name RETURN name")
                .param("name", CHUNK_INDEX_NAME),
        )
        .await?;

    if cursor.next().await?.is_some() {
        info!("Índice vectorial '{CHUNK_INDEX_NAME}' ya existe.");
        return Ok(());
    }

    let cypher = format!(
        "\
CREATE VECTOR INDEX {CHUNK_INDEX_NAME} IF NOT EXISTS
FOR (c:Chunk)
ON (c.embedding)
OPTIONS {{
  indexConfig: {{
    `vector.dimensions`: {dimensions},
    `vector.similarity_function`: 'cosine'
  }}
}}"
    );

    graph.run(query(&cypher)).await?;
    info!("Índice vectorial '{CHUNK_INDEX_NAME}' creado ({dimensions} dimensiones).");

    Ok(())
}

/// Búsqueda por similitud sobre `:Chunk(embedding)`, de mayor a menor score.
pub async fn search_top_chunks(graph: &Graph, embedding: &[f64], top_k: usize) -> Result<Vec<ScoredChunk>> {
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let mut cursor = graph
        .execute(
            query(
                "CALL db.index.vector.queryNodes($index_name, $k, $embedding)
                 YIELD node, score
                 RETURN node.source AS source, node.text AS text, score
                 ORDER BY score DESC",
            )
            .param("index_name", CHUNK_INDEX_NAME)
            .param("k", top_k as i64)
            .param("embedding", embedding.to_vec()),
        )
        .await?;

    let mut output = Vec::new();
    while let Some(row) = cursor.next().await? {
        let score: f64 = row.get("score").ok_or_else(|| anyhow!("Falta campo 'score' en resultado de Neo4j"))?;
        let text: String = row.get("text").ok_or_else(|| anyhow!("Falta campo 'text' en resultado de Neo4j"))?;
        let source: String = row.get("source").unwrap_or_else(|| "N/A".to_string());
        output.push(ScoredChunk { source, text, score });
    }

    Ok(output)
}
