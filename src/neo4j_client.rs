//! Neo4j como almacén documental del repositorio indexado.
//!
//! Grafo: `(:File {source, file_name, file_extension, directory, depth})
//! -[:HAS_CHUNK]->(:Chunk {id, source, index, text, embedding})`, con
//! `NEXT_CHUNK` entre chunks consecutivos del mismo fichero.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use neo4rs::{query, Graph, Query, Txn};
use tracing::info;
use url::Url;

use crate::{
    config::AppConfig,
    models::{IndexedFile, ScoredChunk, ROOT_DIRECTORY},
    store::{DirectoryFilter, RepoStore, StoreStats},
    vector_store,
};

pub async fn connect_from_config(cfg: &AppConfig) -> Result<Graph> {
    let url = Url::parse(&cfg.neo4j_uri)?;
    let host = url.host_str().unwrap_or("localhost");
    let port = url.port().unwrap_or(7687);
    let addr = format!("{host}:{port}");

    info!("Conectando a Neo4j en {addr}...");
    let graph = Graph::new(&addr, &cfg.neo4j_user, &cfg.neo4j_password).await?;
    info!("Conexión a Neo4j OK");
    Ok(graph)
}

/// Crea constraints e índices para las etiquetas usadas en el grafo.
pub async fn ensure_schema(graph: &Graph) -> Result<()> {
    let statements = [
        // File.source único: una ruta, un fichero
        "CREATE CONSTRAINT file_source IF NOT EXISTS
         FOR (f:File)
         REQUIRE f.source IS UNIQUE",
        // Chunk.id único (ruta#índice)
        "CREATE CONSTRAINT chunk_id IF NOT EXISTS
         FOR (c:Chunk)
         REQUIRE c.id IS UNIQUE",
        "CREATE INDEX file_directory IF NOT EXISTS
         FOR (f:File)
         ON (f.directory)",
    ];

    for stmt in statements {
        graph.run(query(stmt)).await?;
    }

    info!("Esquema de Neo4j asegurado.");
    Ok(())
}

/// `RepoStore` sobre Neo4j.
#[derive(Clone)]
pub struct Neo4jStore {
    graph: Arc<Graph>,
}

impl Neo4jStore {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self { graph }
    }

    async fn strings(&self, q: Query, column: &str) -> Result<Vec<String>> {
        let mut cursor = self.graph.execute(q).await?;
        let mut values = Vec::new();
        while let Some(row) = cursor.next().await? {
            if let Some(value) = row.get::<String>(column) {
                values.push(value);
            }
        }
        Ok(values)
    }

    async fn single_count(&self, q: Query) -> Result<u64> {
        let mut cursor = self.graph.execute(q).await?;
        let row = cursor
            .next()
            .await?
            .ok_or_else(|| anyhow!("La consulta de conteo no devolvió filas"))?;
        let n: i64 = row.get("n").ok_or_else(|| anyhow!("Falta campo 'n' en resultado de Neo4j"))?;
        Ok(n.max(0) as u64)
    }
}

#[async_trait]
impl RepoStore for Neo4jStore {
    async fn upsert_files(&self, files: &[IndexedFile]) -> Result<()> {
        let indexed_at = Utc::now().to_rfc3339();
        let tx = self.graph.start_txn().await?;
        for file in files {
            if let Err(e) = write_file(&tx, file, &indexed_at).await {
                tx.rollback().await.ok();
                return Err(e);
            }
        }
        tx.commit().await?;
        info!("Persistidos {} ficheros en Neo4j.", files.len());
        Ok(())
    }

    async fn distinct_file_names(&self) -> Result<Vec<String>> {
        self.strings(
            query("MATCH (f:File) WHERE f.file_name IS NOT NULL RETURN DISTINCT f.file_name AS value"),
            "value",
        )
        .await
    }

    async fn distinct_directories(&self, filter: DirectoryFilter<'_>) -> Result<Vec<String>> {
        let DirectoryQuery { cypher, pattern, depth } = directory_query(filter);
        let mut q = query(cypher).param("root", ROOT_DIRECTORY);
        if let Some(pattern) = pattern {
            q = q.param("pattern", pattern);
        }
        if let Some(depth) = depth {
            q = q.param("depth", depth);
        }
        self.strings(q, "value").await
    }

    async fn find_directory_depth(&self, directory: &str) -> Result<Option<i64>> {
        let mut cursor = self
            .graph
            .execute(
                query(
                    "MATCH (f:File {directory: $directory}) WHERE f.depth IS NOT NULL
                     RETURN f.depth AS depth LIMIT 1",
                )
                .param("directory", directory),
            )
            .await?;
        Ok(match cursor.next().await? {
            Some(row) => row.get::<i64>("depth"),
            None => None,
        })
    }

    async fn count_files_in(&self, directory: &str) -> Result<u64> {
        self.single_count(
            query("MATCH (f:File {directory: $directory}) RETURN count(f) AS n").param("directory", directory),
        )
        .await
    }

    async fn file_names_in(&self, directory: &str) -> Result<Vec<String>> {
        self.strings(
            query("MATCH (f:File {directory: $directory}) RETURN f.file_name AS value ORDER BY f.source")
                .param("directory", directory),
            "value",
        )
        .await
    }

    async fn count_by_extension(&self) -> Result<Vec<(String, u64)>> {
        let mut cursor = self
            .graph
            .execute(query(
                "MATCH (f:File)
                 RETURN coalesce(f.file_extension, '') AS extension, count(*) AS n",
            ))
            .await?;
        let mut counts = Vec::new();
        while let Some(row) = cursor.next().await? {
            let extension: String = row.get("extension").unwrap_or_default();
            let n: i64 = row.get("n").unwrap_or_default();
            counts.push((extension, n.max(0) as u64));
        }
        Ok(counts)
    }

    async fn similarity_search(&self, embedding: &[f64], k: usize) -> Result<Vec<ScoredChunk>> {
        vector_store::search_top_chunks(&self.graph, embedding, k).await
    }

    async fn stats(&self) -> Result<StoreStats> {
        let files = self.single_count(query("MATCH (f:File) RETURN count(f) AS n")).await?;
        let chunks = self.single_count(query("MATCH (c:Chunk) RETURN count(c) AS n")).await?;
        Ok(StoreStats { files, chunks })
    }
}

/// Cypher y parámetros de `distinct_directories` para cada filtro.
#[derive(Debug, PartialEq, Eq)]
struct DirectoryQuery {
    cypher: &'static str,
    pattern: Option<String>,
    depth: Option<i64>,
}

fn directory_query(filter: DirectoryFilter<'_>) -> DirectoryQuery {
    match filter {
        DirectoryFilter::NotRoot => DirectoryQuery {
            cypher: "MATCH (f:File) WHERE f.directory <> $root RETURN DISTINCT f.directory AS value",
            pattern: None,
            depth: None,
        },
        DirectoryFilter::AtDepth(depth) => DirectoryQuery {
            cypher: "MATCH (f:File) WHERE f.depth = $depth RETURN DISTINCT f.directory AS value",
            pattern: None,
            depth: Some(depth),
        },
        // `=~` exige casar la cadena entera: se completa el prefijo con `.*`.
        DirectoryFilter::Matching { pattern, depth } => DirectoryQuery {
            cypher: "MATCH (f:File) WHERE f.directory =~ $pattern AND f.depth = $depth
                     RETURN DISTINCT f.directory AS value",
            pattern: Some(format!("{pattern}.*")),
            depth: Some(depth),
        },
    }
}

/// Reemplaza el fichero y todos sus chunks dentro de la transacción.
async fn write_file(tx: &Txn, file: &IndexedFile, indexed_at: &str) -> Result<()> {
    let meta = &file.metadata;

    // 1) File + borrado de los chunks de una indexación anterior
    tx.run(
        query(
            "MERGE (f:File {source: $source})
             SET f.file_name = $file_name, f.file_extension = $file_extension,
                 f.directory = $directory, f.depth = $depth, f.indexed_at = datetime($indexed_at)
             WITH f
             OPTIONAL MATCH (f)-[:HAS_CHUNK]->(old:Chunk)
             DETACH DELETE old",
        )
        .param("source", meta.source.clone())
        .param("file_name", meta.file_name.clone())
        .param("file_extension", meta.file_extension.clone())
        .param("directory", meta.directory.clone())
        .param("depth", meta.depth)
        .param("indexed_at", indexed_at),
    )
    .await?;

    // 2) Chunks con los metadatos del fichero y relaciones NEXT_CHUNK
    let mut prev_chunk_id: Option<&str> = None;
    for chunk in &file.chunks {
        tx.run(
            query(
                "MATCH (f:File {source: $source})
                 MERGE (c:Chunk {id: $id})
                 SET c.source = $source, c.index = $index, c.text = $text, c.embedding = $embedding,
                     c.file_name = $file_name, c.file_extension = $file_extension,
                     c.directory = $directory, c.depth = $depth
                 MERGE (f)-[:HAS_CHUNK]->(c)",
            )
            .param("source", meta.source.clone())
            .param("id", chunk.id.clone())
            .param("index", chunk.index)
            .param("text", chunk.text.clone())
            .param("embedding", chunk.embedding.clone())
            .param("file_name", meta.file_name.clone())
            .param("file_extension", meta.file_extension.clone())
            .param("directory", meta.directory.clone())
            .param("depth", meta.depth),
        )
        .await?;

        if let Some(prev_id) = prev_chunk_id {
            tx.run(
                query("MATCH (c1:Chunk {id: $prev_id}), (c2:Chunk {id: $id}) MERGE (c1)-[:NEXT_CHUNK]->(c2)")
                    .param("prev_id", prev_id)
                    .param("id", chunk.id.clone()),
            )
            .await?;
        }
        prev_chunk_id = Some(&chunk.id);
    }

    Ok(())
}
