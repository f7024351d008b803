// Módulos de la aplicación
pub mod agents;
pub mod api;
pub mod app_state;
pub mod chunking;
pub mod config;
pub mod error;
pub mod github;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod neo4j_client;
pub mod rag;
pub mod store;
pub mod structure;
pub mod vector_store;
