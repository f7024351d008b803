use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use crate::{
    config::RetrievalConfig,
    llm::{ChatModel, Embedder},
    store::RepoStore,
};

/// Conexiones y modelos construidos una sola vez al arrancar.
/// Se pasa por referencia a cada componente que los necesita.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn RepoStore>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub retrieval: RetrievalConfig,
}

#[derive(Clone)]
pub struct AppState {
    pub context: AppContext,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
