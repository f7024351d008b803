use std::{
    process::ExitCode,
    sync::{Arc, Mutex},
};

use anyhow::{anyhow, Context, Result};
use axum::Router;
use clap::{Parser, Subcommand};
use github_repo_rag_agent::{
    agents, api,
    app_state::{AppContext, AppState},
    config::AppConfig,
    github::GitHubFetcher,
    ingest,
    llm::{ChatModel, LlmManager},
    neo4j_client::{self, Neo4jStore},
    vector_store,
};
use tokio::sync::oneshot;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const CHECK_LLM_PROMPT: &str = "Explain what a large language model is in one sentence.";

#[derive(Parser)]
#[command(name = "github-repo-rag-agent", version, about = "Preguntas sobre un repositorio de GitHub indexado en Neo4j")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Descarga el repositorio y lo indexa en Neo4j
    Index {
        #[arg(long)]
        owner: Option<String>,
        #[arg(long)]
        repo: Option<String>,
    },
    /// Arranca el servidor HTTP con el formulario de consultas (por defecto)
    Serve,
    /// Responde una única pregunta por la salida estándar
    Ask { question: String },
    /// Comprueba la conexión con el modelo de chat
    CheckLlm,
}

#[tokio::main]
async fn main() -> ExitCode {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli.command.unwrap_or(Command::Serve)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    // 2. Cargar configuración
    let cfg = AppConfig::from_env().context("Error al cargar la configuración")?;

    match command {
        Command::Index { owner, repo } => index(&cfg, owner, repo).await,
        Command::Serve => serve(cfg).await,
        Command::Ask { question } => {
            let ctx = build_context(&cfg).await?;
            println!("{}", agents::ask(&ctx, &question).await);
            Ok(())
        }
        Command::CheckLlm => {
            let llm = LlmManager::from_config(&cfg)?;
            info!("Probando el modelo '{}'...", llm.chat_model);
            let reply = llm.complete(CHECK_LLM_PROMPT).await.context("El modelo de chat no respondió")?;
            println!("{reply}");
            Ok(())
        }
    }
}

/// Conecta a Neo4j, asegura esquema e índice vectorial y arma el contexto.
async fn build_context(cfg: &AppConfig) -> Result<AppContext> {
    let graph = neo4j_client::connect_from_config(cfg)
        .await
        .context("Error conectando a Neo4j")?;
    neo4j_client::ensure_schema(&graph)
        .await
        .context("Error asegurando el esquema de Neo4j")?;
    vector_store::ensure_chunk_vector_index(&graph, cfg.embedding_dimensions)
        .await
        .context("Error asegurando el índice vectorial")?;

    // Gestor de LLMs: embeddings y chat del mismo proveedor
    let llm = Arc::new(LlmManager::from_config(cfg).context("Error inicializando LLM Manager")?);

    Ok(AppContext {
        store: Arc::new(Neo4jStore::new(Arc::new(graph))),
        embedder: llm.clone(),
        chat: llm,
        retrieval: cfg.retrieval.clone(),
    })
}

async fn index(cfg: &AppConfig, owner: Option<String>, repo: Option<String>) -> Result<()> {
    let owner = owner
        .or_else(|| cfg.repo_owner.clone())
        .ok_or_else(|| anyhow!("Falta el propietario del repositorio (--owner o REPO_OWNER)"))?;
    let repo = repo
        .or_else(|| cfg.repo_name.clone())
        .ok_or_else(|| anyhow!("Falta el nombre del repositorio (--repo o REPO_NAME)"))?;
    if cfg.github_token.is_none() {
        return Err(anyhow!("Falta GITHUB_TOKEN en el entorno"));
    }

    let ctx = build_context(cfg).await?;
    let fetcher = GitHubFetcher::new(&cfg.github_api_url, cfg.github_token.clone())?;

    let summary = ingest::ingest_repository(
        &fetcher,
        ctx.store.as_ref(),
        ctx.embedder.as_ref(),
        &ctx.retrieval,
        &owner,
        &repo,
    )
    .await
    .context("Error en la indexación")?;

    info!("¡Indexación completada! {summary}");
    Ok(())
}

async fn serve(cfg: AppConfig) -> Result<()> {
    let context = build_context(&cfg).await?;

    // Canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let app_state = AppState {
        context,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // Router de la API y servicio de ficheros estáticos
    let app = Router::new()
        .merge(api::create_router(app_state))
        .fallback_service(ServeDir::new("frontend"))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = tokio::net::TcpListener::bind(&cfg.server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {}", cfg.server_addr))?;
    let server_url = format!("http://{}", cfg.server_addr);
    info!("🚀 Servidor escuchando en {}", &server_url);

    if cfg.open_browser && webbrowser::open(&server_url).is_err() {
        info!("No se pudo abrir el navegador. Por favor, accede a {} manualmente.", server_url);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
