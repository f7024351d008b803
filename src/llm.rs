//! Abstracción sobre Rig para trabajar con distintos proveedores de LLM.
//!
//! Cada punto de decisión del despachador es una única llamada de
//! "clasificar + extraer argumentos": el modelo rellena una estructura
//! tipada (esquema JSON vía schemars) y el resto es código determinista.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rig::client::{CompletionClient as _, EmbeddingsClient as _, ProviderClient as _};
use rig::completion::Prompt as _;
use rig::embeddings::EmbeddingModel as _;
use rig::providers::{gemini, openai};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    agents::RouteSelection,
    config::{AppConfig, LlmProvider},
    rag::ContentSelection,
    structure::StructureSelection,
};

const ROUTER_PROMPT: &str = r#"
You are a Router AI assistant. Your only job is to decide which specialized agent must answer the user's question about an indexed GitHub repository.
- Choose `structure_agent` for anything about the *organization* or *layout* of the repository: files, folders, counts, lists, extensions, hierarchy.
- Choose `content_agent` for anything about the *information contained within* the files: what the code does, explanations, technologies, summaries, specific details, concepts.
Do not answer the question yourself.
"#;

const STRUCTURE_PROMPT: &str = r#"
You select exactly one tool that answers a question about the file and directory structure of an indexed GitHub repository.
- Pay close attention to whether the user asks about **files** or **directories/folders**.
- Distinguish the **total** count/list, the **top-level** ones, and items **inside a specific directory**.
- When the question names a directory, extract its path exactly as written (e.g. 'src', 'src/utils'). Use '.' for the root directory.
- Use `count_files_by_extension` for questions about file types or extensions.
Never choose a tool for questions about the *content* of files.
"#;

const CONTENT_PROMPT: &str = r#"
You select the retrieval tool for a question about the *content* of an indexed GitHub repository.
- If the user asks for a general summary or overview ("What does this repo have?", "Give me the gist", "Summarize the repository"), choose `summarize_repo_content`.
- For any other specific question about code, documentation, concepts or details within files, choose `content_search`.
"#;

const ANSWER_PROMPT: &str = r#"
You are an expert in understanding code, documentation and technical concepts found in repository files.
You answer ONLY from the repository snippets given in the context; each snippet starts with its source path.
- Carefully analyze the retrieved content, especially if it contains code.
- If the user asks "how to" do something, or asks for steps, explanations or implementation details, synthesize a clear, step-by-step answer based on the snippets.
- If the snippets do not contain enough information, say that you couldn't find relevant information in the repository data.
- Do NOT make up information or steps that are not supported by the snippets.
"#;

/// Cálculo de embeddings de texto.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f64>> {
        self.embed_texts(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No se pudo generar embedding de la query"))
    }
}

/// Las decisiones que el despachador delega en el modelo de chat.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn select_route(&self, question: &str) -> Result<RouteSelection>;

    async fn select_structure_tool(&self, question: &str) -> Result<StructureSelection>;

    async fn select_content_tool(&self, question: &str) -> Result<ContentSelection>;

    /// Respuesta final usando sólo los chunks recuperados.
    async fn answer_with_context(&self, question: &str, context: &str) -> Result<String>;

    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Gestor de LLMs y embeddings.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub embedding_model: String,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Result<Self> {
        let api_key_var = match cfg.llm_provider {
            LlmProvider::OpenAI => "OPENAI_API_KEY",
            LlmProvider::Gemini => "GEMINI_API_KEY",
        };
        if std::env::var(api_key_var).map(|v| v.trim().is_empty()).unwrap_or(true) {
            return Err(anyhow!("Falta {api_key_var} en el entorno"));
        }

        Ok(Self {
            provider: cfg.llm_provider.clone(),
            embedding_model: cfg.llm_embedding_model.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        })
    }

    /// Extracción estructurada: el modelo debe devolver un `T` válido.
    async fn extract<T>(&self, preamble: &str, input: &str) -> Result<T>
    where
        T: JsonSchema + DeserializeOwned + Serialize + Send + Sync + 'static,
    {
        let value = match self.provider {
            LlmProvider::OpenAI => {
                let client = openai::Client::from_env();
                let extractor = client.extractor::<T>(&self.chat_model).preamble(preamble).build();
                extractor.extract(input).await?
            }
            LlmProvider::Gemini => {
                let client = gemini::Client::from_env();
                let extractor = client.extractor::<T>(&self.chat_model).preamble(preamble).build();
                extractor.extract(input).await?
            }
        };
        Ok(value)
    }

    async fn prompt_agent(&self, preamble: &str, context: Option<&str>, input: &str) -> Result<String> {
        let answer = match self.provider {
            LlmProvider::OpenAI => {
                let client = openai::Client::from_env();
                let mut builder = client.agent(&self.chat_model).preamble(preamble).temperature(0.0);
                if let Some(context) = context {
                    builder = builder.context(context);
                }
                builder.build().prompt(input).await?
            }
            LlmProvider::Gemini => {
                let client = gemini::Client::from_env();
                let mut builder = client.agent(&self.chat_model).preamble(preamble).temperature(0.0);
                if let Some(context) = context {
                    builder = builder.context(context);
                }
                builder.build().prompt(input).await?
            }
        };
        Ok(answer)
    }
}

#[async_trait]
impl Embedder for LlmManager {
    async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
        let expected = texts.len();
        let embeddings = match self.provider {
            LlmProvider::OpenAI => {
                let client = openai::Client::from_env();
                client.embedding_model(&self.embedding_model).embed_texts(texts).await?
            }
            LlmProvider::Gemini => {
                let client = gemini::Client::from_env();
                client.embedding_model(&self.embedding_model).embed_texts(texts).await?
            }
        };

        if embeddings.len() != expected {
            return Err(anyhow!(
                "Número de embeddings ({}) distinto al número de textos ({})",
                embeddings.len(),
                expected
            ));
        }
        Ok(embeddings.into_iter().map(|e| e.vec).collect())
    }
}

#[async_trait]
impl ChatModel for LlmManager {
    async fn select_route(&self, question: &str) -> Result<RouteSelection> {
        self.extract(ROUTER_PROMPT, question).await
    }

    async fn select_structure_tool(&self, question: &str) -> Result<StructureSelection> {
        self.extract(STRUCTURE_PROMPT, question).await
    }

    async fn select_content_tool(&self, question: &str) -> Result<ContentSelection> {
        self.extract(CONTENT_PROMPT, question).await
    }

    async fn answer_with_context(&self, question: &str, context: &str) -> Result<String> {
        let full_context = format!("Repository snippets:\n{context}");
        self.prompt_agent(ANSWER_PROMPT, Some(&full_context), question).await
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompt_agent("You are a helpful assistant.", None, prompt).await
    }
}

/// Dobles deterministas para los tests: sin red ni claves.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use std::sync::Mutex;

    use super::*;
    use crate::agents::Route;
    use crate::rag::ContentToolName;

    const DIMENSIONS: usize = 64;

    /// Bolsa de palabras con hashing: textos con palabras en común se parecen.
    #[derive(Debug, Default)]
    pub struct HashEmbedder;

    impl HashEmbedder {
        fn embed_one(text: &str) -> Vec<f64> {
            let mut vector = vec![0.0; DIMENSIONS];
            for word in text.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
                let bucket = word
                    .to_lowercase()
                    .bytes()
                    .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
                vector[bucket as usize % DIMENSIONS] += 1.0;
            }
            vector
        }
    }

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
            Ok(texts.iter().map(|t| Self::embed_one(t)).collect())
        }
    }

    /// `HashEmbedder` que anota el tamaño de cada lote recibido.
    #[derive(Debug, Default)]
    pub struct CountingEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    impl CountingEmbedder {
        pub fn batch_sizes(&self) -> Vec<usize> {
            self.batches.lock().map(|b| b.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
            if let Ok(mut batches) = self.batches.lock() {
                batches.push(texts.len());
            }
            HashEmbedder.embed_texts(texts).await
        }
    }

    /// Responde bien a las primeras `ok_calls` peticiones y luego falla.
    #[derive(Debug, Default)]
    pub struct FailingEmbedder {
        ok_calls: usize,
        calls: Mutex<usize>,
    }

    impl FailingEmbedder {
        pub fn after_calls(ok_calls: usize) -> Self {
            Self {
                ok_calls,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed_texts(&self, texts: Vec<String>) -> Result<Vec<Vec<f64>>> {
            let call = {
                let mut calls = self.calls.lock().map_err(|_| anyhow!("mutex envenenado"))?;
                *calls += 1;
                *calls
            };
            if call > self.ok_calls {
                return Err(anyhow!("servicio de embeddings caído (llamada {call})"));
            }
            HashEmbedder.embed_texts(texts).await
        }
    }

    /// Modelo con respuestas fijadas de antemano que registra cada llamada.
    #[derive(Debug, Default)]
    pub struct ScriptedModel {
        pub route: Option<Route>,
        pub structure: Option<StructureSelection>,
        pub content: Option<ContentToolName>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        pub fn routing_to(route: Route) -> Self {
            Self {
                route: Some(route),
                ..Self::default()
            }
        }

        pub fn with_structure(mut self, selection: StructureSelection) -> Self {
            self.structure = Some(selection);
            self
        }

        pub fn with_content(mut self, tool: ContentToolName) -> Self {
            self.content = Some(tool);
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }

        fn record(&self, call: String) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(call);
            }
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn select_route(&self, question: &str) -> Result<RouteSelection> {
            self.record(format!("route:{question}"));
            let route = self.route.ok_or_else(|| anyhow!("sin ruta programada"))?;
            Ok(RouteSelection { route })
        }

        async fn select_structure_tool(&self, question: &str) -> Result<StructureSelection> {
            self.record(format!("structure:{question}"));
            self.structure.clone().ok_or_else(|| anyhow!("sin herramienta estructural programada"))
        }

        async fn select_content_tool(&self, question: &str) -> Result<ContentSelection> {
            self.record(format!("content:{question}"));
            let tool = self.content.ok_or_else(|| anyhow!("sin herramienta de contenido programada"))?;
            Ok(ContentSelection { tool })
        }

        async fn answer_with_context(&self, question: &str, context: &str) -> Result<String> {
            self.record(format!("answer:{question}"));
            Ok(format!("ANSWER[{question}]\n{context}"))
        }

        async fn complete(&self, prompt: &str) -> Result<String> {
            self.record(format!("complete:{prompt}"));
            Ok("ok".to_string())
        }
    }
}
