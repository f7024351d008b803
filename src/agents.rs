//! Despachador de tres niveles: router → {estructura, contenido} → herramienta.
//!
//! El modelo sólo clasifica y extrae argumentos; todo lo demás es un `match`
//! sobre enums cerrados. Ningún error de consulta sale de aquí como fallo:
//! se convierte en texto para el usuario.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::{
    app_state::AppContext,
    error::{QueryError, QueryResult},
    rag::{format_chunks, ContentRetriever, ContentTool},
    structure::{StructureQueries, StructureTool},
};

/// Respuesta fija para una pregunta vacía.
pub const EMPTY_QUESTION_PROMPT: &str =
    "Please enter a question about the repository content or structure.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Questions about the repository's file and directory structure: file counts,
    /// directory counts, listing files or directories, file extensions, hierarchy.
    StructureAgent,
    /// Questions about the repository's content: code, documentation, technologies,
    /// explanations, or general summaries of what the repository contains.
    ContentAgent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RouteSelection {
    /// The specialized agent that must answer the question.
    pub route: Route,
}

/// Punto de entrada de una consulta: siempre devuelve texto.
pub async fn ask(ctx: &AppContext, question: &str) -> String {
    if question.trim().is_empty() {
        return EMPTY_QUESTION_PROMPT.to_string();
    }

    info!("Consulta recibida: {question}");
    let raw = match route_question(ctx, question).await {
        Ok(answer) => answer,
        Err(e) => {
            error!("Error en el router: {e}");
            format!("An error occurred during router agent processing: {e}")
        }
    };
    clean_output(&raw)
}

/// El router elige el agente y devuelve su salida sin retocarla.
pub async fn route_question(ctx: &AppContext, question: &str) -> QueryResult<String> {
    let selection = ctx.chat.select_route(question).await.map_err(QueryError::llm)?;
    info!("Router -> {:?}", selection.route);

    let answer = match selection.route {
        Route::StructureAgent => structure_agent(ctx, question).await.unwrap_or_else(|e| {
            error!("Error invocando el agente de estructura: {e}");
            format!("Error routing query to Structure Agent: {e}")
        }),
        Route::ContentAgent => content_agent(ctx, question).await.unwrap_or_else(|e| {
            error!("Error invocando el agente de contenido: {e}");
            format!("Error routing query to Content Agent: {e}")
        }),
    };
    Ok(answer)
}

/// Elige una operación estructural, la ejecuta y la redacta como frase.
pub async fn structure_agent(ctx: &AppContext, question: &str) -> QueryResult<String> {
    let tool = select_structure_tool(ctx, question).await?;
    let queries = StructureQueries::new(ctx.store.as_ref());
    Ok(match queries.run(&tool).await {
        Ok(answer) => answer.to_string(),
        Err(e) => tool.describe_failure(&e),
    })
}

pub async fn select_structure_tool(ctx: &AppContext, question: &str) -> QueryResult<StructureTool> {
    let selection = ctx
        .chat
        .select_structure_tool(question)
        .await
        .map_err(QueryError::llm)?;
    StructureTool::try_from(selection)
}

/// Busca o resume y deja que el modelo redacte la respuesta sólo con los
/// chunks recuperados.
pub async fn content_agent(ctx: &AppContext, question: &str) -> QueryResult<String> {
    let tool = select_content_tool(ctx, question).await?;
    let retriever = ContentRetriever::new(ctx.store.as_ref(), ctx.embedder.as_ref(), &ctx.retrieval);

    let chunks = match retriever.run(&tool).await {
        Ok(chunks) => chunks,
        Err(e) => return Ok(tool.describe_failure(&e)),
    };
    if chunks.is_empty() {
        return Ok(tool.not_found_message().to_string());
    }

    ctx.chat
        .answer_with_context(question, &format_chunks(&chunks))
        .await
        .map_err(QueryError::llm)
}

pub async fn select_content_tool(ctx: &AppContext, question: &str) -> QueryResult<ContentTool> {
    let selection = ctx
        .chat
        .select_content_tool(question)
        .await
        .map_err(QueryError::llm)?;
    Ok(ContentTool::from_selection(&selection, question))
}

/// Quita un bloque ```text envolvente; si dentro hay un JSON con `output`,
/// se queda con ese valor.
pub fn clean_output(raw: &str) -> String {
    let Some(body) = raw.trim().strip_prefix("```text") else {
        return raw.to_string();
    };
    let body = body.trim_start_matches(['\r', '\n']);
    let body = body.strip_suffix("```").unwrap_or(body).trim();

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("output") {
            Some(Value::String(output)) => output.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::RetrievalConfig;
    use crate::llm::testing::{HashEmbedder, ScriptedModel};
    use crate::rag::ContentToolName;
    use crate::store::MemoryStore;
    use crate::structure::{StructureSelection, StructureToolName};

    fn context(model: Arc<ScriptedModel>) -> AppContext {
        AppContext {
            store: Arc::new(MemoryStore::new()),
            embedder: Arc::new(HashEmbedder),
            chat: model,
            retrieval: RetrievalConfig::default(),
        }
    }

    #[tokio::test]
    async fn empty_question_never_reaches_the_model() {
        let model = Arc::new(ScriptedModel::default());
        let ctx = context(model.clone());

        assert_eq!(ask(&ctx, "").await, EMPTY_QUESTION_PROMPT);
        assert_eq!(ask(&ctx, "   ").await, EMPTY_QUESTION_PROMPT);
        assert!(model.calls().is_empty());
    }

    #[tokio::test]
    async fn router_failure_is_rendered_as_text() {
        let model = Arc::new(ScriptedModel::default());
        let ctx = context(model);

        let answer = ask(&ctx, "How many files?").await;
        assert!(answer.starts_with("An error occurred during router agent processing:"));
    }

    #[tokio::test]
    async fn structure_selection_without_path_is_a_routing_error() {
        let model = Arc::new(ScriptedModel::routing_to(Route::StructureAgent).with_structure(
            StructureSelection {
                tool: StructureToolName::CountFilesInDirectory,
                directory_path: None,
            },
        ));
        let ctx = context(model);

        let err = select_structure_tool(&ctx, "How many files in the folder?").await.unwrap_err();
        assert!(matches!(err, QueryError::Routing(_)));

        let answer = ask(&ctx, "How many files in the folder?").await;
        assert!(answer.starts_with("Error routing query to Structure Agent: routing error"));
    }

    #[tokio::test]
    async fn content_agent_reports_not_found_without_answering() {
        let model = Arc::new(
            ScriptedModel::routing_to(Route::ContentAgent).with_content(ContentToolName::ContentSearch),
        );
        let ctx = context(model.clone());

        assert_eq!(ask(&ctx, "What is X?").await, "No relevant document chunks found.");
        assert!(!model.calls().iter().any(|c| c.starts_with("answer:")));
    }

    #[test]
    fn clean_output_unwraps_fenced_json() {
        assert_eq!(clean_output("```text\n{\"output\": \"42 files\"}\n```"), "42 files");
        assert_eq!(clean_output("```text\nplain answer\n```"), "plain answer");
        assert_eq!(clean_output("untouched"), "untouched");
    }
}
