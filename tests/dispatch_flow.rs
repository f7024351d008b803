use std::sync::Arc;

use github_repo_rag_agent::{
    agents::{self, Route},
    app_state::AppContext,
    config::RetrievalConfig,
    ingest::index_files,
    llm::testing::{HashEmbedder, ScriptedModel},
    models::{FetchedContent, RepoFiles},
    rag::{ContentSelection, ContentTool, ContentToolName},
    store::{MemoryStore, RepoStore},
    structure::{StructureSelection, StructureToolName},
};

fn repo_files() -> RepoFiles {
    [
        ("README.md", "Project readme with setup steps for contributors."),
        ("main.py", "print('hello world')"),
        ("src/lib.py", "from .auth import login\n"),
        ("src/auth/login.py", "The authentication module verifies user credentials and issues session tokens."),
        ("src/utils/helpers.py", "def slugify(value):\n    return value.lower()\n"),
        ("src/utils/dates.py", "def today():\n    return None\n"),
        ("docs/guide.md", "Deployment guide: build the image and push it."),
    ]
    .into_iter()
    .map(|(path, text)| (path.to_string(), Some(FetchedContent::Text(text.to_string()))))
    .chain([("assets/logo.png".to_string(), Some(FetchedContent::Binary(vec![0x89, 0x50])))])
    .collect()
}

async fn indexed_context(model: Arc<ScriptedModel>) -> AppContext {
    let store = Arc::new(MemoryStore::new());
    index_files(store.as_ref(), &HashEmbedder, &RetrievalConfig::default(), &repo_files())
        .await
        .unwrap();
    AppContext {
        store,
        embedder: Arc::new(HashEmbedder),
        chat: model,
        retrieval: RetrievalConfig::default(),
    }
}

fn structure_model(tool: StructureToolName, directory_path: Option<&str>) -> Arc<ScriptedModel> {
    Arc::new(ScriptedModel::routing_to(Route::StructureAgent).with_structure(StructureSelection {
        tool,
        directory_path: directory_path.map(str::to_string),
    }))
}

#[tokio::test]
async fn structure_question_is_answered_from_metadata_only() {
    let model = structure_model(StructureToolName::CountTotalFiles, None);
    let ctx = indexed_context(model.clone()).await;

    let answer = agents::ask(&ctx, "How many files are in this repository?").await;

    assert_eq!(answer, "Total number of unique original files indexed: 7");
    let calls = model.calls();
    assert!(calls.iter().any(|c| c.starts_with("structure:")));
    assert!(!calls.iter().any(|c| c.starts_with("content:") || c.starts_with("answer:")));
}

#[tokio::test]
async fn subdirectory_listing_goes_through_the_whole_pipeline() {
    let model = structure_model(StructureToolName::ListSubdirectoriesInDirectory, Some("src/"));
    let ctx = indexed_context(model).await;

    let answer = agents::ask(&ctx, "Which folders are inside src?").await;
    assert_eq!(answer, "Subdirectories directly in directory 'src': src/auth, src/utils");
}

#[tokio::test]
async fn unknown_directory_reaches_the_user_as_text() {
    let model = structure_model(StructureToolName::ListSubdirectoriesInDirectory, Some("lib"));
    let ctx = indexed_context(model).await;

    let answer = agents::ask(&ctx, "What is inside lib?").await;
    assert_eq!(answer, "Directory 'lib' not found or has no subdirectories indexed.");
}

#[tokio::test]
async fn content_question_is_answered_from_retrieved_chunks() {
    let model = Arc::new(ScriptedModel::routing_to(Route::ContentAgent).with_content(ContentToolName::ContentSearch));
    let ctx = indexed_context(model.clone()).await;
    let question = "What does the authentication module do?";

    let answer = agents::ask(&ctx, question).await;

    assert!(answer.starts_with(&format!("ANSWER[{question}]\nSource: src/auth/login.py")));
    assert!(answer.contains("verifies user credentials"));
    // Búsqueda con k = 5 sobre siete ficheros de un chunk
    assert_eq!(answer.matches("Source: ").count(), 5);
    assert!(model.calls().contains(&format!("answer:{question}")));
    assert!(!model.calls().iter().any(|c| c.starts_with("structure:")));
}

#[test]
fn content_search_uses_the_question_verbatim() {
    let question = "  What does the authentication module do?";
    let selection = ContentSelection {
        tool: ContentToolName::ContentSearch,
    };

    assert_eq!(
        ContentTool::from_selection(&selection, question),
        ContentTool::Search {
            query: question.to_string()
        }
    );
}

#[tokio::test]
async fn summary_uses_a_wider_sample_than_search() {
    let model =
        Arc::new(ScriptedModel::routing_to(Route::ContentAgent).with_content(ContentToolName::SummarizeRepoContent));
    let ctx = indexed_context(model).await;

    let answer = agents::ask(&ctx, "Give me an overview of the repo").await;

    // Siete ficheros de un chunk: el resumen (k = 20) los trae todos
    assert_eq!(answer.matches("Source: ").count(), 7);
}

#[test]
fn reindexing_the_same_repository_is_idempotent() {
    tokio_test::block_on(async {
        let store = MemoryStore::new();
        let cfg = RetrievalConfig::default();

        let first = index_files(&store, &HashEmbedder, &cfg, &repo_files()).await.unwrap();
        let second = index_files(&store, &HashEmbedder, &cfg, &repo_files()).await.unwrap();
        assert_eq!(first, second);

        let stats = store.stats().await.unwrap();
        assert_eq!((stats.files, stats.chunks), (7, 7));
        assert_eq!(first.files_skipped, 1);
        assert_eq!(first.directories, 4);
    });
}
