//! Descarga de un repositorio completo mediante la API de contenidos de GitHub.
//!
//! Se recorre el árbol directorio a directorio. Una respuesta no exitosa deja
//! ese subárbol vacío (o el fichero a `None`) sin abortar; un error de
//! transporte sí aborta la descarga.

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{FetchedContent, RepoFiles};

#[derive(Debug, Deserialize)]
struct ContentEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

/// Cliente mínimo de `GET /repos/{owner}/{repo}/contents/{path}`.
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubFetcher {
    pub fn new(api_url: &str, token: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("github-repo-rag-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Devuelve todas las rutas de fichero del repositorio con su contenido.
    pub async fn fetch_repository(&self, owner: &str, repo: &str) -> Result<RepoFiles> {
        let mut files = RepoFiles::new();
        let mut pending = vec![String::new()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(owner, repo, &dir).await? {
                match entry.kind.as_str() {
                    "file" => {
                        let content = self.fetch_file(owner, repo, &entry.path).await?;
                        files.insert(entry.path, content);
                    }
                    "dir" => pending.push(entry.path),
                    other => debug!("Ignorando entrada '{}' de tipo {other}", entry.path),
                }
            }
        }

        info!("Descargados {} ficheros de {owner}/{repo}", files.len());
        Ok(files)
    }

    async fn list_directory(&self, owner: &str, repo: &str, path: &str) -> Result<Vec<ContentEntry>> {
        let response = self.get(owner, repo, path).await?;
        if !response.status().is_success() {
            warn!("No se pudo listar '{path}': {}", response.status());
            return Ok(Vec::new());
        }

        match response.json::<Vec<ContentEntry>>().await {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!("Listado inesperado para '{path}': {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn fetch_file(&self, owner: &str, repo: &str, path: &str) -> Result<Option<FetchedContent>> {
        let response = self.get(owner, repo, path).await?;
        if response.status() != StatusCode::OK {
            warn!("Fallo al descargar {path}: {}", response.status());
            return Ok(None);
        }

        let file: FileContent = match response.json().await {
            Ok(file) => file,
            Err(e) => {
                warn!("Respuesta inesperada para {path}: {e}");
                return Ok(None);
            }
        };
        Ok(decode_content(path, &file))
    }

    async fn get(&self, owner: &str, repo: &str, path: &str) -> Result<reqwest::Response> {
        let url = self.contents_url(owner, repo, path)?;
        let mut request = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }

    fn contents_url(&self, owner: &str, repo: &str, path: &str) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("URL base de la API inválida: {}", self.api_url))?
            .pop_if_empty()
            .extend(["repos", owner, repo, "contents"])
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}

/// Texto si el base64 decodifica a UTF-8 válido, bytes crudos si no.
fn decode_content(path: &str, file: &FileContent) -> Option<FetchedContent> {
    if file.encoding != "base64" {
        warn!("Codificación no soportada para {path}: '{}'", file.encoding);
        return None;
    }
    let compact: String = file.content.split_whitespace().collect();
    match STANDARD.decode(compact) {
        Ok(bytes) => Some(match String::from_utf8(bytes) {
            Ok(text) => FetchedContent::Text(text),
            Err(e) => FetchedContent::Binary(e.into_bytes()),
        }),
        Err(e) => {
            warn!("Error decodificando {path}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::get,
        Json, Router,
    };
    use serde_json::json;

    fn encoded(bytes: &[u8]) -> String {
        // La API real corta el base64 en líneas de 60 caracteres.
        let raw = STANDARD.encode(bytes);
        let (head, tail) = raw.split_at(raw.len() / 2);
        format!("{head}\n{tail}\n")
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "Bearer secret")
            .unwrap_or(false)
    }

    async fn root(headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Json(json!([
            { "type": "file", "path": "a.py" },
            { "type": "dir", "path": "src" },
            { "type": "symlink", "path": "link" }
        ]))
        .into_response()
    }

    async fn nested(Path((_, _, path)): Path<(String, String, String)>, headers: HeaderMap) -> Response {
        if !authorized(&headers) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        match path.as_str() {
            "a.py" => Json(json!({ "type": "file", "encoding": "base64", "content": encoded(b"print('hola')\n") })).into_response(),
            "src" => Json(json!([
                { "type": "file", "path": "src/logo.png" },
                { "type": "file", "path": "src/gone.txt" },
                { "type": "file", "path": "src/weird.txt" },
                { "type": "dir", "path": "src/private" }
            ]))
            .into_response(),
            "src/logo.png" => Json(json!({ "type": "file", "encoding": "base64", "content": encoded(&[0x89, 0x50, 0xff, 0xfe]) })).into_response(),
            "src/weird.txt" => Json(json!({ "type": "file", "encoding": "none", "content": "" })).into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn spawn_fake_api() -> String {
        let app = Router::new()
            .route("/repos/:owner/:repo/contents", get(root))
            .route("/repos/:owner/:repo/contents/*path", get(nested));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn walks_tree_and_classifies_content() {
        let base = spawn_fake_api().await;
        let fetcher = GitHubFetcher::new(&base, Some("secret".into())).unwrap();
        let files = fetcher.fetch_repository("octo", "demo").await.unwrap();

        let paths: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(paths, vec!["a.py", "src/gone.txt", "src/logo.png", "src/weird.txt"]);
        assert_eq!(files["a.py"], Some(FetchedContent::Text("print('hola')\n".into())));
        assert_eq!(files["src/logo.png"], Some(FetchedContent::Binary(vec![0x89, 0x50, 0xff, 0xfe])));
        assert_eq!(files["src/gone.txt"], None);
        assert_eq!(files["src/weird.txt"], None);
    }

    #[tokio::test]
    async fn unauthorized_root_yields_empty_result() {
        let base = spawn_fake_api().await;
        let fetcher = GitHubFetcher::new(&base, None).unwrap();
        let files = fetcher.fetch_repository("octo", "demo").await.unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn contents_url_encodes_segments() {
        let fetcher = GitHubFetcher::new("https://api.github.com/", None).unwrap();
        let url = fetcher.contents_url("o", "r", "docs/my file.md").unwrap();
        assert_eq!(url.as_str(), "https://api.github.com/repos/o/r/contents/docs/my%20file.md");
    }
}
