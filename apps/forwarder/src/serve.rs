//! Static directory server for `ntnl serve`

use axum::Router;
use ntnl_common::{Result, TunnelError};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{error, info};

/// Router serving files under `dir`, with `index.html` for directories
pub fn static_router(dir: impl AsRef<Path>) -> Router {
    Router::new().fallback_service(ServeDir::new(dir).append_index_html_on_directories(true))
}

/// Check that `dir` exists and is a directory
pub fn resolve_directory(dir: &Path) -> Result<PathBuf> {
    if !dir.is_dir() {
        return Err(TunnelError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Directory not found: {}", dir.display()),
        )));
    }
    Ok(dir.canonicalize()?)
}

/// Bind 127.0.0.1:`port` and serve `dir` in the background
///
/// Returns the bound address so callers can pass port 0.
pub async fn spawn_static_server(dir: &Path, port: u16) -> Result<(SocketAddr, JoinHandle<()>)> {
    let root = resolve_directory(dir)?;
    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], port))).await?;
    let addr = listener.local_addr()?;
    info!("Serving {} on http://{}", root.display(), addr);

    let app = static_router(root);
    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Static server stopped: {}", e);
        }
    });

    Ok((addr, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_directory_is_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(resolve_directory(&missing).is_err());

        let file = dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(resolve_directory(&file).is_err());
    }

    #[tokio::test]
    async fn test_serves_files_and_index() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("hello.txt"), "hello").unwrap();

        let (addr, handle) = spawn_static_server(dir.path(), 0).await.unwrap();
        let client = reqwest::Client::new();

        let body = client
            .get(format!("http://{}/hello.txt", addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "hello");

        let body = client
            .get(format!("http://{}/", addr))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "<h1>home</h1>");

        let status = client
            .get(format!("http://{}/missing", addr))
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, 404);

        handle.abort();
    }
}
