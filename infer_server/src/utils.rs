//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use reqwest::Client;

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Directory where downloaded models are kept between runs.
pub fn model_cache_dir() -> Result<PathBuf> {
    let dir = dirs::cache_dir()
        .context("no cache directory on this platform")?
        .join(env!("CARGO_PKG_NAME"));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    Ok(dir)
}

/// Path of a model file in `dir`, downloading it from `url` if it is not there yet.
pub async fn cached_file(url: &str, dir: &Path, filename: &str) -> Result<PathBuf> {
    let filepath = dir.join(filename);
    if filepath.exists() {
        log::debug!("Using cached {}", filepath.display());
        return Ok(filepath);
    }

    log::info!("Downloading {} to {}", url, filepath.display());
    // Only complete downloads end up under the final name
    let partial = dir.join(format!("{}.part", filename));
    download_file(&Client::new(), url, &partial)
        .await
        .with_context(|| format!("failed to download {}", url))?;
    std::fs::rename(&partial, &filepath)?;

    Ok(filepath)
}

#[cfg(test)]
mod test {
    use std::net::SocketAddr;

    use axum::{routing::get, Router};

    use super::*;

    async fn serve_model_file() -> Result<SocketAddr> {
        let app = Router::new().route("/model.onnx", get(|| async { "not really onnx" }));
        let server = axum::Server::bind(&"127.0.0.1:0".parse()?).serve(app.into_make_service());
        let addr = server.local_addr();
        tokio::spawn(server);

        Ok(addr)
    }

    fn scratch_dir(name: &str) -> Result<PathBuf> {
        let dir = std::env::temp_dir().join(format!("infer_server-{}-{}", name, std::process::id()));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        Ok(dir)
    }

    #[tokio::test]
    async fn downloads_once_and_reuses_cached_file() -> Result<()> {
        let addr = serve_model_file().await?;
        let dir = scratch_dir("cache")?;
        let url = format!("http://{}/model.onnx", addr);

        let path = cached_file(&url, &dir, "model.onnx").await?;
        assert_eq!(std::fs::read_to_string(&path)?, "not really onnx");
        assert!(!dir.join("model.onnx.part").exists());

        // A second lookup must not hit the network
        std::fs::write(&path, "cached")?;
        let path = cached_file(&url, &dir, "model.onnx").await?;
        assert_eq!(std::fs::read_to_string(&path)?, "cached");

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn failed_download_leaves_no_model_file() -> Result<()> {
        let addr = serve_model_file().await?;
        let dir = scratch_dir("missing")?;
        let url = format!("http://{}/missing.onnx", addr);

        assert!(cached_file(&url, &dir, "missing.onnx").await.is_err());
        assert!(!dir.join("missing.onnx").exists());

        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
