//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// File name of the palm detection network.
pub const PALM_MODEL_FILE_NAME: &str = "palm_detection.onnx";
/// File name of the hand landmark network.
pub const LANDMARK_MODEL_FILE_NAME: &str = "hand_landmark.onnx";

/// Default directory of the model files in the user cache directory.
pub fn default_model_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gesture_server")
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?.error_for_status()?;

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Make sure the model file exists, downloading it from `url` if necessary.
pub async fn ensure_model_file(model_path: &Path, url: Option<&str>) -> Result<()> {
    if model_path.exists() {
        return Ok(());
    }

    let Some(url) = url else {
        bail!(
            "model file {} not found and no download URL given",
            model_path.display()
        );
    };

    if let Some(parent) = model_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    log::info!("Downloading model from {} to {}", url, model_path.display());
    download_file(&Client::new(), url, model_path)
        .await
        .with_context(|| format!("failed to download model from {url}"))
}
