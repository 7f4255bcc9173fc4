//! Utility functions
//!
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use futures::StreamExt;
use reqwest::Client;

use crate::{config::DetectionConfig, error::DetectError};

/// Download a file from a URL to a given filepath, reporting the fraction received.
///
/// The body is written next to `filepath` first and moved into place once complete.
pub async fn download_file(
    client: &Client,
    url: &str,
    filepath: impl AsRef<Path>,
    on_progress: &mut dyn FnMut(f32),
) -> Result<(), DetectError> {
    let filepath = filepath.as_ref();
    let fail = |err: &dyn std::fmt::Display| DetectError::ModelLoad(format!("{}: {}", url, err));

    let resp = client
        .get(url)
        .send()
        .await
        .and_then(|resp| resp.error_for_status())
        .map_err(|err| fail(&err))?;
    let total = resp.content_length();

    if let Some(parent) = filepath.parent() {
        fs::create_dir_all(parent).map_err(|err| fail(&err))?;
    }
    let partial = filepath.with_extension("part");
    let mut file = File::create(&partial).map_err(|err| fail(&err))?;

    let mut received = 0_u64;
    let mut body = resp.bytes_stream();
    let written: Result<(), DetectError> = async {
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|err| fail(&err))?;
            file.write_all(&chunk).map_err(|err| fail(&err))?;
            received += chunk.len() as u64;
            if let Some(total) = total.filter(|total| *total > 0) {
                on_progress((received as f32 / total as f32).min(1.0));
            }
        }
        file.flush().map_err(|err| fail(&err))?;
        fs::rename(&partial, filepath).map_err(|err| fail(&err))
    }
    .await;

    if let Err(err) = written {
        drop(file);
        if let Err(remove_err) = fs::remove_file(&partial) {
            log::warn!("Unable to remove {}: {}", partial.display(), remove_err);
        }
        return Err(err);
    }
    on_progress(1.0);
    log::info!("Downloaded {} ({} bytes)", url, received);

    Ok(())
}

/// Where a remote model artifact is cached locally.
pub fn cached_model_path(config: &DetectionConfig) -> PathBuf {
    config
        .cache_dir
        .join("models")
        .join(format!("{}_web_model", config.model_name))
        .join("model.onnx")
}
