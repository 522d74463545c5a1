//! Model download and installation management.
//!
//! Models are stored in the user's cache directory as `ggml-<name>.bin`.
//! Downloads stream through a SHA-1 hasher and report byte progress through
//! the same callback the pipeline loader uses.

use crate::config::ModelConfig;
use crate::engine::types::{LoadProgress, ProgressCallback};
use crate::error::{Result, ScribeError};
use crate::models::catalog;
use std::fs;
use std::path::{Path, PathBuf};

/// Get the directory where models are stored.
///
/// Uses `~/.cache/streamscribe/models/` on Linux/Unix.
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("streamscribe")
        .join("models")
}

/// Path of a model file inside `dir`. The file may not exist.
pub fn model_path_in(dir: &Path, name: &str) -> PathBuf {
    dir.join(catalog::file_name(name))
}

/// Path of a model file in the cache directory. The file may not exist.
pub fn model_path(name: &str) -> PathBuf {
    model_path_in(&models_dir(), name)
}

pub fn is_model_installed(name: &str) -> bool {
    model_path(name).is_file()
}

/// Model file to load for `config`: the explicit path if set, otherwise the
/// cached file for the configured name.
pub fn configured_model_path(config: &ModelConfig) -> PathBuf {
    match &config.path {
        Some(path) => path.clone(),
        None => model_path(&config.name),
    }
}

/// List model names installed in `dir`, sorted.
///
/// Discovers every `ggml-*.bin` file, not just catalog models.
pub fn list_installed_in(dir: &Path) -> Vec<String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            let file_name = entry.file_name();
            let model = file_name
                .to_str()?
                .strip_prefix("ggml-")?
                .strip_suffix(".bin")?
                .to_string();
            entry.path().is_file().then_some(model)
        })
        .collect();

    names.sort();
    names
}

pub fn list_installed_models() -> Vec<String> {
    list_installed_in(&models_dir())
}

/// Format model information for display.
pub fn format_model_info(model: &catalog::ModelInfo) -> String {
    let status = if is_model_installed(model.name) {
        "[installed]"
    } else {
        "[not installed]"
    };
    format!("{:16} {:5} MB   {}", model.name, model.size_mb, status)
}

/// Percentage of `loaded` over `total`, 0 when the total is unknown.
pub fn percent(loaded: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        (loaded as f64 / total as f64 * 100.0).min(100.0)
    }
}

/// Download a catalog model into the cache directory.
///
/// Returns the installed path; an already installed model is not fetched
/// again.
///
/// # Errors
///
/// Returns an error if:
/// - The model is not in the catalog
/// - The download fails
/// - The SHA-1 checksum doesn't match
/// - The file cannot be written
pub async fn download_model(name: &str, progress: ProgressCallback) -> Result<PathBuf> {
    let path = model_path(name);
    if path.is_file() {
        return Ok(path);
    }

    let info = catalog::get_model(name).ok_or_else(|| ScribeError::Download {
        message: format!(
            "Model '{}' not found in catalog.\n\
             Run 'streamscribe models list' to see available models.",
            name
        ),
    })?;

    download_to_path(&info.url(), info.sha1, &path, progress).await?;
    Ok(path)
}

/// Fetch `url` into `output_path`, verifying `sha1` if non-empty.
///
/// Data is written to a `.part` file that is renamed once complete, so an
/// interrupted download never looks installed.
#[cfg(feature = "model-download")]
pub async fn download_to_path(
    url: &str,
    sha1: &str,
    output_path: &Path,
    progress: ProgressCallback,
) -> Result<()> {
    use futures_util::StreamExt;
    use sha1::{Digest, Sha1};
    use std::io::Write;
    use tracing::{info, warn};

    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent).map_err(|e| ScribeError::Download {
            message: format!("Failed to create models directory: {}", e),
        })?;
    }

    let file = output_path
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.to_string());
    info!(url, path = %output_path.display(), "downloading model");
    progress(LoadProgress::Initiate { file: file.clone() });

    let response = reqwest::Client::new()
        .get(url)
        .send()
        .await
        .map_err(|e| ScribeError::Download {
            message: format!("Failed to start download: {}", e),
        })?;

    if !response.status().is_success() {
        return Err(ScribeError::Download {
            message: format!("Download failed with status: {}", response.status()),
        });
    }

    let total = response.content_length().unwrap_or(0);
    let partial_path = output_path.with_extension("bin.part");
    let mut out = fs::File::create(&partial_path).map_err(|e| ScribeError::Download {
        message: format!("Failed to create output file: {}", e),
    })?;

    let mut hasher = Sha1::new();
    let mut stream = response.bytes_stream();
    let mut loaded: u64 = 0;
    let mut last_reported = -1.0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ScribeError::Download {
            message: format!("Failed to read download chunk: {}", e),
        })?;
        out.write_all(&chunk).map_err(|e| ScribeError::Download {
            message: format!("Failed to write to file: {}", e),
        })?;
        hasher.update(&chunk);
        loaded += chunk.len() as u64;

        // One report per whole percent keeps the message rate bounded.
        let pct = percent(loaded, total);
        if pct.floor() > last_reported {
            last_reported = pct.floor();
            progress(LoadProgress::Progress {
                file: file.clone(),
                progress: pct,
                loaded,
                total,
            });
        }
    }
    drop(out);

    if !sha1.is_empty() {
        let calculated = format!("{:x}", hasher.finalize());
        if calculated != sha1 {
            if let Err(e) = fs::remove_file(&partial_path) {
                warn!(error = %e, "failed to remove corrupted download");
            }
            return Err(ScribeError::Download {
                message: format!(
                    "SHA-1 checksum mismatch. Expected: {}, got: {}",
                    sha1, calculated
                ),
            });
        }
    }

    fs::rename(&partial_path, output_path).map_err(|e| ScribeError::Download {
        message: format!("Failed to move download into place: {}", e),
    })?;
    progress(LoadProgress::Done { file });
    info!(path = %output_path.display(), "model installed");
    Ok(())
}

#[cfg(not(feature = "model-download"))]
pub async fn download_to_path(
    url: &str,
    _sha1: &str,
    _output_path: &Path,
    _progress: ProgressCallback,
) -> Result<()> {
    Err(ScribeError::Download {
        message: format!(
            "Cannot fetch {}: this binary was built without the `model-download` feature.",
            url
        ),
    })
}

/// Progress callback drawing a terminal progress bar on stderr.
#[cfg(feature = "model-download")]
pub fn progress_bar() -> ProgressCallback {
    use indicatif::{ProgressBar, ProgressStyle};
    use std::sync::Arc;

    let bar = ProgressBar::new(0);
    if let Ok(style) = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
    {
        bar.set_style(style.progress_chars("#>-"));
    }

    Arc::new(move |report| match report {
        LoadProgress::Initiate { file } => bar.set_message(file),
        LoadProgress::Progress { loaded, total, .. } => {
            bar.set_length(total);
            bar.set_position(loaded);
        }
        LoadProgress::Done { .. } => bar.finish_with_message("downloaded"),
        LoadProgress::Ready { .. } => {}
    })
}
