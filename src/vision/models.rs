//! Model artifact management for ONNX Runtime
//!
//! Handles downloading, caching, and loading of the digit detector and the
//! CRNN recognizer. Artifacts live under the application data directory and
//! are fetched once; a failed load at startup is fatal, never a per-upload
//! error.

use anyhow::{Context, Result};
use futures_util::StreamExt;
use ort::session::{builder::GraphOptimizationLevel, Session};
use parking_lot::{Mutex, MutexGuard};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;
use tracing::{debug, info};

use crate::vision::StrategyKind;

/// Environment variable that blocks all model downloads.
pub const OFFLINE_ENV: &str = "METERSCAN_OFFLINE";

/// Identifier for the model artifacts the pipeline can load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    /// Per-digit object detector
    Detector,
    /// Single-line CRNN recognizer
    Recognizer,
    /// Character dictionary for the recognizer
    Dictionary,
}

impl ModelKind {
    /// File name under the models directory
    pub fn filename(&self) -> &'static str {
        match self {
            ModelKind::Detector => "detector.onnx",
            ModelKind::Recognizer => "recognizer.onnx",
            ModelKind::Dictionary => "dict.txt",
        }
    }

    /// Download URL for this artifact
    pub fn download_url(&self) -> &'static str {
        match self {
            ModelKind::Detector => {
                "https://huggingface.co/meterscan/meter-digit-detector/resolve/main/detector.onnx"
            }
            ModelKind::Recognizer => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/rec.onnx"
            }
            ModelKind::Dictionary => {
                "https://huggingface.co/monkt/paddleocr-onnx/resolve/main/languages/english/dict.txt"
            }
        }
    }

    /// Plausible file size bounds used as a cheap integrity check
    pub fn expected_size_range(&self) -> (u64, u64) {
        match self {
            ModelKind::Detector => (3_000_000, 40_000_000),
            ModelKind::Recognizer => (7_000_000, 10_000_000),
            ModelKind::Dictionary => (500, 10_000),
        }
    }

    /// Expected SHA256 checksum, when pinned
    pub fn expected_sha256(&self) -> Option<&'static str> {
        // Not pinned yet; verification is skipped until release artifacts exist
        match self {
            ModelKind::Detector => None,
            ModelKind::Recognizer => None,
            ModelKind::Dictionary => None,
        }
    }

    /// Display name for log lines
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::Detector => "Digit Detector",
            ModelKind::Recognizer => "Line Recognizer",
            ModelKind::Dictionary => "Character Dictionary",
        }
    }

    /// The artifacts a recognition strategy needs before it can load.
    pub fn required_for(strategy: StrategyKind) -> &'static [ModelKind] {
        match strategy {
            StrategyKind::Detection => &[ModelKind::Detector],
            StrategyKind::Ocr => &[ModelKind::Recognizer, ModelKind::Dictionary],
        }
    }
}

/// Manifest tracking downloaded artifacts
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelManifest {
    pub version: String,
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ModelInfo {
    pub kind: String,
    pub filename: String,
    pub size_bytes: u64,
    pub sha256: Option<String>,
    pub downloaded_at: String,
}

impl Default for ModelManifest {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            models: Vec::new(),
        }
    }
}

/// Downloads and caches model artifacts under one directory
pub struct ModelManager {
    models_dir: PathBuf,
}

impl ModelManager {
    /// Create a manager rooted at the application data directory
    pub fn new() -> Result<Self> {
        let data_dir = crate::storage::get_data_dir()?;
        Self::with_dir(data_dir.join("models"))
    }

    /// Create a manager with a custom directory
    pub fn with_dir(models_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn model_path(&self, kind: ModelKind) -> PathBuf {
        self.models_dir.join(kind.filename())
    }

    /// Whether an artifact is present with a plausible size
    pub fn is_model_available(&self, kind: ModelKind) -> bool {
        let path = self.model_path(kind);
        if !path.exists() {
            return false;
        }

        if let Ok(metadata) = std::fs::metadata(&path) {
            let (min, max) = kind.expected_size_range();
            let size = metadata.len();
            size >= min && size <= max
        } else {
            false
        }
    }

    /// Whether every artifact the given strategy needs is present
    pub fn models_ready(&self, strategy: StrategyKind) -> bool {
        ModelKind::required_for(strategy)
            .iter()
            .all(|&kind| self.is_model_available(kind))
    }

    /// Download an artifact if not already available, returning its path
    pub fn ensure_model(&self, kind: ModelKind) -> Result<PathBuf> {
        let path = self.model_path(kind);

        if self.is_model_available(kind) {
            debug!("{} already available at {:?}", kind.display_name(), path);
            return Ok(path);
        }

        self.download_model(kind)?;
        Ok(path)
    }

    /// Ensure every artifact the given strategy needs
    pub fn ensure_for(&self, strategy: StrategyKind) -> Result<()> {
        for &kind in ModelKind::required_for(strategy) {
            self.ensure_model(kind)?;
        }
        Ok(())
    }

    /// Download a specific artifact (blocking)
    fn download_model(&self, kind: ModelKind) -> Result<()> {
        let url = kind.download_url();
        let path = self.model_path(kind);

        info!("Downloading {} from {}", kind.display_name(), url);

        if std::env::var(OFFLINE_ENV).is_ok() {
            anyhow::bail!(
                "{} set: cannot download models. Fetch {} manually and place it at {:?}",
                OFFLINE_ENV,
                url,
                path
            );
        }

        let rt = Runtime::new().context("Failed to create tokio runtime")?;
        rt.block_on(async { self.download_file_async(url, &path, kind).await })?;

        if !self.is_model_available(kind) {
            anyhow::bail!("Download completed but {} failed verification", kind.display_name());
        }

        self.update_manifest_for_model(kind)?;

        info!("Successfully downloaded {}", kind.display_name());
        Ok(())
    }

    async fn download_file_async(&self, url: &str, path: &Path, kind: ModelKind) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .context("Failed to create HTTP client")?;

        let response = client
            .get(url)
            .send()
            .await
            .context("Failed to send download request")?;

        if !response.status().is_success() {
            anyhow::bail!("Download failed with status {}: {}", response.status(), url);
        }

        let total_size = response.content_length();
        debug!("Download size: {:?} bytes", total_size);

        // Stream into a temp file so a partial download never shadows a model
        let temp_path = path.with_extension("tmp");
        let mut file = std::fs::File::create(&temp_path).context("Failed to create temp file")?;

        let mut hasher = Sha256::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Error reading download stream")?;
            file.write_all(&chunk).context("Failed to write to temp file")?;
            hasher.update(&chunk);
        }

        file.flush().context("Failed to flush temp file")?;
        drop(file);

        let hash = format!("{:x}", hasher.finalize());
        if let Some(expected_hash) = kind.expected_sha256() {
            if hash != expected_hash {
                std::fs::remove_file(&temp_path).ok();
                anyhow::bail!(
                    "Checksum mismatch for {}: expected {}, got {}",
                    kind.filename(),
                    expected_hash,
                    hash
                );
            }
            debug!("Checksum verified for {}", kind.display_name());
        }

        std::fs::rename(&temp_path, path)
            .context("Failed to move downloaded file to final location")?;

        Ok(())
    }

    fn update_manifest_for_model(&self, kind: ModelKind) -> Result<()> {
        let mut manifest = self.load_manifest().unwrap_or_default();

        let path = self.model_path(kind);
        let metadata = std::fs::metadata(&path)?;

        let hash = {
            let data = std::fs::read(&path)?;
            let mut hasher = Sha256::new();
            hasher.update(&data);
            format!("{:x}", hasher.finalize())
        };

        let info = ModelInfo {
            kind: format!("{:?}", kind),
            filename: kind.filename().to_string(),
            size_bytes: metadata.len(),
            sha256: Some(hash),
            downloaded_at: crate::storage::unix_timestamp().to_string(),
        };

        if let Some(existing) = manifest
            .models
            .iter_mut()
            .find(|m| m.filename == info.filename)
        {
            *existing = info;
        } else {
            manifest.models.push(info);
        }

        self.save_manifest(&manifest)?;
        Ok(())
    }

    pub fn load_manifest(&self) -> Result<ModelManifest> {
        let manifest_path = self.models_dir.join("manifest.json");
        if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            let manifest: ModelManifest = serde_json::from_str(&content)?;
            Ok(manifest)
        } else {
            Ok(ModelManifest::default())
        }
    }

    pub fn save_manifest(&self, manifest: &ModelManifest) -> Result<()> {
        let manifest_path = self.models_dir.join("manifest.json");
        let content = serde_json::to_string_pretty(manifest)?;
        std::fs::write(manifest_path, content)?;
        Ok(())
    }
}

/// Loaded ONNX session plus its cached tensor names.
///
/// `ort` requires `&mut Session` to run inference, so the session sits behind
/// a mutex; the weights themselves are read-only, which keeps one loaded
/// model safe to share across concurrent pipeline invocations.
pub struct OnnxSession {
    session: Mutex<Session>,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl OnnxSession {
    /// Load a model file into a new session
    pub fn new(model_path: &Path) -> Result<Self> {
        info!("Loading ONNX model from {:?}", model_path);

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .context("Failed to load ONNX model")?;

        let input_names: Vec<String> = session.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();

        info!(
            "Model loaded. Inputs: {:?}, Outputs: {:?}",
            input_names, output_names
        );

        Ok(Self {
            session: Mutex::new(session),
            input_names,
            output_names,
        })
    }

    /// Lock the session for one inference call
    pub fn lock(&self) -> MutexGuard<'_, Session> {
        self.session.lock()
    }

    pub fn input_names(&self) -> &[String] {
        &self.input_names
    }

    pub fn output_names(&self) -> &[String] {
        &self.output_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_kind_filenames() {
        assert_eq!(ModelKind::Detector.filename(), "detector.onnx");
        assert_eq!(ModelKind::Recognizer.filename(), "recognizer.onnx");
        assert_eq!(ModelKind::Dictionary.filename(), "dict.txt");
    }

    #[test]
    fn test_required_artifacts_per_strategy() {
        assert_eq!(
            ModelKind::required_for(StrategyKind::Detection),
            &[ModelKind::Detector]
        );
        assert_eq!(
            ModelKind::required_for(StrategyKind::Ocr),
            &[ModelKind::Recognizer, ModelKind::Dictionary]
        );
    }

    #[test]
    fn test_manager_reports_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();

        assert!(!manager.is_model_available(ModelKind::Detector));
        assert!(!manager.models_ready(StrategyKind::Detection));
        assert!(!manager.models_ready(StrategyKind::Ocr));
    }

    #[test]
    fn test_undersized_file_is_not_available() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();

        // A stub far below the expected size range must not count as present
        std::fs::write(manager.model_path(ModelKind::Detector), b"stub").unwrap();
        assert!(!manager.is_model_available(ModelKind::Detector));
    }

    #[test]
    fn test_manifest_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ModelManager::with_dir(dir.path().to_path_buf()).unwrap();

        let mut manifest = ModelManifest::default();
        manifest.models.push(ModelInfo {
            kind: "Detector".to_string(),
            filename: "detector.onnx".to_string(),
            size_bytes: 42,
            sha256: None,
            downloaded_at: "0".to_string(),
        });

        manager.save_manifest(&manifest).unwrap();
        let loaded = manager.load_manifest().unwrap();
        assert_eq!(loaded.models.len(), 1);
        assert_eq!(loaded.models[0].filename, "detector.onnx");
    }
}
