use crate::defaults;
use crate::error::{Result, ScribeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub model: ModelConfig,
    pub decoding: DecodingConfig,
    pub ipc: IpcConfig,
}

/// Which model to load and how
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Catalog name, e.g. `tiny.en`.
    pub name: String,
    /// Explicit model file; bypasses the catalog and the cache directory.
    pub path: Option<PathBuf>,
    pub language: String,
    /// Inference threads; engine default when unset.
    pub threads: Option<usize>,
    /// Download the model on first use if it is not cached.
    pub download: bool,
}

/// Windowing and preview parameters handed to every request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DecodingConfig {
    pub chunk_length_s: u32,
    pub stride_length_s: u32,
    pub partial_every: u64,
}

/// Socket host configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct IpcConfig {
    pub socket: Option<PathBuf>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: defaults::DEFAULT_MODEL.to_string(),
            path: None,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            threads: None,
            download: true,
        }
    }
}

impl Default for DecodingConfig {
    fn default() -> Self {
        Self {
            chunk_length_s: defaults::CHUNK_LENGTH_S,
            stride_length_s: defaults::STRIDE_LENGTH_S,
            partial_every: defaults::PARTIAL_EVERY,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(ScribeError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Load from `path` (or the default location), apply environment
    /// overrides and validate.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_or_default(path)?,
            None => Self::load_or_default(&Self::default_path())?,
        };
        let config = config.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - STREAMSCRIBE_MODEL → model.name
    /// - STREAMSCRIBE_LANGUAGE → model.language
    /// - STREAMSCRIBE_SOCKET → ipc.socket
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("STREAMSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.model.name = model;
        }

        if let Ok(language) = std::env::var("STREAMSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.model.language = language;
        }

        if let Ok(socket) = std::env::var("STREAMSCRIBE_SOCKET")
            && !socket.is_empty()
        {
            self.ipc.socket = Some(PathBuf::from(socket));
        }

        self
    }

    /// Reject decoding parameters the windowing cannot work with.
    pub fn validate(&self) -> Result<()> {
        let decoding = &self.decoding;
        if decoding.chunk_length_s == 0 {
            return Err(invalid("decoding.chunk_length_s", "must be positive"));
        }
        if decoding.stride_length_s == 0 {
            return Err(invalid("decoding.stride_length_s", "must be positive"));
        }
        if decoding
            .stride_length_s
            .checked_mul(2)
            .is_none_or(|both| both >= decoding.chunk_length_s)
        {
            return Err(invalid(
                "decoding.stride_length_s",
                &format!(
                    "both strides ({}s each) must fit inside chunk_length_s ({}s)",
                    decoding.stride_length_s, decoding.chunk_length_s
                ),
            ));
        }
        if decoding.partial_every == 0 {
            return Err(invalid("decoding.partial_every", "must be positive"));
        }
        if self.model.name.trim().is_empty() && self.model.path.is_none() {
            return Err(invalid("model.name", "must not be empty"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/streamscribe/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("streamscribe")
            .join("config.toml")
    }
}

fn invalid(key: &str, message: &str) -> ScribeError {
    ScribeError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_streamscribe_env() {
        remove_env("STREAMSCRIBE_MODEL");
        remove_env("STREAMSCRIBE_LANGUAGE");
        remove_env("STREAMSCRIBE_SOCKET");
    }

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(contents.as_bytes()).unwrap();
        temp_file
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.model.name, "tiny.en");
        assert_eq!(config.model.path, None);
        assert_eq!(config.model.language, "en");
        assert_eq!(config.model.threads, None);
        assert!(config.model.download);

        assert_eq!(config.decoding.chunk_length_s, 30);
        assert_eq!(config.decoding.stride_length_s, 5);
        assert_eq!(config.decoding.partial_every, 10);

        assert_eq!(config.ipc.socket, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let temp_file = write_temp(
            r#"
            [model]
            name = "base.en"
            path = "/opt/models/ggml-base.en.bin"
            language = "de"
            threads = 4
            download = false

            [decoding]
            chunk_length_s = 20
            stride_length_s = 4
            partial_every = 5

            [ipc]
            socket = "/run/user/1000/custom.sock"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.model.name, "base.en");
        assert_eq!(
            config.model.path,
            Some(PathBuf::from("/opt/models/ggml-base.en.bin"))
        );
        assert_eq!(config.model.language, "de");
        assert_eq!(config.model.threads, Some(4));
        assert!(!config.model.download);
        assert_eq!(config.decoding.chunk_length_s, 20);
        assert_eq!(config.decoding.stride_length_s, 4);
        assert_eq!(config.decoding.partial_every, 5);
        assert_eq!(
            config.ipc.socket,
            Some(PathBuf::from("/run/user/1000/custom.sock"))
        );
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let temp_file = write_temp(
            r#"
            [model]
            name = "small.en"
        "#,
        );

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.model.name, "small.en");
        assert_eq!(config.model.language, "en");
        assert_eq!(config.decoding, DecodingConfig::default());
        assert_eq!(config.ipc, IpcConfig::default());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let temp_file = write_temp(
            r#"
            [model
            name = "broken
        "#,
        );

        let result = Config::load(temp_file.path());
        assert!(matches!(result, Err(ScribeError::Config(_))));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_rejects_invalid_toml() {
        let temp_file = write_temp("[decoding]\nchunk_length_s = \"thirty\"\n");
        assert!(Config::load_or_default(temp_file.path()).is_err());
    }

    #[test]
    fn test_env_override_model() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_streamscribe_env();

        set_env("STREAMSCRIBE_MODEL", "base.en");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.name, "base.en");
        assert_eq!(config.model.language, "en");

        clear_streamscribe_env();
    }

    #[test]
    fn test_env_override_all() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_streamscribe_env();

        set_env("STREAMSCRIBE_MODEL", "medium");
        set_env("STREAMSCRIBE_LANGUAGE", "fr");
        set_env("STREAMSCRIBE_SOCKET", "/tmp/other.sock");

        let config = Config::default().with_env_overrides();

        assert_eq!(config.model.name, "medium");
        assert_eq!(config.model.language, "fr");
        assert_eq!(config.ipc.socket, Some(PathBuf::from("/tmp/other.sock")));

        clear_streamscribe_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_streamscribe_env();

        set_env("STREAMSCRIBE_MODEL", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.model.name, "tiny.en");

        clear_streamscribe_env();
    }

    #[test]
    fn test_validate_rejects_zero_stride() {
        let mut config = Config::default();
        config.decoding.stride_length_s = 0;
        match config.validate() {
            Err(ScribeError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "decoding.stride_length_s")
            }
            other => panic!("Expected ConfigInvalidValue, got: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_chunk() {
        let mut config = Config::default();
        config.decoding.chunk_length_s = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_stride_overlapping_whole_chunk() {
        let mut config = Config::default();
        config.decoding.chunk_length_s = 10;
        config.decoding.stride_length_s = 5;
        assert!(config.validate().is_err());

        config.decoding.stride_length_s = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_stride_too_large_to_double() {
        let mut config = Config::default();
        config.decoding.stride_length_s = 2_147_483_648;
        assert!(matches!(
            config.validate(),
            Err(ScribeError::ConfigInvalidValue { ref key, .. }) if key == "decoding.stride_length_s"
        ));

        config.decoding.stride_length_s = u32::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_rejects_huge_stride_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[decoding]\nstride_length_s = 2147483648").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_partial_every() {
        let mut config = Config::default();
        config.decoding.partial_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_allows_empty_name_with_explicit_path() {
        let mut config = Config::default();
        config.model.name = String::new();
        assert!(config.validate().is_err());

        config.model.path = Some(PathBuf::from("/models/custom.bin"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_applies_file_then_validates() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_streamscribe_env();

        let temp_file = write_temp("[decoding]\nstride_length_s = 20\n");
        assert!(Config::resolve(Some(temp_file.path())).is_err());

        let temp_file = write_temp("[model]\nname = \"base\"\n");
        let config = Config::resolve(Some(temp_file.path())).unwrap();
        assert_eq!(config.model.name, "base");
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("streamscribe"));
        assert!(path_str.ends_with("config.toml"));
    }
}
