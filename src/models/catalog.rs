//! Whisper model metadata catalog.
//!
//! ggml conversions published by the whisper.cpp project on HuggingFace.

const BASE_URL: &str = "https://huggingface.co/ggerganov/whisper.cpp/resolve/main";

/// Metadata for a Whisper model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    /// Model identifier (e.g., "tiny.en", "base", "large-v3")
    pub name: &'static str,
    /// Approximate download size in megabytes
    pub size_mb: u32,
    /// SHA-1 of the model file, empty when unknown
    pub sha1: &'static str,
    /// Whether this model supports English only
    pub english_only: bool,
}

impl ModelInfo {
    /// File name of the model in the cache directory and on HuggingFace.
    pub fn file_name(&self) -> String {
        file_name(self.name)
    }

    /// Download URL on HuggingFace.
    pub fn url(&self) -> String {
        format!("{}/{}", BASE_URL, self.file_name())
    }
}

/// Catalog of available Whisper models.
///
/// The `.en` suffix marks English-only models, which are faster and more
/// accurate for English.
pub const MODELS: &[ModelInfo] = &[
    ModelInfo {
        name: "tiny.en",
        size_mb: 75,
        sha1: "c78c86eb1a8faa21b369bcd33207cc90d64ae9df",
        english_only: true,
    },
    ModelInfo {
        name: "tiny",
        size_mb: 75,
        sha1: "bd577a113a864445d4c299885e0cb97d4ba92b5f",
        english_only: false,
    },
    ModelInfo {
        name: "base.en",
        size_mb: 142,
        sha1: "137c40403d78fd54d454da0f9bd998f78703390c",
        english_only: true,
    },
    ModelInfo {
        name: "base",
        size_mb: 142,
        sha1: "465707469ff3a37a2b9b8d8f89f2f99de7299dac",
        english_only: false,
    },
    ModelInfo {
        name: "small.en",
        size_mb: 466,
        sha1: "db8a495a91d927739e50b3fc1cc4c6b8f6c2d022",
        english_only: true,
    },
    ModelInfo {
        name: "small",
        size_mb: 466,
        sha1: "55356645c2b361a969dfd0ef2c5a50d530afd8d5",
        english_only: false,
    },
    ModelInfo {
        name: "medium.en",
        size_mb: 1533,
        sha1: "8c30f0e44ce9560643ebd10bbe50cd20eafd3723",
        english_only: true,
    },
    ModelInfo {
        name: "medium",
        size_mb: 1533,
        sha1: "fd9727b6e1217c2f614f9b698455c4ffd82463b4",
        english_only: false,
    },
    ModelInfo {
        name: "large-v3",
        size_mb: 3095,
        sha1: "ad82bf6a9043ceed055076d0fd39f5f186ff8062",
        english_only: false,
    },
    ModelInfo {
        name: "large-v3-turbo",
        size_mb: 1624,
        sha1: "4af2b29d7ec73d781377bfd1758ca957a807e941",
        english_only: false,
    },
];

/// Find a model by name. Names are case sensitive.
pub fn get_model(name: &str) -> Option<&'static ModelInfo> {
    MODELS.iter().find(|m| m.name == name)
}

pub fn list_models() -> &'static [ModelInfo] {
    MODELS
}

/// `ggml-<name>.bin`
pub fn file_name(name: &str) -> String {
    format!("ggml-{}.bin", name)
}
