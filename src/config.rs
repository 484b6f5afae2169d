use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to (default: "127.0.0.1").
    /// Set to "0.0.0.0" to listen on all interfaces.
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory the latest upload is mirrored into.
    #[serde(default = "default_storage_dir")]
    pub dir: String,
    /// Fixed logical name for the mirrored image; every upload replaces it.
    #[serde(default = "default_filename")]
    pub filename: String,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    /// Keep a best-effort on-disk copy of the latest upload.
    #[serde(default = "default_mirror_to_disk")]
    pub mirror_to_disk: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            filename: default_filename(),
            max_upload_mb: default_max_upload_mb(),
            mirror_to_disk: default_mirror_to_disk(),
        }
    }
}

fn default_storage_dir() -> String {
    "data/images".to_string()
}
fn default_filename() -> String {
    "latest.jpg".to_string()
}
fn default_max_upload_mb() -> u64 {
    10
}
fn default_mirror_to_disk() -> bool {
    true
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to full defaults.
    /// This daemon has no interactive setup; a missing config is normal.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
