use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub thumbnails: ThumbnailConfig,

    #[serde(default)]
    pub faces: FaceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "png".to_string(),
        "jpg".to_string(),
        "jpeg".to_string(),
        "webp".to_string(),
    ]
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumb_cache_path")]
    pub path: PathBuf,

    /// Longest edge of a display thumbnail
    #[serde(default = "default_thumb_size")]
    pub size: u32,

    #[serde(default = "default_thumb_quality")]
    pub quality: u8,
}

fn default_thumb_cache_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("facesort/thumbnails")
}

fn default_thumb_size() -> u32 {
    600
}

fn default_thumb_quality() -> u8 {
    85
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            path: default_thumb_cache_path(),
            size: default_thumb_size(),
            quality: default_thumb_quality(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceConfig {
    #[serde(default = "default_avatar_path")]
    pub avatar_path: PathBuf,

    /// Side of the square face thumbnail
    #[serde(default = "default_avatar_size")]
    pub avatar_size: u32,

    #[serde(default = "default_avatar_quality")]
    pub avatar_quality: u8,

    /// Crop side as a multiple of the larger face box dimension
    #[serde(default = "default_crop_margin")]
    pub crop_margin: f32,

    /// Euclidean distance under which two embeddings are neighbours
    #[serde(default = "default_cluster_eps")]
    pub cluster_eps: f32,

    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
}

fn default_avatar_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("facesort/avatars")
}

fn default_avatar_size() -> u32 {
    200
}

fn default_avatar_quality() -> u8 {
    90
}

fn default_crop_margin() -> f32 {
    1.8
}

fn default_cluster_eps() -> f32 {
    0.9 // For L2-normalised embeddings this is cosine similarity >= ~0.6
}

fn default_models_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("facesort/models")
}

impl Default for FaceConfig {
    fn default() -> Self {
        Self {
            avatar_path: default_avatar_path(),
            avatar_size: default_avatar_size(),
            avatar_quality: default_avatar_quality(),
            crop_margin: default_crop_margin(),
            cluster_eps: default_cluster_eps(),
            models_dir: default_models_dir(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facesort")
        .join("facesort.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            scanner: ScannerConfig::default(),
            thumbnails: ThumbnailConfig::default(),
            faces: FaceConfig::default(),
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults there if nothing exists yet
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facesort")
    }

    /// `FACESORT_CONFIG` wins over the XDG location
    pub fn config_path() -> PathBuf {
        match std::env::var_os("FACESORT_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => Self::config_dir().join("config.toml"),
        }
    }

    /// Point every on-disk location at `base`
    pub fn rooted_at(base: &Path) -> Self {
        let mut config = Config::default();
        config.db_path = base.join("facesort.db");
        config.thumbnails.path = base.join("thumbnails");
        config.faces.avatar_path = base.join("avatars");
        config.faces.models_dir = base.join("models");
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            db_path = "/tmp/people.db"

            [faces]
            cluster_eps = 0.38
            "#,
        )
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("/tmp/people.db"));
        assert_eq!(config.faces.cluster_eps, 0.38);
        assert_eq!(config.faces.avatar_size, 200);
        assert_eq!(config.thumbnails.size, 600);
        assert_eq!(config.scanner.image_extensions, vec!["png", "jpg", "jpeg", "webp"]);
    }

    #[test]
    fn test_retired_cluster_size_key_is_ignored() {
        let config: Config = toml::from_str(
            r#"
            [faces]
            min_cluster_size = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.faces.cluster_eps, 0.9);
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.faces.crop_margin, 1.8);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.db_path, config.db_path);
    }
}
