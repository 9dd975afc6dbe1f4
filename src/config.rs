use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::irt::{ChapterTaxonomyEntry, Curriculum, EngineConfig, EngineError};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] EngineError),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub engine_config_path: Option<PathBuf>,
    pub curriculum_path: Option<PathBuf>,
    pub taxonomy_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let path = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty()).map(PathBuf::from);

        Self {
            log_level,
            engine_config_path: path("IRT_ENGINE_CONFIG"),
            curriculum_path: path("IRT_CURRICULUM"),
            taxonomy_path: path("IRT_TAXONOMY"),
        }
    }

    /// File config when `IRT_ENGINE_CONFIG` is set, otherwise defaults with
    /// `IRT_*` overrides.
    pub fn load_engine_config(&self) -> Result<EngineConfig, ConfigError> {
        let config = match &self.engine_config_path {
            Some(path) => load_json::<EngineConfig>(path)?,
            None => EngineConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load_curriculum(&self) -> Result<Curriculum, ConfigError> {
        let curriculum = match &self.curriculum_path {
            Some(path) => load_json::<Curriculum>(path)?,
            None => Curriculum::default(),
        };
        curriculum.validate()?;
        Ok(curriculum)
    }

    pub fn load_taxonomy(&self) -> Result<Vec<ChapterTaxonomyEntry>, ConfigError> {
        match &self.taxonomy_path {
            Some(path) => load_json(path),
            None => Ok(Vec::new()),
        }
    }
}

pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}
