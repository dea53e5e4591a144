use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use attendrs_vision::SimilarityConfig;
use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};
use crate::storage::DirectoryStore;

pub static CONFIG_PATH: Lazy<&'static Path> = Lazy::new(|| {
    Path::new(option_env!("ATTENDRS_CONFIG_PATH").unwrap_or("/usr/local/etc/attendrs/config.toml"))
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(dir) = option_env!("ATTENDRS_DATA_DIR") {
        return PathBuf::from(dir);
    }
    ProjectDirs::from("", "", "attendrs")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// At or above: the candidate is the same person. Blocked.
    pub same_person: f64,
    /// At or above: too close to admit. Blocked.
    pub fraud_protection: f64,
    /// At or above: an administrator must confirm a distinct identity.
    pub review: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            same_person: 0.45,
            fraud_protection: 0.35,
            review: 0.25,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> GateResult<()> {
        let ordered = 0.0 <= self.review
            && self.review <= self.fraud_protection
            && self.fraud_protection <= self.same_person
            && self.same_person <= 1.0;
        if !ordered {
            return Err(GateError::InvalidConfig(format!(
                "thresholds must satisfy 0 <= review ({}) <= fraud_protection ({}) <= same_person ({}) <= 1",
                self.review, self.fraud_protection, self.same_person
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatePolicy {
    pub thresholds: Thresholds,
    pub max_images_per_student: usize,
    pub max_students: usize,
    pub max_candidate_images: usize,
    pub min_candidate_images: usize,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            max_images_per_student: 10,
            max_students: 10_000,
            max_candidate_images: 25,
            min_candidate_images: 1,
        }
    }
}

impl GatePolicy {
    pub fn validate(&self) -> GateResult<()> {
        self.thresholds.validate()?;
        if self.max_images_per_student == 0 || self.max_students == 0 {
            return Err(GateError::InvalidConfig(
                "gallery caps must be positive".into(),
            ));
        }
        if self.min_candidate_images == 0 || self.min_candidate_images > self.max_candidate_images {
            return Err(GateError::InvalidConfig(format!(
                "candidate image bounds must satisfy 1 <= min ({}) <= max ({})",
                self.min_candidate_images, self.max_candidate_images
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// One directory per registered student holding their face images.
    pub training_images: PathBuf,
    /// Append-only JSON lines security log.
    pub audit_log: PathBuf,
    /// `validate` flags students with fewer usable images than this.
    pub min_training_images: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            training_images: DATA_DIR.join("training_images"),
            audit_log: DATA_DIR.join("security_log.jsonl"),
            min_training_images: 10,
        }
    }
}

impl StorageConfig {
    /// Open the existing training-image store. A missing root is an error,
    /// never an empty gallery.
    pub fn open_store(&self) -> GateResult<DirectoryStore> {
        DirectoryStore::open(&self.training_images)
    }

    /// Create the training-image root. Only `init` does this.
    pub fn init_store(&self) -> GateResult<DirectoryStore> {
        DirectoryStore::create(&self.training_images)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub gate: GatePolicy,
    pub similarity: SimilarityConfig,
}

impl Config {
    pub fn validate(&self) -> GateResult<()> {
        self.gate.validate()?;
        self.similarity.validate()?;
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
