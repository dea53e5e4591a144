use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{GateError, GateResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Evaluation,
    ReviewConfirmed,
    ReviewDeclined,
}

/// One line of the security log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event: AuditEvent,
    pub operator: String,
    pub candidate: Option<String>,
    pub candidate_images: usize,
    pub usable_candidate_images: usize,
    /// `admit`, `block`, `review`, `error`, or `cancelled` for a declined review.
    pub outcome: String,
    pub reason: String,
    pub best_student: Option<String>,
    pub best_score: Option<f64>,
    pub students_compared: usize,
    #[serde(default)]
    pub pairs_compared: usize,
    #[serde(default)]
    pub gallery_faces_skipped: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inconclusive: Vec<String>,
}

impl AuditEntry {
    pub fn new(event: AuditEvent, operator: &str, outcome: &str, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
            operator: operator.to_string(),
            candidate: None,
            candidate_images: 0,
            usable_candidate_images: 0,
            outcome: outcome.to_string(),
            reason: reason.into(),
            best_student: None,
            best_score: None,
            students_compared: 0,
            pairs_compared: 0,
            gallery_faces_skipped: 0,
            inconclusive: Vec::new(),
        }
    }
}

/// Append-only destination for audit entries.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> GateResult<()>;
}

/// JSON lines file; each entry is written as one complete line.
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    pub fn open(path: impl Into<PathBuf>) -> GateResult<Self> {
        let path = path.into();
        let audit_err = |source: io::Error| GateError::Audit {
            path: path.clone(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(audit_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(audit_err)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, entry: &AuditEntry) -> GateResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(&line)
            .and_then(|_| file.flush())
            .map_err(|source| GateError::Audit {
                path: self.path.clone(),
                source,
            })
    }
}

/// Parse a security log. Malformed lines are skipped with a warning.
pub fn read_entries(path: &Path) -> GateResult<Vec<AuditEntry>> {
    let audit_err = |source: io::Error| GateError::Audit {
        path: path.to_path_buf(),
        source,
    };
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(audit_err(err)),
    };

    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(audit_err)?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(entry) => entries.push(entry),
            Err(err) => warn!("{}:{}: unreadable audit line: {}", path.display(), index + 1, err),
        }
    }
    Ok(entries)
}
