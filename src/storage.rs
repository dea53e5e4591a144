use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use attendrs_vision::FaceImage;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::GatePolicy;
use crate::error::{GateError, GateResult};

const RECORD_FILE: &str = "student.json";
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const MAX_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

impl StudentId {
    pub fn new(id: impl Into<String>) -> GateResult<Self> {
        let id = id.into();
        let invalid = |message: &str| GateError::InvalidStudentId {
            id: id.clone(),
            message: message.to_string(),
        };
        if id.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if id.len() > MAX_ID_LEN {
            return Err(invalid("must be at most 64 characters"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(invalid("only letters, digits, '-' and '_' are allowed"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StudentId {
    type Error = GateError;

    fn try_from(value: String) -> GateResult<Self> {
        Self::new(value)
    }
}

impl From<StudentId> for String {
    fn from(id: StudentId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub student_id: StudentId,
    pub name: String,
    pub email: String,
    pub registered_at: DateTime<Utc>,
}

impl StudentRecord {
    pub fn new(student_id: StudentId, name: &str, email: &str) -> GateResult<Self> {
        let record = Self {
            student_id,
            name: name.trim().to_string(),
            email: email.trim().to_string(),
            registered_at: Utc::now(),
        };
        record.validate()?;
        Ok(record)
    }

    pub fn validate(&self) -> GateResult<()> {
        if self.name.is_empty() {
            return Err(GateError::InvalidRecord("name must not be empty".into()));
        }
        let valid_email = match self.email.split_once('@') {
            Some((local, domain)) => {
                !local.is_empty() && !domain.is_empty() && !domain.contains('@')
            }
            None => false,
        };
        if !valid_email {
            return Err(GateError::InvalidRecord(format!(
                "'{}' is not an email address",
                self.email
            )));
        }
        Ok(())
    }
}

/// A face as read from storage or capture. Reading never aborts on one bad image.
#[derive(Debug, Clone)]
pub enum LoadedFace {
    Ready { origin: String, image: FaceImage },
    Failed { origin: String, reason: String },
}

impl LoadedFace {
    pub fn from_bytes(origin: impl Into<String>, bytes: &[u8]) -> Self {
        let origin = origin.into();
        match FaceImage::decode(bytes) {
            Ok(image) => Self::Ready { origin, image },
            Err(err) => {
                warn!("skipping undecodable face {}: {}", origin, err);
                Self::Failed {
                    origin,
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> Self {
        let origin = path.display().to_string();
        match fs::read(path) {
            Ok(bytes) => Self::from_bytes(origin, &bytes),
            Err(err) => {
                warn!("skipping unreadable face {}: {}", origin, err);
                Self::Failed {
                    origin,
                    reason: err.to_string(),
                }
            }
        }
    }

    pub fn origin(&self) -> &str {
        match self {
            Self::Ready { origin, .. } | Self::Failed { origin, .. } => origin,
        }
    }

    pub fn image(&self) -> Option<&FaceImage> {
        match self {
            Self::Ready { image, .. } => Some(image),
            Self::Failed { .. } => None,
        }
    }
}

/// Faces captured during one registration attempt, not yet persisted.
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub label: Option<String>,
    pub faces: Vec<LoadedFace>,
}

impl CandidateSet {
    pub fn new(label: Option<String>, faces: Vec<LoadedFace>) -> Self {
        Self { label, faces }
    }

    pub fn from_paths(label: Option<String>, paths: &[PathBuf]) -> Self {
        Self::new(label, paths.iter().map(|p| LoadedFace::from_path(p)).collect())
    }

    pub fn usable(&self) -> impl Iterator<Item = &FaceImage> {
        self.faces.iter().filter_map(LoadedFace::image)
    }

    pub fn usable_count(&self) -> usize {
        self.usable().count()
    }
}

/// Registered students' faces, the baseline a candidate is compared with.
pub type Gallery = BTreeMap<StudentId, Vec<LoadedFace>>;

/// Read-only access to stored face images.
pub trait FaceImageSource {
    /// Every committed student, in ascending id order.
    fn student_ids(&self) -> GateResult<Vec<StudentId>>;

    /// Up to `limit` faces of one student.
    fn load_faces(&self, student: &StudentId, limit: usize) -> GateResult<Vec<LoadedFace>>;
}

/// Snapshot the gallery, leaving out `exclude` and respecting the policy caps.
pub fn load_gallery(
    source: &dyn FaceImageSource,
    exclude: Option<&StudentId>,
    policy: &GatePolicy,
) -> GateResult<Gallery> {
    let mut ids = source.student_ids()?;
    ids.retain(|id| Some(id) != exclude);
    if ids.len() > policy.max_students {
        warn!(
            "gallery holds {} students, comparing the first {}",
            ids.len(),
            policy.max_students
        );
        ids.truncate(policy.max_students);
    }

    let mut gallery = Gallery::new();
    for id in ids {
        let faces = source.load_faces(&id, policy.max_images_per_student)?;
        debug!("loaded {} face(s) for student {}", faces.len(), id);
        gallery.insert(id, faces);
    }
    Ok(gallery)
}

/// Training-image directory: `<root>/<student_id>/*.{jpg,jpeg,png}`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn create(root: impl Into<PathBuf>) -> GateResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| GateError::StorageUnavailable {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn open(root: impl Into<PathBuf>) -> GateResult<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(GateError::StorageUnavailable {
                source: io::Error::new(io::ErrorKind::NotFound, "not a directory"),
                path: root,
            });
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn student_dir(&self, student: &StudentId) -> PathBuf {
        self.root.join(student.as_str())
    }

    pub fn contains(&self, student: &StudentId) -> bool {
        self.student_dir(student).exists()
    }

    /// Whether the student's directory carries its `student.json`.
    pub fn has_record(&self, student: &StudentId) -> bool {
        self.student_dir(student).join(RECORD_FILE).is_file()
    }

    fn storage_error(&self, source: io::Error) -> GateError {
        GateError::StorageUnavailable {
            path: self.root.clone(),
            source,
        }
    }

    fn image_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_image && path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Every registered student with metadata where available.
    pub fn students(&self) -> GateResult<Vec<(StudentId, Option<StudentRecord>)>> {
        let mut students = Vec::new();
        for id in self.student_ids()? {
            let path = self.student_dir(&id).join(RECORD_FILE);
            let record = match fs::read(&path) {
                Ok(raw) => Some(
                    serde_json::from_slice(&raw)
                        .map_err(|source| GateError::RecordParse { path, source })?,
                ),
                Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                Err(err) => return Err(self.storage_error(err)),
            };
            students.push((id, record));
        }
        Ok(students)
    }

    /// Commit a new student with `faces`. Files are staged in a hidden
    /// directory and renamed into place so readers never see a partial student.
    pub fn persist<'a>(
        &self,
        record: &StudentRecord,
        faces: impl IntoIterator<Item = &'a FaceImage>,
    ) -> GateResult<PathBuf> {
        record.validate()?;
        let id = &record.student_id;
        let target = self.student_dir(id);
        if target.exists() {
            return Err(GateError::DuplicateStudent(id.to_string()));
        }

        let write_err = |source: io::Error| GateError::StorageWrite {
            student: id.to_string(),
            source,
        };
        let staging = self
            .root
            .join(format!(".{}.{}", id, uuid::Uuid::new_v4().simple()));
        fs::create_dir_all(&staging).map_err(write_err)?;

        let staged = (|| -> GateResult<()> {
            for (index, face) in faces.into_iter().enumerate() {
                let file = staging.join(format!("{}_{:03}.png", id, index));
                face.save_png(&file).map_err(|source| GateError::FaceWrite {
                    student: id.to_string(),
                    source,
                })?;
            }
            let json = serde_json::to_vec_pretty(record)?;
            fs::write(staging.join(RECORD_FILE), json).map_err(write_err)?;
            fs::rename(&staging, &target).map_err(write_err)
        })();

        if let Err(err) = staged {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                warn!("failed to clean staging dir {}: {}", staging.display(), cleanup);
            }
            return Err(err);
        }
        Ok(target)
    }

    pub fn purge(&self, student: &StudentId) -> GateResult<()> {
        let path = self.student_dir(student);
        if !path.exists() {
            return Err(GateError::UnknownStudent(student.to_string()));
        }
        fs::remove_dir_all(&path).map_err(|source| GateError::StorageWrite {
            student: student.to_string(),
            source,
        })
    }
}

impl FaceImageSource for DirectoryStore {
    fn student_ids(&self) -> GateResult<Vec<StudentId>> {
        let entries = fs::read_dir(&self.root).map_err(|err| self.storage_error(err))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| self.storage_error(err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // Hidden directories are registrations still being staged.
            if name.starts_with('.') || !entry.path().is_dir() {
                continue;
            }
            match StudentId::new(name) {
                Ok(id) => ids.push(id),
                Err(err) => warn!("ignoring directory in {}: {}", self.root.display(), err),
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn load_faces(&self, student: &StudentId, limit: usize) -> GateResult<Vec<LoadedFace>> {
        let dir = self.student_dir(student);
        let files = match Self::image_files(&dir) {
            Ok(files) => files,
            Err(err) => {
                warn!("cannot list faces of student {}: {}", student, err);
                return Ok(vec![LoadedFace::Failed {
                    origin: dir.display().to_string(),
                    reason: err.to_string(),
                }]);
            }
        };
        Ok(files
            .iter()
            .take(limit)
            .map(|path| LoadedFace::from_path(path))
            .collect())
    }
}
