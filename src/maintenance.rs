//! Health checks over the training-image store. A student directory that
//! holds no comparable face turns every later registration into a REVIEW,
//! so these are surfaced before they pile up.

use attendrs_vision::PairScorer;
use log::{info, warn};

use crate::config::GatePolicy;
use crate::error::GateResult;
use crate::matcher;
use crate::storage::{DirectoryStore, FaceImageSource, StudentId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentHealth {
    pub student: StudentId,
    /// Image files read, up to the per-student gallery cap.
    pub images: usize,
    /// Of those, faces the similarity check can actually use.
    pub usable: usize,
    pub has_record: bool,
}

impl StudentHealth {
    /// A directory with no `student.json`, left by an interrupted or manual edit.
    pub fn is_orphaned(&self) -> bool {
        !self.has_record
    }

    pub fn is_inconclusive(&self) -> bool {
        self.usable == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryReport {
    pub students: Vec<StudentHealth>,
    pub min_training_images: usize,
}

impl GalleryReport {
    pub fn orphaned(&self) -> impl Iterator<Item = &StudentHealth> {
        self.students.iter().filter(|s| s.is_orphaned())
    }

    pub fn inconclusive(&self) -> impl Iterator<Item = &StudentHealth> {
        self.students.iter().filter(|s| s.is_inconclusive())
    }

    /// Comparable, but with fewer usable faces than recommended.
    pub fn sparse(&self) -> impl Iterator<Item = &StudentHealth> {
        self.students
            .iter()
            .filter(|s| !s.is_inconclusive() && s.usable < self.min_training_images)
    }

    pub fn is_healthy(&self) -> bool {
        self.orphaned().next().is_none()
            && self.inconclusive().next().is_none()
            && self.sparse().next().is_none()
    }
}

/// Load every student the way the gate does and count what is usable.
pub fn inspect(
    store: &DirectoryStore,
    scorer: &PairScorer,
    policy: &GatePolicy,
    min_training_images: usize,
) -> GateResult<GalleryReport> {
    let mut students = Vec::new();
    for student in store.student_ids()? {
        let faces = store.load_faces(&student, policy.max_images_per_student)?;
        let (prepared, skipped) = matcher::prepare_faces(scorer, &faces);
        if skipped > 0 {
            warn!("student {}: {} of {} face(s) unusable", student, skipped, faces.len());
        }
        students.push(StudentHealth {
            has_record: store.has_record(&student),
            images: faces.len(),
            usable: prepared.len(),
            student,
        });
    }
    Ok(GalleryReport {
        students,
        min_training_images,
    })
}

/// Remove every orphaned directory in `report`. Registered students are
/// never touched here, even when they have no usable faces.
pub fn remove_orphans(store: &DirectoryStore, report: &GalleryReport) -> GateResult<Vec<StudentId>> {
    let mut removed = Vec::new();
    for health in report.orphaned() {
        store.purge(&health.student)?;
        info!("removed orphaned directory {}", health.student);
        removed.push(health.student.clone());
    }
    Ok(removed)
}
