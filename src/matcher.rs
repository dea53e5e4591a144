use attendrs_vision::{PairScorer, PreparedFace};
use log::warn;

use crate::storage::{LoadedFace, StudentId};

/// How one registered student compares with the candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentMatch {
    pub student: StudentId,
    /// Highest fused pair score, `None` when no pair could be compared.
    pub score: Option<f64>,
    pub pairs_compared: usize,
    pub faces_skipped: usize,
}

impl StudentMatch {
    pub fn is_inconclusive(&self) -> bool {
        self.score.is_none()
    }
}

/// Prepare one face for comparison, `None` when it cannot be compared.
pub fn prepare_face(scorer: &PairScorer, face: &LoadedFace) -> Option<PreparedFace> {
    match face {
        LoadedFace::Ready { origin, image } => match scorer.prepare(image) {
            Ok(prepared) => Some(prepared),
            Err(err) => {
                warn!("skipping face {}: {}", origin, err);
                None
            }
        },
        LoadedFace::Failed { .. } => None,
    }
}

/// Prepare the usable faces, skipping the ones that cannot be compared.
pub fn prepare_faces<'a>(
    scorer: &PairScorer,
    faces: impl IntoIterator<Item = &'a LoadedFace>,
) -> (Vec<PreparedFace>, usize) {
    let mut prepared = Vec::new();
    let mut skipped = 0;
    for face in faces {
        match prepare_face(scorer, face) {
            Some(p) => prepared.push(p),
            None => skipped += 1,
        }
    }
    (prepared, skipped)
}

/// Maximum fused similarity over every candidate × gallery pair.
/// A single close pair is enough to raise suspicion.
pub fn best_score(
    scorer: &PairScorer,
    candidates: &[PreparedFace],
    gallery: &[PreparedFace],
) -> (Option<f64>, usize) {
    let mut compared = 0;
    let best = candidates
        .iter()
        .flat_map(|c| gallery.iter().map(move |g| (c, g)))
        .filter_map(|(c, g)| match scorer.score(c, g) {
            Ok(pair) => {
                compared += 1;
                Some(pair.fused)
            }
            Err(err) => {
                warn!("pair comparison failed: {}", err);
                None
            }
        })
        .fold(None, |acc: Option<f64>, s| match acc {
            Some(best) if best >= s => Some(best),
            _ => Some(s),
        });
    (best, compared)
}

pub fn match_student(
    scorer: &PairScorer,
    student: &StudentId,
    candidates: &[PreparedFace],
    faces: &[LoadedFace],
) -> StudentMatch {
    let (prepared, faces_skipped) = prepare_faces(scorer, faces);
    let (score, pairs_compared) = best_score(scorer, candidates, &prepared);
    StudentMatch {
        student: student.clone(),
        score,
        pairs_compared,
        faces_skipped,
    }
}

/// Highest scoring conclusive student. Ties go to the smaller id so the
/// result never depends on iteration order.
pub fn best_match(matches: &[StudentMatch]) -> Option<(&StudentId, f64)> {
    matches
        .iter()
        .filter_map(|m| m.score.map(|s| (&m.student, s)))
        .fold(None, |acc, (id, s)| match acc {
            Some((best_id, best)) if best > s || (best == s && best_id <= id) => {
                Some((best_id, best))
            }
            _ => Some((id, s)),
        })
}
