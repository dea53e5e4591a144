use std::path::PathBuf;

use log::{info, warn};

use crate::error::{GateError, GateResult};
use crate::gate::{Evaluation, SimilarityGate, Verdict};
use crate::storage::{CandidateSet, DirectoryStore, LoadedFace, StudentRecord};

/// Asks the administrator whether a REVIEW candidate is a different person.
pub trait ReviewPrompt {
    fn confirm_distinct(&mut self, record: &StudentRecord, evaluation: &Evaluation) -> bool;
}

/// Lines describing why a REVIEW verdict was reached, for the administrator.
pub fn review_details(evaluation: &Evaluation) -> Vec<String> {
    let mut lines = Vec::new();
    if let (Some(student), Some(score)) = (&evaluation.best_student, evaluation.best_score) {
        lines.push(format!("closest registered student: {} (score {:.3})", student, score));
    }
    for student in &evaluation.inconclusive {
        lines.push(format!(
            "student {} could not be compared, no usable face images",
            student
        ));
    }
    lines
}

/// Answers every review with the same decision.
pub struct FixedAnswer(pub bool);

impl ReviewPrompt for FixedAnswer {
    fn confirm_distinct(&mut self, _record: &StudentRecord, _evaluation: &Evaluation) -> bool {
        self.0
    }
}

#[derive(Debug)]
pub enum RegistrationOutcome {
    Registered {
        evaluation: Evaluation,
        path: PathBuf,
    },
    Blocked {
        evaluation: Evaluation,
    },
    Declined {
        evaluation: Evaluation,
    },
}

impl RegistrationOutcome {
    pub fn evaluation(&self) -> &Evaluation {
        match self {
            Self::Registered { evaluation, .. }
            | Self::Blocked { evaluation }
            | Self::Declined { evaluation } => evaluation,
        }
    }

    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

/// Run the duplicate-face gate for a new student and persist them only if
/// the gate admits them or an administrator confirms a review.
pub fn register(
    store: &DirectoryStore,
    gate: &SimilarityGate,
    record: &StudentRecord,
    candidate: &CandidateSet,
    prompt: &mut dyn ReviewPrompt,
) -> GateResult<RegistrationOutcome> {
    record.validate()?;
    if store.contains(&record.student_id) {
        return Err(GateError::DuplicateStudent(record.student_id.to_string()));
    }

    let usable = candidate.usable_count();
    let required = gate.policy().min_candidate_images;
    if usable < required {
        return Err(GateError::TooFewCandidateImages { usable, required });
    }

    info!(
        "registering student {} ({}) with {} face image(s)",
        record.student_id, record.name, usable
    );
    let evaluation = gate.evaluate_from_source(candidate, store)?;

    // Decodable but too small faces are not compared and do not count.
    let compared = evaluation.compared_faces.len();
    if !matches!(evaluation.verdict, Verdict::Block(_)) && compared < required {
        return Err(GateError::TooFewCandidateImages {
            usable: compared,
            required,
        });
    }

    match evaluation.verdict {
        Verdict::Admit => {}
        Verdict::Block(_) => {
            warn!(
                "registration of {} blocked: {} matched {} with score {}",
                record.student_id,
                evaluation.verdict.reason(),
                evaluation
                    .best_student
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
                evaluation.best_score.unwrap_or_default()
            );
            return Ok(RegistrationOutcome::Blocked { evaluation });
        }
        Verdict::Review(_) => {
            let confirmed = prompt.confirm_distinct(record, &evaluation);
            gate.audit_review_decision(candidate, &evaluation, confirmed)?;
            if !confirmed {
                info!("registration of {} cancelled at review", record.student_id);
                return Ok(RegistrationOutcome::Declined { evaluation });
            }
            info!(
                "administrator {} confirmed {} as a distinct person",
                gate.operator(),
                record.student_id
            );
        }
    }

    // Only faces the gate actually compared are kept for future checks.
    let faces = evaluation
        .compared_faces
        .iter()
        .filter_map(|&index| candidate.faces.get(index))
        .filter_map(LoadedFace::image);
    let path = store.persist(record, faces)?;
    info!("student {} registered at {}", record.student_id, path.display());
    Ok(RegistrationOutcome::Registered { evaluation, path })
}
