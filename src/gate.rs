use std::fmt;
use std::sync::Arc;

use attendrs_vision::PairScorer;
use log::{info, warn};
use serde::Serialize;

use crate::audit::{AuditEntry, AuditEvent, AuditSink};
use crate::config::{GatePolicy, Thresholds};
use crate::error::{GateError, GateResult};
use crate::matcher::{self, StudentMatch};
use crate::storage::{self, CandidateSet, FaceImageSource, Gallery, StudentId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    SamePerson,
    FraudProtection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    PossibleMatch,
    /// Some student could not be compared at all.
    Inconclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "reason")]
pub enum Verdict {
    Admit,
    /// Never overridable by an administrator.
    Block(BlockReason),
    /// Proceeds only after an administrator confirms a distinct identity.
    Review(ReviewReason),
}

impl Verdict {
    pub fn outcome(&self) -> &'static str {
        match self {
            Verdict::Admit => "admit",
            Verdict::Block(_) => "block",
            Verdict::Review(_) => "review",
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Verdict::Admit => "no similar student",
            Verdict::Block(BlockReason::SamePerson) => "same person",
            Verdict::Block(BlockReason::FraudProtection) => "fraud protection",
            Verdict::Review(ReviewReason::PossibleMatch) => "possible match",
            Verdict::Review(ReviewReason::Inconclusive) => "inconclusive",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.outcome().to_uppercase(), self.reason())
    }
}

impl Thresholds {
    /// Step function from the best score to a verdict, strictest band first.
    pub fn classify(&self, score: f64) -> Verdict {
        if score >= self.same_person {
            Verdict::Block(BlockReason::SamePerson)
        } else if score >= self.fraud_protection {
            Verdict::Block(BlockReason::FraudProtection)
        } else if score >= self.review {
            Verdict::Review(ReviewReason::PossibleMatch)
        } else {
            Verdict::Admit
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub best_student: Option<StudentId>,
    pub best_score: Option<f64>,
    pub students_compared: usize,
    pub inconclusive: Vec<StudentId>,
    pub candidate_images: usize,
    pub usable_candidate_images: usize,
    /// Positions in the candidate set of the faces that were compared.
    pub compared_faces: Vec<usize>,
    pub pairs_compared: usize,
    /// Stored faces that could not be read, decoded or prepared.
    pub gallery_faces_skipped: usize,
}

/// Decides whether a new registration may proceed given everyone already enrolled.
pub struct SimilarityGate {
    policy: GatePolicy,
    scorer: PairScorer,
    audit: Arc<dyn AuditSink>,
    operator: String,
}

impl SimilarityGate {
    pub fn new(
        policy: GatePolicy,
        scorer: PairScorer,
        audit: Arc<dyn AuditSink>,
        operator: impl Into<String>,
    ) -> GateResult<Self> {
        policy.validate()?;
        Ok(Self {
            policy,
            scorer,
            audit,
            operator: operator.into(),
        })
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn operator(&self) -> &str {
        &self.operator
    }

    /// Snapshot the gallery from `source` (excluding the candidate's own id)
    /// and evaluate. An unreadable store is fatal and still audited.
    pub fn evaluate_from_source(
        &self,
        candidate: &CandidateSet,
        source: &dyn FaceImageSource,
    ) -> GateResult<Evaluation> {
        let exclude = candidate
            .label
            .as_deref()
            .and_then(|label| StudentId::new(label).ok());
        match storage::load_gallery(source, exclude.as_ref(), &self.policy) {
            Ok(gallery) => self.evaluate(candidate, &gallery),
            Err(err) => {
                warn!("gallery unavailable, registration cannot proceed: {}", err);
                self.audit_failure(candidate, &err)?;
                Err(err)
            }
        }
    }

    pub fn evaluate(&self, candidate: &CandidateSet, gallery: &Gallery) -> GateResult<Evaluation> {
        match self.compare(candidate, gallery) {
            Ok(evaluation) => {
                self.audit_evaluation(candidate, &evaluation)?;
                Ok(evaluation)
            }
            Err(err) => {
                self.audit_failure(candidate, &err)?;
                Err(err)
            }
        }
    }

    fn compare(&self, candidate: &CandidateSet, gallery: &Gallery) -> GateResult<Evaluation> {
        // The cap counts comparable faces; broken ones never use up a slot.
        let cap = self.policy.max_candidate_images;
        let mut prepared = Vec::new();
        let mut compared_faces = Vec::new();
        let mut ignored = 0;
        for (index, face) in candidate.faces.iter().enumerate() {
            if prepared.len() == cap {
                ignored += 1;
                continue;
            }
            if let Some(face) = matcher::prepare_face(&self.scorer, face) {
                prepared.push(face);
                compared_faces.push(index);
            }
        }
        if ignored > 0 {
            warn!(
                "candidate already has {} usable images, ignoring {} more",
                cap, ignored
            );
        }
        if prepared.is_empty() {
            return Err(GateError::NoUsableCandidate {
                provided: candidate.faces.len(),
            });
        }

        let matches: Vec<StudentMatch> = gallery
            .iter()
            .map(|(student, faces)| {
                let faces = &faces[..faces.len().min(self.policy.max_images_per_student)];
                matcher::match_student(&self.scorer, student, &prepared, faces)
            })
            .collect();

        let inconclusive: Vec<StudentId> = matches
            .iter()
            .filter(|m| m.is_inconclusive())
            .map(|m| m.student.clone())
            .collect();
        let pairs_compared: usize = matches.iter().map(|m| m.pairs_compared).sum();
        let gallery_faces_skipped: usize = matches.iter().map(|m| m.faces_skipped).sum();
        if gallery_faces_skipped > 0 {
            warn!(
                "{} stored face(s) could not be compared and were skipped",
                gallery_faces_skipped
            );
        }
        let best = matcher::best_match(&matches);

        let mut verdict = best
            .map(|(_, score)| self.policy.thresholds.classify(score))
            .unwrap_or(Verdict::Admit);
        let mut best_student = best.map(|(id, _)| id.clone());
        let best_score = best.map(|(_, score)| score);

        // Fail closed: a student we could not compare might be the same person.
        if verdict == Verdict::Admit && !inconclusive.is_empty() {
            warn!(
                "inconclusive comparison against {} student(s) ({}); admin review required",
                inconclusive.len(),
                join_ids(&inconclusive)
            );
            verdict = Verdict::Review(ReviewReason::Inconclusive);
            if best_student.is_none() {
                best_student = inconclusive.first().cloned();
            }
        }

        let evaluation = Evaluation {
            verdict,
            best_student,
            best_score,
            students_compared: matches.len() - inconclusive.len(),
            inconclusive,
            candidate_images: candidate.faces.len(),
            usable_candidate_images: prepared.len(),
            compared_faces,
            pairs_compared,
            gallery_faces_skipped,
        };
        info!(
            "similarity check for {}: {} best={} score={}",
            candidate.label.as_deref().unwrap_or("<unlabelled>"),
            evaluation.verdict,
            evaluation
                .best_student
                .as_ref()
                .map(StudentId::as_str)
                .unwrap_or("-"),
            evaluation
                .best_score
                .map(|s| format!("{s:.4}"))
                .unwrap_or_else(|| "-".into())
        );
        Ok(evaluation)
    }

    fn audit_evaluation(
        &self,
        candidate: &CandidateSet,
        evaluation: &Evaluation,
    ) -> GateResult<()> {
        let mut entry = self.entry(
            AuditEvent::Evaluation,
            candidate,
            evaluation.verdict.outcome(),
            evaluation.verdict.reason(),
        );
        entry.usable_candidate_images = evaluation.usable_candidate_images;
        entry.best_student = evaluation.best_student.as_ref().map(ToString::to_string);
        entry.best_score = evaluation.best_score;
        entry.students_compared = evaluation.students_compared;
        entry.pairs_compared = evaluation.pairs_compared;
        entry.gallery_faces_skipped = evaluation.gallery_faces_skipped;
        entry.inconclusive = evaluation.inconclusive.iter().map(ToString::to_string).collect();
        self.audit.append(&entry)
    }

    /// Record an evaluation that could not run, e.g. because the store is missing.
    pub fn audit_failure(&self, candidate: &CandidateSet, err: &GateError) -> GateResult<()> {
        let entry = self.entry(AuditEvent::Evaluation, candidate, "error", err.to_string());
        self.audit.append(&entry)
    }

    /// Record the administrator's answer to a REVIEW verdict.
    pub fn audit_review_decision(
        &self,
        candidate: &CandidateSet,
        evaluation: &Evaluation,
        confirmed: bool,
    ) -> GateResult<()> {
        let (event, outcome) = if confirmed {
            (AuditEvent::ReviewConfirmed, "admit")
        } else {
            (AuditEvent::ReviewDeclined, "cancelled")
        };
        let mut entry = self.entry(event, candidate, outcome, evaluation.verdict.reason());
        entry.usable_candidate_images = evaluation.usable_candidate_images;
        entry.best_student = evaluation.best_student.as_ref().map(ToString::to_string);
        entry.best_score = evaluation.best_score;
        entry.students_compared = evaluation.students_compared;
        entry.inconclusive = evaluation.inconclusive.iter().map(ToString::to_string).collect();
        self.audit.append(&entry)
    }

    fn entry(
        &self,
        event: AuditEvent,
        candidate: &CandidateSet,
        outcome: &str,
        reason: impl Into<String>,
    ) -> AuditEntry {
        let mut entry = AuditEntry::new(event, &self.operator, outcome, reason);
        entry.candidate = candidate.label.clone();
        entry.candidate_images = candidate.faces.len();
        entry
    }
}

fn join_ids(ids: &[StudentId]) -> String {
    ids.iter().map(StudentId::as_str).collect::<Vec<_>>().join(", ")
}
