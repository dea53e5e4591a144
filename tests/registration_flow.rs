mod common;

use std::sync::Arc;

use anyhow::Result;
use attendrs::audit::{read_entries, AuditEvent, JsonlAuditLog};
use attendrs::config::{GatePolicy, Thresholds};
use attendrs::gate::Evaluation;
use attendrs::registration::{
    register, review_details, FixedAnswer, RegistrationOutcome, ReviewPrompt,
};
use attendrs::storage::StudentRecord;
use attendrs::{
    BlockReason, CandidateSet, DirectoryStore, FaceImageSource, GateError, PairScorer,
    ReviewReason, SimilarityConfig, SimilarityGate, StudentId, Verdict,
};
use common::{ready, stripes, synthetic_face, write_garbage};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    store: DirectoryStore,
    gate: SimilarityGate,
    log_path: std::path::PathBuf,
}

fn fixture(policy: GatePolicy) -> Result<Fixture> {
    let dir = TempDir::new()?;
    let store = DirectoryStore::create(dir.path().join("training_images"))?;
    let log_path = dir.path().join("security_log.jsonl");
    let gate = SimilarityGate::new(
        policy,
        PairScorer::new(SimilarityConfig::default())?,
        Arc::new(JsonlAuditLog::open(&log_path)?),
        "registrar",
    )?;
    Ok(Fixture {
        _dir: dir,
        store,
        gate,
        log_path,
    })
}

fn record(id: &str, name: &str) -> StudentRecord {
    StudentRecord::new(StudentId::new(id).unwrap(), name, "student@campus.edu").unwrap()
}

/// Records what it was shown and answers with `answer`.
struct CountingPrompt {
    answer: bool,
    asked: usize,
    last_score: Option<f64>,
    details: Vec<String>,
}

impl CountingPrompt {
    fn new(answer: bool) -> Self {
        Self {
            answer,
            asked: 0,
            last_score: None,
            details: Vec::new(),
        }
    }
}

impl ReviewPrompt for CountingPrompt {
    fn confirm_distinct(&mut self, _record: &StudentRecord, evaluation: &Evaluation) -> bool {
        self.asked += 1;
        self.last_score = evaluation.best_score;
        self.details = review_details(evaluation);
        self.answer
    }
}

fn review_band() -> GatePolicy {
    // Puts unrelated stripe patterns into the review band.
    GatePolicy {
        thresholds: Thresholds {
            same_person: 0.95,
            fraud_protection: 0.9,
            review: 0.05,
        },
        ..GatePolicy::default()
    }
}

#[test]
fn test_first_student_is_registered() -> Result<()> {
    let fx = fixture(GatePolicy::default())?;
    let candidate = CandidateSet::new(
        Some("1001".into()),
        vec![
            ready("c0", &synthetic_face(200, 0)),
            ready("c1", &synthetic_face(200, 2)),
        ],
    );

    let outcome = register(
        &fx.store,
        &fx.gate,
        &record("1001", "Grace Hopper"),
        &candidate,
        &mut FixedAnswer(false),
    )?;

    assert!(outcome.is_registered());
    assert_eq!(outcome.evaluation().verdict, Verdict::Admit);
    let id = StudentId::new("1001")?;
    assert_eq!(fx.store.load_faces(&id, 10)?.len(), 2);

    let students = fx.store.students()?;
    assert_eq!(students.len(), 1);
    assert_eq!(students[0].1.as_ref().unwrap().name, "Grace Hopper");

    let entries = read_entries(&fx.log_path)?;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operator, "registrar");
    Ok(())
}

#[test]
fn test_same_face_under_new_id_is_blocked() -> Result<()> {
    let fx = fixture(GatePolicy::default())?;
    let face = synthetic_face(200, 0);
    let first = CandidateSet::new(Some("1001".into()), vec![ready("c0", &face)]);
    register(
        &fx.store,
        &fx.gate,
        &record("1001", "Grace Hopper"),
        &first,
        &mut FixedAnswer(true),
    )?;

    let second = CandidateSet::new(Some("2002".into()), vec![ready("c0", &face)]);
    let mut prompt = CountingPrompt::new(true);
    let outcome = register(
        &fx.store,
        &fx.gate,
        &record("2002", "Impostor"),
        &second,
        &mut prompt,
    )?;

    assert!(matches!(outcome, RegistrationOutcome::Blocked { .. }));
    assert_eq!(
        outcome.evaluation().verdict,
        Verdict::Block(BlockReason::SamePerson)
    );
    assert_eq!(prompt.asked, 0, "blocks are never offered for review");
    assert!(!fx.store.contains(&StudentId::new("2002")?));

    let entries = read_entries(&fx.log_path)?;
    let last = entries.last().unwrap();
    assert_eq!(last.outcome, "block");
    assert_eq!(last.best_student.as_deref(), Some("1001"));
    Ok(())
}

#[test]
fn test_review_declined_cancels_registration() -> Result<()> {
    let fx = fixture(review_band())?;
    register(
        &fx.store,
        &fx.gate,
        &record("1001", "Ada"),
        &CandidateSet::new(Some("1001".into()), vec![ready("c0", &stripes(128, 32, true))]),
        &mut FixedAnswer(false),
    )?;

    let mut prompt = CountingPrompt::new(false);
    let outcome = register(
        &fx.store,
        &fx.gate,
        &record("1002", "Alan"),
        &CandidateSet::new(Some("1002".into()), vec![ready("c0", &stripes(128, 32, false))]),
        &mut prompt,
    )?;

    assert!(matches!(outcome, RegistrationOutcome::Declined { .. }));
    assert_eq!(prompt.asked, 1);
    assert_eq!(prompt.last_score, outcome.evaluation().best_score);
    assert!(!fx.store.contains(&StudentId::new("1002")?));

    let entries = read_entries(&fx.log_path)?;
    assert_eq!(entries.last().unwrap().event, AuditEvent::ReviewDeclined);
    Ok(())
}

#[test]
fn test_review_confirmed_registers() -> Result<()> {
    let fx = fixture(review_band())?;
    register(
        &fx.store,
        &fx.gate,
        &record("1001", "Ada"),
        &CandidateSet::new(Some("1001".into()), vec![ready("c0", &stripes(128, 32, true))]),
        &mut FixedAnswer(false),
    )?;

    let outcome = register(
        &fx.store,
        &fx.gate,
        &record("1002", "Alan"),
        &CandidateSet::new(Some("1002".into()), vec![ready("c0", &stripes(128, 32, false))]),
        &mut FixedAnswer(true),
    )?;

    assert!(outcome.is_registered());
    assert_eq!(
        outcome.evaluation().verdict,
        Verdict::Review(ReviewReason::PossibleMatch)
    );
    let events: Vec<_> = read_entries(&fx.log_path)?
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(
        events,
        vec![
            AuditEvent::Evaluation,
            AuditEvent::Evaluation,
            AuditEvent::ReviewConfirmed
        ]
    );
    Ok(())
}

#[test]
fn test_inconclusive_gallery_requires_confirmation() -> Result<()> {
    let fx = fixture(GatePolicy::default())?;
    write_garbage(fx.store.root(), "3003", 2);

    let mut prompt = CountingPrompt::new(false);
    let outcome = register(
        &fx.store,
        &fx.gate,
        &record("4004", "Linus"),
        &CandidateSet::new(Some("4004".into()), vec![ready("c0", &synthetic_face(200, 0))]),
        &mut prompt,
    )?;

    assert_eq!(
        outcome.evaluation().verdict,
        Verdict::Review(ReviewReason::Inconclusive)
    );
    assert_eq!(prompt.asked, 1);
    assert!(!outcome.is_registered());
    Ok(())
}

#[test]
fn test_duplicate_id_is_rejected() -> Result<()> {
    let fx = fixture(GatePolicy::default())?;
    let candidate = CandidateSet::new(Some("1001".into()), vec![ready("c0", &synthetic_face(200, 0))]);
    register(
        &fx.store,
        &fx.gate,
        &record("1001", "Grace"),
        &candidate,
        &mut FixedAnswer(false),
    )?;

    let again = register(
        &fx.store,
        &fx.gate,
        &record("1001", "Grace"),
        &candidate,
        &mut FixedAnswer(false),
    );
    assert!(matches!(again, Err(GateError::DuplicateStudent(_))));
    Ok(())
}

#[test]
fn test_too_few_images_is_rejected() -> Result<()> {
    let fx = fixture(GatePolicy {
        min_candidate_images: 2,
        ..GatePolicy::default()
    })?;
    let candidate = CandidateSet::new(
        Some("1001".into()),
        vec![
            ready("c0", &synthetic_face(200, 0)),
            attendrs::LoadedFace::from_bytes("c1", b"corrupt"),
        ],
    );

    let result = register(
        &fx.store,
        &fx.gate,
        &record("1001", "Grace"),
        &candidate,
        &mut FixedAnswer(true),
    );
    assert!(matches!(
        result,
        Err(GateError::TooFewCandidateImages {
            usable: 1,
            required: 2
        })
    ));
    assert!(read_entries(&fx.log_path)?.is_empty());
    Ok(())
}

#[test]
fn test_inconclusive_review_names_uncompared_student() -> Result<()> {
    let fx = fixture(GatePolicy::default())?;
    register(
        &fx.store,
        &fx.gate,
        &record("a100", "Ada"),
        &CandidateSet::new(Some("a100".into()), vec![ready("c0", &stripes(128, 32, true))]),
        &mut FixedAnswer(false),
    )?;
    write_garbage(fx.store.root(), "z900", 3);

    let mut prompt = CountingPrompt::new(false);
    let outcome = register(
        &fx.store,
        &fx.gate,
        &record("b200", "Alan"),
        &CandidateSet::new(Some("b200".into()), vec![ready("c0", &stripes(128, 32, false))]),
        &mut prompt,
    )?;

    let evaluation = outcome.evaluation();
    assert_eq!(evaluation.verdict, Verdict::Review(ReviewReason::Inconclusive));
    assert_eq!(evaluation.best_student, Some(StudentId::new("a100")?));
    assert_eq!(evaluation.inconclusive, vec![StudentId::new("z900")?]);
    assert!(prompt.details.iter().any(|line| line.contains("a100")));
    assert!(prompt.details.iter().any(|line| line.contains("z900")));

    let decision = read_entries(&fx.log_path)?.pop().unwrap();
    assert_eq!(decision.event, AuditEvent::ReviewDeclined);
    assert_eq!(decision.inconclusive, vec!["z900".to_string()]);
    Ok(())
}

#[test]
fn test_only_compared_faces_are_persisted() -> Result<()> {
    let fx = fixture(GatePolicy::default())?;
    let candidate = CandidateSet::new(
        Some("1001".into()),
        vec![
            ready("c0", &synthetic_face(200, 0)),
            ready("tiny", &synthetic_face(12, 0)),
            attendrs::LoadedFace::from_bytes("broken", b"corrupt"),
            ready("c1", &synthetic_face(200, 3)),
        ],
    );

    let outcome = register(
        &fx.store,
        &fx.gate,
        &record("1001", "Grace"),
        &candidate,
        &mut FixedAnswer(false),
    )?;

    assert!(outcome.is_registered());
    assert_eq!(outcome.evaluation().compared_faces, vec![0, 3]);
    let stored = fx.store.load_faces(&StudentId::new("1001")?, 10)?;
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|f| f.image().map_or(false, |img| img.width() == 200)));
    Ok(())
}

#[test]
fn test_too_small_faces_do_not_count_toward_minimum() -> Result<()> {
    let fx = fixture(GatePolicy {
        min_candidate_images: 2,
        ..GatePolicy::default()
    })?;
    let candidate = CandidateSet::new(
        Some("1001".into()),
        vec![
            ready("c0", &synthetic_face(200, 0)),
            ready("tiny", &synthetic_face(12, 0)),
        ],
    );

    let result = register(
        &fx.store,
        &fx.gate,
        &record("1001", "Grace"),
        &candidate,
        &mut FixedAnswer(true),
    );

    assert!(matches!(
        result,
        Err(GateError::TooFewCandidateImages {
            usable: 1,
            required: 2
        })
    ));
    assert!(!fx.store.contains(&StudentId::new("1001")?));
    Ok(())
}
