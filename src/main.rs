use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use attendrs::audit::{self, JsonlAuditLog};
use attendrs::config::{self, Config};
use attendrs::maintenance;
use attendrs::registration::{self, FixedAnswer, RegistrationOutcome, ReviewPrompt};
use attendrs::storage::StudentRecord;
use attendrs::{
    identity, CandidateSet, DirectoryStore, Evaluation, PairScorer, SimilarityGate, StudentId,
    Verdict,
};
use clap::{Parser, Subcommand};
use log::{info, warn};

#[derive(Parser)]
#[command(name = "attendrs")]
#[command(
    version,
    about = "Attendance registration with duplicate-face fraud protection"
)]
struct Cli {
    /// Config file (defaults to the compiled-in path)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare face images against every registered student without registering
    Check {
        /// Cropped face images of the candidate
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Student id the images belong to, recorded in the audit log
        #[arg(short, long)]
        label: Option<String>,
        /// Print the evaluation as JSON
        #[arg(long)]
        json: bool,
    },
    /// Register a new student after the similarity check
    Register {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Cropped face images captured for the student
        #[arg(required = true)]
        images: Vec<PathBuf>,
        /// Confirm a REVIEW verdict without prompting
        #[arg(short, long)]
        yes: bool,
    },
    /// List registered students
    List,
    /// Remove a registered student and their face images
    Purge {
        #[arg(long)]
        id: String,
    },
    /// Show the most recent security log entries
    Audit {
        #[arg(short = 'n', long, default_value_t = 20)]
        tail: usize,
    },
    /// Create the training-image store and security log
    Init,
    /// Report students whose face images cannot support the similarity check
    Validate,
    /// Remove student directories that have no student record
    Clean {
        /// Delete instead of only listing
        #[arg(short, long)]
        yes: bool,
    },
    /// Open config file in editor
    Config,
}

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .format_timestamp(None)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config_path = cli.config.as_deref();
    // Loaded per command so `config` can still open a file that fails validation.
    let load = || config::load_config(config_path);

    match cli.command {
        Commands::Check {
            images,
            label,
            json,
        } => check(&load()?, &images, label, json),
        Commands::Register {
            id,
            name,
            email,
            images,
            yes,
        } => register(&load()?, &id, &name, &email, &images, yes),
        Commands::List => list(&load()?),
        Commands::Purge { id } => purge(&load()?, &id),
        Commands::Audit { tail } => show_audit(&load()?, tail),
        Commands::Init => init(&load()?),
        Commands::Validate => validate(&load()?),
        Commands::Clean { yes } => clean(&load()?, yes),
        Commands::Config => open_config(config_path.unwrap_or(&config::CONFIG_PATH)),
    }
}

fn build_gate(cfg: &Config) -> Result<SimilarityGate> {
    let scorer =
        PairScorer::new(cfg.similarity.clone()).context("Invalid similarity configuration")?;
    let audit_log = JsonlAuditLog::open(&cfg.storage.audit_log)
        .context("Failed to open security log")?;
    let gate = SimilarityGate::new(
        cfg.gate.clone(),
        scorer,
        Arc::new(audit_log),
        identity::operator_name(),
    )?;
    Ok(gate)
}

/// A missing store is audited and fatal; it must never look like an empty gallery.
fn open_store(cfg: &Config, gate: &SimilarityGate, candidate: &CandidateSet) -> Result<DirectoryStore> {
    match cfg.storage.open_store() {
        Ok(store) => Ok(store),
        Err(err) => {
            gate.audit_failure(candidate, &err)?;
            Err(err).context("Training images unavailable (run `attendrs init` to create them)")
        }
    }
}

fn check(cfg: &Config, images: &[PathBuf], label: Option<String>, json: bool) -> Result<ExitCode> {
    let gate = build_gate(cfg)?;
    let candidate = CandidateSet::from_paths(label, images);
    let store = open_store(cfg, &gate, &candidate)?;

    let evaluation = gate
        .evaluate_from_source(&candidate, &store)
        .context("Similarity check failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
    } else {
        report(&evaluation);
    }

    Ok(match evaluation.verdict {
        Verdict::Admit => ExitCode::SUCCESS,
        Verdict::Review(_) => ExitCode::from(2),
        Verdict::Block(_) => ExitCode::from(3),
    })
}

fn register(
    cfg: &Config,
    id: &str,
    name: &str,
    email: &str,
    images: &[PathBuf],
    yes: bool,
) -> Result<ExitCode> {
    let student_id = StudentId::new(id)?;
    let record = StudentRecord::new(student_id, name, email)?;
    let gate = build_gate(cfg)?;
    let candidate = CandidateSet::from_paths(Some(id.to_string()), images);
    let store = open_store(cfg, &gate, &candidate)?;

    let mut prompt: Box<dyn ReviewPrompt> = if yes {
        Box::new(FixedAnswer(true))
    } else {
        Box::new(StdinPrompt)
    };

    let outcome = registration::register(&store, &gate, &record, &candidate, prompt.as_mut())
        .context("Registration failed")?;
    report(outcome.evaluation());

    match outcome {
        RegistrationOutcome::Registered { path, .. } => {
            info!("✓ Student {} ({}) registered", record.student_id, record.name);
            info!("Face images stored in {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        RegistrationOutcome::Blocked { .. } => {
            warn!("Registration blocked. This decision cannot be overridden.");
            Ok(ExitCode::from(3))
        }
        RegistrationOutcome::Declined { .. } => {
            warn!("Registration cancelled.");
            Ok(ExitCode::from(2))
        }
    }
}

fn report(evaluation: &Evaluation) {
    let matched = evaluation
        .best_student
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".into());
    let score = evaluation
        .best_score
        .map(|s| format!("{:.3}", s))
        .unwrap_or_else(|| "-".into());

    println!("Verdict:       {}", evaluation.verdict);
    println!("Closest match: {} (score {})", matched, score);
    println!(
        "Compared:      {} student(s) using {}/{} candidate image(s)",
        evaluation.students_compared,
        evaluation.usable_candidate_images,
        evaluation.candidate_images
    );
    if evaluation.gallery_faces_skipped > 0 {
        println!(
            "Skipped:       {} stored face image(s) could not be compared",
            evaluation.gallery_faces_skipped
        );
    }
    if !evaluation.inconclusive.is_empty() {
        let ids: Vec<String> = evaluation.inconclusive.iter().map(ToString::to_string).collect();
        println!("Inconclusive:  {}", ids.join(", "));
    }
    if let Verdict::Block(_) = evaluation.verdict {
        println!("This block is final and cannot be overridden by an administrator.");
    }
}

struct StdinPrompt;

impl ReviewPrompt for StdinPrompt {
    fn confirm_distinct(&mut self, record: &StudentRecord, evaluation: &Evaluation) -> bool {
        println!();
        println!("Review required: {}", evaluation.verdict.reason());
        for line in registration::review_details(evaluation) {
            println!("  {}", line);
        }
        print!(
            "Is {} ({}) a different person? Type 'yes' to continue: ",
            record.name, record.student_id
        );
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => answer.trim().eq_ignore_ascii_case("yes"),
            Err(err) => {
                warn!("Failed to read confirmation: {}", err);
                false
            }
        }
    }
}

fn list(cfg: &Config) -> Result<ExitCode> {
    let store = cfg.storage.open_store()?;
    let students = store.students().context("Failed to list students")?;
    if students.is_empty() {
        info!("No students registered.");
        return Ok(ExitCode::SUCCESS);
    }
    for (id, record) in students {
        match record {
            Some(r) => println!(
                "{:<12} {:<24} {:<32} {}",
                id,
                r.name,
                r.email,
                r.registered_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("{:<12} -", id),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn purge(cfg: &Config, id: &str) -> Result<ExitCode> {
    let student_id = StudentId::new(id)?;
    info!("Purging student: {}", student_id);

    let store = cfg.storage.open_store()?;
    store
        .purge(&student_id)
        .context("Failed to purge student")?;

    info!("✓ Student {} removed", student_id);
    Ok(ExitCode::SUCCESS)
}

fn show_audit(cfg: &Config, tail: usize) -> Result<ExitCode> {
    let entries = audit::read_entries(&cfg.storage.audit_log)?;
    let skip = entries.len().saturating_sub(tail);
    for entry in entries.iter().skip(skip) {
        println!(
            "{} {:<16} {:<9} {:<18} candidate={} best={} score={} operator={}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", entry.event),
            entry.outcome,
            entry.reason,
            entry.candidate.as_deref().unwrap_or("-"),
            entry.best_student.as_deref().unwrap_or("-"),
            entry
                .best_score
                .map(|s| format!("{:.3}", s))
                .unwrap_or_else(|| "-".into()),
            entry.operator
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn init(cfg: &Config) -> Result<ExitCode> {
    let store = cfg
        .storage
        .init_store()
        .context("Failed to create training image store")?;
    JsonlAuditLog::open(&cfg.storage.audit_log).context("Failed to create security log")?;
    info!("✓ Training images: {}", store.root().display());
    info!("✓ Security log:    {}", cfg.storage.audit_log.display());
    Ok(ExitCode::SUCCESS)
}

fn validate(cfg: &Config) -> Result<ExitCode> {
    let store = cfg.storage.open_store()?;
    let scorer =
        PairScorer::new(cfg.similarity.clone()).context("Invalid similarity configuration")?;
    let report = maintenance::inspect(&store, &scorer, &cfg.gate, cfg.storage.min_training_images)
        .context("Failed to inspect training images")?;

    info!("Training images found for {} student(s)", report.students.len());
    for health in report.orphaned() {
        warn!("{}: no student record (run `attendrs clean`)", health.student);
    }
    for health in report.inconclusive() {
        warn!(
            "{}: no usable face images out of {}; every registration will need review",
            health.student, health.images
        );
    }
    for health in report.sparse() {
        warn!(
            "{}: only {} usable face image(s), {} recommended",
            health.student, health.usable, report.min_training_images
        );
    }

    if report.is_healthy() {
        info!("✓ No issues found");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(2))
    }
}

fn clean(cfg: &Config, yes: bool) -> Result<ExitCode> {
    let store = cfg.storage.open_store()?;
    let scorer =
        PairScorer::new(cfg.similarity.clone()).context("Invalid similarity configuration")?;
    let report = maintenance::inspect(&store, &scorer, &cfg.gate, cfg.storage.min_training_images)
        .context("Failed to inspect training images")?;

    if report.orphaned().next().is_none() {
        info!("No orphaned student directories.");
        return Ok(ExitCode::SUCCESS);
    }
    if !yes {
        for health in report.orphaned() {
            println!("{}", store.root().join(health.student.as_str()).display());
        }
        info!("Re-run with --yes to remove these directories.");
        return Ok(ExitCode::SUCCESS);
    }

    let removed = maintenance::remove_orphans(&store, &report)?;
    info!("✓ Removed {} orphaned director(ies)", removed.len());
    Ok(ExitCode::SUCCESS)
}

fn open_config(config_path: &Path) -> Result<ExitCode> {
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    if !config_path.exists() {
        config::save_config(&Config::default(), Some(config_path))
            .context("Failed to write default config")?;
    }
    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(ExitCode::SUCCESS)
}
