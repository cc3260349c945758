mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::Config;
use doorward_core::{
    attire, AccessEngine, AccessSummary, AuditLogger, EmbeddingExtractor, EnrollmentRecord, EnrollmentStatus,
    FallbackAuditLog, GalleryProvider, InMemoryGallery, OnnxExtractor, ParallelMatcher, PolicyBook, PolicyProvider,
    Snapshot,
};
use doorward_store::{JsonlAuditLog, PhotoStore, SqliteStore};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "doorward", about = "Doorward access-decision CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a subject from a reference photo
    Enroll {
        #[arg(long)]
        env: String,
        #[arg(long)]
        id: String,
        /// Display name shown on decisions and logs
        #[arg(long)]
        name: String,
        photo: PathBuf,
    },
    /// Replace a subject's embedding and reference photo
    Reenroll {
        #[arg(long)]
        env: String,
        #[arg(long)]
        id: String,
        photo: PathBuf,
    },
    /// Activate, deactivate or toggle an enrollment
    Status {
        #[arg(long)]
        env: String,
        #[arg(long)]
        id: String,
        #[arg(value_enum)]
        action: StatusAction,
    },
    /// Remove an enrollment and its reference photo
    Remove {
        #[arg(long)]
        env: String,
        #[arg(long)]
        id: String,
    },
    /// List enrollments
    List {
        #[arg(long)]
        env: Option<String>,
    },
    /// Run a full access check on an image (exit 0 granted, 1 denied, 2 on error)
    Check {
        #[arg(long)]
        env: String,
        /// Device id recorded in the access log
        #[arg(long)]
        device: Option<String>,
        image: PathBuf,
    },
    /// Score attire only
    Score {
        #[arg(long)]
        env: String,
        image: PathBuf,
    },
    /// Show recent access log entries
    Logs {
        #[arg(long)]
        env: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Print totals instead of entries
        #[arg(long)]
        summary: bool,
        /// Read the JSON-lines fallback log instead of the database
        #[arg(long)]
        fallback: bool,
    },
    /// Show the effective policy
    Policy {
        #[arg(long)]
        env: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusAction {
    Active,
    Inactive,
    Toggle,
}

/// Exit status for failures that prevented a decision, kept apart from a denial (1).
const EXIT_ERROR: u8 = 2;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match run(cli.command, &config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

fn run(command: Commands, config: &Config) -> Result<ExitCode> {
    match command {
        Commands::Enroll { env, id, name, photo } => enroll(config, &env, &id, &name, &photo)?,
        Commands::Reenroll { env, id, photo } => reenroll(config, &env, &id, &photo)?,
        Commands::Status { env, id, action } => {
            let store = open_store(config)?;
            let status = match action {
                StatusAction::Active => set_status(&store, &env, &id, EnrollmentStatus::Active)?,
                StatusAction::Inactive => set_status(&store, &env, &id, EnrollmentStatus::Inactive)?,
                StatusAction::Toggle => store.toggle_status(&env, &id)?,
            };
            println!("{env}/{id}: {status}");
        }
        Commands::Remove { env, id } => {
            let removed = open_store(config)?.remove(&env, &id)?;
            println!("Removed {}/{} ({})", removed.environment, removed.subject_id, removed.display_name);
        }
        Commands::List { env } => {
            let records = open_store(config)?.list(env.as_deref())?;
            if records.is_empty() {
                println!("No subjects enrolled");
            }
            for r in records {
                println!("{:<16} {:<16} {:<8} {}", r.environment, r.subject_id, r.status, r.display_name);
            }
        }
        Commands::Check { env, device, image } => return check(config, &env, device, &image),
        Commands::Score { env, image } => {
            let policy = policies(config).policy(&env);
            if !policy.uniform_enabled {
                tracing::info!(environment = %env, "uniform checking is off for this environment");
            }
            let snapshot = Snapshot::open(&image).with_context(|| format!("failed to read {}", image.display()))?;
            let report = attire::score(&snapshot, &policy.attire);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Logs {
            env,
            limit,
            summary,
            fallback,
        } => {
            let entries = if fallback {
                JsonlAuditLog::new(&config.audit_fallback).recent(env.as_deref(), limit)?
            } else {
                open_store(config)?.recent_logs(env.as_deref(), limit)?
            };
            if summary {
                println!("{}", serde_json::to_string_pretty(&AccessSummary::from_entries(&entries))?);
            } else {
                for e in &entries {
                    println!("{}", serde_json::to_string(e)?);
                }
            }
        }
        Commands::Policy { env } => {
            let book = policies(config);
            match env {
                Some(env) => println!("{}", serde_json::to_string_pretty(&book.policy(&env))?),
                None => {
                    let all: Vec<_> = book.environments().filter_map(|e| book.get(e)).collect();
                    println!("{}", serde_json::to_string_pretty(&all)?);
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.db_path).with_context(|| format!("failed to open {}", config.db_path.display()))
}

fn policies(config: &Config) -> PolicyBook {
    PolicyBook::load_or_builtin(config.policy_file.as_deref())
}

fn load_extractor(config: &Config) -> Result<OnnxExtractor> {
    OnnxExtractor::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))
}

fn set_status(store: &SqliteStore, env: &str, id: &str, status: EnrollmentStatus) -> Result<EnrollmentStatus> {
    store.set_status(env, id, status)?;
    Ok(status)
}

/// Embedding of the most confident face in `photo`.
fn first_face(extractor: &mut OnnxExtractor, photo: &Path) -> Result<doorward_core::Embedding> {
    let snapshot = Snapshot::open(photo).with_context(|| format!("failed to read {}", photo.display()))?;
    let faces = extractor.extract(&snapshot)?;
    if faces.len() > 1 {
        tracing::warn!(faces = faces.len(), photo = %photo.display(), "several faces in photo; using the most confident");
    }
    match faces.into_iter().next() {
        Some(face) => Ok(face.embedding),
        None => bail!("no face detected in {}", photo.display()),
    }
}

fn enroll(config: &Config, env: &str, id: &str, name: &str, photo: &Path) -> Result<()> {
    let store = open_store(config)?;
    if store.exists(env, id)? {
        bail!("{env}/{id} is already enrolled; use `doorward reenroll`");
    }
    let embedding = first_face(&mut load_extractor(config)?, photo)?;

    let stored = PhotoStore::new(&config.photo_dir).save(env, id, photo)?;
    let mut record = EnrollmentRecord::new(env, id, name, embedding);
    record.reference_image = Some(stored.to_string_lossy().into_owned());
    if let Err(e) = store.enroll(&record) {
        discard_copy(&stored);
        return Err(e.into());
    }
    println!("Enrolled {env}/{id} ({name})");
    Ok(())
}

/// Undo a photo copy whose enrollment failed.
fn discard_copy(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove copied reference photo"),
    }
}

fn reenroll(config: &Config, env: &str, id: &str, photo: &Path) -> Result<()> {
    let store = open_store(config)?;
    if !store.exists(env, id)? {
        bail!("{env}/{id} is not enrolled");
    }
    let embedding = first_face(&mut load_extractor(config)?, photo)?;

    let stored = PhotoStore::new(&config.photo_dir).save(env, id, photo)?;
    store.reenroll(env, id, &embedding, stored.to_str())?;
    println!("Re-enrolled {env}/{id}");
    Ok(())
}

fn check(config: &Config, env: &str, device: Option<String>, image: &Path) -> Result<ExitCode> {
    let snapshot = Snapshot::open(image).with_context(|| format!("failed to read {}", image.display()))?;
    let extractor = load_extractor(config)?;
    let fallback = JsonlAuditLog::new(&config.audit_fallback);

    // Without the database the attempt still runs: nobody matches and the
    // log entry goes to the fallback file.
    let (gallery, audit): (Box<dyn GalleryProvider>, Box<dyn AuditLogger>) = match open_store(config) {
        Ok(store) => {
            let store = Arc::new(store);
            (
                Box::new(Arc::clone(&store)),
                Box::new(FallbackAuditLog::new(Box::new(store), Box::new(fallback))),
            )
        }
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "database unavailable; matching against an empty gallery");
            (Box::new(InMemoryGallery::new()), Box::new(fallback))
        }
    };

    let mut engine = AccessEngine::new(Box::new(extractor), gallery, Box::new(policies(config)), audit)
        .with_matcher(Box::new(ParallelMatcher::new(config.parallel_min)))
        .with_device_id(device.unwrap_or_else(|| config.device_id.clone()));

    let decision = engine.evaluate(&snapshot, env);
    println!("{}", serde_json::to_string_pretty(&decision)?);
    Ok(if decision.granted {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}
