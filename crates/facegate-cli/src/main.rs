use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facegate_capture::ImageDirSource;
use facegate_core::{
    CategoryClassifier, EnrollOutcome, EnrollmentStore, LoginOutcome, RustfaceLocator, Taxonomy,
};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;

use config::Config;
use engine::{EngineError, SessionHandle};

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate face login and image category classifier")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll the user's face from a frame stream
    Enroll {
        /// Directory of frames to replay as the camera
        #[arg(short, long)]
        frames: PathBuf,
        /// Capture the first detected face without waiting for Enter
        #[arg(long)]
        auto: bool,
        /// Save the last annotated frame to this image file
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Log in by matching faces in a frame stream against the enrolled user
    Login {
        /// Directory of frames to replay as the camera
        #[arg(short, long)]
        frames: PathBuf,
        /// Save the last annotated frame to this image file
        #[arg(long)]
        preview: Option<PathBuf>,
    },
    /// Rank an image against the category taxonomy
    Classify {
        /// Image to classify
        image: PathBuf,
    },
    /// Show enrollment and configuration status
    Status,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Commands::Enroll {
            frames,
            auto,
            preview,
        } => enroll(&config, frames, auto, preview, cli.json).await,
        Commands::Login { frames, preview } => login(&config, frames, preview, cli.json).await,
        Commands::Classify { image } => classify(&config, image, cli.json).await,
        Commands::Status => {
            status(&config, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Build the frame source and detector; runs on the engine thread.
fn opener(
    frames: PathBuf,
    model: String,
    min_face_size: u32,
) -> impl FnOnce() -> Result<(ImageDirSource, RustfaceLocator), EngineError> + Send + 'static {
    move || {
        let locator = RustfaceLocator::load_with_min_face(&model, min_face_size)?;
        let source = ImageDirSource::open(&frames)?;
        Ok((source, locator))
    }
}

/// Wait for the session outcome; Ctrl-C cancels the session and keeps waiting.
///
/// With `preview` set, the last annotated frame is written there afterwards.
async fn await_outcome<T>(handle: SessionHandle<T>, preview: Option<PathBuf>) -> Result<T> {
    let signals = handle.signals();
    let slot = handle.preview();
    let outcome = handle.outcome();
    tokio::pin!(outcome);

    let result = tokio::select! {
        result = &mut outcome => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received, cancelling session");
            signals.cancel();
            outcome.await
        }
    };
    let outcome = result?;

    if let Some(path) = preview {
        match slot.latest() {
            Some(frame) => frame
                .save(&path)
                .with_context(|| format!("failed to save preview to {}", path.display()))?,
            None => tracing::warn!("no frame was processed; preview not written"),
        }
    }
    Ok(outcome)
}

async fn enroll(
    config: &Config,
    frames: PathBuf,
    auto: bool,
    preview: Option<PathBuf>,
    json: bool,
) -> Result<ExitCode> {
    let store = EnrollmentStore::new(&config.face_dir);
    let open = opener(frames, config.detector_model.clone(), config.min_face_size);
    let handle = engine::spawn_enrollment(open, store)?;

    if auto {
        handle.request_capture();
    } else {
        println!("Look at the camera and press Enter to capture.");
        let signals = handle.signals();
        // Detached: a blocked stdin read must not hold the runtime open.
        std::thread::spawn(move || {
            let mut line = String::new();
            if std::io::stdin().lock().read_line(&mut line).is_ok() {
                signals.request_capture();
            }
        });
    }

    let outcome = await_outcome(handle, preview).await?;
    print_result(&outcome, json, || match &outcome {
        EnrollOutcome::Enrolled { dir } => format!("Enrolled. Reference images saved to {}", dir.display()),
        EnrollOutcome::Failed { reason } => format!("Enrollment failed: {reason}"),
        EnrollOutcome::Cancelled => "Enrollment cancelled".to_string(),
    })?;

    Ok(match outcome {
        EnrollOutcome::Enrolled { .. } => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

async fn login(
    config: &Config,
    frames: PathBuf,
    preview: Option<PathBuf>,
    json: bool,
) -> Result<ExitCode> {
    let store = EnrollmentStore::new(&config.face_dir);
    if !store.is_enrolled() {
        tracing::warn!(dir = %config.face_dir.display(), "no enrolled face; login cannot succeed");
    }
    let open = opener(frames, config.detector_model.clone(), config.min_face_size);
    let handle = engine::spawn_login(open, store, config.login_config())?;

    let outcome = await_outcome(handle, preview).await?;
    print_result(&outcome, json, || match &outcome {
        LoginOutcome::Success { score, frames } => {
            format!("Login successful (score {score:.1}, {frames} frames)")
        }
        LoginOutcome::TimeoutFailure { frames } => {
            format!("Login failed: no face detected ({frames} frames)")
        }
        LoginOutcome::Cancelled => "Login cancelled".to_string(),
    })?;

    Ok(match outcome {
        LoginOutcome::Success { .. } => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn load_taxonomy(config: &Config) -> Result<Taxonomy> {
    let taxonomy = match &config.taxonomy {
        Some(path) => Taxonomy::load(path)?,
        None => Taxonomy::builtin()?,
    };
    Ok(taxonomy)
}

async fn classify(config: &Config, image: PathBuf, json: bool) -> Result<ExitCode> {
    let taxonomy = load_taxonomy(config)?;

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let models = taxonomy.load_models()?;
        let classifier = CategoryClassifier::new(models);
        Ok(classifier.classify_path(&image)?)
    })
    .await
    .context("classifier task panicked")??;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Serialize)]
struct StatusReport {
    face_dir: PathBuf,
    enrolled: bool,
    references: Vec<PathBuf>,
    detector_model: String,
    detector_model_present: bool,
    match_threshold: f64,
    max_misses: u32,
    taxonomy: Vec<String>,
}

fn status(config: &Config, json: bool) -> Result<()> {
    let store = EnrollmentStore::new(&config.face_dir);
    let taxonomy = load_taxonomy(config)?;

    let report = StatusReport {
        face_dir: config.face_dir.clone(),
        enrolled: store.is_enrolled(),
        references: store.reference_paths(),
        detector_model: config.detector_model.clone(),
        detector_model_present: Path::new(&config.detector_model).is_file(),
        match_threshold: config.match_threshold,
        max_misses: config.max_misses,
        taxonomy: taxonomy.names().into_iter().map(String::from).collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("face data:      {}", report.face_dir.display());
    println!(
        "enrolled:       {} ({} reference images)",
        if report.enrolled { "yes" } else { "no" },
        report.references.len()
    );
    println!(
        "detector model: {}{}",
        report.detector_model,
        if report.detector_model_present { "" } else { " (missing)" }
    );
    println!("match threshold: {}", report.match_threshold);
    println!("max misses:     {}", report.max_misses);
    println!("categories:     {}", report.taxonomy.join(", "));
    Ok(())
}

fn print_result<T: Serialize>(value: &T, json: bool, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", text());
    }
    Ok(())
}
