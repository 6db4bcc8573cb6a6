use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch::{
    config, EnrollmentRecord, EnrollmentStore, FileStore, ImageStore, MatchOutcome, MatchPolicy,
    Matcher, Pipeline,
};
use facematch_vision::decode_image;
use log::info;

#[derive(Parser)]
#[command(name = "facematch")]
#[command(
    version,
    about = "Match a face image against enrolled reference faces"
)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the enrolled face closest to the face in an image
    Match {
        /// JPEG or PNG image containing one face
        image: PathBuf,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// Enroll a reference image
    Enroll {
        image: PathBuf,
        /// Identity key (defaults to a random UUID)
        #[arg(short, long)]
        key: Option<String>,
    },
    /// List enrolled identity keys
    List,
    /// Remove one enrolled face
    Remove { key: String },
    /// Remove all enrolled faces
    Purge,
    /// Write the reference image of an enrolled face to a file
    Show {
        key: String,
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Write the default config if absent and print its path
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();
    let cfg = config::load_config(config_path)?;
    let store = FileStore::open(&cfg.store_dir);

    match cli.command {
        Commands::Match { image, json } => run_match(&cfg, store, &image, json),
        Commands::Enroll { image, key } => enroll(&cfg, &store, &image, key),
        Commands::List => list(&store),
        Commands::Remove { key } => remove(&store, &key),
        Commands::Purge => purge(&store),
        Commands::Show { key, out } => show(&store, &key, &out),
        Commands::Config => show_config(&cfg, config_path),
    }
}

fn pipeline(cfg: &config::Config) -> Result<Pipeline> {
    Ok(Pipeline::new(&cfg.detector_model, &cfg.recognizer_model)
        .context("Failed to initialize face recognition pipeline")?
        .with_thresholds(cfg.score_threshold, cfg.nms_threshold))
}

fn run_match(cfg: &config::Config, store: FileStore, image: &Path, json: bool) -> Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let mut matcher =
        Matcher::new(pipeline(cfg)?, store).with_policy(MatchPolicy::new(cfg.threshold));

    let outcome = matcher
        .match_image(&bytes)
        .context("Matching failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    match outcome {
        MatchOutcome::Matched {
            identity_key,
            distance,
        } => {
            println!("✓ Match found: {identity_key}");
            println!("  distance: {distance:.4}");
        }
        MatchOutcome::NoMatch {
            nearest_distance: Some(d),
        } => {
            println!(
                "No face similar enough (distance >= {:.2})",
                cfg.threshold
            );
            println!("  nearest distance: {d:.4}");
        }
        MatchOutcome::NoMatch {
            nearest_distance: None,
        } => println!("No enrolled faces to compare against. Run 'enroll' first."),
        MatchOutcome::EncodingFailed { reason } => {
            println!("Could not use this image: {reason}");
        }
    }
    Ok(())
}

fn enroll(cfg: &config::Config, store: &FileStore, image: &Path, key: Option<String>) -> Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let img = decode_image(&bytes)?;
    let mut pipeline = pipeline(cfg)?;

    let Some((detection, embedding)) = pipeline.process_image(&img)? else {
        anyhow::bail!(
            "Failed to detect a face in {}. Please use a clear, well-lit image.",
            image.display()
        );
    };
    info!("Best face: score {:.3}", detection.score);

    let identity_key = key.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let record = EnrollmentRecord::new(identity_key.clone(), embedding.to_vec());
    store
        .enroll(record, Some(bytes.as_slice()))
        .context("Failed to save face record")?;

    info!("✓ Face enrolled as: {}", identity_key);
    Ok(())
}

fn list(store: &FileStore) -> Result<()> {
    let records = store.load_all().context("Failed to load face records")?;
    info!("{} enrolled face(s)", records.len());
    for record in records {
        println!("{}\t{} dims", record.identity_key, record.embedding.len());
    }
    Ok(())
}

fn remove(store: &FileStore, key: &str) -> Result<()> {
    if store.remove(key).context("Failed to remove face record")? {
        info!("✓ Removed: {}", key);
        Ok(())
    } else {
        anyhow::bail!("No enrolled face with key: {}", key)
    }
}

fn purge(store: &FileStore) -> Result<()> {
    info!("Purging enrolled faces in {}", store.root().display());
    store.purge().context("Failed to purge face records")?;
    info!("✓ All faces purged");
    Ok(())
}

fn show(store: &FileStore, key: &str, out: &Path) -> Result<()> {
    let bytes = store
        .load_image(key)
        .context("Failed to read reference image")?
        .with_context(|| format!("No reference image stored for key: {key}"))?;
    std::fs::write(out, bytes).with_context(|| format!("writing {}", out.display()))?;
    info!("✓ Wrote reference image for {} to {}", key, out.display());
    Ok(())
}

fn show_config(cfg: &config::Config, path: Option<&Path>) -> Result<()> {
    let config_path = config::ensure_config(cfg, path).context("Failed to write default config")?;
    info!("Config file: {}", config_path.display());
    println!("{}", config_path.display());
    Ok(())
}
