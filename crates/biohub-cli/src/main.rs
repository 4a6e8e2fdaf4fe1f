//! `biohub-security`: batch rule evaluation and ledger maintenance.
//!
//! Reads `biohub.toml` (or the path given with `--config`) layered with
//! `BIOHUB_*` environment variables, opens the SQLite store and runs one
//! subcommand. Results are written to stdout as JSON.
//!
//! ```
//! biohub-security evaluate-submission --submission <id> --commit
//! ```

mod runner;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use biohub_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::settings::RunnerConfig;

#[derive(Parser)]
#[command(author, version, about = "BioHub feature security runner")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "biohub.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Evaluate every current rule against one feature.
  Evaluate {
    #[arg(long)]
    feature: Uuid,
    /// Write hits to the security ledger.
    #[arg(long)]
    commit:  bool,
  },
  /// Evaluate every feature of a submission, parents first.
  EvaluateSubmission {
    #[arg(long)]
    submission: Uuid,
    /// Write hits to the security ledger.
    #[arg(long)]
    commit:     bool,
  },
  /// Rules currently securing a feature.
  SecuredBy {
    #[arg(long)]
    feature: Uuid,
  },
  /// Apply rules to features in one transaction.
  Apply {
    #[arg(long = "rule", required = true)]
    rules:    Vec<Uuid>,
    #[arg(long = "feature", required = true)]
    features: Vec<Uuid>,
  },
  /// Remove rules from features in one transaction.
  Remove {
    #[arg(long = "rule", required = true)]
    rules:    Vec<Uuid>,
    #[arg(long = "feature", required = true)]
    features: Vec<Uuid>,
  },
  /// List current security rules.
  Rules,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = RunnerConfig::load(&cli.config)?;

  let store = SqliteStore::open_with(&cfg.store_path, cfg.busy_timeout())
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  match cli.command {
    Command::Evaluate { feature, commit } => {
      let report = runner::evaluate_feature(&store, feature, commit)
        .await
        .with_context(|| format!("failed to evaluate feature {feature}"))?;
      print_json(&report)?;
    }
    Command::EvaluateSubmission { submission, commit } => {
      let report = runner::evaluate_submission(&store, submission, commit)
        .await
        .with_context(|| format!("failed to evaluate submission {submission}"))?;
      print_json(&report)?;
      if report.failed > 0 {
        anyhow::bail!("{} feature(s) failed evaluation", report.failed);
      }
    }
    Command::SecuredBy { feature } => {
      let report = runner::secured_by(&store, feature)
        .await
        .with_context(|| format!("failed to read ledger for feature {feature}"))?;
      print_json(&report)?;
    }
    Command::Apply { rules, features } => {
      runner::stage(&store, features, rules, false)
        .await
        .context("failed to apply staged rules")?;
      tracing::info!("staged rules applied");
    }
    Command::Remove { rules, features } => {
      runner::stage(&store, features, rules, true)
        .await
        .context("failed to remove staged rules")?;
      tracing::info!("staged rules removed");
    }
    Command::Rules => {
      let rules = runner::rules(&store).await.context("failed to list rules")?;
      print_json(&rules)?;
    }
  }

  Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
  let text = serde_json::to_string_pretty(value).context("failed to serialise output")?;
  println!("{text}");
  Ok(())
}
