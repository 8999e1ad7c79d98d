//! Stevedore CLI.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use console::style;
use stevedore_common::{StevedoreConfig, StevedoreResult, validate_dockerfile_path};
use stevedore_image::{CachedLineage, RegistryClient};

use crate::discover;
use crate::git::{GitMetadata, GitService};
use crate::pipeline::{FileOutcome, LabelingPipeline, Outcome};

/// Stevedore - Update Dockerfile labels with provenance metadata
#[derive(Parser)]
#[command(name = "stevedore")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file
    #[arg(long, global = true, env = "STEVEDORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Stevedore commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Updates Dockerfile labels
    #[command(visible_alias = "l")]
    Label {
        /// Dockerfile to parse
        #[arg(short, long, help_heading = "Files")]
        file: Option<PathBuf>,

        /// Directory to scan for Dockerfiles
        #[arg(short, long, default_value = ".", help_heading = "Files")]
        directory: PathBuf,

        /// Directory for updated Dockerfiles (default: rewrite in place)
        ///
        /// Without it, every Dockerfile found is overwritten with its labeled version.
        #[arg(short, long, help_heading = "Files")]
        output: Option<PathBuf>,

        /// Override for author name
        #[arg(short, long, env = "STEVEDORE_AUTHOR", help_heading = "Metadata")]
        author: Option<String>,

        /// Number of Dockerfiles labeled concurrently
        #[arg(short, long)]
        jobs: Option<usize>,
    },

    /// Outputs the application version
    #[command(visible_alias = "v")]
    Version,
}

impl Cli {
    /// Load configuration from `--config` or the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file exists but cannot be read.
    pub fn load_config(&self) -> StevedoreResult<StevedoreConfig> {
        StevedoreConfig::load(self.config.as_deref())
    }

    /// Execute the CLI command.
    pub async fn execute(self, mut config: StevedoreConfig) -> Result<()> {
        match self.command {
            Commands::Version => {
                println!("{}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }

            Commands::Label {
                file,
                directory,
                output,
                author,
                jobs,
            } => {
                if let Some(author) = author {
                    config = config.with_author(author);
                }
                if let Some(output) = output {
                    config = config.with_output(output);
                }
                if let Some(jobs) = jobs {
                    config.concurrency = jobs;
                }
                config.validate()?;

                let work_dir = file.clone().unwrap_or_else(|| directory.clone());
                validate_dockerfile_path(&work_dir)?;

                let jobs = match &file {
                    Some(file) => vec![discover::single_job(file, config.output.as_deref())],
                    None => discover::directory_jobs(&directory, config.output.as_deref()),
                };

                tracing::info!(
                    path = %work_dir.display(),
                    files = jobs.len(),
                    "Labeling"
                );

                let pipeline = build_pipeline(&config, &work_dir)?;
                let outcomes = discover::label_all(&pipeline, jobs, config.concurrency).await;
                report(&outcomes)
            }
        }
    }
}

fn build_pipeline(config: &StevedoreConfig, work_dir: &Path) -> Result<LabelingPipeline> {
    let registry = RegistryClient::new(
        config.auth_url.clone(),
        config.registry_url.clone(),
        config.http_timeout(),
    )?;

    let git: Option<Arc<dyn GitMetadata>> = match GitService::discover(work_dir) {
        Ok(service) => {
            tracing::debug!(
                root = %service.root().display(),
                remote = service.remote_url().unwrap_or("none"),
                "Using git metadata"
            );
            Some(Arc::new(service))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Git service unavailable, will skip git metadata");
            None
        }
    };

    Ok(LabelingPipeline::new(Arc::new(CachedLineage::new(registry)))
        .with_git(git)
        .with_author(config.default_author.clone()))
}

fn report(outcomes: &[FileOutcome]) -> Result<()> {
    let mut failed = 0;
    for outcome in outcomes {
        match &outcome.outcome {
            Outcome::Written { output, layer } => println!(
                "{} {} -> {} (layer {})",
                style("updated").green(),
                outcome.path.display(),
                output.display(),
                layer
            ),
            Outcome::Failed { error, .. } => {
                failed += 1;
                println!(
                    "{} {}: {}",
                    style("failed").red(),
                    outcome.path.display(),
                    error
                );
            }
        }
    }

    if outcomes.is_empty() {
        println!("No Dockerfiles found");
    }

    if failed > 0 {
        return Err(eyre!("{failed} of {} Dockerfiles failed", outcomes.len()));
    }
    Ok(())
}
