//! Dockerfile discovery and batch labeling.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use walkdir::{DirEntry, WalkDir};

use crate::pipeline::{FileOutcome, LabelingPipeline};

/// File name fragment identifying Dockerfiles.
const DOCKERFILE_MARKER: &str = "Dockerfile";

/// A Dockerfile and where its labeled copy goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    /// Source Dockerfile.
    pub source: PathBuf,
    /// Destination path.
    pub output: PathBuf,
}

fn is_git_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir() && entry.file_name() == ".git"
}

/// Find every file under `root` whose name contains `Dockerfile`.
///
/// Unreadable directory entries are logged and skipped.
#[must_use]
pub fn find_dockerfiles(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_git_dir(e))
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable entry");
                None
            }
        })
        .filter(|entry| {
            entry.file_type().is_file()
                && entry.file_name().to_string_lossy().contains(DOCKERFILE_MARKER)
        })
        .map(DirEntry::into_path)
        .collect()
}

/// Job for a single file. Without an output directory the file is rewritten
/// in place; otherwise the copy keeps its file name.
#[must_use]
pub fn single_job(file: &Path, output: Option<&Path>) -> Job {
    let destination = match (output, file.file_name()) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => file.to_path_buf(),
    };
    Job {
        source: file.to_path_buf(),
        output: destination,
    }
}

/// Jobs for every Dockerfile under `root`. With an output directory, each copy
/// keeps its path relative to `root`.
#[must_use]
pub fn directory_jobs(root: &Path, output: Option<&Path>) -> Vec<Job> {
    find_dockerfiles(root)
        .into_iter()
        .map(|source| {
            let destination = match output {
                Some(dir) => dir.join(source.strip_prefix(root).unwrap_or(&source)),
                None => source.clone(),
            };
            Job {
                source,
                output: destination,
            }
        })
        .collect()
}

/// Label every job, at most `concurrency` at a time.
///
/// A failing file does not stop the others. Outcomes come back in job order.
pub async fn label_all(pipeline: &LabelingPipeline, jobs: Vec<Job>, concurrency: usize) -> Vec<FileOutcome> {
    tracing::info!(files = jobs.len(), concurrency, "Labeling Dockerfiles");

    stream::iter(jobs)
        .map(|job| async move { pipeline.run(&job.source, &job.output).await })
        .buffered(concurrency.max(1))
        .collect()
        .await
}
