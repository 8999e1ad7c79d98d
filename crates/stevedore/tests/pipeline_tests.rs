//! Integration tests for the labeling pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use stevedore::discover::{self, Job};
use stevedore::{GitMetadata, LabelingPipeline, Outcome, PipelineState};
use stevedore_common::{StevedoreError, StevedoreResult};
use stevedore_image::{ImageReference, LineageInfo, LineageSource};
use tempfile::tempdir;

/// Lineage keyed by namespace; unknown namespaces have no lineage.
#[derive(Default)]
struct FakeLineage {
    layers: HashMap<&'static str, i64>,
    failing: Vec<&'static str>,
    calls: Mutex<Vec<ImageReference>>,
}

impl FakeLineage {
    fn with_layer(mut self, namespace: &'static str, layer: i64) -> Self {
        self.layers.insert(namespace, layer);
        self
    }

    fn failing(mut self, namespace: &'static str) -> Self {
        self.failing.push(namespace);
        self
    }
}

#[async_trait]
impl LineageSource for FakeLineage {
    async fn resolve(&self, reference: &ImageReference) -> StevedoreResult<LineageInfo> {
        self.calls.lock().unwrap().push(reference.clone());
        if self.failing.contains(&reference.namespace.as_str()) {
            return Err(StevedoreError::RegistryAuth {
                repository: reference.namespace.clone(),
                message: "unexpected status code: 401".to_string(),
            });
        }
        Ok(self
            .layers
            .get(reference.namespace.as_str())
            .map_or_else(LineageInfo::none, |&layer| LineageInfo::after(layer)))
    }
}

struct FakeGit;

impl GitMetadata for FakeGit {
    fn commit_hash(&self) -> StevedoreResult<String> {
        Ok("abc123".to_string())
    }

    fn organization(&self) -> &str {
        "acme"
    }

    fn repo_name(&self) -> &str {
        "widget"
    }

    fn relative_path(&self, abs_path: &Path) -> StevedoreResult<PathBuf> {
        Ok(PathBuf::from(abs_path.file_name().unwrap()))
    }
}

const SIMPLE: &str = "FROM alpine\nCMD [\"echo\",\"hi\"]\n";

fn pipeline(lineage: FakeLineage) -> LabelingPipeline {
    LabelingPipeline::new(Arc::new(lineage)).with_author(Some("Ada".to_string()))
}

fn last_line(text: &str) -> &str {
    text.lines().last().unwrap()
}

#[test_log::test(tokio::test)]
async fn labels_without_git() {
    let labeled = pipeline(FakeLineage::default())
        .label_source(Path::new("Dockerfile"), SIMPLE)
        .await
        .unwrap();

    assert!(labeled.text.starts_with(SIMPLE));
    assert!(labeled.created_label);
    assert_eq!(labeled.layer, 0);

    let label = last_line(&labeled.text);
    assert!(label.starts_with("LABEL layer.0.author=\"Ada\" layer.0.trace=\""));
    assert!(label.contains(&format!("layer.0.trace=\"{}\"", labeled.trace_id)));
    assert!(label.ends_with("layer.0.tool=\"stevedore\""));
    assert!(!label.contains("git_"));
    assert_eq!(labeled.text.lines().count(), 3);
}

#[tokio::test]
async fn labels_with_git() {
    let labeled = pipeline(FakeLineage::default())
        .with_git(Some(Arc::new(FakeGit)))
        .label_source(Path::new("Dockerfile"), SIMPLE)
        .await
        .unwrap();

    assert!(last_line(&labeled.text).ends_with(
        "layer.0.tool=\"stevedore\" git_repo=\"widget\" git_org=\"acme\" git_file=\"Dockerfile\" git_commit=\"abc123\""
    ));
}

#[tokio::test]
async fn existing_label_is_extended() {
    let source = "FROM alpine\nLABEL foo=\"bar\"\nCMD sh\n";
    let labeled = pipeline(FakeLineage::default())
        .label_source(Path::new("Dockerfile"), source)
        .await
        .unwrap();

    assert!(!labeled.created_label);
    let lines: Vec<&str> = labeled.text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "FROM alpine");
    assert!(lines[1].starts_with("LABEL foo=\"bar\" layer.0.author=\"Ada\""));
    assert!(lines[1].contains("layer.0.tool=\"stevedore\""));
    assert_eq!(lines[2], "CMD sh");
}

#[tokio::test]
async fn layer_continues_parent_lineage() {
    let lineage = FakeLineage::default().with_layer("library/alpine", 2);
    let labeled = pipeline(lineage)
        .label_source(Path::new("Dockerfile"), SIMPLE)
        .await
        .unwrap();

    assert_eq!(labeled.layer, 3);
    assert!(last_line(&labeled.text).starts_with("LABEL layer.3.author=\"Ada\""));
}

// Multi-stage builds: every FROM is resolved and the last one carrying
// lineage decides the layer, even if it is not the final stage.
#[tokio::test]
async fn last_from_with_lineage_wins() {
    let source = "FROM golang:1.22 AS build\nFROM org/app:1.2\nFROM org/plain\n";
    let lineage = FakeLineage::default()
        .with_layer("library/golang", 7)
        .with_layer("org/app", 1);
    let pipeline = pipeline(lineage);

    let labeled = pipeline
        .label_source(Path::new("Dockerfile"), source)
        .await
        .unwrap();
    assert_eq!(labeled.layer, 2);
}

#[tokio::test]
async fn every_from_is_resolved_in_order() {
    let lineage = Arc::new(FakeLineage::default());
    let pipeline = LabelingPipeline::new(lineage.clone()).with_author(Some("Ada".to_string()));

    pipeline
        .label_source(
            Path::new("Dockerfile"),
            "FROM --platform=linux/amd64 golang AS build\nFROM scratch\nFROM org/app:1.2\n",
        )
        .await
        .unwrap();

    let calls = lineage.calls.lock().unwrap();
    assert_eq!(
        *calls,
        vec![
            ImageReference::parse("golang"),
            ImageReference::parse("org/app:1.2")
        ]
    );
}

// Every LABEL instruction is extended, not only the first.
#[tokio::test]
async fn every_label_is_extended() {
    let source = "FROM alpine\nLABEL a=1\nLABEL b=2\n";
    let labeled = pipeline(FakeLineage::default())
        .label_source(Path::new("Dockerfile"), source)
        .await
        .unwrap();

    let lines: Vec<&str> = labeled.text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("LABEL a=1 layer.0.author"));
    assert!(lines[2].starts_with("LABEL b=2 layer.0.author"));
}

// Each LABEL takes the layer of the stage it sits in; the reported layer is
// the one in effect at the end of the file.
#[tokio::test]
async fn label_takes_layer_where_it_appears() {
    let source = "FROM golang\nLABEL a=1\nFROM alpine\nLABEL b=2\n";
    let lineage = FakeLineage::default()
        .with_layer("library/golang", 1)
        .with_layer("library/alpine", 4);

    let labeled = pipeline(lineage)
        .label_source(Path::new("Dockerfile"), source)
        .await
        .unwrap();

    let lines: Vec<&str> = labeled.text.lines().collect();
    assert!(lines[1].starts_with("LABEL a=1 layer.2.author"));
    assert!(lines[3].starts_with("LABEL b=2 layer.5.author"));
    assert_eq!(labeled.layer, 5);
    // One trace id per run.
    let trace = format!("trace=\"{}\"", labeled.trace_id);
    assert!(lines[1].contains(&trace));
    assert!(lines[3].contains(&trace));
}

#[tokio::test]
async fn trace_differs_between_runs() {
    let pipeline = pipeline(FakeLineage::default());
    let first = pipeline
        .label_source(Path::new("Dockerfile"), SIMPLE)
        .await
        .unwrap();
    let second = pipeline
        .label_source(Path::new("Dockerfile"), SIMPLE)
        .await
        .unwrap();

    assert_ne!(first.trace_id, second.trace_id);
    assert_ne!(first.text, second.text);
}

#[tokio::test]
async fn comments_and_continuations_survive() {
    let source = "# syntax=docker/dockerfile:1\nFROM alpine\n\n# deps\nRUN apk add \\\n    curl\n";
    let labeled = pipeline(FakeLineage::default())
        .label_source(Path::new("Dockerfile"), source)
        .await
        .unwrap();

    assert!(labeled.text.starts_with(source));
}

#[tokio::test]
async fn crlf_line_endings_are_kept() {
    let pipeline = pipeline(FakeLineage::default());

    let extended = pipeline
        .label_source(Path::new("Dockerfile"), "FROM alpine\r\nLABEL a=b\r\n")
        .await
        .unwrap();
    assert!(extended.text.starts_with("FROM alpine\r\nLABEL a=b layer.0.author=\"Ada\""));
    assert!(extended.text.ends_with("layer.0.tool=\"stevedore\"\r\n"));
    assert!(!extended.text.contains("\r "));

    let created = pipeline
        .label_source(Path::new("Dockerfile"), "FROM alpine\r\nCMD sh\r\n")
        .await
        .unwrap();
    assert!(created.text.starts_with("FROM alpine\r\nCMD sh\r\nLABEL layer.0.author"));
    assert!(created.text.ends_with("layer.0.tool=\"stevedore\"\r\n"));
}

#[tokio::test]
async fn byte_order_mark_survives_labeling() {
    let source = "\u{feff}FROM alpine\nCMD sh\n";
    let labeled = pipeline(FakeLineage::default().with_layer("library/alpine", 1))
        .label_source(Path::new("Dockerfile"), source)
        .await
        .unwrap();

    assert!(labeled.text.starts_with(source));
    assert_eq!(labeled.layer, 2);
}

#[tokio::test]
async fn registry_failure_aborts() {
    let (state, error) = pipeline(FakeLineage::default().failing("library/alpine"))
        .label_source(Path::new("Dockerfile"), SIMPLE)
        .await
        .unwrap_err();

    assert_eq!(state, PipelineState::Parsed);
    assert!(matches!(error, StevedoreError::RegistryAuth { .. }));
}

#[tokio::test]
async fn unparsable_source_fails_before_lineage() {
    let lineage = Arc::new(FakeLineage::default());
    let pipeline = LabelingPipeline::new(lineage.clone());

    let (state, error) = pipeline
        .label_source(Path::new("Dockerfile"), "FROM alpine\n  && oops\n")
        .await
        .unwrap_err();

    assert_eq!(state, PipelineState::Idle);
    assert!(matches!(error, StevedoreError::Parse { .. }));
    assert!(lineage.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn run_writes_output() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("Dockerfile");
    let output = dir.path().join("out/nested/Dockerfile");
    std::fs::write(&source, SIMPLE).unwrap();

    let outcome = pipeline(FakeLineage::default()).run(&source, &output).await;

    assert_eq!(outcome.state(), PipelineState::Written);
    let written = std::fs::read_to_string(&output).unwrap();
    assert!(written.starts_with(SIMPLE));
    assert!(last_line(&written).starts_with("LABEL layer.0.author=\"Ada\""));
    // Source untouched when writing elsewhere.
    assert_eq!(std::fs::read_to_string(&source).unwrap(), SIMPLE);
}

#[tokio::test]
async fn run_reports_missing_file() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("Dockerfile");

    let outcome = pipeline(FakeLineage::default())
        .run(&missing, &missing)
        .await;

    assert!(outcome.is_failure());
    assert!(matches!(
        outcome.outcome,
        Outcome::Failed {
            after: PipelineState::Idle,
            error: StevedoreError::Parse { .. }
        }
    ));
}

#[tokio::test]
async fn run_reports_write_failure() {
    let dir = tempdir().unwrap();
    let source = dir.path().join("Dockerfile");
    std::fs::write(&source, SIMPLE).unwrap();
    // A regular file where a directory is needed.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "").unwrap();

    let outcome = pipeline(FakeLineage::default())
        .run(&source, &blocker.join("Dockerfile"))
        .await;

    assert!(matches!(
        outcome.outcome,
        Outcome::Failed {
            after: PipelineState::Serialized,
            error: StevedoreError::Write { .. }
        }
    ));
}

#[tokio::test]
async fn batch_continues_after_failure() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("bad")).unwrap();
    std::fs::create_dir_all(root.join("good")).unwrap();
    std::fs::write(root.join("bad/Dockerfile"), "FROM alpine\n  && oops\n").unwrap();
    std::fs::write(root.join("good/Dockerfile"), SIMPLE).unwrap();

    let jobs = discover::directory_jobs(root, None);
    assert_eq!(
        jobs,
        vec![
            Job {
                source: root.join("bad/Dockerfile"),
                output: root.join("bad/Dockerfile"),
            },
            Job {
                source: root.join("good/Dockerfile"),
                output: root.join("good/Dockerfile"),
            },
        ]
    );

    let outcomes = discover::label_all(&pipeline(FakeLineage::default()), jobs, 2).await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].is_failure());
    assert_eq!(outcomes[1].state(), PipelineState::Written);

    let good = std::fs::read_to_string(root.join("good/Dockerfile")).unwrap();
    assert!(last_line(&good).contains("layer.0.tool=\"stevedore\""));
    // Failed files are left as they were.
    assert_eq!(
        std::fs::read_to_string(root.join("bad/Dockerfile")).unwrap(),
        "FROM alpine\n  && oops\n"
    );
}
