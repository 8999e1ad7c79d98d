//! Labeling pipeline.
//!
//! One run labels one Dockerfile:
//!
//! ```text
//! Idle -> Parsed -> LineageResolved -> Labeled -> Serialized -> Written
//!   \________\___________\___________________________\--------> Failed
//! ```
//!
//! Runs share no mutable state, so any number may execute concurrently.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use stevedore_common::{StevedoreError, StevedoreResult};
use stevedore_image::{ImageReference, LineageInfo, LineageSource};
use uuid::Uuid;

use crate::dockerfile::{Instruction, InstructionDocument};
use crate::git::GitMetadata;
use crate::label::{GitInfo, LabelMetadata, LabelSynthesizer, resolve_author};

/// Base image with no parent.
const SCRATCH: &str = "scratch";

/// Pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Nothing done yet.
    Idle,
    /// Source split into instructions.
    Parsed,
    /// Parent lineage known.
    LineageResolved,
    /// Label instruction written into the document.
    Labeled,
    /// Document rendered to text.
    Serialized,
    /// Output file written.
    Written,
    /// Run aborted.
    Failed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Parsed => "parsed",
            Self::LineageResolved => "lineage-resolved",
            Self::Labeled => "labeled",
            Self::Serialized => "serialized",
            Self::Written => "written",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of labeling a document in memory.
#[derive(Debug, Clone)]
pub struct LabeledDockerfile {
    /// Source path.
    pub path: PathBuf,
    /// Rendered Dockerfile.
    pub text: String,
    /// Layer number written.
    pub layer: i64,
    /// Trace id written.
    pub trace_id: Uuid,
    /// Whether a new `LABEL` instruction was appended.
    pub created_label: bool,
}

/// How a single file ended up.
#[derive(Debug)]
pub enum Outcome {
    /// Labeled file written to `output`.
    Written {
        /// Destination path.
        output: PathBuf,
        /// Layer number written.
        layer: i64,
    },
    /// Run aborted.
    Failed {
        /// Last state reached before the failure.
        after: PipelineState,
        /// What went wrong.
        error: StevedoreError,
    },
}

/// Terminal report for one Dockerfile.
#[derive(Debug)]
pub struct FileOutcome {
    /// Source path.
    pub path: PathBuf,
    /// Terminal result.
    pub outcome: Outcome,
}

impl FileOutcome {
    /// Terminal state of the run.
    #[must_use]
    pub const fn state(&self) -> PipelineState {
        match self.outcome {
            Outcome::Written { .. } => PipelineState::Written,
            Outcome::Failed { .. } => PipelineState::Failed,
        }
    }

    /// Whether the run failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

/// An instruction the pipeline acts on, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Step {
    /// `FROM` naming a parent image.
    Parent(String),
    /// `LABEL` at this instruction index.
    Label(usize),
}

/// Layers worked out by the forward pass.
#[derive(Debug, Default)]
struct Layers {
    /// Layer in effect after the last instruction.
    last: i64,
    /// Each `LABEL` index with the layer in effect where it appears.
    labels: Vec<(usize, i64)>,
}

/// Labels Dockerfiles with provenance metadata.
#[derive(Clone)]
pub struct LabelingPipeline {
    lineage: Arc<dyn LineageSource>,
    git: Option<Arc<dyn GitMetadata>>,
    author: Option<String>,
}

impl fmt::Debug for LabelingPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelingPipeline")
            .field("git", &self.git.is_some())
            .field("author", &self.author)
            .finish_non_exhaustive()
    }
}

impl LabelingPipeline {
    /// Create a pipeline resolving lineage through `lineage`.
    pub fn new(lineage: Arc<dyn LineageSource>) -> Self {
        Self {
            lineage,
            git: None,
            author: None,
        }
    }

    /// Attach git metadata.
    #[must_use]
    pub fn with_git(mut self, git: Option<Arc<dyn GitMetadata>>) -> Self {
        self.git = git;
        self
    }

    /// Override the author.
    #[must_use]
    pub fn with_author(mut self, author: Option<String>) -> Self {
        self.author = author;
        self
    }

    /// Label a Dockerfile and write the result to `output`.
    ///
    /// Never returns an error: failures are reported in the [`FileOutcome`].
    pub async fn run(&self, path: &Path, output: &Path) -> FileOutcome {
        let outcome = match self.run_inner(path, output).await {
            Ok(layer) => {
                tracing::info!(path = %path.display(), output = %output.display(), "Updated");
                Outcome::Written {
                    output: output.to_path_buf(),
                    layer,
                }
            }
            Err((after, error)) => {
                tracing::error!(path = %path.display(), state = %after, error = %error, "Failed");
                Outcome::Failed { after, error }
            }
        };

        FileOutcome {
            path: path.to_path_buf(),
            outcome,
        }
    }

    async fn run_inner(&self, path: &Path, output: &Path) -> Result<i64, (PipelineState, StevedoreError)> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| {
                (
                    PipelineState::Idle,
                    StevedoreError::Parse {
                        path: path.to_path_buf(),
                        message: e.to_string(),
                    },
                )
            })?;
        tracing::info!(path = %path.display(), "Opening");

        let labeled = self.label_source(path, &source).await?;
        write_output(output, &labeled.text)
            .await
            .map_err(|e| (PipelineState::Serialized, e))?;
        Ok(labeled.layer)
    }

    /// Label Dockerfile source held in memory.
    ///
    /// `path` names the file for diagnostics and git metadata.
    ///
    /// # Errors
    ///
    /// Returns the last state reached together with a parse or registry error.
    pub async fn label_source(
        &self,
        path: &Path,
        source: &str,
    ) -> Result<LabeledDockerfile, (PipelineState, StevedoreError)> {
        let mut doc = InstructionDocument::parse(source).map_err(|e| {
            (
                PipelineState::Idle,
                StevedoreError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                },
            )
        })?;
        tracing::debug!(path = %path.display(), instructions = doc.len(), state = %PipelineState::Parsed);

        let steps = scan(&doc);
        let layers = self
            .resolve_layers(&steps)
            .await
            .map_err(|e| (PipelineState::Parsed, e))?;
        tracing::debug!(path = %path.display(), layer = layers.last, state = %PipelineState::LineageResolved);

        let metadata = self.metadata(path);
        let trace_id = metadata.trace_id;
        let created_label = layers.labels.is_empty();
        if created_label {
            LabelSynthesizer::new(layers.last, metadata).apply(&mut doc, &[]);
        } else {
            for &(index, layer) in &layers.labels {
                LabelSynthesizer::new(layer, metadata.clone()).apply(&mut doc, &[index]);
            }
        }
        tracing::debug!(path = %path.display(), labels = layers.labels.len().max(1), state = %PipelineState::Labeled);

        let text = doc.render();
        tracing::debug!(path = %path.display(), bytes = text.len(), state = %PipelineState::Serialized);

        Ok(LabeledDockerfile {
            path: path.to_path_buf(),
            text,
            layer: layers.last,
            trace_id,
            created_label,
        })
    }

    /// Walk the steps in order. A parent carrying lineage replaces the running
    /// layer; one without lineage leaves it untouched. Each `LABEL` takes the
    /// layer in effect where it appears.
    async fn resolve_layers(&self, steps: &[Step]) -> StevedoreResult<Layers> {
        let mut layers = Layers {
            last: LineageInfo::none().layer(),
            labels: Vec::new(),
        };

        for step in steps {
            match step {
                Step::Parent(parent) if parent == SCRATCH => {
                    tracing::debug!("Skipping lineage lookup for scratch");
                }
                Step::Parent(parent) => {
                    let reference = ImageReference::parse(parent);
                    let lineage = self.lineage.resolve(&reference).await?;
                    if let Some(next) = lineage.next_layer {
                        layers.last = next;
                    }
                }
                Step::Label(index) => layers.labels.push((*index, layers.last)),
            }
        }
        Ok(layers)
    }

    fn metadata(&self, path: &Path) -> LabelMetadata {
        let git = self.git.as_deref();
        let author = resolve_author(self.author.as_deref(), git);

        let git_info = match git {
            Some(git) => {
                let abs = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
                GitInfo::collect(git, &abs)
            }
            None => {
                tracing::debug!("Git service not available, skipping git metadata");
                None
            }
        };

        LabelMetadata::new(author).with_git(git_info)
    }
}

/// Walk the document once, collecting parent images and `LABEL` targets.
fn scan(doc: &InstructionDocument) -> Vec<Step> {
    let mut steps = Vec::new();
    for (index, instruction) in doc.instructions().iter().enumerate() {
        if instruction.is("FROM") {
            if let Some(image) = from_image(instruction, doc.escape()) {
                steps.push(Step::Parent(image));
            }
        }
        if instruction.is("LABEL") {
            steps.push(Step::Label(index));
        }
    }
    steps
}

/// Image named by a `FROM` instruction, without flags or stage alias.
fn from_image(instruction: &Instruction, escape: char) -> Option<String> {
    let args = instruction.arguments(escape);
    let mut words: Vec<&str> = args
        .split_whitespace()
        .skip_while(|word| word.starts_with("--"))
        .collect();

    if words.len() >= 3 && words[words.len() - 2].eq_ignore_ascii_case("as") {
        words.truncate(words.len() - 2);
    }

    let image = words.join(" ");
    (!image.is_empty()).then_some(image)
}

async fn write_output(output: &Path, text: &str) -> StevedoreResult<()> {
    let write_err = |source| StevedoreError::Write {
        path: output.to_path_buf(),
        source,
    };

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(output, text).await.map_err(write_err)
}
