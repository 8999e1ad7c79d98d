//! # stevedore
//!
//! Injects provenance labels into Dockerfiles.
//!
//! Each labeled Dockerfile records its author, a layer counter continued from
//! the parent image's own labels, a unique trace id, the tool name and, when
//! the file is tracked by git, the repository, organization, file and commit.

#![warn(missing_docs)]

pub mod cli;
pub mod discover;
pub mod dockerfile;
pub mod git;
pub mod label;
pub mod pipeline;

pub use dockerfile::{Instruction, InstructionDocument, ParseError};
pub use git::{GitMetadata, GitService};
pub use label::{GitInfo, LabelMetadata, LabelSynthesizer, TOOL_NAME};
pub use pipeline::{FileOutcome, LabeledDockerfile, LabelingPipeline, Outcome, PipelineState};
