//! Provenance label synthesis.
//!
//! Every labeled Dockerfile gets `layer.<N>.author`, `layer.<N>.trace` and
//! `layer.<N>.tool` pairs, followed by `git_*` pairs when the file lives in a
//! git repository:
//!
//! ```text
//! LABEL layer.1.author="Ada" layer.1.trace="<uuid>" layer.1.tool="stevedore" git_repo="widget" ...
//! ```

use std::path::Path;

use uuid::Uuid;

use crate::dockerfile::{Instruction, InstructionDocument};
use crate::git::GitMetadata;

/// Value of the `tool` label.
pub const TOOL_NAME: &str = "stevedore";

/// Author used when nothing else resolves.
pub const UNKNOWN_AUTHOR: &str = "unknown";

const LABEL_KEYWORD: &str = "LABEL";

/// Git facts for the file being labeled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInfo {
    /// Repository name.
    pub repo: String,
    /// Organization.
    pub org: String,
    /// File path relative to the repository root.
    pub file: String,
    /// `HEAD` commit id.
    pub commit: String,
}

impl GitInfo {
    /// Gather git facts for `abs_path`.
    ///
    /// Returns `None` (after logging a warning) when the commit cannot be
    /// resolved. A path outside the repository falls back to its file name.
    pub fn collect(git: &dyn GitMetadata, abs_path: &Path) -> Option<Self> {
        let commit = match git.commit_hash() {
            Ok(commit) => commit,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get git commit hash");
                return None;
            }
        };

        let file = match git.relative_path(abs_path) {
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to get relative path");
                abs_path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default()
            }
        };

        Some(Self {
            repo: git.repo_name().to_string(),
            org: git.organization().to_string(),
            file,
            commit,
        })
    }
}

/// Metadata written into one labeling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMetadata {
    /// Author name.
    pub author: String,
    /// Unique id of this run.
    pub trace_id: Uuid,
    /// Tool tag.
    pub tool: &'static str,
    /// Git facts, when available.
    pub git: Option<GitInfo>,
}

impl LabelMetadata {
    /// Metadata for a new run with a fresh trace id.
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            trace_id: Uuid::new_v4(),
            tool: TOOL_NAME,
            git: None,
        }
    }

    /// Attach git facts.
    #[must_use]
    pub fn with_git(mut self, git: Option<GitInfo>) -> Self {
        self.git = git;
        self
    }
}

/// Pick the label author.
///
/// An explicit override wins unless it is empty or `"."`; then git
/// `user.name`, then the OS user, then [`UNKNOWN_AUTHOR`].
#[must_use]
pub fn resolve_author(author_override: Option<&str>, git: Option<&dyn GitMetadata>) -> String {
    let usable = |name: &&str| !name.trim().is_empty() && *name != ".";

    if let Some(author) = author_override.filter(usable) {
        return author.to_string();
    }
    if let Some(name) = git.and_then(|g| g.user_name()).filter(usable) {
        return name.to_string();
    }

    ["USER", "USERNAME"]
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.trim().is_empty()))
        .unwrap_or_else(|| {
            tracing::warn!("Failed to get current user, using default");
            UNKNOWN_AUTHOR.to_string()
        })
}

/// Builds label text for one layer.
#[derive(Debug, Clone)]
pub struct LabelSynthesizer {
    layer: i64,
    metadata: LabelMetadata,
}

impl LabelSynthesizer {
    /// Create a synthesizer for `layer`.
    #[must_use]
    pub const fn new(layer: i64, metadata: LabelMetadata) -> Self {
        Self { layer, metadata }
    }

    /// Layer number being written.
    #[must_use]
    pub const fn layer(&self) -> i64 {
        self.layer
    }

    /// Metadata being written.
    #[must_use]
    pub const fn metadata(&self) -> &LabelMetadata {
        &self.metadata
    }

    /// The key/value pairs, each preceded by a space.
    #[must_use]
    pub fn pairs(&self) -> String {
        let layer = format!("layer.{}", self.layer);
        let meta = &self.metadata;

        let mut out = String::new();
        push_pair(&mut out, &format!("{layer}.author"), &meta.author);
        push_pair(&mut out, &format!("{layer}.trace"), &meta.trace_id.to_string());
        push_pair(&mut out, &format!("{layer}.tool"), meta.tool);

        if let Some(git) = &meta.git {
            push_pair(&mut out, "git_repo", &git.repo);
            push_pair(&mut out, "git_org", &git.org);
            push_pair(&mut out, "git_file", &git.file);
            push_pair(&mut out, "git_commit", &git.commit);
        }
        out
    }

    /// Label text for `target`: its own text with the pairs appended if it is
    /// already a `LABEL`, otherwise a new `LABEL` instruction.
    #[must_use]
    pub fn text_for(&self, target: Option<&Instruction>) -> String {
        match target {
            Some(instruction) if instruction.is(LABEL_KEYWORD) => {
                // Pairs go before a CRLF line ending, not after it.
                let text = &instruction.original_text;
                match text.strip_suffix('\r') {
                    Some(head) => format!("{head}{}\r", self.pairs()),
                    None => format!("{text}{}", self.pairs()),
                }
            }
            _ => format!("{LABEL_KEYWORD}{}", self.pairs()),
        }
    }

    /// Rewrite every instruction in `targets`, or append a new `LABEL` after
    /// the last instruction when `targets` is empty.
    ///
    /// Returns the indices of the labeled instructions.
    pub fn apply(&self, doc: &mut InstructionDocument, targets: &[usize]) -> Vec<usize> {
        if targets.is_empty() {
            let line = doc.last_line() + 1;
            let mut text = self.text_for(None);
            if doc
                .instructions()
                .last()
                .is_some_and(|last| last.original_text.ends_with('\r'))
            {
                text.push('\r');
            }
            let index = doc.append(Instruction::new(LABEL_KEYWORD, text, line, line));
            tracing::info!(label = %doc.instructions()[index].original_text, "Created label");
            return vec![index];
        }

        let mut labeled = Vec::with_capacity(targets.len());
        for &index in targets {
            let text = self.text_for(doc.instructions().get(index));
            if let Some(rewritten) = doc.rewrite(index, text) {
                tracing::info!(label = %rewritten.original_text, "Extended label");
                labeled.push(index);
            }
        }
        labeled
    }
}

fn push_pair(out: &mut String, key: &str, value: &str) {
    out.push(' ');
    out.push_str(key);
    out.push_str("=\"");
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
}
