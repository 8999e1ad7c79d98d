//! Tests for git metadata against real repositories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use git2::{Repository, Signature};
use stevedore::{GitInfo, GitMetadata, GitService, LabelingPipeline};
use stevedore_common::StevedoreResult;
use stevedore_image::{ImageReference, LineageInfo, LineageSource};
use tempfile::TempDir;

struct NoLineage;

#[async_trait]
impl LineageSource for NoLineage {
    async fn resolve(&self, _reference: &ImageReference) -> StevedoreResult<LineageInfo> {
        Ok(LineageInfo::none())
    }
}

/// Repository with one commit containing `svc/Dockerfile`.
fn repository(remote: Option<&str>) -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    repo.config().unwrap().set_str("user.name", "Grace").unwrap();
    if let Some(url) = remote {
        repo.remote("origin", url).unwrap();
    }

    std::fs::create_dir_all(dir.path().join("svc")).unwrap();
    std::fs::write(dir.path().join("svc/Dockerfile"), "FROM scratch\n").unwrap();

    let mut index = repo.index().unwrap();
    index.add_path(Path::new("svc/Dockerfile")).unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
    let signature = Signature::now("Grace", "grace@example.com").unwrap();
    let commit = repo
        .commit(Some("HEAD"), &signature, &signature, "initial", &tree, &[])
        .unwrap();

    (dir, commit.to_string())
}

#[test]
fn reads_repository_facts() {
    let (dir, commit) = repository(Some("git@github.com:acme/widget.git"));
    let service = GitService::discover(&dir.path().join("svc")).unwrap();

    assert_eq!(service.commit_hash().unwrap(), commit);
    assert_eq!(service.organization(), "acme");
    assert_eq!(service.repo_name(), "widget");
    assert_eq!(service.remote_url(), Some("git@github.com:acme/widget.git"));
    assert_eq!(service.user_name(), Some("Grace"));
    assert_eq!(
        service.root(),
        std::fs::canonicalize(dir.path()).unwrap().as_path()
    );
}

#[test]
fn relative_path_from_root() {
    let (dir, _) = repository(Some("https://github.com/acme/widget"));
    let service = GitService::discover(dir.path()).unwrap();

    let rel = service
        .relative_path(&dir.path().join("svc/Dockerfile"))
        .unwrap();
    assert_eq!(rel, PathBuf::from("svc/Dockerfile"));

    let outside = tempfile::tempdir().unwrap();
    assert!(service.relative_path(outside.path()).is_err());
}

#[test]
fn missing_origin_leaves_names_empty() {
    let (dir, _) = repository(None);
    let service = GitService::discover(dir.path()).unwrap();

    assert_eq!(service.organization(), "");
    assert_eq!(service.repo_name(), "");
    assert_eq!(service.remote_url(), None);
}

#[test]
fn unparsable_origin_is_rejected() {
    let (dir, _) = repository(Some("https://github.com/widget"));
    assert!(GitService::discover(dir.path()).is_err());
}

#[test]
fn empty_repository_has_no_git_info() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    repo.remote("origin", "https://github.com/acme/widget").unwrap();
    let service = GitService::discover(dir.path()).unwrap();

    assert!(service.commit_hash().is_err());
    assert_eq!(GitInfo::collect(&service, &dir.path().join("Dockerfile")), None);
}

#[tokio::test]
async fn pipeline_labels_with_repository_facts() {
    let (dir, commit) = repository(Some("git@github.com:acme/widget.git"));
    let path = dir.path().join("svc/Dockerfile");
    let git: Arc<dyn GitMetadata> = Arc::new(GitService::discover(&path).unwrap());

    let labeled = LabelingPipeline::new(Arc::new(NoLineage))
        .with_git(Some(git))
        .label_source(&path, "FROM scratch\n")
        .await
        .unwrap();

    let label = labeled.text.lines().last().unwrap();
    assert!(label.starts_with("LABEL layer.0.author=\"Grace\""));
    assert!(label.ends_with(&format!(
        "git_repo=\"widget\" git_org=\"acme\" git_file=\"svc/Dockerfile\" git_commit=\"{commit}\""
    )));
}
