//! Git metadata for labeled Dockerfiles.

use std::path::{Path, PathBuf};

use git2::Repository;
use parking_lot::Mutex;
use stevedore_common::{StevedoreError, StevedoreResult};

/// Repository facts written into labels.
pub trait GitMetadata: Send + Sync {
    /// Commit id of `HEAD`.
    ///
    /// # Errors
    ///
    /// Returns an error if `HEAD` cannot be resolved (e.g. no commits yet).
    fn commit_hash(&self) -> StevedoreResult<String>;

    /// Organization (first path segment of the `origin` remote).
    fn organization(&self) -> &str;

    /// Repository name (remaining path segments of the `origin` remote).
    fn repo_name(&self) -> &str;

    /// Path of `abs_path` relative to the repository root.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is outside the repository.
    fn relative_path(&self, abs_path: &Path) -> StevedoreResult<PathBuf>;

    /// URL of the `origin` remote, if any.
    fn remote_url(&self) -> Option<&str> {
        None
    }

    /// Configured `user.name`, if any.
    fn user_name(&self) -> Option<&str> {
        None
    }
}

/// [`GitMetadata`] backed by a local repository.
///
/// The repository handle sits behind its own lock so a single service can be
/// shared by concurrently running pipelines.
pub struct GitService {
    root: PathBuf,
    repository: Mutex<Repository>,
    remote_url: Option<String>,
    organization: String,
    repo_name: String,
    user_name: Option<String>,
}

impl std::fmt::Debug for GitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitService")
            .field("root", &self.root)
            .field("remote_url", &self.remote_url)
            .finish_non_exhaustive()
    }
}

impl GitService {
    /// Open the repository containing `path`, searching parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`StevedoreError::Git`] if no repository is found, it is bare,
    /// or the `origin` remote URL cannot be split into organization and name.
    pub fn discover(path: &Path) -> StevedoreResult<Self> {
        let start = if path.is_file() {
            path.parent().unwrap_or(path)
        } else {
            path
        };
        let start = if start.as_os_str().is_empty() {
            Path::new(".")
        } else {
            start
        };

        let repository = Repository::discover(start).map_err(|e| git_error("open repository", &e))?;
        let workdir = repository.workdir().ok_or_else(|| StevedoreError::Git {
            message: "bare repositories are not supported".to_string(),
        })?;
        let root = canonical(workdir);

        let remote_url = repository
            .find_remote("origin")
            .ok()
            .and_then(|remote| remote.url().map(str::to_string));

        let (organization, repo_name) = match &remote_url {
            Some(url) => parse_remote(url)?,
            None => (String::new(), String::new()),
        };

        let user_name = repository
            .config()
            .and_then(|config| config.get_string("user.name"))
            .ok()
            .filter(|name| !name.trim().is_empty());

        tracing::debug!(
            root = %root.display(),
            organization = %organization,
            repo = %repo_name,
            "Opened git repository"
        );

        Ok(Self {
            root,
            repository: Mutex::new(repository),
            remote_url,
            organization,
            repo_name,
            user_name,
        })
    }

    /// Repository working directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl GitMetadata for GitService {
    fn commit_hash(&self) -> StevedoreResult<String> {
        let repository = self.repository.lock();
        let head = repository.head().map_err(|e| git_error("get HEAD", &e))?;
        let commit = head
            .peel_to_commit()
            .map_err(|e| git_error("resolve HEAD commit", &e))?;
        Ok(commit.id().to_string())
    }

    fn organization(&self) -> &str {
        &self.organization
    }

    fn repo_name(&self) -> &str {
        &self.repo_name
    }

    fn relative_path(&self, abs_path: &Path) -> StevedoreResult<PathBuf> {
        let path = canonical(abs_path);
        path.strip_prefix(&self.root)
            .map(Path::to_path_buf)
            .map_err(|_| StevedoreError::Git {
                message: format!(
                    "{} is outside repository {}",
                    abs_path.display(),
                    self.root.display()
                ),
            })
    }

    fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref()
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn git_error(action: &str, err: &git2::Error) -> StevedoreError {
    StevedoreError::Git {
        message: format!("failed to {action}: {}", err.message()),
    }
}

/// Split a remote URL into `(organization, repository)`.
///
/// Accepts `https://host/org/repo.git`, `ssh://git@host/org/repo` and
/// scp-like `git@host:org/repo.git`. Nested groups stay in the repository
/// part: `host/group/sub/repo` gives `("group", "sub/repo")`.
///
/// # Errors
///
/// Returns [`StevedoreError::Git`] if the path has fewer than two segments.
pub fn parse_remote(url: &str) -> StevedoreResult<(String, String)> {
    let path = if let Some((_, rest)) = url.split_once("://") {
        let rest = rest.split_once('@').map_or(rest, |(_, host_path)| host_path);
        rest.split_once('/').map_or("", |(_, path)| path)
    } else if let Some((host, path)) = url.split_once(':') {
        // scp-like syntax; a single letter before ':' is a Windows drive.
        if host.len() == 1 { url } else { path }
    } else {
        url
    };

    let path = path.trim_start_matches('/').trim_end_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();

    if parts.len() < 2 {
        return Err(StevedoreError::Git {
            message: format!("invalid format of remote path: {url}"),
        });
    }

    Ok((parts[0].to_string(), parts[1..].join("/")))
}
