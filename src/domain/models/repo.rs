//! Repository reference domain model.
//!
//! A [`RepoPath`] is never constructed directly from user input; it is only
//! produced by `services::validators::validate_repo_path`, which checks that
//! the path resolves under an allowed root, exists, and contains a `.git`
//! directory (§3, §8 property 8).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A filesystem path that has already passed repository validation.
///
/// Deliberately has no public constructor other than [`RepoPath::new_unchecked`],
/// which is reserved for deserializing already-validated rows back out of
/// storage. Fresh paths must go through the validator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoPath(PathBuf);

impl RepoPath {
    /// Wrap an already-validated path, e.g. when loading a persisted workflow row.
    #[must_use]
    pub fn new_unchecked(path: PathBuf) -> Self {
        Self(path)
    }

    /// Borrow the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for RepoPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for RepoPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
