//! Shared input validation primitives (§2 "Config/Validators", §3, §8
//! property 8).
//!
//! Centralizes the only path by which a [`RepoPath`] may be constructed from
//! user input, plus identifier and secret validation reused across the
//! engine, the worker pool manager, and the saga coordinator.

use std::path::{Path, PathBuf};

use crate::domain::error::MahavishnuError;
use crate::domain::models::RepoPath;

/// Validate that `path` resolves under `allowed_root`, exists, and contains
/// a `.git` directory, then wrap it as a [`RepoPath`].
///
/// No component may construct a `RepoPath` any other way; this is the sole
/// dispatch-time gate guaranteeing property 8 ("no operation with a repo
/// path that does not resolve under a configured allowed root is ever
/// dispatched to an adapter").
///
/// # Errors
///
/// Returns [`MahavishnuError::Validation`] if the path cannot be
/// canonicalized, escapes `allowed_root`, does not exist, or is not a git
/// repository.
pub fn validate_repo_path(path: &Path, allowed_root: &Path) -> Result<RepoPath, MahavishnuError> {
    let canonical = path
        .canonicalize()
        .map_err(|e| MahavishnuError::Validation(format!("repo path {} does not resolve: {e}", path.display())))?;

    let canonical_root = allowed_root.canonicalize().map_err(|e| {
        MahavishnuError::Validation(format!("allowed root {} does not resolve: {e}", allowed_root.display()))
    })?;

    if !canonical.starts_with(&canonical_root) {
        return Err(MahavishnuError::Validation(format!(
            "repo path {} does not resolve under allowed root {}",
            canonical.display(),
            canonical_root.display()
        )));
    }

    if !canonical.is_dir() {
        return Err(MahavishnuError::Validation(format!("repo path {} is not a directory", canonical.display())));
    }

    let git_dir = canonical.join(".git");
    if !git_dir.exists() {
        return Err(MahavishnuError::Validation(format!("repo path {} has no .git directory", canonical.display())));
    }

    Ok(RepoPath::new_unchecked(canonical))
}

/// Validate a bare identifier (task id, engine name, pool type, step name, …):
/// non-empty, no leading/trailing whitespace, and no path or shell
/// metacharacters.
///
/// # Errors
///
/// Returns [`MahavishnuError::Validation`] if `value` is empty, has leading
/// or trailing whitespace, or contains a character outside
/// `[A-Za-z0-9_.:-]`.
pub fn validate_identifier(value: &str, field: &str) -> Result<(), MahavishnuError> {
    if value.is_empty() {
        return Err(MahavishnuError::Validation(format!("{field} must not be empty")));
    }
    if value.trim() != value {
        return Err(MahavishnuError::Validation(format!("{field} must not have leading/trailing whitespace")));
    }
    let is_valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-');
    if !value.chars().all(is_valid_char) {
        return Err(MahavishnuError::Validation(format!(
            "{field} may only contain letters, digits, '_', '.', ':', '-'"
        )));
    }
    Ok(())
}

/// Validate that a value does not look like an accidentally-embedded secret
/// (API key, token, password) being passed through `task.params` or
/// `saga.state`. This is a heuristic guard, not a secret scanner: it exists
/// so that obviously-sensitive values fail fast at submission time rather
/// than being persisted in a DLQ entry or saga row.
///
/// # Errors
///
/// Returns [`MahavishnuError::Validation`] if `key`'s name suggests a secret
/// but `value` is implausibly short, or if `value` matches a common secret
/// prefix (`sk-`, `ghp_`, `Bearer `).
pub fn validate_no_embedded_secret(key: &str, value: &str) -> Result<(), MahavishnuError> {
    const SECRET_PREFIXES: &[&str] = &["sk-", "ghp_", "gho_", "Bearer ", "AKIA"];
    let key_lower = key.to_ascii_lowercase();
    let looks_like_secret_field =
        ["secret", "password", "token", "api_key", "apikey", "credential"].iter().any(|s| key_lower.contains(s));

    if looks_like_secret_field && value.len() < 8 && !value.is_empty() {
        return Err(MahavishnuError::Validation(format!(
            "field '{key}' looks like a secret but is implausibly short; refusing to accept"
        )));
    }
    if SECRET_PREFIXES.iter().any(|p| value.starts_with(p)) {
        return Err(MahavishnuError::Validation(format!(
            "field '{key}' appears to contain a raw credential; pass a reference instead"
        )));
    }
    Ok(())
}

/// Resolve `path` to an absolute form without requiring it to exist yet,
/// used by callers assembling a candidate path before validation.
#[must_use]
pub fn to_absolute(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
