//! Confined path resolution for documents and assets.
//!
//! A user-supplied name is only ever served if its real (symlink-followed)
//! path is a strict descendant of the real document root and names an
//! ordinary file. Traversal attempts are indistinguishable from missing
//! files to the caller.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Extensions served as markdown documents.
pub const DOC_EXTENSIONS: &[&str] = &["md"];

/// Extensions served as raw image assets.
pub const ASSET_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "svg", "webp", "ico"];

#[derive(Debug, Error)]
pub enum ResolveError {
    /// The name failed validation before any filesystem access.
    #[error("name rejected")]
    Rejected,
    /// The name did not resolve to a servable file.
    #[error("not found")]
    NotFound,
}

impl From<std::io::Error> for ResolveError {
    fn from(_: std::io::Error) -> Self {
        ResolveError::NotFound
    }
}

/// True if the name must be rejected outright, before touching the
/// filesystem. Confinement does not rely on resolution alone.
pub fn name_is_malformed(name: &str) -> bool {
    name.is_empty() || name.contains('/') || name.contains('\\') || name.contains('\0')
}

/// Resolve `name` inside `root` to a real, confined file path.
///
/// Symlinks are followed; the resolved path must remain a strict descendant
/// of the resolved root, compared component-wise so that a sibling directory
/// sharing a string prefix (`/docs-evil` vs `/docs`) cannot pass. Every I/O
/// failure collapses to `NotFound`.
pub async fn resolve(
    root: &Path,
    name: &str,
    allowed_exts: &[&str],
) -> Result<PathBuf, ResolveError> {
    if name_is_malformed(name) {
        return Err(ResolveError::Rejected);
    }

    let ext_allowed = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| allowed_exts.iter().any(|a| a.eq_ignore_ascii_case(ext)))
        .unwrap_or(false);
    if !ext_allowed {
        return Err(ResolveError::Rejected);
    }

    let real_root = tokio::fs::canonicalize(root).await?;
    let real_path = tokio::fs::canonicalize(root.join(name)).await?;

    if real_path == real_root || !real_path.starts_with(&real_root) {
        return Err(ResolveError::NotFound);
    }

    let meta = tokio::fs::metadata(&real_path).await?;
    if !meta.is_file() {
        return Err(ResolveError::NotFound);
    }

    Ok(real_path)
}
