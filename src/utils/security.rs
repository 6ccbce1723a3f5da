use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("path contains parent directory (..)")]
    ContainsParentDir,

    #[error("path is absolute")]
    AbsolutePath,

    #[error("path contains invalid component")]
    InvalidComponent,

    #[error("path contains null byte")]
    NullByte,

    #[error("path is empty")]
    Empty,

    #[error("file name contains directory separator")]
    ContainsDirectorySeparator,
}

// Shared checks: empty, null bytes, parent traversal, absolute / prefixed paths
fn validate_path_components(path_str: &str) -> Result<(), ValidationError> {
    if path_str.is_empty() {
        return Err(ValidationError::Empty);
    }

    // \0 would truncate the path at the OS boundary
    if path_str.contains('\0') {
        return Err(ValidationError::NullByte);
    }

    // Backslashes are separators on the sender's side even when they are not here
    let normalized = path_str.replace('\\', "/");
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(_) | Component::CurDir => continue,
            Component::ParentDir => return Err(ValidationError::ContainsParentDir),
            Component::RootDir => return Err(ValidationError::AbsolutePath),
            Component::Prefix(_) => return Err(ValidationError::InvalidComponent),
        }
    }

    Ok(())
}

/// Relative path from a manifest: no traversal, not absolute, no null bytes
pub fn validate_path(path: &str) -> Result<(), ValidationError> {
    validate_path_components(path)
}

/// Bare file name: a valid path with no separators at all
pub fn validate_filename(filename: &str) -> Result<(), ValidationError> {
    validate_path_components(filename)?;

    if filename.contains('/') || filename.contains('\\') {
        return Err(ValidationError::ContainsDirectorySeparator);
    }

    Ok(())
}

/// Join a validated manifest path onto the destination directory
pub fn resolve_destination(dest: &Path, relative_path: &str) -> Result<PathBuf, ValidationError> {
    validate_path(relative_path)?;

    let mut target = dest.to_path_buf();
    for part in relative_path.split(['/', '\\']) {
        if part.is_empty() || part == "." {
            continue;
        }
        target.push(part);
    }

    if target == dest {
        return Err(ValidationError::Empty);
    }
    Ok(target)
}
