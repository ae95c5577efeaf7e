//! Build sandbox
//!
//! A temporary directory holding copies of the collected sources. Plugins
//! only ever see and modify the sandbox. It is removed when dropped unless
//! [`Sandbox::keep`] is called.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to create sandbox directory: {0}")]
    Create(#[source] std::io::Error),

    #[error("Source {} has no file name", .0.display())]
    Unnamed(PathBuf),

    #[error("Failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {}: {source}", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Temporary working copy of the sources
#[derive(Debug)]
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    /// Creates the sandbox and copies `sources` into its root.
    ///
    /// Files are copied by file name; directories are copied recursively
    /// under their base name.
    pub fn prepare(sources: &[PathBuf]) -> Result<Self, SandboxError> {
        let dir = tempfile::Builder::new()
            .prefix("alter-")
            .tempdir()
            .map_err(SandboxError::Create)?;
        tracing::debug!(
            "Created temporary directory {} from {} sources",
            dir.path().display(),
            sources.len()
        );

        for source in sources {
            let name = source
                .file_name()
                .ok_or_else(|| SandboxError::Unnamed(source.clone()))?;
            let dest = dir.path().join(name);

            if source.is_dir() {
                copy_tree(source, &dest)?;
            } else {
                copy_file(source, &dest)?;
            }
        }

        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Keeps the directory on disk and returns its path
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}

fn copy_file(from: &Path, to: &Path) -> Result<(), SandboxError> {
    if to.exists() {
        tracing::warn!("{} overwrites an earlier source", to.display());
    }
    fs::copy(from, to).map(|_| ()).map_err(|source| SandboxError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    })
}

fn copy_tree(from: &Path, to: &Path) -> Result<(), SandboxError> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|source| SandboxError::Walk {
            root: from.to_path_buf(),
            source,
        })?;
        let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
        let dest = to.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|source| SandboxError::Copy {
                from: entry.path().to_path_buf(),
                to: dest.clone(),
                source,
            })?;
        } else {
            copy_file(entry.path(), &dest)?;
        }
    }
    Ok(())
}
