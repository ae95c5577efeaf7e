//! Source collection
//!
//! Expands the `collect.rules` glob patterns into the list of sources that
//! get copied into the sandbox.

use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Invalid collect rule '{rule}': {source}")]
    Pattern {
        rule: String,
        #[source]
        source: glob::PatternError,
    },
}

/// Expands every rule, keeping rule order and then match order.
///
/// Relative rules are resolved against `base_dir`. Entries that cannot be
/// read are skipped.
pub fn collect(base_dir: &Path, rules: &[String]) -> Result<Vec<PathBuf>, CollectError> {
    let mut sources = Vec::new();

    for rule in rules {
        let pattern = if Path::new(rule).is_absolute() {
            rule.clone()
        } else {
            let base = glob::Pattern::escape(&base_dir.to_string_lossy());
            format!("{}/{}", base.trim_end_matches('/'), rule)
        };

        let paths = glob::glob(&pattern).map_err(|source| CollectError::Pattern {
            rule: rule.clone(),
            source,
        })?;

        for entry in paths {
            match entry {
                Ok(path) => sources.push(path),
                Err(e) => tracing::warn!("Skipping unreadable source: {}", e),
            }
        }
    }

    tracing::info!("{} sources", sources.len());
    Ok(sources)
}
