//! # Shared Context
//!
//! Run-wide property storage handed to plugin invocations.
//!
//! - [`ProjectContext`] - one bag for project-wide data plus a [`FileContext`]
//!   per file path, created on first reference
//! - [`FileContext`] - a bag pre-seeded with `fullpath`, `name`, `exists`,
//!   `raw` and `content`
//!
//! Every lazy property is computed at most once per run. A plugin that edits
//! a file after another plugin read its `content` keeps seeing the cached
//! text.

mod props;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use props::{ContextError, PropertyBag, Provider, Value};

/// Per-file property bag
#[derive(Debug)]
pub struct FileContext {
    path: PathBuf,
    data: PropertyBag,
}

impl FileContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut data = PropertyBag::new();

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        data.insert_plain("fullpath", Value::Text(path.to_string_lossy().into_owned()));
        data.insert_plain("name", Value::Text(name));

        let exists_path = path.clone();
        data.insert_lazy("exists", move |_| Ok(Value::Bool(exists_path.exists())));

        let raw_path = path.clone();
        data.insert_lazy("raw", move |_| {
            fs::read(&raw_path)
                .map(Value::Bytes)
                .map_err(|source| ContextError::Io {
                    property: "raw".to_string(),
                    path: raw_path.clone(),
                    source,
                })
        });

        data.insert_lazy("content", |bag| {
            let raw = bag.get_bytes("raw")?.to_vec();
            String::from_utf8(raw)
                .map(Value::Text)
                .map_err(|source| ContextError::Decode {
                    property: "content".to_string(),
                    source,
                })
        });

        Self { path, data }
    }

    /// Absolute path of the file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &PropertyBag {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut PropertyBag {
        &mut self.data
    }

    pub fn exists(&mut self) -> Result<bool, ContextError> {
        Ok(self.data.get("exists")?.as_bool().unwrap_or(false))
    }

    /// File bytes, read once
    pub fn raw(&mut self) -> Result<&[u8], ContextError> {
        self.data.get_bytes("raw")
    }

    /// File text, decoded once from `raw`
    pub fn content(&mut self) -> Result<&str, ContextError> {
        self.data.get_str("content")
    }
}

/// Project-wide bag plus per-file contexts
#[derive(Debug, Default)]
pub struct ProjectContext {
    data: PropertyBag,
    files: HashMap<PathBuf, FileContext>,
}

impl ProjectContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(&self) -> &PropertyBag {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut PropertyBag {
        &mut self.data
    }

    /// Context for `path`, created on first reference.
    ///
    /// Paths are made absolute first, so relative and absolute spellings of
    /// the same file share one context.
    pub fn file(&mut self, path: &Path) -> &mut FileContext {
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        self.files
            .entry(path.clone())
            .or_insert_with(|| FileContext::new(path))
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_context_is_seeded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "<p>hi</p>").unwrap();

        let mut ctx = FileContext::new(&path);
        assert!(ctx.exists().unwrap());
        assert_eq!(ctx.raw().unwrap(), b"<p>hi</p>");
        assert_eq!(ctx.content().unwrap(), "<p>hi</p>");
        assert_eq!(ctx.data_mut().get_str("name").unwrap(), "page.html");
        assert!(ctx.data().is_read_only("content"));
        assert!(!ctx.data().is_read_only("name"));
    }

    #[test]
    fn content_is_cached_for_the_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.html");
        fs::write(&path, "first").unwrap();

        let mut ctx = FileContext::new(&path);
        assert_eq!(ctx.content().unwrap(), "first");

        fs::write(&path, "second").unwrap();
        assert_eq!(ctx.content().unwrap(), "first");
        assert_eq!(ctx.raw().unwrap(), b"first");
    }

    #[test]
    fn missing_file_reports_io_error() {
        let dir = TempDir::new().unwrap();
        let mut ctx = FileContext::new(dir.path().join("missing.txt"));

        assert!(!ctx.exists().unwrap());
        assert!(matches!(ctx.content(), Err(ContextError::Io { .. })));
    }

    #[test]
    fn invalid_utf8_reports_decode_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blob.bin");
        fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        let mut ctx = FileContext::new(&path);
        assert!(matches!(ctx.content(), Err(ContextError::Decode { .. })));
        assert_eq!(ctx.raw().unwrap().len(), 3);
    }

    #[test]
    fn seeded_properties_are_read_only() {
        let dir = TempDir::new().unwrap();
        let mut ctx = FileContext::new(dir.path().join("a.txt"));

        assert!(matches!(
            ctx.data_mut().set("content", "other"),
            Err(ContextError::ReadOnly(_))
        ));
    }

    #[test]
    fn project_files_are_memoized() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.html");
        fs::write(&path, "a").unwrap();

        let mut project = ProjectContext::new();
        project.file(&path).data_mut().set("marker", true).unwrap();

        assert_eq!(project.file_count(), 1);
        assert_eq!(
            project.file(&path).data_mut().get("marker").unwrap().as_bool(),
            Some(true)
        );
        assert_eq!(project.file_count(), 1);

        project.file(&dir.path().join("b.html"));
        assert_eq!(project.file_count(), 2);
    }

    #[test]
    fn project_bag_is_shared() {
        let mut project = ProjectContext::new();
        project.data_mut().set("version", "1.0").unwrap();

        assert_eq!(project.data_mut().get_str("version").unwrap(), "1.0");
        assert_eq!(project.data().len(), 1);
    }
}
