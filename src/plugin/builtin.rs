//! Builtin plugins
//!
//! Preloaded plugins bound to in-process units. They take part in
//! resolution exactly like user plugins, after them in discovery order.
//!
//! | Plugin | Provides | Pipeline |
//! |--------|----------|----------|
//! | `builtin/parse_html` | `parse_html` | File, `.*\.html$` |
//! | `builtin/file_ctx_dbg` | `file_ctx_dbg` | File, every file |

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde_json::json;

use crate::domain::ExecutableUnit;
use crate::context::{ContextError, FileContext, PropertyBag, Value};
use crate::domain::{Pipeline, PluginSpec};

pub const PARSE_HTML: &str = "builtin/parse_html";
pub const FILE_CTX_DBG: &str = "builtin/file_ctx_dbg";

/// All builtin plugins, in registration order.
///
/// A builtin that cannot be constructed is logged and left out.
pub fn list_builtins() -> Vec<PluginSpec> {
    let builders: [(&str, fn() -> Result<PluginSpec, regex::Error>); 2] =
        [(PARSE_HTML, parse_html), (FILE_CTX_DBG, file_ctx_dbg)];

    let mut builtins = Vec::new();
    for (name, build) in builders {
        match build() {
            Ok(spec) => builtins.push(spec),
            Err(e) => tracing::error!("Failed to load builtin {}: {}", name, e),
        }
    }
    builtins
}

/// Registers a lazy `html` summary on every HTML file
pub fn parse_html() -> Result<PluginSpec, regex::Error> {
    let unit = ExecutableUnit::new(PARSE_HTML).with_file("main", |_path: &Path, ctx: &mut FileContext| {
        let data = ctx.data_mut();
        if !data.contains("html") {
            data.define("html", html_summary)?;
        }
        Ok(())
    });

    Ok(
        PluginSpec::preloaded(PARSE_HTML, Pipeline::file("main", [r".*\.html$"])?, unit)
            .with_provides(["parse_html"]),
    )
}

fn html_summary(bag: &mut PropertyBag) -> Result<Value, ContextError> {
    let content = bag.get_str("content")?;
    summarize_html(content)
        .map(Value::Json)
        .map_err(|e| ContextError::Provider {
            property: "html".to_string(),
            message: e.to_string(),
        })
}

/// Title, link targets and tag counts of an HTML document
fn summarize_html(content: &str) -> Result<serde_json::Value, regex::Error> {
    let title_re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>")?;
    let link_re = Regex::new(r#"(?i)<a\s[^>]*href\s*=\s*["']([^"']*)["']"#)?;
    let tag_re = Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)")?;

    let title = title_re
        .captures(content)
        .map(|c| c[1].trim().to_string());
    let links: Vec<&str> = link_re
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();

    let mut elements: BTreeMap<String, usize> = BTreeMap::new();
    for cap in tag_re.captures_iter(content) {
        *elements.entry(cap[1].to_ascii_lowercase()).or_default() += 1;
    }

    Ok(json!({
        "title": title,
        "links": links,
        "elements": elements,
    }))
}

/// Logs every property of every file context
pub fn file_ctx_dbg() -> Result<PluginSpec, regex::Error> {
    let unit = ExecutableUnit::new(FILE_CTX_DBG).with_file("main", |path: &Path, ctx: &mut FileContext| {
        let names: Vec<String> = ctx.data().keys().map(String::from).collect();
        for name in names {
            match ctx.data_mut().get(&name) {
                Ok(value) => tracing::info!("{}: {} = <{}>", path.display(), name, value.kind()),
                Err(e) => tracing::info!("{}: {} raised {}", path.display(), name, e),
            }
        }
        Ok(())
    });

    Ok(
        PluginSpec::preloaded(FILE_CTX_DBG, Pipeline::file("main", [""])?, unit)
            .with_provides(["file_ctx_dbg"]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PipelineKind;
    use crate::domain::{Entrypoint, InvocationError};
    use std::fs;
    use tempfile::TempDir;

    fn call_main(spec: &PluginSpec, ctx: &mut FileContext) -> Result<(), InvocationError> {
        let unit = match spec.source() {
            crate::domain::PluginSource::Preloaded { unit: Some(unit) } => unit.clone(),
            other => panic!("unexpected source {:?}", other),
        };
        match unit.entrypoint("main") {
            Some(Entrypoint::File(f)) => {
                let path = ctx.path().to_path_buf();
                f(&path, ctx)
            }
            other => panic!("unexpected entrypoint {:?}", other),
        }
    }

    #[test]
    fn builtins_are_listed_in_order() {
        let names: Vec<String> = list_builtins().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, [PARSE_HTML, FILE_CTX_DBG]);
    }

    #[test]
    fn parse_html_declaration() {
        let spec = parse_html().unwrap();

        assert!(spec.provides().contains("parse_html"));
        assert!(spec.provides().contains(PARSE_HTML));
        assert_eq!(spec.pipeline().kind(), PipelineKind::File);
        assert!(spec.pipeline().matches(Path::new("/sandbox/sub/c.html")));
        assert!(!spec.pipeline().matches(Path::new("/sandbox/b.txt")));
    }

    #[test]
    fn html_property_is_lazy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.html");
        fs::write(
            &path,
            r#"<html><head><title> Home </title></head>
<body><a href="/about">About</a><p>x</p><A HREF='https://example.com'>ext</A></body></html>"#,
        )
        .unwrap();

        let spec = parse_html().unwrap();
        let mut ctx = FileContext::new(&path);
        call_main(&spec, &mut ctx).unwrap();

        assert!(ctx.data().is_read_only("html"));
        assert!(!ctx.data().is_computed("html"));

        let html = ctx.data_mut().get("html").unwrap().as_json().unwrap().clone();
        assert_eq!(html["title"], "Home");
        assert_eq!(html["links"], json!(["/about", "https://example.com"]));
        assert_eq!(html["elements"]["a"], 2);
        assert_eq!(html["elements"]["p"], 1);
    }

    #[test]
    fn parse_html_runs_twice_on_one_context() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.html");
        fs::write(&path, "<p>a</p>").unwrap();

        let spec = parse_html().unwrap();
        let mut ctx = FileContext::new(&path);
        call_main(&spec, &mut ctx).unwrap();
        call_main(&spec, &mut ctx).unwrap();
    }

    #[test]
    fn html_without_title() {
        let summary = summarize_html("<div></div>").unwrap();
        assert!(summary["title"].is_null());
        assert_eq!(summary["links"], json!([]));
    }

    #[test]
    fn file_ctx_dbg_computes_every_property() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        fs::write(&path, "notes").unwrap();

        let spec = file_ctx_dbg().unwrap();
        assert!(spec.pipeline().matches(&path));

        let mut ctx = FileContext::new(&path);
        call_main(&spec, &mut ctx).unwrap();

        assert!(ctx.data().is_computed("content"));
        assert!(ctx.data().is_computed("raw"));
        assert!(ctx.data().is_computed("exists"));
    }

    #[test]
    fn file_ctx_dbg_tolerates_failing_properties() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gone.txt");

        let spec = file_ctx_dbg().unwrap();
        let mut ctx = FileContext::new(&path);
        call_main(&spec, &mut ctx).unwrap();

        assert!(!ctx.data().is_computed("content"));
    }
}
