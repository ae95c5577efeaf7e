//! Subprocess plugin loading
//!
//! [`ProcessLoader`] implements [`CodeUnit`] for user plugins that are
//! standalone executables. Loading asks the executable for its manifest;
//! every entrypoint call then spawns it again with one request on stdin.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::thread;

use super::protocol::{PluginManifest, PluginRequest, PluginResponse};
use crate::context::{FileContext, ProjectContext, PropertyBag, Value};
use crate::domain::{CodeUnit, Entrypoint, ExecutableUnit, InvocationError, LoadError, PipelineKind};

/// Loads user plugins as executables, resolving relative paths against
/// `base_dir` (the directory holding the configuration file)
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    base_dir: PathBuf,
}

impl ProcessLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn locate(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Runs `<path> --manifest` and parses its output
    pub fn manifest(&self, path: &Path) -> Result<PluginManifest, LoadError> {
        let path = self.locate(path);
        if !path.is_file() {
            return Err(LoadError::NotFound(path));
        }

        let output = Command::new(&path)
            .arg("--manifest")
            .stdin(Stdio::null())
            .output()
            .map_err(|source| LoadError::Unreadable {
                path: path.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(LoadError::Manifest {
                path,
                reason: format!(
                    "exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| LoadError::Manifest {
            path,
            reason: e.to_string(),
        })
    }
}

impl CodeUnit for ProcessLoader {
    fn load_from_path(&self, plugin: &str, path: &Path) -> Result<ExecutableUnit, LoadError> {
        let manifest = self.manifest(path)?;
        let program = self.locate(path);
        tracing::debug!(
            "loaded manifest '{}' for plugin {} ({} entrypoints)",
            manifest.name,
            plugin,
            manifest.entrypoints.len()
        );

        let mut unit = ExecutableUnit::new(manifest.name.clone());
        for (entrypoint, kind) in manifest.entrypoints {
            let call = ProcessCall {
                program: Rc::from(program.as_path()),
                plugin: Rc::from(plugin),
                entrypoint: Rc::from(entrypoint.as_str()),
            };
            let callable = match kind {
                PipelineKind::Project => {
                    Entrypoint::Project(Rc::new(move |root: &Path, ctx: &mut ProjectContext| {
                        call.invoke(PipelineKind::Project, root, ctx.data_mut())
                    }))
                }
                PipelineKind::File => {
                    Entrypoint::File(Rc::new(move |file: &Path, ctx: &mut FileContext| {
                        call.invoke(PipelineKind::File, file, ctx.data_mut())
                    }))
                }
            };
            unit.insert(entrypoint, callable);
        }
        Ok(unit)
    }
}

/// Short stable id for a plugin name
pub fn unit_id(plugin: &str) -> String {
    blake3::hash(plugin.as_bytes()).to_hex().as_str()[..16].to_string()
}

/// One bound entrypoint of an executable
struct ProcessCall {
    program: Rc<Path>,
    plugin: Rc<str>,
    entrypoint: Rc<str>,
}

impl ProcessCall {
    fn invoke(&self, target: PipelineKind, path: &Path, bag: &mut PropertyBag) -> Result<(), InvocationError> {
        let request = PluginRequest {
            entrypoint: self.entrypoint.to_string(),
            target,
            path: path.to_path_buf(),
            properties: bag.snapshot(),
        };
        let line = serde_json::to_string(&request).map_err(|e| InvocationError::Protocol(e.to_string()))?;

        let mut child = Command::new(&*self.program)
            .env("ALTER_PLUGIN", &*self.plugin)
            .env("ALTER_ENTRYPOINT", &*self.entrypoint)
            .env("ALTER_TARGET", path)
            .env("ALTER_UNIT_ID", unit_id(&self.plugin))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Fed from its own thread while stdout and stderr are drained
        let stdin = child.stdin.take();
        let writer = thread::spawn(move || -> std::io::Result<()> {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            match writeln!(stdin, "{}", line) {
                // The plugin may exit without reading its request
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        });

        let output = child.wait_with_output()?;
        let written = writer
            .join()
            .map_err(|_| InvocationError::Protocol("request writer panicked".to_string()))?;
        if !output.status.success() {
            return Err(InvocationError::Exit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        written?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let response_line = stdout
            .lines()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| InvocationError::Protocol("no response from plugin".to_string()))?;
        let response: PluginResponse = serde_json::from_str(response_line)
            .map_err(|e| InvocationError::Protocol(format!("invalid plugin response: {}", e)))?;

        if !response.success {
            return Err(InvocationError::Failed(
                response
                    .error
                    .unwrap_or_else(|| "plugin reported failure".to_string()),
            ));
        }

        for (name, value) in response.properties {
            bag.set(name, json_value(value))?;
        }
        Ok(())
    }
}

fn json_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const MANIFEST: &str = r#"if [ "$1" = "--manifest" ]; then
  echo '{"name": "demo", "entrypoints": {"main": "file", "setup": "project"}}'
  exit 0
fi"#;

    #[test]
    fn missing_executable() {
        let dir = TempDir::new().unwrap();
        let loader = ProcessLoader::new(dir.path());

        let err = loader.load_from_path("demo", Path::new("./nope")).unwrap_err();
        assert!(matches!(err, LoadError::NotFound(p) if p == dir.path().join("./nope")));
    }

    #[test]
    fn bad_manifest() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "bad", "echo not-json");
        let loader = ProcessLoader::new(dir.path());

        let err = loader.load_from_path("bad", Path::new("bad")).unwrap_err();
        assert!(matches!(err, LoadError::Manifest { .. }));
    }

    #[test]
    fn manifest_declares_shapes() {
        let dir = TempDir::new().unwrap();
        script(dir.path(), "demo", MANIFEST);
        let loader = ProcessLoader::new(dir.path());

        let unit = loader.load_from_path("demo", Path::new("demo")).unwrap();
        assert_eq!(unit.name(), "demo");
        assert_eq!(unit.entrypoint("main").unwrap().shape(), PipelineKind::File);
        assert_eq!(unit.entrypoint("setup").unwrap().shape(), PipelineKind::Project);
    }

    #[test]
    fn file_invocation_sets_properties() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "{}\n{}",
            MANIFEST,
            r#"cat > /dev/null
printf '{"success": true, "properties": {"seen": "%s:%s", "count": 3}}\n' "$ALTER_PLUGIN" "$ALTER_ENTRYPOINT""#
        );
        script(dir.path(), "demo", &body);
        let target = dir.path().join("page.html");
        fs::write(&target, "<p/>").unwrap();

        let unit = ProcessLoader::new(dir.path())
            .load_from_path("demo", Path::new("demo"))
            .unwrap();
        let mut ctx = FileContext::new(&target);
        match unit.entrypoint("main").unwrap() {
            Entrypoint::File(f) => f(&target, &mut ctx).unwrap(),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(ctx.data_mut().get_str("seen").unwrap(), "demo:main");
        assert_eq!(
            ctx.data_mut().get("count").unwrap(),
            &Value::Json(serde_json::json!(3))
        );
    }

    #[test]
    fn large_request_and_chatty_plugin() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "{}
{}",
            MANIFEST,
            r#"head -c 300000 /dev/zero | tr '\0' x >&2
wc -c > /dev/null
echo '{"success": true, "properties": {"done": true}}'"#
        );
        script(dir.path(), "demo", &body);

        let unit = ProcessLoader::new(dir.path())
            .load_from_path("demo", Path::new("demo"))
            .unwrap();
        let mut ctx = ProjectContext::new();
        ctx.data_mut().set("blob", "y".repeat(300_000)).unwrap();
        match unit.entrypoint("setup").unwrap() {
            Entrypoint::Project(f) => f(dir.path(), &mut ctx).unwrap(),
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(ctx.data_mut().get("done").unwrap().as_bool(), Some(true));
    }

    #[test]
    fn reported_failure() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "{}\necho '{{\"success\": false, \"error\": \"bad input\"}}'",
            MANIFEST
        );
        script(dir.path(), "demo", &body);

        let unit = ProcessLoader::new(dir.path())
            .load_from_path("demo", Path::new("demo"))
            .unwrap();
        let mut ctx = ProjectContext::new();
        let err = match unit.entrypoint("setup").unwrap() {
            Entrypoint::Project(f) => f(dir.path(), &mut ctx).unwrap_err(),
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(err.kind(), "PluginFailure");
        assert_eq!(err.to_string(), "bad input");
    }

    #[test]
    fn non_zero_exit() {
        let dir = TempDir::new().unwrap();
        let body = format!("{}\necho boom >&2\nexit 3", MANIFEST);
        script(dir.path(), "demo", &body);

        let unit = ProcessLoader::new(dir.path())
            .load_from_path("demo", Path::new("demo"))
            .unwrap();
        let mut ctx = ProjectContext::new();
        let err = match unit.entrypoint("setup").unwrap() {
            Entrypoint::Project(f) => f(dir.path(), &mut ctx).unwrap_err(),
            other => panic!("unexpected {:?}", other),
        };

        assert!(matches!(&err, InvocationError::Exit { stderr, .. } if stderr == "boom"));
    }

    #[test]
    fn read_only_property_is_rejected() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "{}\necho '{{\"success\": true, \"properties\": {{\"content\": \"x\"}}}}'",
            MANIFEST
        );
        script(dir.path(), "demo", &body);
        let target = dir.path().join("a.txt");
        fs::write(&target, "a").unwrap();

        let unit = ProcessLoader::new(dir.path())
            .load_from_path("demo", Path::new("demo"))
            .unwrap();
        let mut ctx = FileContext::new(&target);
        let err = match unit.entrypoint("main").unwrap() {
            Entrypoint::File(f) => f(&target, &mut ctx).unwrap_err(),
            other => panic!("unexpected {:?}", other),
        };

        assert_eq!(err.kind(), "ContextError");
    }

    #[test]
    fn unit_ids_are_stable() {
        assert_eq!(unit_id("render"), unit_id("render"));
        assert_ne!(unit_id("render"), unit_id("parse"));
        assert_eq!(unit_id("render").len(), 16);
    }
}
