/*!
Workspace root confinement and the file-backed tools (read, write, list, analyze).

Path resolution:
- the requested path is joined onto the canonical root and normalized lexically (`..` pops)
- the deepest ancestor that exists is canonicalized (resolving symlinks), the not-yet-existing
  tail is appended back
- the result must start with the canonical root, otherwise the call fails with a containment error

A dangling symlink anywhere on the path fails canonicalization and is treated as an escape.
*/
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::errors::ToolError;

/// Directories never descended into by listing or analysis.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    ".build",
    "__pycache__",
    "dist",
    "build",
    ".venv",
];

const MANIFESTS: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "go.mod",
    "pyproject.toml",
    "requirements.txt",
    "setup.py",
    "Package.swift",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "Gemfile",
    "composer.json",
    "CMakeLists.txt",
];

const MAX_LIST_ENTRIES: usize = 1000;
const MAX_ANALYZE_FILES: usize = 50_000;
const MAX_COUNTED_FILE_BYTES: u64 = 2 * 1024 * 1024;

fn language_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let lang = match ext.as_str() {
        "rs" => "Rust",
        "py" => "Python",
        "js" | "mjs" | "cjs" | "jsx" => "JavaScript",
        "ts" | "tsx" => "TypeScript",
        "go" => "Go",
        "swift" => "Swift",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "c" | "h" => "C",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "C++",
        "m" | "mm" => "Objective-C",
        "cs" => "C#",
        "rb" => "Ruby",
        "php" => "PHP",
        "scala" => "Scala",
        "sh" | "bash" | "zsh" => "Shell",
        _ => return None,
    };
    Some(lang)
}

fn is_skipped(name: &str) -> bool {
    SKIP_DIRS.contains(&name)
}

/// Lexical normalization without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// The root must exist; it is canonicalized once here.
    pub fn new(root: &Path) -> io::Result<Self> {
        let root = fs::canonicalize(root)?;
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("workspace root is not a directory: {}", root.display()),
            ));
        }
        Ok(Workspace { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `requested` under the root, rejecting anything that lands outside it.
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, ToolError> {
        if requested.contains('\0') {
            return Err(ToolError::InvalidArguments("path contains NUL".into()));
        }
        let joined = self.root.join(requested);
        let lexical = normalize(&joined);

        let mut existing = lexical.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        loop {
            if fs::symlink_metadata(existing).is_ok() {
                break;
            }
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name);
                    existing = parent;
                }
                _ => return Err(ToolError::Containment(requested.to_string())),
            }
        }
        let mut resolved = fs::canonicalize(existing)
            .map_err(|_| ToolError::Containment(requested.to_string()))?;
        for name in tail.iter().rev() {
            resolved.push(name);
        }
        if !resolved.starts_with(&self.root) {
            tracing::warn!(path = requested, "workspace: containment violation");
            return Err(ToolError::Containment(requested.to_string()));
        }
        Ok(resolved)
    }

    fn display_rel(&self, p: &Path) -> String {
        match p.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().into_owned(),
            Err(_) => p.to_string_lossy().into_owned(),
        }
    }

    pub fn read_file(&self, requested: &str, max_bytes: usize) -> Result<Value, ToolError> {
        let path = self.resolve(requested)?;
        let meta = fs::metadata(&path)?;
        if meta.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{requested} is a directory"
            )));
        }
        let mut buf = Vec::new();
        fs::File::open(&path)?
            .take(max_bytes as u64 + 1)
            .read_to_end(&mut buf)?;
        let truncated = buf.len() > max_bytes;
        buf.truncate(max_bytes);
        Ok(json!({
            "path": self.display_rel(&path),
            "size": meta.len(),
            "truncated": truncated,
            "content": String::from_utf8_lossy(&buf),
        }))
    }

    pub fn write_file(&self, requested: &str, content: &str) -> Result<Value, ToolError> {
        if requested.trim().is_empty() {
            return Err(ToolError::InvalidArguments("path is empty".into()));
        }
        let path = self.resolve(requested)?;
        if path == self.root || path.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{requested} is a directory"
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content.as_bytes())?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "workspace: wrote file");
        Ok(json!({
            "path": self.display_rel(&path),
            "bytes_written": content.len(),
        }))
    }

    pub fn list_directory(&self, requested: &str, recursive: bool) -> Result<Value, ToolError> {
        let requested = if requested.trim().is_empty() { "." } else { requested };
        let dir = self.resolve(requested)?;
        if !dir.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{requested} is not a directory"
            )));
        }
        let mut entries: Vec<Value> = Vec::new();
        let mut truncated = false;
        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && is_skipped(&e.file_name().to_string_lossy())));
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::debug!(error = %e, "workspace: skipping unreadable entry");
                    continue;
                }
            };
            if entries.len() >= MAX_LIST_ENTRIES {
                truncated = true;
                break;
            }
            let ft = entry.file_type();
            let kind = if ft.is_symlink() {
                "symlink"
            } else if ft.is_dir() {
                "dir"
            } else {
                "file"
            };
            let rel = entry
                .path()
                .strip_prefix(&dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .into_owned();
            let size = if ft.is_file() {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            } else {
                0
            };
            entries.push(json!({ "name": rel, "type": kind, "size": size }));
        }
        Ok(json!({
            "path": self.display_rel(&dir),
            "entries": entries,
            "truncated": truncated,
        }))
    }

    /// Read-only walk counting source files, source lines and package manifests.
    pub fn analyze(&self) -> Result<Value, ToolError> {
        let mut total_files = 0usize;
        let mut source_files = 0usize;
        let mut source_lines = 0usize;
        let mut languages: BTreeMap<&'static str, (usize, usize)> = BTreeMap::new();
        let mut manifests: Vec<String> = Vec::new();
        let mut truncated = false;

        let walker = WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !(e.file_type().is_dir() && is_skipped(&e.file_name().to_string_lossy())));
        for entry in walker.filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            total_files += 1;
            if total_files > MAX_ANALYZE_FILES {
                truncated = true;
                break;
            }
            let name = entry.file_name().to_string_lossy();
            if MANIFESTS.contains(&&*name) {
                manifests.push(self.display_rel(entry.path()));
            }
            let Some(lang) = language_for(entry.path()) else {
                continue;
            };
            let lines = match entry.metadata() {
                Ok(m) if m.len() <= MAX_COUNTED_FILE_BYTES => count_lines(entry.path()),
                _ => 0,
            };
            source_files += 1;
            source_lines += lines;
            let slot = languages.entry(lang).or_insert((0, 0));
            slot.0 += 1;
            slot.1 += lines;
        }

        let languages: serde_json::Map<String, Value> = languages
            .into_iter()
            .map(|(lang, (files, lines))| (lang.to_string(), json!({ "files": files, "lines": lines })))
            .collect();
        Ok(json!({
            "root": self.root.display().to_string(),
            "total_files": total_files.min(MAX_ANALYZE_FILES),
            "source_files": source_files,
            "source_lines": source_lines,
            "languages": languages,
            "manifests": manifests,
            "truncated": truncated,
        }))
    }
}

fn count_lines(path: &Path) -> usize {
    match fs::read(path) {
        Ok(bytes) => {
            let newlines = bytes.iter().filter(|b| **b == b'\n').count();
            if !bytes.is_empty() && bytes.last() != Some(&b'\n') {
                newlines + 1
            } else {
                newlines
            }
        }
        Err(_) => 0,
    }
}
