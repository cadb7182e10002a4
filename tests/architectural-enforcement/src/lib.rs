//! Architectural Enforcement Integration Tests
//!
//! This package scans the engine's production sources and enforces:
//! - No panicking calls (`unwrap()`, `expect(`, `panic!`) outside test code
//! - No sleep() calls; waiting happens on I/O and timers only
//! - No blocking I/O in the async pipeline modules
//!
//! Production code is everything in a source file before its
//! `#[cfg(test)]` module. Comments are ignored.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Source directories holding production code, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["engine/core/src", "engine/replay/src"];

/// Workspace root, resolved from this package's manifest directory
#[must_use]
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// A forbidden pattern found in production code
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    /// File containing the match
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The offending line, trimmed
    pub text: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// Every `.rs` file below `dir`
#[must_use]
pub fn rust_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|entry| entry.into_path())
        .collect()
}

/// Code part of each production line, paired with its 1-based line number
///
/// Stops at the first `#[cfg(test)]` attribute and strips `//` comments.
#[must_use]
pub fn production_lines(content: &str) -> Vec<(usize, &str)> {
    content
        .lines()
        .enumerate()
        .take_while(|(_, line)| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(|(idx, line)| (idx + 1, line.split("//").next().unwrap_or(line)))
        .filter(|(_, code)| !code.trim().is_empty())
        .collect()
}

/// Scan one file's production code for lines matching `forbidden`
pub fn check_file<F>(path: &Path, violations: &mut Vec<Violation>, forbidden: &F)
where
    F: Fn(&str) -> bool,
{
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };

    for (line, code) in production_lines(&content) {
        if forbidden(code) {
            violations.push(Violation {
                path: path.to_path_buf(),
                line,
                text: code.trim().to_string(),
            });
        }
    }
}

/// Scan every production directory for lines matching `forbidden`
#[must_use]
pub fn scan_production<F>(forbidden: F) -> Vec<Violation>
where
    F: Fn(&str) -> bool,
{
    let root = workspace_root();
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        for file in rust_files(&root.join(dir)) {
            check_file(&file, &mut violations, &forbidden);
        }
    }
    violations
}

/// Print violations and fail the calling test
///
/// # Panics
///
/// Panics when `violations` is not empty.
pub fn report(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }
    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!(
        "\nFound {} violation(s) of: {rule}\nFix these before merging!",
        violations.len()
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let source = "fn a() {}\n// note\n#[cfg(test)]\n\
                      mod tests {\n    fn b() { x.unwrap(); }\n}\n";
        let lines = production_lines(source);
        assert_eq!(lines, vec![(1, "fn a() {}")]);
    }

    #[test]
    fn test_comments_are_stripped() {
        let lines = production_lines("let x = y; // y.unwrap() is fine here\n/// docs .expect(\n");
        assert_eq!(lines.len(), 1);
        assert!(!lines[0].1.contains("unwrap"));
    }

    #[test]
    fn test_workspace_root_contains_engine() {
        assert!(workspace_root().join("engine").join("core").exists());
    }

    #[test]
    fn test_production_dirs_exist() {
        for dir in PRODUCTION_DIRS {
            let path = workspace_root().join(dir);
            assert!(path.exists(), "missing {}", path.display());
            assert!(!rust_files(&path).is_empty());
        }
    }
}
