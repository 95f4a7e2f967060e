//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles
//! of the relay crates:
//! - No sleep() calls in production code
//! - No unwrap()/expect() in production code
//! - Persistence writes only go through the ordered writer
//! - The client-side registry stays independent of the server-side driver
//!
//! The helpers here read production sources only: everything from a file's
//! first `#[cfg(test)]` onward is treated as test code and skipped.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source roots checked by the tests, relative to the workspace
pub const SOURCE_ROOTS: &[&str] = &["relay/core/src", "relay/cli/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The trimmed source line
    pub text: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{} - {}", self.path.display(), self.line, self.text)
    }
}

/// A production source file: relative path and its non-test lines
pub struct SourceFile {
    /// Path relative to the workspace root
    pub path: PathBuf,
    /// Lines before the first `#[cfg(test)]`
    pub lines: Vec<String>,
}

impl SourceFile {
    /// Whether the relative path ends with `suffix` (e.g. `streaming/writer.rs`)
    pub fn is(&self, suffix: &str) -> bool {
        self.path.ends_with(suffix)
    }
}

/// Workspace root (two levels above this package)
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join("..")
}

/// All production `.rs` files under [`SOURCE_ROOTS`]
pub fn production_sources() -> Vec<SourceFile> {
    let root = workspace_root();
    let mut files = Vec::new();

    for dir in SOURCE_ROOTS {
        let path = root.join(dir);
        if !path.exists() {
            continue;
        }

        for entry in walkdir::WalkDir::new(&path)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.path().extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let Ok(content) = fs::read_to_string(entry.path()) else {
                continue;
            };
            let relative = entry
                .path()
                .strip_prefix(&root)
                .unwrap_or(entry.path())
                .to_path_buf();
            files.push(SourceFile {
                path: relative,
                lines: production_lines(&content),
            });
        }
    }

    files
}

/// Lines before the first `#[cfg(test)]`
pub fn production_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .take_while(|line| !line.trim_start().starts_with("#[cfg(test)]"))
        .map(str::to_string)
        .collect()
}

/// Code part of a line, without `//` comments (doc comments included)
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Lines (outside comments) matching `predicate` in the given files
pub fn find_violations<'a>(
    files: impl IntoIterator<Item = &'a SourceFile>,
    predicate: impl Fn(&str) -> bool,
) -> Vec<Violation> {
    let mut violations = Vec::new();
    for file in files {
        for (idx, line) in file.lines.iter().enumerate() {
            if predicate(code_part(line)) {
                violations.push(Violation {
                    path: file.path.clone(),
                    line: idx + 1,
                    text: line.trim().to_string(),
                });
            }
        }
    }
    violations
}

/// Panic with a readable report if `violations` is non-empty
pub fn assert_clean(rule: &str, violations: &[Violation]) {
    if violations.is_empty() {
        return;
    }

    eprintln!("\n❌ {rule}\n");
    for violation in violations {
        eprintln!("  ❌ {violation}");
    }
    panic!("\nFound {} violation(s): {rule}", violations.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_production_lines_stop_at_test_module() {
        let content = "fn a() {}\n\n#[cfg(test)]\nmod tests {\n    fn b() { x.unwrap(); }\n}\n";
        assert_eq!(production_lines(content), vec!["fn a() {}", ""]);
    }

    #[test]
    fn test_code_part_drops_comments() {
        assert_eq!(code_part("let x = 1; // .unwrap()"), "let x = 1; ");
        assert_eq!(code_part("/// calls .unwrap()"), "");
    }

    #[test]
    fn test_sources_found() {
        let files = production_sources();
        assert!(files.iter().any(|f| f.is("streaming/driver.rs")));
        assert!(files.iter().any(|f| f.is("registry/mod.rs")));
    }
}
