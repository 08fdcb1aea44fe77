//! Language analyzers: per-file layer hints and complexity metrics.
//!
//! Analyzers are capability objects tried in registry order; the first whose
//! `detect` accepts a file analyzes it, and a generic analyzer catches the
//! rest. Metrics are heuristic and line-based, good enough to rank files for
//! the `complexity_high` trigger, not to replace a real linter.

use crate::core::matcher::ComplexityMap;
use crate::plugins::bash::BashAnalyzer;
use crate::plugins::javascript::JavaScriptAnalyzer;
use crate::plugins::python::PythonAnalyzer;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Thresholds above which a file counts as complex.
pub const HIGH_LINE_COUNT: u32 = 100;
pub const HIGH_NESTING_DEPTH: u32 = 4;
pub const HIGH_COMPLEXITY_SCORE: u32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ComplexityMetrics {
    pub line_count: u32,
    pub code_lines: u32,
    pub nesting_depth: u32,
    /// Cyclomatic estimate: 1 + branch points.
    pub complexity_score: u32,
    pub function_count: u32,
    pub class_count: u32,
    pub param_count: u32,
}

impl ComplexityMetrics {
    pub fn is_high(&self) -> bool {
        self.line_count > HIGH_LINE_COUNT
            || self.nesting_depth > HIGH_NESTING_DEPTH
            || self.complexity_score > HIGH_COMPLEXITY_SCORE
    }
}

/// Coarse role of a file, from its parent directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileType {
    Service,
    Model,
    Controller,
    Utility,
    Test,
    Module,
}

impl FileType {
    pub fn of(path: &str) -> FileType {
        let normalized = path.replace('\\', "/");
        let p = Path::new(&normalized);
        let parent = p
            .parent()
            .and_then(|d| d.file_name())
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let singular = parent.strip_suffix('s').unwrap_or(&parent);
        match singular {
            "service" => FileType::Service,
            "model" | "entity" | "entitie" => FileType::Model,
            "controller" => FileType::Controller,
            "util" | "helper" => FileType::Utility,
            "test" => FileType::Test,
            _ => {
                let name = p
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if name.starts_with("test_") {
                    FileType::Test
                } else {
                    FileType::Module
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Service => "Service",
            FileType::Model => "Model",
            FileType::Controller => "Controller",
            FileType::Utility => "Utility",
            FileType::Test => "Test",
            FileType::Module => "Module",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Analysis {
    pub path: String,
    pub language: String,
    pub file_type: FileType,
    pub layers: BTreeSet<String>,
    pub metrics: ComplexityMetrics,
}

pub trait Analyzer: Send + Sync {
    fn language(&self) -> &'static str;
    fn detect(&self, path: &str, source: &str) -> bool;
    fn metrics(&self, source: &str) -> ComplexityMetrics;

    fn analyze(&self, path: &str, source: &str) -> Analysis {
        let metrics = self.metrics(source);
        let file_type = FileType::of(path);
        Analysis {
            path: path.to_string(),
            language: self.language().to_string(),
            file_type,
            layers: code_layers(file_type),
            metrics,
        }
    }
}

/// Source files outside tests are described by the traditional docs.
pub fn code_layers(file_type: FileType) -> BTreeSet<String> {
    let mut layers = BTreeSet::new();
    if file_type != FileType::Test {
        layers.insert("traditional".to_string());
    }
    layers
}

pub fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Non-blank lines that do not start with any of `comment_prefixes`.
pub fn count_code_lines(source: &str, comment_prefixes: &[&str]) -> u32 {
    source
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !comment_prefixes.iter().any(|p| l.starts_with(p)))
        .count() as u32
}

/// Maximum `{`/`}` depth, ignoring line comments starting with `comment`.
pub fn brace_depth(source: &str, comment: &str) -> u32 {
    let mut depth: u32 = 0;
    let mut max = 0;
    for line in source.lines() {
        let code = match line.find(comment) {
            Some(i) if !comment.is_empty() => &line[..i],
            _ => line,
        };
        for c in code.chars() {
            match c {
                '{' => {
                    depth += 1;
                    max = max.max(depth);
                }
                '}' => depth = depth.saturating_sub(1),
                _ => {}
            }
        }
    }
    max
}

/// Parameter count of a comma-separated parameter list.
pub fn param_count(params: &str) -> u32 {
    params
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "/" && *p != "*")
        .count() as u32
}

pub fn line_count(source: &str) -> u32 {
    source.lines().count() as u32
}

/// Catch-all for files no language analyzer claims. Produces metrics but no layers.
pub struct GenericAnalyzer;

impl Analyzer for GenericAnalyzer {
    fn language(&self) -> &'static str {
        "generic"
    }

    fn detect(&self, _path: &str, _source: &str) -> bool {
        true
    }

    fn metrics(&self, source: &str) -> ComplexityMetrics {
        ComplexityMetrics {
            line_count: line_count(source),
            code_lines: count_code_lines(source, &["#", "//"]),
            nesting_depth: brace_depth(source, "//"),
            complexity_score: 1,
            ..ComplexityMetrics::default()
        }
    }

    fn analyze(&self, path: &str, source: &str) -> Analysis {
        Analysis {
            path: path.to_string(),
            language: self.language().to_string(),
            file_type: FileType::of(path),
            layers: BTreeSet::new(),
            metrics: self.metrics(source),
        }
    }
}

pub fn registry() -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::new(PythonAnalyzer),
        Box::new(JavaScriptAnalyzer),
        Box::new(BashAnalyzer),
    ]
}

/// First analyzer in `registry` whose `detect` accepts the file, else the generic one.
pub fn analyze_file(registry: &[Box<dyn Analyzer>], path: &str, source: &str) -> Analysis {
    match registry.iter().find(|a| a.detect(path, source)) {
        Some(analyzer) => analyzer.analyze(path, source),
        None => GenericAnalyzer.analyze(path, source),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangeAnalysis {
    pub analyses: Vec<Analysis>,
    /// Union of analyzer layer hints.
    pub layers: BTreeSet<String>,
    /// `complexity_score` per analyzed path.
    pub complexity: ComplexityMap,
    /// Code conventions seen across the change, for assistant rule files.
    pub patterns: BTreeSet<String>,
}

/// Conventions a file touches, judged from its path and source text.
pub fn code_patterns(path: &str, source: &str) -> BTreeSet<String> {
    let lower = path.to_lowercase();
    let mut found = BTreeSet::new();
    let mut add = |name: &str| {
        found.insert(name.to_string());
    };
    if lower.contains("test") || source.contains("def test_") || source.contains("describe(") {
        add("Testing");
    }
    if lower.contains("service") {
        add("Service Layer");
    }
    if lower.contains("model") || lower.contains("entity") {
        add("Data Models");
    }
    if lower.contains("api") {
        add("API Patterns");
    }
    if lower.contains("util") {
        add("Utilities");
    }
    if source.contains("class ") && source.contains("Error") {
        add("Error Handling");
    }
    if source.contains("import ") {
        add("Dependencies");
    }
    found
}

/// Analyze the changed files under `root` in parallel. Deleted or
/// unreadable files are skipped.
pub fn analyze_changes(root: &Path, files: &BTreeSet<String>) -> ChangeAnalysis {
    let registry = registry();
    let paths: Vec<&String> = files.iter().collect();
    let scanned: Vec<(Analysis, BTreeSet<String>)> = paths
        .par_iter()
        .filter_map(|rel| match fs::read_to_string(root.join(rel.as_str())) {
            Ok(source) => Some((
                analyze_file(&registry, rel, &source),
                code_patterns(rel, &source),
            )),
            Err(e) => {
                debug!(path = %rel, error = %e, "skipping unreadable file");
                None
            }
        })
        .collect();

    let mut out = ChangeAnalysis::default();
    for (analysis, patterns) in scanned {
        out.layers.extend(analysis.layers.iter().cloned());
        out.complexity
            .insert(analysis.path.clone(), f64::from(analysis.metrics.complexity_score));
        out.patterns.extend(patterns);
        out.analyses.push(analysis);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_parent_dir() {
        assert_eq!(FileType::of("services/auth.py"), FileType::Service);
        assert_eq!(FileType::of("app/models/user.py"), FileType::Model);
        assert_eq!(FileType::of("src/entity/order.ts"), FileType::Model);
        assert_eq!(FileType::of("lib/helpers/fmt.js"), FileType::Utility);
        assert_eq!(FileType::of("pkg/test_auth.py"), FileType::Test);
        assert_eq!(FileType::of("main.py"), FileType::Module);
    }

    #[test]
    fn test_brace_depth_ignores_line_comments() {
        assert_eq!(brace_depth("a { b { } } // {{{{", "//"), 2);
        assert_eq!(brace_depth("}}} {", "//"), 1);
    }

    #[test]
    fn test_generic_fallback_has_no_layers() {
        let a = analyze_file(&registry(), "notes.txt", "hello\n\nworld\n");
        assert_eq!(a.language, "generic");
        assert!(a.layers.is_empty());
        assert_eq!(a.metrics.code_lines, 2);
    }

    #[test]
    fn test_code_patterns_from_path_and_source() {
        let found = code_patterns("services/api/auth.py", "import os\n\nclass AuthError(Exception):\n    pass\n");
        let names: Vec<&str> = found.iter().map(String::as_str).collect();
        assert_eq!(
            names,
            vec!["API Patterns", "Dependencies", "Error Handling", "Service Layer"]
        );
        assert!(code_patterns("lib/parse.js", "describe('parse', () => {})").contains("Testing"));
        assert!(code_patterns("README", "plain text").is_empty());
    }

    #[test]
    fn test_is_high_thresholds() {
        let mut m = ComplexityMetrics::default();
        assert!(!m.is_high());
        m.complexity_score = HIGH_COMPLEXITY_SCORE + 1;
        assert!(m.is_high());
    }
}
