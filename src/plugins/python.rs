use crate::plugins::analyzer::{self, Analyzer, ComplexityMetrics};
use regex::Regex;
use std::sync::LazyLock;

static DEF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:async\s+)?def\s+\w+\s*\(([^)]*)").unwrap());
static CLASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*class\s+\w+").unwrap());
static BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:if|elif|for|while|except|case)\b").unwrap());
static BOOL_OP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:and|or)\b").unwrap());
static BLOCK_OPENER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:if|elif|else|for|while|try|except|finally|with|match|case)\b.*:\s*(?:#.*)?$")
        .unwrap()
});

pub struct PythonAnalyzer;

fn indent_of(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { 4 } else { 1 })
        .sum()
}

/// Deepest stack of open control blocks, tracked by indentation.
fn control_nesting(source: &str) -> u32 {
    let mut open: Vec<usize> = Vec::new();
    let mut max = 0;
    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = indent_of(line);
        while open.last().is_some_and(|&i| indent <= i) {
            open.pop();
        }
        if BLOCK_OPENER.is_match(line) {
            open.push(indent);
            max = max.max(open.len() as u32);
        }
    }
    max
}

impl Analyzer for PythonAnalyzer {
    fn language(&self) -> &'static str {
        "python"
    }

    fn detect(&self, path: &str, source: &str) -> bool {
        matches!(analyzer::extension(path).as_str(), "py" | "pyi")
            || source
                .lines()
                .next()
                .is_some_and(|l| l.starts_with("#!") && l.contains("python"))
    }

    fn metrics(&self, source: &str) -> ComplexityMetrics {
        let mut m = ComplexityMetrics {
            line_count: analyzer::line_count(source),
            code_lines: analyzer::count_code_lines(source, &["#"]),
            nesting_depth: control_nesting(source),
            complexity_score: 1,
            ..ComplexityMetrics::default()
        };
        for line in source.lines() {
            let code = line.split('#').next().unwrap_or("");
            if BRANCH.is_match(code) {
                m.complexity_score += 1;
            }
            m.complexity_score += BOOL_OP.find_iter(code).count() as u32;
            if let Some(caps) = DEF.captures(code) {
                m.function_count += 1;
                m.param_count = m.param_count.max(analyzer::param_count(&caps[1]));
            }
            if CLASS.is_match(code) {
                m.class_count += 1;
            }
        }
        m
    }
}
