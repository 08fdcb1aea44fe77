use crate::plugins::analyzer::{self, Analyzer, ComplexityMetrics};
use regex::Regex;
use std::sync::LazyLock;

const EXTENSIONS: [&str; 6] = ["js", "jsx", "ts", "tsx", "mjs", "cjs"];
const NOT_METHODS: [&str; 6] = ["if", "for", "while", "switch", "catch", "function"];

static FUNCTION_DECL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bfunction\s*\*?\s*\w*\s*\(([^)]*)\)").unwrap());
static ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:const|let|var)\s+\w+\s*=\s*(?:async\s*)?\(([^)]*)\)\s*=>").unwrap()
});
static METHOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:(?:public|private|protected|static|async)\s+)*(\w+)\s*\(([^)]*)\)\s*(?::\s*[\w<>\[\]|, ]+)?\s*\{")
        .unwrap()
});
static CLASS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bclass\s+\w+").unwrap());
static BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:if|for|while|case|catch)\b|&&|\|\||\?\?").unwrap());

pub struct JavaScriptAnalyzer;

impl Analyzer for JavaScriptAnalyzer {
    fn language(&self) -> &'static str {
        "javascript"
    }

    fn detect(&self, path: &str, _source: &str) -> bool {
        EXTENSIONS.contains(&analyzer::extension(path).as_str())
    }

    fn metrics(&self, source: &str) -> ComplexityMetrics {
        let mut m = ComplexityMetrics {
            line_count: analyzer::line_count(source),
            code_lines: analyzer::count_code_lines(source, &["//", "/*", "*"]),
            nesting_depth: analyzer::brace_depth(source, "//"),
            complexity_score: 1,
            ..ComplexityMetrics::default()
        };
        for line in source.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
                continue;
            }
            m.complexity_score += BRANCH.find_iter(line).count() as u32;
            if CLASS.is_match(line) {
                m.class_count += 1;
            }

            let params = if let Some(c) = FUNCTION_DECL.captures(line) {
                Some(c[1].to_string())
            } else if let Some(c) = ARROW.captures(line) {
                Some(c[1].to_string())
            } else {
                METHOD
                    .captures(line)
                    .filter(|c| !NOT_METHODS.contains(&&c[1]))
                    .map(|c| c[2].to_string())
            };
            if let Some(params) = params {
                m.function_count += 1;
                m.param_count = m.param_count.max(analyzer::param_count(&params));
            }
        }
        m
    }
}
