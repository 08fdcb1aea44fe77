use crate::plugins::analyzer::{self, Analyzer, ComplexityMetrics};
use regex::Regex;
use std::sync::LazyLock;

static FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:function\s+[\w-]+\s*(?:\(\s*\))?|[\w-]+\s*\(\s*\))\s*\{?").unwrap()
});
static BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:if|elif|for|while|until|case)\b|&&|\|\|").unwrap());
static OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:if|for|while|until|case)\b").unwrap());
static CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[\s;])(?:fi|done|esac)\b").unwrap());

pub struct BashAnalyzer;

impl Analyzer for BashAnalyzer {
    fn language(&self) -> &'static str {
        "bash"
    }

    fn detect(&self, path: &str, source: &str) -> bool {
        if matches!(analyzer::extension(path).as_str(), "sh" | "bash" | "zsh") {
            return true;
        }
        source.lines().next().is_some_and(|first| {
            first.starts_with("#!")
                && ["bash", "/sh", "zsh"].iter().any(|shell| first.contains(shell))
        })
    }

    fn metrics(&self, source: &str) -> ComplexityMetrics {
        let mut m = ComplexityMetrics {
            line_count: analyzer::line_count(source),
            code_lines: analyzer::count_code_lines(source, &["#"]),
            complexity_score: 1,
            ..ComplexityMetrics::default()
        };
        let mut depth: u32 = 0;
        for line in source.lines() {
            let code = line.split(" #").next().unwrap_or("");
            if code.trim_start().starts_with('#') {
                continue;
            }
            m.complexity_score += BRANCH.find_iter(code).count() as u32;
            if FUNCTION.is_match(code) && !OPEN.is_match(code) {
                m.function_count += 1;
            }
            if OPEN.is_match(code) {
                depth += 1;
                m.nesting_depth = m.nesting_depth.max(depth);
            }
            // One-liners like `if x; then y; fi` open and close on the same line.
            depth = depth.saturating_sub(CLOSE.find_iter(code).count() as u32);
        }
        m
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
#!/usr/bin/env bash
# deploy helper
set -e

deploy() {
  for host in \"$@\"; do
    if ping -c1 \"$host\" >/dev/null; then
      ssh \"$host\" ./release.sh || exit 1
    fi
  done
}

function cleanup {
  [ -d build ] && rm -rf build
}
";

    #[test]
    fn test_bash_metrics() {
        let m = BashAnalyzer.metrics(SAMPLE);
        assert_eq!(m.function_count, 2);
        // for, if, ||, &&
        assert_eq!(m.complexity_score, 5);
        assert_eq!(m.nesting_depth, 2);
    }

    #[test]
    fn test_detect_by_shebang() {
        assert!(BashAnalyzer.detect("scripts/deploy", "#!/bin/sh\necho hi\n"));
        assert!(BashAnalyzer.detect("x.sh", ""));
        assert!(!BashAnalyzer.detect("x.py", "#!/usr/bin/env python3\n"));
    }
}
