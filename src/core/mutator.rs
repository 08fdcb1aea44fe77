//! Side-effect-free Markdown mutation for the four rule action kinds.
//!
//! Every function here takes document text and returns new text plus a
//! `changed` flag. Callers own reading and writing files.

use crate::core::error::DocHookError;
use crate::core::rules::{Action, ActionKind};
use regex::Regex;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::sync::LazyLock;

pub type Context = BTreeMap<String, String>;

pub const DEFAULT_HEADERS: [&str; 3] = ["Name", "Path", "Type"];
pub const DEFAULT_RECORD_TEMPLATE: &str = "### {date} {message}\n\nFiles: {files}";
pub const DEFAULT_SECTION_TEMPLATE: &str = "Last updated {date} by {commit}: {message}";
pub const DEFAULT_PREPEND_TEMPLATE: &str = "- {date}: {message}";
pub const DEFAULT_PATTERN_TEMPLATE: &str =
    "- Follow {pattern} conventions when working with related code";

/// Context key holding detected code patterns, one per line.
pub const PATTERNS_KEY: &str = "patterns";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationResult {
    pub new_content: String,
    pub changed: bool,
}

impl MutationResult {
    fn unchanged(content: &str) -> Self {
        MutationResult {
            new_content: content.to_string(),
            changed: false,
        }
    }
}

/// Substitute `{key}` placeholders from `ctx`; unknown placeholders stay as-is.
pub fn render(template: &str, ctx: &Context) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            ctx.get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Apply one action to `current` content.
pub fn apply(
    action: &Action,
    current: &str,
    ctx: &Context,
) -> Result<MutationResult, DocHookError> {
    match action.kind {
        ActionKind::TableRowAppend => append_table_row(action, current, ctx),
        ActionKind::RecordAppend => {
            let text = render(
                action
                    .content_template
                    .as_deref()
                    .unwrap_or(DEFAULT_RECORD_TEMPLATE),
                ctx,
            );
            Ok(append_record(current, action.section.as_deref(), &text))
        }
        ActionKind::SectionUpdate => {
            let section = action.section.as_deref().ok_or_else(|| {
                DocHookError::ValidationError(format!(
                    "update_section on '{}' requires a section",
                    action.target
                ))
            })?;
            let text = render(
                action
                    .content_template
                    .as_deref()
                    .unwrap_or(DEFAULT_SECTION_TEMPLATE),
                ctx,
            );
            update_section(current, section, &text)
        }
        ActionKind::PrependContent => {
            let text = render(
                action
                    .content_template
                    .as_deref()
                    .unwrap_or(DEFAULT_PREPEND_TEMPLATE),
                ctx,
            );
            Ok(prepend_content(current, &text))
        }
        ActionKind::PatternMerge => Ok(merge_patterns(
            current,
            action.section.as_deref(),
            action
                .content_template
                .as_deref()
                .unwrap_or(DEFAULT_PATTERN_TEMPLATE),
            ctx,
        )),
    }
}

// ---------------------------------------------------------------------------
// Line model
// ---------------------------------------------------------------------------

struct Doc {
    lines: Vec<String>,
    trailing_newline: bool,
}

impl Doc {
    fn parse(content: &str) -> Self {
        if content.is_empty() {
            return Doc {
                lines: Vec::new(),
                trailing_newline: true,
            };
        }
        let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
        let trailing_newline = content.ends_with('\n');
        if trailing_newline {
            lines.pop();
        }
        Doc {
            lines,
            trailing_newline,
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    fn ends_with_blank(&self) -> bool {
        self.lines.last().is_some_and(|l| is_blank(l))
    }

    /// Separate appended blocks from existing text with one blank line.
    fn push_block(&mut self, block: Vec<String>) {
        if !self.lines.is_empty() && !self.ends_with_blank() {
            self.lines.push(String::new());
        }
        self.lines.extend(block);
    }
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn text_lines(text: &str) -> Vec<String> {
    text.trim_end_matches(['\n', '\r'])
        .split('\n')
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
struct Heading {
    index: usize,
    level: usize,
    text: String,
}

fn is_fence(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("```") || t.starts_with("~~~")
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let t = line.trim();
    let level = t.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &t[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    let mut text = rest.trim();
    // Optional closing sequence: "## Title ##".
    let stripped = text.trim_end_matches('#');
    if stripped.len() != text.len() && (stripped.is_empty() || stripped.ends_with(' ')) {
        text = stripped.trim_end();
    }
    Some((level, text.to_string()))
}

/// ATX headings outside fenced code blocks.
fn headings(lines: &[String]) -> Vec<Heading> {
    let mut out = Vec::new();
    let mut in_fence = false;
    for (index, line) in lines.iter().enumerate() {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some((level, text)) = parse_heading(line) {
            out.push(Heading { index, level, text });
        }
    }
    out
}

fn find_section(lines: &[String], name: &str) -> Option<(Heading, usize)> {
    let all = headings(lines);
    let pos = all.iter().position(|h| h.text == name)?;
    let heading = all[pos].clone();
    let end = all[pos + 1..]
        .iter()
        .find(|h| h.level <= heading.level)
        .map(|h| h.index)
        .unwrap_or(lines.len());
    Some((heading, end))
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

static SEPARATOR_CELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^:?-+:?$").unwrap());

struct Table {
    end: usize,
    header: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn is_table_line(line: &str) -> bool {
    line.trim_start().starts_with('|')
}

/// Split `| a | b |` into trimmed cells, honoring `\|` escapes.
fn split_cells(line: &str) -> Result<Vec<String>, String> {
    let t = line.trim();
    if !t.starts_with('|') {
        return Err("row does not start with '|'".to_string());
    }
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut escaped = false;
    let mut closed = false;
    for c in t[1..].chars() {
        closed = false;
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' => {
                current.push(c);
                escaped = true;
            }
            '|' => {
                cells.push(current.trim().to_string());
                current.clear();
                closed = true;
            }
            _ => current.push(c),
        }
    }
    if !closed {
        return Err("row does not end with '|'".to_string());
    }
    Ok(cells)
}

fn is_separator_row(cells: &[String]) -> bool {
    !cells.is_empty() && cells.iter().all(|c| SEPARATOR_CELL.is_match(c))
}

fn escape_cell(value: &str) -> String {
    value
        .replace('\n', " ")
        .replace('\r', "")
        .replace('|', "\\|")
        .trim()
        .to_string()
}

fn format_row(cells: &[String]) -> String {
    format!("| {} |", cells.join(" | "))
}

fn format_separator(columns: usize) -> String {
    format!("| {} |", vec!["---"; columns].join(" | "))
}

fn parse_table(lines: &[String], start: usize, section: &str) -> Result<Table, DocHookError> {
    let malformed = |line: usize, reason: String| DocHookError::MalformedTable {
        section: section.to_string(),
        line: line + 1,
        reason,
    };

    let mut end = start;
    while end < lines.len() && is_table_line(&lines[end]) {
        end += 1;
    }

    let header = split_cells(&lines[start]).map_err(|r| malformed(start, r))?;
    if header.is_empty() || header.iter().all(|c| c.is_empty()) {
        return Err(malformed(start, "header row has no columns".to_string()));
    }

    let mut idx = start + 1;
    if idx < end {
        let cells = split_cells(&lines[idx]).map_err(|r| malformed(idx, r))?;
        if is_separator_row(&cells) {
            if cells.len() != header.len() {
                return Err(malformed(
                    idx,
                    format!(
                        "separator has {} columns, header has {}",
                        cells.len(),
                        header.len()
                    ),
                ));
            }
            idx += 1;
        }
    }

    let mut rows = Vec::new();
    for i in idx..end {
        let cells = split_cells(&lines[i]).map_err(|r| malformed(i, r))?;
        if cells.len() != header.len() {
            return Err(malformed(
                i,
                format!("expected {} cells, found {}", header.len(), cells.len()),
            ));
        }
        rows.push(cells);
    }

    Ok(Table { end, header, rows })
}

fn first_table_line(lines: &[String], from: usize, to: usize) -> Option<usize> {
    let mut in_fence = false;
    for (i, line) in lines.iter().enumerate().take(to).skip(from) {
        if is_fence(line) {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence && is_table_line(line) {
            return Some(i);
        }
    }
    None
}

fn cell_value(action: &Action, column: &str, ctx: &Context) -> String {
    let raw = match &action.row_mapping {
        Some(mapping) => mapping
            .get(column)
            .map(|expr| render(expr, ctx))
            .unwrap_or_default(),
        None => match column {
            "Name" | "File" => ctx.get("file").cloned().unwrap_or_default(),
            other => ctx.get(&other.to_lowercase()).cloned().unwrap_or_default(),
        },
    };
    escape_cell(&raw)
}

fn new_table_block(action: &Action, ctx: &Context) -> Vec<String> {
    let headers: Vec<String> = action
        .headers
        .clone()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| DEFAULT_HEADERS.iter().map(|h| h.to_string()).collect());
    let cells: Vec<String> = headers.iter().map(|h| cell_value(action, h, ctx)).collect();
    let header_cells: Vec<String> = headers.iter().map(|h| escape_cell(h)).collect();
    vec![
        format_row(&header_cells),
        format_separator(headers.len()),
        format_row(&cells),
    ]
}

fn append_table_row(
    action: &Action,
    current: &str,
    ctx: &Context,
) -> Result<MutationResult, DocHookError> {
    let mut doc = Doc::parse(current);
    let section_label = action.section.clone().unwrap_or_default();

    let (body_start, body_end) = match action.section.as_deref() {
        Some(name) => match find_section(&doc.lines, name) {
            Some((heading, end)) => (heading.index + 1, end),
            None => {
                let mut block = vec![format!("## {}", name), String::new()];
                block.extend(new_table_block(action, ctx));
                doc.push_block(block);
                return Ok(MutationResult {
                    new_content: doc.render(),
                    changed: true,
                });
            }
        },
        None => (0, doc.lines.len()),
    };

    match first_table_line(&doc.lines, body_start, body_end) {
        Some(start) => {
            let table = parse_table(&doc.lines, start, &section_label)?;
            let cells: Vec<String> = table
                .header
                .iter()
                .map(|h| cell_value(action, h, ctx))
                .collect();
            let existing: FxHashSet<&Vec<String>> = table.rows.iter().collect();
            if existing.contains(&cells) {
                return Ok(MutationResult::unchanged(current));
            }
            doc.lines.insert(table.end, format_row(&cells));
        }
        None => {
            let mut pos = body_end;
            while pos > body_start && is_blank(&doc.lines[pos - 1]) {
                pos -= 1;
            }
            let mut block = Vec::new();
            if pos > 0 && !is_blank(&doc.lines[pos - 1]) {
                block.push(String::new());
            }
            block.extend(new_table_block(action, ctx));
            if pos < doc.lines.len() && !is_blank(&doc.lines[pos]) {
                block.push(String::new());
            }
            doc.lines.splice(pos..pos, block);
        }
    }

    Ok(MutationResult {
        new_content: doc.render(),
        changed: true,
    })
}

// ---------------------------------------------------------------------------
// Records, sections, prepends
// ---------------------------------------------------------------------------

/// Append `text` at the end of `section` (or the file). Never deduplicated.
pub fn append_record(current: &str, section: Option<&str>, text: &str) -> MutationResult {
    let mut doc = Doc::parse(current);
    let record = text_lines(text);

    match section {
        None => doc.push_block(record),
        Some(name) => match find_section(&doc.lines, name) {
            None => {
                let mut block = vec![format!("## {}", name), String::new()];
                block.extend(record);
                doc.push_block(block);
            }
            Some((heading, end)) => {
                let mut pos = end;
                while pos > heading.index + 1 && is_blank(&doc.lines[pos - 1]) {
                    pos -= 1;
                }
                let mut block = Vec::new();
                if !is_blank(&doc.lines[pos - 1]) {
                    block.push(String::new());
                }
                block.extend(record);
                if pos == end && end < doc.lines.len() {
                    block.push(String::new());
                }
                doc.lines.splice(pos..pos, block);
            }
        },
    }

    MutationResult {
        new_content: doc.render(),
        changed: true,
    }
}

/// Replace the body of `section`, keeping its heading line.
pub fn update_section(
    current: &str,
    section: &str,
    text: &str,
) -> Result<MutationResult, DocHookError> {
    let mut doc = Doc::parse(current);
    let (heading, end) = find_section(&doc.lines, section)
        .ok_or_else(|| DocHookError::SectionNotFound(section.to_string()))?;

    let mut body = vec![String::new()];
    body.extend(text_lines(text));
    if end < doc.lines.len() {
        body.push(String::new());
    }

    if doc.lines[heading.index + 1..end] == body[..] {
        return Ok(MutationResult::unchanged(current));
    }
    doc.lines.splice(heading.index + 1..end, body);
    Ok(MutationResult {
        new_content: doc.render(),
        changed: true,
    })
}

/// End index (exclusive) of a leading `---`/`+++` marker block, or 0.
fn front_matter_end(lines: &[String]) -> usize {
    let Some(first) = lines.first() else {
        return 0;
    };
    let marker = first.trim();
    if marker != "---" && marker != "+++" {
        return 0;
    }
    lines
        .iter()
        .skip(1)
        .position(|l| l.trim() == marker)
        .map(|p| p + 2)
        .unwrap_or(0)
}

/// Insert `text` after any front matter and the blank lines that follow it,
/// separated from the rest by one blank line. A document that already opens
/// with the same block is left alone, so a replayed obligation adds nothing.
pub fn prepend_content(current: &str, text: &str) -> MutationResult {
    let mut doc = Doc::parse(current);
    let block = text_lines(text);

    let mut at = front_matter_end(&doc.lines);
    while at < doc.lines.len() && is_blank(&doc.lines[at]) {
        at += 1;
    }
    let rest = &doc.lines[at..];
    if rest.len() >= block.len()
        && rest[..block.len()] == block[..]
        && rest.get(block.len()).is_none_or(|l| is_blank(l))
    {
        return MutationResult::unchanged(current);
    }

    let mut insert = block;
    if !rest.is_empty() {
        insert.push(String::new());
    }
    doc.lines.splice(at..at, insert);

    MutationResult {
        new_content: doc.render(),
        changed: true,
    }
}

/// Append one block per pattern in `ctx["patterns"]` whose first line is not
/// already a line of the document. Each block renders `template` with
/// `{pattern}` and `{pattern_lower}` set.
pub fn merge_patterns(
    current: &str,
    section: Option<&str>,
    template: &str,
    ctx: &Context,
) -> MutationResult {
    let present: FxHashSet<&str> = current.lines().map(str::trim).collect();
    let mut ctx = ctx.clone();
    let mut missing: Vec<String> = Vec::new();
    let patterns: Vec<String> = ctx
        .get(PATTERNS_KEY)
        .map(|raw| {
            raw.lines()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    for pattern in patterns {
        ctx.insert("pattern".into(), pattern.clone());
        ctx.insert("pattern_lower".into(), pattern.to_lowercase());
        let block = render(template, &ctx);
        let key = block.lines().map(str::trim).find(|l| !l.is_empty());
        if key.is_some_and(|line| !present.contains(line)) {
            missing.push(block.trim_end().to_string());
        }
    }
    if missing.is_empty() {
        return MutationResult::unchanged(current);
    }

    let separator = if missing.iter().all(|b| !b.contains('\n')) {
        "\n"
    } else {
        "\n\n"
    };
    append_record(current, section, &missing.join(separator))
}
