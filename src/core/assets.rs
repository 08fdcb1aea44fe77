//! Files embedded into the binary at compile time.
//!
//! `default_config.toml` is the base every project config merges over, and
//! `templates/*.md` back the `@name` shorthand in action templates.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "assets/"]
#[include = "*.toml"]
#[include = "templates/*.md"]
struct Embedded;

pub const DEFAULT_CONFIG_PATH: &str = "default_config.toml";

fn text(path: &str) -> Option<String> {
    Embedded::get(path).map(|f| String::from_utf8_lossy(&f.data).into_owned())
}

pub fn default_config() -> String {
    text(DEFAULT_CONFIG_PATH).unwrap_or_default()
}

/// Builtin template body by name (`troubleshooting` -> `templates/troubleshooting.md`).
pub fn get_template(name: &str) -> Option<String> {
    text(&format!("templates/{}.md", name))
}

pub fn list_templates() -> Vec<String> {
    let mut names: Vec<String> = Embedded::iter()
        .filter_map(|p| {
            p.strip_prefix("templates/")
                .and_then(|n| n.strip_suffix(".md"))
                .map(str::to_string)
        })
        .collect();
    names.sort();
    names
}

/// Expand `@name` to the builtin template; anything else is returned as-is.
pub fn resolve_template(raw: &str) -> Option<String> {
    match raw.trim().strip_prefix('@') {
        Some(name) => get_template(name),
        None => Some(raw.to_string()),
    }
}
