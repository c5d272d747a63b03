/// Dictionary sources for the recovery engine
///
/// Resolution order: an inline list supplied by the caller wins, then a
/// wordlist file (one candidate per line), then the built-in list of
/// passwords commonly found on industrial controllers.
use std::fs;
use std::path::Path;

use anyhow::Context;

/// Passwords observed in the field on unconfigured or lazily configured
/// controllers. Ordered roughly by how often they turn up.
const INDUSTRIAL_DEFAULTS: &[&str] = &[
    "password",
    "123456",
    "admin",
    "plc",
    "siemens",
    "s7",
    "1234",
    "12345678",
    "0000",
    "1111",
    "service",
    "master",
    "operator",
    "engineer",
    "maintenance",
    "supervisor",
    "default",
    "factory",
    "tia",
    "step7",
    "simatic",
    "allen",
    "bradley",
    "rockwell",
    "omron",
    "mitsubishi",
    "delta",
    "schneider",
    "controllogix",
    "micrologix",
    "qwerty",
    "asdf",
    "1qaz2wsx",
    "2020",
    "2021",
    "2022",
    "2023",
    "2024",
];

pub fn default_wordlist() -> Vec<String> {
    INDUSTRIAL_DEFAULTS.iter().map(|s| s.to_string()).collect()
}

/// Resolve the dictionary to use for one recovery run.
pub fn resolve(inline: Option<&[String]>, path: Option<&Path>) -> anyhow::Result<Vec<String>> {
    if let Some(words) = inline {
        return Ok(words.to_vec());
    }
    if let Some(path) = path {
        return load_file(path);
    }
    Ok(default_wordlist())
}

/// Load a wordlist file, skipping blank lines and `#` comments.
pub fn load_file(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("could not load wordlist {}", path.display()))?;
    let words: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    tracing::debug!("loaded {} candidates from {}", words.len(), path.display());
    Ok(words)
}
