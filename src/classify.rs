//! Heuristic failure classification.
//!
//! A [`PatternTable`] maps each [`ErrorCategory`] to case-insensitive
//! regexes. Categories are always checked in [`ErrorCategory::ORDERED`]
//! order so overlapping patterns (a network `timeout` inside a compiler
//! `error:` line, say) resolve the same way every run.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What kind of failure a build command hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Memory,
    Disk,
    Network,
    Permission,
    Compile,
    Docker,
    Unknown,
}

impl ErrorCategory {
    /// Categories that own patterns, in matching order.
    pub const ORDERED: [ErrorCategory; 6] = [
        ErrorCategory::Memory,
        ErrorCategory::Disk,
        ErrorCategory::Network,
        ErrorCategory::Permission,
        ErrorCategory::Compile,
        ErrorCategory::Docker,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Memory => "memory",
            ErrorCategory::Disk => "disk",
            ErrorCategory::Network => "network",
            ErrorCategory::Permission => "permission",
            ErrorCategory::Compile => "compile",
            ErrorCategory::Docker => "docker",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Built-in patterns for this category.
    fn default_patterns(self) -> &'static [&'static str] {
        match self {
            ErrorCategory::Memory => &[r"fatal: out of memory", r"Cannot allocate memory", r"killed"],
            ErrorCategory::Disk => &[r"No space left on device", r"Disk full"],
            ErrorCategory::Network => &[r"unable to connect", r"Network is unreachable", r"timeout"],
            ErrorCategory::Permission => &[r"Permission denied", r"Operation not permitted"],
            ErrorCategory::Compile => &[r"error:", r"failed", r"make.*Error"],
            ErrorCategory::Docker => &[r"docker.*error", r"container.*not found"],
            ErrorCategory::Unknown => &[],
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCategory {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorCategory::ORDERED
            .into_iter()
            .chain([ErrorCategory::Unknown])
            .find(|c| c.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ConfigError::UnknownCategory(s.to_string()))
    }
}

/// Ordered category -> compiled pattern list.
#[derive(Debug, Clone)]
pub struct PatternTable {
    entries: Vec<(ErrorCategory, Vec<Regex>)>,
}

impl PatternTable {
    /// The stock pattern table.
    pub fn builtin() -> Result<Self> {
        Self::from_overrides(BTreeMap::new())
    }

    /// Load a JSON pattern file (`{"disk": ["..."], ...}`) on top of the
    /// built-in table. `None` gives the built-in table.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read pattern file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Invalid pattern file {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let raw: BTreeMap<String, Vec<String>> =
            serde_json::from_str(content).context("pattern file must map category names to lists")?;
        let mut overrides = BTreeMap::new();
        for (name, patterns) in raw {
            let category: ErrorCategory = name.parse()?;
            if category == ErrorCategory::Unknown {
                return Err(ConfigError::UnknownCategory(name).into());
            }
            overrides.insert(category, patterns);
        }
        Self::from_overrides(overrides)
    }

    /// Categories absent from `overrides` keep their built-in patterns.
    fn from_overrides(mut overrides: BTreeMap<ErrorCategory, Vec<String>>) -> Result<Self> {
        let mut entries = Vec::with_capacity(ErrorCategory::ORDERED.len());
        for category in ErrorCategory::ORDERED {
            let sources = overrides.remove(&category).unwrap_or_else(|| {
                category
                    .default_patterns()
                    .iter()
                    .map(|p| p.to_string())
                    .collect()
            });
            let compiled = sources
                .iter()
                .map(|p| compile(category, p))
                .collect::<Result<Vec<_>, _>>()?;
            entries.push((category, compiled));
        }
        Ok(Self { entries })
    }

    /// First category with a pattern found anywhere in `text`, else `Unknown`.
    pub fn classify(&self, text: &str) -> ErrorCategory {
        self.entries
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|re| re.is_match(text)))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Unknown)
    }

    /// Patterns registered for `category`, as written.
    pub fn patterns(&self, category: ErrorCategory) -> Vec<&str> {
        self.entries
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, patterns)| patterns.iter().map(|re| re.as_str()).collect())
            .unwrap_or_default()
    }

    /// Print the table for `show config`.
    pub fn print(&self) {
        println!("Error patterns (checked in order):");
        for (category, patterns) in &self.entries {
            let list: Vec<&str> = patterns.iter().map(|re| re.as_str()).collect();
            println!("  {:<10} {}", category.as_str(), list.join(" | "));
        }
    }
}

fn compile(category: ErrorCategory, pattern: &str) -> Result<Regex, ConfigError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| ConfigError::InvalidPattern {
            category: category.to_string(),
            pattern: pattern.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PatternTable {
        PatternTable::builtin().unwrap()
    }

    #[test]
    fn test_each_category_matches_its_own_patterns() {
        let cases = [
            ("fatal: Out of memory, malloc failed", ErrorCategory::Memory),
            ("cc1: Cannot allocate memory", ErrorCategory::Memory),
            ("write error: No space left on device", ErrorCategory::Disk),
            ("DISK FULL", ErrorCategory::Disk),
            ("wget: unable to connect to github.com", ErrorCategory::Network),
            ("connect: Network is unreachable", ErrorCategory::Network),
            ("mkdir: Permission denied", ErrorCategory::Permission),
            ("chown: Operation not permitted", ErrorCategory::Permission),
            ("drivers/foo.c:12: error: expected ';'", ErrorCategory::Compile),
            ("make[2]: *** [Makefile:12: all] Error 2", ErrorCategory::Compile),
            ("Error response from docker daemon: error", ErrorCategory::Docker),
            ("container rpi4 not found", ErrorCategory::Docker),
        ];
        for (text, expected) in cases {
            assert_eq!(table().classify(text), expected, "text: {}", text);
        }
    }

    #[test]
    fn test_unmatched_text_is_unknown() {
        assert_eq!(table().classify("everything is fine"), ErrorCategory::Unknown);
        assert_eq!(table().classify(""), ErrorCategory::Unknown);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(table().classify("no SPACE left ON device"), ErrorCategory::Disk);
    }

    #[test]
    fn test_earlier_category_wins_on_overlap() {
        // "killed" (memory) and "error:" (compile) both match.
        assert_eq!(
            table().classify("error: cc1 was killed by signal 9"),
            ErrorCategory::Memory
        );
        // "timeout" (network) beats "failed" (compile).
        assert_eq!(table().classify("download failed: timeout"), ErrorCategory::Network);
    }

    #[test]
    fn test_timeout_marker_is_network() {
        assert_eq!(
            table().classify(crate::process::TIMEOUT_MARKER),
            ErrorCategory::Network
        );
    }

    #[test]
    fn test_docker_errors_shadowed_by_compile() {
        // Contains "error:", and compile is checked before docker.
        assert_eq!(table().classify("docker: error: daemon not running"), ErrorCategory::Compile);
        assert_eq!(table().classify("docker daemon returned an error"), ErrorCategory::Docker);
    }

    #[test]
    fn test_json_override_replaces_only_named_category() {
        let table = PatternTable::from_json(r#"{"disk": ["quota exceeded"]}"#).unwrap();
        assert_eq!(table.classify("Disk quota exceeded"), ErrorCategory::Disk);
        assert_eq!(table.classify("No space left on device"), ErrorCategory::Unknown);
        assert_eq!(table.classify("Permission denied"), ErrorCategory::Permission);
        assert_eq!(table.patterns(ErrorCategory::Disk), vec!["quota exceeded"]);
    }

    #[test]
    fn test_json_order_does_not_change_priority() {
        let table =
            PatternTable::from_json(r#"{"docker": ["boom"], "memory": ["boom"]}"#).unwrap();
        assert_eq!(table.classify("boom"), ErrorCategory::Memory);
    }

    #[test]
    fn test_json_unknown_category_rejected() {
        let err = PatternTable::from_json(r#"{"gpu": ["x"]}"#).unwrap_err();
        assert!(format!("{:#}", err).contains("gpu"));
        assert!(PatternTable::from_json(r#"{"unknown": ["x"]}"#).is_err());
    }

    #[test]
    fn test_json_bad_regex_rejected() {
        let err = PatternTable::from_json(r#"{"disk": ["("]}"#).unwrap_err();
        assert!(format!("{:#}", err).contains("invalid pattern"));
    }

    #[test]
    fn test_load_without_path_is_builtin() {
        let table = PatternTable::load(None).unwrap();
        assert_eq!(table.patterns(ErrorCategory::Disk).len(), 2);
        assert!(table.patterns(ErrorCategory::Unknown).is_empty());
    }

    #[test]
    fn test_category_parse_and_display() {
        assert_eq!("Network".parse::<ErrorCategory>().unwrap(), ErrorCategory::Network);
        assert_eq!(ErrorCategory::Compile.to_string(), "compile");
        assert!("nope".parse::<ErrorCategory>().is_err());
    }
}
