//! Regex-driven rewriting of native server configuration files.
//!
//! Services keep their on-disk configuration (httpd.conf, nginx.conf,
//! my.ini, ...) authoritative by patching single directives in place:
//! read the whole file, replace every match, write the file back.
//! Untouched lines are preserved byte-for-byte and applying the same
//! rule twice leaves the file unchanged.
use std::{fs, path::Path};

use regex::Regex;

use crate::error::ManagerError;

/// A single directive rewrite: every match of `pattern` is replaced.
#[derive(Debug, Clone)]
pub struct PatchRule {
    pattern: Regex,
    replacement: String,
}

impl PatchRule {
    /// Builds a rule from a static pattern and a rendered replacement.
    ///
    /// Patterns are compile-time literals; an invalid one is a programming
    /// error, not a runtime condition.
    pub fn new(pattern: &str, replacement: impl Into<String>) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("invalid patch pattern"),
            replacement: replacement.into(),
        }
    }

    /// The pattern this rule matches, for diagnostics.
    pub fn directive(&self) -> String {
        self.pattern.to_string()
    }

    fn apply(&self, content: &str) -> String {
        self.pattern
            .replace_all(content, self.replacement.as_str())
            .into_owned()
    }

    fn matches(&self, content: &str) -> bool {
        self.pattern.is_match(content)
    }
}

/// Applies rules to a file, silently leaving unmatched directives alone.
pub fn patch_file(path: &Path, rules: &[PatchRule]) -> Result<(), ManagerError> {
    let content = read_file(path)?;
    let mut patched = content.clone();
    for rule in rules {
        patched = rule.apply(&patched);
    }
    if patched != content {
        write_file(path, &patched)?;
    }
    Ok(())
}

/// Applies a rule that must match, erroring with the missing directive
/// otherwise.
pub fn patch_file_required(path: &Path, rule: &PatchRule) -> Result<(), ManagerError> {
    let content = read_file(path)?;
    if !rule.matches(&content) {
        return Err(ManagerError::DirectiveNotFound {
            path: path.to_path_buf(),
            directive: rule.directive(),
        });
    }
    let patched = rule.apply(&content);
    if patched != content {
        write_file(path, &patched)?;
    }
    Ok(())
}

/// Reads a native configuration file, distinguishing absence from I/O
/// failure.
pub(crate) fn read_file(path: &Path) -> Result<String, ManagerError> {
    if !path.exists() {
        return Err(ManagerError::ConfigFileMissing {
            path: path.to_path_buf(),
        });
    }
    fs::read_to_string(path).map_err(|source| ManagerError::ConfigFileIo {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes a native configuration file back in full.
pub(crate) fn write_file(path: &Path, content: &str) -> Result<(), ManagerError> {
    fs::write(path, content).map_err(|source| ManagerError::ConfigFileIo {
        path: path.to_path_buf(),
        source,
    })
}
