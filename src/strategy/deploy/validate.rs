//! Structural rules for staged artifacts.
//!
//! These are deliberately shallow text checks: enough to catch an artifact
//! that could never work against production, not a linter.

use std::{fs, io, path::Path};

use regex::Regex;

use crate::config::ValidationRules;
use crate::model::{Artifact, ArtifactType};

/// Validation rules compiled once per strategy.
#[derive(Debug)]
pub struct ArtifactRules {
    page_base: String,
    extends_base: Regex,
    page_constructor: Regex,
    steps_imports: Vec<String>,
    steps_import: Regex,
    assertion_imports: Vec<String>,
    assertion_import: Regex,
    scenario: Regex,
    tag: Regex,
}

impl ArtifactRules {
    pub fn compile(rules: &ValidationRules) -> Result<Self, regex::Error> {
        Ok(Self {
            page_base: rules.page_base.clone(),
            extends_base: Regex::new(&format!(
                r"class\s+\w+\s+extends\s+{}\b",
                regex::escape(&rules.page_base)
            ))?,
            page_constructor: Regex::new(r"constructor\s*\(\s*page\b")?,
            steps_imports: rules.steps_imports.clone(),
            steps_import: import_regex(&rules.steps_imports)?,
            assertion_imports: rules.assertion_imports.clone(),
            assertion_import: import_regex(&rules.assertion_imports)?,
            scenario: Regex::new(r"(?m)^\s*Scenario(?: Outline)?:")?,
            tag: Regex::new(r"(?m)^\s*@[\w-]+")?,
        })
    }

    /// Every rule violation for one file, read from `path`.
    ///
    /// `path` may differ from `artifact.path` when re-checking a deployed copy.
    pub fn check(&self, artifact: &Artifact, path: &Path) -> Vec<String> {
        let label = path.display();
        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return vec![format!("{label}: file does not exist")];
            }
            Err(e) => return vec![format!("{label}: unreadable: {e}")],
        };
        if content.trim().is_empty() {
            return vec![format!("{label}: file is empty")];
        }

        let mut errors = Vec::new();
        match artifact.kind {
            ArtifactType::Page => {
                if !self.extends_base.is_match(&content) {
                    errors.push(format!("{label}: page must extend {}", self.page_base));
                }
                if !self.page_constructor.is_match(&content) {
                    errors.push(format!("{label}: page must declare constructor(page)"));
                }
            }
            ArtifactType::Steps => {
                if !self.steps_import.is_match(&content) {
                    errors.push(format!(
                        "{label}: steps must import step definitions from one of {}",
                        self.steps_imports.join(", ")
                    ));
                }
                if !self.assertion_import.is_match(&content) {
                    errors.push(format!(
                        "{label}: steps must import assertions from one of {}",
                        self.assertion_imports.join(", ")
                    ));
                }
            }
            ArtifactType::Feature => {
                if !self.scenario.is_match(&content) {
                    errors.push(format!("{label}: feature must declare at least one Scenario"));
                }
                if !self.tag.is_match(&content) {
                    errors.push(format!("{label}: feature must carry at least one @tag"));
                }
            }
        }
        errors
    }
}

/// Matches `from 'module'` and `require('module')` for any listed module.
fn import_regex(modules: &[String]) -> Result<Regex, regex::Error> {
    let alternatives = modules
        .iter()
        .map(|m| regex::escape(m))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r#"(?:\bfrom\s*|\brequire\s*\(\s*)['"](?:{alternatives})['"]"#
    ))
}
