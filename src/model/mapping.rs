//! Declarative mappings from staging to production.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Whether a link stands in for a file or a directory.
///
/// Windows creates the two differently, so the kind is declared up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkKind {
    File,
    Directory,
}

/// A link at `target_path` (staging) pointing at `source_path` (production).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymlinkMapping {
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub kind: LinkKind,
}

/// How an import request is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Matcher {
    /// The request must equal this string exactly.
    Literal(String),

    /// The request must match this regular expression.
    Pattern(String),
}

/// One row of an import-mapping table.
///
/// For a literal matcher `target` is a path. For a pattern it is a template
/// that may refer to capture groups (`$1`, `${name}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportMapping {
    pub matcher: Matcher,
    pub target: String,
}
