//! Artifacts: generated files handed to the core by the caller.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// The declared type of a generated artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactType {
    /// A Gherkin feature file.
    Feature,

    /// Step definitions.
    Steps,

    /// A page object.
    Page,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Feature => "feature",
            Self::Steps => "steps",
            Self::Page => "page",
        })
    }
}

/// One generated file. Read-only to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,

    #[serde(rename = "type")]
    pub kind: ArtifactType,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, kind: ArtifactType) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn is_feature(&self) -> bool {
        self.kind == ArtifactType::Feature
    }
}
