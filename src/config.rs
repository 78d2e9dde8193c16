//! stagelink configuration.
//!
//! Looked up at `--config`, then `./stagelink.toml`, then
//! `~/.stagelink/config.toml`. Every key has a default, so a missing file is
//! a valid configuration. Relative paths are anchored to the directory the
//! file was found in (or the working directory when there is no file).

use std::{
    env, fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::model::{ImportMapping, LinkKind, Matcher, SymlinkMapping};
use crate::orchestrator::DEFAULT_LARGE_ARTIFACT_THRESHOLD;

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config at {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("import mapping for '{target}' needs exactly one of `literal` or `pattern`")]
    AmbiguousImport { target: String },

    #[error("could not determine the working directory: {0}")]
    WorkingDir(#[source] io::Error),
}

/// Project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    /// Where generated artifacts are staged.
    pub staging_root: PathBuf,

    /// The shared dependency tree artifacts need to reach.
    pub production_root: PathBuf,

    /// Session record, metrics, deployment log, backups, environments.
    pub scratch_dir: PathBuf,

    /// Production paths the path resolver expects, relative to `production-root`.
    pub expected_paths: Vec<PathBuf>,

    /// Artifact counts above this favor the virtual strategy.
    pub large_artifact_threshold: usize,

    pub symlinks: Vec<LinkSpec>,
    pub imports: Vec<ImportSpec>,
    pub validation: ValidationRules,
    pub runner: RunnerConfig,
}

/// A link to create: `source` under production, `target` under staging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LinkSpec {
    pub source: PathBuf,
    pub target: PathBuf,
    pub kind: LinkKind,
}

/// An import mapping as written in the config file.
///
/// `target` is relative to `production-root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImportSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub literal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    pub target: String,
}

/// Structural rules staged artifacts must satisfy before deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ValidationRules {
    /// The class every page object must extend.
    pub page_base: String,

    /// Modules providing Given/When/Then; steps must import one.
    pub steps_imports: Vec<String>,

    /// Assertion modules; steps must import one.
    pub assertion_imports: Vec<String>,
}

/// The BDD test runner and the post-deploy syntax check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RunnerConfig {
    /// Program and leading arguments; the feature path and tags are appended.
    pub command: Vec<String>,
    pub timeout_secs: u64,

    /// Program and arguments run against each deployed steps/page file.
    /// Skipped when unset.
    pub syntax_check: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            staging_root: PathBuf::from("staging"),
            production_root: PathBuf::from("."),
            scratch_dir: PathBuf::from(".stagelink"),
            expected_paths: vec![PathBuf::from("pages/BasePage.js"), PathBuf::from("support")],
            large_artifact_threshold: DEFAULT_LARGE_ARTIFACT_THRESHOLD,
            symlinks: vec![
                LinkSpec {
                    source: PathBuf::from("support"),
                    target: PathBuf::from("support"),
                    kind: LinkKind::Directory,
                },
                LinkSpec {
                    source: PathBuf::from("pages/BasePage.js"),
                    target: PathBuf::from("pages/BasePage.js"),
                    kind: LinkKind::File,
                },
            ],
            imports: vec![
                ImportSpec {
                    literal: Some("../pages/BasePage".into()),
                    pattern: None,
                    target: "pages/BasePage.js".into(),
                },
                ImportSpec {
                    literal: None,
                    pattern: Some(r"^(?:\.\./)+support/(.+)$".into()),
                    target: "support/$1".into(),
                },
            ],
            validation: ValidationRules::default(),
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            page_base: "BasePage".into(),
            steps_imports: vec!["@cucumber/cucumber".into()],
            assertion_imports: vec!["@playwright/test".into(), "assert".into(), "chai".into()],
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: vec!["npx".into(), "cucumber-js".into()],
            timeout_secs: 300,
            syntax_check: None,
        }
    }
}

impl Config {
    /// File name looked up in the working directory.
    pub const FILE_NAME: &'static str = "stagelink.toml";

    /// Load config from the first location that exists, anchoring relative paths.
    ///
    /// An explicit path must exist. Without one, falling through every
    /// location yields the defaults anchored at the working directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let cwd = env::current_dir().map_err(ConfigError::WorkingDir)?;

        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => [Some(cwd.join(Self::FILE_NAME)), Self::user_path()]
                .into_iter()
                .flatten()
                .find(|p| p.is_file()),
        };

        let Some(path) = path else {
            tracing::debug!("no config file found, using defaults");
            return Self::default().anchored(&cwd);
        };

        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&contents, &path)?;

        let base = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| cwd.clone(), Path::to_path_buf);
        let base = if base.is_absolute() { base } else { cwd.join(base) };
        tracing::debug!(path = %path.display(), "loaded config");
        config.anchored(&base)
    }

    /// Parse config text. `path` is only used for error messages.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The per-user config file: `~/.stagelink/config.toml`.
    pub fn user_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".stagelink").join("config.toml"))
    }

    /// Make every root absolute against `base` and check import specs.
    pub fn anchored(mut self, base: &Path) -> Result<Self, ConfigError> {
        self.staging_root = base.join(&self.staging_root);
        self.production_root = base.join(&self.production_root);
        self.scratch_dir = base.join(&self.scratch_dir);
        self.import_mappings()?;
        Ok(self)
    }

    /// Expected production paths as absolute paths.
    pub fn expected_production_paths(&self) -> Vec<PathBuf> {
        self.expected_paths
            .iter()
            .map(|p| self.production_root.join(p))
            .collect()
    }

    /// Symlink specs with absolute endpoints.
    pub fn symlink_mappings(&self) -> Vec<SymlinkMapping> {
        self.symlinks
            .iter()
            .map(|spec| SymlinkMapping {
                source_path: self.production_root.join(&spec.source),
                target_path: self.staging_root.join(&spec.target),
                kind: spec.kind,
            })
            .collect()
    }

    /// Import specs as mappings, targets still relative to production.
    pub fn import_mappings(&self) -> Result<Vec<ImportMapping>, ConfigError> {
        self.imports
            .iter()
            .map(|spec| {
                let matcher = match (&spec.literal, &spec.pattern) {
                    (Some(l), None) => Matcher::Literal(l.clone()),
                    (None, Some(p)) => Matcher::Pattern(p.clone()),
                    _ => {
                        return Err(ConfigError::AmbiguousImport {
                            target: spec.target.clone(),
                        });
                    }
                };
                Ok(ImportMapping {
                    matcher,
                    target: spec.target.clone(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::parse("", Path::new("stagelink.toml")).unwrap();
        assert_eq!(config.staging_root, PathBuf::from("staging"));
        assert_eq!(config.large_artifact_threshold, 50);
        assert_eq!(config.runner.timeout_secs, 300);
        assert_eq!(config.validation.page_base, "BasePage");
    }

    #[test]
    fn parses_kebab_case_keys_and_tables() {
        let toml = r#"
            staging-root = "generated"
            production-root = "../shared"
            large-artifact-threshold = 10

            [[symlinks]]
            source = "support"
            target = "support"
            kind = "directory"

            [[imports]]
            literal = "../world"
            target = "support/world.js"

            [runner]
            command = ["npx", "cucumber-js", "--format", "progress"]
            syntax-check = ["node", "--check"]
        "#;
        let config = Config::parse(toml, Path::new("stagelink.toml")).unwrap();

        assert_eq!(config.staging_root, PathBuf::from("generated"));
        assert_eq!(config.large_artifact_threshold, 10);
        assert_eq!(config.symlinks.len(), 1);
        assert_eq!(config.symlinks[0].kind, LinkKind::Directory);
        assert_eq!(config.runner.command.len(), 4);
        assert_eq!(
            config.runner.syntax_check,
            Some(vec!["node".to_string(), "--check".to_string()])
        );
        // Unset keys in a present table still default.
        assert_eq!(config.runner.timeout_secs, 300);
    }

    #[test]
    fn anchors_relative_roots() {
        let config = Config::default().anchored(Path::new("/work")).unwrap();
        assert_eq!(config.staging_root, PathBuf::from("/work/staging"));
        assert_eq!(config.scratch_dir, PathBuf::from("/work/.stagelink"));
        assert_eq!(
            config.symlink_mappings()[0].target_path,
            PathBuf::from("/work/staging/support")
        );
    }

    #[test]
    fn rejects_import_with_both_matchers() {
        let toml = r#"
            [[imports]]
            literal = "../world"
            pattern = "world"
            target = "support/world.js"
        "#;
        let config = Config::parse(toml, Path::new("stagelink.toml")).unwrap();
        let err = config.anchored(Path::new("/work")).unwrap_err();
        assert!(matches!(err, ConfigError::AmbiguousImport { .. }));
    }

    #[test]
    fn invalid_toml_names_the_file() {
        let err = Config::parse("staging-root = [", Path::new("/x/stagelink.toml")).unwrap_err();
        assert!(err.to_string().contains("/x/stagelink.toml"));
    }
}
