//! Import redirection for one virtual environment.
//!
//! The table is compiled here for resolution and health checks, and rendered
//! into a CommonJS preload (`register.cjs`) that applies the same rules inside
//! the runner's Node process.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;

use crate::model::{ImportMapping, Matcher};

/// Extensions tried, in order, when a request names a module without one.
const MODULE_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts"];

const REGISTER_TEMPLATE: &str = include_str!("register.cjs");

/// The table as the preload sees it.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HookTable<'a> {
    env_id: &'a str,
    staging_root: &'a Path,
    production_root: &'a Path,
    literals: &'a [(String, String)],
    patterns: Vec<(String, &'a str)>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(
        "cannot resolve '{request}' from {}: tried {}",
        caller.display(),
        crate::strategy::display_paths(tried)
    )]
    NotFound {
        request: String,
        caller: PathBuf,
        tried: Vec<PathBuf>,
    },

    #[error("invalid import pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Where an import ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Rewritten to a production module that exists.
    Redirected(PathBuf),

    /// The rewritten module was missing; the request resolved as written.
    Original(PathBuf),

    /// Not a request this resolver rewrites.
    Passthrough,
}

#[derive(Debug)]
enum Rule {
    Literal(String),
    Pattern(Regex),
}

/// The ordered mapping table of one environment, compiled.
///
/// Only imports issued from files under the staging root are rewritten.
/// Literal rules are tried before pattern rules; the first match wins.
#[derive(Debug)]
pub struct ImportResolver {
    staging_root: PathBuf,
    production_root: PathBuf,
    literals: Vec<(String, String)>,
    patterns: Vec<(Regex, String)>,
}

impl ImportResolver {
    /// Compile `mappings`. Targets are relative to `production_root`.
    pub fn new(
        staging_root: PathBuf,
        production_root: PathBuf,
        mappings: &[ImportMapping],
    ) -> Result<Self, ResolveError> {
        let mut literals = Vec::new();
        let mut patterns = Vec::new();
        for mapping in mappings {
            match compile(&mapping.matcher)? {
                Rule::Literal(l) => literals.push((l, mapping.target.clone())),
                Rule::Pattern(re) => patterns.push((re, mapping.target.clone())),
            }
        }
        Ok(Self {
            staging_root,
            production_root,
            literals,
            patterns,
        })
    }

    /// The production path `request` maps to, if this resolver rewrites it.
    pub fn rewrite(&self, caller: &Path, request: &str) -> Option<PathBuf> {
        if !caller.starts_with(&self.staging_root) {
            return None;
        }

        if let Some((_, target)) = self.literals.iter().find(|(l, _)| l == request) {
            return Some(self.production_root.join(target));
        }

        self.patterns.iter().find_map(|(re, template)| {
            let caps = re.captures(request)?;
            let mut target = String::new();
            caps.expand(template, &mut target);
            Some(self.production_root.join(target))
        })
    }

    /// Resolve `request` as imported from `caller`.
    ///
    /// A rewritten import that does not exist on disk is retried once as
    /// written, relative to the caller, before it is reported.
    pub fn resolve(&self, caller: &Path, request: &str) -> Result<Resolution, ResolveError> {
        let Some(rewritten) = self.rewrite(caller, request) else {
            return Ok(Resolution::Passthrough);
        };

        let mut tried = Vec::new();
        if let Some(found) = find_module(&rewritten, &mut tried) {
            return Ok(Resolution::Redirected(found));
        }

        if is_relative(request)
            && let Some(dir) = caller.parent()
            && let Some(found) = find_module(&dir.join(request), &mut tried)
        {
            tracing::debug!(
                request,
                found = %found.display(),
                "redirect target missing, using original"
            );
            return Ok(Resolution::Original(found));
        }

        Err(ResolveError::NotFound {
            request: request.to_string(),
            caller: caller.to_path_buf(),
            tried,
        })
    }

    /// Render the preload that applies this table inside a Node child.
    ///
    /// Literals are tried before patterns, and a rewritten request that
    /// cannot be found is retried as written, as in [`Self::resolve`].
    pub fn register_hook(&self, env_id: &str) -> Result<String, serde_json::Error> {
        let table = HookTable {
            env_id,
            staging_root: &self.staging_root,
            production_root: &self.production_root,
            literals: &self.literals,
            patterns: self
                .patterns
                .iter()
                // JavaScript only knows the `(?<name>` spelling.
                .map(|(re, target)| (re.as_str().replace("(?P<", "(?<"), target.as_str()))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&table)?;
        Ok(REGISTER_TEMPLATE.replace("__TABLE__", &json))
    }
}

fn compile(matcher: &Matcher) -> Result<Rule, ResolveError> {
    match matcher {
        Matcher::Literal(l) => Ok(Rule::Literal(l.clone())),
        Matcher::Pattern(p) => Regex::new(p)
            .map(Rule::Pattern)
            .map_err(|source| ResolveError::InvalidPattern {
                pattern: p.clone(),
                source,
            }),
    }
}

fn is_relative(request: &str) -> bool {
    request.starts_with("./") || request.starts_with("../")
}

/// The first of `base`, `base.<ext>`, `base/index.js` that is a file.
fn find_module(base: &Path, tried: &mut Vec<PathBuf>) -> Option<PathBuf> {
    let mut candidates = vec![base.to_path_buf()];
    for ext in MODULE_EXTENSIONS {
        let mut name = base.as_os_str().to_owned();
        name.push(".");
        name.push(ext);
        candidates.push(PathBuf::from(name));
    }
    candidates.push(base.join("index.js"));

    for candidate in candidates {
        if candidate.is_file() {
            return Some(candidate);
        }
        tried.push(candidate);
    }
    None
}
