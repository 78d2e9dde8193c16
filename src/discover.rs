//! Artifact discovery under a staging root.
//!
//! Features come from `features/`, steps from `steps/`, page objects from
//! `pages/`. Symbolic links are skipped, so links the symlink strategy
//! manages are never mistaken for artifacts.

use std::path::Path;

use ignore::WalkBuilder;

use crate::model::{Artifact, ArtifactType};

const SOURCE_EXTENSIONS: &[&str] = &["js", "ts", "mjs", "cjs"];

/// Directories never descended into.
const SKIP_DIRS: &[&str] = &["node_modules"];

/// Find every artifact under `root`, sorted by path within each kind.
pub fn discover_artifacts(root: &Path) -> Vec<Artifact> {
    let mut artifacts = Vec::new();
    artifacts.extend(walk(&root.join("features"), ArtifactType::Feature, &["feature"]));
    artifacts.extend(walk(&root.join("steps"), ArtifactType::Steps, SOURCE_EXTENSIONS));
    artifacts.extend(walk(&root.join("pages"), ArtifactType::Page, SOURCE_EXTENSIONS));
    tracing::debug!(root = %root.display(), count = artifacts.len(), "discovered artifacts");
    artifacts
}

fn walk(dir: &Path, kind: ArtifactType, extensions: &[&str]) -> Vec<Artifact> {
    if !dir.is_dir() {
        return Vec::new();
    }

    let mut builder = WalkBuilder::new(dir);
    builder
        // Generated artifacts are often gitignored; discover them anyway.
        .standard_filters(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|ft| ft.is_dir());
            !(is_dir && SKIP_DIRS.iter().any(|s| entry.file_name() == *s))
        })
        .sort_by_file_name(Ord::cmp);

    builder
        .build()
        .flatten()
        .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| extensions.contains(&e))
        })
        .map(|entry| Artifact::new(entry.into_path(), kind))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;

    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn finds_each_kind_in_its_directory() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "features/login.feature");
        touch(dir.path(), "features/nested/cart.feature");
        touch(dir.path(), "steps/login.steps.js");
        touch(dir.path(), "steps/cart.steps.ts");
        touch(dir.path(), "pages/login.page.mjs");
        touch(dir.path(), "features/notes.md");
        touch(dir.path(), "README.md");

        let artifacts = discover_artifacts(dir.path());
        let kinds: Vec<_> = artifacts.iter().map(|a| a.kind).collect();

        assert_eq!(
            kinds,
            vec![
                ArtifactType::Feature,
                ArtifactType::Feature,
                ArtifactType::Steps,
                ArtifactType::Steps,
                ArtifactType::Page,
            ]
        );
        assert_eq!(artifacts[0].path, dir.path().join("features/login.feature"));
        assert_eq!(artifacts[2].path, dir.path().join("steps/cart.steps.ts"));
    }

    #[test]
    fn includes_gitignored_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "features/\n").unwrap();
        touch(dir.path(), "features/login.feature");

        assert_eq!(discover_artifacts(dir.path()).len(), 1);
    }

    #[test]
    fn skips_node_modules() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "steps/node_modules/dep/index.js");
        touch(dir.path(), "steps/a.steps.js");

        assert_eq!(discover_artifacts(dir.path()).len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn skips_symbolic_links() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "production/BasePage.js");
        touch(dir.path(), "pages/login.page.js");
        std::os::unix::fs::symlink(
            dir.path().join("production/BasePage.js"),
            dir.path().join("pages/BasePage.js"),
        )
        .unwrap();

        let artifacts = discover_artifacts(dir.path());
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path, dir.path().join("pages/login.page.js"));
    }

    #[test]
    fn missing_root_yields_nothing() {
        assert!(discover_artifacts(Path::new("/no/such/stagelink/root")).is_empty());
    }
}
