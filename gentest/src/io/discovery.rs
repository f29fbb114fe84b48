//! Pair discovery over a conventional project layout.
//!
//! Every unit under `source_dir` is probed against the naming conventions in
//! order; each existing test file yields its own candidate.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::core::naming::split_name;
use crate::core::types::CandidateUnit;
use crate::io::config::LayoutConfig;

/// Test file names probed for a unit, in order: `FooTest`, `TestFoo`, `FooTests`.
pub fn test_name_conventions(unit_name: &str, test_token: &str) -> Vec<String> {
    let (stem, ext) = split_name(unit_name);
    let with_ext = |base: String| match ext {
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    };
    vec![
        with_ext(format!("{stem}{test_token}")),
        with_ext(format!("{test_token}{stem}")),
        with_ext(format!("{stem}{test_token}s")),
    ]
}

/// Enumerate candidates under `project_root`, sorted by unit path.
///
/// Returned paths are relative to `project_root`. Units without any
/// matching test are dropped.
#[instrument(skip_all, fields(root = %project_root.display()))]
pub fn discover(project_root: &Path, layout: &LayoutConfig) -> Result<Vec<CandidateUnit>> {
    let source_root = project_root.join(&layout.source_dir);
    if !source_root.is_dir() {
        return Err(anyhow!(
            "source dir {} does not exist",
            source_root.display()
        ));
    }
    let test_root = project_root.join(&layout.test_dir);

    let mut candidates = Vec::new();
    for entry in WalkDir::new(&source_root)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("walk {}", source_root.display()))?;
        if !entry.file_type().is_file() || !has_extension(entry.path(), &layout.extension) {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            debug!(path = %entry.path().display(), "skipping non-UTF-8 file name");
            continue;
        };
        let relative_dir = entry
            .path()
            .parent()
            .and_then(|parent| parent.strip_prefix(&source_root).ok())
            .unwrap_or_else(|| Path::new(""));
        let unit_path = layout.source_dir.join(relative_dir).join(name);

        for test_name in test_name_conventions(name, &layout.test_token) {
            if test_root.join(relative_dir).join(&test_name).is_file() {
                let test_path: PathBuf = layout.test_dir.join(relative_dir).join(&test_name);
                debug!(unit = %unit_path.display(), test = %test_path.display(), "matched");
                candidates.push(CandidateUnit::new(unit_path.clone(), test_path));
            }
        }
    }
    Ok(candidates)
}

fn has_extension(path: &Path, extension: &str) -> bool {
    let wanted = extension.trim_start_matches('.');
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(wanted))
}
