//! Deterministic names derived from unit paths.
//!
//! The unit name (`Foo.java`) names the candidate's branch and report; the
//! default test name (`FooTest.java`) is what the build tool is asked to run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::MissingUnitNameError;

/// Final path component as UTF-8, or an error if there is none.
pub fn unit_name(path: &Path) -> Result<String, MissingUnitNameError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| MissingUnitNameError {
            path: path.to_path_buf(),
        })
}

/// Split `Foo.java` into (`Foo`, Some(`java`)).
pub fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

/// `Foo.java` + `Test` -> `FooTest.java`.
pub fn default_test_name(unit_name: &str, test_token: &str) -> String {
    match split_name(unit_name) {
        (stem, Some(ext)) => format!("{stem}{test_token}.{ext}"),
        (stem, None) => format!("{stem}{test_token}"),
    }
}

/// `FooTest.java` -> `FooTest`.
pub fn test_stem(test_name: &str) -> &str {
    split_name(test_name).0
}

/// Expected artifact path for a unit listed outside of discovery.
///
/// `src/main/java/org/Foo.java` maps to `src/test/java/org/FooTest.java`. Units
/// outside `source_dir` get their test next to them.
pub fn expected_test_path(
    unit_path: &Path,
    source_dir: &Path,
    test_dir: &Path,
    test_token: &str,
) -> Result<PathBuf, MissingUnitNameError> {
    let name = unit_name(unit_path)?;
    let test_name = default_test_name(&name, test_token);
    let parent = unit_path.parent().unwrap_or_else(|| Path::new(""));
    let dir = match parent.strip_prefix(source_dir) {
        Ok(relative) => test_dir.join(relative),
        Err(_) => parent.to_path_buf(),
    };
    Ok(dir.join(test_name))
}

/// Branch name and report stem for a candidate.
///
/// The unit name alone when the artifact follows the default convention;
/// otherwise both names, so fanned-out pairs of one unit never collide.
pub fn candidate_key(
    unit_path: &Path,
    test_path: &Path,
    test_token: &str,
) -> Result<String, MissingUnitNameError> {
    let unit = unit_name(unit_path)?;
    let test = unit_name(test_path)?;
    if test == default_test_name(&unit, test_token) {
        return Ok(unit);
    }
    Ok(format!("{unit}__{test}"))
}

/// Keys for a whole candidate list, unique within it.
///
/// A key already taken by an earlier pair gets the unit's directory appended
/// (`Node.java__src.main.java.b`), then a counter if that is taken too.
pub fn assign_keys<'a, I>(
    pairs: I,
    test_token: &str,
) -> Vec<Result<String, MissingUnitNameError>>
where
    I: IntoIterator<Item = (&'a Path, &'a Path)>,
{
    let mut taken = HashSet::new();
    pairs
        .into_iter()
        .map(|(unit_path, test_path)| {
            let base = candidate_key(unit_path, test_path, test_token)?;
            let mut key = base.clone();
            if taken.contains(&key) {
                key = format!("{base}__{}", dotted_parent(unit_path));
            }
            let mut n = 2;
            while taken.contains(&key) {
                key = format!("{base}__{n}");
                n += 1;
            }
            taken.insert(key.clone());
            Ok(key)
        })
        .collect()
}

/// `src/main/java/b/Node.java` -> `src.main.java.b`.
fn dotted_parent(path: &Path) -> String {
    let parts: Vec<String> = path
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return "root".to_string();
    }
    parts.join(".")
}
