//! Parsing of the newline-delimited input list.

use std::path::{Path, PathBuf};

use crate::core::naming::expected_test_path;
use crate::core::types::CandidateUnit;

/// Unit paths listed in `contents`, one per line.
///
/// Blank lines (including the one after a trailing newline) are dropped and
/// Windows line endings are tolerated.
pub fn parse_input_list(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Pair each listed unit with the default test location.
///
/// A unit whose name cannot be derived keeps an empty test path; the
/// pipeline reports it as an error for that candidate only.
pub fn candidates_from_list(
    units: &[PathBuf],
    source_dir: &Path,
    test_dir: &Path,
    test_token: &str,
) -> Vec<CandidateUnit> {
    units
        .iter()
        .map(|unit| {
            let test = expected_test_path(unit, source_dir, test_dir, test_token)
                .unwrap_or_default();
            CandidateUnit::new(unit.clone(), test)
        })
        .collect()
}

/// Render unit paths back into the list format (trailing newline included).
pub fn render_input_list(units: &[PathBuf]) -> String {
    let mut buf = String::new();
    for unit in units {
        buf.push_str(&unit.to_string_lossy());
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_trailing_empty_line() {
        let units = parse_input_list("src/main/A.java\nsrc/main/B.java\n");
        assert_eq!(
            units,
            vec![
                PathBuf::from("src/main/A.java"),
                PathBuf::from("src/main/B.java")
            ]
        );
    }

    #[test]
    fn tolerates_crlf_and_blank_lines() {
        let units = parse_input_list("src/main/A.java\r\n\r\n  \nsrc/main/B.java");
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], PathBuf::from("src/main/A.java"));
    }

    #[test]
    fn candidates_use_default_test_location() {
        let units = parse_input_list("src/main/java/org/Foo.java\n");
        let candidates =
            candidates_from_list(&units, Path::new("src/main"), Path::new("src/test"), "Test");
        assert_eq!(
            candidates,
            vec![CandidateUnit::new(
                "src/main/java/org/Foo.java",
                "src/test/java/org/FooTest.java"
            )]
        );
    }

    #[test]
    fn underivable_unit_keeps_empty_test_path() {
        let candidates = candidates_from_list(
            &[PathBuf::from("src/..")],
            Path::new("src/main"),
            Path::new("src/test"),
            "Test",
        );
        assert_eq!(candidates[0].test_path, PathBuf::new());
        assert!(candidates[0].unit_name().is_err());
    }

    #[test]
    fn rendered_list_parses_back() {
        let units = vec![PathBuf::from("src/main/A.java")];
        assert_eq!(parse_input_list(&render_input_list(&units)), units);
    }
}
