//! Package-declaration relocation for generated artifacts.
//!
//! Generators sometimes emit imports or comments above the package line; the
//! build tool then rejects the file. The first line matching the declaration
//! predicate is moved to the top.

/// Move the first line matching `is_declaration` to the first position.
///
/// Returns `None` when no line matches or the match is already first, so
/// callers can skip the edit entirely. Line endings are preserved.
pub fn relocate_declaration<F>(text: &str, is_declaration: F) -> Option<String>
where
    F: Fn(&str) -> bool,
{
    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    let index = lines
        .iter()
        .position(|line| is_declaration(line.trim_end_matches(['\r', '\n'])))?;
    if index == 0 {
        return None;
    }

    let mut moved = lines[index].to_string();
    if !moved.ends_with('\n') {
        // Unterminated last line: borrow the terminator of the line above.
        let above = lines[index - 1];
        moved.push_str(if above.ends_with("\r\n") { "\r\n" } else { "\n" });
    }

    let mut out = String::with_capacity(text.len() + 1);
    out.push_str(&moved);
    for (i, line) in lines.iter().enumerate() {
        if i == index {
            continue;
        }
        out.push_str(line);
    }
    if !text.ends_with('\n') && out.ends_with('\n') {
        // Keep the original "no trailing newline" shape.
        out.pop();
        if out.ends_with('\r') {
            out.pop();
        }
    }
    Some(out)
}

/// Apply [`relocate_declaration`], returning the input unchanged on no-op.
pub fn relocate_or_keep<F>(text: &str, is_declaration: F) -> String
where
    F: Fn(&str) -> bool,
{
    relocate_declaration(text, is_declaration).unwrap_or_else(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_package(line: &str) -> bool {
        line.trim_start().starts_with("package ")
    }

    #[test]
    fn moves_package_line_to_top() {
        let text = "import org.junit.Test;\npackage org.demo;\n\nclass FooTest {}\n";
        let out = relocate_declaration(text, is_package).expect("relocated");
        assert_eq!(
            out,
            "package org.demo;\nimport org.junit.Test;\n\nclass FooTest {}\n"
        );
    }

    #[test]
    fn only_first_match_moves() {
        let text = "// header\npackage a;\npackage b;\n";
        let out = relocate_declaration(text, is_package).expect("relocated");
        assert_eq!(out, "package a;\n// header\npackage b;\n");
    }

    #[test]
    fn no_match_is_noop() {
        assert_eq!(relocate_declaration("class A {}\n", is_package), None);
        assert_eq!(relocate_or_keep("class A {}\n", is_package), "class A {}\n");
    }

    #[test]
    fn second_pass_is_noop() {
        let text = "import x.Y;\npackage org.demo;\nclass T {}\n";
        let once = relocate_or_keep(text, is_package);
        assert_eq!(relocate_declaration(&once, is_package), None);
        assert_eq!(relocate_or_keep(&once, is_package), once);
    }

    #[test]
    fn unterminated_last_line_keeps_shape() {
        let text = "import x.Y;\npackage org.demo;";
        let out = relocate_declaration(text, is_package).expect("relocated");
        assert_eq!(out, "package org.demo;\nimport x.Y;");
    }

    #[test]
    fn unterminated_crlf_declaration_keeps_crlf() {
        let text = "import x.Y;\r\npackage org.demo;";
        let out = relocate_declaration(text, is_package).expect("relocated");
        assert_eq!(out, "package org.demo;\r\nimport x.Y;");
    }

    #[test]
    fn crlf_lines_match() {
        let text = "import x.Y;\r\npackage org.demo;\r\n";
        let out = relocate_declaration(text, is_package).expect("relocated");
        assert_eq!(out, "package org.demo;\r\nimport x.Y;\r\n");
    }
}
