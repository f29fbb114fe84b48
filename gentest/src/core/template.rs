//! Placeholder substitution for configured command arrays.
//!
//! Commands are stored as argv arrays (`["mvn", "test", "-Dtest={test_stem}"]`)
//! and rendered per candidate. Unknown placeholders are left untouched.

/// Render each argument of `template`, replacing `{name}` with its value.
pub fn render_command(template: &[String], vars: &[(&str, &str)]) -> Vec<String> {
    template
        .iter()
        .map(|arg| render_arg(arg, vars))
        .collect()
}

fn render_arg(arg: &str, vars: &[(&str, &str)]) -> String {
    let mut rendered = arg.to_string();
    for (name, value) in vars {
        let needle = format!("{{{name}}}");
        if rendered.contains(&needle) {
            rendered = rendered.replace(&needle, value);
        }
    }
    rendered
}

/// Render an argv for log lines, quoting arguments that contain whitespace.
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(char::is_whitespace) {
                format!("'{}'", arg.replace('\'', "'\"'\"'"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
