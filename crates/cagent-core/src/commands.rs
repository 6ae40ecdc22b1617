//! `/command` shortcut expansion.
//!
//! Commands come from configuration as prompt templates. `{args}` in a
//! template is replaced with the rest of the line; templates without the
//! placeholder get the rest appended. Unknown commands and plain text pass
//! through unchanged.

use std::collections::HashMap;

pub fn resolve(commands: &HashMap<String, String>, text: &str) -> String {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix('/') else {
        return text.to_string();
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    let Some(template) = commands.get(name) else {
        return text.to_string();
    };

    if template.contains("{args}") {
        template.replace("{args}", args)
    } else if args.is_empty() {
        template.clone()
    } else {
        format!("{template} {args}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commands() -> HashMap<String, String> {
        HashMap::from([
            ("review".to_string(), "Review the following change: {args}".to_string()),
            ("standup".to_string(), "Summarize yesterday's progress".to_string()),
        ])
    }

    #[test]
    fn expands_placeholder() {
        assert_eq!(
            resolve(&commands(), "/review src/lib.rs"),
            "Review the following change: src/lib.rs"
        );
    }

    #[test]
    fn appends_args_without_placeholder() {
        assert_eq!(
            resolve(&commands(), "/standup for the core team"),
            "Summarize yesterday's progress for the core team"
        );
        assert_eq!(resolve(&commands(), "/standup"), "Summarize yesterday's progress");
    }

    #[test]
    fn unknown_commands_pass_through() {
        assert_eq!(resolve(&commands(), "/unknown thing"), "/unknown thing");
        assert_eq!(resolve(&commands(), "plain text"), "plain text");
    }
}
