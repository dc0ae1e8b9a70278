//! Tokenizer for inline commands: `PREFIX NAME(key=value, ...)`.
//!
//! Hand-rolled rather than pulled from a parser-combinator crate — the
//! grammar is small and the teacher's own code (`llm/loop_detector.rs`,
//! `llm/provider.rs`) favors hand-rolled algorithms over importing a
//! crate for something this size.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: HashMap<String, String>,
    pub malformed: bool,
}

/// Scan `content` for command tokens beginning with `prefix`, strip them
/// out, and return the remaining forwardable text plus the ordered list
/// of parsed commands (left to right, as they appeared).
pub fn strip_and_parse(content: &str, prefix: &str) -> (String, Vec<ParsedCommand>) {
    if prefix.is_empty() {
        return (content.to_string(), Vec::new());
    }

    let mut remaining = String::new();
    let mut commands = Vec::new();
    let mut idx = 0;

    while let Some(pos) = content[idx..].find(prefix) {
        let abs = idx + pos;
        remaining.push_str(&content[idx..abs]);

        let after_prefix = &content[abs + prefix.len()..];
        let name_len = after_prefix
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
            .map(|c| c.len_utf8())
            .sum::<usize>();

        if name_len == 0 {
            // Not a valid command token (prefix not followed by a name);
            // treat the prefix as literal text and keep scanning.
            remaining.push_str(prefix);
            idx = abs + prefix.len();
            continue;
        }

        let name = after_prefix[..name_len].to_string();
        let after_name = &after_prefix[name_len..];
        let trimmed = after_name.trim_start();
        let skipped_ws = after_name.len() - trimmed.len();

        let mut consumed = name_len + skipped_ws;
        let mut args = HashMap::new();
        let mut malformed = false;

        if trimmed.starts_with('(') {
            if let Some(close_rel) = find_matching_close(trimmed) {
                let inner = &trimmed[1..close_rel];
                consumed += close_rel + 1;
                match parse_args(inner) {
                    Ok(parsed) => args = parsed,
                    Err(_) => malformed = true,
                }
            } else {
                malformed = true;
                consumed += trimmed.len();
            }
        }

        commands.push(ParsedCommand {
            name,
            args,
            malformed,
        });
        idx = abs + prefix.len() + consumed;
    }

    remaining.push_str(&content[idx..]);
    (remaining.trim().to_string(), commands)
}

/// Find the byte offset (relative to `s`) of the `)` matching the `(` at
/// position 0, respecting double-quoted strings.
fn find_matching_close(s: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (i, c) in s.char_indices().skip(1) {
        match c {
            '"' => in_quotes = !in_quotes,
            ')' if !in_quotes => return Some(i),
            _ => {}
        }
    }
    None
}

fn parse_args(s: &str) -> Result<HashMap<String, String>, ()> {
    let mut map = HashMap::new();
    if s.trim().is_empty() {
        return Ok(map);
    }
    for part in split_on_commas(s) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let eq = part.find('=').ok_or(())?;
        let key = part[..eq].trim().to_string();
        if key.is_empty() {
            return Err(());
        }
        let raw_val = part[eq + 1..].trim();
        let value = if raw_val.len() >= 2 && raw_val.starts_with('"') && raw_val.ends_with('"') {
            raw_val[1..raw_val.len() - 1].to_string()
        } else {
            raw_val.to_string()
        };
        map.insert(key, value);
    }
    Ok(map)
}

fn split_on_commas(s: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                cur.push(c);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut cur));
            }
            _ => cur.push(c),
        }
    }
    parts.push(cur);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_command_returns_content_unchanged() {
        let (text, cmds) = strip_and_parse("hello world", "!/");
        assert_eq!(text, "hello world");
        assert!(cmds.is_empty());
    }

    #[test]
    fn single_command_with_args() {
        let (text, cmds) = strip_and_parse("!/set(model=openai:gpt-4)", "!/");
        assert_eq!(text, "");
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].name, "set");
        assert_eq!(cmds[0].args.get("model").unwrap(), "openai:gpt-4");
    }

    #[test]
    fn stateless_command_no_args() {
        let (text, cmds) = strip_and_parse("!/help", "!/");
        assert_eq!(text, "");
        assert_eq!(cmds[0].name, "help");
        assert!(cmds[0].args.is_empty());
    }

    #[test]
    fn multiple_commands_left_to_right() {
        let (_text, cmds) =
            strip_and_parse("!/set(model=a) please !/reasoning(mode=high)", "!/");
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].name, "set");
        assert_eq!(cmds[1].name, "reasoning");
    }

    #[test]
    fn quoted_values_may_contain_commas() {
        let (_text, cmds) = strip_and_parse(r#"!/set(note="a, b")"#, "!/");
        assert_eq!(cmds[0].args.get("note").unwrap(), "a, b");
    }

    #[test]
    fn malformed_unclosed_paren_is_flagged() {
        let (_text, cmds) = strip_and_parse("!/set(model=a", "!/");
        assert_eq!(cmds.len(), 1);
        assert!(cmds[0].malformed);
    }

    #[test]
    fn command_with_surrounding_text_strips_only_the_token() {
        let (text, cmds) = strip_and_parse("hi !/set(model=a) there", "!/");
        assert_eq!(text, "hi  there");
        assert_eq!(cmds.len(), 1);
    }
}
