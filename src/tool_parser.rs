//! Tool call extraction from assistant text
//!
//! Providers disagree on how tool calls surface when native function
//! calling is unavailable. This parser normalizes the known shapes:
//!
//! 1. Bracketed calls: `[tool_name(key=value, ...)]`
//! 2. XML-style: `<function=tool_name>` with `<parameter=key>value</parameter>`
//!    children or inline `key=value, ...` arguments
//! 3. Trailing close: `tool_name(args)</function>`
//!
//! Strategies are tried in that order; the first that matches wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// A tool call recovered from free-form text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCall {
    pub name: String,
    pub arguments: Value,
    pub raw: String,
}

/// Result of scanning content for embedded tool calls.
#[derive(Debug, Default)]
pub struct ParseOutcome {
    /// Successfully parsed calls, in order of appearance.
    pub calls: Vec<ParsedCall>,
    /// The content with call markup removed.
    pub text: String,
    /// Non-fatal parse errors.
    pub errors: Vec<String>,
}

static BRACKET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[([A-Za-z_][A-Za-z0-9_]*)\(([^\[\]]*)\)\]").expect("bracket call regex")
});

static FUNCTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<function=([A-Za-z_][A-Za-z0-9_]*)\s*([^>]*)>(.*?)</function>")
        .expect("function tag regex")
});

static PARAMETER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<parameter=([A-Za-z_][A-Za-z0-9_]*)>\s*(.*?)\s*</parameter>")
        .expect("parameter tag regex")
});

static TRAILING_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)([A-Za-z_][A-Za-z0-9_]*)\((.*?)\)\s*</function>")
        .expect("trailing close regex")
});

/// Scan assistant content for text-encoded tool calls.
pub fn parse_tool_calls(content: &str) -> ParseOutcome {
    let mut outcome = ParseOutcome {
        calls: Vec::new(),
        text: content.to_string(),
        errors: Vec::new(),
    };

    for captures in BRACKET_RE.captures_iter(content) {
        let raw = captures[0].to_string();
        let name = captures[1].to_string();
        match parse_argument_list(captures[2].trim()) {
            Ok(arguments) => {
                outcome.text = outcome.text.replace(&raw, "");
                outcome.calls.push(ParsedCall { name, arguments, raw });
            }
            Err(e) => outcome.errors.push(format!("bracket call: {}", e)),
        }
    }

    if outcome.calls.is_empty() {
        for captures in FUNCTION_RE.captures_iter(content) {
            let raw = captures[0].to_string();
            let name = captures[1].to_string();
            let inline = captures[2].trim();
            let body = captures[3].trim();

            let parsed = if PARAMETER_RE.is_match(body) {
                Ok(parse_parameter_tags(body))
            } else if !body.is_empty() {
                parse_argument_list(body)
            } else {
                parse_argument_list(inline)
            };

            match parsed {
                Ok(arguments) => {
                    outcome.text = outcome.text.replace(&raw, "");
                    outcome.calls.push(ParsedCall { name, arguments, raw });
                }
                Err(e) => outcome.errors.push(format!("function tag: {}", e)),
            }
        }
    }

    if outcome.calls.is_empty() {
        for captures in TRAILING_RE.captures_iter(content) {
            let raw = captures[0].to_string();
            let name = captures[1].to_string();
            match parse_argument_list(captures[2].trim()) {
                Ok(arguments) => {
                    outcome.text = outcome.text.replace(&raw, "");
                    outcome.calls.push(ParsedCall { name, arguments, raw });
                }
                Err(e) => outcome.errors.push(format!("trailing close: {}", e)),
            }
        }
    }

    outcome.text = outcome.text.trim().to_string();
    outcome
}

/// Serialize calls in the normalized bracketed form, one per line, with
/// keys sorted. `parse_tool_calls(render_tool_calls(calls))` yields the
/// same (name, arguments) sequence.
pub fn render_tool_calls(calls: &[ParsedCall]) -> String {
    calls
        .iter()
        .map(|call| {
            let mut pairs: Vec<(String, Value)> = match &call.arguments {
                Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
                _ => Vec::new(),
            };
            pairs.sort_by(|a, b| a.0.cmp(&b.0));
            let args = pairs
                .iter()
                .map(|(k, v)| format!("{}={}", k, render_value(v)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{}({})]", call.name, args)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s)),
        other => other.to_string(),
    }
}

/// Parse a comma-separated `key=value` list (or a single JSON object)
/// into an arguments object.
fn parse_argument_list(args: &str) -> Result<Value, String> {
    let trimmed = args.trim();
    if trimmed.is_empty() {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    if trimmed.starts_with('{') {
        return serde_json::from_str(trimmed).map_err(|e| e.to_string());
    }

    let mut map = serde_json::Map::new();
    for pair in split_top_level(trimmed) {
        let Some(eq) = pair.find('=') else {
            return Err(format!("expected key=value, got '{}'", pair));
        };
        let key = pair[..eq].trim().to_string();
        if key.is_empty() {
            return Err(format!("empty key in '{}'", pair));
        }
        map.insert(key, parse_value(pair[eq + 1..].trim()));
    }
    Ok(Value::Object(map))
}

/// Split on commas that are not nested inside quotes, braces, or brackets.
fn split_top_level(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in input.chars() {
        if escaped {
            current.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if quote.is_some() => {
                current.push(ch);
                escaped = true;
            }
            '"' | '\'' => {
                match quote {
                    Some(q) if q == ch => quote = None,
                    None => quote = Some(ch),
                    _ => {}
                }
                current.push(ch);
            }
            '{' | '[' | '(' if quote.is_none() => {
                depth += 1;
                current.push(ch);
            }
            '}' | ']' | ')' if quote.is_none() => {
                depth -= 1;
                current.push(ch);
            }
            ',' if quote.is_none() && depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Interpret one argument value. Quoted values become strings with the
/// quotes stripped; unquoted values are tried as JSON first.
fn parse_value(raw: &str) -> Value {
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        let first = bytes[0] as char;
        let last = bytes[raw.len() - 1] as char;
        if (first == '"' && last == '"') || (first == '\'' && last == '\'') {
            let inner = &raw[1..raw.len() - 1];
            return Value::String(unescape(inner));
        }
    }
    serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn parse_parameter_tags(body: &str) -> Value {
    let mut map = serde_json::Map::new();
    for captures in PARAMETER_RE.captures_iter(body) {
        let key = captures[1].to_string();
        map.insert(key, parse_value(captures[2].trim()));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bracketed_call() {
        let outcome = parse_tool_calls("[read_file(path=\"test.txt\")]");
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, "read_file");
        assert_eq!(outcome.calls[0].arguments, json!({"path": "test.txt"}));
        assert!(outcome.text.is_empty());
    }

    #[test]
    fn test_bracketed_call_multiple_args() {
        let outcome = parse_tool_calls("[grep(pattern=\"fn main\", max_results=10)]");
        assert_eq!(outcome.calls[0].arguments, json!({"pattern": "fn main", "max_results": 10}));
    }

    #[test]
    fn test_bracketed_preserves_surrounding_text() {
        let outcome = parse_tool_calls("Let me look.\n[list_files(path=\".\")]\nDone.");
        assert_eq!(outcome.calls.len(), 1);
        assert!(outcome.text.contains("Let me look."));
        assert!(!outcome.text.contains("list_files"));
    }

    #[test]
    fn test_function_tag_with_parameters() {
        let content = "<function=write_file>\n<parameter=path>out.txt</parameter>\n<parameter=content>hello</parameter>\n</function>";
        let outcome = parse_tool_calls(content);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, "write_file");
        assert_eq!(
            outcome.calls[0].arguments,
            json!({"path": "out.txt", "content": "hello"})
        );
    }

    #[test]
    fn test_function_tag_with_inline_args() {
        let outcome = parse_tool_calls("<function=read_file path=\"a.go\"></function>");
        assert_eq!(outcome.calls[0].arguments, json!({"path": "a.go"}));
    }

    #[test]
    fn test_function_tag_with_body_args() {
        let outcome = parse_tool_calls("<function=read_file>path=\"a.go\"</function>");
        assert_eq!(outcome.calls[0].arguments, json!({"path": "a.go"}));
    }

    #[test]
    fn test_trailing_close_form() {
        let outcome = parse_tool_calls("read_file(path=\"x.txt\")</function>");
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, "read_file");
        assert_eq!(outcome.calls[0].arguments, json!({"path": "x.txt"}));
    }

    #[test]
    fn test_trailing_close_with_json_object() {
        let outcome = parse_tool_calls("run_command({\"command\": \"go build\"})</function>");
        assert_eq!(outcome.calls[0].arguments, json!({"command": "go build"}));
    }

    #[test]
    fn test_priority_bracket_over_function_tag() {
        let content = "[grep(pattern=\"a\")] <function=read_file path=\"b\"></function>";
        let outcome = parse_tool_calls(content);
        assert_eq!(outcome.calls.len(), 1);
        assert_eq!(outcome.calls[0].name, "grep");
    }

    #[test]
    fn test_no_calls_in_plain_text() {
        let outcome = parse_tool_calls("The file contains Hello World.");
        assert!(outcome.calls.is_empty());
        assert_eq!(outcome.text, "The file contains Hello World.");
    }

    #[test]
    fn test_single_quotes_stripped() {
        let outcome = parse_tool_calls("[read_file(path='test.txt')]");
        assert_eq!(outcome.calls[0].arguments, json!({"path": "test.txt"}));
    }

    #[test]
    fn test_unquoted_values_typed() {
        let outcome = parse_tool_calls("[project_map(path=\".\", max_depth=2)]");
        assert_eq!(outcome.calls[0].arguments["max_depth"], json!(2));
    }

    #[test]
    fn test_quoted_number_stays_string() {
        let outcome = parse_tool_calls("[read_file(path=\"3\")]");
        assert_eq!(outcome.calls[0].arguments["path"], json!("3"));
    }

    #[test]
    fn test_empty_args() {
        let outcome = parse_tool_calls("[list_files()]");
        assert_eq!(outcome.calls[0].arguments, json!({}));
    }

    #[test]
    fn test_nested_json_value() {
        let outcome = parse_tool_calls("[run_command(env={\"K\": \"v\"}, command=\"ls\")]");
        assert_eq!(outcome.calls[0].arguments["env"], json!({"K": "v"}));
    }

    #[test]
    fn test_render_parse_roundtrip() {
        let calls = vec![
            ParsedCall {
                name: "read_file".into(),
                arguments: json!({"path": "src/main.go"}),
                raw: String::new(),
            },
            ParsedCall {
                name: "project_map".into(),
                arguments: json!({"path": ".", "max_depth": 2}),
                raw: String::new(),
            },
        ];
        let rendered = render_tool_calls(&calls);
        let reparsed = parse_tool_calls(&rendered);
        assert_eq!(reparsed.calls.len(), calls.len());
        for (a, b) in reparsed.calls.iter().zip(calls.iter()) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.arguments, b.arguments);
        }
    }

    #[test]
    fn test_render_parse_roundtrip_idempotent() {
        let calls = vec![ParsedCall {
            name: "write_file".into(),
            arguments: json!({"path": "a.txt", "content": "line one, line two"}),
            raw: String::new(),
        }];
        let once = render_tool_calls(&calls);
        let twice = render_tool_calls(&parse_tool_calls(&once).calls);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_malformed_pair_reports_error() {
        let outcome = parse_tool_calls("[read_file(just_a_word)]");
        assert!(outcome.calls.is_empty());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn test_multiple_bracketed_calls_in_order() {
        let outcome =
            parse_tool_calls("[read_file(path=\"a\")] then [read_file(path=\"b\")]");
        assert_eq!(outcome.calls.len(), 2);
        assert_eq!(outcome.calls[0].arguments["path"], json!("a"));
        assert_eq!(outcome.calls[1].arguments["path"], json!("b"));
    }
}
