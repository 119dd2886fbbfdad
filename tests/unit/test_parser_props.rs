//! Property tests for the tool-call text parser.

use proptest::prelude::*;
use serde_json::Value;

use maestro::tool_parser::{parse_tool_calls, render_tool_calls, ParsedCall};

fn tool_name() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,15}"
}

fn arg_key() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,10}"
}

fn arg_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9 ./_-]{0,24}".prop_map(Value::String),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        any::<bool>().prop_map(Value::Bool),
    ]
}

fn parsed_call() -> impl Strategy<Value = ParsedCall> {
    (
        tool_name(),
        prop::collection::btree_map(arg_key(), arg_value(), 0..4),
    )
        .prop_map(|(name, args)| ParsedCall {
            name,
            arguments: Value::Object(args.into_iter().collect()),
            raw: String::new(),
        })
}

proptest! {
    // Parsing the normalized serialization yields the same call list.
    #[test]
    fn render_parse_roundtrip(calls in prop::collection::vec(parsed_call(), 1..4)) {
        let rendered = render_tool_calls(&calls);
        let reparsed = parse_tool_calls(&rendered);
        prop_assert_eq!(reparsed.calls.len(), calls.len());
        for (a, b) in reparsed.calls.iter().zip(calls.iter()) {
            prop_assert_eq!(&a.name, &b.name);
            prop_assert_eq!(&a.arguments, &b.arguments);
        }
    }

    // Rendering is a fixpoint of parse-then-render.
    #[test]
    fn render_is_idempotent(calls in prop::collection::vec(parsed_call(), 1..4)) {
        let once = render_tool_calls(&calls);
        let twice = render_tool_calls(&parse_tool_calls(&once).calls);
        prop_assert_eq!(once, twice);
    }

    // Arbitrary prose never produces calls with invalid names.
    #[test]
    fn parsed_names_are_identifiers(content in "[ -~]{0,200}") {
        for call in parse_tool_calls(&content).calls {
            prop_assert!(call.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
        }
    }
}
