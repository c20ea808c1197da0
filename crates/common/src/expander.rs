// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! The macro/pattern expander: the shared string-substitution engine used both
//! for per-publish option templates and for `message_id` pattern matching.
//!
//! Deliberately **not** regex-backed (see the tokenize-and-scan design note):
//! two adjacent `${...}` captures with no literal separator are ambiguous by
//! construction, and the greedy-with-backtrack matcher below resolves that the
//! same way a greedy regex engine would, without paying for a regex compile.

use std::collections::HashMap;
use std::sync::Mutex;

use ahash::AHashMap;
use relay_core::Payload;

/// Per-template running counters for `${count}`, keyed on the **raw** template
/// text (before any expansion), so two templates differing only in surrounding
/// literal text maintain independent sequences.
#[derive(Debug, Default)]
pub struct CounterTable {
    counts: Mutex<AHashMap<String, i64>>,
}

impl CounterTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the next value for `raw_template`, 0 on first use, incrementing
    /// the stored counter after the read.
    fn next(&self, raw_template: &str) -> i64 {
        let mut counts = self.counts.lock().unwrap();
        let entry = counts.entry(raw_template.to_string()).or_insert(0);
        let value = *entry;
        *entry += 1;
        value
    }
}

/// Expands the recognized macros `${id}`, `${c_id}`, `${timestamp}`, `${count}`
/// against `payload`, scanning `template` left to right exactly once so that
/// expansion text is never re-scanned for further substitutions.
///
/// Any `${name}` not in the recognized set is left untouched (it is either a
/// pattern-capture variable already substituted by [`substitute_captures`], or
/// invalid configuration that should have been rejected at validation time via
/// [`relay_core::correctness::check_balanced_macros`]).
#[must_use]
pub fn expand_macros(template: &str, payload: &Payload, counters: &CounterTable) -> String {
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    while i < template.len() {
        if template[i..].starts_with("${")
            && let Some(close_rel) = template[i..].find('}')
        {
            let name = &template[i + 2..i + close_rel];
            let macro_end = i + close_rel + 1;

            match name {
                "id" => {
                    out.push_str(payload.id());
                    i = macro_end;
                    continue;
                }
                "c_id" => {
                    out.push_str(&payload.correlation_id);
                    i = macro_end;
                    continue;
                }
                "timestamp" => {
                    out.push_str(&payload.timestamp.to_string());
                    i = macro_end;
                    continue;
                }
                "count" => {
                    out.push_str(&counters.next(template).to_string());
                    i = macro_end;
                    continue;
                }
                _ => {
                    // Not a recognized macro: fall through and copy verbatim,
                    // one character at a time, below.
                }
            }
        }

        let ch = template[i..].chars().next().expect("non-empty slice");
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

/// One segment of a tokenized `message_id` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Var(String),
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    while i < pattern.len() {
        if pattern[i..].starts_with("${")
            && let Some(close_rel) = pattern[i..].find('}')
        {
            if !literal.is_empty() {
                tokens.push(Token::Literal(std::mem::take(&mut literal)));
            }
            let name = &pattern[i + 2..i + close_rel];
            tokens.push(Token::Var(name.to_string()));
            i += close_rel + 1;
            continue;
        }

        let ch = pattern[i..].chars().next().expect("non-empty slice");
        literal.push(ch);
        i += ch.len_utf8();
    }

    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }

    tokens
}

/// Attempts a full-string match of `message_id` against `pattern`, returning
/// the captured `${name}` -> value map on success.
///
/// Matching is tokenize-and-scan, not regex: each literal segment must match
/// verbatim at the current scan position, and each variable segment greedily
/// consumes as much as possible, backtracking to a shorter capture only if a
/// longer one leaves the remaining tokens unable to match. This pins the
/// match to the entire string (fixing the source's substring-search bug
/// rather than reproducing it) and resolves adjacent-variable ambiguity by
/// preferring the longest prefix for the earlier variable.
#[must_use]
pub fn match_pattern(pattern: &str, message_id: &str) -> Option<HashMap<String, String>> {
    let tokens = tokenize(pattern);
    let mut captures = HashMap::new();
    if match_from(&tokens, 0, message_id, 0, &mut captures) {
        Some(captures)
    } else {
        None
    }
}

fn match_from(
    tokens: &[Token],
    token_idx: usize,
    msg: &str,
    pos: usize,
    captures: &mut HashMap<String, String>,
) -> bool {
    let Some(token) = tokens.get(token_idx) else {
        return pos == msg.len();
    };

    match token {
        Token::Literal(lit) => {
            if msg[pos..].starts_with(lit.as_str()) {
                match_from(tokens, token_idx + 1, msg, pos + lit.len(), captures)
            } else {
                false
            }
        }
        Token::Var(name) => {
            if token_idx + 1 == tokens.len() {
                // Last token: must consume the remainder entirely.
                captures.insert(name.clone(), msg[pos..].to_string());
                true
            } else {
                let mut end = msg.len();
                loop {
                    if msg.is_char_boundary(end) {
                        let mut trial = captures.clone();
                        trial.insert(name.clone(), msg[pos..end].to_string());
                        if match_from(tokens, token_idx + 1, msg, end, &mut trial) {
                            *captures = trial;
                            return true;
                        }
                    }
                    if end == pos {
                        return false;
                    }
                    end -= 1;
                }
            }
        }
    }
}

/// Replaces every literal `${name}` occurrence in `template` with its captured
/// value, for all names present in `captures` (plain textual replace).
#[must_use]
pub fn substitute_captures(template: &str, captures: &HashMap<String, String>) -> String {
    let mut out = template.to_string();
    for (name, value) in captures {
        out = out.replace(&format!("${{{name}}}"), value);
    }
    out
}

/// Applies [`substitute_captures`] to every string leaf of a JSON value,
/// recursing through objects and arrays; non-string leaves pass through
/// unchanged. Option templates are JSON objects, so captures and macros are
/// applied per-field rather than to the object as a whole.
#[must_use]
pub fn substitute_value_captures(value: &serde_json::Value, captures: &HashMap<String, String>) -> serde_json::Value {
    map_string_leaves(value, &mut |s| substitute_captures(s, captures))
}

/// Applies [`expand_macros`] to every string leaf of a JSON value.
#[must_use]
pub fn expand_value_macros(value: &serde_json::Value, payload: &Payload, counters: &CounterTable) -> serde_json::Value {
    map_string_leaves(value, &mut |s| expand_macros(s, payload, counters))
}

fn map_string_leaves(value: &serde_json::Value, f: &mut impl FnMut(&str) -> String) -> serde_json::Value {
    use serde_json::Value;

    match value {
        Value::String(s) => Value::String(f(s)),
        Value::Array(items) => Value::Array(items.iter().map(|v| map_string_leaves(v, f)).collect()),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), map_string_leaves(v, f));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_expand_no_macros_is_byte_identical() {
        let payload = Payload::new(b"x".to_vec())
            .with_correlation_id("c1")
            .with_timestamp(1000);
        let counters = CounterTable::new();
        let template = "a plain string with no macros";
        assert_eq!(expand_macros(template, &payload, &counters), template);
    }

    #[rstest]
    fn test_expand_id_and_timestamp() {
        let payload = Payload::new(b"x".to_vec()).with_timestamp(1234);
        let counters = CounterTable::new();
        let out = expand_macros("${id}@${timestamp}", &payload, &counters);
        assert_eq!(out, format!("{}@1234", payload.id()));
    }

    #[rstest]
    fn test_expand_c_id_defaults_empty() {
        let payload = Payload::new(b"x".to_vec());
        let counters = CounterTable::new();
        assert_eq!(expand_macros("[${c_id}]", &payload, &counters), "[]");
    }

    #[rstest]
    fn test_expander_non_rescan() {
        // payload.correlation_id = "${id}"; expand("${c_id}") must yield the
        // literal "${id}" without re-scanning it for further substitution.
        let payload = Payload::new(b"x".to_vec()).with_correlation_id("${id}");
        let counters = CounterTable::new();
        assert_eq!(expand_macros("${c_id}", &payload, &counters), "${id}");
    }

    #[rstest]
    fn test_count_macro_sequence() {
        let payload = Payload::new(b"x".to_vec());
        let counters = CounterTable::new();

        assert_eq!(expand_macros("${count}_foo", &payload, &counters), "0_foo");
        assert_eq!(expand_macros("${count}_foo", &payload, &counters), "1_foo");
        assert_eq!(expand_macros("${count}_foo", &payload, &counters), "2_foo");

        assert_eq!(expand_macros("${count}_bar", &payload, &counters), "0_bar");
        assert_eq!(expand_macros("${count}_bar", &payload, &counters), "1_bar");

        assert_eq!(expand_macros("${count}_foo", &payload, &counters), "3_foo");
    }

    #[rstest]
    fn test_count_keyed_on_raw_template_not_expanded_text() {
        let payload = Payload::new(b"x".to_vec()).with_timestamp(7);
        let counters = CounterTable::new();
        // Two distinct raw templates that could coincidentally expand to the same
        // text must still maintain independent counters.
        assert_eq!(expand_macros("${count}-${timestamp}", &payload, &counters), "0-7");
        assert_eq!(expand_macros("${count}-${timestamp}", &payload, &counters), "1-7");
        assert_eq!(expand_macros("${count}-7", &payload, &counters), "0-7");
    }

    #[rstest]
    #[case("foo_${a}_${b}", "foo_x_y", Some(vec![("a", "x"), ("b", "y")]))]
    #[case("foo_${a}_${b}", "bar", None)]
    #[case("exact", "exact", Some(vec![]))]
    #[case("exact", "exact_extra", None)]
    #[case("${only}", "anything goes", Some(vec![("only", "anything goes")]))]
    fn test_match_pattern(
        #[case] pattern: &str,
        #[case] message_id: &str,
        #[case] expected: Option<Vec<(&str, &str)>>,
    ) {
        let result = match_pattern(pattern, message_id);
        match expected {
            None => assert!(result.is_none()),
            Some(pairs) => {
                let result = result.expect("expected a match");
                assert_eq!(result.len(), pairs.len());
                for (k, v) in pairs {
                    assert_eq!(result.get(k).map(String::as_str), Some(v));
                }
            }
        }
    }

    #[rstest]
    fn test_match_pattern_is_full_string_not_substring() {
        // Regression for the source's documented substring-search bug: a pattern
        // that is a substring of the message id must NOT match.
        assert!(match_pattern("message", "test_message_foo").is_none());
    }

    #[rstest]
    fn test_substitute_captures_all_occurrences() {
        let mut captures = HashMap::new();
        captures.insert("a".to_string(), "X".to_string());
        let out = substitute_captures("${a}/${a}/end", &captures);
        assert_eq!(out, "X/X/end");
    }

    #[rstest]
    fn test_substitute_value_captures_nested() {
        let mut captures = HashMap::new();
        captures.insert("a".to_string(), "x".to_string());
        captures.insert("b".to_string(), "y".to_string());
        let template = serde_json::json!({"parameter": "${a}/${b}", "nested": {"list": ["${a}", 3]}});
        let out = substitute_value_captures(&template, &captures);
        assert_eq!(out["parameter"], "x/y");
        assert_eq!(out["nested"]["list"][0], "x");
        assert_eq!(out["nested"]["list"][1], 3);
    }

    #[rstest]
    fn test_expand_value_macros_nested() {
        let payload = Payload::new(b"x".to_vec()).with_timestamp(99);
        let counters = CounterTable::new();
        let template = serde_json::json!({"t": "${timestamp}", "keep": true});
        let out = expand_value_macros(&template, &payload, &counters);
        assert_eq!(out["t"], "99");
        assert_eq!(out["keep"], true);
    }

    proptest! {
        #[rstest]
        fn prop_count_strictly_increasing(n in 1..20usize) {
            let payload = Payload::new(b"x".to_vec());
            let counters = CounterTable::new();
            let mut last: i64 = -1;
            for _ in 0..n {
                let out = expand_macros("${count}", &payload, &counters);
                let value: i64 = out.parse().unwrap();
                prop_assert!(value > last);
                last = value;
            }
        }

        #[rstest]
        fn prop_literal_pattern_matches_only_itself(lit in "[a-zA-Z0-9_]{1,12}", other in "[a-zA-Z0-9_]{1,12}") {
            prop_assume!(lit != other);
            prop_assert!(match_pattern(&lit, &lit).is_some());
            prop_assert!(match_pattern(&lit, &other).is_none());
        }
    }
}
