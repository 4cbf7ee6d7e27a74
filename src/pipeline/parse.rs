//! Response parsing: free-form model text → ordered label/value fields.
//!
//! Models are asked for strict JSON but routinely wrap it in prose or code
//! fences, emit `Label: value` lines instead, or return nothing usable at
//! all. Parsing is a cascade of pure strategies, each `&str → Option<Vec<Field>>`,
//! tried in order until one produces fields:
//!
//! 1. [`ParseStrategy::Strict`]   — the whole text is a `{"fields": [...]}` object
//! 2. [`ParseStrategy::Embedded`] — the largest balanced `{...}` span that is one
//! 3. [`ParseStrategy::Lines`]    — `label: value` / `label - value` lines
//! 4. [`ParseStrategy::RawText`]  — one `raw_text` field holding the response
//!
//! [`parse_fields`] never fails. Its output is empty only when the input is
//! empty or whitespace.

use crate::output::Field;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Label used when nothing structured could be recovered.
pub const RAW_TEXT_LABEL: &str = "raw_text";

/// Embedded candidates tried before giving up on JSON.
const MAX_EMBEDDED_CANDIDATES: usize = 64;

/// Opening braces scanned for embedded objects.
const MAX_SPAN_STARTS: usize = 256;

/// Lines with a longer label are prose, not fields.
const MAX_LINE_LABEL_CHARS: usize = 80;

/// Which strategy produced a [`ParsedFields`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Input was empty or whitespace.
    Empty,
    Strict,
    Embedded,
    Lines,
    RawText,
}

/// Result of parsing one model response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFields {
    pub fields: Vec<Field>,
    pub strategy: ParseStrategy,
}

/// Parse a model response into fields, falling through the strategy cascade.
pub fn parse_fields(text: &str) -> ParsedFields {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ParsedFields {
            fields: Vec::new(),
            strategy: ParseStrategy::Empty,
        };
    }

    let cascade: [(ParseStrategy, fn(&str) -> Option<Vec<Field>>); 3] = [
        (ParseStrategy::Strict, strict_decode),
        (ParseStrategy::Embedded, embedded_decode),
        (ParseStrategy::Lines, line_heuristic),
    ];

    for (strategy, parse) in cascade {
        if let Some(fields) = parse(trimmed) {
            return ParsedFields { fields, strategy };
        }
    }

    ParsedFields {
        fields: vec![Field::new(RAW_TEXT_LABEL, trimmed)],
        strategy: ParseStrategy::RawText,
    }
}

/// Concatenate per-page fields in page order.
///
/// With `label_pages`, documents of more than one page get each label
/// prefixed with `Page N - `. Nothing is merged or deduplicated.
pub fn merge_pages(mut pages: Vec<(usize, Vec<Field>)>, label_pages: bool) -> Vec<Field> {
    pages.sort_by_key(|(page_num, _)| *page_num);
    let prefix = label_pages && pages.len() > 1;

    pages
        .into_iter()
        .flat_map(|(page_num, fields)| {
            fields.into_iter().map(move |f| {
                if prefix {
                    Field::new(format!("Page {} - {}", page_num, f.label), f.value)
                } else {
                    f
                }
            })
        })
        .collect()
}

// ── Strategy 1: strict decode ────────────────────────────────────────────────

fn strict_decode(text: &str) -> Option<Vec<Field>> {
    let value: Value = serde_json::from_str(text).ok()?;
    fields_from_value(&value)
}

/// Accept `{"fields": [{label, value}, ...]}` with at least one element,
/// every element carrying a non-empty string label and a scalar value.
fn fields_from_value(value: &Value) -> Option<Vec<Field>> {
    let items = value.as_object()?.get("fields")?.as_array()?;
    if items.is_empty() {
        return None;
    }
    items.iter().map(field_from_value).collect()
}

fn field_from_value(item: &Value) -> Option<Field> {
    let obj = item.as_object()?;
    let label = obj.get("label")?.as_str()?;
    if label.trim().is_empty() {
        return None;
    }
    let value = match obj.get("value")? {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => return None,
    };
    Some(Field::new(label, value))
}

// ── Strategy 2: embedded object ──────────────────────────────────────────────

fn embedded_decode(text: &str) -> Option<Vec<Field>> {
    let mut spans = balanced_spans(text);
    // Largest first; earliest wins a tie.
    spans.sort_by(|a, b| (b.1 - b.0).cmp(&(a.1 - a.0)).then(a.0.cmp(&b.0)));

    spans
        .into_iter()
        .take(MAX_EMBEDDED_CANDIDATES)
        .find_map(|(start, end)| strict_decode(&text[start..end]))
}

/// Byte ranges of every balanced `{...}` span, nested ones included.
///
/// Each `{` is scanned on its own, so an unbalanced brace or stray quote in
/// surrounding prose cannot hide a later object. Braces inside JSON string
/// literals are ignored. At most [`MAX_SPAN_STARTS`] openings are scanned.
fn balanced_spans(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|&(_, &b)| b == b'{')
        .take(MAX_SPAN_STARTS)
        .filter_map(|(start, _)| span_end(bytes, start).map(|end| (start, end)))
        .collect()
}

/// End (exclusive) of the object opened at `start`, if it closes.
fn span_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

// ── Strategy 3: line heuristic ───────────────────────────────────────────────

static RE_BULLET: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:[-*•]|\d+[.)])\s+").unwrap());

// Whitespace on both sides keeps dates and hyphenated words intact.
static RE_DASH_SEP: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+[-–—]\s+").unwrap());

fn line_heuristic(text: &str) -> Option<Vec<Field>> {
    let fields: Vec<Field> = text.lines().filter_map(parse_line).collect();
    if fields.is_empty() {
        None
    } else {
        Some(fields)
    }
}

fn parse_line(line: &str) -> Option<Field> {
    let line = line.trim();
    if line.is_empty() || line.starts_with("```") || line.starts_with(['{', '}', '[', ']']) {
        return None;
    }
    let line = RE_BULLET.replace(line, "");

    let colon = find_colon(&line);
    let dash = RE_DASH_SEP.find(&line).map(|m| (m.start(), m.end()));

    let (label, value) = match (colon, dash) {
        (Some(c), Some((ds, _))) if c < ds => (&line[..c], &line[c + 1..]),
        (Some(c), None) => (&line[..c], &line[c + 1..]),
        (_, Some((ds, de))) => (&line[..ds], &line[de..]),
        (None, None) => return None,
    };

    let label = clean_token(label);
    if label.is_empty() || label.chars().count() > MAX_LINE_LABEL_CHARS {
        return None;
    }
    Some(Field::new(label, clean_token(value)))
}

/// First `:` that is not the scheme separator of a URL.
fn find_colon(line: &str) -> Option<usize> {
    line.match_indices(':')
        .map(|(i, _)| i)
        .find(|&i| !line[i + 1..].starts_with("//"))
}

/// Strip whitespace, a trailing comma, and quote/emphasis wrappers.
fn clean_token(s: &str) -> String {
    s.trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches(|c: char| matches!(c, '"' | '*' | '_' | '`'))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(label: &str, value: &str) -> Field {
        Field::new(label, value)
    }

    #[test]
    fn lines_with_colon_and_dash() {
        let parsed = parse_fields("Name: John Doe\nDOB - 1990-01-01\ngarbage line");
        assert_eq!(parsed.strategy, ParseStrategy::Lines);
        assert_eq!(
            parsed.fields,
            vec![f("Name", "John Doe"), f("DOB", "1990-01-01")]
        );
    }

    #[test]
    fn empty_and_whitespace_yield_no_fields() {
        for input in ["", "   \n\t "] {
            let parsed = parse_fields(input);
            assert!(parsed.fields.is_empty());
            assert_eq!(parsed.strategy, ParseStrategy::Empty);
        }
    }

    #[test]
    fn strict_json_keeps_order_and_duplicates() {
        let input = r#"{"fields": [
            {"label": "Name", "value": "Ann"},
            {"label": "Phone", "value": ""},
            {"label": "Name", "value": "Bob"}
        ]}"#;
        let parsed = parse_fields(input);
        assert_eq!(parsed.strategy, ParseStrategy::Strict);
        assert_eq!(
            parsed.fields,
            vec![f("Name", "Ann"), f("Phone", ""), f("Name", "Bob")]
        );
    }

    #[test]
    fn strict_stringifies_scalars() {
        let input = r#"{"fields": [{"label": "Age", "value": 42}, {"label": "Signed", "value": true}, {"label": "Fax", "value": null}]}"#;
        let parsed = parse_fields(input);
        assert_eq!(parsed.strategy, ParseStrategy::Strict);
        assert_eq!(
            parsed.fields,
            vec![f("Age", "42"), f("Signed", "true"), f("Fax", "")]
        );
    }

    #[test]
    fn embedded_in_prose_recovers_exact_structure() {
        let input = "Sure! Here is what I read from the form:\n\
            {\"fields\": [{\"label\": \"City\", \"value\": \"Lyon {centre}\"}, {\"label\": \"Zip\", \"value\": \"69001\"}]}\n\
            Let me know if you need anything else.";
        let parsed = parse_fields(input);
        assert_eq!(parsed.strategy, ParseStrategy::Embedded);
        assert_eq!(
            parsed.fields,
            vec![f("City", "Lyon {centre}"), f("Zip", "69001")]
        );
    }

    #[test]
    fn embedded_inside_code_fence() {
        let input = "```json\n{\"fields\": [{\"label\": \"Total\", \"value\": \"12.50\"}]}\n```";
        let parsed = parse_fields(input);
        assert_eq!(parsed.strategy, ParseStrategy::Embedded);
        assert_eq!(parsed.fields, vec![f("Total", "12.50")]);
    }

    #[test]
    fn embedded_finds_nested_fields_object() {
        let input = r#"{"result": {"fields": [{"label": "A", "value": "1"}]}, "confidence": "high"}"#;
        let parsed = parse_fields(input);
        assert_eq!(parsed.strategy, ParseStrategy::Embedded);
        assert_eq!(parsed.fields, vec![f("A", "1")]);
    }

    #[test]
    fn largest_valid_object_wins() {
        let input = r#"first {"fields": [{"label": "X", "value": "1"}]} then {"fields": [{"label": "Y", "value": "2"}, {"label": "Z", "value": "3"}]}"#;
        let parsed = parse_fields(input);
        assert_eq!(parsed.fields, vec![f("Y", "2"), f("Z", "3")]);
    }

    #[test]
    fn invalid_elements_reject_strict() {
        // Missing "value" key on the second element.
        let input = r#"{"fields": [{"label": "A", "value": "1"}, {"label": "B"}]}"#;
        let parsed = parse_fields(input);
        assert_ne!(parsed.strategy, ParseStrategy::Strict);
        assert_ne!(parsed.strategy, ParseStrategy::Embedded);
    }

    #[test]
    fn empty_fields_array_falls_back_to_raw_text() {
        let parsed = parse_fields(r#"{"fields": []}"#);
        assert_eq!(parsed.strategy, ParseStrategy::RawText);
        assert_eq!(parsed.fields, vec![f(RAW_TEXT_LABEL, r#"{"fields": []}"#)]);
    }

    #[test]
    fn malformed_json_falls_back_to_lines() {
        let input = "{\n  \"fields\": [\n    {\"label\": \"Name\", \"value\": \"Ann\"\n    \"Date\": \"2024-05-01\",\n";
        let parsed = parse_fields(input);
        assert_eq!(parsed.strategy, ParseStrategy::Lines);
        assert!(parsed.fields.contains(&f("Date", "2024-05-01")));
    }

    #[test]
    fn unstructured_text_becomes_raw_text() {
        let parsed = parse_fields("  The form is mostly blank  \n");
        assert_eq!(parsed.strategy, ParseStrategy::RawText);
        assert_eq!(parsed.fields, vec![f(RAW_TEXT_LABEL, "The form is mostly blank")]);
    }

    #[test]
    fn earliest_separator_wins() {
        let parsed = parse_fields("Time - 10:30\nName: Mary - Jane");
        assert_eq!(
            parsed.fields,
            vec![f("Time", "10:30"), f("Name", "Mary - Jane")]
        );
    }

    #[test]
    fn bullets_emphasis_and_urls() {
        let parsed = parse_fields("- **Name:** Ann\n2. Email: ann@example.com\nWebsite: https://example.com");
        assert_eq!(
            parsed.fields,
            vec![
                f("Name", "Ann"),
                f("Email", "ann@example.com"),
                f("Website", "https://example.com"),
            ]
        );
    }

    #[test]
    fn empty_value_is_kept() {
        let parsed = parse_fields("Signature:\nDate: 01/02/2024");
        assert_eq!(
            parsed.fields,
            vec![f("Signature", ""), f("Date", "01/02/2024")]
        );
    }

    #[test]
    fn very_long_labels_are_prose() {
        let sentence = "This is a rather long sentence describing what the model saw on the page before it";
        let parsed = parse_fields(&format!("{sentence}: nothing\nName: Ann"));
        assert_eq!(parsed.fields, vec![f("Name", "Ann")]);
    }

    #[test]
    fn balanced_spans_ignore_braces_in_strings() {
        let text = r#"x {"a": "}{"} y"#;
        let spans = balanced_spans(text);
        assert_eq!(spans.len(), 1);
        assert_eq!(&text[spans[0].0..spans[0].1], r#"{"a": "}{"}"#);
    }

    #[test]
    fn stray_brace_and_quote_in_prose_do_not_hide_object() {
        let input = r#"Note {the "quote} here {"fields":[{"label":"A","value":"1"}]}"#;
        let parsed = parse_fields(input);
        assert_eq!(parsed.strategy, ParseStrategy::Embedded);
        assert_eq!(parsed.fields, vec![f("A", "1")]);
    }

    #[test]
    fn unclosed_brace_yields_no_span() {
        assert!(balanced_spans("open { but never closed").is_empty());
        let spans = balanced_spans(r#"{ {"a": 1} "#);
        assert_eq!(spans, vec![(2, 10)]);
    }

    #[test]
    fn merge_keeps_page_order() {
        let pages = vec![
            (2, vec![f("B1", "x"), f("B2", "y")]),
            (1, vec![f("A1", "p"), f("A2", "q")]),
        ];
        let merged = merge_pages(pages.clone(), false);
        assert_eq!(
            merged,
            vec![f("A1", "p"), f("A2", "q"), f("B1", "x"), f("B2", "y")]
        );

        let labelled = merge_pages(pages, true);
        assert_eq!(labelled[0], f("Page 1 - A1", "p"));
        assert_eq!(labelled[3], f("Page 2 - B2", "y"));
    }

    #[test]
    fn single_page_is_never_prefixed() {
        let merged = merge_pages(vec![(1, vec![f("Name", "Ann")])], true);
        assert_eq!(merged, vec![f("Name", "Ann")]);
    }
}
