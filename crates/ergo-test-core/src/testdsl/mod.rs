//! Test-Block Parser
//!
//! Recovers `@test` blocks, their `@context` and their assertions from
//! ErgoScript source:
//!
//! ```text
//! @fixture rich = Box { value = 5000000000L }
//!
//! @test "spendable after height 100" {
//!   @context {
//!     HEIGHT = 150
//!     SELF = Box { value = 1000000L registers { R4 = 42L } }
//!     INPUTS = [SELF, rich]
//!     OUTPUTS = [Box { value = 900000L }]
//!   }
//!   @assert "height guard" checkHeight(100) == true
//!   @refute HEIGHT < 100
//! }
//! ```
//!
//! A test without `@context` runs against [`MockContext::degenerate`]. A
//! test that fails to parse is reported as a [`ParseFailure`] and never
//! stops the other tests of the file from being recovered.

mod literal;
pub mod model;
mod validate;

use std::sync::OnceLock;

use regex::Regex;

pub use literal::parse_literal;
pub use model::{
    AssertionType, MockBox, MockContext, MockPreHeader, MockToken, ParseFailure, ParsedTests, RegisterValue,
    TestAssertion, TestDefinition,
};
pub use validate::{validate_tests, Diagnostic, DiagnosticKind, Severity};

use crate::blocks::{depth_map, extract_balanced_braces, find_matching_delimiter, in_literal, position_at, skip_whitespace};
use crate::error::Error;
use literal::{parse_box, parse_box_list, parse_pre_header, parse_single_box, scan_fields, Fixtures};

fn regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("test DSL regex must compile"))
}

fn test_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r#"@test\s+"([^"]*)"\s*"#)
}

fn fixture_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"@fixture\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*")
}

fn context_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"@context\b\s*")
}

fn assertion_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex(&RE, r"@(assert|refute)\b")
}

// ── Block scanning ────────────────────────────────────────

/// A `@test` marker and, when balanced, its body
#[derive(Debug, Clone)]
pub(crate) struct RawTest<'a> {
    pub name: &'a str,
    /// Byte offset of `@test`
    pub start: usize,
    /// Body text, offset of the body's first byte, offset past the `}`
    pub body: Option<(&'a str, usize, usize)>,
}

/// Every top-level `@test` block, in source order. Scanning stops after an
/// unbalanced block since everything after it is inside that block.
pub(crate) fn scan_tests(source: &str) -> Vec<RawTest<'_>> {
    let mut out = Vec::new();
    let mut consumed = 0;
    for caps in test_regex().captures_iter(source) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() < consumed || in_literal(source, whole.start()) {
            continue;
        }
        let open = skip_whitespace(source, whole.end());
        match find_matching_delimiter(source, open, b'{', b'}') {
            Some(close) => {
                out.push(RawTest {
                    name: name.as_str(),
                    start: whole.start(),
                    body: Some((&source[open + 1..close], open + 1, close + 1)),
                });
                consumed = close + 1;
            }
            None => {
                out.push(RawTest {
                    name: name.as_str(),
                    start: whole.start(),
                    body: None,
                });
                break;
            }
        }
    }
    out
}

/// A `@fixture` declaration: name, start offset, and the box literal text
/// with its end offset when balanced.
pub(crate) struct RawFixture<'a> {
    pub name: &'a str,
    pub start: usize,
    pub value: Option<(&'a str, usize)>,
}

pub(crate) fn scan_fixtures(source: &str) -> Vec<RawFixture<'_>> {
    fixture_regex()
        .captures_iter(source)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?;
            if in_literal(source, whole.start()) {
                return None;
            }
            let value_start = whole.end();
            let value = source[value_start..]
                .strip_prefix("Box")
                .map(|_| skip_whitespace(source, value_start + 3))
                .and_then(|open| find_matching_delimiter(source, open, b'{', b'}'))
                .map(|close| (&source[value_start..close + 1], close + 1));
            Some(RawFixture {
                name: name.as_str(),
                start: whole.start(),
                value,
            })
        })
        .collect()
}

/// Offsets of `marker` matches at depth zero of `body`, outside literals.
fn top_level_matches(body: &str, re: &Regex) -> Vec<(usize, usize)> {
    let depths = depth_map(body);
    re.find_iter(body)
        .filter(|m| depths[m.start()] == 0 && !in_literal(body, m.start()))
        .map(|m| (m.start(), m.end()))
        .collect()
}

// ── Parsing ───────────────────────────────────────────────

/// Parse every test and fixture in `source`.
#[tracing::instrument(level = "debug", skip(source))]
pub fn parse_tests(source: &str, file: &str) -> ParsedTests {
    let mut parsed = ParsedTests::default();
    let mut fixtures = Fixtures::new();

    for raw in scan_fixtures(source) {
        let result = match raw.value {
            Some((text, end)) => parse_box(text).map_err(|(o, m)| (end - text.len() + o, m)),
            None => Err((raw.start, format!("Fixture '{}' must be a balanced Box {{ ... }} literal", raw.name))),
        };
        match result {
            Ok(b) => {
                fixtures.insert(raw.name.to_string(), b);
            }
            Err((offset, message)) => {
                let (line, column) = position_at(source, offset);
                parsed.errors.push(ParseFailure {
                    test: None,
                    error: Error::parse(line, column, message),
                });
            }
        }
    }

    for raw in scan_tests(source) {
        let (line, column) = position_at(source, raw.start);
        let Some((body, body_offset, _)) = raw.body else {
            parsed.errors.push(ParseFailure {
                test: Some(raw.name.to_string()),
                error: Error::parse(line, column, format!("Unbalanced braces in test '{}'", raw.name)),
            });
            continue;
        };
        match parse_test_body(source, body, body_offset, &fixtures) {
            Ok((context, assertions)) => parsed.tests.push(TestDefinition {
                name: raw.name.to_string(),
                context,
                assertions,
                line,
                column,
            }),
            Err(error) => parsed.errors.push(ParseFailure {
                test: Some(raw.name.to_string()),
                error,
            }),
        }
    }

    tracing::debug!(
        tests = parsed.tests.len(),
        failures = parsed.errors.len(),
        "parsed test blocks"
    );
    parsed
}

fn parse_test_body(
    source: &str,
    body: &str,
    body_offset: usize,
    fixtures: &Fixtures,
) -> Result<(MockContext, Vec<TestAssertion>), Error> {
    let error_at = |offset: usize, message: String| {
        let (line, column) = position_at(source, body_offset + offset);
        Error::parse(line, column, message)
    };

    let mut context_range = None;
    let context = match top_level_matches(body, context_regex()).first() {
        Some(&(start, end)) => {
            let (ctx_body, ctx_end) = extract_balanced_braces(body, end)
                .ok_or_else(|| error_at(start, "Unbalanced braces in @context block".into()))?;
            context_range = Some((start, ctx_end));
            let ctx_offset = skip_whitespace(body, end) + 1;
            parse_context(&ctx_body, fixtures).map_err(|(o, m)| error_at(ctx_offset + o, m))?
        }
        None => MockContext::degenerate(0),
    };

    let mut assertions = Vec::new();
    for (start, end) in top_level_matches(body, assertion_regex()) {
        if matches!(context_range, Some((cs, ce)) if start >= cs && start < ce) {
            continue;
        }
        let refute = body[start..end].ends_with("refute");
        let assertion = parse_assertion(body, end, refute).map_err(|(o, m)| error_at(o, m))?;
        let (line, column) = position_at(source, body_offset + assertion.1);
        assertions.push(TestAssertion {
            line,
            column,
            ..assertion.0
        });
    }
    Ok((context, assertions))
}

/// Build a [`MockContext`] from an `@context` body.
pub(crate) fn parse_context(body: &str, fixtures: &Fixtures) -> Result<MockContext, (usize, String)> {
    let fields = scan_fields(body)?;
    let field = |names: &[&str]| fields.iter().find(|f| names.contains(&f.key));

    for f in &fields {
        if !CONTEXT_FIELDS.contains(&f.key) {
            tracing::warn!(field = f.key, "ignoring unknown @context field");
        }
    }

    let height = match field(&["HEIGHT"]) {
        Some(f) => literal::parse_i64(f.value).map_err(|m| (f.offset, m))?,
        None => 0,
    };
    let declared_self = match field(&["SELF"]) {
        Some(f) => Some(parse_single_box(f.value, fixtures).map_err(|(o, m)| (f.value_offset + o, m))?),
        None => None,
    };
    let provisional_self = declared_self.clone().unwrap_or_default();

    let list = |names: &[&str]| -> Result<Option<Vec<MockBox>>, (usize, String)> {
        match field(names) {
            Some(f) => parse_box_list(f.value, &provisional_self, fixtures)
                .map(|l| Some(l.boxes))
                .map_err(|(o, m)| (f.value_offset + o, m)),
            None => Ok(None),
        }
    };
    let (inputs, self_index) = match field(&["INPUTS"]) {
        Some(f) => {
            let list = parse_box_list(f.value, &provisional_self, fixtures).map_err(|(o, m)| (f.value_offset + o, m))?;
            if list.self_at.len() > 1 {
                return Err((f.offset, "SELF appears more than once in INPUTS".into()));
            }
            // Without a SELF declaration the first input is the self box.
            let index = match (list.self_at.first(), &declared_self) {
                (Some(&i), _) => Some(i),
                (None, None) if !list.boxes.is_empty() => Some(0),
                _ => None,
            };
            (list.boxes, index)
        }
        None => (vec![provisional_self.clone()], Some(0)),
    };
    let outputs = list(&["OUTPUTS"])?.unwrap_or_default();
    let data_inputs = list(&["DATA_INPUTS", "dataInputs"])?.unwrap_or_default();

    let pre_header = match field(&["PRE_HEADER", "preHeader"]) {
        Some(f) => {
            let inner = literal::inner(f.value, '{', '}')
                .ok_or_else(|| (f.offset, "PRE_HEADER must be a { ... } block".to_string()))?;
            Some(parse_pre_header(inner).map_err(|m| (f.offset, m))?)
        }
        None => None,
    };

    let self_box = declared_self
        .or_else(|| self_index.and_then(|i| inputs.get(i).cloned()))
        .unwrap_or_default();

    Ok(MockContext {
        height,
        self_box,
        inputs,
        self_index,
        outputs,
        data_inputs,
        pre_header,
    })
}

pub(crate) const CONTEXT_FIELDS: [&str; 8] = [
    "HEIGHT",
    "SELF",
    "INPUTS",
    "OUTPUTS",
    "DATA_INPUTS",
    "dataInputs",
    "PRE_HEADER",
    "preHeader",
];

/// Parse one assertion whose marker ends at `marker_end`.
///
/// Returns the assertion (position unset) and the body offset of its
/// expression.
fn parse_assertion(body: &str, marker_end: usize, refute: bool) -> Result<(TestAssertion, usize), (usize, String)> {
    let bytes = body.as_bytes();
    let mut pos = marker_end;
    while pos < bytes.len() && matches!(bytes[pos], b' ' | b'\t') {
        pos += 1;
    }

    let end = statement_end(body, pos);
    let mut description = None;
    if bytes.get(pos) == Some(&b'"') {
        if let Some(close) = body[pos + 1..end].find('"').map(|i| pos + 1 + i) {
            let rest = body[close + 1..end].trim();
            if !rest.is_empty() && !continues_expression(rest) {
                description = Some(body[pos + 1..close].to_string());
                pos = close + 1;
                while pos < end && matches!(bytes[pos], b' ' | b'\t') {
                    pos += 1;
                }
            }
        }
    }

    let text = body[pos..end].trim_end().trim_end_matches(';').trim_end();
    if text.is_empty() {
        return Err((marker_end, "Assertion has an empty expression".into()));
    }

    let (expression, assertion_type, expected) = match split_comparison(text) {
        Some((at, width, negated)) => {
            let expected = text[at + width..].trim();
            if expected.is_empty() {
                return Err((pos + at, "Assertion is missing an expected value".into()));
            }
            let equals = negated == refute;
            let kind = if equals {
                AssertionType::Equals
            } else {
                AssertionType::NotEquals
            };
            (text[..at].trim_end(), kind, Some(expected.to_string()))
        }
        None => {
            let kind = if refute {
                AssertionType::NotProvable
            } else {
                AssertionType::Provable
            };
            (text, kind, None)
        }
    };
    if expression.is_empty() {
        return Err((pos, "Assertion has an empty expression".into()));
    }

    Ok((
        TestAssertion {
            description,
            expression: expression.to_string(),
            assertion_type,
            expected,
            line: 0,
            column: 0,
        },
        pos,
    ))
}

/// True when `rest` follows a string literal as part of the same expression
/// (`"abc" == x`, `"abc".size`), so the literal is not a description.
fn continues_expression(rest: &str) -> bool {
    const OPERATORS: [&str; 12] = ["==", "!=", "<", ">", "&&", "||", "+", "*", "/", "%", ".", ")"];
    OPERATORS.iter().any(|op| rest.starts_with(op))
}

/// End of the statement starting at `start`: the first newline with all
/// brackets opened since `start` closed again.
fn statement_end(body: &str, start: usize) -> usize {
    let bytes = body.as_bytes();
    let mut depth = 0i32;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b'"' && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'(' | b'{' | b'[' => depth += 1,
            b')' | b'}' | b']' => depth -= 1,
            b'\n' if depth <= 0 => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len().min(body.len())
}

/// First top-level `===`, `==` or `!=`: (offset, width, negated).
fn split_comparison(text: &str) -> Option<(usize, usize, bool)> {
    let depths = depth_map(text);
    let bytes = text.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if depths[i] == 0 && !in_literal(text, i) {
            let prev = if i > 0 { bytes[i - 1] } else { b' ' };
            if bytes[i] == b'=' && bytes[i + 1] == b'=' && !matches!(prev, b'<' | b'>' | b'!' | b'=') {
                let width = if bytes.get(i + 2) == Some(&b'=') { 3 } else { 2 };
                return Some((i, width, false));
            }
            if bytes[i] == b'!' && bytes[i + 1] == b'=' {
                return Some((i, 2, true));
            }
        }
        i += 1;
    }
    None
}

// ── Stripping ─────────────────────────────────────────────

/// Blank every `@test` and `@fixture` region, keeping newlines, so the
/// remaining text compiles and every position is unchanged.
pub fn strip_test_blocks(source: &str) -> String {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for raw in scan_fixtures(source) {
        ranges.push((raw.start, raw.value.map(|(_, end)| end).unwrap_or(source.len())));
    }
    for raw in scan_tests(source) {
        ranges.push((raw.start, raw.body.map(|(_, _, end)| end).unwrap_or(source.len())));
    }
    if ranges.is_empty() {
        return source.to_string();
    }

    let mut out = String::with_capacity(source.len());
    for (i, c) in source.char_indices() {
        let blank = ranges.iter().any(|&(s, e)| i >= s && i < e);
        if blank && c != '\n' {
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r#"def checkHeight(h: Int): Boolean = HEIGHT > h

@fixture rich = Box { value = 5000000000L }

@test "height check" {
  @context {
    HEIGHT = 150
    SELF = Box { value = 1000000L registers { R4 = 42L } }
    INPUTS = [SELF, rich]
    OUTPUTS = [Box { value = 900000L }]
  }
  @assert "guard holds" checkHeight(100) == true
  @assert HEIGHT != 10
  @refute HEIGHT < 100
}

@test "pure" {
  @assert 1 + 1 === 2
}
"#;

    #[test]
    fn test_parses_tests_and_fixtures() {
        let parsed = parse_tests(FILE, "main.es");
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        assert_eq!(parsed.tests.len(), 2);

        let t = &parsed.tests[0];
        assert_eq!(t.name, "height check");
        assert_eq!((t.line, t.column), (5, 1));
        assert_eq!(t.context.height, 150);
        assert_eq!(t.context.self_box.value, 1_000_000);
        assert_eq!(t.context.inputs.len(), 2);
        assert_eq!(t.context.inputs[0], t.context.self_box);
        assert_eq!(t.context.self_index, Some(0));
        assert_eq!(t.context.inputs[1].value, 5_000_000_000);
        assert_eq!(t.context.outputs[0].value, 900_000);
    }

    #[test]
    fn test_assertion_forms() {
        let parsed = parse_tests(FILE, "main.es");
        let a = &parsed.tests[0].assertions;
        assert_eq!(a.len(), 3);
        assert_eq!(a[0].description.as_deref(), Some("guard holds"));
        assert_eq!(a[0].expression, "checkHeight(100)");
        assert_eq!(a[0].assertion_type, AssertionType::Equals);
        assert_eq!(a[0].expected.as_deref(), Some("true"));
        assert_eq!((a[0].line, a[0].column), (12, 25));
        assert_eq!(a[1].assertion_type, AssertionType::NotEquals);
        assert_eq!(a[2].assertion_type, AssertionType::NotProvable);
        assert_eq!(a[2].expected, None);

        let pure = &parsed.tests[1];
        assert_eq!(pure.assertions[0].assertion_type, AssertionType::Equals);
        assert_eq!(pure.assertions[0].expected.as_deref(), Some("2"));
        assert_eq!(pure.context, MockContext::degenerate(0));
    }

    #[test]
    fn test_string_literal_operand_is_not_a_description() {
        let src = "@test \"strings\" {\n  @assert \"abc\" == \"abc\"\n  @assert \"len\" \"abc\".size == 3\n}";
        let parsed = parse_tests(src, "t.es");
        assert!(parsed.errors.is_empty(), "{:?}", parsed.errors);
        let a = &parsed.tests[0].assertions;
        assert_eq!(a[0].description, None);
        assert_eq!(a[0].expression, "\"abc\"");
        assert_eq!(a[0].expected.as_deref(), Some("\"abc\""));
        assert_eq!((a[0].line, a[0].column), (2, 11));
        assert_eq!(a[1].description.as_deref(), Some("len"));
        assert_eq!(a[1].expression, "\"abc\".size");
    }

    #[test]
    fn test_comparison_split_ignores_nested_and_relational() {
        assert_eq!(split_comparison("a <= b"), None);
        assert_eq!(split_comparison("f(a == b)"), None);
        assert_eq!(split_comparison("x == \"==\""), Some((2, 2, false)));
        assert_eq!(split_comparison("x !== y"), Some((2, 2, true)));
    }

    #[test]
    fn test_multiline_assertion() {
        let src = "@test \"t\" {\n  @assert OUTPUTS.exists { (b: Box) =>\n    b.value > 1L\n  } == true\n}";
        let parsed = parse_tests(src, "t.es");
        let a = &parsed.tests[0].assertions[0];
        assert_eq!(a.expected.as_deref(), Some("true"));
        assert!(a.expression.starts_with("OUTPUTS.exists"));
        assert!(a.expression.ends_with('}'));
    }

    #[test]
    fn test_missing_self_defaults_to_first_input() {
        let src = "@test \"t\" { @context { INPUTS = [Box { value = 7 }] } @assert true }";
        let ctx = &parse_tests(src, "t.es").tests[0].context;
        assert_eq!(ctx.self_box.value, 7);
        assert_eq!(ctx.self_index, Some(0));
        assert_eq!(ctx.height, 0);
    }

    #[test]
    fn test_self_position_is_where_it_was_declared() {
        let src = "@test \"t\" { @context { SELF = Box { value = 10L } INPUTS = [Box { value = 10L }, SELF] } @assert true }";
        let ctx = &parse_tests(src, "t.es").tests[0].context;
        assert_eq!(ctx.inputs[0], ctx.inputs[1]);
        assert_eq!(ctx.self_index, Some(1));
    }

    #[test]
    fn test_content_equal_input_is_not_self() {
        let src = "@test \"t\" { @context { SELF = Box { value = 10L } INPUTS = [Box { value = 10L }] } @assert true }";
        let ctx = &parse_tests(src, "t.es").tests[0].context;
        assert_eq!(ctx.inputs[0], ctx.self_box);
        assert_eq!(ctx.self_index, None);
    }

    #[test]
    fn test_self_listed_twice_is_an_error() {
        let src = "@test \"t\" { @context { SELF = Box { value = 1 } INPUTS = [SELF, SELF] } @assert true }";
        let parsed = parse_tests(src, "t.es");
        assert!(parsed.tests.is_empty());
        assert!(parsed.errors[0].error.to_string().contains("more than once"));
    }

    #[test]
    fn test_self_shorthand_list() {
        let src = "@test \"t\" { @context { SELF = Box { value = 3 } INPUTS = [SELF] } @assert true }";
        let ctx = &parse_tests(src, "t.es").tests[0].context;
        assert_eq!(ctx.inputs, vec![ctx.self_box.clone()]);
        assert_eq!(ctx.self_index, Some(0));
    }

    #[test]
    fn test_bad_test_does_not_hide_others() {
        let src = "@test \"bad\" { @context { HEIGHT = x } @assert true }\n@test \"good\" { @assert true }";
        let parsed = parse_tests(src, "t.es");
        assert_eq!(parsed.tests.len(), 1);
        assert_eq!(parsed.tests[0].name, "good");
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].test.as_deref(), Some("bad"));
        assert_eq!(parsed.errors[0].error.kind(), "ParseError");
    }

    #[test]
    fn test_register_error_position_inside_context() {
        let src = "@test \"r\" {\n  @context {\n    INPUTS = [SELF, Box { value = 5\n      registers { R4 = 1L R5 = 99999999999 } }]\n  }\n  @assert true\n}";
        let parsed = parse_tests(src, "t.es");
        assert!(parsed.tests.is_empty());
        match &parsed.errors[0].error {
            Error::Parse { line, column, message } => {
                assert_eq!((*line, *column), (4, 27));
                assert!(message.contains("out of range"));
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_fixture_error_position_is_the_bad_field() {
        let parsed = parse_tests("@fixture f = Box {\n  id = 7\n}\n", "t.es");
        match &parsed.errors[0].error {
            Error::Parse { line, column, .. } => assert_eq!((*line, *column), (2, 3)),
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_unbalanced_test_is_reported() {
        let parsed = parse_tests("@test \"open\" {\n @assert true\n", "t.es");
        assert!(parsed.tests.is_empty());
        assert!(parsed.errors[0].error.to_string().contains("Unbalanced"));
    }

    #[test]
    fn test_marker_in_comment_is_ignored() {
        let parsed = parse_tests("// @test \"ghost\" { }\nval x = 1", "t.es");
        assert!(parsed.tests.is_empty());
        assert!(parsed.errors.is_empty());
    }

    #[test]
    fn test_pre_header_block() {
        let src = "@test \"t\" { @context { HEIGHT = 5 PRE_HEADER { timestamp = 10L height = 6 } } @assert true }";
        let ctx = &parse_tests(src, "t.es").tests[0].context;
        let h = ctx.pre_header.as_ref().unwrap();
        assert_eq!(h.timestamp, Some(10));
        assert_eq!(h.height, Some(6));
    }

    #[test]
    fn test_strip_keeps_lines_and_columns() {
        let stripped = strip_test_blocks(FILE);
        assert_eq!(stripped.lines().count(), FILE.lines().count());
        assert_eq!(stripped.len(), FILE.len());
        assert!(stripped.starts_with("def checkHeight"));
        assert!(!stripped.contains("@test"));
        assert!(!stripped.contains("@fixture"));
    }

    #[test]
    fn test_strip_unbalanced_blanks_to_end() {
        let stripped = strip_test_blocks("val a = 1\n@test \"x\" {\nval b = 2");
        assert_eq!(stripped.lines().next(), Some("val a = 1"));
        assert!(!stripped.contains("val b"));
    }

    #[test]
    fn test_determinism_100_iterations() {
        let first = parse_tests(FILE, "main.es").tests;
        for _ in 0..100 {
            assert_eq!(parse_tests(FILE, "main.es").tests, first);
        }
    }
}
