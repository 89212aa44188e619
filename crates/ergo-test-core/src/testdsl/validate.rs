//! Structural checks over test blocks
//!
//! Non-fatal: the runner never calls this. It reports everything it finds
//! rather than stopping at the first problem.

use std::collections::HashMap;

use serde::Serialize;

use super::literal::Fixtures;
use super::{
    context_regex, parse_assertion, parse_context, scan_fixtures, scan_tests, top_level_matches, assertion_regex,
    CONTEXT_FIELDS,
};
use crate::blocks::{extract_balanced_braces, position_at, skip_whitespace};
use crate::context::register_index;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: DiagnosticKind,
    pub message: String,
    /// Path of the checked file, as given by the caller
    pub file: String,
    /// 1-based
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prefix = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{} [{}] at {}:{}:{}: {}",
            prefix, self.kind, self.file, self.line, self.column, self.message
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    Structure,
    Context,
    Assertion,
    Duplicate,
    Register,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DiagnosticKind::Structure => write!(f, "structure"),
            DiagnosticKind::Context => write!(f, "context"),
            DiagnosticKind::Assertion => write!(f, "assertion"),
            DiagnosticKind::Duplicate => write!(f, "duplicate"),
            DiagnosticKind::Register => write!(f, "register"),
        }
    }
}

struct Collector<'a> {
    source: &'a str,
    file: &'a str,
    diagnostics: Vec<Diagnostic>,
}

impl Collector<'_> {
    fn push(&mut self, severity: Severity, kind: DiagnosticKind, offset: usize, message: String) {
        let (line, column) = position_at(self.source, offset);
        self.diagnostics.push(Diagnostic {
            severity,
            kind,
            message,
            file: self.file.to_string(),
            line,
            column,
        });
    }
}

/// Check every test and fixture block in `source`, read from `file`.
pub fn validate_tests(source: &str, file: &str) -> Vec<Diagnostic> {
    let mut c = Collector {
        source,
        file,
        diagnostics: Vec::new(),
    };

    let mut fixtures = Fixtures::new();
    for raw in scan_fixtures(source) {
        match raw.value.map(|(text, end)| (end - text.len(), super::literal::parse_box(text))) {
            Some((_, Ok(b))) => {
                fixtures.insert(raw.name.to_string(), b);
            }
            Some((text_start, Err((offset, message)))) => {
                c.push(Severity::Error, DiagnosticKind::Structure, text_start + offset, message)
            }
            None => c.push(
                Severity::Error,
                DiagnosticKind::Structure,
                raw.start,
                format!("Fixture '{}' has unbalanced braces", raw.name),
            ),
        }
    }

    let mut seen: HashMap<&str, usize> = HashMap::new();
    for raw in scan_tests(source) {
        if let Some(first) = seen.insert(raw.name, raw.start) {
            let (line, _) = position_at(source, first);
            c.push(
                Severity::Warning,
                DiagnosticKind::Duplicate,
                raw.start,
                format!("Duplicate test name '{}' (first defined on line {})", raw.name, line),
            );
            seen.insert(raw.name, first);
        }

        let Some((body, body_offset, _)) = raw.body else {
            c.push(
                Severity::Error,
                DiagnosticKind::Structure,
                raw.start,
                format!("Test '{}' has unbalanced braces", raw.name),
            );
            continue;
        };

        let contexts = top_level_matches(body, context_regex());
        if contexts.len() > 1 {
            c.push(
                Severity::Warning,
                DiagnosticKind::Context,
                body_offset + contexts[1].0,
                format!(
                    "Test '{}' has {} @context blocks; only the first is used",
                    raw.name,
                    contexts.len()
                ),
            );
        }
        let mut context_range = None;
        if let Some(&(start, end)) = contexts.first() {
            match extract_balanced_braces(body, end) {
                None => c.push(
                    Severity::Error,
                    DiagnosticKind::Structure,
                    body_offset + start,
                    format!("@context block of test '{}' has unbalanced braces", raw.name),
                ),
                Some((ctx_body, ctx_end)) => {
                    context_range = Some((start, ctx_end));
                    let ctx_offset = body_offset + skip_whitespace(body, end) + 1;
                    check_context(&mut c, &ctx_body, ctx_offset, &fixtures);
                }
            }
        }

        let mut assertions = 0;
        for (start, end) in top_level_matches(body, assertion_regex()) {
            if matches!(context_range, Some((cs, ce)) if start >= cs && start < ce) {
                continue;
            }
            assertions += 1;
            let refute = body[start..end].ends_with("refute");
            if let Err((offset, message)) = parse_assertion(body, end, refute) {
                c.push(Severity::Error, DiagnosticKind::Assertion, body_offset + offset, message);
            }
        }
        if assertions == 0 {
            c.push(
                Severity::Warning,
                DiagnosticKind::Assertion,
                raw.start,
                format!("Test '{}' has no assertions", raw.name),
            );
        }
    }

    c.diagnostics
}

fn check_context(c: &mut Collector, body: &str, offset: usize, fixtures: &Fixtures) {
    if let Ok(fields) = super::literal::scan_fields(body) {
        for f in fields.iter().filter(|f| !CONTEXT_FIELDS.contains(&f.key)) {
            c.push(
                Severity::Warning,
                DiagnosticKind::Context,
                offset + f.offset,
                format!("Unknown @context field '{}'", f.key),
            );
        }
    }

    let ctx = match parse_context(body, fixtures) {
        Ok(ctx) => ctx,
        Err((o, message)) => {
            c.push(Severity::Error, DiagnosticKind::Context, offset + o, message);
            return;
        }
    };
    let boxes = std::iter::once(&ctx.self_box)
        .chain(&ctx.inputs)
        .chain(&ctx.outputs)
        .chain(&ctx.data_inputs);
    let mut reported = Vec::new();
    for b in boxes {
        for name in b.registers.keys() {
            if register_index(name).is_err() && !reported.contains(name) {
                reported.push(name.clone());
                c.push(
                    Severity::Error,
                    DiagnosticKind::Register,
                    offset + body.find(name.as_str()).unwrap_or(0),
                    format!("Unknown register '{}' (expected R4..R9)", name),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<(Severity, DiagnosticKind)> {
        validate_tests(source, "tests.es").iter().map(|d| (d.severity, d.kind)).collect()
    }

    #[test]
    fn test_clean_file_has_no_diagnostics() {
        let src = "@test \"a\" {\n  @context { HEIGHT = 1 }\n  @assert HEIGHT == 1\n}";
        assert!(validate_tests(src, "tests.es").is_empty());
    }

    #[test]
    fn test_unbalanced_test() {
        let diags = validate_tests("val x = 1\n@test \"a\" {\n  @assert true\n", "tests.es");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].severity, Severity::Error);
        assert_eq!(diags[0].kind, DiagnosticKind::Structure);
        assert_eq!((diags[0].line, diags[0].column), (2, 1));
    }

    #[test]
    fn test_no_assertions_warning() {
        assert_eq!(
            kinds("@test \"a\" { }"),
            vec![(Severity::Warning, DiagnosticKind::Assertion)]
        );
    }

    #[test]
    fn test_duplicate_names() {
        let diags = validate_tests("@test \"a\" { @assert true }\n@test \"a\" { @assert true }", "tests.es");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::Duplicate);
        assert!(diags[0].message.contains("line 1"));
        assert_eq!(diags[0].line, 2);
    }

    #[test]
    fn test_multiple_contexts() {
        let src = "@test \"a\" { @context { HEIGHT = 1 } @context { HEIGHT = 2 } @assert true }";
        assert_eq!(kinds(src), vec![(Severity::Warning, DiagnosticKind::Context)]);
    }

    #[test]
    fn test_unknown_register() {
        let src = "@test \"a\" {\n @context {\n  SELF = Box { value = 1 registers { R2 = 5 } }\n }\n @assert true\n}";
        let diags = validate_tests(src, "tests.es");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::Register);
        assert_eq!(diags[0].line, 3);
        assert_eq!(diags[0].file, "tests.es");
        assert!(diags[0].to_string().starts_with("error [register] at tests.es:3:"));
    }

    #[test]
    fn test_empty_assertion() {
        let src = "@test \"a\" {\n  @assert\n}";
        assert_eq!(kinds(src), vec![(Severity::Error, DiagnosticKind::Assertion)]);
    }

    #[test]
    fn test_unknown_context_field() {
        let src = "@test \"a\" { @context { HIGHT = 1 } @assert true }";
        assert_eq!(kinds(src), vec![(Severity::Warning, DiagnosticKind::Context)]);
    }

    #[test]
    fn test_bad_register_literal_points_at_the_register() {
        let src = "@test \"a\" {\n @context {\n  SELF = Box { value = 1\n    registers { R4 = 1L R5 = 0xzz }\n  }\n }\n @assert true\n}";
        let diags = validate_tests(src, "contracts/a.es");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::Context);
        assert!(diags[0].message.contains("Invalid hex literal"));
        assert_eq!((diags[0].line, diags[0].column), (4, 25));
        assert_eq!(diags[0].file, "contracts/a.es");
    }

    #[test]
    fn test_bad_fixture_field_points_into_the_fixture() {
        let src = "@fixture rich = Box {\n  value = lots\n}\n@test \"a\" { @assert true }";
        let diags = validate_tests(src, "tests.es");
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::Structure);
        assert_eq!((diags[0].line, diags[0].column), (2, 3));
    }

    #[test]
    fn test_diagnostics_serialize_with_file() {
        let diags = validate_tests("@test \"a\" { }", "dir/t.es");
        let json = serde_json::to_value(&diags).unwrap();
        assert_eq!(json[0]["file"], "dir/t.es");
        assert_eq!(json[0]["severity"], "warning");
    }
}
