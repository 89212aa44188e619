//! Source Position Mapper
//!
//! Maps operation tags to source positions with one of two strategies:
//!
//! - [`scan_source`]: line-by-line regex scan of raw text. Approximate; it
//!   knows nothing about nesting and is only a fallback.
//! - [`map_expression_tree`]: walks a compiled tree and reads the position
//!   each node carries, translating expanded-code lines back to the file
//!   they came from.
//!
//! Both produce a [`SourcePositionMap`]. Many mappings share an operation
//! tag; lookups disambiguate by exact position, by nearest line, or by
//! occurrence index over [`SourcePositionMap::all_by_operation`].

use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::blocks::in_literal;
use crate::imports::ExpandedCode;
use crate::script::{Expr, ExprKind};

/// A position in an original (pre-expansion) source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePosition {
    pub file: String,
    /// 1-based
    pub line: usize,
    pub column: usize,
    /// Text of the whole source line
    #[serde(rename = "text")]
    pub source_line: String,
}

impl std::fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionMapping {
    pub expr_hash: u32,
    /// Operation tag, e.g. `GT` or `ValDef`
    pub expr_type: String,
    pub source_pos: SourcePosition,
    pub var_bindings: BTreeMap<String, String>,
    pub expanded_line: Option<usize>,
    pub expanded_column: Option<usize>,
}

/// First four bytes of `sha256("op:line:column")`.
pub fn expr_hash(op: &str, line: usize, column: usize) -> u32 {
    let digest = Sha256::digest(format!("{}:{}:{}", op, line, column).as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePositionMap {
    pub mappings: Vec<ExpressionMapping>,
    /// Line number to source text
    pub lines: BTreeMap<usize, String>,
}

impl SourcePositionMap {
    pub fn add(&mut self, mapping: ExpressionMapping) {
        self.mappings.push(mapping);
    }

    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    pub fn by_hash(&self, hash: u32) -> Option<&ExpressionMapping> {
        self.mappings.iter().find(|m| m.expr_hash == hash)
    }

    /// Nearest mapping of `op` by original line.
    pub fn by_type_near_line(&self, op: &str, line: usize) -> Option<&SourcePosition> {
        self.mappings
            .iter()
            .filter(|m| m.expr_type == op)
            .min_by_key(|m| m.source_pos.line.abs_diff(line))
            .map(|m| &m.source_pos)
    }

    /// Nearest mapping of `op` by expanded line; ties go to the first
    /// registered.
    pub fn by_operation_and_position(&self, op: &str, expanded_line: usize) -> Option<&SourcePosition> {
        self.mappings
            .iter()
            .filter(|m| m.expr_type == op)
            .filter_map(|m| m.expanded_line.map(|l| (l.abs_diff(expanded_line), m)))
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, m)| &m.source_pos)
    }

    /// Mapping registered for exactly this expanded position.
    pub fn exact(&self, op: &str, expanded_line: usize, expanded_column: usize) -> Option<&SourcePosition> {
        self.mappings
            .iter()
            .find(|m| {
                m.expr_type == op
                    && m.expanded_line == Some(expanded_line)
                    && m.expanded_column == Some(expanded_column)
            })
            .map(|m| &m.source_pos)
    }

    /// Every mapping of `op`, in registration order.
    pub fn all_by_operation(&self, op: &str) -> Vec<&ExpressionMapping> {
        self.mappings.iter().filter(|m| m.expr_type == op).collect()
    }

    pub fn source_line(&self, line: usize) -> Option<&str> {
        self.lines.get(&line).map(String::as_str)
    }
}

// ── Heuristic scan ────────────────────────────────────────

fn val_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bval\s+([A-Za-z_][A-Za-z0-9_]*)\s*(?::[^=]*)?=([^=>].*)?$").expect("val regex must compile"))
}

fn operator_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r">=|<=|==|!=|&&|\|\||>|<").expect("operator regex must compile"))
}

fn loop_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\.(filter|map|fold|exists|forall|flatMap)\b").expect("loop method regex must compile")
    })
}

fn operator_tag(op: &str) -> &'static str {
    match op {
        ">=" => "GE",
        "<=" => "LE",
        "==" => "EQ",
        "!=" => "NEQ",
        "&&" => "BinAnd",
        "||" => "BinOr",
        ">" => "GT",
        _ => "LT",
    }
}

fn loop_tag(method: &str) -> &'static str {
    match method {
        "filter" => "Filter",
        "map" => "Map",
        "fold" => "Fold",
        "exists" => "Exists",
        "forall" => "ForAll",
        _ => "FlatMap",
    }
}

/// Approximate mappings from a line-by-line scan of `source`.
pub fn scan_source(source: &str, file: &str) -> SourcePositionMap {
    let mut map = SourcePositionMap::default();
    for (i, text) in source.split('\n').enumerate() {
        let line = i + 1;
        map.lines.insert(line, text.to_string());
        let column_of = |byte: usize| text[..byte].chars().count() + 1;
        let mut found: Vec<(usize, &'static str, BTreeMap<String, String>)> = Vec::new();

        if let Some(caps) = val_regex().captures(text) {
            if let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) {
                if !in_literal(text, whole.start()) {
                    let mut bindings = BTreeMap::new();
                    let rhs = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
                    bindings.insert(name.as_str().to_string(), rhs.to_string());
                    found.push((whole.start(), "ValDef", bindings));
                }
            }
        }

        let bytes = text.as_bytes();
        for m in operator_regex().find_iter(text) {
            let op = m.as_str();
            if in_literal(text, m.start()) {
                continue;
            }
            // `=>` and `===` are not comparisons
            if op == ">" && m.start() > 0 && bytes[m.start() - 1] == b'=' {
                continue;
            }
            if op == "==" && (bytes.get(m.end()) == Some(&b'=') || (m.start() > 0 && bytes[m.start() - 1] == b'=')) {
                continue;
            }
            found.push((m.start(), operator_tag(op), BTreeMap::new()));
        }

        for caps in loop_regex().captures_iter(text) {
            if let Some(method) = caps.get(1) {
                if !in_literal(text, method.start()) {
                    found.push((method.start(), loop_tag(method.as_str()), BTreeMap::new()));
                }
            }
        }

        found.sort_by_key(|(offset, _, _)| *offset);
        for (offset, tag, bindings) in found {
            let column = column_of(offset);
            map.add(ExpressionMapping {
                expr_hash: expr_hash(tag, line, column),
                expr_type: tag.to_string(),
                source_pos: SourcePosition {
                    file: file.to_string(),
                    line,
                    column,
                    source_line: text.to_string(),
                },
                var_bindings: bindings,
                expanded_line: Some(line),
                expanded_column: Some(column),
            });
        }
    }
    map
}

// ── Tree walk ─────────────────────────────────────────────

/// Precise mappings from the positions attached to a compiled tree.
///
/// Nodes are visited in post-order and in evaluation order (conditions
/// before branches, bindings before the block result, receivers before
/// arguments), including lambda bodies. Each (tag, line, column) is recorded
/// once.
pub fn map_expression_tree(root: &Expr, expanded: Option<&ExpandedCode>, file: &str) -> SourcePositionMap {
    let mut map = SourcePositionMap::default();
    if let Some(code) = expanded {
        for (i, text) in code.lines().enumerate() {
            map.lines.insert(i + 1, text.to_string());
        }
    }
    let mut seen = HashSet::new();
    visit(root, expanded, file, &mut seen, &mut map);
    tracing::debug!(mappings = map.len(), "mapped expression tree");
    map
}

fn visit(
    expr: &Expr,
    expanded: Option<&ExpandedCode>,
    file: &str,
    seen: &mut HashSet<(&'static str, usize, usize)>,
    map: &mut SourcePositionMap,
) {
    for child in expr.children() {
        visit(child, expanded, file, seen, map);
    }
    if let ExprKind::Lambda { body, .. } = &expr.kind {
        visit(body, expanded, file, seen, map);
    }

    let Some(ctx) = &expr.source else {
        return;
    };
    let op = expr.op_name();
    if !seen.insert((op, ctx.line, ctx.column)) {
        return;
    }

    let (orig_file, line, column) = expanded
        .and_then(|code| code.translate(ctx.line, ctx.column))
        .unwrap_or_else(|| (file.to_string(), ctx.line, ctx.column));

    let mut bindings = BTreeMap::new();
    if let ExprKind::ValDef { name, rhs } = &expr.kind {
        bindings.insert(name.clone(), rhs.op_name().to_string());
    }

    map.add(ExpressionMapping {
        expr_hash: expr_hash(op, line, column),
        expr_type: op.to_string(),
        source_pos: SourcePosition {
            file: orig_file,
            line,
            column,
            source_line: ctx.source_line.clone(),
        },
        var_bindings: bindings,
        expanded_line: Some(ctx.line),
        expanded_column: Some(ctx.column),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imports::SourceLocation;
    use crate::script::parser::parse_program;

    fn tree(source: &str) -> Expr {
        parse_program(source).unwrap().into_expr()
    }

    #[test]
    fn test_scan_finds_comparisons_and_bindings() {
        let map = scan_source("val limit = 100\nHEIGHT > limit && HEIGHT >= 5", "m.es");
        let tags: Vec<&str> = map.mappings.iter().map(|m| m.expr_type.as_str()).collect();
        assert_eq!(tags, vec!["ValDef", "GT", "BinAnd", "GE"]);
        assert_eq!(map.mappings[0].var_bindings["limit"], "100");
        assert_eq!(map.mappings[1].source_pos.column, 8);
        assert_eq!(map.source_line(2), Some("HEIGHT > limit && HEIGHT >= 5"));
    }

    #[test]
    fn test_scan_skips_arrows_and_literals() {
        let map = scan_source("OUTPUTS.exists { (b: Box) => b.value > 1L } // a < b", "m.es");
        let tags: Vec<&str> = map.mappings.iter().map(|m| m.expr_type.as_str()).collect();
        assert_eq!(tags, vec!["Exists", "GT"]);
    }

    #[test]
    fn test_tree_walk_records_every_positioned_node() {
        let map = map_expression_tree(&tree("val x = 1\nHEIGHT > x"), None, "m.es");
        let gt = map.all_by_operation("GT");
        assert_eq!(gt.len(), 1);
        assert_eq!((gt[0].source_pos.line, gt[0].source_pos.column), (2, 8));
        assert_eq!(map.all_by_operation("ValDef")[0].var_bindings["x"], "Constant");
    }

    #[test]
    fn test_tree_walk_includes_lambda_bodies() {
        let map = map_expression_tree(
            &tree("OUTPUTS.exists { (b: Box) => b.value > 1L }"),
            None,
            "m.es",
        );
        assert_eq!(map.all_by_operation("GT").len(), 1);
        assert_eq!(map.all_by_operation("Exists").len(), 1);
    }

    #[test]
    fn test_tree_walk_translates_through_line_map() {
        let mut code = ExpandedCode::default();
        code.push_line(
            "def f(h: Int): Boolean = HEIGHT > h",
            SourceLocation {
                original_file: "lib/f.es".into(),
                original_line: 4,
                original_column: 1,
                import_chain: vec!["main.es".into(), "lib/f.es".into()],
            },
        );
        code.push_line(
            "f(1)",
            SourceLocation {
                original_file: "main.es".into(),
                original_line: 2,
                original_column: 1,
                import_chain: vec!["main.es".into()],
            },
        );
        let map = map_expression_tree(&tree(&code.code), Some(&code), "main.es");
        let gt = &map.all_by_operation("GT")[0];
        assert_eq!(gt.source_pos.file, "lib/f.es");
        assert_eq!(gt.source_pos.line, 4);
        assert_eq!(gt.expanded_line, Some(1));
        let apply = &map.all_by_operation("Apply")[0];
        assert_eq!(apply.source_pos.file, "main.es");
    }

    #[test]
    fn test_nearest_expanded_line_with_first_registered_tie() {
        let map = scan_source("a > 1\n\nb > 2\nc > 3", "m.es");
        assert_eq!(map.by_operation_and_position("GT", 1).unwrap().line, 1);
        assert_eq!(map.by_operation_and_position("GT", 2).unwrap().line, 1);
        assert_eq!(map.by_operation_and_position("GT", 4).unwrap().line, 4);
        assert!(map.by_operation_and_position("LT", 1).is_none());
        assert_eq!(map.by_type_near_line("GT", 3).unwrap().line, 3);
    }

    #[test]
    fn test_exact_and_hash_lookup() {
        let map = scan_source("HEIGHT > 1", "m.es");
        assert_eq!(map.exact("GT", 1, 8).unwrap().column, 8);
        assert!(map.exact("GT", 1, 9).is_none());
        let hash = expr_hash("GT", 1, 8);
        assert_eq!(map.by_hash(hash).unwrap().expr_type, "GT");
    }
}
