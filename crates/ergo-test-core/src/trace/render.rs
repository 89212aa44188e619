//! Trace renderers: box-drawing tree, JSON and compact text

use super::{TraceFormat, TracedEvaluation, TracedNode};

/// Default depth bound of the compact form
pub const COMPACT_MAX_DEPTH: usize = 3;

/// Loops with more iterations than this show only the first and last
const MAX_SHOWN_ITERATIONS: usize = 3;

const SNIPPET_WIDTH: usize = 60;

/// Operations the compact form always shows
const SIGNIFICANT_OPERATIONS: &[&str] = &[
    "GT",
    "LT",
    "GE",
    "LE",
    "EQ",
    "NEQ",
    "BinAnd",
    "BinOr",
    "LogicalNot",
    "If",
    "ValDef",
    "BoolToSigmaProp",
    "AND",
    "OR",
];

/// Render in the requested format; `max_depth` bounds tree and compact output.
pub fn render(evaluation: &TracedEvaluation, format: TraceFormat, max_depth: Option<usize>) -> String {
    match format {
        TraceFormat::Tree => render_tree(evaluation, max_depth),
        TraceFormat::Json => render_json(evaluation).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e)),
        TraceFormat::Compact => render_compact(evaluation, max_depth.unwrap_or(COMPACT_MAX_DEPTH)),
    }
}

// ── Tree ──────────────────────────────────────────────────

enum Row<'a> {
    Node(&'a TracedNode),
    Elided(usize),
}

/// Rows shown under a node: its children, then its iterations (bounded)
fn rows(node: &TracedNode) -> Vec<Row<'_>> {
    let mut out: Vec<Row> = node.children.iter().map(Row::Node).collect();
    if let Some(iterations) = &node.loop_iterations {
        if iterations.len() > MAX_SHOWN_ITERATIONS {
            out.push(Row::Node(&iterations[0]));
            out.push(Row::Elided(iterations.len() - 2));
            out.push(Row::Node(&iterations[iterations.len() - 1]));
        } else {
            out.extend(iterations.iter().map(Row::Node));
        }
    }
    out
}

fn label(node: &TracedNode) -> String {
    let name = if node.operation == "Iteration" {
        &node.operation_desc
    } else {
        &node.operation
    };
    let mut line = format!("{} → {} [cost: {}]", name, node.value_str, node.cost);
    if let Some(pos) = &node.source_pos {
        line.push_str(&format!(" [{}:{}]", pos.file, pos.line));
        let snippet = snippet(&pos.source_line);
        if !snippet.is_empty() {
            line.push(' ');
            line.push_str(&snippet);
        }
    }
    line
}

/// Trimmed source text capped at 60 characters
pub fn snippet(source_line: &str) -> String {
    let text = source_line.trim();
    if text.chars().count() > SNIPPET_WIDTH {
        let head: String = text.chars().take(SNIPPET_WIDTH - 3).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

/// Indented box-drawing tree, one node per line.
pub fn render_tree(evaluation: &TracedEvaluation, max_depth: Option<usize>) -> String {
    let root = &evaluation.root_trace;
    let mut out = format!(
        "{} → {} [cost: {}]\n",
        root.operation, evaluation.value_str, evaluation.total_cost
    );
    tree_rows(root, "", 1, max_depth, &mut out);
    out
}

fn tree_rows(node: &TracedNode, prefix: &str, depth: usize, max_depth: Option<usize>, out: &mut String) {
    if max_depth.is_some_and(|max| depth > max) {
        return;
    }
    let rows = rows(node);
    let count = rows.len();
    for (i, row) in rows.into_iter().enumerate() {
        let last = i + 1 == count;
        let connector = if last { "└─ " } else { "├─ " };
        match row {
            Row::Elided(n) => {
                out.push_str(&format!("{}{}… {} more iterations\n", prefix, connector, n));
            }
            Row::Node(child) => {
                out.push_str(&format!("{}{}{}\n", prefix, connector, label(child)));
                let nested = format!("{}{}", prefix, if last { "   " } else { "│  " });
                tree_rows(child, &nested, depth + 1, max_depth, out);
            }
        }
    }
}

// ── JSON ──────────────────────────────────────────────────

/// Pretty-printed JSON of the whole evaluation.
pub fn render_json(evaluation: &TracedEvaluation) -> serde_json::Result<String> {
    serde_json::to_string_pretty(evaluation)
}

/// Parse the output of [`render_json`].
pub fn from_json(text: &str) -> serde_json::Result<TracedEvaluation> {
    serde_json::from_str(text)
}

// ── Compact ───────────────────────────────────────────────

fn is_significant(node: &TracedNode) -> bool {
    SIGNIFICANT_OPERATIONS.contains(&node.operation.as_str())
        || (node.value_type.is_some() && node.value_str != "?")
}

/// Significant nodes only, two spaces of indent per level.
pub fn render_compact(evaluation: &TracedEvaluation, max_depth: usize) -> String {
    let mut out = format!("{} (cost {})\n", evaluation.value_str, evaluation.total_cost);
    for child in &evaluation.root_trace.children {
        compact_rows(child, 1, max_depth, &mut out);
    }
    out
}

fn compact_rows(node: &TracedNode, depth: usize, max_depth: usize, out: &mut String) {
    if depth > max_depth {
        return;
    }
    if is_significant(node) {
        out.push_str(&format!("{}{}: {}\n", "  ".repeat(depth - 1), node.operation, node.value_str));
    }
    for child in node.children.iter().chain(node.loop_iterations.iter().flatten()) {
        compact_rows(child, depth + 1, max_depth, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sourcemap::SourcePosition;

    fn node(op: &str, value: &str, cost: i64) -> TracedNode {
        TracedNode {
            id: 0,
            operation: op.to_string(),
            operation_desc: crate::trace::describe(op).to_string(),
            value: serde_json::json!(value),
            value_str: value.to_string(),
            value_type: Some("Boolean".to_string()),
            cost,
            source_pos: None,
            children: Vec::new(),
            is_loop: false,
            loop_iterations: None,
        }
    }

    fn evaluation(children: Vec<TracedNode>) -> TracedEvaluation {
        let mut root = node("Evaluation", "true", children.iter().map(|c| c.cost).sum());
        root.children = children;
        TracedEvaluation {
            result: true,
            total_cost: root.cost,
            root_trace: root,
            operation_count: 2,
            value_str: "true".to_string(),
            error: None,
            value: None,
        }
    }

    #[test]
    fn test_tree_connectors_and_source() {
        let mut gt = node("GT", "true", 36);
        gt.source_pos = Some(SourcePosition {
            file: "c.es".to_string(),
            line: 3,
            column: 8,
            source_line: "  HEIGHT > 100".to_string(),
        });
        let text = render_tree(&evaluation(vec![node("Height", "150", 26), gt]), None);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Evaluation → true [cost: 62]");
        assert_eq!(lines[1], "├─ Height → 150 [cost: 26]");
        assert_eq!(lines[2], "└─ GT → true [cost: 36] [c.es:3] HEIGHT > 100");
    }

    #[test]
    fn test_long_loops_are_elided() {
        let mut exists = node("Exists", "false", 10);
        exists.is_loop = true;
        exists.loop_iterations = Some(
            (0..5)
                .map(|i| {
                    let mut it = node("Iteration", "false", 1);
                    it.operation_desc = format!("loop iteration {}", i + 1);
                    it
                })
                .collect(),
        );
        let text = render_tree(&evaluation(vec![exists]), None);
        assert!(text.contains("loop iteration 1 → false"));
        assert!(text.contains("… 3 more iterations"));
        assert!(text.contains("loop iteration 5 → false"));
        assert!(!text.contains("loop iteration 3 "));
    }

    #[test]
    fn test_snippet_is_capped() {
        let long = "x".repeat(80);
        let s = snippet(&long);
        assert_eq!(s.chars().count(), 60);
        assert!(s.ends_with("..."));
        assert_eq!(snippet("  short  "), "short");
    }

    #[test]
    fn test_max_depth_limits_tree() {
        let mut outer = node("BinAnd", "true", 5);
        outer.children = vec![node("GT", "true", 1)];
        let text = render_tree(&evaluation(vec![outer]), Some(1));
        assert!(text.contains("BinAnd"));
        assert!(!text.contains("GT"));
    }

    #[test]
    fn test_json_round_trip_preserves_content() {
        let mut gt = node("GT", "true", 36);
        gt.source_pos = Some(SourcePosition {
            file: "c.es".to_string(),
            line: 1,
            column: 8,
            source_line: "HEIGHT > 100".to_string(),
        });
        let original = evaluation(vec![node("Height", "150", 26), gt]);
        let json = render_json(&original).unwrap();
        assert!(json.contains("\"op\": \"GT\""));
        assert!(json.contains("\"text\": \"HEIGHT > 100\""));
        let parsed = from_json(&json).unwrap();
        for (a, b) in original.root_trace.descendants().iter().zip(parsed.root_trace.descendants()) {
            assert_eq!(a.operation, b.operation);
            assert_eq!(a.value, b.value);
            assert_eq!(a.cost, b.cost);
        }
        assert_eq!(parsed.total_cost, original.total_cost);
    }

    #[test]
    fn test_json_round_trip_of_real_evaluation() {
        use crate::context::test_support::sample_context;
        use crate::script::{NetworkPrefix, ReferenceCompiler, ScriptCompiler};
        use crate::sourcemap::map_expression_tree;
        use crate::trace::evaluate_with_trace;

        let source = "val total = OUTPUTS.fold(0L, { (acc: Long, b: Box) => acc + b.value })\ntotal > 1L && SELF.R4[Long].get == 42L";
        let script = ReferenceCompiler.compile(source, NetworkPrefix::Mainnet, 3).unwrap();
        let map = map_expression_tree(&script.tree.root, None, "contract.es");
        let original = evaluate_with_trace(&sample_context(), &script.tree, &map);
        assert!(original.result, "{}", original.value_str);

        let parsed = from_json(&render_json(&original).unwrap()).unwrap();
        assert_eq!(parsed.result, original.result);
        assert_eq!(parsed.total_cost, original.total_cost);
        assert_eq!(parsed.operation_count, original.operation_count);
        assert_eq!(parsed.root_trace.node_count(), original.root_trace.node_count());
        for (a, b) in original.root_trace.descendants().iter().zip(parsed.root_trace.descendants()) {
            assert_eq!(a.operation, b.operation);
            assert_eq!(a.value, b.value);
            assert_eq!(a.value_str, b.value_str);
            assert_eq!(a.cost, b.cost);
            assert_eq!(a.source_pos, b.source_pos);
            assert_eq!(a.is_loop, b.is_loop);
        }
        assert!(parsed.root_trace.descendants().iter().any(|n| n.is_loop));
        assert!(parsed.root_trace.descendants().iter().any(|n| n.source_pos.is_some()));
    }

    #[test]
    fn test_compact_filters_and_bounds_depth() {
        let mut func = node("FuncValue", "<function>", 1);
        func.value_type = None;
        let mut deep = node("BinAnd", "true", 1);
        let mut deeper = node("GT", "true", 1);
        deeper.children = vec![node("LT", "false", 1)];
        deep.children = vec![deeper];
        let mut top = node("If", "true", 1);
        top.children = vec![deep];
        let text = render_compact(&evaluation(vec![func, top]), COMPACT_MAX_DEPTH);
        assert!(!text.contains("FuncValue"));
        assert!(text.contains("If: true"));
        assert!(text.contains("    GT: true"));
        assert!(!text.contains("LT"));
    }
}
