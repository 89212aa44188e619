//! Tracing Evaluator
//!
//! Runs a compiled tree twice over: once through the evaluator with cost
//! tracing on, and once as a value walk ([`walk::value_trace`]) that records
//! what every visited node evaluated to. The two flat sequences are merged
//! by occurrence index into a [`TracedNode`] tree under a synthetic
//! `Evaluation` root.
//!
//! # Failure semantics
//!
//! A failing evaluation still produces a trace. The result is `false`, the
//! value string embeds the error, and every cost entry recorded before the
//! failure is kept.

mod merge;
pub mod render;
pub mod walk;

use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;
use crate::script::{Env, ErgoTree, Interpreter, ScriptEvaluator, Value, VersionScope};
use crate::sourcemap::{SourcePosition, SourcePositionMap};

pub use merge::describe;
pub use render::{from_json, render, render_compact, render_json, render_tree, COMPACT_MAX_DEPTH};

// ── Trace model ───────────────────────────────────────────

/// One node of a rendered trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedNode {
    /// Sequence-assigned, pre-order from the root
    pub id: usize,
    #[serde(rename = "op")]
    pub operation: String,
    #[serde(rename = "desc")]
    pub operation_desc: String,
    pub value: serde_json::Value,
    pub value_str: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    pub cost: i64,
    #[serde(rename = "source", default, skip_serializing_if = "Option::is_none")]
    pub source_pos: Option<SourcePosition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TracedNode>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_loop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_iterations: Option<Vec<TracedNode>>,
}

impl TracedNode {
    /// Number of nodes in this subtree, iterations included
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .chain(self.loop_iterations.iter().flatten())
            .map(TracedNode::node_count)
            .sum::<usize>()
    }

    /// This node and its descendants in pre-order, iterations after children
    pub fn descendants(&self) -> Vec<&TracedNode> {
        let mut out = vec![self];
        for child in self.children.iter().chain(self.loop_iterations.iter().flatten()) {
            out.extend(child.descendants());
        }
        out
    }
}

/// Outcome of one traced evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedEvaluation {
    /// True when the tree reduced to `true` or a trivially true proposition
    pub result: bool,
    pub root_trace: TracedNode,
    pub total_cost: i64,
    /// Number of cost trace entries
    pub operation_count: usize,
    pub value_str: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Reduced value, when evaluation succeeded
    #[serde(skip)]
    pub value: Option<Value>,
}

/// Output shape for rendered traces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    #[default]
    Tree,
    Json,
    Compact,
}

impl std::str::FromStr for TraceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tree" => Ok(TraceFormat::Tree),
            "json" => Ok(TraceFormat::Json),
            "compact" => Ok(TraceFormat::Compact),
            other => Err(format!("unknown trace format '{}' (expected tree, json or compact)", other)),
        }
    }
}

impl std::fmt::Display for TraceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            TraceFormat::Tree => write!(f, "tree"),
            TraceFormat::Json => write!(f, "json"),
            TraceFormat::Compact => write!(f, "compact"),
        }
    }
}

// ── Evaluator ─────────────────────────────────────────────

/// Evaluates compiled trees and returns merged traces
#[derive(Debug, Default)]
pub struct TracingEvaluator<E: ScriptEvaluator = Interpreter> {
    evaluator: E,
}

impl<E: ScriptEvaluator> TracingEvaluator<E> {
    pub fn new(evaluator: E) -> Self {
        TracingEvaluator { evaluator }
    }

    /// Evaluate `tree` against `ctx` under the context's script version.
    #[tracing::instrument(level = "debug", skip_all, fields(version = ctx.script_version))]
    pub fn evaluate(
        &mut self,
        ctx: &ExecutionContext,
        tree: &ErgoTree,
        source_map: &SourcePositionMap,
        env: &Env,
    ) -> TracedEvaluation {
        let _scope = VersionScope::enter(ctx.script_version);

        self.evaluator.clear_cost_trace();
        self.evaluator.set_cost_tracing(true);
        let outcome = self.evaluator.reduce(ctx, tree, env);
        let cost_trace = self.evaluator.take_cost_trace();
        self.evaluator.set_cost_tracing(false);
        let total_cost = self.evaluator.spent_cost();

        let values = walk::value_trace(&self.evaluator, ctx, &tree.root, env);
        let root_trace = merge::merge(&cost_trace, &values, source_map, outcome.as_ref().ok());

        let (result, value_str, error, value) = match outcome {
            Ok(v) => (v.is_provable(), v.to_string(), None, Some(v)),
            Err(e) => {
                tracing::debug!(error = %e, recorded = cost_trace.len(), "traced evaluation failed");
                (false, format!("Error: {}", e), Some(e.to_string()), None)
            }
        };

        TracedEvaluation {
            result,
            root_trace,
            total_cost,
            operation_count: cost_trace.len(),
            value_str,
            error,
            value,
        }
    }
}

/// Trace `tree` with the reference evaluator and an empty environment.
pub fn evaluate_with_trace(
    ctx: &ExecutionContext,
    tree: &ErgoTree,
    source_map: &SourcePositionMap,
) -> TracedEvaluation {
    TracingEvaluator::new(Interpreter::new()).evaluate(ctx, tree, source_map, &Env::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_support::sample_context;
    use crate::script::{NetworkPrefix, ReferenceCompiler, ScriptCompiler};
    use crate::sourcemap::map_expression_tree;

    fn compile(source: &str) -> (ErgoTree, SourcePositionMap) {
        let script = ReferenceCompiler
            .compile(source, NetworkPrefix::Mainnet, 3)
            .unwrap();
        let map = map_expression_tree(&script.tree.root, None, "contract.es");
        (script.tree, map)
    }

    #[test]
    fn test_root_cost_is_sum_of_children() {
        let (tree, map) = compile("HEIGHT > 100 && SELF.value > 0L");
        let traced = evaluate_with_trace(&sample_context(), &tree, &map);
        assert!(traced.result);
        let sum: i64 = traced.root_trace.children.iter().map(|c| c.cost).sum();
        assert_eq!(traced.root_trace.cost, sum);
        assert_eq!(traced.root_trace.cost, traced.total_cost);
        assert_eq!(traced.root_trace.operation, "Evaluation");
        assert_eq!(traced.root_trace.id, 0);
    }

    #[test]
    fn test_nodes_carry_values_and_positions() {
        let (tree, map) = compile("HEIGHT > 100");
        let traced = evaluate_with_trace(&sample_context(), &tree, &map);
        let gt = traced
            .root_trace
            .children
            .iter()
            .find(|n| n.operation == "GT")
            .unwrap();
        assert_eq!(gt.value_str, "true");
        assert_eq!(gt.value, serde_json::json!(true));
        assert_eq!(gt.value_type.as_deref(), Some("Boolean"));
        let pos = gt.source_pos.as_ref().unwrap();
        assert_eq!((pos.file.as_str(), pos.line, pos.column), ("contract.es", 1, 8));
        let height = &traced.root_trace.children[0];
        assert_eq!(height.value_str, "150");
    }

    #[test]
    fn test_repeated_operations_align_by_occurrence() {
        let (tree, map) = compile("HEIGHT > 100 && HEIGHT > 200");
        let traced = evaluate_with_trace(&sample_context(), &tree, &map);
        let gts: Vec<&TracedNode> = traced
            .root_trace
            .children
            .iter()
            .filter(|n| n.operation == "GT")
            .collect();
        assert_eq!(gts.len(), 2);
        assert_eq!(gts[0].value_str, "true");
        assert_eq!(gts[1].value_str, "false");
        assert_eq!(gts[0].source_pos.as_ref().unwrap().column, 8);
        assert_eq!(gts[1].source_pos.as_ref().unwrap().column, 24);
        assert!(!traced.result);
    }

    #[test]
    fn test_short_circuit_right_side_not_traced() {
        let (tree, map) = compile("false && SELF.value > 0L");
        let traced = evaluate_with_trace(&sample_context(), &tree, &map);
        let ops: Vec<&str> = traced
            .root_trace
            .children
            .iter()
            .map(|n| n.operation.as_str())
            .collect();
        assert_eq!(ops, vec!["Constant", "BinAnd"]);
    }

    #[test]
    fn test_loop_iterations_are_nested() {
        let (tree, map) = compile("INPUTS.forall { (b: Box) => b.value > 1L }");
        let traced = evaluate_with_trace(&sample_context(), &tree, &map);
        assert!(traced.result);
        let forall = traced
            .root_trace
            .children
            .iter()
            .find(|n| n.operation == "ForAll")
            .unwrap();
        assert!(forall.is_loop);
        let iterations = forall.loop_iterations.as_ref().unwrap();
        assert_eq!(iterations.len(), 1);
        assert_eq!(iterations[0].children.len(), 4);
        assert!(traced.root_trace.children.iter().all(|n| n.operation != "ExtractAmount"));
        let sum: i64 = traced.root_trace.children.iter().map(|c| c.cost).sum();
        assert_eq!(sum, traced.total_cost);
    }

    #[test]
    fn test_failure_keeps_partial_trace() {
        let (tree, map) = compile("HEIGHT > 1 && SELF.R5[Int].get > 0");
        let traced = evaluate_with_trace(&sample_context(), &tree, &map);
        assert!(!traced.result);
        assert!(traced.value_str.starts_with("Error: "));
        assert!(traced.error.is_some());
        assert!(traced.operation_count > 0);
        assert!(!traced.root_trace.children.is_empty());
    }

    #[test]
    fn test_trace_format_parsing() {
        assert_eq!("tree".parse::<TraceFormat>(), Ok(TraceFormat::Tree));
        assert_eq!("JSON".parse::<TraceFormat>(), Ok(TraceFormat::Json));
        assert_eq!("compact".parse::<TraceFormat>(), Ok(TraceFormat::Compact));
        assert!("xml".parse::<TraceFormat>().is_err());
        assert_eq!(TraceFormat::Compact.to_string(), "compact");
    }

    #[test]
    fn test_determinism_100_iterations() {
        let (tree, map) = compile(
            "OUTPUTS.fold(0L, { (acc: Long, b: Box) => acc + b.value }) > 0L && HEIGHT > 10",
        );
        let ctx = sample_context();
        let first = evaluate_with_trace(&ctx, &tree, &map);
        for _ in 0..100 {
            let again = evaluate_with_trace(&ctx, &tree, &map);
            assert_eq!(again.result, first.result);
            assert_eq!(again.total_cost, first.total_cost);
            assert_eq!(again.operation_count, first.operation_count);
            assert_eq!(again.root_trace, first.root_trace);
        }
    }
}
