//! Merge of the flat cost trace with the flat value trace
//!
//! The k-th cost entry of an operation pairs with the k-th value entry of
//! the same operation. Both sequences are post-order over the same visits,
//! so the pairing is exact as long as the walk mirrors the evaluator.
//! Nodes evaluated inside a loop body are held back until the loop's own
//! cost entry arrives and are then attached as per-iteration children.

use std::collections::{BTreeMap, HashMap};

use super::walk::{value_type, ValueEntry};
use super::TracedNode;
use crate::script::{CostItem, Value};
use crate::sourcemap::{SourcePosition, SourcePositionMap};

/// Loop id to iteration index to the nodes evaluated in that iteration
type Pending = BTreeMap<usize, BTreeMap<usize, Vec<TracedNode>>>;

pub(super) fn merge(
    cost_trace: &[CostItem],
    values: &[ValueEntry],
    source_map: &SourcePositionMap,
    result: Option<&Value>,
) -> TracedNode {
    let mut by_op: HashMap<&str, Vec<&ValueEntry>> = HashMap::new();
    for entry in values {
        by_op.entry(entry.op).or_default().push(entry);
    }

    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    let mut pending = Pending::new();
    let mut top = Vec::new();

    for item in cost_trace {
        let op = item.op.as_str();
        let counter = occurrences.entry(op).or_insert(0);
        let k = *counter;
        *counter += 1;

        let entry = by_op.get(op).and_then(|candidates| candidates.get(k)).copied();
        let mut node = leaf(item, entry, locate(source_map, op, k, entry));

        if let Some(loop_id) = entry.and_then(|e| e.loop_id) {
            let iterations: Vec<TracedNode> = pending
                .remove(&loop_id)
                .unwrap_or_default()
                .into_iter()
                .map(|(index, nodes)| iteration(index, nodes))
                .collect();
            node.cost += iterations.iter().map(|n| n.cost).sum::<i64>();
            node.loop_iterations = Some(iterations);
        }

        match entry.and_then(|e| e.loop_owner) {
            Some((owner, index)) => pending
                .entry(owner)
                .or_default()
                .entry(index)
                .or_default()
                .push(node),
            None => top.push(node),
        }
    }

    // a loop interrupted by an error never charged its own entry
    for (_, iterations) in pending {
        for (_, nodes) in iterations {
            top.extend(nodes);
        }
    }

    let mut root = TracedNode {
        id: 0,
        operation: "Evaluation".to_string(),
        operation_desc: describe("Evaluation").to_string(),
        value: result.map(Value::to_json).unwrap_or(serde_json::Value::Null),
        value_str: result.map(|v| v.to_string()).unwrap_or_else(|| "?".to_string()),
        value_type: result.and_then(value_type),
        cost: top.iter().map(|n| n.cost).sum(),
        source_pos: None,
        children: top,
        is_loop: false,
        loop_iterations: None,
    };
    number(&mut root, &mut 0);
    root
}

fn leaf(item: &CostItem, entry: Option<&ValueEntry>, source_pos: Option<SourcePosition>) -> TracedNode {
    let (value, value_str, value_type) = match entry {
        Some(e) => (e.value.to_json(), e.value.to_string(), value_type(&e.value)),
        None => (serde_json::Value::Null, "?".to_string(), None),
    };
    TracedNode {
        id: 0,
        operation: item.op.clone(),
        operation_desc: describe(&item.op).to_string(),
        value,
        value_str,
        value_type,
        cost: item.cost,
        source_pos,
        children: Vec::new(),
        is_loop: item.is_loop(),
        loop_iterations: None,
    }
}

/// Exact position first, then nearest line, then the k-th mapping of `op`.
fn locate(
    source_map: &SourcePositionMap,
    op: &str,
    k: usize,
    entry: Option<&ValueEntry>,
) -> Option<SourcePosition> {
    if let Some((line, column)) = entry.and_then(|e| e.line.zip(e.column)) {
        if let Some(pos) = source_map
            .exact(op, line, column)
            .or_else(|| source_map.by_operation_and_position(op, line))
        {
            return Some(pos.clone());
        }
    }
    source_map
        .all_by_operation(op)
        .get(k)
        .map(|m| m.source_pos.clone())
}

fn iteration(index: usize, children: Vec<TracedNode>) -> TracedNode {
    let last = children.last();
    TracedNode {
        id: 0,
        operation: "Iteration".to_string(),
        operation_desc: format!("loop iteration {}", index + 1),
        value: last.map(|n| n.value.clone()).unwrap_or(serde_json::Value::Null),
        value_str: last.map(|n| n.value_str.clone()).unwrap_or_else(|| "?".to_string()),
        value_type: last.and_then(|n| n.value_type.clone()),
        cost: children.iter().map(|n| n.cost).sum(),
        source_pos: None,
        children,
        is_loop: false,
        loop_iterations: None,
    }
}

fn number(node: &mut TracedNode, next: &mut usize) {
    node.id = *next;
    *next += 1;
    for child in node.children.iter_mut() {
        number(child, next);
    }
    for child in node.loop_iterations.iter_mut().flatten() {
        number(child, next);
    }
}

/// Human-readable description of an operation tag
pub fn describe(op: &str) -> &'static str {
    match op {
        "Evaluation" => "contract evaluation",
        "Constant" => "constant",
        "ValUse" => "variable reference",
        "ValDef" => "value binding",
        "BlockValue" => "block",
        "FuncValue" => "lambda",
        "Apply" => "function application",
        "If" => "conditional",
        "Height" => "current block height",
        "Self" => "box being spent",
        "Inputs" => "transaction inputs",
        "Outputs" => "transaction outputs",
        "Context" => "execution context",
        "GT" => "greater than",
        "LT" => "less than",
        "GE" => "greater than or equal",
        "LE" => "less than or equal",
        "EQ" => "equals",
        "NEQ" => "not equals",
        "BinAnd" => "logical and",
        "BinOr" => "logical or",
        "LogicalNot" => "logical not",
        "Negation" => "negation",
        "Plus" => "addition",
        "Minus" => "subtraction",
        "Multiply" => "multiplication",
        "Division" => "division",
        "Modulo" => "remainder",
        "Tuple" => "tuple",
        "ConcreteCollection" => "collection literal",
        "ByIndex" => "element at index",
        "SelectField" => "tuple field",
        "ExtractAmount" => "box value",
        "ExtractScriptBytes" => "box proposition bytes",
        "ExtractId" => "box id",
        "ExtractCreationInfo" => "box creation info",
        "ExtractRegisterAs" => "register read",
        "SizeOf" => "collection size",
        "Map" => "map over collection",
        "Filter" => "filter collection",
        "Fold" => "fold collection",
        "Exists" => "any element matches",
        "ForAll" => "all elements match",
        "FlatMap" => "flat map over collection",
        "Slice" => "collection slice",
        "Append" => "collection append",
        "OptionGet" => "option value",
        "OptionIsDefined" => "option is defined",
        "OptionGetOrElse" => "option value or default",
        "Upcast" => "numeric widening",
        "Downcast" => "numeric narrowing",
        "BoolToSigmaProp" => "boolean to sigma proposition",
        "AND" => "all of",
        "OR" => "any of",
        "Min" => "minimum",
        "Max" => "maximum",
        "CalcBlake2b256" => "blake2b256 hash",
        "CreateProveDlog" => "discrete log proposition",
        "DecodePoint" => "decode group element",
        "LongToByteArray" => "long to bytes",
        "MethodCall" => "method call",
        _ => "operation",
    }
}
