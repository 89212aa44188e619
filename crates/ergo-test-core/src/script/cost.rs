//! Cost model and cost trace entries
//!
//! Every operation is charged once, after its operands have been evaluated.
//! The charge depends on the operation's [`CostKind`].

use serde::{Deserialize, Serialize};

/// Default per-evaluation cost budget
pub const DEFAULT_COST_LIMIT: i64 = 1_000_000;

/// Sequence-costed operations reported as loops in traces
pub const LOOP_OPERATIONS: [&str; 6] = ["Fold", "Map", "Filter", "Exists", "ForAll", "FlatMap"];

/// How an operation's cost is computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostKind {
    Fixed(i64),
    /// `big` applies when the operand is a BigInt
    TypeBased { primitive: i64, big: i64 },
    /// `base + per_chunk * ceil(n / chunk_size)`
    PerItem {
        base: i64,
        per_chunk: i64,
        chunk_size: usize,
    },
}

impl CostKind {
    pub fn per_item(base: i64, per_chunk: i64, chunk_size: usize) -> Self {
        CostKind::PerItem {
            base,
            per_chunk,
            chunk_size,
        }
    }
}

/// Kind recorded in a cost trace entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum CostItemKind {
    FixedCost,
    TypeBasedCost { tpe: String },
    SeqCost { n_items: usize },
}

/// One entry of the evaluator's cost trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostItem {
    pub op: String,
    #[serde(flatten)]
    pub kind: CostItemKind,
    pub cost: i64,
}

impl CostItem {
    /// True for sequence-costed iteration operations.
    pub fn is_loop(&self) -> bool {
        matches!(self.kind, CostItemKind::SeqCost { .. })
            && LOOP_OPERATIONS.contains(&self.op.as_str())
    }

    pub fn n_items(&self) -> Option<usize> {
        match self.kind {
            CostItemKind::SeqCost { n_items } => Some(n_items),
            _ => None,
        }
    }
}

/// Cost table by operation tag
pub fn cost_of(op: &str) -> CostKind {
    match op {
        "Constant" | "ValUse" | "Context" => CostKind::Fixed(5),
        "Height" => CostKind::Fixed(26),
        "Self" | "Inputs" | "Outputs" => CostKind::Fixed(10),
        "ValDef" | "BlockValue" => CostKind::Fixed(1),
        "FuncValue" => CostKind::Fixed(5),
        "Apply" => CostKind::Fixed(20),
        "If" => CostKind::Fixed(10),
        "BinAnd" | "BinOr" => CostKind::Fixed(20),
        "LogicalNot" => CostKind::Fixed(15),
        "Negation" => CostKind::TypeBased {
            primitive: 30,
            big: 40,
        },
        "GT" | "LT" | "GE" | "LE" => CostKind::TypeBased {
            primitive: 36,
            big: 42,
        },
        "EQ" | "NEQ" => CostKind::TypeBased {
            primitive: 3,
            big: 6,
        },
        "Plus" | "Minus" => CostKind::TypeBased {
            primitive: 36,
            big: 50,
        },
        "Multiply" => CostKind::TypeBased {
            primitive: 40,
            big: 60,
        },
        "Division" | "Modulo" => CostKind::TypeBased {
            primitive: 40,
            big: 70,
        },
        "Min" | "Max" => CostKind::TypeBased {
            primitive: 5,
            big: 10,
        },
        "Upcast" | "Downcast" => CostKind::TypeBased {
            primitive: 10,
            big: 30,
        },
        "Tuple" | "SelectField" => CostKind::Fixed(10),
        "ConcreteCollection" => CostKind::per_item(20, 1, 10),
        "ByIndex" => CostKind::Fixed(30),
        "SizeOf" => CostKind::Fixed(14),
        "ExtractAmount" | "ExtractScriptBytes" | "ExtractId" => CostKind::Fixed(12),
        "ExtractCreationInfo" => CostKind::Fixed(16),
        "ExtractRegisterAs" => CostKind::Fixed(50),
        "OptionGet" | "OptionIsDefined" | "OptionGetOrElse" => CostKind::Fixed(15),
        "BoolToSigmaProp" => CostKind::Fixed(15),
        "AND" | "OR" => CostKind::per_item(10, 5, 32),
        "CalcBlake2b256" => CostKind::per_item(20, 7, 128),
        "CreateProveDlog" => CostKind::Fixed(10),
        "DecodePoint" => CostKind::Fixed(300),
        "LongToByteArray" => CostKind::Fixed(17),
        "Map" | "Filter" => CostKind::per_item(20, 1, 10),
        "Fold" | "Exists" | "ForAll" => CostKind::per_item(3, 1, 10),
        "FlatMap" => CostKind::per_item(60, 10, 8),
        "Slice" | "Append" => CostKind::per_item(10, 2, 100),
        _ => CostKind::Fixed(10),
    }
}

/// Compute the charge for `op` given the operand type and item count.
pub fn charge(op: &str, operand_type: &str, n_items: usize) -> (CostItemKind, i64) {
    match cost_of(op) {
        CostKind::Fixed(cost) => (CostItemKind::FixedCost, cost),
        CostKind::TypeBased { primitive, big } => {
            let cost = if operand_type == "BigInt" { big } else { primitive };
            (
                CostItemKind::TypeBasedCost {
                    tpe: operand_type.to_string(),
                },
                cost,
            )
        }
        CostKind::PerItem {
            base,
            per_chunk,
            chunk_size,
        } => {
            let chunks = n_items.div_ceil(chunk_size.max(1)) as i64;
            (CostItemKind::SeqCost { n_items }, base + per_chunk * chunks)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_charge() {
        assert_eq!(charge("Height", "Int", 0), (CostItemKind::FixedCost, 26));
    }

    #[test]
    fn test_type_based_charge() {
        let (kind, cost) = charge("GT", "BigInt", 0);
        assert_eq!(
            kind,
            CostItemKind::TypeBasedCost {
                tpe: "BigInt".into()
            }
        );
        assert_eq!(cost, 42);
        assert_eq!(charge("GT", "Int", 0).1, 36);
    }

    #[test]
    fn test_per_item_charge_rounds_up_chunks() {
        assert_eq!(charge("Fold", "Coll", 0).1, 3);
        assert_eq!(charge("Fold", "Coll", 1).1, 4);
        assert_eq!(charge("Fold", "Coll", 10).1, 4);
        assert_eq!(charge("Fold", "Coll", 11).1, 5);
    }

    #[test]
    fn test_loop_detection_requires_seq_cost() {
        let fold = CostItem {
            op: "Fold".into(),
            kind: CostItemKind::SeqCost { n_items: 3 },
            cost: 4,
        };
        assert!(fold.is_loop());
        assert_eq!(fold.n_items(), Some(3));

        let concrete = CostItem {
            op: "ConcreteCollection".into(),
            kind: CostItemKind::SeqCost { n_items: 3 },
            cost: 21,
        };
        assert!(!concrete.is_loop());

        let fixed_fold = CostItem {
            op: "Fold".into(),
            kind: CostItemKind::FixedCost,
            cost: 1,
        };
        assert!(!fixed_fold.is_loop());
    }

    #[test]
    fn test_cost_item_json_shape() {
        let item = CostItem {
            op: "Exists".into(),
            kind: CostItemKind::SeqCost { n_items: 2 },
            cost: 4,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["op"], "Exists");
        assert_eq!(json["kind"], "seqCost");
        assert_eq!(json["n_items"], 2);
    }
}
