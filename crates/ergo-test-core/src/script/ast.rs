//! Typed expression tree produced by the script compiler
//!
//! Every node carries its operation tag (`op_name`) and, when it was
//! produced from source text, a [`SourceContext`] in expanded-code
//! coordinates. The tags are the names that appear in the evaluator's cost
//! trace, so the source mapper, the value walk and the cost trace all agree
//! on what a node is called.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Position of a node in the compiled (expanded) source
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceContext {
    pub line: usize,
    pub column: usize,
    pub source_line: String,
}

/// Script types, as written in annotations
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SType {
    Unit,
    Boolean,
    Byte,
    Int,
    Long,
    BigInt,
    GroupElement,
    SigmaProp,
    Box,
    PreHeader,
    Context,
    Coll(Box<SType>),
    Option(Box<SType>),
    Tuple(Vec<SType>),
    Func(Vec<SType>, Box<SType>),
    Any,
}

impl std::fmt::Display for SType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SType::Unit => write!(f, "Unit"),
            SType::Boolean => write!(f, "Boolean"),
            SType::Byte => write!(f, "Byte"),
            SType::Int => write!(f, "Int"),
            SType::Long => write!(f, "Long"),
            SType::BigInt => write!(f, "BigInt"),
            SType::GroupElement => write!(f, "GroupElement"),
            SType::SigmaProp => write!(f, "SigmaProp"),
            SType::Box => write!(f, "Box"),
            SType::PreHeader => write!(f, "PreHeader"),
            SType::Context => write!(f, "Context"),
            SType::Coll(t) => write!(f, "Coll[{}]", t),
            SType::Option(t) => write!(f, "Option[{}]", t),
            SType::Tuple(items) => {
                let parts: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            SType::Func(args, ret) => {
                let parts: Vec<String> = args.iter().map(|t| t.to_string()).collect();
                write!(f, "({}) => {}", parts.join(", "), ret)
            }
            SType::Any => write!(f, "Any"),
        }
    }
}

/// Context-level global variables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalVar {
    Height,
    SelfBox,
    Inputs,
    Outputs,
    Context,
}

impl GlobalVar {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "HEIGHT" => Some(GlobalVar::Height),
            "SELF" => Some(GlobalVar::SelfBox),
            "INPUTS" => Some(GlobalVar::Inputs),
            "OUTPUTS" => Some(GlobalVar::Outputs),
            "CONTEXT" => Some(GlobalVar::Context),
            _ => None,
        }
    }

    pub fn op_name(self) -> &'static str {
        match self {
            GlobalVar::Height => "Height",
            GlobalVar::SelfBox => "Self",
            GlobalVar::Inputs => "Inputs",
            GlobalVar::Outputs => "Outputs",
            GlobalVar::Context => "Context",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Neq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Division,
    Modulo,
}

impl BinOp {
    pub fn op_name(self) -> &'static str {
        match self {
            BinOp::Gt => "GT",
            BinOp::Lt => "LT",
            BinOp::Ge => "GE",
            BinOp::Le => "LE",
            BinOp::Eq => "EQ",
            BinOp::Neq => "NEQ",
            BinOp::And => "BinAnd",
            BinOp::Or => "BinOr",
            BinOp::Plus => "Plus",
            BinOp::Minus => "Minus",
            BinOp::Multiply => "Multiply",
            BinOp::Division => "Division",
            BinOp::Modulo => "Modulo",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Gt => ">",
            BinOp::Lt => "<",
            BinOp::Ge => ">=",
            BinOp::Le => "<=",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Plus => "+",
            BinOp::Minus => "-",
            BinOp::Multiply => "*",
            BinOp::Division => "/",
            BinOp::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
}

impl UnaryOp {
    pub fn op_name(self) -> &'static str {
        match self {
            UnaryOp::Not => "LogicalNot",
            UnaryOp::Negate => "Negation",
        }
    }
}

/// Global functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    SigmaProp,
    AllOf,
    AnyOf,
    Min,
    Max,
    Blake2b256,
    ProveDlog,
    DecodePoint,
    LongToByteArray,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sigmaProp" => Some(Builtin::SigmaProp),
            "allOf" => Some(Builtin::AllOf),
            "anyOf" => Some(Builtin::AnyOf),
            "min" => Some(Builtin::Min),
            "max" => Some(Builtin::Max),
            "blake2b256" => Some(Builtin::Blake2b256),
            "proveDlog" => Some(Builtin::ProveDlog),
            "decodePoint" => Some(Builtin::DecodePoint),
            "longToByteArray" => Some(Builtin::LongToByteArray),
            _ => None,
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Builtin::Min | Builtin::Max => 2,
            _ => 1,
        }
    }

    pub fn op_name(self) -> &'static str {
        match self {
            Builtin::SigmaProp => "BoolToSigmaProp",
            Builtin::AllOf => "AND",
            Builtin::AnyOf => "OR",
            Builtin::Min => "Min",
            Builtin::Max => "Max",
            Builtin::Blake2b256 => "CalcBlake2b256",
            Builtin::ProveDlog => "CreateProveDlog",
            Builtin::DecodePoint => "DecodePoint",
            Builtin::LongToByteArray => "LongToByteArray",
        }
    }
}

/// Members reachable with `obj.name` / `obj.name(args)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MethodKind {
    // Box
    Value,
    PropositionBytes,
    Id,
    Tokens,
    CreationInfo,
    Register(u8, SType),
    // Coll
    Size,
    IsEmpty,
    NonEmpty,
    Map,
    Filter,
    Fold,
    Exists,
    ForAll,
    FlatMap,
    Indices,
    Slice,
    Append,
    CollGetOrElse,
    CollGet,
    Reverse,
    // Option
    OptionGet,
    OptionIsDefined,
    OptionGetOrElse,
    // Numeric conversions
    ToByte,
    ToInt,
    ToLong,
    ToBigInt,
    // Context
    DataInputs,
    PreHeader,
    SelfBoxIndex,
    // PreHeader
    HeaderHeight,
    Timestamp,
    Version,
    NBits,
    MinerPk,
    ParentId,
    Votes,
}

impl MethodKind {
    /// Resolve a member name given the number of call arguments.
    pub fn resolve(name: &str, arg_count: usize) -> Option<Self> {
        let kind = match (name, arg_count) {
            ("value", 0) => MethodKind::Value,
            ("propositionBytes", 0) => MethodKind::PropositionBytes,
            ("id", 0) => MethodKind::Id,
            ("tokens", 0) => MethodKind::Tokens,
            ("creationInfo", 0) => MethodKind::CreationInfo,
            ("size", 0) => MethodKind::Size,
            ("isEmpty", 0) => MethodKind::IsEmpty,
            ("nonEmpty", 0) => MethodKind::NonEmpty,
            ("map", 1) => MethodKind::Map,
            ("filter", 1) => MethodKind::Filter,
            ("fold", 2) => MethodKind::Fold,
            ("exists", 1) => MethodKind::Exists,
            ("forall", 1) => MethodKind::ForAll,
            ("flatMap", 1) => MethodKind::FlatMap,
            ("indices", 0) => MethodKind::Indices,
            ("slice", 2) => MethodKind::Slice,
            ("append", 1) => MethodKind::Append,
            ("getOrElse", 2) => MethodKind::CollGetOrElse,
            ("get", 1) => MethodKind::CollGet,
            ("reverse", 0) => MethodKind::Reverse,
            ("get", 0) => MethodKind::OptionGet,
            ("isDefined", 0) => MethodKind::OptionIsDefined,
            ("getOrElse", 1) => MethodKind::OptionGetOrElse,
            ("toByte", 0) => MethodKind::ToByte,
            ("toInt", 0) => MethodKind::ToInt,
            ("toLong", 0) => MethodKind::ToLong,
            ("toBigInt", 0) => MethodKind::ToBigInt,
            ("dataInputs", 0) => MethodKind::DataInputs,
            ("preHeader", 0) => MethodKind::PreHeader,
            ("selfBoxIndex", 0) => MethodKind::SelfBoxIndex,
            ("height", 0) => MethodKind::HeaderHeight,
            ("timestamp", 0) => MethodKind::Timestamp,
            ("version", 0) => MethodKind::Version,
            ("nBits", 0) => MethodKind::NBits,
            ("minerPk", 0) => MethodKind::MinerPk,
            ("parentId", 0) => MethodKind::ParentId,
            ("votes", 0) => MethodKind::Votes,
            _ => return None,
        };
        Some(kind)
    }

    pub fn op_name(&self) -> &'static str {
        match self {
            MethodKind::Value => "ExtractAmount",
            MethodKind::PropositionBytes => "ExtractScriptBytes",
            MethodKind::Id => "ExtractId",
            MethodKind::CreationInfo => "ExtractCreationInfo",
            MethodKind::Register(..) => "ExtractRegisterAs",
            MethodKind::Size => "SizeOf",
            MethodKind::Map => "Map",
            MethodKind::Filter => "Filter",
            MethodKind::Fold => "Fold",
            MethodKind::Exists => "Exists",
            MethodKind::ForAll => "ForAll",
            MethodKind::FlatMap => "FlatMap",
            MethodKind::Slice => "Slice",
            MethodKind::Append => "Append",
            MethodKind::CollGetOrElse => "ByIndex",
            MethodKind::OptionGet => "OptionGet",
            MethodKind::OptionIsDefined => "OptionIsDefined",
            MethodKind::OptionGetOrElse => "OptionGetOrElse",
            MethodKind::ToLong | MethodKind::ToBigInt => "Upcast",
            MethodKind::ToByte | MethodKind::ToInt => "Downcast",
            _ => "MethodCall",
        }
    }

    /// Methods that iterate a collection with a lambda argument.
    pub fn is_loop(&self) -> bool {
        matches!(
            self,
            MethodKind::Map
                | MethodKind::Filter
                | MethodKind::Fold
                | MethodKind::Exists
                | MethodKind::ForAll
                | MethodKind::FlatMap
        )
    }

    /// Methods only available from script version 3 on.
    pub fn min_version(&self) -> u8 {
        match self {
            MethodKind::CollGet | MethodKind::Reverse => 3,
            _ => 0,
        }
    }
}

/// Lambda parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub tpe: SType,
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub source: Option<SourceContext>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Const(Value),
    ValUse(String),
    Global(GlobalVar),
    /// Sequence of `ValDef` items followed by a result expression
    Block {
        items: Vec<Expr>,
        result: Box<Expr>,
    },
    ValDef {
        name: String,
        rhs: Box<Expr>,
    },
    Lambda {
        params: Vec<Param>,
        body: Arc<Expr>,
    },
    Apply {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Tuple(Vec<Expr>),
    Coll(Vec<Expr>),
    ByIndex {
        coll: Box<Expr>,
        index: Box<Expr>,
    },
    SelectField {
        obj: Box<Expr>,
        index: usize,
    },
    Method {
        obj: Box<Expr>,
        method: MethodKind,
        args: Vec<Expr>,
    },
    Builtin {
        func: Builtin,
        args: Vec<Expr>,
    },
}

impl Expr {
    pub fn new(kind: ExprKind, source: Option<SourceContext>) -> Self {
        Expr { kind, source }
    }

    /// Operation tag, as reported in the cost trace.
    pub fn op_name(&self) -> &'static str {
        match &self.kind {
            ExprKind::Const(_) => "Constant",
            ExprKind::ValUse(_) => "ValUse",
            ExprKind::Global(g) => g.op_name(),
            ExprKind::Block { .. } => "BlockValue",
            ExprKind::ValDef { .. } => "ValDef",
            ExprKind::Lambda { .. } => "FuncValue",
            ExprKind::Apply { .. } => "Apply",
            ExprKind::If { .. } => "If",
            ExprKind::Binary { op, .. } => op.op_name(),
            ExprKind::Unary { op, .. } => op.op_name(),
            ExprKind::Tuple(_) => "Tuple",
            ExprKind::Coll(_) => "ConcreteCollection",
            ExprKind::ByIndex { .. } => "ByIndex",
            ExprKind::SelectField { .. } => "SelectField",
            ExprKind::Method { method, .. } => method.op_name(),
            ExprKind::Builtin { func, .. } => func.op_name(),
        }
    }

    /// Direct children in evaluation order.
    ///
    /// Lambda bodies are not children: they run only when applied.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Const(_)
            | ExprKind::ValUse(_)
            | ExprKind::Global(_)
            | ExprKind::Lambda { .. } => Vec::new(),
            ExprKind::Block { items, result } => {
                let mut out: Vec<&Expr> = items.iter().collect();
                out.push(result);
                out
            }
            ExprKind::ValDef { rhs, .. } => vec![rhs],
            ExprKind::Apply { func, args } => {
                let mut out: Vec<&Expr> = vec![func];
                out.extend(args.iter());
                out
            }
            ExprKind::If {
                cond,
                then_branch,
                else_branch,
            } => vec![cond, then_branch, else_branch],
            ExprKind::Binary { left, right, .. } => vec![left, right],
            ExprKind::Unary { operand, .. } => vec![operand],
            ExprKind::Tuple(items) | ExprKind::Coll(items) => items.iter().collect(),
            ExprKind::ByIndex { coll, index } => vec![coll, index],
            ExprKind::SelectField { obj, .. } => vec![obj],
            ExprKind::Method { obj, args, .. } => {
                let mut out: Vec<&Expr> = vec![obj];
                out.extend(args.iter());
                out
            }
            ExprKind::Builtin { args, .. } => args.iter().collect(),
        }
    }

    pub fn line(&self) -> Option<usize> {
        self.source.as_ref().map(|s| s.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_resolution_depends_on_arity() {
        assert_eq!(MethodKind::resolve("get", 0), Some(MethodKind::OptionGet));
        assert_eq!(MethodKind::resolve("get", 1), Some(MethodKind::CollGet));
        assert_eq!(
            MethodKind::resolve("getOrElse", 1),
            Some(MethodKind::OptionGetOrElse)
        );
        assert_eq!(
            MethodKind::resolve("getOrElse", 2),
            Some(MethodKind::CollGetOrElse)
        );
        assert_eq!(MethodKind::resolve("frobnicate", 0), None);
    }

    #[test]
    fn test_loop_methods() {
        for name in ["map", "filter", "exists", "forall", "flatMap"] {
            assert!(MethodKind::resolve(name, 1).unwrap().is_loop(), "{}", name);
        }
        assert!(MethodKind::resolve("fold", 2).unwrap().is_loop());
        assert!(!MethodKind::Size.is_loop());
    }

    #[test]
    fn test_version_gated_methods() {
        assert_eq!(MethodKind::CollGet.min_version(), 3);
        assert_eq!(MethodKind::Reverse.min_version(), 3);
        assert_eq!(MethodKind::Size.min_version(), 0);
    }

    #[test]
    fn test_stype_display() {
        let t = SType::Coll(Box::new(SType::Tuple(vec![SType::Int, SType::Long])));
        assert_eq!(t.to_string(), "Coll[(Int, Long)]");
    }

    #[test]
    fn test_children_skip_lambda_body() {
        let body = Arc::new(Expr::new(ExprKind::Global(GlobalVar::Height), None));
        let lambda = Expr::new(
            ExprKind::Lambda {
                params: vec![],
                body,
            },
            None,
        );
        assert!(lambda.children().is_empty());
        assert_eq!(lambda.op_name(), "FuncValue");
    }
}
