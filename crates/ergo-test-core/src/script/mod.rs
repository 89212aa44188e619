//! Compiler and evaluator seam, plus the reference ErgoScript subset
//!
//! The test engine talks to contract tooling only through two traits:
//!
//! - [`ScriptCompiler`]: source text to a typed expression tree plus an
//!   [`ErgoTree`], or a [`CompileError`] carrying a best-effort position.
//! - [`ScriptEvaluator`]: reduces a tree against an execution context,
//!   optionally recording a cost trace, and evaluates single sub-expressions
//!   in isolation for the value walk.
//!
//! [`ReferenceCompiler`] and [`Interpreter`] implement both for the subset of
//! ErgoScript that contract tests exercise, so the whole pipeline runs
//! without an external toolchain.

pub mod ast;
pub mod cost;
pub mod interpreter;
pub mod parser;
pub mod template;
pub mod tokenizer;
pub mod value;
pub mod version;

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use ast::{Expr, ExprKind, SType, SourceContext};
pub use cost::{CostItem, CostItemKind, DEFAULT_COST_LIMIT};
pub use interpreter::Interpreter;
pub use template::{detect_contract_template, is_contract_template, ContractTemplate};
pub use value::{Env, Value};
pub use version::VersionScope;

use crate::context::ExecutionContext;

/// Script version used when none is requested
pub const DEFAULT_SCRIPT_VERSION: u8 = 3;

/// Highest script version the reference evaluator understands
pub const MAX_SCRIPT_VERSION: u8 = 3;

// ── Errors ─────────────────────────────────────────────────

/// Compiler failure with an optional structured position
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    /// 1-based (line, column) in the compiled text
    pub position: Option<(usize, usize)>,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> Self {
        CompileError {
            message: message.into(),
            position: None,
        }
    }

    pub fn at(message: impl Into<String>, line: usize, column: usize) -> Self {
        CompileError {
            message: message.into(),
            position: Some((line, column)),
        }
    }

    /// Structured position, else one scraped from the message text.
    ///
    /// Recognises `line N`, `line N, column M` and `N:M`.
    pub fn position_or_scraped(&self) -> Option<(usize, usize)> {
        if self.position.is_some() {
            return self.position;
        }
        static LINE_COL: OnceLock<Regex> = OnceLock::new();
        static LINE_WORD: OnceLock<Regex> = OnceLock::new();
        let line_col = LINE_COL
            .get_or_init(|| Regex::new(r"\b(\d+):(\d+)\b").expect("position regex must compile"));
        let line_word = LINE_WORD.get_or_init(|| {
            Regex::new(r"(?i)line\s+(\d+)(?:\s*,\s*column\s+(\d+))?")
                .expect("line regex must compile")
        });

        if let Some(caps) = line_word.captures(&self.message) {
            let line = caps.get(1)?.as_str().parse().ok()?;
            let column = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(1);
            return Some((line, column));
        }
        let caps = line_col.captures(&self.message)?;
        Some((caps[1].parse().ok()?, caps[2].parse().ok()?))
    }
}

/// Evaluator failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("cost limit {limit} exceeded (spent {spent})")]
    CostLimitExceeded { limit: i64, spent: i64 },

    #[error("unbound variable '{0}'")]
    UnboundVariable(String),

    #[error("type mismatch in {op}: {message}")]
    TypeMismatch { op: String, message: String },

    #[error("index {index} out of bounds for collection of size {size}")]
    IndexOutOfBounds { index: i64, size: usize },

    #[error("get on empty Option")]
    NoneGet,

    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("no active script version; evaluation must run inside a version scope")]
    MissingVersion,

    #[error("{method} requires script version {required}, active version is {active}")]
    UnsupportedInVersion {
        method: String,
        required: u8,
        active: u8,
    },

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl EvalError {
    pub fn type_mismatch(op: &str, message: impl Into<String>) -> Self {
        EvalError::TypeMismatch {
            op: op.to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::CostLimitExceeded { .. } => "CostLimitExceeded",
            EvalError::UnboundVariable(_) => "UnboundVariable",
            EvalError::TypeMismatch { .. } => "TypeMismatch",
            EvalError::IndexOutOfBounds { .. } => "IndexOutOfBounds",
            EvalError::NoneGet => "NoneGet",
            EvalError::ArithmeticOverflow(_) => "ArithmeticOverflow",
            EvalError::DivisionByZero => "DivisionByZero",
            EvalError::MissingVersion => "MissingVersion",
            EvalError::UnsupportedInVersion { .. } => "UnsupportedInVersion",
            EvalError::Unsupported(_) => "Unsupported",
        }
    }
}

// ── Compiled artifacts ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkPrefix {
    #[default]
    Mainnet,
    Testnet,
}

/// Compiled guard script: the expression tree and its byte fingerprint
#[derive(Debug, Clone, PartialEq)]
pub struct ErgoTree {
    pub version: u8,
    pub root: Arc<Expr>,
    pub bytes: Vec<u8>,
}

impl ErgoTree {
    /// Header byte: constant segregation flag, size flag for v1+, version bits
    fn header(version: u8) -> u8 {
        let size_flag = if version > 0 { 0x08 } else { 0x00 };
        0x10 | size_flag | (version & 0x07)
    }

    pub fn new(version: u8, root: Expr, source: &str) -> Self {
        let mut bytes = vec![Self::header(version)];
        bytes.extend_from_slice(&Sha256::digest(source.as_bytes()));
        ErgoTree {
            version,
            root: Arc::new(root),
            bytes,
        }
    }

    /// Guard that always reduces to `sigmaProp(true)`
    pub fn always_true() -> Self {
        ErgoTree {
            version: 0,
            root: Arc::new(Expr::new(
                ExprKind::Const(Value::SigmaProp(value::SigmaBoolean::TrivialTrue)),
                None,
            )),
            bytes: vec![0x10, 0x01, 0x01, 0x01, 0xd1, 0x73, 0x00],
        }
    }
}

/// Compiler output
#[derive(Debug, Clone)]
pub struct CompiledScript {
    pub tree: ErgoTree,
    pub network: NetworkPrefix,
    /// Where the contract expression starts, `None` for a library-only script
    pub contract_start: Option<(usize, usize)>,
    pub template: Option<ContractTemplate>,
}

impl CompiledScript {
    pub fn has_contract(&self) -> bool {
        self.contract_start.is_some()
    }
}

// ── Seam traits ────────────────────────────────────────────

/// Compile ErgoScript source.
pub trait ScriptCompiler {
    fn compile(
        &self,
        source: &str,
        network: NetworkPrefix,
        version: u8,
    ) -> Result<CompiledScript, CompileError>;
}

/// Reduce compiled trees against an execution context.
///
/// Evaluation requires an active [`VersionScope`].
pub trait ScriptEvaluator {
    /// Drop any cost trace left over from a previous evaluation.
    fn clear_cost_trace(&mut self);

    fn set_cost_tracing(&mut self, enabled: bool);

    /// Reduce the whole tree, charging cost and (when enabled) tracing it.
    fn reduce(
        &mut self,
        ctx: &ExecutionContext,
        tree: &ErgoTree,
        env: &Env,
    ) -> Result<Value, EvalError>;

    /// Evaluate one sub-expression without touching the trace or spent cost.
    fn eval_isolated(
        &self,
        ctx: &ExecutionContext,
        expr: &Expr,
        env: &Env,
    ) -> Result<Value, EvalError>;

    /// Take the cost trace recorded since the last clear.
    fn take_cost_trace(&mut self) -> Vec<CostItem>;

    /// Cost spent by the last `reduce`.
    fn spent_cost(&self) -> i64;
}

/// Compiler for the reference ErgoScript subset
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceCompiler;

impl ScriptCompiler for ReferenceCompiler {
    fn compile(
        &self,
        source: &str,
        network: NetworkPrefix,
        version: u8,
    ) -> Result<CompiledScript, CompileError> {
        if version > MAX_SCRIPT_VERSION {
            return Err(CompileError::new(format!(
                "Unsupported script version {} (maximum is {})",
                version, MAX_SCRIPT_VERSION
            )));
        }
        let program = parser::parse_program(source)?;
        let contract_start = program.contract_start;
        let template = detect_contract_template(source);
        let tree = ErgoTree::new(version, program.into_expr(), source);
        tracing::debug!(
            version,
            has_contract = contract_start.is_some(),
            "compiled script"
        );
        Ok(CompiledScript {
            tree,
            network,
            contract_start,
            template,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_contract() {
        let script = ReferenceCompiler
            .compile("val x = 1\nHEIGHT > x", NetworkPrefix::Mainnet, 3)
            .unwrap();
        assert!(script.has_contract());
        assert_eq!(script.contract_start, Some((2, 1)));
        assert_eq!(script.tree.root.op_name(), "BlockValue");
        assert_eq!(script.tree.bytes[0], 0x1b);
        assert_eq!(script.tree.bytes.len(), 33);
        assert!(script.template.is_none());
    }

    #[test]
    fn test_compile_template() {
        let script = ReferenceCompiler
            .compile(
                "@contract def lock(h: Int = 10) = sigmaProp(HEIGHT > h)",
                NetworkPrefix::Testnet,
                2,
            )
            .unwrap();
        assert_eq!(script.template.unwrap().params, vec!["h"]);
        assert_eq!(script.network, NetworkPrefix::Testnet);
    }

    #[test]
    fn test_compile_rejects_unknown_version() {
        let err = ReferenceCompiler
            .compile("true", NetworkPrefix::Mainnet, 9)
            .unwrap_err();
        assert!(err.message.contains("Unsupported script version"));
    }

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = ReferenceCompiler.compile("HEIGHT > 1", NetworkPrefix::Mainnet, 3).unwrap();
        let b = ReferenceCompiler.compile("HEIGHT > 1", NetworkPrefix::Mainnet, 3).unwrap();
        let c = ReferenceCompiler.compile("HEIGHT > 2", NetworkPrefix::Mainnet, 3).unwrap();
        assert_eq!(a.tree.bytes, b.tree.bytes);
        assert_ne!(a.tree.bytes, c.tree.bytes);
    }

    // ── Position scraping ──────────────────────────────

    #[test]
    fn test_structured_position_wins() {
        let err = CompileError::at("error at line 9", 3, 4);
        assert_eq!(err.position_or_scraped(), Some((3, 4)));
    }

    #[test]
    fn test_scrape_line_and_column_words() {
        let err = CompileError::new("Type error at line 12, column 5: expected Boolean");
        assert_eq!(err.position_or_scraped(), Some((12, 5)));
    }

    #[test]
    fn test_scrape_line_only() {
        let err = CompileError::new("Parse failure on line 7");
        assert_eq!(err.position_or_scraped(), Some((7, 1)));
    }

    #[test]
    fn test_scrape_colon_pair() {
        let err = CompileError::new("unexpected token at 4:18");
        assert_eq!(err.position_or_scraped(), Some((4, 18)));
    }

    #[test]
    fn test_scrape_nothing() {
        assert_eq!(CompileError::new("boom").position_or_scraped(), None);
    }

    #[test]
    fn test_eval_error_kinds() {
        assert_eq!(EvalError::NoneGet.kind(), "NoneGet");
        assert_eq!(
            EvalError::type_mismatch("GT", "Int vs Long").to_string(),
            "type mismatch in GT: Int vs Long"
        );
    }
}
