//! ErgoTest Core - test execution and source correlation for ErgoScript
//!
//! Runs `@test` blocks embedded in ErgoScript files against mock
//! transaction contexts and traces every evaluated sub-expression back to
//! the file it was written in, even after imports have been inlined.
//!
//! # Architecture
//!
//! ```text
//! file text → Import Expander → ExpandedCode (+ line map)
//!                 ↓                       ↓
//!          Test-Block Parser        strip tests → ScriptCompiler → ErgoTree
//!                 ↓                                                  ↓
//!        Mock-Context Builder → ExecutionContext → Tracing Evaluator → TracedEvaluation
//!                                                        ↑
//!                                         Source Position Mapper
//! ```
//!
//! # Guarantees
//!
//! - **Deterministic**: same file and context give the same result, cost and trace
//! - **Contained**: a failing test never stops the rest of its file or suite
//! - **Traceable**: positions shown to users are always original-file positions
//! - **Scoped**: the active script version is set per evaluation and always restored

pub mod blocks;
pub mod context;
pub mod error;
pub mod imports;
pub mod runner;
pub mod script;
pub mod sourcemap;
pub mod testdsl;
pub mod trace;

pub use context::{build_context, ExecutionContext};
pub use error::{Error, Result};
pub use imports::{expand_imports, ExpandedCode, ImportExpander, ImportExpansion, SourceLocation};
pub use runner::{FileReport, RunnerConfig, SuiteReport, TestResult, TestRunner, TestStatus};
pub use sourcemap::{map_expression_tree, scan_source, SourcePosition, SourcePositionMap};
pub use testdsl::{parse_tests, strip_test_blocks, validate_tests, MockBox, MockContext, TestDefinition};
pub use trace::{evaluate_with_trace, TraceFormat, TracedEvaluation, TracedNode, TracingEvaluator};
