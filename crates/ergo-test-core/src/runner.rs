//! Test runner
//!
//! Per file: expand imports, strip test blocks, compile what remains, parse
//! the tests, then for every test build its context and evaluate each
//! assertion with tracing. Nothing fails past a single test: compile errors,
//! context errors and evaluation errors all end up as values in the report.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::{build_context, ExecutionContext};
use crate::error::Error;
use crate::imports::{ExpandedCode, ImportExpander, SourceLocation};
use crate::script::{
    CompileError, CompiledScript, Env, Interpreter, NetworkPrefix, ReferenceCompiler, ScriptCompiler,
    ScriptEvaluator, Value, VersionScope, DEFAULT_COST_LIMIT, DEFAULT_SCRIPT_VERSION,
};
use crate::sourcemap::map_expression_tree;
use crate::testdsl::{parse_tests, strip_test_blocks, AssertionType, ParseFailure, TestAssertion, TestDefinition};
use crate::trace::{TraceFormat, TracedEvaluation, TracingEvaluator};

/// Environment variable naming the library directory
pub const LIBRARY_DIR_ENV: &str = "ERGO_TEST_LIB";

// ── Configuration ─────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunnerConfig {
    pub workspace_root: PathBuf,
    /// Target of `lib:` imports; see [`RunnerConfig::resolved_library_dir`]
    pub library_dir: Option<PathBuf>,
    /// Target of `src:` imports, `<root>/src` when unset
    pub source_dir: Option<PathBuf>,
    pub script_version: u8,
    pub network: NetworkPrefix,
    pub cost_limit: i64,
    /// Trace rendering requested by the caller, `None` for no trace output
    pub trace: Option<TraceFormat>,
    pub max_trace_depth: Option<usize>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            workspace_root: PathBuf::from("."),
            library_dir: None,
            source_dir: None,
            script_version: DEFAULT_SCRIPT_VERSION,
            network: NetworkPrefix::Mainnet,
            cost_limit: DEFAULT_COST_LIMIT,
            trace: None,
            max_trace_depth: None,
        }
    }
}

impl RunnerConfig {
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    pub fn with_script_version(mut self, version: u8) -> Self {
        self.script_version = version;
        self
    }

    pub fn with_network(mut self, network: NetworkPrefix) -> Self {
        self.network = network;
        self
    }

    pub fn with_cost_limit(mut self, limit: i64) -> Self {
        self.cost_limit = limit;
        self
    }

    pub fn with_trace(mut self, format: TraceFormat) -> Self {
        self.trace = Some(format);
        self
    }

    pub fn with_max_trace_depth(mut self, depth: usize) -> Self {
        self.max_trace_depth = Some(depth);
        self
    }

    /// Explicit directory, else `$ERGO_TEST_LIB`, else `<root>/lib`.
    pub fn resolved_library_dir(&self) -> PathBuf {
        if let Some(dir) = &self.library_dir {
            return dir.clone();
        }
        match std::env::var(LIBRARY_DIR_ENV) {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => self.workspace_root.join("lib"),
        }
    }

    pub fn resolved_source_dir(&self) -> PathBuf {
        self.source_dir
            .clone()
            .unwrap_or_else(|| self.workspace_root.join("src"))
    }

    pub fn expander(&self) -> ImportExpander {
        ImportExpander::new(&self.workspace_root)
            .with_library_dir(self.resolved_library_dir())
            .with_source_dir(self.resolved_source_dir())
    }
}

// ── Results ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Passed,
    Failed,
    /// The test could not be run: parse, context or compile error
    Errored,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    pub description: Option<String>,
    pub expression: String,
    pub passed: bool,
    pub message: Option<String>,
    pub line: usize,
    pub column: usize,
    pub trace: Option<TracedEvaluation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub line: usize,
    pub column: usize,
    /// Why the test errored
    pub message: Option<String>,
    pub assertions: Vec<AssertionResult>,
    /// The file's contract evaluated against this test's context
    pub contract_trace: Option<TracedEvaluation>,
}

impl TestResult {
    fn errored(name: impl Into<String>, line: usize, column: usize, message: impl Into<String>) -> Self {
        TestResult {
            name: name.into(),
            status: TestStatus::Errored,
            line,
            column,
            message: Some(message.into()),
            assertions: Vec::new(),
            contract_trace: None,
        }
    }

    /// Failed assertions, in order
    pub fn failures(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertions.iter().filter(|a| !a.passed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReport {
    pub file: String,
    pub tests: Vec<TestResult>,
    /// File-level failure: unreadable file or compile error
    pub error: Option<String>,
    pub import_errors: Vec<String>,
}

impl FileReport {
    fn failed(file: String, error: String) -> Self {
        FileReport {
            file,
            tests: Vec::new(),
            error: Some(error),
            import_errors: Vec::new(),
        }
    }

    fn count(&self, status: TestStatus) -> usize {
        self.tests.iter().filter(|t| t.status == status).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteReport {
    pub files: Vec<FileReport>,
    pub passed: usize,
    pub failed: usize,
    pub errored: usize,
}

impl SuiteReport {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.errored
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.errored == 0 && self.files.iter().all(|f| f.error.is_none())
    }
}

// ── Runner ────────────────────────────────────────────────

/// Compiled state shared by every test of one file
struct FileUnit {
    file: String,
    script: CompiledScript,
    /// Stripped, expanded code with the original line map
    code: ExpandedCode,
    /// Definitions visible to assertions: everything before the contract
    prelude: ExpandedCode,
}

pub struct TestRunner<C: ScriptCompiler = ReferenceCompiler, E: ScriptEvaluator + Default = Interpreter> {
    config: RunnerConfig,
    compiler: C,
    _evaluator: std::marker::PhantomData<E>,
}

impl TestRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self::with_compiler(config, ReferenceCompiler)
    }
}

impl<C: ScriptCompiler, E: ScriptEvaluator + Default> TestRunner<C, E> {
    pub fn with_compiler(config: RunnerConfig, compiler: C) -> Self {
        TestRunner {
            config,
            compiler,
            _evaluator: std::marker::PhantomData,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run every file in order; a failing file never stops the rest.
    pub fn run_suite<P: AsRef<Path>>(&self, paths: &[P]) -> SuiteReport {
        let mut suite = SuiteReport::default();
        for path in paths {
            let report = self.run_file(path.as_ref());
            suite.passed += report.count(TestStatus::Passed);
            suite.failed += report.count(TestStatus::Failed);
            suite.errored += report.count(TestStatus::Errored);
            suite.files.push(report);
        }
        tracing::info!(
            passed = suite.passed,
            failed = suite.failed,
            errored = suite.errored,
            "suite finished"
        );
        suite
    }

    #[tracing::instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn run_file(&self, path: &Path) -> FileReport {
        let file = path.display().to_string();
        let raw = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => return FileReport::failed(file, Error::io(path, e).to_string()),
        };
        self.run_source(&raw, path)
    }

    /// Run the tests of `raw`, resolving imports relative to `path`.
    pub fn run_source(&self, raw: &str, path: &Path) -> FileReport {
        let file = path.display().to_string();
        let expansion = self.config.expander().expand(raw, path);
        let parsed = parse_tests(raw, &file);

        let mut report = FileReport {
            file: file.clone(),
            tests: Vec::new(),
            error: None,
            import_errors: expansion.errors.clone(),
        };

        let code = ExpandedCode {
            code: strip_test_blocks(&expansion.expanded_code.code),
            ..expansion.expanded_code
        };

        let unit = match self.compiler.compile(&code.code, self.config.network, self.config.script_version) {
            Ok(script) => {
                let prelude = match script.contract_start {
                    Some((line, _)) => code.truncated(line.saturating_sub(1)),
                    None => code.clone(),
                };
                FileUnit {
                    file,
                    script,
                    code,
                    prelude,
                }
            }
            Err(e) => {
                let message = locate_compile_error(&e, &code, &file);
                tracing::warn!(%message, "compilation failed");
                report.tests = parsed
                    .tests
                    .iter()
                    .map(|t| TestResult::errored(&t.name, t.line, t.column, format!("Compilation error: {}", message)))
                    .collect();
                report.tests.extend(parsed.errors.iter().map(parse_failure));
                report.error = Some(message);
                return report;
            }
        };

        for test in &parsed.tests {
            report.tests.push(self.run_test(&unit, test));
        }
        report.tests.extend(parsed.errors.iter().map(parse_failure));
        report
    }

    fn run_test(&self, unit: &FileUnit, test: &TestDefinition) -> TestResult {
        let contract = unit.script.has_contract().then_some(&unit.script.tree);
        let mut ctx = match build_context(&test.context, contract) {
            Ok(ctx) => ctx,
            Err(e) => return TestResult::errored(&test.name, test.line, test.column, e.to_string()),
        };
        ctx.cost_limit = self.config.cost_limit;
        ctx.script_version = self.config.script_version;

        let contract_trace = contract.map(|tree| {
            let map = map_expression_tree(&tree.root, Some(&unit.code), &unit.file);
            TracingEvaluator::new(E::default()).evaluate(&ctx, tree, &map, &Env::new())
        });

        let mut assertions = Vec::new();
        for assertion in &test.assertions {
            match self.run_assertion(unit, &ctx, assertion) {
                Ok(result) => assertions.push(result),
                Err(message) => {
                    let mut result = TestResult::errored(&test.name, test.line, test.column, message);
                    result.assertions = assertions;
                    result.contract_trace = contract_trace;
                    return result;
                }
            }
        }

        let status = if assertions.iter().all(|a| a.passed) {
            TestStatus::Passed
        } else {
            TestStatus::Failed
        };
        tracing::debug!(test = %test.name, ?status, "test finished");
        TestResult {
            name: test.name.clone(),
            status,
            line: test.line,
            column: test.column,
            message: None,
            assertions,
            contract_trace,
        }
    }

    /// Evaluate one assertion; `Err` means it could not be compiled.
    fn run_assertion(
        &self,
        unit: &FileUnit,
        ctx: &ExecutionContext,
        assertion: &TestAssertion,
    ) -> Result<AssertionResult, String> {
        let code = with_expression(&unit.prelude, &assertion.expression, &unit.file, assertion.line, assertion.column);
        let script = self
            .compiler
            .compile(&code.code, self.config.network, self.config.script_version)
            .map_err(|e| format!("Compilation error: {}", locate_compile_error(&e, &code, &unit.file)))?;

        let map = map_expression_tree(&script.tree.root, Some(&code), &unit.file);
        let traced = TracingEvaluator::new(E::default()).evaluate(ctx, &script.tree, &map, &Env::new());

        let outcome = match (&traced.value, assertion.assertion_type) {
            (None, _) => Err(format!(
                "evaluation failed: {}",
                traced.error.as_deref().unwrap_or("unknown error")
            )),
            (Some(_), AssertionType::Provable) if traced.result => Ok(()),
            (Some(actual), AssertionType::Provable) => Err(format!("expected a provable result, got {}", actual)),
            (Some(actual), AssertionType::NotProvable) if actual.is_provable() => {
                Err(format!("expected an unprovable result, got {}", actual))
            }
            (Some(_), AssertionType::NotProvable) => Ok(()),
            (Some(actual), kind) => {
                let text = assertion.expected.as_deref().unwrap_or("true");
                let expected = self.expected_value(unit, ctx, text, assertion)?;
                match (kind, actual.loosely_equals(&expected)) {
                    (AssertionType::Equals, true) | (AssertionType::NotEquals, false) => Ok(()),
                    (AssertionType::Equals, false) => Err(format!("expected {}, got {}", expected, actual)),
                    _ => Err(format!("expected a value other than {}, got {}", expected, actual)),
                }
            }
        };

        Ok(AssertionResult {
            description: assertion.description.clone(),
            expression: assertion.expression.clone(),
            passed: outcome.is_ok(),
            message: outcome.err(),
            line: assertion.line,
            column: assertion.column,
            trace: Some(traced),
        })
    }

    fn expected_value(
        &self,
        unit: &FileUnit,
        ctx: &ExecutionContext,
        text: &str,
        assertion: &TestAssertion,
    ) -> Result<Value, String> {
        let code = with_expression(&unit.prelude, text, &unit.file, assertion.line, assertion.column);
        let script = self
            .compiler
            .compile(&code.code, self.config.network, self.config.script_version)
            .map_err(|e| format!("Compilation error in expected value: {}", e))?;
        let _scope = VersionScope::enter(ctx.script_version);
        let mut evaluator = E::default();
        evaluator
            .reduce(ctx, &script.tree, &Env::new())
            .map_err(|e| format!("cannot evaluate expected value `{}`: {}", text, e))
    }
}

/// Prelude followed by `expression`, its lines mapped to the test file.
fn with_expression(prelude: &ExpandedCode, expression: &str, file: &str, line: usize, column: usize) -> ExpandedCode {
    let mut code = prelude.clone();
    for (i, text) in expression.split('\n').enumerate() {
        code.push_line(
            text,
            SourceLocation {
                original_file: file.to_string(),
                original_line: line + i,
                original_column: if i == 0 { column } else { 1 },
                import_chain: vec![file.to_string()],
            },
        );
    }
    code
}

/// `file:line:column: message` in original-file coordinates.
fn locate_compile_error(error: &CompileError, code: &ExpandedCode, file: &str) -> String {
    match error
        .position_or_scraped()
        .and_then(|(line, column)| code.translate(line, column))
    {
        Some((original, line, column)) => format!("{}:{}:{}: {}", original, line, column, error.message),
        None => format!("{}: {}", file, error.message),
    }
}

fn parse_failure(failure: &ParseFailure) -> TestResult {
    let (line, column) = match &failure.error {
        Error::Parse { line, column, .. } => (*line, *column),
        _ => (0, 0),
    };
    let name = failure.test.clone().unwrap_or_else(|| "<fixture>".to_string());
    TestResult::errored(name, line, column, failure.error.to_string())
}
