use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process;

use ergo_test_core::runner::{FileReport, RunnerConfig, SuiteReport, TestResult, TestRunner, TestStatus};
use ergo_test_core::script::{NetworkPrefix, DEFAULT_SCRIPT_VERSION};
use ergo_test_core::testdsl::{validate_tests, Severity};
use ergo_test_core::trace::{render, TraceFormat};
use tracing_subscriber::EnvFilter;

/// ergo-test: ErgoScript test runner
///
/// Run @test blocks, inspect import expansion, and validate test syntax.
#[derive(Parser)]
#[command(name = "ergo-test", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Suppress everything but failures
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Workspace root (defaults to the current directory)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Library directory for `lib:` imports
    #[arg(long, global = true)]
    lib: Option<PathBuf>,

    /// Source directory for `src:` imports
    #[arg(long, global = true)]
    src: Option<PathBuf>,

    /// Script version to compile and evaluate with
    #[arg(long, global = true, default_value_t = DEFAULT_SCRIPT_VERSION)]
    script_version: u8,

    /// Compile for testnet
    #[arg(long, global = true)]
    testnet: bool,

    /// Cost budget per evaluation
    #[arg(long, global = true)]
    cost_limit: Option<i64>,

    /// Print evaluation traces: tree, json or compact
    #[arg(long, global = true)]
    trace: Option<TraceFormat>,

    /// Depth bound for printed traces
    #[arg(long, global = true)]
    max_depth: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tests in files or directories (*.es)
    Test {
        /// Test files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print a file with its imports expanded
    Expand {
        /// Path to .es file
        file: PathBuf,
        /// Also print the expanded-line to original-line map
        #[arg(long)]
        map: bool,
    },

    /// Check the structure of the test blocks in a file
    Validate {
        /// Path to .es file
        file: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if cli.no_color || cli.json {
        colored::control::set_override(false);
    }

    let exit_code = match &cli.command {
        Commands::Test { paths } => cmd_test(&cli, paths),
        Commands::Expand { file, map } => cmd_expand(&cli, file, *map),
        Commands::Validate { file } => cmd_validate(&cli, file),
        Commands::Version => {
            println!(
                "ergo-test {} (ergo-test-core {})",
                env!("CARGO_PKG_VERSION"),
                env!("CARGO_PKG_VERSION")
            );
            0
        }
    };

    process::exit(exit_code);
}

// ── Helpers ───────────────────────────────────────────────

fn config(cli: &Cli) -> RunnerConfig {
    let root = cli.root.clone().unwrap_or_else(|| PathBuf::from("."));
    let mut config = RunnerConfig::default()
        .with_workspace_root(root)
        .with_script_version(cli.script_version);
    if let Some(lib) = &cli.lib {
        config = config.with_library_dir(lib);
    }
    if let Some(src) = &cli.src {
        config = config.with_source_dir(src);
    }
    if cli.testnet {
        config = config.with_network(NetworkPrefix::Testnet);
    }
    if let Some(limit) = cli.cost_limit {
        config = config.with_cost_limit(limit);
    }
    if let Some(format) = cli.trace {
        config = config.with_trace(format);
    }
    if let Some(depth) = cli.max_depth {
        config = config.with_max_trace_depth(depth);
    }
    config
}

fn report_error(message: impl std::fmt::Display) -> i32 {
    eprintln!("{} {}", "error:".red().bold(), message);
    2
}

fn read_file(path: &Path) -> Result<String, i32> {
    std::fs::read_to_string(path)
        .map_err(|e| report_error(format!("cannot read '{}': {}", path.display(), e)))
}

fn print_json(encoded: serde_json::Result<String>) -> Result<(), i32> {
    let text = encoded.map_err(|e| report_error(format!("cannot encode JSON: {}", e)))?;
    println!("{}", text);
    Ok(())
}

/// Files to run: plain paths as given, directories scanned for `*.es`.
fn collect_test_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            scan_dir(path, &mut files);
        } else {
            files.push(path.clone());
        }
    }
    files
}

fn scan_dir(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            scan_dir(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "es") {
            out.push(path);
        }
    }
}

// ── test ──────────────────────────────────────────────────

fn cmd_test(cli: &Cli, paths: &[PathBuf]) -> i32 {
    let files = collect_test_files(paths);
    if files.is_empty() {
        return report_error("no test files found");
    }
    tracing::debug!(files = files.len(), "collected test files");
    let config = config(cli);
    let runner = TestRunner::new(config.clone());
    let suite = runner.run_suite(&files);

    if cli.json {
        if let Err(code) = print_json(serde_json::to_string_pretty(&suite)) {
            return code;
        }
    } else {
        print_suite(cli, &config, &suite);
    }

    if suite.files.iter().any(|f| f.error.is_some()) {
        2
    } else if suite.failed > 0 || suite.errored > 0 {
        1
    } else {
        0
    }
}

fn print_suite(cli: &Cli, config: &RunnerConfig, suite: &SuiteReport) {
    for file in &suite.files {
        print_file(cli, config, file);
    }
    if cli.quiet {
        return;
    }
    let summary = format!(
        "{} tests: {} passed, {} failed, {} errored",
        suite.total(),
        suite.passed,
        suite.failed,
        suite.errored
    );
    if suite.is_success() {
        println!("\n{}", summary.green().bold());
    } else {
        println!("\n{}", summary.red().bold());
    }
}

fn print_file(cli: &Cli, config: &RunnerConfig, file: &FileReport) {
    if !cli.quiet {
        println!("{}", file.file.bold());
    }
    for error in &file.import_errors {
        eprintln!("  {} {}", "warning:".yellow().bold(), error);
    }
    if let Some(error) = &file.error {
        eprintln!("  {} {}", "error:".red().bold(), error);
    }
    for test in &file.tests {
        if cli.quiet && test.status == TestStatus::Passed {
            continue;
        }
        print_test(config, &file.file, test);
    }
}

fn print_test(config: &RunnerConfig, file: &str, test: &TestResult) {
    match test.status {
        TestStatus::Passed => println!("  {} {}", "✓".green(), test.name),
        TestStatus::Failed => println!("  {} {}", "✗".red(), test.name),
        TestStatus::Errored => println!(
            "  {} {}: {}",
            "!".red().bold(),
            test.name,
            test.message.as_deref().unwrap_or("errored")
        ),
    }

    for assertion in &test.assertions {
        if let Some(message) = &assertion.message {
            let label = assertion.description.as_deref().unwrap_or(&assertion.expression);
            println!(
                "      {} ({}:{}:{})",
                label.trim(),
                file,
                assertion.line,
                assertion.column
            );
            println!("      {}", message.red());
        }
        if let (Some(format), Some(trace)) = (config.trace, &assertion.trace) {
            for line in render(trace, format, config.max_trace_depth).lines() {
                println!("        {}", line.dimmed());
            }
        }
    }

    if let (Some(format), Some(trace)) = (config.trace, &test.contract_trace) {
        println!("      {}", "contract:".dimmed());
        for line in render(trace, format, config.max_trace_depth).lines() {
            println!("        {}", line.dimmed());
        }
    }
}

// ── expand ────────────────────────────────────────────────

fn cmd_expand(cli: &Cli, file: &Path, show_map: bool) -> i32 {
    let source = match read_file(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let expansion = config(cli).expander().expand(&source, file);

    if cli.json {
        let value = serde_json::json!({
            "code": expansion.expanded_code.code,
            "lineMap": expansion.expanded_code.line_map,
            "totalLines": expansion.expanded_code.total_lines,
            "imports": expansion.imports,
            "errors": expansion.errors,
        });
        if let Err(code) = print_json(serde_json::to_string_pretty(&value)) {
            return code;
        }
    } else {
        if !cli.quiet {
            println!("{}", expansion.expanded_code.code);
        }
        if show_map {
            println!("{}", "── line map ──".dimmed());
            for (line, loc) in &expansion.expanded_code.line_map {
                println!(
                    "{:>5} → {}:{} ({})",
                    line,
                    loc.original_file,
                    loc.original_line,
                    loc.import_chain.join(" -> ")
                );
            }
        }
        for error in &expansion.errors {
            eprintln!("{} {}", "error:".red().bold(), error);
        }
    }

    if expansion.is_ok() {
        0
    } else {
        1
    }
}

// ── validate ──────────────────────────────────────────────

fn cmd_validate(cli: &Cli, file: &Path) -> i32 {
    let source = match read_file(file) {
        Ok(s) => s,
        Err(code) => return code,
    };
    let diagnostics = validate_tests(&source, &file.display().to_string());
    let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
    let warnings = diagnostics.len() - errors;

    if cli.json {
        let value = serde_json::json!({
            "file": file.display().to_string(),
            "valid": errors == 0,
            "errors": errors,
            "warnings": warnings,
            "diagnostics": diagnostics,
        });
        if let Err(code) = print_json(serde_json::to_string_pretty(&value)) {
            return code;
        }
    } else {
        for d in &diagnostics {
            match d.severity {
                Severity::Error => eprintln!("{}", d.to_string().red()),
                Severity::Warning => eprintln!("{}", d.to_string().yellow()),
            }
        }
        if errors == 0 && !cli.quiet {
            println!(
                "{} {} is valid ({} warnings)",
                "✓".green(),
                file.display(),
                warnings
            );
        }
    }

    if errors == 0 {
        0
    } else {
        1
    }
}
