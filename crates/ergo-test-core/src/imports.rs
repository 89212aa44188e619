//! Import Expander
//!
//! Inlines `#import` directives and records, for every line of the expanded
//! text, where that line originally came from. Expansion is best-effort: an
//! unresolvable, unreadable or circular import leaves a `// ERROR:` line in
//! place of the directive, records an error, and expansion carries on.
//!
//! # Resolution order
//!
//! 1. `lib:path` under the library directory
//! 2. `src:path` under the source directory
//! 3. `./path` and `../path` against the importing file's directory
//! 4. `lib/path` under the workspace root
//! 5. `path` under the workspace root
//! 6. `path` next to the importing file
//! 7. `path` as given (absolute)
//!
//! The first candidate that is a regular file wins. A path without an
//! extension also tries `.es`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::script::is_contract_template;

/// One `#import` directive as written in the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDirective {
    pub path: String,
    /// 1-based
    pub line: usize,
    pub start_column: usize,
    pub end_column: usize,
}

/// Origin of one line of expanded code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub original_file: String,
    pub original_line: usize,
    pub original_column: usize,
    /// Files traversed to reach this line, outermost first
    pub import_chain: Vec<String>,
}

/// Expanded text plus a map from each expanded line to its origin
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedCode {
    pub code: String,
    pub line_map: BTreeMap<usize, SourceLocation>,
    pub total_lines: usize,
}

impl ExpandedCode {
    /// Every line of `code` mapped to itself in `file`.
    pub fn identity(code: &str, file: &str) -> Self {
        let mut out = ExpandedCode::default();
        for (i, line) in code.split('\n').enumerate() {
            out.push_line(
                line,
                SourceLocation {
                    original_file: file.to_string(),
                    original_line: i + 1,
                    original_column: 1,
                    import_chain: vec![file.to_string()],
                },
            );
        }
        out
    }

    pub fn lookup(&self, line: usize) -> Option<&SourceLocation> {
        self.line_map.get(&line)
    }

    /// Expanded (line, column) to (file, line, column) in the original file.
    pub fn translate(&self, line: usize, column: usize) -> Option<(String, usize, usize)> {
        let loc = self.lookup(line)?;
        Some((
            loc.original_file.clone(),
            loc.original_line,
            column + loc.original_column.saturating_sub(1),
        ))
    }

    /// Append one line; `text` must not contain a newline.
    pub fn push_line(&mut self, text: &str, location: SourceLocation) {
        if self.total_lines > 0 {
            self.code.push('\n');
        }
        self.code.push_str(text);
        self.total_lines += 1;
        self.line_map.insert(self.total_lines, location);
    }

    /// The first `lines` lines with their map entries.
    pub fn truncated(&self, lines: usize) -> ExpandedCode {
        let mut out = ExpandedCode::default();
        for (i, text) in self.code.split('\n').take(lines.min(self.total_lines)).enumerate() {
            if let Some(loc) = self.lookup(i + 1) {
                out.push_line(text, loc.clone());
            }
        }
        out
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.code.split('\n')
    }
}

/// Result of expanding one file
#[derive(Debug, Clone, Default)]
pub struct ImportExpansion {
    pub expanded_code: ExpandedCode,
    /// Directives found in the top-level file
    pub imports: Vec<ImportDirective>,
    pub errors: Vec<String>,
}

impl ImportExpansion {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^\s*#import\s+"?([^";\s]+)"?\s*;?\s*$"#).expect("import regex must compile")
    })
}

/// Parse the directive on one line, if any.
pub fn parse_directive(line_text: &str, line: usize) -> Option<ImportDirective> {
    let caps = import_regex().captures(line_text)?;
    let start = line_text.find('#')?;
    Some(ImportDirective {
        path: caps[1].to_string(),
        line,
        start_column: line_text[..start].chars().count() + 1,
        end_column: line_text.trim_end().chars().count() + 1,
    })
}

// ── Expander ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ImportExpander {
    workspace_root: PathBuf,
    library_dir: PathBuf,
    source_dir: PathBuf,
}

impl ImportExpander {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        ImportExpander {
            library_dir: workspace_root.join("lib"),
            source_dir: workspace_root.join("src"),
            workspace_root,
        }
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = dir.into();
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    /// Expand every import reachable from `code`, which is the text of
    /// `current_file`.
    #[tracing::instrument(level = "debug", skip_all, fields(file = %current_file.display()))]
    pub fn expand(&self, code: &str, current_file: &Path) -> ImportExpansion {
        let mut visited = HashSet::new();
        visited.insert(canonical(current_file));
        let mut chain = vec![current_file.to_path_buf()];
        let mut errors = Vec::new();
        let (expanded_code, imports) = self.expand_inner(code, current_file, &mut visited, &mut chain, &mut errors);
        if !errors.is_empty() {
            tracing::warn!(count = errors.len(), "import expansion reported errors");
        }
        ImportExpansion {
            expanded_code,
            imports,
            errors,
        }
    }

    fn expand_inner(
        &self,
        code: &str,
        current_file: &Path,
        visited: &mut HashSet<PathBuf>,
        chain: &mut Vec<PathBuf>,
        errors: &mut Vec<String>,
    ) -> (ExpandedCode, Vec<ImportDirective>) {
        let file_name = current_file.display().to_string();
        let chain_names: Vec<String> = chain.iter().map(|p| p.display().to_string()).collect();
        let here = |line: usize| SourceLocation {
            original_file: file_name.clone(),
            original_line: line,
            original_column: 1,
            import_chain: chain_names.clone(),
        };

        let importer_is_template = is_contract_template(code);
        let current_dir = current_file.parent().unwrap_or(Path::new("."));
        let mut out = ExpandedCode::default();
        let mut imports = Vec::new();

        for (i, text) in code.split('\n').enumerate() {
            let line = i + 1;
            let Some(directive) = parse_directive(text, line) else {
                out.push_line(text, here(line));
                continue;
            };
            imports.push(directive.clone());

            let Some(resolved) = self.resolve(&directive.path, current_dir) else {
                errors.push(format!(
                    "Cannot resolve import \"{}\" ({}:{})",
                    directive.path, file_name, line
                ));
                out.push_line(
                    &format!("// ERROR: cannot resolve import \"{}\"", directive.path),
                    here(line),
                );
                continue;
            };

            let key = canonical(&resolved);
            if let Some(pos) = chain.iter().position(|p| canonical(p) == key) {
                let mut cycle: Vec<String> = chain[pos..].iter().map(|p| p.display().to_string()).collect();
                cycle.push(resolved.display().to_string());
                let message = format!("Circular import: {}", cycle.join(" -> "));
                out.push_line(&format!("// ERROR: {}", message), here(line));
                errors.push(message);
                continue;
            }
            if !visited.insert(key) {
                out.push_line(&format!("// Already imported: {}", directive.path), here(line));
                continue;
            }

            let content = match std::fs::read_to_string(&resolved) {
                Ok(c) => c,
                Err(e) => {
                    errors.push(format!("Cannot read import \"{}\": {}", directive.path, e));
                    out.push_line(
                        &format!("// ERROR: cannot read import \"{}\"", directive.path),
                        here(line),
                    );
                    continue;
                }
            };
            tracing::debug!(import = %resolved.display(), "inlining import");

            chain.push(resolved.clone());
            let (nested, _) = self.expand_inner(&content, &resolved, visited, chain, errors);
            chain.pop();

            let wrap = !importer_is_template && !is_contract_template(&content);
            if wrap {
                out.push_line(&format!("// Imported from {}", directive.path), here(line));
            }
            let mut body_lines = nested.total_lines;
            if content.ends_with('\n') {
                body_lines = body_lines.saturating_sub(1);
            }
            for (j, nested_text) in nested.lines().take(body_lines).enumerate() {
                let loc = nested.lookup(j + 1).cloned().unwrap_or_else(|| here(line));
                out.push_line(nested_text, loc);
            }
            if wrap {
                out.push_line(&format!("// End of import {}", directive.path), here(line));
            }
        }

        (out, imports)
    }

    /// Resolve an import path to an existing file.
    pub fn resolve(&self, path: &str, current_dir: &Path) -> Option<PathBuf> {
        let candidates: Vec<PathBuf> = if let Some(rest) = path.strip_prefix("lib:") {
            vec![self.library_dir.join(rest)]
        } else if let Some(rest) = path.strip_prefix("src:") {
            vec![self.source_dir.join(rest)]
        } else if path.starts_with("./") || path.starts_with("../") {
            vec![current_dir.join(path)]
        } else {
            vec![
                self.workspace_root.join("lib").join(path),
                self.workspace_root.join(path),
                current_dir.join(path),
                PathBuf::from(path),
            ]
        };

        candidates
            .into_iter()
            .flat_map(|c| {
                let with_ext = c.extension().is_none().then(|| c.with_extension("es"));
                std::iter::once(c).chain(with_ext)
            })
            .find(|c| c.is_file())
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Expand with default directories under `workspace_root`.
pub fn expand_imports(code: &str, current_file: &Path, workspace_root: &Path) -> ImportExpansion {
    ImportExpander::new(workspace_root).expand(code, current_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_no_imports_is_identity() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.es");
        let code = "val a = 1\nHEIGHT > a\n";
        let result = expand_imports(code, &main, dir.path());
        assert!(result.is_ok());
        assert_eq!(result.expanded_code.code, code);
        assert_eq!(result.expanded_code.total_lines, 3);
        for line in 1..=3 {
            let loc = result.expanded_code.lookup(line).unwrap();
            assert_eq!(loc.original_line, line);
            assert_eq!(loc.original_file, main.display().to_string());
        }
        assert!(result.expanded_code.lookup(4).is_none());
        assert!(result.expanded_code.lookup(0).is_none());
    }

    #[test]
    fn test_parse_directive_forms() {
        let d = parse_directive("  #import \"lib:math.es\";", 3).unwrap();
        assert_eq!(d.path, "lib:math.es");
        assert_eq!(d.line, 3);
        assert_eq!(d.start_column, 3);
        assert_eq!(parse_directive("#import utils.es", 1).unwrap().path, "utils.es");
        assert!(parse_directive("// #import x.es", 1).is_none());
        assert!(parse_directive("val x = 1", 1).is_none());
    }

    #[test]
    fn test_import_is_wrapped_and_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let lib = write(dir.path(), "lib/math.es", "def double(x: Int): Int = x * 2\n");
        let main = dir.path().join("main.es");
        let code = "#import lib:math.es\ndouble(2) == 4";
        let result = expand_imports(code, &main, dir.path());
        assert!(result.is_ok(), "{:?}", result.errors);

        let expanded = &result.expanded_code;
        let lines: Vec<&str> = expanded.lines().collect();
        assert_eq!(
            lines,
            vec![
                "// Imported from lib:math.es",
                "def double(x: Int): Int = x * 2",
                "// End of import lib:math.es",
                "double(2) == 4",
            ]
        );
        assert_eq!(expanded.lookup(1).unwrap().original_file, main.display().to_string());
        let body = expanded.lookup(2).unwrap();
        assert_eq!(body.original_file, lib.display().to_string());
        assert_eq!(body.original_line, 1);
        assert_eq!(body.import_chain.len(), 2);
        assert_eq!(expanded.lookup(4).unwrap().original_line, 2);
    }

    #[test]
    fn test_nested_imports_resolve_to_origin() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/a.es", "#import ./b.es\nval a = b + 1");
        let b = write(dir.path(), "lib/b.es", "// b\nval b = 1");
        let main = dir.path().join("main.es");
        let result = expand_imports("#import lib:a.es\na > 1", &main, dir.path());
        assert!(result.is_ok(), "{:?}", result.errors);

        let expanded = &result.expanded_code;
        let (line, _) = expanded
            .lines()
            .enumerate()
            .find(|(_, l)| *l == "val b = 1")
            .unwrap();
        let loc = expanded.lookup(line + 1).unwrap();
        assert_eq!(loc.original_file, b.display().to_string());
        assert_eq!(loc.original_line, 2);
        assert_eq!(loc.import_chain.len(), 3);
    }

    #[test]
    fn test_circular_import_reported() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.es", "#import b.es\nval a = 1");
        write(dir.path(), "b.es", "#import a.es\nval b = 2");
        let main = dir.path().join("a.es");
        let result = expand_imports("#import b.es\nval a = 1", &main, dir.path());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Circular import:"));
        assert!(result.expanded_code.code.contains("// ERROR: Circular import"));
        assert!(result.expanded_code.code.contains("val b = 2"));
    }

    #[test]
    fn test_diamond_import_inlined_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "common.es", "val c = 1");
        write(dir.path(), "x.es", "#import common.es\nval x = c");
        write(dir.path(), "y.es", "#import common.es\nval y = c");
        let main = dir.path().join("main.es");
        let result = expand_imports("#import x.es\n#import y.es\nx == y", &main, dir.path());
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.expanded_code.code.matches("val c = 1").count(), 1);
        assert!(result.expanded_code.code.contains("// Already imported: common.es"));
    }

    #[test]
    fn test_diamond_through_different_spellings() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/common.es", "val c = 1");
        write(dir.path(), "x.es", "#import lib:common.es\nval x = c");
        let y = write(dir.path(), "y.es", "#import ./lib/common.es\nval y = c");
        let main = dir.path().join("main.es");
        let result = ImportExpander::new(dir.path())
            .with_library_dir(dir.path().join("lib"))
            .expand("#import x.es\n#import y.es\nx == y", &main);
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(result.imports.len(), 2);

        let expanded = &result.expanded_code;
        assert_eq!(expanded.code.matches("val c = 1").count(), 1);
        let (line, _) = expanded
            .lines()
            .enumerate()
            .find(|(_, l)| *l == "// Already imported: ./lib/common.es")
            .unwrap();
        let loc = expanded.lookup(line + 1).unwrap();
        assert_eq!(loc.original_file, y.display().to_string());
        assert_eq!(loc.original_line, 1);
    }

    #[test]
    fn test_missing_import_continues() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("main.es");
        let result = expand_imports("#import nowhere.es\nHEIGHT > 1", &main, dir.path());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("nowhere.es"));
        assert_eq!(result.imports.len(), 1);
        let lines: Vec<&str> = result.expanded_code.lines().collect();
        assert!(lines[0].starts_with("// ERROR:"));
        assert_eq!(lines[1], "HEIGHT > 1");
    }

    #[test]
    fn test_template_import_is_not_wrapped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib/lock.es", "@contract def lock(h: Int = 10) = sigmaProp(HEIGHT > h)");
        let main = dir.path().join("main.es");
        let result = expand_imports("#import lib:lock.es", &main, dir.path());
        assert!(result.is_ok());
        assert_eq!(
            result.expanded_code.code,
            "@contract def lock(h: Int = 10) = sigmaProp(HEIGHT > h)"
        );
    }

    #[test]
    fn test_resolution_prefers_library_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let custom = tempfile::tempdir().unwrap();
        let expected = write(custom.path(), "util.es", "val u = 1");
        write(dir.path(), "util.es", "val u = 2");
        let expander = ImportExpander::new(dir.path()).with_library_dir(custom.path());
        assert_eq!(expander.resolve("lib:util.es", dir.path()), Some(expected));
        assert_eq!(
            expander.resolve("util", dir.path()),
            Some(dir.path().join("util.es"))
        );
        assert_eq!(expander.resolve("src:util.es", dir.path()), None);
    }

    #[test]
    fn test_truncated_and_push_line() {
        let mut code = ExpandedCode::identity("a\nb\nc", "m.es");
        code = code.truncated(2);
        code.push_line(
            "x",
            SourceLocation {
                original_file: "t.es".into(),
                original_line: 9,
                original_column: 5,
                import_chain: vec!["t.es".into()],
            },
        );
        assert_eq!(code.code, "a\nb\nx");
        assert_eq!(code.total_lines, 3);
        assert_eq!(code.translate(3, 2), Some(("t.es".to_string(), 9, 6)));
    }
}
