//! Build verification: compile a generated project and report diagnostics.
//!
//! .NET projects are built with `dotnet build`; Python projects are
//! byte-compiled file by file with `py_compile`. Output parsing lives in the
//! pure functions [`parse_dotnet_output`] and [`parse_python_error`].

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::process::Command;

use crate::project::{Ecosystem, GeneratedProject};
use crate::tools::ToolContext;

/// Raw build output kept in reports and metadata is capped at this size.
const MAX_OUTPUT: usize = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

/// One compiler finding. `line`/`column` are 0 when unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub column: u32,
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

impl Diagnostic {
    fn unknown(code: &str, message: impl Into<String>) -> Self {
        Self {
            file: "unknown".to_string(),
            line: 0,
            column: 0,
            severity: Severity::Error,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub success: bool,
    pub message: String,
    pub diagnostics: Vec<Diagnostic>,
    /// Combined compiler output, truncated.
    pub output: String,
}

impl BuildReport {
    pub fn passed(message: impl Into<String>, diagnostics: Vec<Diagnostic>, output: String) -> Self {
        Self {
            success: true,
            message: message.into(),
            diagnostics,
            output: truncate(output),
        }
    }

    /// A failed report; never without at least one diagnostic.
    pub fn failed(message: impl Into<String>, mut diagnostics: Vec<Diagnostic>, output: String) -> Self {
        let message = message.into();
        if diagnostics.is_empty() {
            diagnostics.push(Diagnostic::unknown("BUILD_FAILED", message.clone()));
        }
        Self {
            success: false,
            message,
            diagnostics,
            output: truncate(output),
        }
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }
}

fn truncate(mut output: String) -> String {
    if output.len() > MAX_OUTPUT {
        let mut end = MAX_OUTPUT;
        while !output.is_char_boundary(end) {
            end -= 1;
        }
        output.truncate(end);
        output.push_str("\n... (truncated)");
    }
    output
}

/// Compiles a generated project.
pub trait Verifier: Send + Sync {
    fn verify<'a>(
        &'a self,
        ctx: &'a mut ToolContext,
        project: &'a GeneratedProject,
    ) -> BoxFuture<'a, BuildReport>;
}

// ── Settings ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub dotnet_program: String,
    pub python_program: String,
    pub dotnet_timeout_secs: u64,
    pub python_timeout_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            dotnet_program: "dotnet".to_string(),
            python_program: "python3".to_string(),
            dotnet_timeout_secs: 120,
            python_timeout_secs: 30,
        }
    }
}

// ── Verifier ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct BuildVerifier {
    settings: BuildSettings,
}

impl BuildVerifier {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    /// Verify the project rooted at `dir`, mirroring the outcome into
    /// `ctx.metadata["build_errors"]` and `ctx.metadata["build_output"]`.
    pub async fn verify_dir(&self, ctx: &mut ToolContext, dir: &Path, ecosystem: Ecosystem) -> BuildReport {
        let report = match ecosystem {
            Ecosystem::DotNet => self.verify_dotnet(dir).await,
            Ecosystem::Python => self.verify_python(dir).await,
        };
        tracing::info!(
            dir = %dir.display(),
            ecosystem = %ecosystem,
            success = report.success,
            errors = report.error_count(),
            "Build verified"
        );
        ctx.metadata.insert(
            "build_errors".to_string(),
            serde_json::to_value(&report.diagnostics).unwrap_or(Value::Null),
        );
        ctx.metadata
            .insert("build_output".to_string(), Value::String(report.output.clone()));
        report
    }

    async fn verify_dotnet(&self, dir: &Path) -> BuildReport {
        let Some(solution) = find_solution(dir).await else {
            return BuildReport::failed(
                format!("No .sln file found in {}", dir.display()),
                Vec::new(),
                String::new(),
            );
        };
        let args = [
            solution.to_string_lossy().into_owned(),
            "--no-incremental".to_string(),
        ];
        let output = match run(
            &self.settings.dotnet_program,
            "build",
            &args,
            dir,
            self.settings.dotnet_timeout_secs,
        )
        .await
        {
            Ok(output) => output,
            Err(message) => return BuildReport::failed(message, Vec::new(), String::new()),
        };

        let text = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let diagnostics = parse_dotnet_output(&text, dir);
        if output.status.success() {
            BuildReport::passed("Build succeeded", diagnostics, text)
        } else {
            let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
            BuildReport::failed(format!("Build failed with {errors} error(s)"), diagnostics, text)
        }
    }

    async fn verify_python(&self, dir: &Path) -> BuildReport {
        let root = dir.to_path_buf();
        let files = match tokio::task::spawn_blocking(move || list_python_files(&root)).await {
            Ok(files) => files,
            Err(e) => return BuildReport::failed(format!("File scan failed: {e}"), Vec::new(), String::new()),
        };
        if files.is_empty() {
            return BuildReport::failed(
                format!("No Python files found in {}", dir.display()),
                Vec::new(),
                String::new(),
            );
        }

        let mut diagnostics = Vec::new();
        let mut output = String::new();
        for file in &files {
            let args = ["py_compile".to_string(), file.clone()];
            let result = match run(
                &self.settings.python_program,
                "-m",
                &args,
                dir,
                self.settings.python_timeout_secs,
            )
            .await
            {
                Ok(result) => result,
                Err(message) => return BuildReport::failed(message, diagnostics, output),
            };
            if !result.status.success() {
                let stderr = String::from_utf8_lossy(&result.stderr);
                output.push_str(&stderr);
                diagnostics.push(parse_python_error(&stderr, file));
            }
        }

        if diagnostics.is_empty() {
            BuildReport::passed(format!("Compiled {} Python file(s)", files.len()), diagnostics, output)
        } else {
            BuildReport::failed(
                format!("{} of {} Python file(s) failed to compile", diagnostics.len(), files.len()),
                diagnostics,
                output,
            )
        }
    }
}

impl Verifier for BuildVerifier {
    fn verify<'a>(
        &'a self,
        ctx: &'a mut ToolContext,
        project: &'a GeneratedProject,
    ) -> BoxFuture<'a, BuildReport> {
        Box::pin(self.verify_dir(ctx, &project.root, project.ecosystem))
    }
}

/// Run `program first args..` in `dir` under a timeout.
///
/// The child is killed when the timeout drops the future.
async fn run(program: &str, first: &str, args: &[String], dir: &Path, timeout_secs: u64) -> Result<Output, String> {
    let output = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        Command::new(program)
            .arg(first)
            .args(args)
            .current_dir(dir)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Err(_) => Err(format!("`{program} {first}` timed out after {timeout_secs}s")),
        Ok(Err(e)) if e.kind() == io::ErrorKind::NotFound => Err(format!(
            "`{program}` not found; install it or point the build settings at it"
        )),
        Ok(Err(e)) => Err(format!("Failed to run `{program}`: {e}")),
        Ok(Ok(output)) => Ok(output),
    }
}

async fn find_solution(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut found = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "sln") {
            found.push(path);
        }
    }
    found.sort();
    found.into_iter().next()
}

/// `.py` files under `root` as sorted relative paths, skipping hidden and
/// cache directories.
fn list_python_files(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, result: &mut Vec<String>) {
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    let name = path.file_name().unwrap_or_default().to_string_lossy();
                    if name.starts_with('.') || name == "__pycache__" || name == "venv" {
                        continue;
                    }
                    walk(&path, root, result);
                } else if path.extension().is_some_and(|ext| ext == "py")
                    && let Ok(rel) = path.strip_prefix(root)
                {
                    result.push(rel.to_string_lossy().to_string());
                }
            }
        }
    }
    let mut result = Vec::new();
    walk(root, root, &mut result);
    result.sort();
    result
}

// ── Parsers ────────────────────────────────────────────────────────

static DOTNET_DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*([^(\r\n]+)\((\d+),(\d+)\):\s+(error|warning)\s+(\w+):\s+(.+?)\s*$")
        .expect("dotnet diagnostic pattern")
});
static PROJECT_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[[^\]]*\]$").expect("project suffix pattern"));
static PYTHON_LOCATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"File "([^"]+)", line (\d+)|\(([^,()]+), line (\d+)\)"#).expect("python location pattern")
});

/// Parse `dotnet build` output into deduplicated diagnostics.
///
/// Falls back to one `BUILD_ERROR` per line mentioning ` error ` when no
/// structured diagnostic is found.
pub fn parse_dotnet_output(output: &str, project_dir: &Path) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    for caps in DOTNET_DIAGNOSTIC.captures_iter(output) {
        let path = caps[1].trim();
        let file = Path::new(path)
            .strip_prefix(project_dir)
            .map(|rel| rel.to_string_lossy().to_string())
            .unwrap_or_else(|_| path.to_string());
        let diagnostic = Diagnostic {
            file,
            line: caps[2].parse().unwrap_or(0),
            column: caps[3].parse().unwrap_or(0),
            severity: if &caps[4] == "error" {
                Severity::Error
            } else {
                Severity::Warning
            },
            code: caps[5].to_string(),
            message: PROJECT_SUFFIX.replace(&caps[6], "").trim().to_string(),
        };
        if !diagnostics.contains(&diagnostic) {
            diagnostics.push(diagnostic);
        }
    }
    if !diagnostics.is_empty() {
        return diagnostics;
    }

    for line in output.lines() {
        if line.to_lowercase().contains(" error ") && line.contains(": ") {
            let diagnostic = Diagnostic::unknown("BUILD_ERROR", line.trim());
            if !diagnostics.contains(&diagnostic) {
                diagnostics.push(diagnostic);
            }
        }
    }
    diagnostics
}

/// Parse `py_compile` stderr for `file`.
pub fn parse_python_error(stderr: &str, file: &str) -> Diagnostic {
    let line = PYTHON_LOCATION.captures(stderr).and_then(|caps| {
        caps.get(2)
            .or_else(|| caps.get(4))
            .and_then(|m| m.as_str().parse::<u32>().ok())
    });
    match line {
        Some(line) => Diagnostic {
            file: file.to_string(),
            line,
            column: 0,
            severity: Severity::Error,
            code: "SYNTAX_ERROR".to_string(),
            message: stderr
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .unwrap_or_default()
                .to_string(),
        },
        None => Diagnostic {
            file: file.to_string(),
            line: 0,
            column: 0,
            severity: Severity::Error,
            code: "UNKNOWN".to_string(),
            message: stderr.trim().to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dotnet_diagnostics() {
        let output = "\
  Determining projects to restore...
/work/Calc/Calc/Calculator.cs(12,5): error CS1002: ; expected [/work/Calc/Calc/Calc.csproj]
/work/Calc/Calc/Calculator.cs(3,1): warning CS8618: Non-nullable field 'x' [/work/Calc/Calc/Calc.csproj]
/work/Calc/Calc/Calculator.cs(12,5): error CS1002: ; expected [/work/Calc/Calc/Calc.csproj]

Build FAILED.
";
        let diags = parse_dotnet_output(output, Path::new("/work/Calc"));
        assert_eq!(diags.len(), 2);
        assert_eq!(diags[0], Diagnostic {
            file: "Calc/Calculator.cs".into(),
            line: 12,
            column: 5,
            severity: Severity::Error,
            code: "CS1002".into(),
            message: "; expected".into(),
        });
        assert_eq!(diags[1].severity, Severity::Warning);
    }

    #[test]
    fn dotnet_fallback_lines() {
        let output = "MSBUILD : error MSB1009: Project file does not exist.\nBuild FAILED.";
        let diags = parse_dotnet_output(output, Path::new("/x"));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, "BUILD_ERROR");
        assert_eq!(diags[0].file, "unknown");
        assert!(parse_dotnet_output("Build succeeded.\n    0 Error(s)", Path::new("/x")).is_empty());
    }

    #[test]
    fn parses_python_errors() {
        let stderr = "  File \"calc/core.py\", line 7\n    def add(a, b)\n                 ^\nSyntaxError: expected ':'\n";
        let diag = parse_python_error(stderr, "calc/core.py");
        assert_eq!(diag.line, 7);
        assert_eq!(diag.code, "SYNTAX_ERROR");
        assert_eq!(diag.message, "SyntaxError: expected ':'");

        let diag = parse_python_error("Sorry: IndentationError: unexpected indent (core.py, line 3)", "core.py");
        assert_eq!(diag.line, 3);

        let diag = parse_python_error("something odd", "core.py");
        assert_eq!(diag.code, "UNKNOWN");
        assert_eq!(diag.line, 0);
        assert_eq!(diag.message, "something odd");
    }

    #[test]
    fn failed_report_always_has_a_diagnostic() {
        let report = BuildReport::failed("No .sln file found in /x", Vec::new(), String::new());
        assert_eq!(report.diagnostics.len(), 1);
        assert_eq!(report.diagnostics[0].code, "BUILD_FAILED");
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn truncates_long_output() {
        let report = BuildReport::passed("ok", Vec::new(), "é".repeat(MAX_OUTPUT));
        assert!(report.output.ends_with("(truncated)"));
    }

    #[tokio::test]
    async fn missing_solution_fails_and_mirrors_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let verifier = BuildVerifier::default();
        let mut ctx = ToolContext::new(dir.path());
        let report = verifier.verify_dir(&mut ctx, dir.path(), Ecosystem::DotNet).await;
        assert!(!report.success);
        assert!(report.message.starts_with("No .sln file found"));
        assert!(ctx.metadata["build_errors"].is_array());
        assert!(ctx.metadata.contains_key("build_output"));
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "x = 1\n").unwrap();
        let verifier = BuildVerifier::new(BuildSettings {
            python_program: "definitely-not-a-python-binary".into(),
            ..Default::default()
        });
        let mut ctx = ToolContext::new(dir.path());
        let report = verifier.verify_dir(&mut ctx, dir.path(), Ecosystem::Python).await;
        assert!(!report.success);
        assert!(report.message.contains("not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_build_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.py"), "x = 1\n").unwrap();
        let slow = dir.path().join("slow.sh");
        std::fs::write(&slow, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&slow, std::fs::Permissions::from_mode(0o755)).unwrap();

        let verifier = BuildVerifier::new(BuildSettings {
            python_program: slow.to_string_lossy().into_owned(),
            python_timeout_secs: 1,
            ..Default::default()
        });
        let mut ctx = ToolContext::new(dir.path());
        let started = std::time::Instant::now();
        let report = verifier.verify_dir(&mut ctx, dir.path(), Ecosystem::Python).await;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(!report.success);
        assert!(report.message.contains("timed out"), "{}", report.message);
        assert_eq!(report.diagnostics[0].code, "BUILD_FAILED");
    }

    #[test]
    fn lists_python_files_skipping_caches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("pkg/__pycache__")).unwrap();
        std::fs::create_dir_all(dir.path().join(".venv")).unwrap();
        std::fs::write(dir.path().join("pkg/a.py"), "").unwrap();
        std::fs::write(dir.path().join("pkg/__pycache__/a.py"), "").unwrap();
        std::fs::write(dir.path().join(".venv/b.py"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        assert_eq!(list_python_files(dir.path()), ["pkg/a.py"]);
    }
}
