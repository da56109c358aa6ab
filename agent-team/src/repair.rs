//! Build-and-fix loop: verify, hand diagnostics to a fixer model, rewrite the
//! sources, verify again.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::build::{BuildReport, Diagnostic, Verifier};
use crate::extract::{extract_preserving_markers, fenced_blocks, Language};
use crate::llm::Generate;
use crate::project::GeneratedProject;
use crate::split::split_response;
use crate::tools::ToolContext;

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Diagnostics included in one fix request, most recent last.
const FIX_REQUEST_DIAGNOSTICS: usize = 5;

const RULE: &str = "============================================================";
const CHANGE_MANDATORY: &str = "CRITICAL: Your previous answer did not change the code. You MUST provide corrected code!";

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub success: bool,
    /// Latest code, as persisted for the last verification.
    pub code: String,
    pub report: BuildReport,
    /// Verification attempts made.
    pub iterations: u32,
    /// Calls made to the fixer, retries included.
    pub fix_calls: u32,
}

pub struct RepairLoop {
    fixer: Arc<dyn Generate>,
    max_iterations: u32,
}

impl RepairLoop {
    pub fn new(fixer: Arc<dyn Generate>) -> Self {
        Self {
            fixer,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// At least one verification always runs.
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Verify `project`, asking the fixer for corrected code until the build
    /// passes or the iteration budget is spent.
    ///
    /// Each attempt persists the current code: the `current_code` working
    /// file, and the project's main sources rewritten from it. Fixer errors
    /// propagate.
    pub async fn run(
        &self,
        ctx: &mut ToolContext,
        project: &mut GeneratedProject,
        verifier: &dyn Verifier,
        code: &str,
    ) -> Result<RepairOutcome> {
        let language = project.ecosystem.language();
        let mut current = code.to_string();
        let mut fix_calls = 0;
        let mut iteration = 0;

        loop {
            iteration += 1;
            ctx.set_file("current_code", current.clone());
            let files = split_response(&current, language);
            project
                .replace_sources(&files)
                .await
                .context("Failed to write sources for verification")?;

            let report = verifier.verify(ctx, project).await;
            if report.success {
                tracing::info!(iteration, fix_calls, "Build passed");
                return Ok(RepairOutcome {
                    success: true,
                    code: current,
                    report,
                    iterations: iteration,
                    fix_calls,
                });
            }
            if iteration >= self.max_iterations {
                tracing::warn!(
                    iteration,
                    errors = report.error_count(),
                    "Build still failing, giving up"
                );
                return Ok(RepairOutcome {
                    success: false,
                    code: current,
                    report,
                    iterations: iteration,
                    fix_calls,
                });
            }

            tracing::info!(
                iteration,
                max = self.max_iterations,
                errors = report.error_count(),
                "Build failed, requesting fix"
            );
            let request = format_fix_request(&report.diagnostics);

            fix_calls += 1;
            let mut candidate = self.request_fix(&current, &request, language).await?;
            if candidate.is_empty() || candidate == current {
                tracing::warn!(iteration, "Fixer returned no change, retrying");
                fix_calls += 1;
                let amended = format!("{request}\n\n{CHANGE_MANDATORY}");
                candidate = self.request_fix(&current, &amended, language).await?;
            }
            if !candidate.is_empty() {
                current = candidate;
            }
        }
    }

    async fn request_fix(&self, code: &str, errors: &str, language: Language) -> Result<String> {
        let prompt = fix_prompt(code, errors, language);
        let response = self.fixer.generate(&prompt).await.context("Fix request failed")?;
        let blocks = fenced_blocks(&response);
        let body = if blocks.is_empty() {
            response
        } else {
            blocks.join("\n\n")
        };
        Ok(extract_preserving_markers(&body, Some(language)))
    }
}

/// Render the most recent diagnostics as a fix request.
pub fn format_fix_request(diagnostics: &[Diagnostic]) -> String {
    if diagnostics.is_empty() {
        return String::new();
    }
    let recent = &diagnostics[diagnostics.len().saturating_sub(FIX_REQUEST_DIAGNOSTICS)..];

    let mut out = vec!["BUILD ERRORS (fix these in your code):".to_string(), RULE.to_string()];
    for (i, d) in recent.iter().enumerate() {
        out.push(format!("\n{}. {} {}", i + 1, d.severity.to_string().to_uppercase(), d.code));
        out.push(format!("   File: {}", d.file));
        if d.line > 0 {
            out.push(format!("   Line: {}", d.line));
        }
        out.push(format!("   Issue: {}", d.message));
    }
    out.push(format!("\n{RULE}"));
    out.push("\nReturn only the corrected code that fixes these build errors.".to_string());
    out.join("\n")
}

fn fix_prompt(code: &str, errors: &str, language: Language) -> String {
    let tag = language.fence_tag();
    let marker = match language {
        Language::Python => "# File: name.py",
        _ => "// File: Name.cs",
    };
    format!(
        "You are an expert {lang} developer. Your code has build errors that must be fixed.\n\n\
         ORIGINAL CODE:\n```{tag}\n{code}\n```\n\n\
         {errors}\n\n\
         Provide the COMPLETE corrected code that fixes all build errors.\n\
         - Do not explain, just provide the fixed code\n\
         - Keep one `{marker}` line before each file\n\
         - Maintain the original functionality\n\
         - Wrap code in ```{tag} ``` blocks\n\n\
         FIXED CODE:",
        lang = language.display_name(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::build::Severity;
    use crate::project::{assemble, AssembleOptions, Ecosystem};
    use crate::split::SourceFile;

    /// Fails until attempt `pass_on` (never, when `None`).
    struct ScriptedVerifier {
        pass_on: Option<u32>,
        calls: AtomicU32,
    }

    impl ScriptedVerifier {
        fn new(pass_on: Option<u32>) -> Self {
            Self {
                pass_on,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl Verifier for ScriptedVerifier {
        fn verify<'a>(
            &'a self,
            _ctx: &'a mut ToolContext,
            _project: &'a GeneratedProject,
        ) -> BoxFuture<'a, BuildReport> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.pass_on == Some(n) {
                    BuildReport::passed("ok", Vec::new(), String::new())
                } else {
                    BuildReport::failed(
                        "failed",
                        vec![Diagnostic {
                            file: "pkg/main.py".into(),
                            line: n,
                            column: 0,
                            severity: Severity::Error,
                            code: "SYNTAX_ERROR".into(),
                            message: format!("attempt {n}"),
                        }],
                        String::new(),
                    )
                }
            })
        }
    }

    /// Returns `value = <n>` on the n-th call, or the same text every time.
    struct Fixer {
        calls: AtomicU32,
        fixed: Option<&'static str>,
    }

    impl Fixer {
        fn counting() -> Self {
            Self {
                calls: AtomicU32::new(0),
                fixed: None,
            }
        }
    }

    impl Generate for Fixer {
        fn generate<'a>(&'a self, _prompt: &'a str) -> BoxFuture<'a, Result<String>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(match self.fixed {
                    Some(text) => text.to_string(),
                    None => format!("Fixed it:\n```python\nvalue = {n}\n```\nDone."),
                })
            })
        }
    }

    struct FailingFixer;

    impl Generate for FailingFixer {
        fn generate<'a>(&'a self, _prompt: &'a str) -> BoxFuture<'a, Result<String>> {
            Box::pin(async { anyhow::bail!("backend down") })
        }
    }

    async fn project(dir: &std::path::Path) -> GeneratedProject {
        let main = [SourceFile {
            name: "main.py".into(),
            content: "value = 0".into(),
            test: false,
        }];
        let options = AssembleOptions {
            project_name: Some("pkg".into()),
            ..Default::default()
        };
        assemble(dir, Ecosystem::Python, &main, &[], &options).await.unwrap()
    }

    #[tokio::test]
    async fn always_failing_build_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path()).await;
        let mut ctx = ToolContext::new(dir.path());
        let verifier = ScriptedVerifier::new(None);
        let fixer = Arc::new(Fixer::counting());
        let repair = RepairLoop::new(fixer.clone()).with_max_iterations(4);

        let outcome = repair.run(&mut ctx, &mut project, &verifier, "value = 0").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.iterations, 4);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 4);
        assert_eq!(fixer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.fix_calls, 3);
        assert_eq!(outcome.code, "value = 3");
    }

    #[tokio::test]
    async fn passing_on_third_attempt_needs_two_fixes() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path()).await;
        let mut ctx = ToolContext::new(dir.path());
        let verifier = ScriptedVerifier::new(Some(3));
        let fixer = Arc::new(Fixer::counting());
        let repair = RepairLoop::new(fixer.clone());

        let outcome = repair.run(&mut ctx, &mut project, &verifier, "value = 0").await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(outcome.fix_calls, 2);
        assert_eq!(outcome.code, "value = 2");
        assert_eq!(ctx.get_file("current_code"), Some("value = 2"));
        let on_disk = std::fs::read_to_string(project.main_dir.join("main.py")).unwrap();
        assert_eq!(on_disk, "value = 2");
    }

    #[tokio::test]
    async fn unchanged_fix_is_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path()).await;
        let mut ctx = ToolContext::new(dir.path());
        let verifier = ScriptedVerifier::new(None);
        let fixer = Arc::new(Fixer {
            calls: AtomicU32::new(0),
            fixed: Some("```python\nvalue = 0\n```"),
        });
        let repair = RepairLoop::new(fixer.clone()).with_max_iterations(2);

        let outcome = repair.run(&mut ctx, &mut project, &verifier, "value = 0").await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.fix_calls, 2);
        assert_eq!(fixer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.code, "value = 0");
    }

    #[tokio::test]
    async fn fixer_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = project(dir.path()).await;
        let mut ctx = ToolContext::new(dir.path());
        let verifier = ScriptedVerifier::new(None);
        let repair = RepairLoop::new(Arc::new(FailingFixer));
        let err = repair
            .run(&mut ctx, &mut project, &verifier, "value = 0")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("backend down"));
    }

    #[test]
    fn fix_request_keeps_last_five() {
        let diags: Vec<Diagnostic> = (1..=7)
            .map(|i| Diagnostic {
                file: "A.cs".into(),
                line: if i == 7 { 0 } else { i },
                column: 1,
                severity: Severity::Error,
                code: format!("CS000{i}"),
                message: format!("problem {i}"),
            })
            .collect();
        let text = format_fix_request(&diags);
        assert!(text.starts_with("BUILD ERRORS (fix these in your code):"));
        assert!(!text.contains("CS0002"));
        assert!(text.contains("1. ERROR CS0003"));
        assert!(text.contains("5. ERROR CS0007"));
        assert!(text.contains("   Line: 6"));
        assert!(!text.contains("   Line: 0"));
        assert!(format_fix_request(&[]).is_empty());
    }
}
