//! Turns raw coder/tester output into a project on disk, optionally
//! verified and repaired.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::build::{BuildReport, Verifier};
use crate::extract::extract_preserving_markers;
use crate::project::{assemble, AssembleOptions, Ecosystem, GeneratedProject};
use crate::repair::RepairLoop;
use crate::split::split_response;
use crate::tools::ToolContext;

/// Result of materializing the main code.
pub struct Materialized {
    pub project: GeneratedProject,
    /// Code as written, after repair when the loop ran.
    pub code: String,
    pub report: Option<BuildReport>,
    /// Verification attempts; 0 when the build was not checked.
    pub iterations: u32,
    /// The repair loop ran and `code` is its result.
    pub repaired: bool,
}

/// Build outcome recorded in the final output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildSummary {
    pub success: bool,
    pub message: String,
    pub iterations: u32,
    pub errors: usize,
}

/// Project section of the final output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Written paths, relative to `dir`.
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProjectSummary {
    pub fn failed(dir: &Path, error: &anyhow::Error) -> Self {
        Self {
            dir: dir.to_path_buf(),
            error: Some(format!("{error:#}")),
            ..Default::default()
        }
    }

    pub fn from_project(project: &GeneratedProject, report: Option<&BuildReport>, iterations: u32) -> Self {
        Self {
            dir: project.root.clone(),
            name: Some(project.name.clone()),
            files: relative_files(project),
            build: report.map(|r| BuildSummary {
                success: r.success,
                message: r.message.clone(),
                iterations,
                errors: r.error_count(),
            }),
            error: None,
        }
    }

    /// Re-read the written file list, keeping the build outcome.
    pub fn refresh_files(&mut self, project: &GeneratedProject) {
        self.files = relative_files(project);
    }
}

fn relative_files(project: &GeneratedProject) -> Vec<String> {
    project
        .written
        .iter()
        .map(|p| {
            p.strip_prefix(&project.root)
                .unwrap_or(p)
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

pub struct Materializer {
    root: PathBuf,
    ecosystem: Ecosystem,
    options: AssembleOptions,
    verifier: Arc<dyn Verifier>,
    verify: bool,
    repair: Option<RepairLoop>,
}

impl Materializer {
    pub fn new(root: impl Into<PathBuf>, ecosystem: Ecosystem, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            root: root.into(),
            ecosystem,
            options: AssembleOptions::default(),
            verifier,
            verify: false,
            repair: None,
        }
    }

    pub fn with_options(mut self, options: AssembleOptions) -> Self {
        self.options = options;
        self
    }

    /// Verify the build once after writing, without repair.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Verify and repair after writing. Implies verification.
    pub fn with_repair(mut self, repair: RepairLoop) -> Self {
        self.verify = true;
        self.repair = Some(repair);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ecosystem(&self) -> Ecosystem {
        self.ecosystem
    }

    /// Write the main sources from a raw coder response, then verify and
    /// repair as configured.
    ///
    /// A `previous` project is revised in place: its main sources are
    /// replaced and its tests cleared, so nothing from the earlier pass is
    /// left on disk for the build to pick up.
    pub async fn materialize_code(
        &self,
        ctx: &mut ToolContext,
        previous: Option<GeneratedProject>,
        raw: &str,
    ) -> Result<Materialized> {
        let language = self.ecosystem.language();
        let code = extract_preserving_markers(raw, Some(language));
        let files = split_response(&code, language);
        let mut project = match previous {
            Some(mut project) => {
                project.clear_tests().await.context("Failed to clear previous tests")?;
                project
                    .replace_sources(&files)
                    .await
                    .context("Failed to replace project sources")?;
                project
            }
            None => assemble(&self.root, self.ecosystem, &files, &[], &self.options)
                .await
                .with_context(|| format!("Failed to assemble project in {}", self.root.display()))?,
        };
        for file in &files {
            ctx.set_file(file.name.clone(), file.content.clone());
        }

        if let Some(repair) = &self.repair {
            let outcome = repair
                .run(ctx, &mut project, self.verifier.as_ref(), &code)
                .await?;
            return Ok(Materialized {
                project,
                code: outcome.code,
                report: Some(outcome.report),
                iterations: outcome.iterations,
                repaired: true,
            });
        }

        let report = if self.verify {
            Some(self.verifier.verify(ctx, &project).await)
        } else {
            None
        };
        let iterations = u32::from(report.is_some());
        Ok(Materialized {
            project,
            code,
            report,
            iterations,
            repaired: false,
        })
    }

    /// Add tests from a raw tester response to an assembled project.
    pub async fn materialize_tests(&self, project: &mut GeneratedProject, raw: &str) -> Result<usize> {
        let files = split_response(raw, self.ecosystem.language());
        project
            .add_tests(&files)
            .await
            .context("Failed to write tests")?;
        Ok(files.len())
    }
}
