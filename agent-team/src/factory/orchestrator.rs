//! Factory orchestrator: runs the roles through the revision pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};

use super::prompts;
use super::state::{decide, should_continue, FinalOutput, Route, WorkflowState};
use crate::extract::Language;
use crate::llm::Generate;
use crate::materialize::{Materializer, ProjectSummary};
use crate::output::{self, BUILDER, CODER, PLANNER, REVIEWER, TESTER};
use crate::project::GeneratedProject;
use crate::publish::Publish;
use crate::tools::ToolContext;

/// Pipeline phase, for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Planning,
    Coding,
    Testing,
    Reviewing,
    Deciding,
    Complete,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Planning => write!(f, "planning"),
            Phase::Coding => write!(f, "coding"),
            Phase::Testing => write!(f, "testing"),
            Phase::Reviewing => write!(f, "reviewing"),
            Phase::Deciding => write!(f, "deciding"),
            Phase::Complete => write!(f, "complete"),
        }
    }
}

/// One generator per role.
#[derive(Clone)]
pub struct Roles {
    pub planner: Arc<dyn Generate>,
    pub coder: Arc<dyn Generate>,
    pub tester: Arc<dyn Generate>,
    pub reviewer: Arc<dyn Generate>,
}

impl Roles {
    /// Every role backed by the same generator.
    pub fn uniform(generator: Arc<dyn Generate>) -> Self {
        Self {
            planner: generator.clone(),
            coder: generator.clone(),
            tester: generator.clone(),
            reviewer: generator,
        }
    }
}

/// The agent team.
pub struct Factory {
    roles: Roles,
    language: Option<Language>,
    materializer: Option<Materializer>,
    publishers: Vec<Arc<dyn Publish>>,
    credential: Option<String>,
}

impl Factory {
    pub fn new(roles: Roles) -> Self {
        Self {
            roles,
            language: None,
            materializer: None,
            publishers: Vec::new(),
            credential: None,
        }
    }

    /// Target language named in the coder and tester prompts.
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    /// Write generated code to disk after coding and testing. Also fixes the
    /// target language to the materializer's ecosystem.
    pub fn with_materializer(mut self, materializer: Materializer) -> Self {
        self.language = Some(materializer.ecosystem().language());
        self.materializer = Some(materializer);
        self
    }

    /// Credential placed on each run's tool context.
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publish>) -> Self {
        self.publishers.push(publisher);
        self
    }

    /// Run the workflow for one requirement until approval or the iteration
    /// cap, then publish the output.
    pub async fn run(&self, requirement: &str) -> Result<FinalOutput> {
        if requirement.trim().is_empty() {
            anyhow::bail!("Requirement is empty");
        }
        let root = self
            .materializer
            .as_ref()
            .map(|m| m.root().to_path_buf())
            .unwrap_or_default();
        let mut ctx = ToolContext::new(root).with_api_key(self.credential.clone());
        let mut project: Option<GeneratedProject> = None;

        tracing::info!(phase = %Phase::Planning, "Workflow started");
        let mut state = self.plan(WorkflowState::new(requirement)).await?;

        loop {
            state = self.code(&mut ctx, state, &mut project).await?;
            state = self.test(state, &mut project).await?;
            state = self.review(state).await?;

            state = decide(state);
            tracing::info!(phase = %Phase::Deciding, iteration = state.iteration, "Decision made");
            match should_continue(&state) {
                Route::Revise => {
                    output::status(
                        REVIEWER,
                        "🔁",
                        &format!("Revision needed (iteration {})", state.iteration),
                    );
                }
                Route::Complete => break,
            }
        }

        let output = state
            .final_output
            .context("Workflow completed without a final output")?;
        tracing::info!(
            phase = %Phase::Complete,
            status = %output.status,
            iterations = output.iterations,
            "Workflow complete"
        );
        self.publish(&output).await;
        Ok(output)
    }

    async fn plan(&self, state: WorkflowState) -> Result<WorkflowState> {
        output::status(PLANNER, "📋", "Analyzing requirements...");
        let plan = self
            .roles
            .planner
            .generate(&prompts::planning(&state))
            .await
            .context("Planner failed")?;
        output::status(PLANNER, "📋", &format!("Plan created ({} chars)", plan.len()));
        Ok(state.with_plan(plan))
    }

    async fn code(
        &self,
        ctx: &mut ToolContext,
        state: WorkflowState,
        project: &mut Option<GeneratedProject>,
    ) -> Result<WorkflowState> {
        tracing::info!(phase = %Phase::Coding, iteration = state.iteration, "Stage");
        let verb = if state.is_revision() { "Revising" } else { "Writing" };
        output::status(CODER, "✏️", &format!("{verb} code..."));
        let code = self
            .roles
            .coder
            .generate(&prompts::coding(&state, self.language))
            .await
            .context("Coder failed")?;
        output::status(CODER, "✏️", &format!("Code written ({} chars)", code.len()));
        let state = state.with_code(code);

        let Some(materializer) = &self.materializer else {
            return Ok(state);
        };
        match materializer.materialize_code(ctx, project.take(), &state.code).await {
            Ok(done) => {
                let summary = ProjectSummary::from_project(&done.project, done.report.as_ref(), done.iterations);
                if let Some(build) = &summary.build {
                    let emoji = if build.success { "✅" } else { "❌" };
                    output::status(
                        BUILDER,
                        emoji,
                        &format!("{} after {} attempt(s)", build.message, build.iterations),
                    );
                }
                output::file_tree(BUILDER, &summary.files);
                *project = Some(done.project);
                let state = state.with_project(summary);
                Ok(if done.repaired { state.with_code(done.code) } else { state })
            }
            Err(e) => {
                output::error(BUILDER, &format!("Materialization failed: {e:#}"));
                Ok(state.with_project(ProjectSummary::failed(materializer.root(), &e)))
            }
        }
    }

    async fn test(&self, mut state: WorkflowState, project: &mut Option<GeneratedProject>) -> Result<WorkflowState> {
        tracing::info!(phase = %Phase::Testing, iteration = state.iteration, "Stage");
        output::status(TESTER, "🧪", "Writing tests...");
        let tests = self
            .roles
            .tester
            .generate(&prompts::testing(&state, self.language))
            .await
            .context("Tester failed")?;
        output::status(TESTER, "🧪", &format!("Tests written ({} chars)", tests.len()));

        if let (Some(materializer), Some(project)) = (&self.materializer, project.as_mut()) {
            match materializer.materialize_tests(project, &tests).await {
                Ok(count) => {
                    output::status(TESTER, "📄", &format!("{count} test file(s) written"));
                    if let Some(summary) = state.project.as_mut() {
                        summary.refresh_files(project);
                    }
                }
                Err(e) => {
                    output::error(TESTER, &format!("Writing tests failed: {e:#}"));
                    if let Some(summary) = state.project.as_mut() {
                        summary.error = Some(format!("{e:#}"));
                    }
                }
            }
        }
        Ok(state.with_tests(tests))
    }

    async fn review(&self, state: WorkflowState) -> Result<WorkflowState> {
        tracing::info!(phase = %Phase::Reviewing, iteration = state.iteration, "Stage");
        output::status(REVIEWER, "🔍", "Reviewing code...");
        let review = self
            .roles
            .reviewer
            .generate(&prompts::reviewing(&state))
            .await
            .context("Reviewer failed")?;
        let state = state.with_review(review);
        let verdict = if state.needs_revision { "NEEDS_REVISION" } else { "APPROVED" };
        output::status(REVIEWER, "🔍", &format!("Review complete: {verdict}"));
        Ok(state)
    }

    /// Publisher failures are logged, never returned.
    async fn publish(&self, output: &FinalOutput) {
        for publisher in &self.publishers {
            match publisher.publish(output).await {
                Ok(id) => tracing::info!(publisher = publisher.name(), id = %id, "Published"),
                Err(e) => tracing::warn!(publisher = publisher.name(), error = %format!("{e:#}"), "Publish failed"),
            }
        }
    }
}
