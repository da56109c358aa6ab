//! Workflow state and the revision decision.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::materialize::ProjectSummary;

/// Decision passes after which the workflow finalizes regardless of review.
pub const MAX_ITERATIONS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Approved,
    MaxIterationsReached,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Approved => write!(f, "approved"),
            Status::MaxIterationsReached => write!(f, "max_iterations_reached"),
        }
    }
}

/// The workflow's artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub requirement: String,
    pub plan: String,
    pub code: String,
    pub tests: String,
    pub review: String,
    pub iterations: u32,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectSummary>,
}

/// Where the workflow goes after a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Revise,
    Complete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub requirement: String,
    pub plan: String,
    pub code: String,
    pub tests: String,
    pub review: String,
    pub iteration: u32,
    pub needs_revision: bool,
    pub final_output: Option<FinalOutput>,
    /// Latest materialized project, carried into the final output.
    pub project: Option<ProjectSummary>,
}

impl WorkflowState {
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            ..Default::default()
        }
    }

    pub fn with_plan(self, plan: String) -> Self {
        Self { plan, ..self }
    }

    pub fn with_code(self, code: String) -> Self {
        Self { code, ..self }
    }

    pub fn with_tests(self, tests: String) -> Self {
        Self { tests, ..self }
    }

    /// Record a review; its first line decides the revision flag.
    pub fn with_review(self, review: String) -> Self {
        Self {
            needs_revision: needs_revision(&review),
            review,
            ..self
        }
    }

    pub fn with_project(self, project: ProjectSummary) -> Self {
        Self {
            project: Some(project),
            ..self
        }
    }

    /// Whether this is a revision pass (a review asked for changes).
    pub fn is_revision(&self) -> bool {
        self.needs_revision && !self.review.is_empty()
    }
}

/// A review asks for changes when its first line starts with
/// `NEEDS_REVISION`, in any case.
pub fn needs_revision(review: &str) -> bool {
    review
        .trim()
        .lines()
        .next()
        .is_some_and(|line| line.trim().to_uppercase().starts_with("NEEDS_REVISION"))
}

/// Count the pass and finalize when approved or out of iterations.
pub fn decide(state: WorkflowState) -> WorkflowState {
    let iteration = state.iteration + 1;
    if state.needs_revision && iteration < MAX_ITERATIONS {
        return WorkflowState { iteration, ..state };
    }

    let status = if state.needs_revision {
        Status::MaxIterationsReached
    } else {
        Status::Approved
    };
    let final_output = FinalOutput {
        requirement: state.requirement.clone(),
        plan: state.plan.clone(),
        code: state.code.clone(),
        tests: state.tests.clone(),
        review: state.review.clone(),
        iterations: iteration,
        status,
        project: state.project.clone(),
    };
    WorkflowState {
        iteration,
        needs_revision: false,
        final_output: Some(final_output),
        ..state
    }
}

pub fn should_continue(state: &WorkflowState) -> Route {
    if state.needs_revision && state.iteration < MAX_ITERATIONS {
        Route::Revise
    } else {
        Route::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reviewed(iteration: u32, review: &str) -> WorkflowState {
        WorkflowState {
            iteration,
            ..WorkflowState::new("req")
        }
        .with_review(review.to_string())
    }

    #[test]
    fn review_flag_follows_first_line() {
        assert!(needs_revision("NEEDS_REVISION\nfix the loop"));
        assert!(needs_revision("  needs_revision: missing tests"));
        assert!(!needs_revision("APPROVED\nNEEDS_REVISION later"));
        assert!(!needs_revision(""));

        let state = reviewed(0, "NEEDS_REVISION").with_review("APPROVED".into());
        assert!(!state.needs_revision);
    }

    #[test]
    fn approval_completes_immediately() {
        let state = decide(reviewed(0, "APPROVED"));
        assert_eq!(state.iteration, 1);
        assert_eq!(should_continue(&state), Route::Complete);
        let out = state.final_output.expect("finalized");
        assert_eq!(out.status, Status::Approved);
        assert_eq!(out.iterations, 1);
    }

    #[test]
    fn revision_loops_until_the_cap() {
        let state = decide(reviewed(0, "NEEDS_REVISION"));
        assert_eq!(state.iteration, 1);
        assert!(state.final_output.is_none());
        assert_eq!(should_continue(&state), Route::Revise);

        let state = decide(reviewed(state.iteration, "NEEDS_REVISION"));
        assert_eq!(state.iteration, 2);
        assert!(state.needs_revision);
        assert_eq!(should_continue(&state), Route::Revise);

        let state = decide(reviewed(state.iteration, "NEEDS_REVISION"));
        assert_eq!(state.iteration, 3);
        assert!(!state.needs_revision);
        assert_eq!(should_continue(&state), Route::Complete);
        let out = state.final_output.expect("finalized");
        assert_eq!(out.status, Status::MaxIterationsReached);
        assert_eq!(out.iterations, 3);
    }

    #[test]
    fn final_output_serializes_snake_case_status() {
        let out = decide(reviewed(2, "needs_revision")).final_output.unwrap();
        let json = serde_json::to_value(&out).unwrap();
        assert_eq!(json["status"], "max_iterations_reached");
        assert!(json.get("project").is_none());
    }
}
