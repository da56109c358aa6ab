//! The agent team workflow.
//!
//! Roles run as a fixed pipeline with a bounded revision loop:
//! - Planner: turns the requirement into a technical plan
//! - Coder: implements the plan, or revises it from review feedback
//! - Tester: writes tests for the code
//! - Reviewer: approves or asks for a revision (`NEEDS_REVISION`)
//!
//! After each review a decision either finalizes the output or routes back
//! to the coder, at most [`MAX_ITERATIONS`] times.

mod orchestrator;
pub mod prompts;
mod state;

pub use orchestrator::{Factory, Phase, Roles};
pub use state::{
    decide, needs_revision, should_continue, FinalOutput, Route, Status, WorkflowState, MAX_ITERATIONS,
};
