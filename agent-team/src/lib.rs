//! agent-team: a planner/coder/tester/reviewer pipeline that turns a
//! requirement into code, then into a project on disk that builds.
//!
//! - [`factory`]: the role workflow with its bounded revision loop
//! - [`extract`], [`split`], [`project`]: model text → source files → project
//! - [`build`], [`repair`]: compile the project and feed errors back to the coder
//! - [`tools`]: the same stages behind a name-keyed registry

pub mod build;
pub mod config;
pub mod extract;
pub mod factory;
pub mod llm;
pub mod materialize;
pub mod output;
pub mod project;
pub mod publish;
pub mod repair;
pub mod split;
pub mod tools;
