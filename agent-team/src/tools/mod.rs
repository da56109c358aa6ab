//! Tool layer shared by every pipeline stage.
//!
//! A [`ToolContext`] is the unit of work for one requirement: the output
//! directory, the in-memory working files and a free-form metadata map that
//! stages use to hand transient data (latest build diagnostics, raw build
//! output) to each other. Tools report through [`ToolResult`]s.
//!
//! The [`ToolRegistry`] is an explicit value built once at startup and then
//! shared read-only (`Arc<ToolRegistry>`) between concurrent runs.

pub mod builtin;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};


/// A tool's name, description and JSON input schema, as listed by
/// `agent-team tools`.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Unit-of-work handle for one requirement.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Output root for generated projects.
    pub project_dir: PathBuf,
    /// Credential handed to tools that call out (never logged).
    pub api_key: Option<String>,
    /// Logical name → in-memory content, not yet flushed to disk.
    pub working_files: HashMap<String, String>,
    /// Transient data passed between stages.
    pub metadata: Map<String, Value>,
}

impl ToolContext {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    pub fn get_file(&self, name: &str) -> Option<&str> {
        self.working_files.get(name).map(String::as_str)
    }

    pub fn set_file(&mut self, name: impl Into<String>, content: impl Into<String>) {
        self.working_files.insert(name.into(), content.into());
    }
}

/// Outcome of one tool invocation.
///
/// Built with [`ToolResult::ok`] / [`ToolResult::fail`] plus the `with_*`
/// builders; after that it is only read.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
    files_created: Vec<PathBuf>,
    errors: Vec<String>,
}

impl ToolResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            files_created: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// A failure whose only error is the message itself.
    pub fn fail(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            errors: vec![message.clone()],
            message,
            data: None,
            files_created: Vec::new(),
        }
    }

    pub fn fail_with(message: impl Into<String>, errors: Vec<String>) -> Self {
        let mut result = Self::fail(message);
        if !errors.is_empty() {
            result.errors = errors;
        }
        result
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_files(mut self, files: Vec<PathBuf>) -> Self {
        self.files_created = files;
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn files_created(&self) -> &[PathBuf] {
        &self.files_created
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// A named pipeline capability that can be looked up and invoked by name.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the `input` object accepted by [`Tool::execute`].
    fn input_schema(&self) -> Value;

    fn execute<'a>(
        &'a self,
        ctx: &'a mut ToolContext,
        input: &'a Value,
    ) -> BoxFuture<'a, ToolResult>;
}

/// Name → tool lookup table.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every pipeline stage registered.
    pub fn with_defaults(verifier: crate::build::BuildVerifier) -> Self {
        let mut registry = Self::new();
        builtin::register_defaults(&mut registry, verifier);
        registry
    }

    /// Register a tool, replacing (and returning) any tool with the same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Option<Arc<dyn Tool>> {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Execute a tool by name. Unknown names produce a failed result.
    pub async fn execute(&self, name: &str, ctx: &mut ToolContext, input: &Value) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::fail(format!("Tool not found: {name}"));
        };
        tracing::debug!(tool = name, "Executing tool");
        tool.execute(ctx, input).await
    }

    /// Definitions of every registered tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDef> {
        self.names()
            .into_iter()
            .filter_map(|name| self.tools.get(&name))
            .map(|tool| ToolDef {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }
}
