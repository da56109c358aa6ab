//! Registry wrappers for the materialization stages.

use std::path::PathBuf;

use futures::future::BoxFuture;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolRegistry, ToolResult};
use crate::build::BuildVerifier;
use crate::extract::{detect_language, extract, extract_preserving_markers, Language};
use crate::project::{assemble, AssembleOptions, Ecosystem, PythonPackaging};
use crate::split::{split, split_response};

/// Register every pipeline stage.
pub fn register_defaults(registry: &mut ToolRegistry, verifier: BuildVerifier) {
    registry.register(ExtractCode);
    registry.register(SplitCode);
    registry.register(AssembleProject);
    registry.register(BuildProject { verifier });
}

fn str_field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

/// `language` field: absent or `"auto"` means detect.
fn language_field(input: &Value) -> Result<Option<Language>, ToolResult> {
    match str_field(input, "language") {
        None => Ok(None),
        Some(hint) => Language::from_hint(hint).map_err(|e| ToolResult::fail(e.to_string())),
    }
}

fn ecosystem_field(input: &Value) -> Result<Ecosystem, ToolResult> {
    let Some(raw) = str_field(input, "ecosystem") else {
        return Err(ToolResult::fail("Missing required field: ecosystem"));
    };
    raw.parse().map_err(|e: crate::project::UnknownEcosystem| ToolResult::fail(e.to_string()))
}

fn project_dir_field(ctx: &ToolContext, input: &Value) -> PathBuf {
    str_field(input, "project_dir")
        .map(PathBuf::from)
        .unwrap_or_else(|| ctx.project_dir().to_path_buf())
}

// ── extract_code ───────────────────────────────────────────────────

pub struct ExtractCode;

impl Tool for ExtractCode {
    fn name(&self) -> &str {
        "extract_code"
    }

    fn description(&self) -> &str {
        "Strip markdown fences, headings and narrative from a model response, leaving source code"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Raw model response" },
                "language": { "type": "string", "description": "csharp, python, javascript, java or auto" },
                "keep_markers": { "type": "boolean", "description": "Keep `// File: X` marker lines" }
            },
            "required": ["text"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a mut ToolContext, input: &'a Value) -> BoxFuture<'a, ToolResult> {
        Box::pin(async move {
            let Some(text) = str_field(input, "text") else {
                return ToolResult::fail("Missing required field: text");
            };
            let hint = match language_field(input) {
                Ok(hint) => hint,
                Err(result) => return result,
            };
            let keep_markers = input.get("keep_markers").and_then(Value::as_bool).unwrap_or(false);
            let code = if keep_markers {
                extract_preserving_markers(text, hint)
            } else {
                extract(text, hint)
            };
            let language = hint.unwrap_or_else(|| detect_language(&code));
            ctx.set_file("extracted_code", code.clone());
            ToolResult::ok(format!("Extracted {} line(s) of {language}", code.lines().count()))
                .with_data(json!({ "code": code, "language": language }))
        })
    }
}

// ── split_code ─────────────────────────────────────────────────────

pub struct SplitCode;

impl Tool for SplitCode {
    fn name(&self) -> &str {
        "split_code"
    }

    fn description(&self) -> &str {
        "Split extracted code into per-file units using file markers or top-level declarations"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string" },
                "language": { "type": "string", "description": "csharp, python, javascript, java or auto" }
            },
            "required": ["code"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a mut ToolContext, input: &'a Value) -> BoxFuture<'a, ToolResult> {
        Box::pin(async move {
            let Some(code) = str_field(input, "code") else {
                return ToolResult::fail("Missing required field: code");
            };
            let language = match language_field(input) {
                Ok(hint) => hint.unwrap_or_else(|| detect_language(code)),
                Err(result) => return result,
            };
            let files = split(code, language);
            if files.is_empty() {
                return ToolResult::fail("No code to split");
            }
            for file in &files {
                ctx.set_file(file.name.clone(), file.content.clone());
            }
            ToolResult::ok(format!("Split into {} file(s)", files.len())).with_data(json!({ "files": files }))
        })
    }
}

// ── assemble_project ───────────────────────────────────────────────

pub struct AssembleProject;

impl Tool for AssembleProject {
    fn name(&self) -> &str {
        "assemble_project"
    }

    fn description(&self) -> &str {
        "Write a buildable .NET solution or Python package from raw code and test responses"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "Main code (raw or extracted)" },
                "tests": { "type": "string", "description": "Test code (raw or extracted)" },
                "ecosystem": { "type": "string", "enum": ["dotnet", "python"] },
                "project_dir": { "type": "string", "description": "Defaults to the context's project dir" },
                "project_name": { "type": "string" },
                "target_framework": { "type": "string", "description": ".NET target framework, default net10.0" },
                "packaging": { "type": "string", "enum": ["setuptools", "poetry"] }
            },
            "required": ["code", "ecosystem"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a mut ToolContext, input: &'a Value) -> BoxFuture<'a, ToolResult> {
        Box::pin(async move {
            let Some(code) = str_field(input, "code") else {
                return ToolResult::fail("Missing required field: code");
            };
            let ecosystem = match ecosystem_field(input) {
                Ok(ecosystem) => ecosystem,
                Err(result) => return result,
            };
            let mut options = AssembleOptions {
                project_name: str_field(input, "project_name").map(str::to_string),
                ..Default::default()
            };
            if let Some(framework) = str_field(input, "target_framework") {
                options.target_framework = framework.to_string();
            }
            if str_field(input, "packaging") == Some("poetry") {
                options.packaging = PythonPackaging::Poetry;
            }

            let language = ecosystem.language();
            let main = split_response(code, language);
            let tests = str_field(input, "tests")
                .map(|t| split_response(t, language))
                .unwrap_or_default();
            let root = project_dir_field(ctx, input);

            match assemble(&root, ecosystem, &main, &tests, &options).await {
                Ok(project) => {
                    for file in main.iter().chain(&tests) {
                        ctx.set_file(file.name.clone(), file.content.clone());
                    }
                    let summary = serde_json::to_value(&project).unwrap_or(Value::Null);
                    ctx.metadata.insert("project".to_string(), summary.clone());
                    ToolResult::ok(format!("{ecosystem} project '{}' created", project.name))
                        .with_data(summary)
                        .with_files(project.written)
                }
                Err(e) => ToolResult::fail(format!("Error generating {ecosystem} project: {e}")),
            }
        })
    }
}

// ── build_project ──────────────────────────────────────────────────

pub struct BuildProject {
    verifier: BuildVerifier,
}

impl Tool for BuildProject {
    fn name(&self) -> &str {
        "build_project"
    }

    fn description(&self) -> &str {
        "Compile a generated project and report structured diagnostics"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "ecosystem": { "type": "string", "enum": ["dotnet", "python"] },
                "project_dir": { "type": "string", "description": "Defaults to the context's project dir" }
            },
            "required": ["ecosystem"]
        })
    }

    fn execute<'a>(&'a self, ctx: &'a mut ToolContext, input: &'a Value) -> BoxFuture<'a, ToolResult> {
        Box::pin(async move {
            let ecosystem = match ecosystem_field(input) {
                Ok(ecosystem) => ecosystem,
                Err(result) => return result,
            };
            let dir = project_dir_field(ctx, input);
            let report = self.verifier.verify_dir(ctx, &dir, ecosystem).await;
            let data = serde_json::to_value(&report).unwrap_or(Value::Null);
            if report.success {
                ToolResult::ok(report.message).with_data(data)
            } else {
                let errors = report
                    .diagnostics
                    .iter()
                    .map(|d| format!("{}({}): {} {}: {}", d.file, d.line, d.severity, d.code, d.message))
                    .collect();
                ToolResult::fail_with(report.message.clone(), errors).with_data(data)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ToolRegistry {
        ToolRegistry::with_defaults(BuildVerifier::default())
    }

    #[test]
    fn registers_every_stage() {
        assert_eq!(
            registry().names(),
            ["assemble_project", "build_project", "extract_code", "split_code"]
        );
    }

    #[tokio::test]
    async fn extract_then_split() {
        let registry = registry();
        let mut ctx = ToolContext::new("/tmp/unused");

        let raw = "Here is the code:\n```python\n# File: a.py\nx = 1\n# File: b.py\ny = 2\n```";
        let result = registry
            .execute("extract_code", &mut ctx, &json!({ "text": raw, "language": "python", "keep_markers": true }))
            .await;
        assert!(result.success());
        let code = result.data().unwrap()["code"].as_str().unwrap().to_string();
        assert_eq!(code, "# File: a.py\nx = 1\n# File: b.py\ny = 2");

        let result = registry
            .execute("split_code", &mut ctx, &json!({ "code": code, "language": "python" }))
            .await;
        assert!(result.success());
        assert_eq!(result.data().unwrap()["files"].as_array().unwrap().len(), 2);
        assert_eq!(ctx.get_file("b.py"), Some("y = 2"));
    }

    #[tokio::test]
    async fn bad_inputs_fail() {
        let registry = registry();
        let mut ctx = ToolContext::new("/tmp/unused");
        let result = registry
            .execute("extract_code", &mut ctx, &json!({ "text": "x", "language": "cobol" }))
            .await;
        assert!(!result.success());
        assert_eq!(result.message(), "unknown language: cobol");

        let result = registry.execute("assemble_project", &mut ctx, &json!({ "code": "x" })).await;
        assert_eq!(result.message(), "Missing required field: ecosystem");
    }

    #[tokio::test]
    async fn assembles_into_context_dir() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let mut ctx = ToolContext::new(dir.path());
        let result = registry
            .execute(
                "assemble_project",
                &mut ctx,
                &json!({
                    "code": "```csharp\npublic class Calc { }\n```",
                    "tests": "```csharp\n[TestFixture]\npublic class CalcTests { }\n```",
                    "ecosystem": "dotnet",
                    "project_name": "Calc"
                }),
            )
            .await;
        assert!(result.success(), "{}", result.message());
        assert_eq!(result.files_created().len(), 7);
        assert!(dir.path().join("Calc.Tests/CalcTests.cs").exists());
        assert_eq!(ctx.metadata["project"]["name"], "Calc");
    }
}
