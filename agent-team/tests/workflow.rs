//! End-to-end workflow runs against scripted roles and build verifiers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::future::BoxFuture;

use agent_team::build::{BuildReport, Diagnostic, Severity, Verifier};
use agent_team::factory::{Factory, Roles, Status, MAX_ITERATIONS};
use agent_team::llm::Generate;
use agent_team::materialize::Materializer;
use agent_team::project::{AssembleOptions, Ecosystem, GeneratedProject};
use agent_team::publish::{ArtifactStore, Publish};
use agent_team::repair::RepairLoop;
use agent_team::tools::ToolContext;

type Script = Box<dyn Fn(usize) -> String + Send + Sync>;

/// Answers the n-th prompt (1-based) from a script and records every prompt.
struct Scripted {
    script: Script,
    prompts: Mutex<Vec<String>>,
}

impl Scripted {
    fn new(script: impl Fn(usize) -> String + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn fixed(text: &'static str) -> Arc<Self> {
        Self::new(move |_| text.to_string())
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Generate for Scripted {
    fn generate<'a>(&'a self, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            Ok((self.script)(prompts.len()))
        })
    }
}

/// Fails the first `failures` builds, then passes.
struct FlakyBuild {
    failures: u32,
    calls: AtomicU32,
}

impl FlakyBuild {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicU32::new(0),
        })
    }
}

impl Verifier for FlakyBuild {
    fn verify<'a>(&'a self, _ctx: &'a mut ToolContext, _project: &'a GeneratedProject) -> BoxFuture<'a, BuildReport> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n > self.failures {
                return BuildReport::passed("Python syntax check passed", Vec::new(), String::new());
            }
            BuildReport::failed(
                "Python syntax check failed",
                vec![Diagnostic {
                    file: "calc/calc.py".to_string(),
                    line: 1,
                    column: 7,
                    severity: Severity::Error,
                    code: "SYNTAX_ERROR".to_string(),
                    message: "invalid syntax".to_string(),
                }],
                String::new(),
            )
        })
    }
}

/// Fails while any Python file on disk still has an unclosed `(`, the way
/// a real syntax check over the whole tree would.
struct SyntaxOnDisk;

impl Verifier for SyntaxOnDisk {
    fn verify<'a>(&'a self, _ctx: &'a mut ToolContext, project: &'a GeneratedProject) -> BoxFuture<'a, BuildReport> {
        Box::pin(async move {
            let mut broken = Vec::new();
            for dir in [&project.main_dir, &project.test_dir] {
                for entry in std::fs::read_dir(dir).unwrap() {
                    let path = entry.unwrap().path();
                    let text = std::fs::read_to_string(&path).unwrap_or_default();
                    if text.contains("value = (") {
                        broken.push(path.display().to_string());
                    }
                }
            }
            if broken.is_empty() {
                BuildReport::passed("Python syntax check passed", Vec::new(), String::new())
            } else {
                BuildReport::failed(format!("Broken: {}", broken.join(", ")), Vec::new(), String::new())
            }
        })
    }
}

struct Team {
    planner: Arc<Scripted>,
    coder: Arc<Scripted>,
    tester: Arc<Scripted>,
    reviewer: Arc<Scripted>,
}

impl Team {
    fn new(reviewer: Arc<Scripted>) -> Self {
        Self {
            planner: Scripted::fixed("1. Add a `value` module"),
            coder: Scripted::new(|n| format!("Here's the code:\n```python\n# File: calc.py\nvalue = {n}\n```")),
            tester: Scripted::fixed("```python\nfrom calc.calc import value\n\ndef test_value():\n    assert value\n```"),
            reviewer,
        }
    }

    fn roles(&self) -> Roles {
        Roles {
            planner: self.planner.clone(),
            coder: self.coder.clone(),
            tester: self.tester.clone(),
            reviewer: self.reviewer.clone(),
        }
    }
}

fn python_options() -> AssembleOptions {
    AssembleOptions {
        project_name: Some("calc".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn approved_on_first_review() {
    let team = Team::new(Scripted::fixed("APPROVED\nClean and tested."));
    let output = Factory::new(team.roles()).run("store a value").await.unwrap();

    assert_eq!(output.status, Status::Approved);
    assert_eq!(output.iterations, 1);
    assert_eq!(output.plan, "1. Add a `value` module");
    assert!(output.code.contains("value = 1"));
    assert!(output.review.starts_with("APPROVED"));
    assert!(output.project.is_none());
    assert_eq!(team.coder.prompts().len(), 1);
    assert!(team.planner.prompts()[0].contains("Requirement: store a value"));
}

#[tokio::test]
async fn persistent_revision_requests_stop_at_cap() {
    let team = Team::new(Scripted::fixed("needs_revision\nMissing validation."));
    let output = Factory::new(team.roles()).run("store a value").await.unwrap();

    assert_eq!(output.status, Status::MaxIterationsReached);
    assert_eq!(output.iterations, MAX_ITERATIONS);
    assert!(output.code.contains("value = 3"));

    let prompts = team.coder.prompts();
    assert_eq!(prompts.len(), MAX_ITERATIONS as usize);
    assert!(!prompts[0].contains("PREVIOUS CODE"));
    assert!(prompts[1].contains("PREVIOUS CODE"));
    assert!(prompts[1].contains("Missing validation."));
}

#[tokio::test]
async fn revision_then_approval() {
    let reviewer = Scripted::new(|n| {
        if n == 1 {
            "NEEDS_REVISION\nRename things.".to_string()
        } else {
            "APPROVED".to_string()
        }
    });
    let team = Team::new(reviewer);
    let output = Factory::new(team.roles()).run("store a value").await.unwrap();

    assert_eq!(output.status, Status::Approved);
    assert_eq!(output.iterations, 2);
    assert_eq!(team.tester.prompts().len(), 2);
}

#[tokio::test]
async fn empty_requirement_is_rejected() {
    let team = Team::new(Scripted::fixed("APPROVED"));
    assert!(Factory::new(team.roles()).run("  \n").await.is_err());
    assert!(team.planner.prompts().is_empty());
}

#[tokio::test]
async fn materializes_and_publishes() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("calc");
    let team = Team::new(Scripted::fixed("APPROVED"));
    let store = Arc::new(ArtifactStore::in_memory().unwrap());

    let materializer = Materializer::new(&root, Ecosystem::Python, FlakyBuild::new(0))
        .with_options(python_options())
        .with_verification(true);
    let output = Factory::new(team.roles())
        .with_materializer(materializer)
        .with_publisher(store.clone() as Arc<dyn Publish>)
        .run("store a value")
        .await
        .unwrap();

    let project = output.project.clone().expect("project summary");
    assert_eq!(project.name.as_deref(), Some("calc"));
    assert!(project.error.is_none());
    assert!(project.files.contains(&"calc/calc.py".to_string()));
    assert!(project.files.contains(&"tests/test_main.py".to_string()));
    let build = project.build.expect("build summary");
    assert!(build.success);
    assert_eq!(build.iterations, 1);

    assert!(root.join("calc/calc.py").exists());
    assert!(root.join("setup.py").exists());
    assert!(team.coder.prompts()[0].contains("Write Python code"));

    let stored = store.list().unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, "approved");
    assert_eq!(store.get(stored[0].id).unwrap(), Some(output));
}

#[tokio::test]
async fn repaired_code_replaces_generated_code() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("calc");
    let team = Team::new(Scripted::fixed("APPROVED"));

    let materializer = Materializer::new(&root, Ecosystem::Python, FlakyBuild::new(1))
        .with_options(python_options())
        .with_repair(RepairLoop::new(team.coder.clone()).with_max_iterations(4));
    let output = Factory::new(team.roles())
        .with_materializer(materializer)
        .run("store a value")
        .await
        .unwrap();

    // First prompt writes the code, the second asks for the build fix.
    let prompts = team.coder.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("BUILD ERRORS"));
    assert!(prompts[1].contains("invalid syntax"));

    assert!(output.code.contains("value = 2"));
    let build = output.project.and_then(|p| p.build).expect("build summary");
    assert!(build.success);
    assert_eq!(build.iterations, 2);
    let written = std::fs::read_to_string(root.join("calc/calc.py")).unwrap();
    assert_eq!(written.trim(), "value = 2");
}

#[tokio::test]
async fn assembly_failure_is_recorded_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    // A file where the project directory should go.
    let root = dir.path().join("calc");
    std::fs::write(&root, "not a directory").unwrap();
    let team = Team::new(Scripted::fixed("APPROVED"));

    let materializer = Materializer::new(&root, Ecosystem::Python, FlakyBuild::new(0)).with_options(python_options());
    let output = Factory::new(team.roles())
        .with_materializer(materializer)
        .run("store a value")
        .await
        .unwrap();

    assert_eq!(output.status, Status::Approved);
    let project = output.project.expect("project summary");
    assert!(project.error.is_some());
    assert!(project.files.is_empty());
}

#[tokio::test]
async fn revision_leaves_no_stale_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("calc");
    let reviewer = Scripted::new(|n| {
        if n == 1 {
            "NEEDS_REVISION\nFix the syntax.".to_string()
        } else {
            "APPROVED".to_string()
        }
    });
    let mut team = Team::new(reviewer);
    team.coder = Scripted::new(|n| {
        if n == 1 {
            "```python\n# File: old.py\nvalue = (\n```".to_string()
        } else {
            "```python\n# File: new.py\nvalue = 2\n```".to_string()
        }
    });
    team.tester = Scripted::new(|n| {
        let module = if n == 1 { "old" } else { "new" };
        format!("```python\n# File: test_{module}.py\nfrom calc.{module} import value\n\ndef test_value():\n    assert value\n```")
    });

    let materializer = Materializer::new(&root, Ecosystem::Python, Arc::new(SyntaxOnDisk))
        .with_options(python_options())
        .with_verification(true);
    let output = Factory::new(team.roles())
        .with_materializer(materializer)
        .run("store a value")
        .await
        .unwrap();

    assert_eq!(output.status, Status::Approved);
    assert_eq!(output.iterations, 2);
    assert!(!root.join("calc/old.py").exists());
    assert!(!root.join("tests/test_old.py").exists());
    assert!(root.join("calc/new.py").exists());
    assert!(root.join("tests/test_new.py").exists());

    let project = output.project.expect("project summary");
    assert!(project.files.contains(&"calc/new.py".to_string()));
    assert!(project.files.contains(&"tests/test_new.py".to_string()));
    assert!(!project.files.iter().any(|f| f.contains("old")));
    let build = project.build.expect("build summary");
    assert!(build.success, "{}", build.message);
}
