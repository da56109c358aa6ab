//! agent-team: requirement → plan → code → tests → review, with optional
//! project materialization and build repair.
//!
//!   agent-team run "a calculator with add and divide" --out out/calc --repair
//!   agent-team extract response.md --language csharp
//!   agent-team split code.cs
//!   agent-team assemble --code code.md --tests tests.md --ecosystem dotnet --out out/calc
//!   agent-team build out/calc --ecosystem dotnet
//!   agent-team tools
//!   agent-team artifacts --db team.db [ID]
//!
//! `run` needs an API key: --api-key, AGENT_TEAM_API_KEY or ANTHROPIC_API_KEY.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;

use agent_team::build::{BuildVerifier, Verifier};
use agent_team::config::{Provider, TeamConfig};
use agent_team::factory::Factory;
use agent_team::materialize::Materializer;
use agent_team::output::{self, REVIEWER};
use agent_team::project::Ecosystem;
use agent_team::publish::ArtifactStore;
use agent_team::repair::RepairLoop;
use agent_team::tools::{ToolContext, ToolRegistry, ToolResult};

#[derive(Parser)]
#[command(name = "agent-team", about = "A planner/coder/tester/reviewer team that writes buildable projects")]
struct Cli {
    /// TOML configuration file
    #[arg(long, short, global = true, env = "AGENT_TEAM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full workflow for a requirement
    Run(RunArgs),

    /// Strip markdown and narrative from a model response
    Extract {
        /// Input file (stdin when omitted)
        input: Option<PathBuf>,
        /// csharp, python, javascript, java or auto
        #[arg(long)]
        language: Option<String>,
        /// Keep `// File: X` marker lines
        #[arg(long)]
        keep_markers: bool,
    },

    /// Split code into per-file units
    Split {
        /// Input file (stdin when omitted)
        input: Option<PathBuf>,
        #[arg(long)]
        language: Option<String>,
    },

    /// Write a project from code and test responses
    Assemble {
        #[arg(long)]
        code: PathBuf,
        #[arg(long)]
        tests: Option<PathBuf>,
        /// dotnet or python
        #[arg(long)]
        ecosystem: Ecosystem,
        /// Project root directory
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        name: Option<String>,
        /// .NET target framework
        #[arg(long)]
        framework: Option<String>,
    },

    /// Build a generated project and report diagnostics
    Build {
        dir: PathBuf,
        #[arg(long)]
        ecosystem: Ecosystem,
    },

    /// List registered tools
    Tools,

    /// List stored outputs, or print one
    Artifacts {
        #[arg(long)]
        db: PathBuf,
        id: Option<i64>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// The requirement (or use --requirement-file)
    requirement: Option<String>,

    #[arg(long, conflicts_with = "requirement")]
    requirement_file: Option<PathBuf>,

    /// API key (or set AGENT_TEAM_API_KEY / ANTHROPIC_API_KEY)
    #[arg(long, env = "AGENT_TEAM_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// anthropic or openai
    #[arg(long, value_parser = parse_provider)]
    provider: Option<Provider>,

    /// Endpoint base URL (required for openai)
    #[arg(long)]
    base_url: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Materialize the project into this directory
    #[arg(long)]
    out: Option<PathBuf>,

    /// dotnet or python
    #[arg(long)]
    ecosystem: Option<Ecosystem>,

    /// Build once after writing the code
    #[arg(long)]
    verify: bool,

    /// Build and repair until the project compiles
    #[arg(long)]
    repair: bool,

    #[arg(long)]
    max_repair_iterations: Option<u32>,

    /// Store the final output in this SQLite database
    #[arg(long)]
    artifact_db: Option<PathBuf>,
}

fn parse_provider(s: &str) -> Result<Provider, String> {
    match s.to_ascii_lowercase().as_str() {
        "anthropic" | "claude" => Ok(Provider::Anthropic),
        "openai" | "dashscope" => Ok(Provider::OpenAi),
        other => Err(format!("unknown provider: {other} (expected anthropic or openai)")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TeamConfig::load(path)?,
        None => TeamConfig::default(),
    };

    match cli.command {
        Command::Run(args) => run(config, args).await,
        Command::Extract {
            input,
            language,
            keep_markers,
        } => {
            let text = read_input(input.as_deref()).await?;
            let mut body = json!({ "text": text, "keep_markers": keep_markers });
            if let Some(language) = language {
                body["language"] = json!(language);
            }
            let result = execute(&config, "extract_code", Path::new("."), &body).await;
            let code = result
                .data()
                .and_then(|d| d["code"].as_str())
                .map(str::to_string);
            match code {
                Some(code) if result.success() => {
                    println!("{code}");
                    Ok(())
                }
                _ => report(result),
            }
        }
        Command::Split { input, language } => {
            let code = read_input(input.as_deref()).await?;
            let mut body = json!({ "code": code });
            if let Some(language) = language {
                body["language"] = json!(language);
            }
            report(execute(&config, "split_code", Path::new("."), &body).await)
        }
        Command::Assemble {
            code,
            tests,
            ecosystem,
            out,
            name,
            framework,
        } => {
            let mut body = json!({
                "code": read_input(Some(&code)).await?,
                "ecosystem": ecosystem.as_str(),
                "packaging": config.pipeline.assemble.packaging,
            });
            if let Some(tests) = tests {
                body["tests"] = json!(read_input(Some(&tests)).await?);
            }
            if let Some(name) = name.or_else(|| config.pipeline.assemble.project_name.clone()) {
                body["project_name"] = json!(name);
            }
            let framework = framework.unwrap_or_else(|| config.pipeline.assemble.target_framework.clone());
            body["target_framework"] = json!(framework);
            report(execute(&config, "assemble_project", &out, &body).await)
        }
        Command::Build { dir, ecosystem } => {
            let body = json!({ "ecosystem": ecosystem.as_str() });
            report(execute(&config, "build_project", &dir, &body).await)
        }
        Command::Tools => {
            let registry = ToolRegistry::with_defaults(BuildVerifier::new(config.build));
            for def in registry.definitions() {
                println!("{:<18} {}", def.name, def.description);
            }
            Ok(())
        }
        Command::Artifacts { db, id } => artifacts(&db, id),
    }
}

/// Logs go to stderr so stdout carries only results.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "agent_team=info".into());
    let json = std::env::var("AGENT_TEAM_LOG_JSON").is_ok_and(|v| v == "1");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut text = String::new();
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read stdin")?;
            Ok(text)
        }
    }
}

async fn execute(config: &TeamConfig, tool: &str, dir: &Path, input: &Value) -> ToolResult {
    let registry = ToolRegistry::with_defaults(BuildVerifier::new(config.build.clone()));
    let mut ctx = ToolContext::new(dir);
    registry.execute(tool, &mut ctx, input).await
}

/// Print a tool result as JSON; a failed tool exits non-zero.
fn report(result: ToolResult) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success() {
        anyhow::bail!("{}", result.message());
    }
    Ok(())
}

async fn run(mut config: TeamConfig, args: RunArgs) -> Result<()> {
    let requirement = match (&args.requirement, &args.requirement_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => read_input(Some(path)).await?,
        (None, None) => read_input(None).await?,
    };

    // CLI flags override the config file.
    if let Some(key) = args
        .api_key
        .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
    {
        config.llm.api_key = Some(key);
    }
    if let Some(provider) = args.provider {
        config.llm.provider = provider;
    }
    if args.base_url.is_some() {
        config.llm.base_url = args.base_url;
    }
    if args.model.is_some() {
        config.llm.model = args.model;
    }
    let pipeline = &mut config.pipeline;
    if args.out.is_some() {
        pipeline.output_dir = args.out;
    }
    if args.ecosystem.is_some() {
        pipeline.ecosystem = args.ecosystem;
    }
    pipeline.verify |= args.verify;
    pipeline.repair |= args.repair;
    if let Some(n) = args.max_repair_iterations {
        pipeline.max_repair_iterations = n;
    }
    if args.artifact_db.is_some() {
        pipeline.artifact_db = args.artifact_db;
    }
    config.validate()?;

    let backend = config.backend()?;
    let roles = config.roles(backend);
    let fixer = roles.coder.clone();
    let mut factory = Factory::new(roles).with_credential(config.llm.api_key.clone());

    let pipeline = &config.pipeline;
    if let Some(dir) = &pipeline.output_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let ecosystem = pipeline.ecosystem.unwrap_or(Ecosystem::DotNet);
        let verifier: Arc<dyn Verifier> = Arc::new(BuildVerifier::new(config.build.clone()));
        let mut materializer = Materializer::new(dir, ecosystem, verifier)
            .with_options(pipeline.assemble.clone())
            .with_verification(pipeline.verify);
        if pipeline.repair {
            materializer = materializer
                .with_repair(RepairLoop::new(fixer).with_max_iterations(pipeline.max_repair_iterations));
        }
        factory = factory.with_materializer(materializer);
    } else if let Some(ecosystem) = pipeline.ecosystem {
        factory = factory.with_language(ecosystem.language());
    }
    if let Some(db) = &pipeline.artifact_db {
        factory = factory.with_publisher(Arc::new(ArtifactStore::open(db)?));
    }

    tracing::info!(
        provider = ?config.llm.provider,
        output_dir = ?pipeline.output_dir,
        repair = pipeline.repair,
        "Starting agent team"
    );
    let output = factory.run(&requirement).await?;
    output::say(REVIEWER, &output::preview(&output.review, 600));
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn artifacts(db: &Path, id: Option<i64>) -> Result<()> {
    let store = ArtifactStore::open(db)?;
    match id {
        Some(id) => {
            let output = store
                .get(id)?
                .with_context(|| format!("No artifact {id} in {}", db.display()))?;
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        None => {
            for artifact in store.list()? {
                println!(
                    "{:>4}  {:<22}  {}  {}  {}",
                    artifact.id,
                    artifact.status,
                    artifact.iterations,
                    artifact.created_at,
                    output::preview(&artifact.requirement, 60)
                );
            }
        }
    }
    Ok(())
}
