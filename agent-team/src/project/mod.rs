//! Project assembly: turn split source units into a buildable project tree.
//!
//! [`plan_layout`] is pure and decides every path and its contents;
//! [`assemble`] writes that plan under the root directory. Two profiles are
//! supported, a .NET solution ([`Ecosystem::DotNet`]) and a Python package
//! ([`Ecosystem::Python`]).

mod dotnet;
mod python;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::extract::Language;
use crate::split::SourceFile;

const MAX_NAME_LEN: usize = 50;

// ── Ecosystem ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    DotNet,
    Python,
}

impl Ecosystem {
    pub fn language(self) -> Language {
        match self {
            Self::DotNet => Language::CSharp,
            Self::Python => Language::Python,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DotNet => "dotnet",
            Self::Python => "python",
        }
    }
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown ecosystem: {0} (expected dotnet or python)")]
pub struct UnknownEcosystem(String);

impl FromStr for Ecosystem {
    type Err = UnknownEcosystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dotnet" | ".net" | "csharp" | "c#" | "cs" => Ok(Self::DotNet),
            "python" | "py" => Ok(Self::Python),
            _ => Err(UnknownEcosystem(s.to_string())),
        }
    }
}

/// Packaging descriptor written for Python projects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PythonPackaging {
    #[default]
    Setuptools,
    Poetry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleOptions {
    /// Explicit project name; the root directory's leaf name otherwise.
    pub project_name: Option<String>,
    pub target_framework: String,
    pub packaging: PythonPackaging,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            project_name: None,
            target_framework: "net10.0".to_string(),
            packaging: PythonPackaging::default(),
        }
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove stale file {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ── Layout ─────────────────────────────────────────────────────────

/// One file of a planned layout, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub path: PathBuf,
    pub contents: String,
}

impl PlannedFile {
    fn new(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            contents: contents.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub project_name: String,
    /// Main source directory, relative to the root.
    pub main_dir: PathBuf,
    /// Test source directory, relative to the root.
    pub test_dir: PathBuf,
    pub main_files: Vec<String>,
    pub test_files: Vec<String>,
    /// Every file to write, in write order.
    pub files: Vec<PlannedFile>,
}

/// Resolve and sanitize the project name for `ecosystem`.
pub fn resolve_project_name(root: &Path, ecosystem: Ecosystem, explicit: Option<&str>) -> String {
    let raw = explicit
        .filter(|name| !name.trim().is_empty())
        .map(str::to_string)
        .or_else(|| root.file_name().and_then(|n| n.to_str()).map(str::to_string))
        .unwrap_or_default();
    let name = match ecosystem {
        Ecosystem::DotNet => dotnet::sanitize_name(&raw),
        Ecosystem::Python => python::sanitize_name(&raw),
    };
    name.chars().take(MAX_NAME_LEN).collect()
}

/// Plan every path and its contents. Performs no I/O.
pub fn plan_layout(
    root: &Path,
    ecosystem: Ecosystem,
    main: &[SourceFile],
    tests: &[SourceFile],
    options: &AssembleOptions,
) -> Layout {
    let name = resolve_project_name(root, ecosystem, options.project_name.as_deref());
    let (main_dir, test_dir) = source_dirs(ecosystem, &name);
    let (main_units, test_units) = route(ecosystem, main, tests);

    let mut files = Vec::new();
    match ecosystem {
        Ecosystem::DotNet => {
            files.push(PlannedFile::new(format!("{name}.sln"), dotnet::solution(&name)));
            files.push(PlannedFile::new(
                main_dir.join(format!("{name}.csproj")),
                dotnet::project_file(&options.target_framework),
            ));
            files.push(PlannedFile::new(
                test_dir.join(format!("{name}.Tests.csproj")),
                dotnet::test_project_file(&name, &options.target_framework),
            ));
        }
        Ecosystem::Python => {
            files.push(PlannedFile::new(main_dir.join("__init__.py"), python::package_init(&name)));
            files.push(PlannedFile::new(test_dir.join("__init__.py"), python::TESTS_INIT));
        }
    }

    for (file_name, content) in &main_units {
        files.push(PlannedFile::new(join_relative(&main_dir, file_name), content.clone()));
    }
    for (file_name, content) in &test_units {
        files.push(PlannedFile::new(join_relative(&test_dir, file_name), content.clone()));
    }

    match ecosystem {
        Ecosystem::DotNet => {
            files.push(PlannedFile::new(".gitignore", dotnet::GITIGNORE));
            files.push(PlannedFile::new("README.md", dotnet::readme(&name)));
        }
        Ecosystem::Python => {
            files.push(PlannedFile::new("requirements.txt", python::REQUIREMENTS));
            match options.packaging {
                PythonPackaging::Setuptools => {
                    files.push(PlannedFile::new("setup.py", python::setup_py(&name)));
                }
                PythonPackaging::Poetry => {
                    files.push(PlannedFile::new("pyproject.toml", python::pyproject(&name)));
                }
            }
            files.push(PlannedFile::new(".gitignore", python::GITIGNORE));
            files.push(PlannedFile::new("README.md", python::readme(&name)));
        }
    }

    Layout {
        project_name: name,
        main_dir,
        test_dir,
        main_files: main_units.into_iter().map(|(n, _)| n).collect(),
        test_files: test_units.into_iter().map(|(n, _)| n).collect(),
        files,
    }
}

/// Plan and write a project under `root`.
pub async fn assemble(
    root: &Path,
    ecosystem: Ecosystem,
    main: &[SourceFile],
    tests: &[SourceFile],
    options: &AssembleOptions,
) -> Result<GeneratedProject, AssemblyError> {
    let layout = plan_layout(root, ecosystem, main, tests, options);
    let mut written = Vec::with_capacity(layout.files.len());
    for file in &layout.files {
        written.push(write_file(&root.join(&file.path), &file.contents).await?);
    }
    tracing::info!(
        project = %layout.project_name,
        ecosystem = %ecosystem,
        files = written.len(),
        "Assembled project"
    );
    Ok(GeneratedProject {
        root: root.to_path_buf(),
        ecosystem,
        main_dir: root.join(&layout.main_dir),
        test_dir: root.join(&layout.test_dir),
        name: layout.project_name,
        main_files: layout.main_files,
        test_files: layout.test_files,
        written,
    })
}

fn source_dirs(ecosystem: Ecosystem, name: &str) -> (PathBuf, PathBuf) {
    match ecosystem {
        Ecosystem::DotNet => (PathBuf::from(name), PathBuf::from(format!("{name}.Tests"))),
        Ecosystem::Python => (PathBuf::from(name), PathBuf::from("tests")),
    }
}

/// Partition units into (main, test) destinations, deduplicated by name.
fn route(
    ecosystem: Ecosystem,
    main: &[SourceFile],
    tests: &[SourceFile],
) -> (Vec<(String, String)>, Vec<(String, String)>) {
    let mut main_units = Vec::new();
    let mut test_units = Vec::new();
    for file in main {
        if file.test {
            upsert(&mut test_units, test_file_name(ecosystem, &file.name), &file.content);
        } else {
            upsert(&mut main_units, file.name.clone(), &file.content);
        }
    }
    for file in tests {
        upsert(&mut test_units, test_file_name(ecosystem, &file.name), &file.content);
    }
    (main_units, test_units)
}

fn upsert(units: &mut Vec<(String, String)>, name: String, content: &str) {
    match units.iter_mut().find(|(n, _)| *n == name) {
        Some(unit) => unit.1 = content.to_string(),
        None => units.push((name, content.to_string())),
    }
}

fn test_file_name(ecosystem: Ecosystem, name: &str) -> String {
    match ecosystem {
        Ecosystem::DotNet => name.to_string(),
        Ecosystem::Python => python::test_file_name(name),
    }
}

fn join_relative(dir: &Path, name: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    path.extend(name.split('/').filter(|part| !part.is_empty()));
    path
}

async fn write_file(path: &Path, contents: &str) -> Result<PathBuf, AssemblyError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| AssemblyError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| AssemblyError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(path.to_path_buf())
}

// ── Generated project ──────────────────────────────────────────────

/// A project on disk, as written by [`assemble`].
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedProject {
    pub root: PathBuf,
    pub ecosystem: Ecosystem,
    pub name: String,
    pub main_dir: PathBuf,
    pub test_dir: PathBuf,
    /// Names relative to `main_dir`.
    pub main_files: Vec<String>,
    /// Names relative to `test_dir`.
    pub test_files: Vec<String>,
    /// Every path written so far.
    pub written: Vec<PathBuf>,
}

impl GeneratedProject {
    /// Replace the main source set with `files`.
    ///
    /// Main files written earlier and absent from `files` are deleted.
    /// Units tagged `test` are written to the test directory.
    pub async fn replace_sources(&mut self, files: &[SourceFile]) -> Result<(), AssemblyError> {
        let (main_units, test_units) = route(self.ecosystem, files, &[]);

        let stale: Vec<PathBuf> = self
            .main_files
            .iter()
            .filter(|old| !main_units.iter().any(|(n, _)| n == *old))
            .map(|stale| join_relative(&self.main_dir, stale))
            .collect();
        for path in stale {
            self.forget(path).await?;
        }

        for (name, content) in &main_units {
            let path = write_file(&join_relative(&self.main_dir, name), content).await?;
            self.record(path);
        }
        self.main_files = main_units.into_iter().map(|(n, _)| n).collect();

        self.write_tests(test_units).await
    }

    /// Delete every test file written so far. Package scaffolding stays.
    pub async fn clear_tests(&mut self) -> Result<(), AssemblyError> {
        for name in std::mem::take(&mut self.test_files) {
            let path = join_relative(&self.test_dir, &name);
            self.forget(path).await?;
        }
        Ok(())
    }

    /// Write test units into the test directory, overwriting same-named files.
    pub async fn add_tests(&mut self, files: &[SourceFile]) -> Result<(), AssemblyError> {
        let (_, test_units) = route(self.ecosystem, &[], files);
        self.write_tests(test_units).await
    }

    async fn write_tests(&mut self, units: Vec<(String, String)>) -> Result<(), AssemblyError> {
        for (name, content) in units {
            let path = write_file(&join_relative(&self.test_dir, &name), &content).await?;
            self.record(path);
            if !self.test_files.contains(&name) {
                self.test_files.push(name);
            }
        }
        Ok(())
    }

    async fn forget(&mut self, path: PathBuf) -> Result<(), AssemblyError> {
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(AssemblyError::Remove { path, source }),
        }
        self.written.retain(|p| *p != path);
        Ok(())
    }

    fn record(&mut self, path: PathBuf) {
        if !self.written.contains(&path) {
            self.written.push(path);
        }
    }
}
