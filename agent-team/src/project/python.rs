//! Python package scaffolding.

/// Replace anything outside `[A-Za-z0-9_]` with `_` and lowercase.
pub(super) fn sanitize_name(raw: &str) -> String {
    let name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c.to_ascii_lowercase() } else { '_' })
        .collect();
    match name.chars().next() {
        None => "generated_app".to_string(),
        Some(c) if !c.is_ascii_alphabetic() => format!("app_{name}"),
        Some(_) => name,
    }
}

/// pytest only collects `test_*` modules.
pub(super) fn test_file_name(name: &str) -> String {
    match name.rsplit_once('/') {
        Some((dir, base)) if !base.starts_with("test_") => format!("{dir}/test_{base}"),
        None if !name.starts_with("test_") => format!("test_{name}"),
        _ => name.to_string(),
    }
}

pub(super) fn package_init(name: &str) -> String {
    format!("\"\"\"{name} package\"\"\"\n")
}

pub(super) const TESTS_INIT: &str = "\"\"\"Tests package\"\"\"\n";

pub(super) const REQUIREMENTS: &str = "\
# Core dependencies
pytest>=7.0.0
pytest-cov>=4.0.0

# Add your dependencies below
";

pub(super) fn setup_py(name: &str) -> String {
    format!(
        r#"from setuptools import setup, find_packages

setup(
    name="{name}",
    version="0.1.0",
    packages=find_packages(),
    install_requires=[],
    python_requires=">=3.8",
)
"#
    )
}

pub(super) fn pyproject(name: &str) -> String {
    format!(
        r#"[tool.poetry]
name = "{name}"
version = "0.1.0"
description = "Generated by agent-team"
authors = []

[tool.poetry.dependencies]
python = "^3.8"

[tool.poetry.group.dev.dependencies]
pytest = "^7.0.0"
pytest-cov = "^4.0.0"

[build-system]
requires = ["poetry-core"]
build-backend = "poetry.core.masonry.api"
"#
    )
}

pub(super) const GITIGNORE: &str = "\
# Python
__pycache__/
*.py[cod]
*.so
build/
dist/
*.egg-info/
.venv/
venv/

# Testing
.pytest_cache/
.coverage
htmlcov/

# IDE
.idea/
.vscode/
";

pub(super) fn readme(name: &str) -> String {
    format!(
        r#"# {name}

Generated by agent-team.

## Development

```bash
pip install -e .
pytest
pytest --cov={name}
```
"#
    )
}
