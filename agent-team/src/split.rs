//! File splitting: partition one extracted blob into per-file units.
//!
//! Strategies, first match wins:
//! 1. explicit marker lines (`// File: Calculator.cs`);
//! 2. top-level brace-delimited containers (C#/Java classes, structs, ...),
//!    with any code left between them collected into one more unit;
//! 3. the whole blob as a single file.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::extract::{extract, extract_preserving_markers, file_marker, Language};

/// One unit produced by the splitter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Relative file name, unique within its destination directory.
    pub name: String,
    pub content: String,
    /// Test-like unit; the assembler routes these to the test directory.
    pub test: bool,
}

static CONTAINER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?m)^[ \t]*(?:(?:public|internal|private|protected|static|sealed|abstract|partial|readonly|unsafe|final|file)[ \t]+)*(?:class|struct|interface|enum|record(?:[ \t]+(?:class|struct))?)[ \t]+([A-Za-z_]\w*)",
    )
    .expect("container pattern")
});
static NAMESPACE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^[ \t]*namespace[ \t]+([\w.]+)[ \t]*(;)?").expect("namespace pattern")
});
static TEST_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"class\s+(\w+Tests?)\b").expect("test class pattern"));

const TEST_SIGNATURES: &[&str] = &[
    "[TestFixture]",
    "[Test]",
    "[TestCase",
    "[Fact]",
    "[Theory]",
    "[TestMethod]",
    "Assert.",
    "@Test",
    "import pytest",
    "import unittest",
    "def test_",
];

// Never replicated into non-test units: the main project does not reference
// these packages.
const TEST_USINGS: &[&str] = &["NUnit", "Moq", "Xunit", "Microsoft.VisualStudio.TestTools"];

/// Split `code` into files. Never empty for non-empty input.
pub fn split(code: &str, language: Language) -> Vec<SourceFile> {
    if code.trim().is_empty() {
        return Vec::new();
    }
    if let Some(files) = split_on_markers(code, language) {
        return files;
    }
    if matches!(language, Language::CSharp | Language::Java)
        && let Some(files) = split_on_containers(code, language)
    {
        return files;
    }
    vec![single_file(code, language)]
}

/// Clean a raw model response, split it, and clean each unit on its own.
pub fn split_response(raw: &str, language: Language) -> Vec<SourceFile> {
    let code = extract_preserving_markers(raw, Some(language));
    split(&code, language)
        .into_iter()
        .map(|mut file| {
            file.content = extract(&file.content, Some(language));
            file
        })
        .collect()
}

/// Whether a unit with this name and content is test code.
pub fn is_test_unit(name: &str, content: &str, language: Language) -> bool {
    let by_name = match language {
        Language::Python => {
            let base = name.rsplit('/').next().unwrap_or(name);
            base.starts_with("test_") || base.ends_with("_test.py")
        }
        _ => name.contains("Test"),
    };
    by_name || has_test_signature(content)
}

fn has_test_signature(content: &str) -> bool {
    TEST_SIGNATURES.iter().any(|sig| content.contains(sig))
}

/// Insert, overwriting a same-named unit in place.
fn upsert(files: &mut Vec<SourceFile>, file: SourceFile) {
    match files.iter_mut().find(|f| f.name == file.name) {
        Some(existing) => *existing = file,
        None => files.push(file),
    }
}

fn split_on_markers(code: &str, language: Language) -> Option<Vec<SourceFile>> {
    // (name, start of marker line, end of marker line)
    let mut markers: Vec<(String, usize, usize)> = Vec::new();
    let mut offset = 0;
    for line in code.split_inclusive('\n') {
        if let Some(name) = file_marker(line) {
            markers.push((sanitize_name(name), offset, offset + line.len()));
        }
        offset += line.len();
    }
    if markers.is_empty() {
        return None;
    }

    // Directives above the first marker are shared by every unit.
    let usings = collect_usings(&code[..markers[0].1]);

    let mut files = Vec::with_capacity(markers.len());
    for (i, (name, _, body_start)) in markers.iter().enumerate() {
        let body_end = markers.get(i + 1).map_or(code.len(), |next| next.1);
        let body = code[*body_start..body_end].trim();
        let name = if name.is_empty() {
            format!("file{}{}", i + 1, language.extension())
        } else {
            name.clone()
        };
        let test = is_test_unit(&name, body, language);
        let content = prepend_usings(&usings, body, test);
        upsert(&mut files, SourceFile { name, content, test });
    }
    Some(files)
}

/// Prefix `body` with the shared usings it does not already declare.
fn prepend_usings(usings: &[String], body: &str, test: bool) -> String {
    let missing: Vec<&str> = shared_usings(usings, test)
        .into_iter()
        .filter(|u| !body.lines().any(|line| line.trim() == *u))
        .collect();
    if missing.is_empty() {
        return body.to_string();
    }
    format!("{}\n\n{body}", missing.join("\n"))
}

/// Keep a marker-declared name relative: no roots, no `..`.
fn sanitize_name(name: &str) -> String {
    name.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .collect::<Vec<_>>()
        .join("/")
}

fn split_on_containers(code: &str, language: Language) -> Option<Vec<SourceFile>> {
    let mut spans: Vec<(String, usize, usize)> = Vec::new();
    let mut claimed_until = 0;

    for caps in CONTAINER.captures_iter(code) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() < claimed_until {
            // Nested inside the previous container.
            continue;
        }
        let start = extend_over_prelude(code, whole.start());
        let end = find_body_end(code, whole.end()).unwrap_or(code.len());
        spans.push((name.as_str().to_string(), start, end));
        claimed_until = end;
    }
    if spans.is_empty() {
        return None;
    }

    let first_start = spans[0].1;
    let usings = collect_usings(&code[..first_start]);
    let namespace = find_namespace(&code[..first_start]);

    let rest = outside_spans(code, &spans, namespace.as_ref());

    let mut files = Vec::with_capacity(spans.len() + 1);
    for (name, start, end) in spans {
        let body = code[start..end].trim_end();
        let file_name = format!("{name}{}", language.extension());
        let test = is_test_unit(&file_name, body, language);
        let content = assemble_unit(&usings, namespace.as_ref(), body, test);
        upsert(
            &mut files,
            SourceFile {
                name: file_name,
                content,
                test,
            },
        );
    }

    // Top-level statements and anything else between containers. Kept out
    // of the namespace: C# top-level statements must precede it.
    if !rest.is_empty() {
        let test = has_test_signature(&rest);
        let name = unclaimed_name(&files, language);
        let content = assemble_unit(&usings, None, &rest, test);
        upsert(&mut files, SourceFile { name, content, test });
    }
    Some(files)
}

/// Text outside every container span, minus the shared usings and the
/// namespace wrapper that each unit gets anyway.
fn outside_spans(code: &str, spans: &[(String, usize, usize)], namespace: Option<&Namespace>) -> String {
    let mut gaps: Vec<String> = Vec::with_capacity(spans.len() + 1);
    let mut cursor = 0;
    for (_, start, end) in spans {
        gaps.push(code[cursor..(*start).max(cursor)].to_string());
        cursor = (*end).max(cursor);
    }
    gaps.push(code[cursor..].to_string());

    let head = gaps[0]
        .lines()
        .filter(|line| !is_using_directive(line.trim()))
        .collect::<Vec<_>>()
        .join("\n");
    let mut head = NAMESPACE.replace(&head, "").into_owned();
    if namespace.is_some_and(|ns| !ns.file_scoped) {
        if let Some(open) = head.find('{') {
            head.remove(open);
        }
        if let Some(tail) = gaps.last_mut()
            && let Some(close) = tail.rfind('}')
        {
            tail.remove(close);
        }
    }
    gaps[0] = head;

    gaps.iter()
        .map(|gap| gap.trim())
        .filter(|gap| !gap.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// `Program.cs` unless a container already took that name.
fn unclaimed_name(files: &[SourceFile], language: Language) -> String {
    let stem = match language {
        Language::Java => "Main",
        _ => "Program",
    };
    let ext = language.extension();
    let mut name = format!("{stem}{ext}");
    let mut n = 2;
    while files.iter().any(|f| f.name == name) {
        name = format!("{stem}{n}{ext}");
        n += 1;
    }
    name
}

/// Move a declaration's start back over attribute and `///` doc lines.
fn extend_over_prelude(code: &str, decl_start: usize) -> usize {
    let line_start = code[..decl_start].rfind('\n').map_or(0, |i| i + 1);
    let mut start = line_start;
    while start > 0 {
        let prev_end = start - 1;
        let prev_start = code[..prev_end].rfind('\n').map_or(0, |i| i + 1);
        let prev = code[prev_start..prev_end].trim();
        let is_prelude = (prev.starts_with('[') && prev.ends_with(']'))
            || prev.starts_with("///")
            || prev.starts_with('@');
        if !is_prelude {
            break;
        }
        start = prev_start;
    }
    start
}

/// Byte offset just past the brace closing the body that opens after `from`.
///
/// Braces inside string/char literals and comments are ignored, and so is
/// anything inside parentheses before the body opens. A `;` at top level
/// before any `{` ends a body-less declaration (`record Point(int X);`).
/// `None` when the body never closes.
pub(crate) fn find_body_end(code: &str, from: usize) -> Option<usize> {
    let bytes = code.as_bytes();
    let mut i = from;
    let mut parens: i32 = 0;
    let mut depth: i32 = 0;
    let mut opened = false;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = memchr_from(bytes, b'\n', i).unwrap_or(bytes.len());
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = code[i + 2..].find("*/").map_or(bytes.len(), |p| i + 2 + p + 2);
                continue;
            }
            b'"' => {
                i = skip_string(code, i);
                continue;
            }
            b'\'' => {
                i = skip_char_literal(bytes, i);
                continue;
            }
            b'(' | b'[' if !opened => parens += 1,
            b')' | b']' if !opened => parens = (parens - 1).max(0),
            b';' if !opened && parens == 0 => return Some(i + 1),
            b'{' if opened || parens == 0 => {
                opened = true;
                depth += 1;
            }
            b'}' if opened => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn memchr_from(bytes: &[u8], needle: u8, from: usize) -> Option<usize> {
    bytes[from..].iter().position(|b| *b == needle).map(|p| from + p)
}

/// Index just past the string literal starting at `start` (a `"`).
fn skip_string(code: &str, start: usize) -> usize {
    let bytes = code.as_bytes();
    if code[start..].starts_with("\"\"\"") {
        return code[start + 3..]
            .find("\"\"\"")
            .map_or(bytes.len(), |p| start + 3 + p + 3);
    }
    let verbatim = start > 0 && bytes[start - 1] == b'@'
        || start > 1 && bytes[start - 1] == b'$' && bytes[start - 2] == b'@';
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if !verbatim => i += 2,
            b'"' if verbatim && bytes.get(i + 1) == Some(&b'"') => i += 2,
            b'"' => return i + 1,
            b'\n' if !verbatim => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Index just past a char literal, or one past the quote when it is not one.
fn skip_char_literal(bytes: &[u8], start: usize) -> usize {
    match (bytes.get(start + 1), bytes.get(start + 2)) {
        (Some(b'\\'), _) => bytes[start + 2..]
            .iter()
            .take(8)
            .position(|b| *b == b'\'')
            .map_or(start + 1, |p| start + 2 + p + 1),
        (Some(_), Some(b'\'')) => start + 3,
        _ => start + 1,
    }
}

fn is_using_directive(line: &str) -> bool {
    line.starts_with("using ") && line.ends_with(';') && !line.contains('(') && !line.starts_with("using var ")
}

fn collect_usings(prefix: &str) -> Vec<String> {
    prefix
        .lines()
        .map(str::trim)
        .filter(|l| is_using_directive(l))
        .map(str::to_string)
        .collect()
}

/// The usings a unit receives; test-framework ones only go to test units.
fn shared_usings(usings: &[String], test: bool) -> Vec<&str> {
    usings
        .iter()
        .map(String::as_str)
        .filter(|u| test || !TEST_USINGS.iter().any(|t| u.contains(t)))
        .collect()
}

#[derive(Debug, Clone)]
struct Namespace {
    name: String,
    file_scoped: bool,
}

fn find_namespace(prefix: &str) -> Option<Namespace> {
    NAMESPACE.captures(prefix).and_then(|caps| {
        Some(Namespace {
            name: caps.get(1)?.as_str().to_string(),
            file_scoped: caps.get(2).is_some(),
        })
    })
}

fn assemble_unit(usings: &[String], namespace: Option<&Namespace>, body: &str, test: bool) -> String {
    let usings = shared_usings(usings, test);

    let mut out = String::new();
    if !usings.is_empty() {
        out.push_str(&usings.join("\n"));
        out.push_str("\n\n");
    }
    match namespace {
        Some(ns) if ns.file_scoped => {
            out.push_str(&format!("namespace {};\n\n{}", ns.name, body.trim_start()));
        }
        Some(ns) => {
            out.push_str(&format!("namespace {}\n{{\n{}\n}}", ns.name, body));
        }
        None => out.push_str(body.trim_start()),
    }
    out
}

fn single_file(code: &str, language: Language) -> SourceFile {
    let test = has_test_signature(code);
    let name = match language {
        Language::CSharp if test => TEST_CLASS
            .captures(code)
            .and_then(|caps| caps.get(1))
            .map_or_else(|| "UnitTests.cs".to_string(), |m| format!("{}.cs", m.as_str())),
        Language::CSharp => "Program.cs".to_string(),
        other => format!("main{}", other.extension()),
    };
    SourceFile {
        test: test || is_test_unit(&name, "", language),
        name,
        content: code.trim().to_string(),
    }
}
