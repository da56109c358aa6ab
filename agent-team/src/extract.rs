//! Text extraction: turn a free-form generative response into source code.
//!
//! Models wrap code in markdown fences, headings, narrative and bullet lists.
//! [`extract`] strips all of that on a best-effort basis. It never fails:
//! the worst case is the trimmed input.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Source language of a generated blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    CSharp,
    Python,
    JavaScript,
    Java,
    Unknown,
}

impl Language {
    /// Source file extension, including the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Language::CSharp => ".cs",
            Language::Python => ".py",
            Language::JavaScript => ".js",
            Language::Java => ".java",
            Language::Unknown => ".txt",
        }
    }

    /// Human name used in prompts.
    pub fn display_name(self) -> &'static str {
        match self {
            Language::CSharp => "C#",
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::Java => "Java",
            Language::Unknown => "source",
        }
    }

    /// Markdown fence tag.
    pub fn fence_tag(self) -> &'static str {
        match self {
            Language::CSharp => "csharp",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Unknown => "",
        }
    }

    /// Parse a language hint. `"auto"` (or an empty hint) means detect.
    pub fn from_hint(hint: &str) -> Result<Option<Language>, UnknownLanguage> {
        match hint.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::CSharp => write!(f, "csharp"),
            Language::Python => write!(f, "python"),
            Language::JavaScript => write!(f, "javascript"),
            Language::Java => write!(f, "java"),
            Language::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csharp" | "c#" | "cs" => Ok(Language::CSharp),
            "python" | "py" => Ok(Language::Python),
            "javascript" | "js" => Ok(Language::JavaScript),
            "java" => Ok(Language::Java),
            "unknown" => Ok(Language::Unknown),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

/// Guess the language of a blob from signature tokens.
pub fn detect_language(code: &str) -> Language {
    if ["namespace ", "using System;", "public class", "static void Main"]
        .iter()
        .any(|sig| code.contains(sig))
    {
        return Language::CSharp;
    }
    if code.contains("def ") && (code.contains("import ") || code.contains("class ")) {
        return Language::Python;
    }
    if ["function ", "const ", "let "].iter().any(|sig| code.contains(sig)) {
        return Language::JavaScript;
    }
    if code.contains("public static void main") && code.contains("String[] args") {
        return Language::Java;
    }
    Language::Unknown
}

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[\w+#.-]*$").expect("fence pattern"));
static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n`]*\n(.*?)```").expect("fenced block pattern"));
static COMMENT_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?://|#)\s*(?:file|filename)\s*:\s*`?([\w./-]+\.\w+)`?\s*$")
        .expect("comment marker pattern")
});
static HEADING_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^#{2,6}\s*`?([\w./-]+\.\w+)`?\s*$").expect("heading marker pattern")
});

/// The file name declared by a marker line, if `line` is one.
pub(crate) fn file_marker(line: &str) -> Option<&str> {
    let line = line.trim();
    COMMENT_MARKER
        .captures(line)
        .or_else(|| HEADING_MARKER.captures(line))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Bodies of every fenced block in `text`, in order.
pub fn fenced_blocks(text: &str) -> Vec<String> {
    FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim_end().to_string())
        .collect()
}

/// Extract source code from a generative response.
///
/// `hint` of `None` means auto-detect. The result is a fixpoint of the
/// cleanup pass, so `extract(&extract(x, h), h) == extract(x, h)`.
pub fn extract(text: &str, hint: Option<Language>) -> String {
    clean_to_fixpoint(text, hint, false)
}

/// Like [`extract`] but keeps `// File: X` style marker lines so the
/// splitter can still cut on them.
pub fn extract_preserving_markers(text: &str, hint: Option<Language>) -> String {
    clean_to_fixpoint(text, hint, true)
}

// Removing one line can expose another rule (a heading hiding an intro line,
// a dropped line that carried the only language signal).
const MAX_PASSES: usize = 16;

fn clean_to_fixpoint(text: &str, hint: Option<Language>, keep_markers: bool) -> String {
    let mut current = text.trim().to_string();
    for _ in 0..MAX_PASSES {
        let language = hint.unwrap_or_else(|| detect_language(&current));
        let next = clean_once(&current, language, keep_markers);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

fn clean_once(code: &str, language: Language, keep_markers: bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut seen_code = false;

    for raw in code.lines() {
        let line = raw.trim_end();
        let trimmed = line.trim();

        if FENCE.is_match(trimmed) {
            continue;
        }
        if is_declaration(trimmed) {
            lines.push(line.to_string());
            seen_code = true;
            continue;
        }
        if file_marker(trimmed).is_some() {
            if keep_markers {
                lines.push(trimmed.to_string());
            }
            continue;
        }
        if is_heading(trimmed, language) {
            continue;
        }
        if !seen_code && is_intro(trimmed) {
            continue;
        }
        if is_list_item(trimmed) || starts_with_emoji(trimmed) || is_first_person(trimmed) {
            continue;
        }

        let line = unwrap_backticks(line);
        if !line.trim().is_empty() {
            seen_code = true;
        }
        lines.push(line);
    }

    let mut cleaned = collapse_blank_runs(&lines).trim().to_string();
    if language == Language::CSharp {
        cleaned = ensure_using_directives(cleaned);
    }
    cleaned
}

fn is_declaration(line: &str) -> bool {
    line.starts_with("using ")
        || line.starts_with("namespace ")
        || line.starts_with("import ")
        || line.starts_with("package ")
        || (line.starts_with("from ") && line.contains(" import "))
}

fn is_heading(line: &str, language: Language) -> bool {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return false;
    }
    let rest = &line[hashes..];
    if !(rest.is_empty() || rest.starts_with(' ')) {
        return false;
    }
    // `# ...` is a comment in Python.
    hashes > 1 || language != Language::Python
}

fn is_intro(line: &str) -> bool {
    let lower = line.to_lowercase();
    ["here's", "here is", "below is"]
        .iter()
        .any(|p| lower.starts_with(p))
}

fn is_list_item(line: &str) -> bool {
    line.starts_with("- ") || line.starts_with("* ")
}

fn is_first_person(line: &str) -> bool {
    ["As a ", "As an ", "I will ", "I'll ", "I've ", "I have "]
        .iter()
        .any(|p| line.starts_with(p))
}

fn starts_with_emoji(line: &str) -> bool {
    line.chars().next().is_some_and(|c| {
        matches!(c as u32, 0x1F000..=0x1FAFF | 0x2600..=0x27BF | 0x2B00..=0x2BFF | 0x2300..=0x23FF)
    })
}

/// `` `x = 1` `` → `x = 1`; inline code spans are left alone.
fn unwrap_backticks(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.len() >= 2
        && trimmed.starts_with('`')
        && trimmed.ends_with('`')
        && !trimmed.starts_with("``")
    {
        let indent = &line[..line.len() - line.trim_start().len()];
        return format!("{indent}{}", trimmed.trim_matches('`').trim());
    }
    line.to_string()
}

fn collapse_blank_runs(lines: &[String]) -> String {
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut previous_blank = false;
    for line in lines {
        let blank = line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        out.push(if blank { "" } else { line.as_str() });
        previous_blank = blank;
    }
    out.join("\n")
}

/// Body signals → the `using` directive they need, in the order checked.
const USING_SIGNALS: &[(&[&str], &str)] = &[
    (
        &[
            "Console.",
            "ArgumentNullException",
            "ArgumentException",
            "InvalidOperationException",
        ],
        "using System;",
    ),
    (
        &["IEnumerable", ".ToList()", ".Select(", ".Where("],
        "using System.Linq;",
    ),
    (&["List<", "Dictionary<"], "using System.Collections.Generic;"),
    (&["Regex."], "using System.Text.RegularExpressions;"),
    (&["Task<", "async "], "using System.Threading.Tasks;"),
    (&["[Test]", "[TestFixture]", "[TestCase"], "using NUnit.Framework;"),
    (&["Mock<"], "using Moq;"),
];

fn ensure_using_directives(code: String) -> String {
    if code.is_empty() {
        return code;
    }
    let has_usings = code
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(5)
        .any(|l| l.trim_start().starts_with("using "));
    if has_usings {
        return code;
    }

    let mut needed: Vec<&str> = Vec::new();
    for (signals, directive) in USING_SIGNALS {
        if signals.iter().any(|s| code.contains(s))
            && !needed.contains(directive)
            && !code.contains(directive)
        {
            needed.push(directive);
        }
    }
    if needed.is_empty() {
        return code;
    }
    format!("{}\n\n{code}", needed.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"Here's the implementation you asked for:

## Calculator

- Adds numbers
- Handles overflow

```csharp
namespace Demo;

public class Calculator
{
    public int Add(int a, int b) => a + b;
}
```

✅ All done!
I will gladly explain further."#;

    #[test]
    fn strips_markdown_wrapping() {
        let code = extract(RESPONSE, Some(Language::CSharp));
        assert_eq!(
            code,
            "namespace Demo;\n\npublic class Calculator\n{\n    public int Add(int a, int b) => a + b;\n}"
        );
    }

    #[test]
    fn extraction_is_idempotent() {
        let inputs = [
            RESPONSE,
            "",
            "   \n\n ",
            "# Title\n\nJust prose, no code at all.",
            "- a\n- b\n* c",
            "```\n```",
            "Here's x\n`print(1)`\n\n\n\nimport os\ndef f(): pass",
            "💡 tip\nclass A { void M() { Console.WriteLine(List<int>.Empty); } }",
            "// File: A.cs\npublic class A {}\n// File: B.cs\npublic class B {}",
        ];
        for input in inputs {
            for hint in [None, Some(Language::CSharp), Some(Language::Python)] {
                let once = extract(input, hint);
                assert_eq!(extract(&once, hint), once, "not idempotent for {input:?}");
            }
        }
    }

    #[test]
    fn never_panics_on_odd_input() {
        for input in ["```", "#", "`", "##", "\u{1F600}", "    `", "```rust\n"] {
            let _ = extract(input, None);
        }
        assert_eq!(extract("", None), "");
    }

    #[test]
    fn adds_using_directives_in_first_seen_order() {
        let code = "public class Greeter\n{\n    public void Hi(List<string> names)\n    {\n        Console.WriteLine(names.Where(n => n.Length > 0).Count());\n    }\n}";
        let cleaned = extract(code, Some(Language::CSharp));
        assert!(cleaned.starts_with(
            "using System;\nusing System.Linq;\nusing System.Collections.Generic;\n\npublic class Greeter"
        ));
    }

    #[test]
    fn keeps_existing_using_block() {
        let code = "using System;\n\npublic class A { void M() { var x = new List<int>(); } }";
        assert_eq!(extract(code, Some(Language::CSharp)), code);
    }

    #[test]
    fn python_comments_survive() {
        let code = "import math\n\n# area of a circle\ndef area(r):\n    return math.pi * r * r";
        assert_eq!(extract(code, None), code);
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(extract("a = 1\n\n\n\nb = 2", Some(Language::Python)), "a = 1\n\nb = 2");
    }

    #[test]
    fn markers_can_be_preserved() {
        let text = "```csharp\n// File: A.cs\npublic class A {}\n```";
        assert_eq!(extract(text, Some(Language::CSharp)), "public class A {}");
        assert_eq!(
            extract_preserving_markers(text, Some(Language::CSharp)),
            "// File: A.cs\npublic class A {}"
        );
    }

    #[test]
    fn detects_languages() {
        assert_eq!(detect_language("namespace X { }"), Language::CSharp);
        assert_eq!(detect_language("import os\ndef f(): pass"), Language::Python);
        assert_eq!(detect_language("const x = 1;"), Language::JavaScript);
        assert_eq!(detect_language("just words"), Language::Unknown);
    }

    #[test]
    fn fenced_blocks_in_order() {
        let text = "intro\n```python\na = 1\n```\nmiddle\n```\nb = 2\n```";
        assert_eq!(fenced_blocks(text), vec!["a = 1".to_string(), "b = 2".to_string()]);
    }

    #[test]
    fn recognizes_file_markers() {
        assert_eq!(file_marker("// File: Calculator.cs"), Some("Calculator.cs"));
        assert_eq!(file_marker("# filename: utils/io.py"), Some("utils/io.py"));
        assert_eq!(file_marker("## `Program.cs`"), Some("Program.cs"));
        assert_eq!(file_marker("// just a comment"), None);
    }

    #[test]
    fn parses_hints() {
        assert_eq!(Language::from_hint("auto").unwrap(), None);
        assert_eq!(Language::from_hint("C#").unwrap(), Some(Language::CSharp));
        assert!(Language::from_hint("cobol").is_err());
    }
}
