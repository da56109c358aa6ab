//! Role prompts.

use crate::extract::Language;

use super::state::WorkflowState;

pub const PLANNER_SYSTEM: &str = "You are a senior software architect. Turn requirements into concise, structured technical plans.";
pub const CODER_SYSTEM: &str = "You are an expert software developer. Output complete, compilable code only.";
pub const TESTER_SYSTEM: &str = "You are a QA engineer specialized in test automation.";
pub const REVIEWER_SYSTEM: &str = "You are a senior code reviewer focused on quality, security and correctness.";

pub fn planning(state: &WorkflowState) -> String {
    format!(
        "Analyze the following requirement and create a detailed technical plan.

Requirement: {}

Provide:
1. High-level architecture overview
2. Key components/modules needed
3. Implementation approach
4. Data structures and algorithms
5. Edge cases to consider

Format your response as a structured plan.",
        state.requirement.trim()
    )
}

/// Coding prompt; on a revision it carries the previous code and the review.
pub fn coding(state: &WorkflowState, language: Option<Language>) -> String {
    let revision = if state.is_revision() {
        format!(
            "\n\nPREVIOUS CODE:\n{}\n\nREVIEW FEEDBACK:\n{}\n\nRevise the code to address the feedback.",
            state.code, state.review
        )
    } else {
        String::new()
    };
    let layout = match language {
        Some(lang) => format!(
            "\n- Write {} code\n- Put a `{}` line before each file",
            lang.display_name(),
            marker_example(lang)
        ),
        None => String::new(),
    };
    format!(
        "Implement the following plan with clean, production-ready code.

PLAN:
{}{revision}

Requirements:
- Write clean, well-documented code
- Handle edge cases
- Make it modular and testable{layout}

Provide the complete implementation.",
        state.plan
    )
}

pub fn testing(state: &WorkflowState, language: Option<Language>) -> String {
    let framework = match language {
        Some(Language::CSharp) => "Use NUnit. Name test classes <ClassName>Tests.",
        Some(Language::Java) => "Use JUnit 5.",
        Some(Language::JavaScript) => "Use Jest.",
        _ => "Use the pytest framework. Name test functions test_*.",
    };
    format!(
        "Write comprehensive tests for the following code.

CODE TO TEST:
{}

ORIGINAL PLAN:
{}

Create:
1. Unit tests for individual functions/methods
2. Integration tests for component interactions
3. Edge case tests
4. Test data/fixtures as needed

{framework} Include assertions and test descriptions.",
        state.code, state.plan
    )
}

pub fn reviewing(state: &WorkflowState) -> String {
    format!(
        "Review the following code and tests for quality, security, and best practices.

CODE:
{}

TESTS:
{}

ORIGINAL PLAN:
{}

Evaluate:
1. Code quality and readability
2. Adherence to best practices
3. Security vulnerabilities
4. Performance considerations
5. Test coverage and quality
6. Error handling
7. Documentation quality

Provide:
- Overall assessment (APPROVED / NEEDS_REVISION)
- Specific issues found (if any)
- Recommendations for improvement

Format: Start with \"APPROVED\" or \"NEEDS_REVISION\" on the first line, then detailed feedback.",
        state.code, state.tests, state.plan
    )
}

fn marker_example(language: Language) -> String {
    let comment = match language {
        Language::Python => "#",
        _ => "//",
    };
    let name = match language {
        Language::CSharp | Language::Java => "Calculator",
        _ => "calculator",
    };
    format!("{comment} File: {name}{}", language.extension())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coding_prompt_includes_feedback_only_on_revision() {
        let state = WorkflowState::new("sum numbers")
            .with_plan("plan".into())
            .with_code("old code".into());
        assert!(!coding(&state, None).contains("PREVIOUS CODE"));

        let state = state.with_review("NEEDS_REVISION\nadd validation".into());
        let prompt = coding(&state, Some(Language::CSharp));
        assert!(prompt.contains("PREVIOUS CODE:\nold code"));
        assert!(prompt.contains("add validation"));
        assert!(prompt.contains("// File: Calculator.cs"));
    }

    #[test]
    fn testing_prompt_names_framework() {
        let state = WorkflowState::new("x");
        assert!(testing(&state, Some(Language::CSharp)).contains("NUnit"));
        assert!(testing(&state, Some(Language::Python)).contains("pytest"));
    }
}
