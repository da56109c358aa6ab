//! Agent-prefixed progress output.
//!
//! Every stage reports as one of the team's agents (`[coder] ✏️ Writing
//! code...`). Lines go through `tracing`, so the subscriber decides where
//! they land and JSON logging keeps the agent as a structured field.

/// An agent identity for progress lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentId {
    pub role: &'static str,
}

pub const PLANNER: AgentId = AgentId { role: "planner" };
pub const CODER: AgentId = AgentId { role: "coder" };
pub const TESTER: AgentId = AgentId { role: "tester" };
pub const REVIEWER: AgentId = AgentId { role: "reviewer" };
pub const BUILDER: AgentId = AgentId { role: "builder" };

/// Longest line emitted by [`say`].
const MAX_LINE: usize = 400;

/// Multi-line text, wrapped.
pub fn say(agent: AgentId, text: &str) {
    for line in wrap_lines(text, MAX_LINE) {
        tracing::info!(agent = agent.role, "[{}] {}", agent.role, line);
    }
}

/// A brief one-line status update.
pub fn status(agent: AgentId, emoji: &str, text: &str) {
    tracing::info!(agent = agent.role, "[{}] {} {}", agent.role, emoji, text);
}

/// A file listing, capped at 20 entries.
pub fn file_tree(agent: AgentId, files: &[String]) {
    status(agent, "📁", &format!("Project files ({})", files.len()));
    for f in files.iter().take(20) {
        tracing::info!(agent = agent.role, "  {f}");
    }
    if files.len() > 20 {
        tracing::info!(agent = agent.role, "  ... and {} more", files.len() - 20);
    }
}

pub fn error(agent: AgentId, text: &str) {
    tracing::warn!(agent = agent.role, "[{}] ❌ {}", agent.role, text);
}

/// First `max_chars` characters of `text`, marked when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.char_indices();
    match chars.nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Wrap text into lines of at most `max_len` bytes, breaking on words.
pub fn wrap_lines(text: &str, max_len: usize) -> Vec<String> {
    let mut result = Vec::new();
    for line in text.lines() {
        if line.len() <= max_len {
            result.push(line.to_string());
            continue;
        }
        let mut current = String::new();
        for word in line.split_whitespace() {
            if !current.is_empty() && current.len() + word.len() + 1 > max_len {
                result.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
        if !current.is_empty() {
            result.push(current);
        }
    }
    result
}
