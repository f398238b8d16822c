//! Tool detection for a single task.
//!
//! Order of precedence:
//! 1. Explicit task type (`generate_document`, `generate_image`, `search`)
//! 2. Keyword scoring over target and description, document vs. image, ties
//!    going to document
//! 3. A short list of search keywords
//! 4. Plain LLM execution

use serde_json::{json, Value};

use crate::plan::{Task, TaskType};
use crate::tools::{DOCUMENT_TOOL, IMAGE_TOOL, WEB_SEARCH_TOOL};

const DOCUMENT_KEYWORDS: &[&str] = &[
    "document",
    "report",
    "pdf",
    "docx",
    "word file",
    "memo",
    "letter",
    "contract",
    "proposal",
    "brochure",
    "presentation",
    "slides",
    "spreadsheet",
    "invoice",
];

const IMAGE_KEYWORDS: &[&str] = &[
    "image",
    "picture",
    "photo",
    "illustration",
    "logo",
    "drawing",
    "poster",
    "banner",
    "icon",
    "artwork",
    "infographic",
];

const SEARCH_KEYWORDS: &[&str] = &[
    "search",
    "look up",
    "lookup",
    "find online",
    "on the web",
    "latest",
    "news",
    "current price",
    "recent",
];

/// Where a task is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Tool(&'static str),
    Llm,
}

fn score(text: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| text.contains(*k)).count()
}

pub fn detect_tool(task: &Task) -> Dispatch {
    match task.task_type {
        TaskType::GenerateDocument => return Dispatch::Tool(DOCUMENT_TOOL),
        TaskType::GenerateImage => return Dispatch::Tool(IMAGE_TOOL),
        TaskType::Search => return Dispatch::Tool(WEB_SEARCH_TOOL),
        _ => {}
    }

    let text = format!("{} {}", task.target, task.description).to_lowercase();
    let document = score(&text, DOCUMENT_KEYWORDS);
    let image = score(&text, IMAGE_KEYWORDS);

    if document > 0 || image > 0 {
        return if document >= image {
            Dispatch::Tool(DOCUMENT_TOOL)
        } else {
            Dispatch::Tool(IMAGE_TOOL)
        };
    }

    if score(&text, SEARCH_KEYWORDS) > 0 {
        return Dispatch::Tool(WEB_SEARCH_TOOL);
    }

    Dispatch::Llm
}

/// Arguments object handed to `tool` for `task`.
pub fn tool_args(tool: &str, task: &Task, context: &str) -> Value {
    match tool {
        DOCUMENT_TOOL => json!({
            "title": task.target,
            "instructions": task.description,
            "context": context,
        }),
        IMAGE_TOOL => json!({
            "prompt": format!("{}: {}", task.target, task.description),
        }),
        WEB_SEARCH_TOOL => json!({
            "query": task.target,
            "details": task.description,
        }),
        _ => json!({
            "target": task.target,
            "description": task.description,
            "context": context,
        }),
    }
}
