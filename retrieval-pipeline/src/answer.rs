use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hybrid::HybridResult;

/// One unit of structured answer output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    Paragraph { content: String },
    List { items: Vec<String> },
    Code { language: String, content: String },
    Heading { content: String },
}

/// Provenance attached to an answer.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Source {
    pub title: String,
    pub source: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    General,
    Rag,
}

/// Canonical answer when retrieval lacks sufficient support.
pub static FALLBACK_ANSWER: &str = "I don't have that information in my knowledge base yet. \
     Try adding relevant sources or rephrasing the question.";

/// Canonical answer when request handling fails outright.
pub static ERROR_ANSWER: &str =
    "I encountered an issue while processing your request. Please try again.";

const SMALL_TALK_MARKERS: &[&str] = &[
    "hello",
    "hi",
    "hey",
    "howdy",
    "yo",
    "thanks",
    "thank you",
    "good morning",
    "good afternoon",
    "good evening",
    "good night",
    "how are you",
    "what's up",
    "whats up",
    "who are you",
    "bye",
    "goodbye",
    "see you",
];

/// Cheap textual heuristic separating small talk from knowledge questions.
/// Deterministic and total; anything not clearly small talk is knowledge.
pub fn detect_mode(message: &str) -> AnswerMode {
    let normalized: String = message
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\'')
        .collect();
    let normalized = normalized.trim();

    let word_count = normalized.split_whitespace().count();
    if word_count <= 6
        && SMALL_TALK_MARKERS
            .iter()
            .any(|marker| normalized == *marker || normalized.starts_with(&format!("{marker} ")))
    {
        return AnswerMode::General;
    }

    AnswerMode::Rag
}

impl AnswerMode {
    /// Modes as they appear on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            AnswerMode::General => "general",
            AnswerMode::Rag => "rag",
        }
    }
}

/// Maps the LLM's JSON reply to blocks. Strips optional code fences, accepts
/// a `{"blocks": [...]}` object, and wraps anything unparseable as a single
/// paragraph. Never fails and never returns an empty list.
pub fn parse_llm_json_response(text: &str) -> Vec<Block> {
    let cleaned = strip_code_fences(text);

    let Ok(value) = serde_json::from_str::<Value>(cleaned) else {
        return vec![raw_paragraph(text)];
    };

    let Some(raw_blocks) = value.get("blocks").and_then(Value::as_array) else {
        return vec![raw_paragraph(text)];
    };

    let blocks: Vec<Block> = raw_blocks.iter().map(block_from_value).collect();
    if blocks.is_empty() {
        return vec![raw_paragraph(text)];
    }
    blocks
}

fn raw_paragraph(text: &str) -> Block {
    Block::Paragraph {
        content: text.trim().to_string(),
    }
}

fn block_from_value(value: &Value) -> Block {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("paragraph");
    let content = value
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match kind {
        "list" => Block::List {
            items: value
                .get("items")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        },
        "code" => Block::Code {
            language: value
                .get("language")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            content,
        },
        "heading" => Block::Heading { content },
        _ => Block::Paragraph { content },
    }
}

/// Drops a leading ```json / ``` line and a trailing ``` line, if present.
pub fn strip_code_fences(text: &str) -> &str {
    let mut cleaned = text.trim();

    if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = match rest.split_once('\n') {
            Some((_, body)) => body,
            None => rest.trim_start_matches(|c: char| c.is_alphanumeric()),
        };
    }
    if let Some(rest) = cleaned.trim_end().strip_suffix("```") {
        cleaned = rest;
    }

    cleaned.trim()
}

/// Joins the `text` metadata of every result at or above the threshold,
/// separated by blank lines, alongside the matching sources.
pub fn build_context(results: &[HybridResult], threshold: f64) -> (String, Vec<Source>) {
    let mut passages: Vec<String> = Vec::new();
    let mut sources: Vec<Source> = Vec::new();

    for result in results.iter().filter(|r| r.final_score >= threshold) {
        if let Some(Value::String(text)) = result.metadata.get("text") {
            if !text.trim().is_empty() {
                passages.push(text.clone());
            }
        }
        sources.push(Source {
            title: result
                .metadata
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or(&result.id)
                .to_string(),
            source: result
                .metadata
                .get("source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            score: result.final_score,
        });
    }

    (passages.join("\n\n"), sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn detects_small_talk_as_general() {
        assert_eq!(detect_mode("hello"), AnswerMode::General);
        assert_eq!(detect_mode("Hey there!"), AnswerMode::General);
        assert_eq!(detect_mode("thanks a lot"), AnswerMode::General);
        assert_eq!(detect_mode("How are you?"), AnswerMode::General);
    }

    #[test]
    fn detects_questions_as_knowledge() {
        assert_eq!(detect_mode("What is Project X?"), AnswerMode::Rag);
        assert_eq!(detect_mode("Compare A and B"), AnswerMode::Rag);
        assert_eq!(
            detect_mode("hello world program in rust with detailed comments please"),
            AnswerMode::Rag
        );
    }

    #[test]
    fn parses_block_objects() {
        let raw = r#"{"blocks": [
            {"type": "heading", "content": "Title"},
            {"type": "paragraph", "content": "Body"},
            {"type": "list", "items": ["one", "two"]},
            {"type": "code", "language": "rust", "content": "fn main() {}"}
        ]}"#;

        let blocks = parse_llm_json_response(raw);
        assert_eq!(blocks.len(), 4);
        assert_eq!(
            blocks[0],
            Block::Heading {
                content: "Title".into()
            }
        );
        assert_eq!(
            blocks[2],
            Block::List {
                items: vec!["one".into(), "two".into()]
            }
        );
    }

    #[test]
    fn missing_type_defaults_to_paragraph() {
        let blocks = parse_llm_json_response(r#"{"blocks": [{"content": "plain"}]}"#);
        assert_eq!(
            blocks,
            vec![Block::Paragraph {
                content: "plain".into()
            }]
        );
    }

    #[test]
    fn strips_code_fences_before_parsing() {
        let raw = "```json\n{\"blocks\": [{\"type\": \"paragraph\", \"content\": \"fenced\"}]}\n```";
        let blocks = parse_llm_json_response(raw);
        assert_eq!(
            blocks,
            vec![Block::Paragraph {
                content: "fenced".into()
            }]
        );
    }

    #[test]
    fn unparseable_text_becomes_a_paragraph() {
        let blocks = parse_llm_json_response("not json at all");
        assert_eq!(
            blocks,
            vec![Block::Paragraph {
                content: "not json at all".into()
            }]
        );

        let blocks = parse_llm_json_response("");
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn json_without_blocks_field_becomes_a_paragraph() {
        let blocks = parse_llm_json_response(r#"{"answer": "something"}"#);
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0], Block::Paragraph { .. }));
    }

    fn result_with_text(id: &str, score: f64, text: &str) -> HybridResult {
        let mut metadata = HashMap::new();
        metadata.insert("text".to_string(), Value::String(text.to_string()));
        metadata.insert("title".to_string(), Value::String(format!("Title {id}")));
        metadata.insert("source".to_string(), Value::String("docs".to_string()));
        HybridResult {
            id: id.to_string(),
            semantic_score: score,
            keyword_score: 0.0,
            feedback_score: 0.0,
            final_score: score,
            metadata,
            appears_in_both: false,
        }
    }

    #[test]
    fn context_keeps_only_results_at_threshold() {
        let results = vec![
            result_with_text("a", 0.82, "first passage"),
            result_with_text("b", 0.75, "second passage"),
            result_with_text("c", 0.40, "third passage"),
        ];

        let (context, sources) = build_context(&results, 0.5);
        assert!(context.contains("first passage"));
        assert!(context.contains("second passage"));
        assert!(!context.contains("third passage"));
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].title, "Title a");
    }

    #[test]
    fn context_is_blank_when_nothing_clears_threshold() {
        let results = vec![result_with_text("a", 0.2, "weak")];
        let (context, sources) = build_context(&results, 0.5);
        assert!(context.is_empty());
        assert!(sources.is_empty());
    }
}
