//! Augmented prompt rendering. Pure string assembly, no model calls.

use std::fmt::Write as _;
use std::str::FromStr;

use atelier_core::error::{AtelierError, Result};
use serde::{Deserialize, Serialize};

use crate::context::ContextDocument;
use crate::engine::RagResult;

pub const INSTRUCTION_SUFFIX: &str = "Answer using the context above. \
If the context does not contain the information needed, say so instead of guessing.";

const NO_CONTEXT: &str = "No relevant context was found.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptFormat {
    Bullets,
    #[default]
    Structured,
    Paragraph,
}

impl FromStr for PromptFormat {
    type Err = AtelierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bullets" | "bulleted" | "list" => Ok(PromptFormat::Bullets),
            "structured" | "fenced" => Ok(PromptFormat::Structured),
            "paragraph" | "prose" => Ok(PromptFormat::Paragraph),
            other => Err(AtelierError::invalid(format!("unknown prompt format '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptOptions {
    pub format: PromptFormat,
    /// Annotate each document with its similarity and metadata.
    pub include_metadata: bool,
}

fn annotation(doc: &ContextDocument) -> String {
    let mut parts = vec![
        format!("similarity: {:.2}", doc.similarity),
        format!("type: {}", doc.document.document_type),
    ];
    parts.extend(doc.document.metadata.pairs().into_iter().map(|(k, v)| format!("{k}: {v}")));
    if doc.truncated {
        parts.push("truncated".into());
    }
    parts.join("; ")
}

fn render_bullets(docs: &[ContextDocument], annotate: bool) -> String {
    let mut out = String::from("Context:\n");
    for doc in docs {
        let _ = write!(out, "- {}", doc.document.content.trim());
        if annotate {
            let _ = write!(out, " ({})", annotation(doc));
        }
        out.push('\n');
    }
    out
}

fn render_structured(docs: &[ContextDocument], annotate: bool) -> String {
    let mut out = String::new();
    for (i, doc) in docs.iter().enumerate() {
        let _ = writeln!(out, "### Document {} [{}]", i + 1, doc.document.reference());
        if annotate {
            let _ = writeln!(out, "{}", annotation(doc));
        }
        let _ = writeln!(out, "```\n{}\n```", doc.document.content.trim());
    }
    out
}

fn render_paragraph(docs: &[ContextDocument], annotate: bool) -> String {
    let sentences: Vec<String> = docs
        .iter()
        .map(|doc| {
            let text = doc.document.content.trim();
            if annotate {
                format!("{text} [{}]", annotation(doc))
            } else {
                text.to_string()
            }
        })
        .collect();
    format!("Relevant context: {}\n", sentences.join(" "))
}

/// Render `result`'s documents into `base_prompt`, followed by the fixed
/// instruction suffix. Identical inputs give identical output.
pub fn generate_augmented_prompt(base_prompt: &str, result: &RagResult, options: &PromptOptions) -> String {
    let docs = &result.context_documents;
    let context = if docs.is_empty() {
        format!("{NO_CONTEXT}\n")
    } else {
        match options.format {
            PromptFormat::Bullets => render_bullets(docs, options.include_metadata),
            PromptFormat::Structured => render_structured(docs, options.include_metadata),
            PromptFormat::Paragraph => render_paragraph(docs, options.include_metadata),
        }
    };
    format!("{}\n\n{context}\n{INSTRUCTION_SUFFIX}", base_prompt.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextWindowSummary;
    use crate::engine::RagPerformance;
    use atelier_core::types::{DocumentEmbedding, DocumentMetadata, DocumentType};
    use chrono::Utc;

    fn result(docs: &[(&str, &str, f32)]) -> RagResult {
        let context_documents: Vec<ContextDocument> = docs
            .iter()
            .map(|(id, content, sim)| ContextDocument {
                document: DocumentEmbedding {
                    document_type: DocumentType::Question,
                    document_id: id.to_string(),
                    content: content.to_string(),
                    vector: Vec::new(),
                    language: "en".into(),
                    embedding_model: "local-hash-1024".into(),
                    metadata: DocumentMetadata::Question {
                        questionnaire_id: "qn-1".into(),
                        question_type: None,
                        required: false,
                    },
                    confidence_score: 0.9,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
                similarity: *sim,
                relevance: *sim,
                tokens: 5,
                truncated: false,
            })
            .collect();
        RagResult {
            query: "pacing".into(),
            query_language: "en".into(),
            total_results: context_documents.len(),
            average_similarity: 0.0,
            context_window: ContextWindowSummary {
                size: 5 * context_documents.len(),
                count: context_documents.len(),
                truncated: false,
            },
            context_documents,
            performance: RagPerformance::default(),
        }
    }

    #[test]
    fn test_bullets_with_annotations() {
        let r = result(&[("q1", "I loved the pacing", 0.912)]);
        let options = PromptOptions {
            format: PromptFormat::Bullets,
            include_metadata: true,
        };
        let prompt = generate_augmented_prompt("Summarise feedback.", &r, &options);
        assert!(prompt.starts_with("Summarise feedback.\n\nContext:\n- I loved the pacing ("));
        assert!(prompt.contains("similarity: 0.91; type: question; questionnaire: qn-1"));
        assert!(prompt.ends_with(INSTRUCTION_SUFFIX));
    }

    #[test]
    fn test_structured_is_fenced() {
        let r = result(&[("q1", "first", 0.9), ("q2", "second", 0.8)]);
        let prompt = generate_augmented_prompt("Base", &r, &PromptOptions::default());
        assert!(prompt.contains("### Document 1 [question/q1]\n```\nfirst\n```\n"));
        assert!(prompt.contains("### Document 2 [question/q2]"));
        assert!(!prompt.contains("similarity:"));
    }

    #[test]
    fn test_paragraph() {
        let r = result(&[("q1", "first.", 0.9), ("q2", "second.", 0.8)]);
        let options = PromptOptions {
            format: PromptFormat::Paragraph,
            include_metadata: false,
        };
        let prompt = generate_augmented_prompt("Base", &r, &options);
        assert!(prompt.contains("Relevant context: first. second.\n"));
    }

    #[test]
    fn test_empty_context_and_determinism() {
        let r = result(&[]);
        let a = generate_augmented_prompt("Base", &r, &PromptOptions::default());
        let b = generate_augmented_prompt("Base", &r, &PromptOptions::default());
        assert_eq!(a, b);
        assert_eq!(a, format!("Base\n\n{NO_CONTEXT}\n\n{INSTRUCTION_SUFFIX}"));
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("bulleted".parse::<PromptFormat>().unwrap(), PromptFormat::Bullets);
        assert!("xml".parse::<PromptFormat>().is_err());
    }
}
