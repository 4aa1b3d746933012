//! Token-bounded context window.
//!
//! Candidates arrive ranked. Duplicates (same identity or same normalized
//! content) are dropped, then documents are taken in order while the running
//! token estimate stays within `max_tokens`. The first candidate that does not
//! fit may be admitted in truncated form when enough budget remains; after it
//! the window is closed.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use atelier_core::config::RagConfig;
use atelier_core::error::{AtelierError, Result};
use atelier_core::types::{DocumentEmbedding, estimate_tokens};
use serde::{Deserialize, Serialize};

use crate::ranking::RankedDocument;

const ELLIPSIS: &str = "...";
const MIDDLE_GAP: &str = " ... ";

/// Share of the budget a sentence boundary must reach for smart truncation.
pub const SMART_BOUNDARY_RATIO: f64 = 0.7;

// ─── Truncation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    Head,
    Tail,
    Middle,
    #[default]
    Smart,
}

impl TruncationStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TruncationStrategy::Head => "head",
            TruncationStrategy::Tail => "tail",
            TruncationStrategy::Middle => "middle",
            TruncationStrategy::Smart => "smart",
        }
    }
}

impl fmt::Display for TruncationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TruncationStrategy {
    type Err = AtelierError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "head" => Ok(TruncationStrategy::Head),
            "tail" => Ok(TruncationStrategy::Tail),
            "middle" => Ok(TruncationStrategy::Middle),
            "smart" => Ok(TruncationStrategy::Smart),
            other => Err(AtelierError::invalid(format!("unknown truncation strategy '{other}'"))),
        }
    }
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '。' | '！' | '？')
}

/// Full-width terminators need no following space.
fn is_cjk_sentence_end(c: char) -> bool {
    matches!(c, '。' | '！' | '？')
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

/// Cut `chars` to at most `keep` characters, backing up to a word boundary
/// when the cut would split a word.
fn cut_at_word(chars: &[char], keep: usize) -> String {
    let splits_word = chars.get(keep).is_some_and(|c| !c.is_whitespace())
        && keep > 0
        && !chars[keep - 1].is_whitespace();
    let end = if splits_word {
        chars[..keep]
            .iter()
            .rposition(|c| c.is_whitespace())
            .filter(|&p| p > 0)
            .unwrap_or(keep)
    } else {
        keep
    };
    collect(&chars[..end]).trim_end().to_string()
}

/// Shorten `text` to at most `max_chars` characters.
pub fn truncate_text(text: &str, max_chars: usize, strategy: TruncationStrategy) -> String {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    if n <= max_chars {
        return text.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return collect(&chars[..max_chars]);
    }

    match strategy {
        TruncationStrategy::Head => {
            format!("{}{ELLIPSIS}", cut_at_word(&chars, max_chars - ELLIPSIS.len()))
        }
        TruncationStrategy::Tail => {
            let keep = max_chars - ELLIPSIS.len();
            format!("{ELLIPSIS}{}", collect(&chars[n - keep..]).trim_start())
        }
        TruncationStrategy::Middle => {
            if max_chars <= MIDDLE_GAP.len() + 1 {
                return collect(&chars[..max_chars]);
            }
            let keep = max_chars - MIDDLE_GAP.len();
            let front = keep.div_ceil(2);
            let back = keep - front;
            format!(
                "{}{MIDDLE_GAP}{}",
                collect(&chars[..front]),
                collect(&chars[n - back..])
            )
        }
        TruncationStrategy::Smart => {
            let boundary = (0..max_chars).rev().find(|&i| {
                is_sentence_end(chars[i])
                    && (is_cjk_sentence_end(chars[i])
                        || chars.get(i + 1).is_none_or(|c| c.is_whitespace()))
            });
            if let Some(i) = boundary {
                if (i + 1) as f64 >= max_chars as f64 * SMART_BOUNDARY_RATIO {
                    return collect(&chars[..=i]);
                }
            }
            format!("{}{ELLIPSIS}", cut_at_word(&chars, max_chars - ELLIPSIS.len()))
        }
    }
}

// ─── Window ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextOptions {
    pub max_tokens: usize,
    pub max_documents: usize,
    /// A truncated document is only admitted when more budget than this remains.
    pub min_chunk_tokens: usize,
    pub truncation: TruncationStrategy,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            max_documents: 10,
            min_chunk_tokens: 100,
            truncation: TruncationStrategy::Smart,
        }
    }
}

impl ContextOptions {
    pub fn from_config(config: &RagConfig) -> Result<Self> {
        Ok(Self {
            max_tokens: config.max_tokens,
            max_documents: config.max_documents,
            min_chunk_tokens: config.min_chunk_tokens,
            truncation: config.truncation.parse()?,
        })
    }
}

/// A selected document. When `truncated`, `document.content` holds the
/// shortened text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextDocument {
    pub document: DocumentEmbedding,
    pub similarity: f32,
    pub relevance: f32,
    pub tokens: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ContextWindowSummary {
    /// Estimated tokens used.
    pub size: usize,
    pub count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextWindow {
    pub documents: Vec<ContextDocument>,
    pub total_tokens: usize,
    pub max_tokens: usize,
    /// A document was shortened or a candidate was left out for lack of budget.
    pub truncated: bool,
    pub duplicates: usize,
}

impl ContextWindow {
    pub fn summary(&self) -> ContextWindowSummary {
        ContextWindowSummary {
            size: self.total_tokens,
            count: self.documents.len(),
            truncated: self.truncated,
        }
    }

    fn push(&mut self, candidate: RankedDocument, tokens: usize, truncated: bool) {
        self.total_tokens += tokens;
        self.documents.push(ContextDocument {
            document: candidate.document,
            similarity: candidate.similarity,
            relevance: candidate.relevance,
            tokens,
            truncated,
        });
    }
}

fn content_key(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Fill a window from ranked candidates. The token total never exceeds
/// `options.max_tokens`.
pub fn build_context_window(candidates: Vec<RankedDocument>, options: &ContextOptions) -> ContextWindow {
    let mut window = ContextWindow {
        max_tokens: options.max_tokens,
        ..Default::default()
    };
    let mut seen_refs = HashSet::new();
    let mut seen_content = HashSet::new();

    for mut candidate in candidates {
        let fresh_ref = seen_refs.insert(candidate.document.reference());
        if !fresh_ref || !seen_content.insert(content_key(&candidate.document.content)) {
            window.duplicates += 1;
            continue;
        }
        if window.documents.len() >= options.max_documents {
            break;
        }

        let tokens = estimate_tokens(&candidate.document.content);
        let remaining = options.max_tokens - window.total_tokens;
        if tokens <= remaining {
            window.push(candidate, tokens, false);
            continue;
        }

        window.truncated = true;
        if remaining > options.min_chunk_tokens {
            let text = truncate_text(&candidate.document.content, remaining * 4, options.truncation);
            let shortened = estimate_tokens(&text);
            if !text.trim().is_empty() && shortened <= remaining {
                tracing::debug!(
                    "✂️ Truncated {} from {tokens} to {shortened} tokens ({})",
                    candidate.document.reference(),
                    options.truncation
                );
                candidate.document.content = text;
                window.push(candidate, shortened, true);
            }
        }
        break;
    }
    window
}
