//! Heuristic language detection and text preprocessing.
//!
//! Detection is script-first: non-Latin scripts (Cyrillic, Arabic, Hebrew,
//! Greek, Devanagari, Thai, CJK, Hangul) are identified by Unicode range.
//! Latin text is classified by characteristic diacritics, then by a handful
//! of frequent function words, and defaults to English. It only tags records
//! and selects preprocessing; it is not meant to be exact.

use serde::{Deserialize, Serialize};

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LanguageDetection {
    /// ISO 639-1 tag.
    pub language: String,
    /// 0.0 ..= 1.0
    pub confidence: f32,
}

impl LanguageDetection {
    fn new(language: &str, confidence: f32) -> Self {
        Self {
            language: language.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Script {
    Latin,
    Cyrillic,
    Greek,
    Arabic,
    Hebrew,
    Devanagari,
    Thai,
    Kana,
    Han,
    Hangul,
    Other,
}

fn script_of(c: char) -> Script {
    match c as u32 {
        0x0041..=0x024F => Script::Latin,
        0x0370..=0x03FF => Script::Greek,
        0x0400..=0x04FF => Script::Cyrillic,
        0x0590..=0x05FF => Script::Hebrew,
        0x0600..=0x06FF | 0x0750..=0x077F => Script::Arabic,
        0x0900..=0x097F => Script::Devanagari,
        0x0E00..=0x0E7F => Script::Thai,
        0x3040..=0x30FF => Script::Kana,
        0x3400..=0x4DBF | 0x4E00..=0x9FFF => Script::Han,
        0x1100..=0x11FF | 0xAC00..=0xD7AF => Script::Hangul,
        _ => Script::Other,
    }
}

/// Diacritic sets checked in order; the first language with the most hits wins.
const DIACRITICS: &[(&str, &str)] = &[
    ("de", "äöüß"),
    ("fr", "éèêëàâçùûœîï"),
    ("es", "ñáíóú¿¡"),
    ("pt", "ãõâêôç"),
    ("pl", "ąćęłńśźż"),
    ("tr", "ğşı"),
    ("cs", "čďěňřšťůž"),
    ("sv", "åä"),
    ("da", "æø"),
];

const FUNCTION_WORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "and", "is", "was", "with", "about", "of"]),
    ("de", &["der", "die", "das", "und", "ist", "nicht", "mit"]),
    ("fr", &["le", "la", "les", "et", "est", "avec", "pour"]),
    ("es", &["el", "los", "las", "y", "es", "con", "para"]),
    ("it", &["il", "gli", "che", "e", "è", "con", "per"]),
    ("nl", &["de", "het", "een", "en", "is", "met", "niet"]),
    ("pt", &["o", "os", "as", "e", "com", "para", "não"]),
];

/// Detect the dominant language of `text`.
pub fn detect_language(text: &str) -> LanguageDetection {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    if letters.is_empty() {
        return LanguageDetection::new(DEFAULT_LANGUAGE, 0.1);
    }

    let total = letters.len() as f32;
    let count = |s: Script| letters.iter().filter(|c| script_of(**c) == s).count() as f32;

    // Kana marks Japanese even when mixed with Han.
    let kana = count(Script::Kana);
    let han = count(Script::Han);
    if kana > 0.0 {
        return LanguageDetection::new("ja", 0.6 + 0.4 * (kana + han) / total);
    }
    if han > 0.0 && han / total > 0.3 {
        return LanguageDetection::new("zh", 0.5 + 0.4 * han / total);
    }

    for (script, tag) in [
        (Script::Hangul, "ko"),
        (Script::Arabic, "ar"),
        (Script::Hebrew, "he"),
        (Script::Greek, "el"),
        (Script::Devanagari, "hi"),
        (Script::Thai, "th"),
    ] {
        let n = count(script);
        if n / total > 0.3 {
            return LanguageDetection::new(tag, 0.5 + 0.45 * n / total);
        }
    }

    let cyrillic = count(Script::Cyrillic);
    if cyrillic / total > 0.3 {
        let ukrainian = letters.iter().any(|c| "іїєґІЇЄҐ".contains(*c));
        let tag = if ukrainian { "uk" } else { "ru" };
        return LanguageDetection::new(tag, 0.5 + 0.4 * cyrillic / total);
    }

    detect_latin(text)
}

fn detect_latin(text: &str) -> LanguageDetection {
    let lower = text.to_lowercase();

    let mut best: Option<(&str, usize)> = None;
    for &(tag, marks) in DIACRITICS {
        let hits = lower.chars().filter(|c| marks.contains(*c)).count();
        if hits > 0 && best.is_none_or(|(_, n)| hits > n) {
            best = Some((tag, hits));
        }
    }
    if let Some((tag, hits)) = best {
        return LanguageDetection::new(tag, 0.55 + 0.05 * hits.min(7) as f32);
    }

    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    let mut scored: Vec<(&str, usize)> = FUNCTION_WORDS
        .iter()
        .map(|(tag, list)| (*tag, words.iter().filter(|w| list.contains(*w)).count()))
        .collect();
    // Stable sort keeps English first on ties.
    scored.sort_by(|a, b| b.1.cmp(&a.1));

    match scored.first() {
        Some((tag, hits)) if *hits > 0 => {
            let ratio = *hits as f32 / words.len().max(1) as f32;
            LanguageDetection::new(tag, 0.5 + ratio.min(0.4))
        }
        _ => LanguageDetection::new(DEFAULT_LANGUAGE, 0.4),
    }
}

/// Normalise text before it is embedded or hashed for the cache.
///
/// Strips control and zero-width characters and collapses whitespace runs.
/// Languages written without spaces keep their characters adjacent.
pub fn preprocess(text: &str, language: &str) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(*c, '\u{200B}'..='\u{200D}' | '\u{FEFF}'))
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();

    let joined = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if !matches!(language, "zh" | "ja" | "th") {
        return joined;
    }

    // Drop single spaces wedged between two non-ASCII characters.
    let chars: Vec<char> = joined.chars().collect();
    chars
        .iter()
        .enumerate()
        .filter(|&(i, &c)| {
            c != ' '
                || i == 0
                || i + 1 >= chars.len()
                || chars[i - 1].is_ascii()
                || chars[i + 1].is_ascii()
        })
        .map(|(_, &c)| c)
        .collect()
}
