//! Language codes: validation, display names and a rough output check.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{2,3}(-[A-Za-z0-9]{2,8})*$").expect("Invalid regex")
    })
}

/// Whether `code` looks like a BCP 47 language tag (`en`, `pt-BR`, `zh-Hans`).
pub fn is_valid_code(code: &str) -> bool {
    code_pattern().is_match(code)
}

/// Normalize a user-supplied code: trim, lowercase the primary subtag.
pub fn normalize(code: &str) -> String {
    let code = code.trim();
    match code.split_once('-') {
        Some((primary, rest)) => format!("{}-{}", primary.to_lowercase(), rest),
        None => code.to_lowercase(),
    }
}

/// English display name for a code, falling back to the code itself.
pub fn display_name(code: &str) -> String {
    let primary = code.split('-').next().unwrap_or(code);
    let name = match primary {
        "ar" => "Arabic",
        "de" => "German",
        "en" => "English",
        "es" => "Spanish",
        "fr" => "French",
        "hi" => "Hindi",
        "it" => "Italian",
        "ja" => "Japanese",
        "ko" => "Korean",
        "nl" => "Dutch",
        "no" | "nb" => "Norwegian",
        "pl" => "Polish",
        "pt" => "Portuguese",
        "ru" => "Russian",
        "sv" => "Swedish",
        "tr" => "Turkish",
        "uk" => "Ukrainian",
        "zh" => "Chinese",
        _ => return code.to_string(),
    };
    name.to_string()
}

const STOPWORDS: &[(&str, &[&str])] = &[
    ("en", &["the", "and", "is", "of", "to", "in", "that", "it", "with", "for", "this", "are"]),
    ("tr", &["ve", "bir", "bu", "da", "de", "için", "ile", "çok", "olarak", "daha", "gibi", "ama"]),
    ("de", &["der", "die", "und", "das", "ist", "nicht", "mit", "ein", "eine", "auf", "für", "sich"]),
    ("es", &["el", "la", "los", "las", "que", "y", "es", "por", "una", "con", "para", "del"]),
    ("fr", &["le", "la", "les", "et", "est", "une", "des", "que", "dans", "pour", "pas", "sur"]),
    ("pt", &["o", "os", "que", "e", "é", "um", "uma", "não", "com", "para", "por", "mais"]),
    ("it", &["il", "che", "e", "è", "per", "una", "non", "con", "sono", "gli", "della", "anche"]),
    ("nl", &["de", "het", "een", "en", "van", "is", "dat", "niet", "op", "met", "voor", "zijn"]),
];

/// Guess the language of `text` from stopword frequency.
///
/// Returns `None` for short text or when no stopword list scores. Only
/// intended as a sanity check on generated output.
pub fn detect(text: &str) -> Option<&'static str> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphabetic())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect();
    if words.len() < 20 {
        return None;
    }

    STOPWORDS
        .iter()
        .map(|(code, list)| {
            let set: HashSet<&str> = list.iter().copied().collect();
            let hits = words.iter().filter(|w| set.contains(w.as_str())).count();
            (*code, hits)
        })
        .filter(|(_, hits)| *hits > 0)
        .max_by_key(|(_, hits)| *hits)
        .map(|(code, _)| code)
}

/// Whether `detected` matches the requested `expected` code (primary subtag).
pub fn matches(expected: &str, detected: &str) -> bool {
    let primary = expected.split('-').next().unwrap_or(expected);
    primary.eq_ignore_ascii_case(detected)
}
