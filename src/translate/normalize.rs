//! Cache-key normalization and translatable-content detection.
//! Keys are conservative: only whitespace and Unicode form are canonicalized,
//! line boundaries are preserved.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Horizontal whitespace runs inside a single line.
static SPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t\r\x0C\x0B]+").expect("space-run pattern"));

/// `Optional: label (hint)` and `Выберите: label (hint)` choice values.
static CHOICE_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:Optional|Выберите):\s*(.*?)\s*\((.*?)\)\s*$").expect("choice-label pattern")
});

/// Canonicalize raw text into a stable cache key.
///
/// NFKC, line endings unified to `\n`, outer trim, then every line trimmed
/// with internal space/tab runs collapsed to a single space.
pub fn normalize(text: &str) -> String {
    let composed: String = text.nfkc().collect();
    let unified = composed.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = unified.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    trimmed
        .split('\n')
        .map(|line| SPACE_RUN.replace_all(line.trim(), " ").into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Values that look like links are never sent for translation.
pub fn is_url_like(text: &str) -> bool {
    let s = text.trim().to_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("www.")
}

/// Upload placeholders such as `[FILE: photo.png]` or `[ATTACHED IMAGE]`.
pub fn is_file_placeholder(text: &str) -> bool {
    text.starts_with('[') && (text.contains("FILE") || text.contains("ATTACHED"))
}

/// Strip a choice-list wrapper so only the chosen label is translated.
/// Returns the input unchanged when it is not a choice value.
pub fn unwrap_choice_label(text: &str) -> &str {
    if !text.ends_with(')') || !text.contains('(') {
        return text;
    }
    match CHOICE_LABEL.captures(text).and_then(|c| c.get(1)) {
        Some(label) if !label.as_str().trim().is_empty() => label.as_str().trim(),
        _ => text,
    }
}

/// Detects whether text contains characters of the configured source script.
/// Text without any such characters is assumed to already be in the target
/// language.
#[derive(Debug, Clone)]
pub struct ScriptDetector {
    pattern: Regex,
    script: String,
}

impl ScriptDetector {
    /// Build a detector for a Unicode script name (e.g. `Cyrillic`, `Greek`).
    pub fn new(script: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!(r"\p{{{script}}}"))?,
            script: script.to_string(),
        })
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    #[inline]
    pub fn has_source_script(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_spaces_and_keeps_blank_lines() {
        assert_eq!(
            normalize("  hello   world  \r\n\r\n  again "),
            "hello world\n\nagain"
        );
    }

    #[test]
    fn equivalent_inputs_share_a_key() {
        let a = normalize("  hi   there  \r\n\r\n ok ");
        let b = normalize("hi there\n\nok");
        assert_eq!(a, "hi there\n\nok");
        assert_eq!(a, b);
    }

    #[test]
    fn whitespace_only_is_empty() {
        assert_eq!(normalize(" \t\r\n  \n"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn tabs_and_lone_carriage_returns() {
        assert_eq!(normalize("a\t\tb\rc"), "a b\nc");
    }

    #[test]
    fn nfkc_folds_compatibility_spaces() {
        assert_eq!(normalize("кот\u{00A0}\u{00A0}пёс"), "кот пёс");
        // decomposed ё composes to the same key as the precomposed one
        assert_eq!(normalize("е\u{0308}ж"), normalize("ёж"));
    }

    #[test]
    fn url_detection() {
        assert!(is_url_like("  HTTPS://example.test/a"));
        assert!(is_url_like("www.example.test"));
        assert!(!is_url_like("посетите http://x.test"));
    }

    #[test]
    fn choice_labels_are_unwrapped() {
        assert_eq!(unwrap_choice_label("Optional: Закат (тёплый свет)"), "Закат");
        assert_eq!(unwrap_choice_label("Выберите: Студия (фон)"), "Студия");
        assert_eq!(unwrap_choice_label("Optional:  (пусто)"), "Optional:  (пусто)");
        assert_eq!(unwrap_choice_label("просто текст (скобки)"), "просто текст (скобки)");
    }

    #[test]
    fn file_placeholders() {
        assert!(is_file_placeholder("[FILE: face.png]"));
        assert!(is_file_placeholder("[ATTACHED IMAGE 2]"));
        assert!(!is_file_placeholder("[портрет]"));
    }

    #[test]
    fn script_detection() {
        let detector = ScriptDetector::new("Cyrillic").unwrap();
        assert!(detector.has_source_script("Hello Мир"));
        assert!(!detector.has_source_script("Hello world"));
        assert!(ScriptDetector::new("NotAScript").is_err());
    }
}
