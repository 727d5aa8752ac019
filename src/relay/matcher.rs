//! All-tokens-present keyword matching.
//!
//! A keyword phrase is split on whitespace after normalization. A message
//! matches when every token occurs somewhere in the normalized message text.
//! Order, adjacency and word boundaries are not checked, so `"cara"` matches
//! inside `"caramelo"`.

use crate::relay::normalize::normalize;

/// Normalized tokens of a keyword phrase. Empty for blank phrases.
pub fn keyword_tokens(phrase: &str) -> Vec<String> {
    normalize(phrase)
        .split_whitespace()
        .map(str::to_owned)
        .collect()
}

/// Message text normalized once, tested against many phrases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedText(String);

impl NormalizedText {
    pub fn new(text: &str) -> Self {
        Self(normalize(text))
    }

    /// True if every token of `phrase` is a substring of this text.
    /// A phrase without tokens matches everything.
    pub fn matches(&self, phrase: &str) -> bool {
        normalize(phrase)
            .split_whitespace()
            .all(|token| self.0.contains(token))
    }

    /// First phrase in `keywords` that matches, in stored order.
    pub fn first_match<'a>(&self, keywords: &'a [String]) -> Option<&'a str> {
        keywords
            .iter()
            .map(String::as_str)
            .find(|keyword| self.matches(keyword))
    }
}

/// Decide whether `message_text` matches `keyword_phrase`.
pub fn matches(message_text: &str, keyword_phrase: &str) -> bool {
    NormalizedText::new(message_text).matches(keyword_phrase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_and_accent_insensitive() {
        assert!(matches("Teclado Magnético", "teclado magnetico"));
        assert!(matches("TECLADO", "teclado"));
        assert!(matches("teclado magnetico", "Teclado Magnético"));
    }

    #[test]
    fn test_requires_all_tokens() {
        assert!(!matches("oferta de teclado hoje", "teclado caro"));
        assert!(matches("oferta de teclado caro hoje", "teclado caro"));
    }

    #[test]
    fn test_token_order_irrelevant() {
        assert!(matches("caro teclado", "teclado caro"));
    }

    #[test]
    fn test_substring_inside_word() {
        assert!(matches("caramelo", "cara"));
    }

    #[test]
    fn test_extra_whitespace_in_phrase() {
        assert!(matches("mouse gamer barato", "  mouse \t  gamer  "));
    }

    #[test]
    fn test_blank_phrase_matches_everything() {
        assert!(matches("anything", ""));
        assert!(matches("", "   "));
        assert!(keyword_tokens("  \t ").is_empty());
    }

    #[test]
    fn test_empty_text_never_matches_real_token() {
        assert!(!matches("", "teclado"));
    }

    #[test]
    fn test_keyword_tokens_normalized() {
        assert_eq!(keyword_tokens("Teclado  Mecânico"), vec!["teclado", "mecanico"]);
    }

    #[test]
    fn test_vowel_signs_distinguish_words() {
        assert!(!matches("कताब", "किताब"));
        assert!(!matches("กน", "กัน"));
        assert!(matches("नई किताब सस्ती", "किताब"));
        assert!(matches("ขายกันถูก", "กัน"));
    }

    #[test]
    fn test_first_match_respects_order() {
        let text = NormalizedText::new("Vendo teclado e mouse");
        let keywords = vec!["monitor".to_string(), "mouse".to_string(), "teclado".to_string()];
        assert_eq!(text.first_match(&keywords), Some("mouse"));
        assert_eq!(text.first_match(&[]), None);
    }
}
