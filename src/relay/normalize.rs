//! Text normalization for keyword matching.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::canonical_combining_class;

/// Lowercase, decompose (NFD) and drop combining marks.
///
/// Only marks with a non-zero canonical combining class are dropped, i.e. the
/// accents NFD splits off. Spacing vowel signs (Devanagari, Thai) are letters
/// of the word and stay.
///
/// `"Teclado Magnético"` becomes `"teclado magnetico"`. Total and idempotent.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| canonical_combining_class(*c) == 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases() {
        assert_eq!(normalize("TECLADO"), "teclado");
    }

    #[test]
    fn test_strips_accents() {
        assert_eq!(normalize("Teclado Magnético"), "teclado magnetico");
        assert_eq!(normalize("ação çãõ ÀÉÎÕÜ"), "acao cao aeiou");
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_keeps_non_latin_base_letters() {
        assert_eq!(normalize("Привет"), "привет");
        assert_eq!(normalize("200 reais!"), "200 reais!");
    }

    #[test]
    fn test_keeps_vowel_signs() {
        assert_eq!(normalize("किताब"), "किताब");
        assert_eq!(normalize("กัน"), "กัน");
        // Thai tone marks do combine and are dropped.
        assert_eq!(normalize("ก\u{0E48}"), "ก");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "Vendo Teclado Mecânico novo, 200 reais",
            "İstanbul",
            "ÅNGSTRÖM Ω K",
            "e\u{0301}",
            "किताब",
            "ไม้เอก",
            "🎉 Oferta RELÂMPAGO 🎉",
            "",
            "   ",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }
}
