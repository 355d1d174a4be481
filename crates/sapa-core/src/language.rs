//! Query language detection.
//!
//! A word counts as Vietnamese when it contains a letter that only occurs in
//! Vietnamese orthography among the two supported languages: the base letters
//! ă â đ ê ô ơ ư, or any vowel carrying a tone mark. The query is Vietnamese
//! when at least [`VIETNAMESE_WORD_RATIO`] of its words qualify.

use crate::types::Language;

/// Minimum share of Vietnamese-marked words for a Vietnamese verdict.
pub const VIETNAMESE_WORD_RATIO: f32 = 0.3;

const VIETNAMESE_LETTERS: &str = "àáảãạăằắẳẵặâầấẩẫậ\
                                  èéẻẽẹêềếểễệ\
                                  ìíỉĩị\
                                  òóỏõọôồốổỗộơờớởỡợ\
                                  ùúủũụưừứửữự\
                                  ỳýỷỹỵđ";

fn is_vietnamese_letter(c: char) -> bool {
    c.to_lowercase().any(|lc| VIETNAMESE_LETTERS.contains(lc))
}

/// Detect the language of `text`. Deterministic; empty input is English.
pub fn detect_language(text: &str) -> Language {
    let mut words = 0usize;
    let mut marked = 0usize;

    for word in text.split_whitespace() {
        if !word.chars().any(char::is_alphabetic) {
            continue;
        }
        words += 1;
        if word.chars().any(is_vietnamese_letter) {
            marked += 1;
        }
    }

    if words == 0 {
        return Language::English;
    }

    if marked as f32 / words as f32 >= VIETNAMESE_WORD_RATIO {
        Language::Vietnamese
    } else {
        Language::English
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vietnamese_questions() {
        for q in [
            "Gợi ý quán bún chả ngon ở Hà Nội",
            "Tết Nguyên Đán là gì?",
            "Cần visa để đến Việt Nam không?",
            "ĐI ĐÂU Ở ĐÀ NẴNG",
        ] {
            assert_eq!(detect_language(q), Language::Vietnamese, "{}", q);
        }
    }

    #[test]
    fn test_english_questions() {
        for q in [
            "What are the best places to visit in Vietnam?",
            "Recommend some street food in Saigon",
            "Do I need a visa?",
        ] {
            assert_eq!(detect_language(q), Language::English, "{}", q);
        }
    }

    #[test]
    fn test_english_with_a_few_vietnamese_names_stays_english() {
        assert_eq!(
            detect_language("Where can I eat good phở in Hà Nội near the old quarter"),
            Language::English
        );
    }

    #[test]
    fn test_unaccented_vietnamese_is_english() {
        // Without diacritics there is nothing to distinguish the two.
        assert_eq!(detect_language("di dau o ha noi"), Language::English);
    }

    #[test]
    fn test_empty_and_symbol_only_default_to_english() {
        assert_eq!(detect_language(""), Language::English);
        assert_eq!(detect_language("   "), Language::English);
        assert_eq!(detect_language("?? 123 !!"), Language::English);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let q = "Món ăn nào nổi tiếng ở Huế?";
        let first = detect_language(q);
        for _ in 0..10 {
            assert_eq!(detect_language(q), first);
        }
    }
}
