use std::collections::HashSet;

/// Tokens shorter than this never count as content terms.
const MIN_TOKEN_CHARS: usize = 3;

const STOPWORDS: &[&str] = &[
    "the", "and", "are", "was", "were", "been", "being", "for", "from", "has", "had", "have",
    "her", "his", "its", "our", "their", "this", "that", "these", "those", "with", "what",
    "when", "where", "which", "who", "whom", "why", "how", "can", "could", "should", "would",
    "will", "shall", "may", "might", "must", "about", "into", "over", "under", "between",
    "does", "did", "done", "doing", "not", "but", "you", "your", "they", "them", "she", "him",
    "all", "any", "some", "such", "than", "then", "there", "here", "out", "off", "too", "very",
    "just", "only", "also", "more", "most", "other", "each", "few", "own", "same",
];

/// Lowercases, splits on non-alphanumerics and keeps content terms only.
pub fn extract_keywords(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|token| !STOPWORDS.contains(token))
        .map(ToString::to_string)
        .collect()
}

/// Fraction of distinct query keywords found as case-insensitive substrings
/// of the document text. Zero for an empty keyword set.
pub fn keyword_score(keywords: &HashSet<String>, document_text: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }

    let haystack = document_text.to_lowercase();
    let matched = keywords
        .iter()
        .filter(|keyword| haystack.contains(keyword.as_str()))
        .count();

    matched as f64 / keywords.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_drops_stopwords_and_short_tokens() {
        let keywords = extract_keywords("What is the Tokio runtime for async IO?");

        assert!(keywords.contains("tokio"));
        assert!(keywords.contains("runtime"));
        assert!(keywords.contains("async"));
        assert!(!keywords.contains("what"));
        assert!(!keywords.contains("the"));
        assert!(!keywords.contains("is"));
        assert!(!keywords.contains("io"));
    }

    #[test]
    fn extraction_splits_on_punctuation() {
        let keywords = extract_keywords("project-x: launch/date");
        assert!(keywords.contains("project"));
        assert!(keywords.contains("launch"));
        assert!(keywords.contains("date"));
    }

    #[test]
    fn score_is_matched_fraction() {
        let keywords = extract_keywords("tokio runtime scheduler");
        let score = keyword_score(&keywords, "The Tokio RUNTIME drives tasks.");

        assert!((score - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn score_handles_empty_inputs() {
        let empty = HashSet::new();
        assert_eq!(keyword_score(&empty, "anything"), 0.0);

        let keywords = extract_keywords("tokio");
        assert_eq!(keyword_score(&keywords, ""), 0.0);
    }

    #[test]
    fn score_is_case_insensitive_substring_match() {
        let keywords = extract_keywords("schedule");
        let score = keyword_score(&keywords, "Rescheduled for next week");
        assert!((score - 1.0).abs() < 1e-9);
    }
}
