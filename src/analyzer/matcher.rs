// Keyword filter applied to normalized card text.
use crate::normalizer::normalize_text;

/// A monitor's keyword lists, normalized once so they compare against card text
/// the same way ("9070 XT" and "9070xt" are one term).
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    all_of: Vec<String>,
    any_of: Vec<String>,
}

impl KeywordFilter {
    pub fn new(and_terms: &[String], or_terms: &[String]) -> Self {
        Self {
            all_of: normalize_terms(and_terms),
            any_of: normalize_terms(or_terms),
        }
    }

    /// True when every AND term and at least one OR term appear in `text`.
    /// An empty list never restricts.
    pub fn matches(&self, text: &str) -> bool {
        let text = normalize_text(text);
        let and_result = self.all_of.iter().all(|t| text.contains(t.as_str()));
        let or_result = self.any_of.is_empty() || self.any_of.iter().any(|t| text.contains(t.as_str()));
        and_result && or_result
    }
}

fn normalize_terms(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| normalize_text(t))
        .filter(|t| !t.is_empty())
        .collect()
}
