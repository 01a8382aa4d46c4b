//! Cross-document boilerplate detection for crawled pages.
//!
//! A sample of documents is scanned for word n-grams. Phrases found in at
//! least `min_occurrences` distinct documents are treated as boilerplate
//! (navigation, cookie banners, footers) and stripped from every document
//! cleaned afterwards.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use lore_core::DedupConfig;

/// Boilerplate phrase detector and remover.
#[derive(Debug, Clone)]
pub struct DedupAnalyzer {
    config: DedupConfig,

    /// Common phrases, longest first.
    phrases: Vec<String>,
    analyzed: bool,
}

impl DedupAnalyzer {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            phrases: Vec::new(),
            analyzed: false,
        }
    }

    /// Documents collected before analysis runs.
    pub fn sample_size(&self) -> usize {
        self.config.sample_size.max(1)
    }

    pub fn is_analyzed(&self) -> bool {
        self.analyzed
    }

    /// Detected phrases, longest first.
    pub fn phrases(&self) -> &[String] {
        &self.phrases
    }

    /// Find phrases shared by at least `min_occurrences` of the sampled
    /// documents. Returns how many were found.
    pub fn analyze(&mut self, documents: &[String]) -> usize {
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for document in documents.iter().take(self.sample_size()) {
            let words: Vec<&str> = document.split_whitespace().collect();
            let mut seen: HashSet<String> = HashSet::new();

            for &size in &self.config.ngram_sizes {
                if size == 0 || words.len() < size {
                    continue;
                }
                let stride = (size / 2).max(1);
                for start in (0..=words.len() - size).step_by(stride) {
                    seen.insert(words[start..start + size].join(" "));
                }
            }

            for phrase in seen {
                *document_frequency.entry(phrase).or_insert(0) += 1;
            }
        }

        let threshold = self.config.min_occurrences.max(1);
        let mut common: Vec<(String, usize)> = document_frequency
            .into_iter()
            .filter(|(_, count)| *count >= threshold)
            .collect();

        common.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| b.0.len().cmp(&a.0.len()))
                .then_with(|| a.0.cmp(&b.0))
        });
        common.truncate(self.config.max_phrases);

        let mut phrases: Vec<String> = common.into_iter().map(|(phrase, _)| phrase).collect();
        phrases.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

        debug!(
            sampled = documents.len().min(self.sample_size()),
            phrases = phrases.len(),
            "Boilerplate analysis complete"
        );

        self.phrases = phrases;
        self.analyzed = true;
        self.phrases.len()
    }

    /// Remove every whole-word occurrence of each common phrase, then
    /// collapse whitespace.
    pub fn clean(&self, text: &str) -> String {
        if self.phrases.is_empty() {
            return text.to_string();
        }

        let mut padded = format!(" {} ", collapse(text));
        for phrase in &self.phrases {
            let needle = format!(" {} ", phrase);
            while padded.contains(&needle) {
                padded = padded.replace(&needle, " ");
            }
        }
        collapse(&padded)
    }
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer(min_occurrences: usize) -> DedupAnalyzer {
        DedupAnalyzer::new(DedupConfig {
            min_occurrences,
            ..Default::default()
        })
    }

    fn sample() -> Vec<String> {
        vec![
            "sign up for our newsletter apples grow on trees in orchards".to_string(),
            "sign up for our newsletter bananas ripen quickly in warm kitchens".to_string(),
            "sign up for our newsletter cherries need cold winters to fruit".to_string(),
            "read the cookie policy carefully dates are sweet desert fruit".to_string(),
            "read the cookie policy carefully elderberries make good syrup".to_string(),
        ]
    }

    #[test]
    fn test_phrase_in_three_of_five_is_common() {
        let mut dedup = analyzer(3);
        let found = dedup.analyze(&sample());

        assert!(found > 0);
        assert!(dedup.is_analyzed());
        assert!(dedup.phrases().iter().any(|p| p == "sign up for our newsletter"));
        assert!(!dedup.phrases().iter().any(|p| p.contains("cookie")));

        let cleaned = dedup
            .clean("Figs are great.  sign up for our newsletter\nread the cookie policy carefully");
        assert!(!cleaned.contains("newsletter"));
        assert!(cleaned.contains("read the cookie policy carefully"));
        assert_eq!(cleaned, "Figs are great. read the cookie policy carefully");
    }

    #[test]
    fn test_frequency_is_per_document() {
        let mut dedup = analyzer(2);
        let docs = vec![
            "echo echo echo echo echo echo echo echo echo echo".to_string(),
            "completely unrelated words appear right here".to_string(),
        ];
        assert_eq!(dedup.analyze(&docs), 0);
    }

    #[test]
    fn test_longest_phrase_first() {
        let mut dedup = analyzer(2);
        dedup.analyze(&[
            "alpha beta gamma delta epsilon one".to_string(),
            "alpha beta gamma delta epsilon two".to_string(),
        ]);
        let lengths: Vec<usize> = dedup.phrases().iter().map(|p| p.len()).collect();
        let mut sorted = lengths.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(lengths, sorted);
        assert_eq!(dedup.clean("zeta alpha beta gamma delta epsilon eta"), "zeta eta");
    }

    #[test]
    fn test_no_analysis_leaves_text_alone() {
        let dedup = analyzer(3);
        assert_eq!(dedup.clean("  untouched \n text "), "  untouched \n text ");
    }
}
