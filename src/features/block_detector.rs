//! Anti-bot block detection: a plain predicate over rendered page text.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use tracing::warn;

/// Outcome of a block check. `reason` names the phrase or indicator that fired.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockVerdict {
    pub blocked: bool,
    pub reason: Option<String>,
}

impl BlockVerdict {
    pub fn clear() -> Self {
        Self::default()
    }

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            blocked: true,
            reason: Some(reason.into()),
        }
    }
}

/// Anything that can judge rendered page content + title.
pub trait BlockPredicate: Send + Sync {
    fn check(&self, content: &str, title: &str) -> BlockVerdict;

    fn is_blocked(&self, content: &str, title: &str) -> (bool, Option<String>) {
        let v = self.check(content, title);
        (v.blocked, v.reason)
    }
}

/// Case-insensitive keyword matcher.
///
/// Content and title are both searched for every block phrase; phrases are
/// tried in list order, so the earliest listed phrase wins when several hit.
/// Error-indicating phrases are checked against the title only.
pub struct KeywordBlockDetector {
    phrases: Vec<String>,
    matcher: Option<AhoCorasick>,
    error_titles: Vec<String>,
}

impl KeywordBlockDetector {
    pub fn new(phrases: &[String], error_titles: &[String]) -> Self {
        let phrases: Vec<String> = phrases
            .iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();

        let matcher = if phrases.is_empty() {
            None
        } else {
            match AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .build(&phrases)
            {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!("block detector: invalid phrase set ({}), detection disabled", e);
                    None
                }
            }
        };

        Self {
            phrases,
            matcher,
            error_titles: error_titles.iter().map(|t| t.to_lowercase()).collect(),
        }
    }

    fn first_phrase_in(&self, matcher: &AhoCorasick, text: &str) -> Option<usize> {
        matcher
            .find_overlapping_iter(text)
            .map(|m| m.pattern().as_usize())
            .min()
    }
}

impl BlockPredicate for KeywordBlockDetector {
    fn check(&self, content: &str, title: &str) -> BlockVerdict {
        if let Some(matcher) = &self.matcher {
            let hit = [content, title]
                .iter()
                .filter_map(|text| self.first_phrase_in(matcher, text))
                .min();
            if let Some(idx) = hit {
                return BlockVerdict::blocked(self.phrases[idx].clone());
            }
        }

        let title_lower = title.to_lowercase();
        if self
            .error_titles
            .iter()
            .any(|t| !t.is_empty() && title_lower.contains(t.as_str()))
        {
            return BlockVerdict::blocked("error page");
        }

        BlockVerdict::clear()
    }
}
