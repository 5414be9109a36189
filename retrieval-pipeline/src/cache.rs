//! Bounded memo of answers keyed by normalized question text.

use moka::sync::Cache;
use unicode_normalization::UnicodeNormalization;

use crate::answer_retrieval::{AnswerResult, AnswerStatus};

/// Cache key for `question`: NFKC, trimmed, lowercased, whitespace collapsed.
pub fn normalize_question(question: &str) -> String {
    let folded: String = question.nfkc().collect::<String>().to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Answers stay cached until evicted or explicitly invalidated, so they can
/// be stale relative to a rebuilt index until `invalidate_all` is called.
pub struct AnswerCache {
    cache: Option<Cache<String, AnswerResult>>,
}

impl AnswerCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: u64) -> Self {
        let cache = (capacity > 0).then(|| Cache::builder().max_capacity(capacity).build());
        Self { cache }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    pub fn get(&self, key: &str) -> Option<AnswerResult> {
        self.cache.as_ref()?.get(key)
    }

    /// Stores `result` unless it records a failure.
    pub fn insert(&self, key: String, result: &AnswerResult) {
        if result.status == AnswerStatus::Failed {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.insert(key, result.clone());
        }
    }

    /// Drop every entry, returning how many were cached.
    pub fn invalidate_all(&self) -> u64 {
        let Some(cache) = &self.cache else {
            return 0;
        };
        cache.run_pending_tasks();
        let count = cache.entry_count();
        cache.invalidate_all();
        cache.run_pending_tasks();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answered(text: &str) -> AnswerResult {
        AnswerResult {
            answer: text.into(),
            sources: vec!["mba.pdf".into()],
            status: AnswerStatus::Answered,
        }
    }

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(normalize_question("  MBA\t  Fees? "), "mba fees?");
        assert_eq!(normalize_question("ｍｂａ fees"), "mba fees");
        assert_eq!(normalize_question("   "), "");
    }

    #[test]
    fn stores_and_invalidates() {
        let cache = AnswerCache::new(8);
        cache.insert("mba fees".into(), &answered("5 lakh"));

        assert_eq!(cache.get("mba fees"), Some(answered("5 lakh")));
        assert_eq!(cache.invalidate_all(), 1);
        assert_eq!(cache.get("mba fees"), None);
    }

    #[test]
    fn failures_are_not_cached() {
        let cache = AnswerCache::new(8);
        cache.insert("q".into(), &AnswerResult::failed("⚠️ down", Vec::new()));
        assert_eq!(cache.get("q"), None);
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let cache = AnswerCache::new(0);
        cache.insert("q".into(), &answered("a"));
        assert!(!cache.is_enabled());
        assert_eq!(cache.get("q"), None);
        assert_eq!(cache.invalidate_all(), 0);
    }
}
