use crate::models::{normalize_address, EmailCandidate, EmailMethod, EnrichedEmailSet};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Folds candidates from every source into one ranked set.
///
/// This is the only place where two reports of the same address are
/// reconciled: the higher confidence wins, ties go to the method with the
/// higher [`EmailMethod::precedence`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailMergeEngine;

impl EmailMergeEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(&self, candidates: Vec<EmailCandidate>) -> EnrichedEmailSet {
        self.merge_at(candidates, Utc::now())
    }

    /// Same as [`merge`](Self::merge) with an explicit enrichment timestamp.
    pub fn merge_at(&self, candidates: Vec<EmailCandidate>, at: DateTime<Utc>) -> EnrichedEmailSet {
        let mut best: HashMap<String, EmailCandidate> = HashMap::new();
        for candidate in candidates {
            let key = normalize_address(candidate.address());
            if key.is_empty() {
                continue;
            }
            match best.get(&key) {
                Some(current) if rank(current) >= rank(&candidate) => {}
                _ => {
                    best.insert(key, candidate);
                }
            }
        }

        let mut emails: Vec<EmailCandidate> = best.into_values().collect();
        emails.sort_by(|a, b| {
            b.confidence()
                .cmp(&a.confidence())
                .then_with(|| a.address().cmp(b.address()))
        });

        let mut methods: Vec<EmailMethod> = emails.iter().map(|e| e.method()).collect();
        methods.sort();
        methods.dedup();

        tracing::debug!(
            "Merged {} distinct addresses from {} method(s)",
            emails.len(),
            methods.len()
        );
        EnrichedEmailSet::from_ranked(emails, methods, at)
    }
}

fn rank(candidate: &EmailCandidate) -> (u8, u8) {
    (candidate.confidence(), candidate.method().precedence())
}
