use tracing::debug;

use crate::data::Corpus;
use crate::{AppError, AppResult};

/// Keeps items whose weight reaches a minimum frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrequencyFilter {
    pub threshold: u64,
}

impl FrequencyFilter {
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    /// Row indices that pass, in their original order.
    pub fn passing(&self, corpus: &Corpus) -> Vec<usize> {
        corpus
            .items()
            .iter()
            .enumerate()
            .filter(|(_, item)| item.weight >= self.threshold)
            .map(|(idx, _)| idx)
            .collect()
    }

    #[tracing::instrument(name = "Filtering by frequency", level = "debug", skip(corpus), fields(items = corpus.len()))]
    pub fn apply(&self, corpus: &Corpus) -> AppResult<Corpus> {
        let kept = self.passing(corpus);
        if kept.is_empty() {
            return Err(AppError::EmptyResult {
                threshold: self.threshold,
            });
        }
        debug!(kept = kept.len(), dropped = corpus.len() - kept.len(), "Applied frequency filter");
        Ok(corpus.select(&kept))
    }
}
