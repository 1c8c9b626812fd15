use ndarray::Array2;

use crate::AppResult;
use crate::cluster::TermScores;
use crate::data::Item;

/// Hard partitioning of embedding rows.
pub trait Clusterer {
    /// One cluster label per row of `embeddings`.
    fn fit_predict(&self, embeddings: &Array2<f64>) -> AppResult<Vec<usize>>;
}

/// Produces the ranked representative terms of every topic.
pub trait TermSource {
    /// Stable identifier mixed into model fingerprints.
    fn id(&self) -> String;

    /// `labels[i]` is the topic of `items[i]`. Returns one entry per topic
    /// that has members, in ascending topic order, each ranked best first.
    fn rank_terms(&self, items: &[Item], labels: &[usize]) -> Vec<(usize, TermScores)>;
}
