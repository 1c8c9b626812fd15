pub mod marker;
pub mod pca;
pub mod tsne;

use ndarray::Array2;
use tracing::{debug, warn};

use crate::config::{LayoutConfig, LayoutMethod};

pub use tsne::Tsne;

/// Below this many rows t-SNE has no neighbourhood to preserve.
const MIN_TSNE_POINTS: usize = 4;

/// Maps `(n, d)` embeddings to `(n, 2)` coordinates.
pub trait Reducer {
    fn reduce(&self, embeddings: &Array2<f64>) -> Array2<f64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Pca;

impl Reducer for Pca {
    fn reduce(&self, embeddings: &Array2<f64>) -> Array2<f64> {
        pca::pca_reduce(embeddings, 2)
    }
}

impl Reducer for Tsne {
    fn reduce(&self, embeddings: &Array2<f64>) -> Array2<f64> {
        self.fit_transform(embeddings)
    }
}

/// Pick the reducer for `n` rows, falling back to PCA where t-SNE is unsuitable.
pub fn reducer_for(config: &LayoutConfig, n: usize) -> Box<dyn Reducer> {
    match config.method {
        LayoutMethod::Pca => Box::new(Pca),
        LayoutMethod::Tsne if n < MIN_TSNE_POINTS => {
            debug!(n, "Too few items for t-SNE, using PCA");
            Box::new(Pca)
        }
        LayoutMethod::Tsne if n > config.max_tsne_points => {
            warn!(
                n,
                limit = config.max_tsne_points,
                "Too many items for exact t-SNE, falling back to PCA. Raise layout.max_tsne_points to force t-SNE."
            );
            Box::new(Pca)
        }
        LayoutMethod::Tsne => Box::new(Tsne::new(config.perplexity, config.iterations)),
    }
}

/// 2D coordinates for every embedding row.
pub fn layout(embeddings: &Array2<f64>, config: &LayoutConfig) -> Array2<f64> {
    reducer_for(config, embeddings.nrows()).reduce(embeddings)
}
