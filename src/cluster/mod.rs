pub mod kmeans;
pub mod linalg;
pub mod terms;
pub mod traits;

use std::rc::Rc;

use bincode::{Decode, Encode};
use tracing::{debug, info, warn};

use crate::cache::{Fingerprint, Fingerprinter, Memo, ModelStore, Stage};
use crate::config::{ClusteringConfig, LayoutConfig, LayoutMethod};
use crate::data::Corpus;
use crate::project;
use crate::{AppError, AppResult};

pub use kmeans::KMeans;
pub use terms::{ClassTfIdf, KeywordCounts, TermScores};
pub use traits::{Clusterer, TermSource};

/// Bumped whenever the persisted model layout or fitting semantics change.
const MODEL_FORMAT_VERSION: u64 = 1;

/// One realized cluster.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct Topic {
    pub id: usize,
    pub size: usize,
    pub terms: TermScores,
}

/// Everything downstream stages need from a fit.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct TopicModel {
    /// Requested number of clusters
    pub n_topics: usize,
    /// Topic id of every item, row-aligned with the corpus
    pub assignments: Vec<usize>,
    /// Non-empty topics in ascending id order
    pub topics: Vec<Topic>,
    /// 2D position of every item
    pub layout: Vec<[f64; 2]>,
}

impl TopicModel {
    pub fn topic(&self, id: usize) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id == id)
    }

    pub fn topic_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.topics.iter().map(|t| t.id)
    }

    fn fits(&self, corpus: &Corpus) -> bool {
        self.assignments.len() == corpus.len() && self.layout.len() == corpus.len()
    }
}

/// Fits [`TopicModel`]s, reusing memoized or persisted results for identical inputs.
pub struct TopicClusterer<'a> {
    kmeans: KMeans,
    layout: LayoutConfig,
    memo: &'a Memo,
    store: Option<&'a ModelStore>,
}

impl<'a> TopicClusterer<'a> {
    pub fn new(
        n_topics: usize,
        clustering: &ClusteringConfig,
        layout: &LayoutConfig,
        memo: &'a Memo,
    ) -> Self {
        let mut kmeans = KMeans::new(n_topics);
        kmeans
            .set_seed(clustering.seed)
            .set_n_init(clustering.n_init)
            .set_max_iter(clustering.max_iter)
            .set_tolerance(clustering.tolerance);
        Self {
            kmeans,
            layout: layout.clone(),
            memo,
            store: None,
        }
    }

    pub fn with_store(mut self, store: &'a ModelStore) -> Self {
        self.store = Some(store);
        self
    }

    fn fingerprint(&self, corpus: &Corpus, terms: &dyn TermSource) -> Fingerprint {
        let mut fp = Fingerprinter::new("fit");
        fp.u64(MODEL_FORMAT_VERSION);
        corpus.fingerprint_into(&mut fp);
        fp.usize(self.kmeans.k)
            .u64(self.kmeans.seed)
            .usize(self.kmeans.n_init)
            .usize(self.kmeans.max_iter)
            .f64(self.kmeans.tolerance)
            .str(&terms.id());
        match self.layout.method {
            LayoutMethod::Pca => fp.str("pca"),
            LayoutMethod::Tsne => fp
                .str("tsne")
                .f64(self.layout.perplexity)
                .usize(self.layout.iterations)
                .usize(self.layout.max_tsne_points),
        };
        fp.finish()
    }

    /// Cluster `corpus` into exactly `k` topics and rank each topic's terms.
    ///
    /// Fails with a configuration error unless `2 <= k <= corpus.len()`.
    #[tracing::instrument(name = "Fitting topic model", level = "info", skip_all, fields(k = self.kmeans.k, n = corpus.len()))]
    pub fn fit(&self, corpus: &Corpus, terms: &dyn TermSource) -> AppResult<Rc<TopicModel>> {
        let k = self.kmeans.k;
        if k < 2 || k > corpus.len() {
            return Err(AppError::Configuration(format!(
                "{k} topics requested but only {} items are available; choose between 2 and {}",
                corpus.len(),
                corpus.len()
            )));
        }

        let fingerprint = self.fingerprint(corpus, terms);
        self.memo.get_or_try_insert_with(Stage::Fit, fingerprint, || {
            if let Some(model) = self.store.and_then(|s| s.load::<TopicModel>(fingerprint)) {
                if model.fits(corpus) {
                    info!(%fingerprint, "Reusing persisted topic model");
                    return Ok(model);
                }
                warn!(%fingerprint, "Persisted topic model does not match the input, refitting");
            }
            let model = self.compute(corpus, terms)?;
            if let Some(store) = self.store {
                store.save(fingerprint, &model);
            }
            Ok(model)
        })
    }

    fn compute(&self, corpus: &Corpus, terms: &dyn TermSource) -> AppResult<TopicModel> {
        let assignments = self.kmeans.fit_predict(corpus.embeddings())?;

        let mut sizes = vec![0usize; self.kmeans.k];
        for &label in &assignments {
            sizes[label] += 1;
        }
        let topics: Vec<Topic> = terms
            .rank_terms(corpus.items(), &assignments)
            .into_iter()
            .map(|(id, terms)| Topic {
                id,
                size: sizes[id],
                terms,
            })
            .collect();
        debug!(realized = topics.len(), "Ranked topic terms");

        let coords = project::layout(corpus.embeddings(), &self.layout);
        let layout = coords.rows().into_iter().map(|r| [r[0], r[1]]).collect();

        Ok(TopicModel {
            n_topics: self.kmeans.k,
            assignments,
            topics,
            layout,
        })
    }
}
