use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;

use tracing::info;

use crate::cache::{Memo, ModelStore};
use crate::cluster::{ClassTfIdf, KeywordCounts, TermSource, TopicClusterer, TopicModel};
use crate::config::{AtlasConfig, KeywordsConfig, SentencesConfig};
use crate::data::{Corpus, DataLoader, Item};
use crate::filter::FrequencyFilter;
use crate::label::{LabelSource, TopicLabels, synthesize_labels};
use crate::project;
use crate::render::{DataMap, MapLayers};
use crate::AppResult;

/// What distinguishes one map variant from another.
pub trait MapStrategy {
    /// Short name used in logs and as the default output stem.
    fn name(&self) -> &'static str;

    fn title(&self) -> &'static str;

    fn n_topics(&self) -> usize;

    fn load(&self, loader: &DataLoader<'_>) -> AppResult<Rc<Corpus>>;

    /// Runs between loading and clustering; the default keeps every item.
    fn prefilter(&self, corpus: Rc<Corpus>) -> AppResult<Rc<Corpus>> {
        Ok(corpus)
    }

    fn term_source(&self, loader: &DataLoader<'_>) -> AppResult<Box<dyn TermSource>>;

    fn hover_text(&self, item: &Item) -> String;

    fn default_output(&self) -> String {
        format!("{}.html", self.name())
    }
}

/// Frequency-filtered keywords whose topic terms are the keywords themselves.
#[derive(Debug, Clone)]
pub struct KeywordStrategy {
    pub config: KeywordsConfig,
}

impl MapStrategy for KeywordStrategy {
    fn name(&self) -> &'static str {
        "keywords"
    }

    fn title(&self) -> &'static str {
        "Keyword topics"
    }

    fn n_topics(&self) -> usize {
        self.config.n_topics
    }

    fn load(&self, loader: &DataLoader<'_>) -> AppResult<Rc<Corpus>> {
        loader.keywords(&self.config.embeddings, &self.config.table)
    }

    fn prefilter(&self, corpus: Rc<Corpus>) -> AppResult<Rc<Corpus>> {
        let filter = FrequencyFilter::new(self.config.min_freq);
        Ok(Rc::new(filter.apply(&corpus)?))
    }

    fn term_source(&self, _loader: &DataLoader<'_>) -> AppResult<Box<dyn TermSource>> {
        Ok(Box::new(KeywordCounts))
    }

    fn hover_text(&self, item: &Item) -> String {
        item.text.clone()
    }
}

/// Review sentences scored with c-TF-IDF and tagged with their sentiment.
#[derive(Debug, Clone)]
pub struct SentenceStrategy {
    pub config: SentencesConfig,
}

impl MapStrategy for SentenceStrategy {
    fn name(&self) -> &'static str {
        "sentences"
    }

    fn title(&self) -> &'static str {
        "Review sentence topics"
    }

    fn n_topics(&self) -> usize {
        self.config.n_topics
    }

    fn load(&self, loader: &DataLoader<'_>) -> AppResult<Rc<Corpus>> {
        loader.sentences(&self.config.embeddings, &self.config.table)
    }

    fn term_source(&self, loader: &DataLoader<'_>) -> AppResult<Box<dyn TermSource>> {
        let stopwords = loader.stopwords(&self.config.stopwords)?;
        Ok(Box::new(ClassTfIdf::new(stopwords, self.config.top_n_words)))
    }

    fn hover_text(&self, item: &Item) -> String {
        match item.sentiment {
            Some(sentiment) => format!("{} {}", sentiment.emoji(), item.text),
            None => item.text.clone(),
        }
    }
}

/// Counts reported once a map has been produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub variant: &'static str,
    pub loaded: usize,
    pub kept: usize,
    pub n_topics: usize,
    pub realized: usize,
    pub label_source: LabelSource,
}

/// A clustered corpus, before labelling and rendering.
#[derive(Debug, Clone)]
pub struct Fitted {
    pub loaded: usize,
    pub corpus: Rc<Corpus>,
    pub model: Rc<TopicModel>,
}

/// Runs [`MapStrategy`]s against one configuration and one memo table.
pub struct Pipeline<'a> {
    config: &'a AtlasConfig,
    memo: &'a Memo,
    store: Option<&'a ModelStore>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a AtlasConfig, memo: &'a Memo) -> Self {
        Self {
            config,
            memo,
            store: None,
        }
    }

    pub fn with_store(mut self, store: &'a ModelStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Load, filter and cluster. Any failure here halts the map.
    pub fn fit(&self, strategy: &dyn MapStrategy) -> AppResult<Fitted> {
        let loader = DataLoader::new(self.memo);
        let loaded = strategy.load(&loader)?;
        let loaded_len = loaded.len();
        let corpus = strategy.prefilter(loaded)?;
        let terms = strategy.term_source(&loader)?;

        let mut clusterer = TopicClusterer::new(
            strategy.n_topics(),
            &self.config.clustering,
            &self.config.layout,
            self.memo,
        );
        if let Some(store) = self.store {
            clusterer = clusterer.with_store(store);
        }
        let model = clusterer.fit(&corpus, terms.as_ref())?;
        Ok(Fitted {
            loaded: loaded_len,
            corpus,
            model,
        })
    }

    /// Attach `labels` on a best-effort basis and assemble the map.
    pub fn assemble(
        &self,
        strategy: &dyn MapStrategy,
        fitted: &Fitted,
        labels: BTreeMap<usize, String>,
    ) -> AppResult<(DataMap, RunSummary)> {
        let Fitted {
            loaded,
            corpus,
            model,
        } = fitted;
        let labels = TopicLabels::apply_best_effort(model, labels);

        let recomputed;
        let coords: &[[f64; 2]] = if model.layout.len() == corpus.len() {
            &model.layout
        } else {
            let layout = project::layout(corpus.embeddings(), &self.config.layout);
            recomputed = layout
                .rows()
                .into_iter()
                .map(|r| [r[0], r[1]])
                .collect::<Vec<_>>();
            &recomputed
        };
        let hover: Vec<String> = corpus
            .items()
            .iter()
            .map(|item| strategy.hover_text(item))
            .collect();
        let weights = corpus.weights();

        let map = DataMap::build(
            strategy.title(),
            MapLayers {
                coords,
                hover: &hover,
                weights: &weights,
                assignments: &model.assignments,
            },
            &labels,
            &self.config.map,
        )?;
        let summary = RunSummary {
            variant: strategy.name(),
            loaded: *loaded,
            kept: corpus.len(),
            n_topics: model.n_topics,
            realized: model.topics.len(),
            label_source: labels.source(),
        };
        Ok((map, summary))
    }

    /// The whole pipeline, writing the map to `output`.
    #[tracing::instrument(name = "Building topic map", level = "info", skip_all, fields(variant = strategy.name()))]
    pub fn run(&self, strategy: &dyn MapStrategy, output: &Path) -> AppResult<RunSummary> {
        let fitted = self.fit(strategy)?;
        let labels = synthesize_labels(&fitted.model);
        let (map, summary) = self.assemble(strategy, &fitted, labels)?;
        map.write(output)?;
        info!(
            variant = summary.variant,
            loaded = summary.loaded,
            kept = summary.kept,
            k = summary.n_topics,
            realized = summary.realized,
            labels = %summary.label_source,
            "Map complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;
    use crate::AppError;
    use crate::config::LayoutMethod;
    use crate::data::npy::tests::{f8_le, npy_bytes};
    use crate::error::ValidationError;

    fn write_npy(dir: &Path, name: &str, rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> PathBuf {
        let values: Vec<f64> = (0..rows * cols).map(|i| f(i / cols, i % cols)).collect();
        let path = dir.join(name);
        fs::write(&path, npy_bytes("<f8", false, &[rows, cols], &f8_le(&values))).unwrap();
        path
    }

    fn pca_config() -> AtlasConfig {
        let mut config = AtlasConfig::default();
        config.layout.method = LayoutMethod::Pca;
        config
    }

    /// 100 keywords; the first 20 have counts of 5 and above, the rest below 5.
    fn keyword_fixture(dir: &Path) -> KeywordsConfig {
        let embeddings = write_npy(dir, "kw.npy", 100, 4, |r, c| {
            ((r % 5) * 10) as f64 + ((r * 7 + c * 3) % 11) as f64 * 0.1
        });
        let mut table = String::from("item,count\n");
        for i in 0..100 {
            let count = if i < 20 { 5 + i } else { i % 5 };
            table.push_str(&format!("mot{i},{count}\n"));
        }
        let table_path = dir.join("kw.csv");
        fs::write(&table_path, table).unwrap();
        KeywordsConfig {
            embeddings,
            table: table_path,
            min_freq: 5,
            n_topics: 5,
        }
    }

    fn sentence_fixture(dir: &Path) -> SentencesConfig {
        let rows = [
            ("positif", "la piscine est superbe"),
            ("positif", "piscine chauffée et propre"),
            ("négatif", "la piscine était froide"),
            ("positif", "petit déjeuner copieux"),
            ("négatif", "déjeuner trop cher"),
            ("positif", "petit déjeuner varié et frais"),
            ("négatif", "chambre bruyante la nuit"),
            ("négatif", "chambre sale et bruyante"),
            ("positif", "chambre spacieuse"),
        ];
        let mut table = String::from("sentiment\ttext\n");
        for (sentiment, text) in rows {
            table.push_str(&format!("{sentiment}\t{text}\n"));
        }
        let table_path = dir.join("s.tsv");
        fs::write(&table_path, table).unwrap();
        let stopwords = dir.join("stopwords.txt");
        fs::write(&stopwords, "# articles\nla\nle\net\n\nest\n").unwrap();
        SentencesConfig {
            embeddings: write_npy(dir, "s.npy", rows.len(), 3, |r, c| {
                ((r / 3) * 5) as f64 + ((r + c) % 3) as f64 * 0.2
            }),
            table: table_path,
            stopwords,
            n_topics: 3,
            top_n_words: 10,
        }
    }

    #[test]
    fn keyword_scenario_is_filtered_partitioned_and_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let config = pca_config();
        let strategy = KeywordStrategy {
            config: keyword_fixture(dir.path()),
        };

        let memo = Memo::default();
        let fitted = Pipeline::new(&config, &memo).fit(&strategy).unwrap();
        assert_eq!(fitted.loaded, 100);
        assert_eq!(fitted.corpus.len(), 20);
        assert!(fitted.corpus.items().iter().all(|i| i.weight >= 5));
        assert_eq!(fitted.model.assignments.len(), 20);
        assert!(fitted.model.assignments.iter().all(|&t| t < 5));

        let labels = synthesize_labels(&fitted.model);
        assert!(labels.len() <= 5);
        assert!(labels.values().all(|l| l.split(' ').count() <= 3));

        let fresh = Memo::default();
        let again = Pipeline::new(&config, &fresh).fit(&strategy).unwrap();
        assert_eq!(fitted.model.assignments, again.model.assignments);
    }

    #[test]
    fn missing_sentiment_column_stops_before_clustering() {
        let dir = tempfile::tempdir().unwrap();
        let mut sentences = sentence_fixture(dir.path());
        let table = dir.path().join("bad.tsv");
        fs::write(&table, "polarity\ttext\npositif\tsuper\n").unwrap();
        sentences.table = table;

        let config = pca_config();
        let memo = Memo::default();
        let err = Pipeline::new(&config, &memo)
            .fit(&SentenceStrategy { config: sentences })
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::DataValidation(ValidationError::MissingColumns { .. })
        ));
        assert_eq!(memo.stats().misses, 1);
    }

    #[test]
    fn too_many_topics_for_the_filtered_items() {
        let dir = tempfile::tempdir().unwrap();
        let mut keywords = keyword_fixture(dir.path());
        keywords.min_freq = 22;
        keywords.n_topics = 10;

        let config = pca_config();
        let memo = Memo::default();
        let err = Pipeline::new(&config, &memo)
            .fit(&KeywordStrategy { config: keywords })
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)), "{err}");
    }

    #[test]
    fn threshold_above_every_count_is_an_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        let mut keywords = keyword_fixture(dir.path());
        keywords.min_freq = 1000;

        let config = pca_config();
        let memo = Memo::default();
        let err = Pipeline::new(&config, &memo)
            .fit(&KeywordStrategy { config: keywords })
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyResult { threshold: 1000 }));
    }

    #[test]
    fn incompatible_labels_fall_back_to_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let config = pca_config();
        let strategy = KeywordStrategy {
            config: keyword_fixture(dir.path()),
        };
        let memo = Memo::default();
        let pipeline = Pipeline::new(&config, &memo);
        let fitted = pipeline.fit(&strategy).unwrap();

        let bogus = BTreeMap::from([(0, "fine".to_string()), (42, "ghost".to_string())]);
        let (map, summary) = pipeline.assemble(&strategy, &fitted, bogus).unwrap();
        assert_eq!(summary.label_source, LabelSource::Default);
        for label in &map.labels {
            assert_eq!(label.text, label.topic.to_string());
        }
        assert_eq!(map.points.len(), 20);
    }

    #[test]
    fn sentence_map_is_written_with_sentiment_hover() {
        let dir = tempfile::tempdir().unwrap();
        let config = pca_config();
        let strategy = SentenceStrategy {
            config: sentence_fixture(dir.path()),
        };
        let memo = Memo::default();
        let output = dir.path().join(strategy.default_output());
        let summary = Pipeline::new(&config, &memo)
            .run(&strategy, &output)
            .unwrap();
        assert_eq!(summary.loaded, 9);
        assert_eq!(summary.kept, 9);
        assert_eq!(summary.n_topics, 3);
        assert_eq!(summary.label_source, LabelSource::Synthesized);

        let html = fs::read_to_string(&output).unwrap();
        assert!(html.contains("🙂 la piscine est superbe"));
        assert!(html.contains("☹️ chambre sale et bruyante"));
    }

    #[test]
    fn maps_share_one_memo() {
        let dir = tempfile::tempdir().unwrap();
        let config = pca_config();
        let strategy = KeywordStrategy {
            config: keyword_fixture(dir.path()),
        };
        let memo = Memo::default();
        let pipeline = Pipeline::new(&config, &memo);
        let a = pipeline.fit(&strategy).unwrap();
        let b = pipeline.fit(&strategy).unwrap();
        assert!(Rc::ptr_eq(&a.model, &b.model));
        assert!(memo.stats().hits >= 2);
    }
}
