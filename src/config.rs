use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{AppError, AppResult};

/// Top-level configuration for both map variants.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AtlasConfig {
    #[serde(default)]
    pub keywords: KeywordsConfig,
    #[serde(default)]
    pub sentences: SentencesConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub layout: LayoutConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Keyword map inputs and parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KeywordsConfig {
    #[serde(default = "default_keyword_embeddings")]
    pub embeddings: PathBuf,
    #[serde(default = "default_keyword_table")]
    pub table: PathBuf,
    /// Keywords with a count below this are dropped before clustering
    #[serde(default = "default_min_freq")]
    pub min_freq: u64,
    #[serde(default = "default_n_topics")]
    pub n_topics: usize,
}

impl Default for KeywordsConfig {
    fn default() -> Self {
        Self {
            embeddings: default_keyword_embeddings(),
            table: default_keyword_table(),
            min_freq: default_min_freq(),
            n_topics: default_n_topics(),
        }
    }
}

fn default_keyword_embeddings() -> PathBuf {
    PathBuf::from("public/keywords_embeddings.npy")
}
fn default_keyword_table() -> PathBuf {
    PathBuf::from("public/keywords.csv")
}
fn default_min_freq() -> u64 {
    5
}
fn default_n_topics() -> usize {
    30
}

/// Review sentence map inputs and parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SentencesConfig {
    #[serde(default = "default_sentence_embeddings")]
    pub embeddings: PathBuf,
    #[serde(default = "default_sentence_table")]
    pub table: PathBuf,
    #[serde(default = "default_stopwords")]
    pub stopwords: PathBuf,
    #[serde(default = "default_n_topics")]
    pub n_topics: usize,
    /// Number of c-TF-IDF terms kept per topic before label synthesis
    #[serde(default = "default_top_n_words")]
    pub top_n_words: usize,
}

impl Default for SentencesConfig {
    fn default() -> Self {
        Self {
            embeddings: default_sentence_embeddings(),
            table: default_sentence_table(),
            stopwords: default_stopwords(),
            n_topics: default_n_topics(),
            top_n_words: default_top_n_words(),
        }
    }
}

fn default_sentence_embeddings() -> PathBuf {
    PathBuf::from("public/sentences_embeddings.npy")
}
fn default_sentence_table() -> PathBuf {
    PathBuf::from("public/sentences.tsv")
}
fn default_stopwords() -> PathBuf {
    PathBuf::from("stopwords.txt")
}
fn default_top_n_words() -> usize {
    10
}

/// K-means parameters shared by both variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ClusteringConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of k-means++ restarts; the lowest inertia wins
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            n_init: default_n_init(),
            max_iter: default_max_iter(),
            tolerance: default_tolerance(),
        }
    }
}

fn default_seed() -> u64 {
    42
}
fn default_n_init() -> usize {
    1
}
fn default_max_iter() -> usize {
    300
}
fn default_tolerance() -> f64 {
    1e-4
}

/// How embeddings are reduced to the 2D map plane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LayoutMethod {
    /// Neighbourhood-preserving t-SNE, initialised from PCA
    Tsne,
    /// Linear projection on the two leading principal components
    Pca,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LayoutConfig {
    #[serde(default = "default_layout_method")]
    pub method: LayoutMethod,
    #[serde(default = "default_perplexity")]
    pub perplexity: f64,
    #[serde(default = "default_layout_iterations")]
    pub iterations: usize,
    /// Exact t-SNE is quadratic; larger inputs fall back to PCA
    #[serde(default = "default_max_tsne_points")]
    pub max_tsne_points: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            method: default_layout_method(),
            perplexity: default_perplexity(),
            iterations: default_layout_iterations(),
            max_tsne_points: default_max_tsne_points(),
        }
    }
}

fn default_layout_method() -> LayoutMethod {
    LayoutMethod::Tsne
}
fn default_perplexity() -> f64 {
    30.0
}
fn default_layout_iterations() -> usize {
    500
}
fn default_max_tsne_points() -> usize {
    4000
}

/// Visual constants of the rendered map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MapConfig {
    #[serde(default = "default_min_fontsize")]
    pub min_fontsize: f64,
    #[serde(default = "default_max_fontsize")]
    pub max_fontsize: f64,
    #[serde(default = "default_radius_min")]
    pub point_radius_min_pixels: f64,
    #[serde(default = "default_radius_max")]
    pub point_radius_max_pixels: f64,
    /// Fraction of the data extent visible in the initial view
    #[serde(default = "default_initial_zoom_fraction")]
    pub initial_zoom_fraction: f64,
    #[serde(default = "default_true")]
    pub enable_search: bool,
    /// Height of the map frame in CSS pixels
    #[serde(default = "default_height")]
    pub height: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            min_fontsize: default_min_fontsize(),
            max_fontsize: default_max_fontsize(),
            point_radius_min_pixels: default_radius_min(),
            point_radius_max_pixels: default_radius_max(),
            initial_zoom_fraction: default_initial_zoom_fraction(),
            enable_search: default_true(),
            height: default_height(),
        }
    }
}

fn default_min_fontsize() -> f64 {
    12.0
}
fn default_max_fontsize() -> f64 {
    18.0
}
fn default_radius_min() -> f64 {
    4.0
}
fn default_radius_max() -> f64 {
    40.0
}
fn default_initial_zoom_fraction() -> f64 {
    0.4
}
fn default_true() -> bool {
    true
}
fn default_height() -> u32 {
    700
}

/// Memoization and persisted model settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// How long loaded input files stay memoized, e.g. `24h`
    #[serde(default = "default_load_ttl")]
    pub load_ttl: String,
    /// Keep fitted topic models on disk between runs
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Where persisted models live; defaults to the XDG cache dir
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            load_ttl: default_load_ttl(),
            persist: default_true(),
            dir: None,
        }
    }
}

fn default_load_ttl() -> String {
    "24h".to_string()
}

impl CacheConfig {
    pub fn load_ttl(&self) -> AppResult<Duration> {
        Ok(humantime::parse_duration(&self.load_ttl)?)
    }

    /// Directory for persisted topic models.
    pub fn model_dir(&self) -> AppResult<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(topic_atlas_dirs::DirType::Cache.subdir("models")?),
        }
    }
}

impl AtlasConfig {
    /// Read a TOML file; keys not present keep their defaults.
    #[tracing::instrument(name = "Reading configuration", level = "debug")]
    pub fn from_file<P: AsRef<Path> + std::fmt::Debug>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: AtlasConfig =
            serde_path_to_error::deserialize(toml::Deserializer::new(&text)).map_err(|source| {
                AppError::Toml {
                    path: path.to_path_buf(),
                    source,
                }
            })?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Check the constraints that do not depend on the data.
    pub fn validate(&self) -> AppResult<()> {
        for (name, k) in [
            ("keywords.n_topics", self.keywords.n_topics),
            ("sentences.n_topics", self.sentences.n_topics),
        ] {
            if k < 2 {
                return Err(AppError::Configuration(format!(
                    "{name} must be at least 2, got {k}"
                )));
            }
        }
        if self.sentences.top_n_words == 0 {
            return Err(AppError::Configuration(
                "sentences.top_n_words must be at least 1".into(),
            ));
        }
        if self.clustering.n_init == 0 || self.clustering.max_iter == 0 {
            return Err(AppError::Configuration(
                "clustering.n_init and clustering.max_iter must be at least 1".into(),
            ));
        }
        if !(self.clustering.tolerance >= 0.0) {
            return Err(AppError::Configuration(
                "clustering.tolerance must be a non-negative number".into(),
            ));
        }
        if !(self.layout.perplexity > 0.0) {
            return Err(AppError::Configuration(
                "layout.perplexity must be positive".into(),
            ));
        }
        check_bounds(
            "map.point_radius_min_pixels",
            self.map.point_radius_min_pixels,
            "map.point_radius_max_pixels",
            self.map.point_radius_max_pixels,
        )?;
        check_bounds(
            "map.min_fontsize",
            self.map.min_fontsize,
            "map.max_fontsize",
            self.map.max_fontsize,
        )?;
        let zoom = self.map.initial_zoom_fraction;
        if !(zoom > 0.0 && zoom <= 1.0) {
            return Err(AppError::Configuration(format!(
                "map.initial_zoom_fraction must be within (0, 1], got {zoom}"
            )));
        }
        self.cache.load_ttl().map_err(|e| {
            AppError::Configuration(format!("cache.load_ttl {:?}: {e}", self.cache.load_ttl))
        })?;
        Ok(())
    }
}

fn check_bounds(min_name: &str, min: f64, max_name: &str, max: f64) -> AppResult<()> {
    if !(min > 0.0 && min.is_finite() && max.is_finite()) {
        return Err(AppError::Configuration(format!(
            "{min_name} and {max_name} must be positive numbers"
        )));
    }
    if min > max {
        return Err(AppError::Configuration(format!(
            "{min_name} ({min}) must not exceed {max_name} ({max})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_match_dashboard_constants() {
        let config = AtlasConfig::default();
        assert_eq!(config.keywords.min_freq, 5);
        assert_eq!(config.keywords.n_topics, 30);
        assert_eq!(config.sentences.n_topics, 30);
        assert_eq!(config.clustering.seed, 42);
        assert_eq!(config.map.point_radius_min_pixels, 4.0);
        assert_eq!(config.map.point_radius_max_pixels, 40.0);
        assert_eq!(config.map.min_fontsize, 12.0);
        assert_eq!(config.map.max_fontsize, 18.0);
        assert!((config.map.initial_zoom_fraction - 0.4).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[keywords]\nmin_freq = 2\n\n[map]\nmax_fontsize = 24.0").unwrap();

        let config = AtlasConfig::from_file(file.path()).unwrap();
        assert_eq!(config.keywords.min_freq, 2);
        assert_eq!(config.keywords.n_topics, 30);
        assert_eq!(config.map.max_fontsize, 24.0);
        assert_eq!(config.map.min_fontsize, 12.0);
    }

    #[test]
    fn unknown_key_reports_its_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[map]\nradius = 3").unwrap();

        let err = AtlasConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, AppError::Toml { .. }));
        assert!(err.to_string().contains("map"), "{err}");
    }

    #[test]
    fn validate_rejects_inverted_bounds() {
        let mut config = AtlasConfig::default();
        config.map.point_radius_min_pixels = 50.0;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));

        let mut config = AtlasConfig::default();
        config.map.min_fontsize = 20.0;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn validate_rejects_small_k_and_bad_zoom() {
        let mut config = AtlasConfig::default();
        config.keywords.n_topics = 1;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));

        let mut config = AtlasConfig::default();
        config.map.initial_zoom_fraction = 0.0;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn load_ttl_is_parsed_with_humantime() {
        let mut config = CacheConfig::default();
        assert_eq!(config.load_ttl().unwrap(), Duration::from_secs(24 * 3600));
        config.load_ttl = "soon".into();
        assert!(config.load_ttl().is_err());
    }
}
