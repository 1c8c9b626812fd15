pub mod npy;
pub mod stopwords;
pub mod table;

use std::path::Path;
use std::rc::Rc;
use std::time::UNIX_EPOCH;

use ndarray::{Array2, Axis};
use tracing::{debug, info};

use crate::cache::{Fingerprinter, Memo, Stage};
use crate::error::ValidationError;
use crate::{AppResult, text};

pub use stopwords::StopWords;
pub use table::Table;

/// Polarity tag attached to review sentences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    /// Accepts the French and English spellings used by the annotation export.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "positif" | "positive" | "pos" => Some(Self::Positive),
            "négatif" | "negatif" | "negative" | "neg" => Some(Self::Negative),
            _ => None,
        }
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Self::Positive => "🙂",
            Self::Negative => "☹️",
        }
    }
}

/// One keyword or review sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub text: String,
    /// Frequency for keywords, word count for sentences
    pub weight: u64,
    pub sentiment: Option<Sentiment>,
}

impl Item {
    pub fn keyword<S: Into<String>>(text: S, count: u64) -> Self {
        Self {
            text: text.into(),
            weight: count,
            sentiment: None,
        }
    }

    pub fn sentence<S: Into<String>>(text: S, sentiment: Sentiment) -> Self {
        let text = text.into();
        Self {
            weight: text::word_count(&text),
            text,
            sentiment: Some(sentiment),
        }
    }
}

/// Items and their embeddings, row-aligned.
#[derive(Debug, Clone)]
pub struct Corpus {
    items: Vec<Item>,
    embeddings: Array2<f64>,
}

impl Corpus {
    pub fn new(items: Vec<Item>, embeddings: Array2<f64>) -> Result<Self, ValidationError> {
        if items.len() != embeddings.nrows() {
            return Err(ValidationError::ShapeMismatch {
                embeddings: embeddings.nrows(),
                rows: items.len(),
            });
        }
        Ok(Self { items, embeddings })
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn embeddings(&self) -> &Array2<f64> {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn dim(&self) -> usize {
        self.embeddings.ncols()
    }

    /// Keep the given rows, in the given order, from both items and embeddings.
    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            items: indices.iter().map(|&i| self.items[i].clone()).collect(),
            embeddings: self.embeddings.select(Axis(0), indices),
        }
    }

    pub fn weights(&self) -> Vec<u64> {
        self.items.iter().map(|item| item.weight).collect()
    }

    /// Feed everything a fitted model depends on into `fp`.
    pub fn fingerprint_into(&self, fp: &mut Fingerprinter) {
        fp.usize(self.items.len());
        for item in &self.items {
            fp.str(&item.text).u64(item.weight);
            fp.u64(match item.sentiment {
                None => 0,
                Some(Sentiment::Positive) => 1,
                Some(Sentiment::Negative) => 2,
            });
        }
        let (rows, cols) = self.embeddings.dim();
        fp.usize(rows).usize(cols).f64s(self.embeddings.iter());
    }
}

/// Memoized file loading; every load is keyed on the file identities.
pub struct DataLoader<'m> {
    memo: &'m Memo,
}

impl<'m> DataLoader<'m> {
    pub fn new(memo: &'m Memo) -> Self {
        Self { memo }
    }

    /// Load `item`/`count` rows from a comma-separated table.
    #[tracing::instrument(name = "Loading keywords", level = "info", skip(self))]
    pub fn keywords(&self, embeddings: &Path, table: &Path) -> AppResult<Rc<Corpus>> {
        let mut fp = Fingerprinter::new("load/keywords");
        file_identity(&mut fp, embeddings)?;
        file_identity(&mut fp, table)?;
        self.memo
            .get_or_try_insert_with(Stage::Load, fp.finish(), || {
                let matrix = npy::read_matrix(embeddings)?;
                let table = Table::read(table, b',')?;
                let columns = table.require(["item", "count"])?;
                let mut items = Vec::with_capacity(table.len());
                for (line, [item, count]) in table.rows(columns) {
                    let count =
                        table::parse_count(count).ok_or_else(|| table.invalid(line, "count", count))?;
                    items.push(Item::keyword(item, count));
                }
                let corpus = Corpus::new(items, matrix)?;
                info!(items = corpus.len(), dim = corpus.dim(), "Loaded keywords");
                Ok(corpus)
            })
    }

    /// Load `sentiment`/`text` rows from a tab-separated table.
    #[tracing::instrument(name = "Loading sentences", level = "info", skip(self))]
    pub fn sentences(&self, embeddings: &Path, table: &Path) -> AppResult<Rc<Corpus>> {
        let mut fp = Fingerprinter::new("load/sentences");
        file_identity(&mut fp, embeddings)?;
        file_identity(&mut fp, table)?;
        self.memo
            .get_or_try_insert_with(Stage::Load, fp.finish(), || {
                let matrix = npy::read_matrix(embeddings)?;
                let table = Table::read(table, b'\t')?;
                let columns = table.require(["sentiment", "text"])?;
                let mut items = Vec::with_capacity(table.len());
                for (line, [sentiment, text]) in table.rows(columns) {
                    let sentiment = Sentiment::parse(sentiment)
                        .ok_or_else(|| table.invalid(line, "sentiment", sentiment))?;
                    items.push(Item::sentence(text, sentiment));
                }
                let corpus = Corpus::new(items, matrix)?;
                info!(items = corpus.len(), dim = corpus.dim(), "Loaded sentences");
                Ok(corpus)
            })
    }

    #[tracing::instrument(name = "Loading stopwords", level = "debug", skip(self))]
    pub fn stopwords(&self, path: &Path) -> AppResult<Rc<StopWords>> {
        let mut fp = Fingerprinter::new("load/stopwords");
        file_identity(&mut fp, path)?;
        self.memo
            .get_or_try_insert_with(Stage::Load, fp.finish(), || Ok(StopWords::load(path)?))
    }
}

/// Path, size and modification time; a rewritten file gets a new identity.
fn file_identity(fp: &mut Fingerprinter, path: &Path) -> Result<(), ValidationError> {
    let meta = std::fs::metadata(path).map_err(|source| ValidationError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos() as u64);
    debug!(path = %path.display(), len = meta.len(), modified, "Input file identity");
    fp.str(&path.to_string_lossy()).u64(meta.len()).u64(modified);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::Duration;

    use ndarray::array;

    use super::npy::tests::{f8_le, npy_bytes};
    use super::*;
    use crate::AppError;

    fn write_npy(dir: &Path, name: &str, rows: usize, cols: usize) -> std::path::PathBuf {
        let values: Vec<f64> = (0..rows * cols).map(|v| v as f64).collect();
        let path = dir.join(name);
        fs::write(&path, npy_bytes("<f8", false, &[rows, cols], &f8_le(&values))).unwrap();
        path
    }

    #[test]
    fn sentiment_accepts_both_languages() {
        assert_eq!(Sentiment::parse("positif"), Some(Sentiment::Positive));
        assert_eq!(Sentiment::parse(" NÉGATIF "), Some(Sentiment::Negative));
        assert_eq!(Sentiment::parse("neg"), Some(Sentiment::Negative));
        assert_eq!(Sentiment::parse("neutre"), None);
    }

    #[test]
    fn corpus_rejects_misaligned_rows() {
        let err = Corpus::new(vec![Item::keyword("a", 1)], array![[0.0], [1.0]]).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ShapeMismatch { embeddings: 2, rows: 1 }
        ));
    }

    #[test]
    fn select_keeps_items_and_rows_aligned() {
        let corpus = Corpus::new(
            vec![Item::keyword("a", 1), Item::keyword("b", 2), Item::keyword("c", 3)],
            array![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]],
        )
        .unwrap();
        let picked = corpus.select(&[2, 0]);
        assert_eq!(picked.items()[0].text, "c");
        assert_eq!(picked.embeddings(), &array![[2.0, 2.0], [0.0, 0.0]]);
    }

    #[test]
    fn sentence_weight_is_word_count() {
        let item = Item::sentence("le petit déjeuner était froid", Sentiment::Negative);
        assert_eq!(item.weight, 5);
    }

    #[test]
    fn loads_keywords_and_memoizes() {
        let dir = tempfile::tempdir().unwrap();
        let emb = write_npy(dir.path(), "kw.npy", 2, 3);
        let table = dir.path().join("kw.csv");
        fs::write(&table, "item,count\nchambre,12\npiscine,3\n").unwrap();

        let memo = Memo::default();
        let loader = DataLoader::new(&memo);
        let first = loader.keywords(&emb, &table).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.items()[0], Item::keyword("chambre", 12));
        let second = loader.keywords(&emb, &table).unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn rewritten_table_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let emb = write_npy(dir.path(), "kw.npy", 2, 1);
        let table = dir.path().join("kw.csv");
        fs::write(&table, "item,count\nchambre,12\npiscine,3\n").unwrap();

        let memo = Memo::default();
        let loader = DataLoader::new(&memo);
        let first = loader.keywords(&emb, &table).unwrap();

        fs::write(&table, "item,count\nchambre,120\npiscine,30\n").unwrap();
        let second = loader.keywords(&emb, &table).unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(second.weights(), vec![120, 30]);

        let unchanged = loader.keywords(&emb, &table).unwrap();
        assert!(Rc::ptr_eq(&second, &unchanged));
        assert_eq!(memo.stats().hits, 1);
    }

    #[test]
    fn same_length_rewrite_with_new_mtime_is_reloaded() {
        let dir = tempfile::tempdir().unwrap();
        let emb = write_npy(dir.path(), "kw.npy", 1, 1);
        let table = dir.path().join("kw.csv");
        fs::write(&table, "item,count\nchambre,12\n").unwrap();

        let memo = Memo::default();
        let loader = DataLoader::new(&memo);
        let first = loader.keywords(&emb, &table).unwrap();

        fs::write(&table, "item,count\nchambre,21\n").unwrap();
        let later = fs::metadata(&table).unwrap().modified().unwrap() + Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&table)
            .unwrap()
            .set_modified(later)
            .unwrap();
        let second = loader.keywords(&emb, &table).unwrap();
        assert!(!Rc::ptr_eq(&first, &second));
        assert_eq!(second.weights(), vec![21]);
    }

    #[test]
    fn missing_sentiment_column_is_a_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let emb = write_npy(dir.path(), "s.npy", 1, 2);
        let table = dir.path().join("s.tsv");
        fs::write(&table, "label\ttext\npositif\tsuper séjour\n").unwrap();

        let memo = Memo::default();
        let err = DataLoader::new(&memo).sentences(&emb, &table).unwrap_err();
        match err {
            AppError::DataValidation(ValidationError::MissingColumns { columns, .. }) => {
                assert_eq!(columns, vec!["sentiment".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(memo.len(), 0);
    }

    #[test]
    fn row_count_mismatch_and_bad_counts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let emb = write_npy(dir.path(), "kw.npy", 3, 2);
        let table = dir.path().join("kw.csv");
        fs::write(&table, "item,count\na,1\nb,2\n").unwrap();
        let memo = Memo::default();
        let loader = DataLoader::new(&memo);
        assert!(matches!(
            loader.keywords(&emb, &table),
            Err(AppError::DataValidation(ValidationError::ShapeMismatch { .. }))
        ));

        let bad = dir.path().join("bad.csv");
        fs::write(&bad, "item,count\na,1\nb,lots\nc,3\n").unwrap();
        assert!(matches!(
            loader.keywords(&emb, &bad),
            Err(AppError::DataValidation(ValidationError::InvalidValue { line: 3, .. }))
        ));
    }
}
