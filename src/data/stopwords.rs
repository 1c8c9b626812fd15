use std::collections::HashSet;
use std::path::Path;

use tracing::debug;

use crate::cache::{Fingerprint, Fingerprinter};
use crate::error::ValidationError;
use crate::text;

/// Punctuation excluded from topic terms alongside the stopword list.
///
/// ASCII punctuation except the apostrophe, plus typographic marks common in
/// French reviews.
const PUNCTUATION: &str = "!\"#$%&()*+,-./:;<=>?@[\\]^_`{|}~…¨“”’´";

/// Words that never count as topic terms.
///
/// Holds both the raw entries, used to filter extracted terms, and their
/// accent-folded forms, used to drop tokens before scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopWords {
    raw: HashSet<String>,
    folded: HashSet<String>,
}

impl StopWords {
    pub fn load(path: &Path) -> Result<Self, ValidationError> {
        let text = std::fs::read_to_string(path).map_err(|source| ValidationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let words = Self::parse(&text);
        debug!(path = %path.display(), entries = words.len(), "Loaded stopwords");
        Ok(words)
    }

    /// One entry per line; blank lines and lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter(|line| !line.starts_with('#'))
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string);
        Self::from_entries(entries)
    }

    pub fn from_entries<I: IntoIterator<Item = String>>(entries: I) -> Self {
        let raw: HashSet<String> = entries
            .into_iter()
            .chain(PUNCTUATION.chars().map(String::from))
            .collect();
        let folded = raw
            .iter()
            .map(|w| text::fold(w))
            .filter(|w| !w.is_empty())
            .collect();
        Self { raw, folded }
    }

    /// Exact match against the list as written.
    pub fn contains(&self, term: &str) -> bool {
        self.raw.contains(term)
    }

    /// Match against the accent-folded, lowercased list.
    pub fn contains_folded(&self, token: &str) -> bool {
        self.folded.contains(token)
    }

    /// Order-independent digest of the list.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut entries: Vec<&String> = self.raw.iter().collect();
        entries.sort();
        let mut fp = Fingerprinter::new("stopwords");
        for entry in entries {
            fp.str(entry);
        }
        fp.finish()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }
}
