use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use tracing::trace;

use crate::cluster::traits::TermSource;
use crate::data::{Item, StopWords};
use crate::text;

/// `(term, score)` pairs, best first.
pub type TermScores = Vec<(String, f64)>;

fn members_by_topic<'a>(items: &'a [Item], labels: &[usize]) -> BTreeMap<usize, Vec<&'a Item>> {
    let mut grouped: BTreeMap<usize, Vec<&Item>> = BTreeMap::new();
    for (item, &label) in items.iter().zip(labels) {
        grouped.entry(label).or_default().push(item);
    }
    grouped
}

/// Sort best first; equal scores keep their current relative order.
pub fn rank_stable(terms: &mut TermScores) {
    terms.sort_by(|a, b| b.1.total_cmp(&a.1));
}

/// Keyword topics: the member keywords themselves, scored by their counts.
///
/// A keyword listed twice in one topic keeps its first position and takes the
/// later count.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordCounts;

impl TermSource for KeywordCounts {
    fn id(&self) -> String {
        "keyword-counts".to_string()
    }

    fn rank_terms(&self, items: &[Item], labels: &[usize]) -> Vec<(usize, TermScores)> {
        members_by_topic(items, labels)
            .into_iter()
            .map(|(topic, members)| {
                let mut position: HashMap<&str, usize> = HashMap::new();
                let mut terms: TermScores = Vec::new();
                for item in members {
                    match position.get(item.text.as_str()) {
                        Some(&idx) => terms[idx].1 = item.weight as f64,
                        None => {
                            position.insert(item.text.as_str(), terms.len());
                            terms.push((item.text.clone(), item.weight as f64));
                        }
                    }
                }
                rank_stable(&mut terms);
                (topic, terms)
            })
            .collect()
    }
}

/// Class-based TF-IDF over the member sentences of each topic.
///
/// Each topic is one pseudo-document. A term scores
/// `tf / Σtf · ln(1 + A / f)` where `A` is the mean token count per topic
/// (truncated) and `f` the term's frequency over all topics.
#[derive(Debug, Clone)]
pub struct ClassTfIdf {
    stopwords: Rc<StopWords>,
    top_n_words: usize,
}

impl ClassTfIdf {
    pub fn new(stopwords: Rc<StopWords>, top_n_words: usize) -> Self {
        Self {
            stopwords,
            top_n_words,
        }
    }

    fn count_tokens(&self, members: &[&Item]) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for item in members {
            let folded = text::fold(&item.text);
            for token in text::tokenize(&folded) {
                if self.stopwords.contains_folded(token) {
                    continue;
                }
                *counts.entry(token.to_string()).or_insert(0) += 1;
            }
        }
        counts
    }
}

impl TermSource for ClassTfIdf {
    fn id(&self) -> String {
        format!(
            "c-tf-idf/top{}/stopwords-{}",
            self.top_n_words,
            self.stopwords.fingerprint()
        )
    }

    fn rank_terms(&self, items: &[Item], labels: &[usize]) -> Vec<(usize, TermScores)> {
        let counts: Vec<(usize, BTreeMap<String, u64>)> = members_by_topic(items, labels)
            .into_iter()
            .map(|(topic, members)| (topic, self.count_tokens(&members)))
            .collect();
        if counts.is_empty() {
            return Vec::new();
        }

        let mut frequency: HashMap<&str, u64> = HashMap::new();
        let mut total_tokens = 0u64;
        for (_, topic_counts) in &counts {
            for (term, &n) in topic_counts {
                *frequency.entry(term.as_str()).or_insert(0) += n;
                total_tokens += n;
            }
        }
        let avg_tokens = (total_tokens / counts.len() as u64) as f64;
        trace!(vocabulary = frequency.len(), avg_tokens, "c-TF-IDF statistics");

        counts
            .iter()
            .map(|(topic, topic_counts)| {
                let topic_total: u64 = topic_counts.values().sum();
                let mut terms: TermScores = topic_counts
                    .iter()
                    .filter_map(|(term, &n)| {
                        let f = *frequency.get(term.as_str())? as f64;
                        let tf = n as f64 / topic_total as f64;
                        let score = tf * (avg_tokens / f + 1.0).ln();
                        (score > 0.0).then(|| (term.clone(), score))
                    })
                    .collect();
                // Vocabulary order breaks ties.
                rank_stable(&mut terms);
                terms.truncate(self.top_n_words);
                terms.retain(|(term, _)| !self.stopwords.contains(term));
                (*topic, terms)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Sentiment;

    fn kw(items: &[(&str, u64)]) -> Vec<Item> {
        items.iter().map(|(t, c)| Item::keyword(*t, *c)).collect()
    }

    fn sentences(texts: &[&str]) -> Vec<Item> {
        texts
            .iter()
            .map(|t| Item::sentence(*t, Sentiment::Positive))
            .collect()
    }

    #[test]
    fn keyword_terms_are_ranked_by_count() {
        let items = kw(&[("vue", 3), ("lit", 9), ("spa", 5), ("bar", 9)]);
        let ranked = KeywordCounts.rank_terms(&items, &[0, 0, 1, 0]);
        assert_eq!(ranked.len(), 2);
        let (topic, terms) = &ranked[0];
        assert_eq!(*topic, 0);
        let words: Vec<&str> = terms.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["lit", "bar", "vue"]);
        assert_eq!(ranked[1].1, vec![("spa".to_string(), 5.0)]);
    }

    #[test]
    fn repeated_keyword_keeps_first_position_and_last_count() {
        let items = kw(&[("calme", 4), ("vue", 4), ("calme", 2), ("spa", 4)]);
        let ranked = KeywordCounts.rank_terms(&items, &[0, 0, 0, 0]);
        let terms = &ranked[0].1;
        assert_eq!(
            terms,
            &vec![
                ("vue".to_string(), 4.0),
                ("spa".to_string(), 4.0),
                ("calme".to_string(), 2.0)
            ]
        );
    }

    #[test]
    fn topics_without_members_are_absent() {
        let items = kw(&[("a", 1), ("b", 1)]);
        let ranked = KeywordCounts.rank_terms(&items, &[2, 2]);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].0, 2);
    }

    #[test]
    fn ctfidf_prefers_distinctive_terms() {
        let stop = Rc::new(StopWords::parse("le\nla\net\ntrès\n"));
        let items = sentences(&[
            "La piscine était chaude",
            "Piscine et spa très propres",
            "Le petit déjeuner était froid",
            "Petit déjeuner copieux",
        ]);
        let source = ClassTfIdf::new(stop, 10);
        let ranked = source.rank_terms(&items, &[0, 0, 1, 1]);
        assert_eq!(ranked.len(), 2);

        let first: Vec<&str> = ranked[0].1.iter().map(|(w, _)| w.as_str()).collect();
        let second: Vec<&str> = ranked[1].1.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(first[0], "piscine");
        assert!(second[..2].contains(&"petit") && second[..2].contains(&"dejeuner"));
        // Accent-folded stopwords never surface.
        assert!(!first.contains(&"tres") && !first.contains(&"la"));
        // Tokens shorter than two characters are ignored entirely.
        assert!(ranked.iter().all(|(_, t)| t.iter().all(|(w, _)| w.len() >= 2)));
    }

    #[test]
    fn ctfidf_scores_follow_the_formula() {
        let stop = Rc::new(StopWords::parse(""));
        let items = sentences(&["aa aa bb", "bb cc"]);
        let ranked = ClassTfIdf::new(stop, 10).rank_terms(&items, &[0, 1]);
        // totals: aa=2, bb=2, cc=1; A = 5 / 2 = 2
        let (_, t0) = &ranked[0];
        let aa = (2.0 / 3.0) * (2.0f64 / 2.0 + 1.0).ln();
        let bb = (1.0 / 3.0) * (2.0f64 / 2.0 + 1.0).ln();
        assert_eq!(t0[0].0, "aa");
        assert!((t0[0].1 - aa).abs() < 1e-12);
        assert!((t0[1].1 - bb).abs() < 1e-12);
        let (_, t1) = &ranked[1];
        assert_eq!(t1[0].0, "cc");
        assert!((t1[0].1 - 0.5 * (2.0f64 + 1.0).ln()).abs() < 1e-12);
    }

    #[test]
    fn ctfidf_truncates_and_breaks_ties_alphabetically() {
        let stop = Rc::new(StopWords::parse(""));
        let items = sentences(&["zz yy xx ww"]);
        let ranked = ClassTfIdf::new(stop, 3).rank_terms(&items, &[0]);
        let words: Vec<&str> = ranked[0].1.iter().map(|(w, _)| w.as_str()).collect();
        assert_eq!(words, vec!["ww", "xx", "yy"]);
    }

    #[test]
    fn plain_stopwords_match_accented_text() {
        let stop = Rc::new(StopWords::from_entries(vec!["hotel".to_string()]));
        let items = sentences(&["Hôtel calme", "bruit rue"]);
        let ranked = ClassTfIdf::new(stop, 10).rank_terms(&items, &[0, 1]);
        assert!(ranked[0].1.iter().all(|(w, _)| w != "hotel"));
    }
}
