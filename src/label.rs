use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Display;

use thiserror::Error;
use tracing::{debug, warn};

use crate::cluster::TopicModel;
use crate::cluster::terms::rank_stable;

/// Number of ranked terms joined into a label.
pub const LABEL_TERMS: usize = 3;

/// Why a label set does not fit a topic model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("label given for topic {0}, which the model does not contain")]
    UnknownTopic(usize),
    #[error("label for topic {0} is empty")]
    EmptyLabel(usize),
}

/// The top three terms by score, best first, joined by single spaces.
///
/// Equal scores keep the order of `terms`.
pub fn synthesize_label(terms: &[(String, f64)]) -> String {
    let mut ranked = terms.to_vec();
    rank_stable(&mut ranked);
    ranked
        .iter()
        .take(LABEL_TERMS)
        .map(|(term, _)| term.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// One label per topic that has terms; topics without terms are left out.
pub fn synthesize_labels(model: &TopicModel) -> BTreeMap<usize, String> {
    model
        .topics
        .iter()
        .filter(|topic| !topic.terms.is_empty())
        .map(|topic| (topic.id, synthesize_label(&topic.terms)))
        .collect()
}

pub fn default_label(topic: usize) -> String {
    topic.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelSource {
    Synthesized,
    Default,
}

impl Display for LabelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LabelSource::Synthesized => write!(f, "synthesized"),
            LabelSource::Default => write!(f, "default"),
        }
    }
}

/// How much of the model a valid label set covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCoverage {
    pub labelled: usize,
    pub unlabelled: Vec<usize>,
}

/// Display labels for the topics of one model.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TopicLabels {
    custom: BTreeMap<usize, String>,
}

impl TopicLabels {
    /// Numeric labels for every topic.
    pub fn defaults() -> Self {
        Self::default()
    }

    /// Attach `labels` to `model`, rejecting sets that do not match it.
    pub fn try_apply(
        model: &TopicModel,
        labels: BTreeMap<usize, String>,
    ) -> Result<(Self, LabelCoverage), LabelError> {
        for (&topic, label) in &labels {
            if model.topic(topic).is_none() {
                return Err(LabelError::UnknownTopic(topic));
            }
            if label.trim().is_empty() {
                return Err(LabelError::EmptyLabel(topic));
            }
        }
        let unlabelled: Vec<usize> = model
            .topic_ids()
            .filter(|id| !labels.contains_key(id))
            .collect();
        let coverage = LabelCoverage {
            labelled: labels.len(),
            unlabelled,
        };
        Ok((Self { custom: labels }, coverage))
    }

    /// Like [`TopicLabels::try_apply`], but never fails.
    ///
    /// A mismatched set is logged and discarded; a partial set is kept and the
    /// remaining topics show their numeric label.
    pub fn apply_best_effort(model: &TopicModel, labels: BTreeMap<usize, String>) -> Self {
        match Self::try_apply(model, labels) {
            Ok((applied, coverage)) => {
                if !coverage.unlabelled.is_empty() {
                    debug!(
                        unlabelled = ?coverage.unlabelled,
                        "Some topics have no synthesized label and keep their number"
                    );
                }
                applied
            }
            Err(e) => {
                warn!("Discarding topic labels, falling back to topic numbers: {e}");
                Self::defaults()
            }
        }
    }

    pub fn get(&self, topic: usize) -> Cow<'_, str> {
        match self.custom.get(&topic) {
            Some(label) => Cow::Borrowed(label.as_str()),
            None => Cow::Owned(default_label(topic)),
        }
    }

    pub fn source(&self) -> LabelSource {
        if self.custom.is_empty() {
            LabelSource::Default
        } else {
            LabelSource::Synthesized
        }
    }
}
