//! Identity decision: threshold matching plus majority vote over stored names.

use crate::store::EncodingStore;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label shown for a face that matched nothing in the store.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Distance measure used to decide whether two encodings belong to the same person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMetric {
    /// Match when cosine similarity >= threshold.
    Cosine,
    /// Match when Euclidean distance <= threshold.
    Euclidean,
}

/// Strategy for comparing a probe embedding against every stored encoding.
pub trait Matcher {
    /// One flag per gallery entry, in gallery order.
    fn matches(&self, probe: &Embedding, gallery: &[Vec<f32>]) -> Vec<bool>;
}

/// Fixed-threshold matcher over the configured metric.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdMatcher {
    pub metric: MatchMetric,
    pub threshold: f32,
}

impl ThresholdMatcher {
    pub fn new(metric: MatchMetric, threshold: f32) -> Self {
        Self { metric, threshold }
    }
}

impl Matcher for ThresholdMatcher {
    fn matches(&self, probe: &Embedding, gallery: &[Vec<f32>]) -> Vec<bool> {
        // Every entry is compared; no early exit.
        gallery
            .iter()
            .map(|stored| match self.metric {
                MatchMetric::Cosine => probe.similarity(stored) >= self.threshold,
                MatchMetric::Euclidean => probe.euclidean_distance(stored) <= self.threshold,
            })
            .collect()
    }
}

/// Outcome of identifying one face.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    pub fn label(&self) -> &str {
        match self {
            Identity::Known(name) => name,
            Identity::Unknown => UNKNOWN_LABEL,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Most frequent name in `names`.
///
/// Ties go to the name that was seen first.
pub fn majority_name<'a, I>(names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    // (name, count) in first-seen order
    let mut counts: Vec<(&'a str, usize)> = Vec::new();
    for name in names {
        match counts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, count)) => *count += 1,
            None => counts.push((name, 1)),
        }
    }

    let mut best: Option<(&'a str, usize)> = None;
    for (name, count) in counts {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((name, count));
        }
    }
    best.map(|(name, _)| name)
}

/// Identify a probe encoding against the whole store.
pub fn identify<M: Matcher + ?Sized>(
    matcher: &M,
    probe: &Embedding,
    store: &EncodingStore,
) -> Identity {
    let flags = matcher.matches(probe, store.encodings());
    let matched = store
        .names()
        .iter()
        .zip(flags)
        .filter(|(_, hit)| *hit)
        .map(|(name, _)| name.as_str());

    match majority_name(matched) {
        Some(name) => {
            tracing::debug!(name, "probe matched");
            Identity::Known(name.to_string())
        }
        None => Identity::Unknown,
    }
}
