use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::CatalogError;

/// The fixed, ordered set of options a survey accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    options: Vec<String>,
}

impl Catalog {
    pub fn new<I, S>(options: I) -> Result<Self, CatalogError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for option in options {
            let option = option.as_ref().trim();
            if option.is_empty() {
                continue;
            }
            if seen.insert(option.to_string()) {
                kept.push(option.to_string());
            }
        }

        if kept.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { options: kept })
    }

    /// Parse a comma-separated list such as `"A, B ,C"`.
    pub fn parse(raw: &str) -> Result<Self, CatalogError> {
        Self::new(raw.split(','))
    }

    pub fn options(&self) -> &[String] {
        &self.options
    }

    pub fn position(&self, option: &str) -> Option<usize> {
        self.options.iter().position(|o| o == option)
    }

    /// Keep only catalog members, deduplicated and in catalog order.
    ///
    /// Unknown names are dropped rather than rejected so an older client
    /// can still vote for whatever it shares with the current catalog.
    pub fn filter_selections<S: AsRef<str>>(&self, requested: &[S]) -> Vec<String> {
        let mut picked = vec![false; self.options.len()];
        for selection in requested {
            if let Some(idx) = self.position(selection.as_ref()) {
                picked[idx] = true;
            }
        }

        self.options
            .iter()
            .zip(picked)
            .filter(|(_, picked)| *picked)
            .map(|(option, _)| option.clone())
            .collect()
    }
}

/// A single accepted ballot. Created once per session and never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub session_id: String,
    pub selections: Vec<String>,
    pub accepted_at: DateTime<Utc>,
}

/// Per-option counters, indexed by catalog position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally {
    catalog: Arc<Catalog>,
    counts: Vec<u64>,
}

impl Tally {
    pub fn zeroed(catalog: Arc<Catalog>) -> Self {
        let counts = vec![0; catalog.options().len()];
        Self { catalog, counts }
    }

    /// Rebuild counters from scratch by folding over `votes`.
    pub fn from_votes<'a, I>(catalog: Arc<Catalog>, votes: I) -> Self
    where
        I: IntoIterator<Item = &'a Vote>,
    {
        let mut tally = Self::zeroed(catalog);
        for vote in votes {
            for option in &vote.selections {
                tally.increment(option);
            }
        }
        tally
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn get(&self, option: &str) -> Option<u64> {
        self.catalog.position(option).map(|idx| self.counts[idx])
    }

    /// Returns false if `option` is not in the catalog.
    pub fn increment(&mut self, option: &str) -> bool {
        match self.catalog.position(option) {
            Some(idx) => {
                self.counts[idx] += 1;
                true
            }
            None => false,
        }
    }

    pub fn decrement(&mut self, option: &str) {
        if let Some(idx) = self.catalog.position(option) {
            self.counts[idx] = self.counts[idx].saturating_sub(1);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.catalog
            .options()
            .iter()
            .map(String::as_str)
            .zip(self.counts.iter().copied())
    }
}

// Serialized as a JSON object in catalog order: {"A": 1, "B": 0, ...}
impl Serialize for Tally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.counts.len()))?;
        for (option, count) in self.iter() {
            map.serialize_entry(option, &count)?;
        }
        map.end()
    }
}

/// Everything the aggregator owns for one survey epoch.
#[derive(Debug, Clone)]
pub struct SurveyState {
    pub votes: HashMap<String, Vote>,
    pub tally: Tally,
    pub epoch_started_at: DateTime<Utc>,
}

impl SurveyState {
    pub fn fresh(catalog: Arc<Catalog>) -> Self {
        Self {
            votes: HashMap::new(),
            tally: Tally::zeroed(catalog),
            epoch_started_at: Utc::now(),
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.tally.catalog()
    }

    pub fn total_votes(&self) -> u64 {
        self.votes.len() as u64
    }
}

/// The view pushed to subscribers and returned by the results endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub tallies: Tally,
    pub total_votes: u64,
    pub online_users: usize,
}
