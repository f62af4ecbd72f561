// aggregator.rs - Hit Aggregation
// Purpose: Group hits by their group key, drop repeated values within a
//          group and keep a reproducible group order for the writers.

use crate::classifier::Hit;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct HitGroup {
    pub key: String,
    pub hits: Vec<Hit>,
    seen: HashSet<String>,
}

impl HitGroup {
    fn new(key: String) -> Self {
        Self {
            key,
            hits: Vec::new(),
            seen: HashSet::new(),
        }
    }
}

/// Deduplicating, order-preserving hit accumulator.
///
/// Groups declared up front (catalog order, probed endpoints) come first
/// and are kept even when empty; any other group follows in first-seen
/// order. Within a group the first occurrence of a value wins.
#[derive(Debug, Default)]
pub struct Aggregator {
    groups: Vec<HitGroup>,
    positions: HashMap<String, usize>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_groups<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut agg = Self::new();
        for key in keys {
            agg.group_mut(key.into());
        }
        agg
    }

    /// Declare a group so it is written even if it never receives a hit
    pub fn declare(&mut self, key: impl Into<String>) {
        self.group_mut(key.into());
    }

    fn group_mut(&mut self, key: String) -> &mut HitGroup {
        let idx = match self.positions.get(&key) {
            Some(&idx) => idx,
            None => {
                self.groups.push(HitGroup::new(key.clone()));
                self.positions.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx]
    }

    /// Add a hit; returns false when the value was already present in its group
    pub fn push(&mut self, hit: Hit) -> bool {
        let group = self.group_mut(hit.service_id.clone());
        if !group.seen.insert(hit.value.clone()) {
            return false;
        }
        group.hits.push(hit);
        true
    }

    pub fn extend<I: IntoIterator<Item = Hit>>(&mut self, hits: I) -> usize {
        let mut added = 0;
        for hit in hits {
            if self.push(hit) {
                added += 1;
            }
        }
        added
    }

    pub fn groups(&self) -> &[HitGroup] {
        &self.groups
    }

    pub fn group(&self, key: &str) -> Option<&HitGroup> {
        self.positions.get(key).map(|&idx| &self.groups[idx])
    }

    pub fn hits(&self) -> impl Iterator<Item = &Hit> {
        self.groups.iter().flat_map(|g| g.hits.iter())
    }

    pub fn total(&self) -> usize {
        self.groups.iter().map(|g| g.hits.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
