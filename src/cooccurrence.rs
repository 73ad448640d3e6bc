//! Rewrite-rule co-occurrence mining.
//!
//! Two rules co-occur when both fired in the same
//! `(stage, external_iteration, internal_iteration)` coordinate. Each coordinate
//! contributes at most one to a pair's count, however many times either rule
//! fired there.

use crate::record::{RuleApplicationEntry, RulePairCount};
use std::collections::{BTreeMap, BTreeSet, HashMap};

type Coordinate = (Option<u32>, u32, u32);

#[derive(Debug, Clone, Copy, Default)]
pub struct RuleCoOccurrenceMiner;

impl RuleCoOccurrenceMiner {
    pub fn new() -> Self {
        RuleCoOccurrenceMiner
    }

    /// Count co-occurring rule pairs and return the `top_k` most frequent.
    ///
    /// Ordered by count descending, then by `(rule1, rule2)` ascending.
    pub fn mine<'a, I>(&self, entries: I, top_k: usize) -> Vec<RulePairCount>
    where
        I: IntoIterator<Item = &'a RuleApplicationEntry>,
    {
        let groups = group_by_coordinate(entries);

        let mut counts: HashMap<(&str, &str), u64> = HashMap::new();
        for rules in groups.values() {
            let rules: Vec<&str> = rules.iter().copied().collect();
            // `rules` is sorted, so (rules[i], rules[j]) with i < j is canonical.
            for (i, first) in rules.iter().enumerate() {
                for second in &rules[i + 1..] {
                    *counts.entry((*first, *second)).or_insert(0) += 1;
                }
            }
        }

        let mut pairs: Vec<RulePairCount> = counts
            .into_iter()
            .map(|((rule1, rule2), count)| RulePairCount {
                rule1: rule1.to_string(),
                rule2: rule2.to_string(),
                count,
            })
            .collect();
        pairs.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.rule1.cmp(&b.rule1))
                .then_with(|| a.rule2.cmp(&b.rule2))
        });
        pairs.truncate(top_k);

        tracing::debug!(
            coordinates = groups.len(),
            pairs = pairs.len(),
            top_k,
            "mined rule co-occurrence"
        );
        pairs
    }
}

/// Distinct rules that fired in each coordinate. Sentinel entries are skipped.
fn group_by_coordinate<'a, I>(entries: I) -> BTreeMap<Coordinate, BTreeSet<&'a str>>
where
    I: IntoIterator<Item = &'a RuleApplicationEntry>,
{
    let mut groups: BTreeMap<Coordinate, BTreeSet<&'a str>> = BTreeMap::new();
    for entry in entries {
        if let Some(rule) = entry.rule_name.as_deref() {
            groups.entry(entry.coordinate()).or_default().insert(rule);
        }
    }
    groups
}
