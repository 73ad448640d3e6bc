//! Cost reduction between the first optimization stage and the final plan.

use crate::record::MetricRecord;
use serde::Serialize;
use std::collections::BTreeMap;

/// Costs above this are placeholders for "no plan yet", not real costs.
pub const UNAVAILABLE_COST: f64 = 1e30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostReduction {
    pub query: String,
    pub initial: f64,
    #[serde(rename = "final")]
    pub final_cost: f64,
    pub absolute: f64,
    /// Percentage of the initial cost removed; 0 when the initial cost is 0.
    pub percent: f64,
}

fn available(cost: f64) -> Option<f64> {
    (cost <= UNAVAILABLE_COST).then_some(cost)
}

/// First cost observed in each stage.
pub fn stage_costs(records: &[MetricRecord]) -> BTreeMap<u32, f64> {
    let mut costs = BTreeMap::new();
    for record in records {
        costs.entry(record.stage).or_insert(record.cost);
    }
    costs
}

/// Reduction from the first cost of `initial_stage` to the last cost of the
/// highest stage. `None` when either end is missing or unavailable.
pub fn cost_reduction(
    query: &str,
    records: &[MetricRecord],
    initial_stage: u32,
) -> Option<CostReduction> {
    let initial = available(*stage_costs(records).get(&initial_stage)?)?;
    let last_stage = records.iter().map(|r| r.stage).max()?;
    let final_cost = records
        .iter()
        .rev()
        .find(|r| r.stage == last_stage)
        .and_then(|r| available(r.cost))?;

    let absolute = initial - final_cost;
    let percent = if initial > 0.0 {
        absolute / initial * 100.0
    } else {
        0.0
    };
    Some(CostReduction {
        query: query.to_string(),
        initial,
        final_cost,
        absolute,
        percent,
    })
}
