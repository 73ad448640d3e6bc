//! Value records produced and consumed by the extraction pipeline.

use serde::{Deserialize, Serialize};

/// Which fields a trace record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordShape {
    /// One record per `Iteração:` cycle; the iteration is a required field.
    #[default]
    PerIteration,
    /// One record per `Stage` block; no iteration is tracked.
    StageScoped,
}

impl RecordShape {
    /// Column headers for the tabular form of this shape.
    pub fn headers(self) -> &'static [&'static str] {
        match self {
            RecordShape::PerIteration => &[
                "Stage",
                "Iteração",
                "Custo",
                "Relacionais",
                "Classes_Total",
                "Min",
                "Max",
                "Media",
            ],
            RecordShape::StageScoped => &[
                "Stage",
                "Custo",
                "Relacionais",
                "Classes_Total",
                "Min",
                "Max",
                "Media",
            ],
        }
    }
}

impl std::fmt::Display for RecordShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordShape::PerIteration => write!(f, "per-iteration"),
            RecordShape::StageScoped => write!(f, "stage-scoped"),
        }
    }
}

impl std::str::FromStr for RecordShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-iteration" => Ok(RecordShape::PerIteration),
            "stage-scoped" => Ok(RecordShape::StageScoped),
            other => Err(format!(
                "unknown record shape `{other}` (expected per-iteration or stage-scoped)"
            )),
        }
    }
}

/// One completed observation extracted from a trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRecord {
    pub stage: u32,
    /// `None` for stage-scoped records.
    pub iteration: Option<u32>,
    pub cost: f64,
    pub relational_count: u64,
    pub classes_total: u64,
    pub min_expr: u64,
    pub max_expr: u64,
    pub mean_expr: f64,
}

impl MetricRecord {
    /// Render the record as a table row for the given shape.
    pub fn to_row(&self, shape: RecordShape) -> Vec<String> {
        let mut row = vec![self.stage.to_string()];
        if shape == RecordShape::PerIteration {
            row.push(self.iteration.map(|i| i.to_string()).unwrap_or_default());
        }
        row.extend([
            self.cost.to_string(),
            self.relational_count.to_string(),
            self.classes_total.to_string(),
            self.min_expr.to_string(),
            self.max_expr.to_string(),
            self.mean_expr.to_string(),
        ]);
        row
    }
}

/// Rule name written by the optimizer for an iteration in which nothing fired.
pub const NO_RULE: &str = "None";

/// One row of a per-iteration rule application log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleApplicationEntry {
    pub stage: Option<u32>,
    pub external_iteration: u32,
    pub internal_iteration: u32,
    /// `None` when no rule fired in this slot.
    pub rule_name: Option<String>,
    pub applications: u64,
    pub class_count: u64,
    pub node_count: u64,
}

impl RuleApplicationEntry {
    /// Map a raw rule-name cell to `Some(name)`, or `None` for the sentinel.
    pub fn rule_from_cell(cell: &str) -> Option<String> {
        let cell = cell.trim();
        if cell.is_empty() || cell == NO_RULE {
            None
        } else {
            Some(cell.to_string())
        }
    }

    /// `(stage, external_iteration, internal_iteration)` coordinate of this
    /// entry. Internal iteration numbers restart in every stage.
    pub fn coordinate(&self) -> (Option<u32>, u32, u32) {
        (self.stage, self.external_iteration, self.internal_iteration)
    }
}

/// Unordered pair of rules with the number of coordinates they shared.
///
/// `rule1 < rule2` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulePairCount {
    pub rule1: String,
    pub rule2: String,
    pub count: u64,
}

/// Total applications of one rule, with its 1-based rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFrequency {
    pub rule: String,
    pub total_applications: u64,
    pub rank: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_parses_from_its_display_form() {
        for shape in [RecordShape::PerIteration, RecordShape::StageScoped] {
            assert_eq!(shape.to_string().parse::<RecordShape>(), Ok(shape));
        }
        assert!("sideways".parse::<RecordShape>().is_err());
    }

    fn sample() -> MetricRecord {
        MetricRecord {
            stage: 2,
            iteration: Some(3),
            cost: 1250.5,
            relational_count: 7,
            classes_total: 42,
            min_expr: 1,
            max_expr: 9,
            mean_expr: 2.25,
        }
    }

    #[test]
    fn per_iteration_row_includes_iteration() {
        let row = sample().to_row(RecordShape::PerIteration);
        assert_eq!(row, vec!["2", "3", "1250.5", "7", "42", "1", "9", "2.25"]);
        assert_eq!(row.len(), RecordShape::PerIteration.headers().len());
    }

    #[test]
    fn stage_scoped_row_omits_iteration() {
        let record = MetricRecord {
            iteration: None,
            ..sample()
        };
        let row = record.to_row(RecordShape::StageScoped);
        assert_eq!(row, vec!["2", "1250.5", "7", "42", "1", "9", "2.25"]);
        assert_eq!(row.len(), RecordShape::StageScoped.headers().len());
    }

    #[test]
    fn large_costs_are_written_without_exponent() {
        let record = MetricRecord {
            cost: 1e21,
            ..sample()
        };
        let row = record.to_row(RecordShape::StageScoped);
        assert_eq!(row[1], "1000000000000000000000");
    }

    #[test]
    fn sentinel_and_empty_cells_mean_no_rule() {
        assert_eq!(RuleApplicationEntry::rule_from_cell("None"), None);
        assert_eq!(RuleApplicationEntry::rule_from_cell("  "), None);
        assert_eq!(
            RuleApplicationEntry::rule_from_cell(" filter-merge "),
            Some("filter-merge".to_string())
        );
    }

    #[test]
    fn shape_display_matches_config_spelling() {
        assert_eq!(RecordShape::PerIteration.to_string(), "per-iteration");
        assert_eq!(RecordShape::StageScoped.to_string(), "stage-scoped");
    }
}
