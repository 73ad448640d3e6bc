/// Tag matchers for optimizer trace lines.
///
/// Each matcher recognizes one textual tag and proposes a value for exactly
/// one field. Matchers have no side effects; the parser decides what to do
/// with the proposals.
///
/// Recognized tags:
/// - `Stage <int>`
/// - `Iteração: <int>`
/// - `Custo inicial|atual|final: <float>`
/// - `Relacionais: <int>`
/// - `Classes-Total <int>`
/// - `Mínimo: <int>`, `Máximo: <int>`
/// - `Média: <float>`
use regex::Regex;
use std::sync::LazyLock;

/// A field of a metric record that a tag can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Stage,
    Iteration,
    Cost,
    RelationalCount,
    ClassesTotal,
    MinExpr,
    MaxExpr,
    MeanExpr,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Stage => "stage",
            Field::Iteration => "iteration",
            Field::Cost => "cost",
            Field::RelationalCount => "relational_count",
            Field::ClassesTotal => "classes_total",
            Field::MinExpr => "min_expr",
            Field::MaxExpr => "max_expr",
            Field::MeanExpr => "mean_expr",
        }
    }
}

/// A parsed value for one field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Int(u64),
    Float(f64),
}

/// What a matching tag proposes for its field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    /// The tag matched and its capture parsed.
    Set(Field, FieldValue),
    /// The tag matched but the captured text is not a valid number.
    Malformed { field: Field, text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueKind {
    Int,
    Float,
}

/// One tag pattern bound to the field it feeds.
#[derive(Debug)]
pub struct TagMatcher {
    field: Field,
    kind: ValueKind,
    pattern: Regex,
}

// Value tags capture any number-like token so malformed values are reported
// rather than skipped. Structural markers only match digits, since the words
// "Stage" and "Iteração" also appear in free text.
const TOKEN: &str = r"([0-9A-Za-z.+\-]+)";
const DIGITS: &str = r"(\d+)";

impl TagMatcher {
    fn new(field: Field, kind: ValueKind, prefix: &str) -> Self {
        let capture = match field {
            Field::Stage | Field::Iteration => DIGITS,
            _ => TOKEN,
        };
        let pattern = Regex::new(&format!("{prefix}{capture}")).expect("tag pattern is valid");
        Self {
            field,
            kind,
            pattern,
        }
    }

    /// Propose an update for this matcher's field, or `None` if the tag is absent.
    pub fn propose(&self, line: &str) -> Option<FieldUpdate> {
        let caps = self.pattern.captures(line)?;
        let text = caps.get(1)?.as_str();
        let value = match self.kind {
            ValueKind::Int => text.parse::<u64>().ok().map(FieldValue::Int),
            ValueKind::Float => text
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(FieldValue::Float),
        };
        Some(match value {
            Some(v) => FieldUpdate::Set(self.field, v),
            None => FieldUpdate::Malformed {
                field: self.field,
                text: text.to_string(),
            },
        })
    }
}

/// Matchers in application order: stage, iteration, then value fields.
static MATCHERS: LazyLock<Vec<TagMatcher>> = LazyLock::new(|| {
    vec![
        TagMatcher::new(Field::Stage, ValueKind::Int, r"\bStage "),
        TagMatcher::new(Field::Iteration, ValueKind::Int, r"Iteração: "),
        TagMatcher::new(
            Field::Cost,
            ValueKind::Float,
            r"Custo (?:inicial|atual|final): ",
        ),
        TagMatcher::new(Field::RelationalCount, ValueKind::Int, r"Relacionais: "),
        TagMatcher::new(Field::ClassesTotal, ValueKind::Int, r"Classes-Total "),
        TagMatcher::new(Field::MinExpr, ValueKind::Int, r"Mínimo: "),
        TagMatcher::new(Field::MaxExpr, ValueKind::Int, r"Máximo: "),
        TagMatcher::new(Field::MeanExpr, ValueKind::Float, r"Média: "),
    ]
});

/// The built-in matcher set.
pub fn matchers() -> &'static [TagMatcher] {
    &MATCHERS
}

/// Run every matcher against a line, in order.
pub fn scan_line(line: &str) -> Vec<FieldUpdate> {
    matchers().iter().filter_map(|m| m.propose(line)).collect()
}
