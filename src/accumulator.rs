//! Partially-filled metric record.
//!
//! The accumulator is a plain value: the parser threads it through the line
//! sequence, applying tag updates and replacing it with a fresh one on reset.

use crate::record::{MetricRecord, RecordShape};
use crate::tags::{Field, FieldUpdate, FieldValue};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldAccumulator {
    stage: Option<u32>,
    iteration: Option<u32>,
    cost: Option<f64>,
    relational_count: Option<u64>,
    classes_total: Option<u64>,
    min_expr: Option<u64>,
    max_expr: Option<u64>,
    mean_expr: Option<f64>,
}

impl FieldAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one tag proposal. Later values overwrite earlier ones; a
    /// malformed value leaves the field unset.
    pub fn apply(mut self, update: &FieldUpdate) -> Self {
        match update {
            FieldUpdate::Set(field, value) => self.set(*field, *value),
            FieldUpdate::Malformed { field, .. } => self.clear(*field),
        }
        self
    }

    fn set(&mut self, field: Field, value: FieldValue) {
        match (field, value) {
            (Field::Stage, FieldValue::Int(v)) => match u32::try_from(v) {
                Ok(v) => self.stage = Some(v),
                Err(_) => self.stage = None,
            },
            (Field::Iteration, FieldValue::Int(v)) => match u32::try_from(v) {
                Ok(v) => self.iteration = Some(v),
                Err(_) => self.iteration = None,
            },
            (Field::Cost, FieldValue::Float(v)) => self.cost = Some(v),
            (Field::RelationalCount, FieldValue::Int(v)) => self.relational_count = Some(v),
            (Field::ClassesTotal, FieldValue::Int(v)) => self.classes_total = Some(v),
            (Field::MinExpr, FieldValue::Int(v)) => self.min_expr = Some(v),
            (Field::MaxExpr, FieldValue::Int(v)) => self.max_expr = Some(v),
            (Field::MeanExpr, FieldValue::Float(v)) => self.mean_expr = Some(v),
            // Integer text is valid float text
            (Field::Cost, FieldValue::Int(v)) => self.cost = Some(v as f64),
            (Field::MeanExpr, FieldValue::Int(v)) => self.mean_expr = Some(v as f64),
            (field, FieldValue::Float(_)) => self.clear(field),
        }
    }

    fn clear(&mut self, field: Field) {
        match field {
            Field::Stage => self.stage = None,
            Field::Iteration => self.iteration = None,
            Field::Cost => self.cost = None,
            Field::RelationalCount => self.relational_count = None,
            Field::ClassesTotal => self.classes_total = None,
            Field::MinExpr => self.min_expr = None,
            Field::MaxExpr => self.max_expr = None,
            Field::MeanExpr => self.mean_expr = None,
        }
    }

    pub fn iteration(&self) -> Option<u32> {
        self.iteration
    }

    /// Whether any field besides the stage has been observed.
    pub fn has_partial_data(&self) -> bool {
        self.iteration.is_some() || self.has_values()
    }

    /// Whether any of the six value fields has been observed.
    pub fn has_values(&self) -> bool {
        self.cost.is_some()
            || self.relational_count.is_some()
            || self.classes_total.is_some()
            || self.min_expr.is_some()
            || self.max_expr.is_some()
            || self.mean_expr.is_some()
    }

    /// Build the record if every required field is present.
    pub fn finish(&self, shape: RecordShape) -> Option<MetricRecord> {
        let iteration = match shape {
            RecordShape::PerIteration => Some(self.iteration?),
            RecordShape::StageScoped => None,
        };
        Some(MetricRecord {
            stage: self.stage?,
            iteration,
            cost: self.cost?,
            relational_count: self.relational_count?,
            classes_total: self.classes_total?,
            min_expr: self.min_expr?,
            max_expr: self.max_expr?,
            mean_expr: self.mean_expr?,
        })
    }

    /// A fresh, empty accumulator.
    pub fn reset(self) -> Self {
        Self::default()
    }

    /// A fresh accumulator that keeps only the current stage.
    pub fn reset_keep_stage(self) -> Self {
        Self {
            stage: self.stage,
            ..Self::default()
        }
    }

    /// Enter a stage: set it and forget the current iteration.
    pub fn enter_stage(self, stage: u32) -> Self {
        Self {
            stage: Some(stage),
            iteration: None,
            ..self
        }
    }
}
