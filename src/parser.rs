//! Streaming trace parser.
//!
//! Turns the free-form progress lines an optimizer run prints into
//! [`MetricRecord`]s. Values for one record are scattered across several
//! lines; the parser folds each line's tag proposals into a
//! [`FieldAccumulator`] and emits a record the moment it is complete.
//!
//! Two record shapes are supported:
//!
//! - **Per-iteration**: a record is emitted as soon as stage, iteration and
//!   all six values are present. Everything but the stage is then cleared.
//! - **Stage-scoped**: no iteration is tracked, so the next `Stage` marker
//!   (or end of input) is what flushes the previous stage's record.
//!
//! Partial records are never emitted. They are counted in [`ParseStats`].

use crate::accumulator::FieldAccumulator;
use crate::record::{MetricRecord, RecordShape};
use crate::tags::{self, Field, FieldUpdate, FieldValue};
use std::path::Path;

/// Counters describing one pass over a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub lines: u64,
    pub emitted: u64,
    /// Records discarded with some but not all fields present.
    pub dropped_partial: u64,
    /// Tags whose captured value was not a valid number.
    pub malformed_fields: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TraceParser {
    shape: RecordShape,
}

impl TraceParser {
    pub fn new(shape: RecordShape) -> Self {
        Self { shape }
    }

    pub fn shape(&self) -> RecordShape {
        self.shape
    }

    /// Lazily parse a sequence of lines.
    ///
    /// The parser itself holds no state, so parsing the same input again
    /// yields the same records.
    pub fn parse<I>(&self, lines: I) -> Records<I::IntoIter>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Records {
            lines: lines.into_iter(),
            shape: self.shape,
            acc: FieldAccumulator::new(),
            stats: ParseStats::default(),
            done: false,
        }
    }

    /// Parse a whole trace file.
    pub fn parse_file(&self, path: &Path) -> std::io::Result<(Vec<MetricRecord>, ParseStats)> {
        let contents = std::fs::read_to_string(path)?;
        let mut records = self.parse(contents.lines());
        let out: Vec<MetricRecord> = records.by_ref().collect();
        Ok((out, records.into_stats()))
    }
}

/// Iterator over the records of one trace.
pub struct Records<I> {
    lines: I,
    shape: RecordShape,
    acc: FieldAccumulator,
    stats: ParseStats,
    done: bool,
}

impl<I> Records<I> {
    /// Counters so far. Final once the iterator returns `None`.
    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    pub fn into_stats(self) -> ParseStats {
        self.stats
    }
}

impl<I> Iterator for Records<I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = MetricRecord;

    fn next(&mut self) -> Option<MetricRecord> {
        if self.done {
            return None;
        }

        for line in self.lines.by_ref() {
            self.stats.lines += 1;
            let acc = std::mem::take(&mut self.acc);
            let (acc, emitted) = step(self.shape, acc, line.as_ref(), &mut self.stats);
            self.acc = acc;
            if emitted.is_some() {
                self.stats.emitted += 1;
                return emitted;
            }
        }

        self.done = true;
        let acc = std::mem::take(&mut self.acc);
        let last = acc.finish(self.shape);
        if last.is_some() {
            self.stats.emitted += 1;
        } else if acc.has_partial_data() {
            self.stats.dropped_partial += 1;
        }
        log_summary(self.shape, &self.stats);
        last
    }
}

/// Fold one line into the accumulator, returning the record it completes, if any.
fn step(
    shape: RecordShape,
    mut acc: FieldAccumulator,
    line: &str,
    stats: &mut ParseStats,
) -> (FieldAccumulator, Option<MetricRecord>) {
    let mut emitted = None;

    for update in tags::scan_line(line) {
        match update {
            FieldUpdate::Set(Field::Stage, FieldValue::Int(stage)) => {
                if shape == RecordShape::StageScoped {
                    match acc.finish(shape) {
                        Some(record) => emitted = Some(record),
                        None if acc.has_partial_data() => stats.dropped_partial += 1,
                        None => {}
                    }
                    acc = acc.reset();
                }
                acc = match u32::try_from(stage) {
                    Ok(stage) => acc.enter_stage(stage),
                    Err(_) => {
                        stats.malformed_fields += 1;
                        tracing::warn!(line_no = stats.lines, stage, "stage number out of range");
                        acc.apply(&FieldUpdate::Malformed {
                            field: Field::Stage,
                            text: stage.to_string(),
                        })
                    }
                };
            }
            FieldUpdate::Set(Field::Iteration, _) if shape == RecordShape::StageScoped => {}
            FieldUpdate::Set(Field::Iteration, FieldValue::Int(next))
                if acc.has_values()
                    && acc.iteration().is_some_and(|current| u64::from(current) != next) =>
            {
                stats.dropped_partial += 1;
                tracing::debug!(
                    line_no = stats.lines,
                    abandoned = ?acc.iteration(),
                    next,
                    "iteration abandoned before it was complete"
                );
                acc = acc.apply(&update);
            }
            FieldUpdate::Malformed { field, ref text } => {
                stats.malformed_fields += 1;
                tracing::warn!(
                    line_no = stats.lines,
                    field = field.name(),
                    value = %text,
                    "malformed value, field left unset"
                );
                acc = acc.apply(&update);
            }
            FieldUpdate::Set(..) => acc = acc.apply(&update),
        }
    }

    if shape == RecordShape::PerIteration {
        if let Some(record) = acc.finish(shape) {
            tracing::debug!(
                stage = record.stage,
                iteration = ?record.iteration,
                "record complete"
            );
            return (acc.reset_keep_stage(), Some(record));
        }
    }

    (acc, emitted)
}

fn log_summary(shape: RecordShape, stats: &ParseStats) {
    tracing::debug!(
        %shape,
        lines = stats.lines,
        emitted = stats.emitted,
        "trace parsed"
    );
    if stats.dropped_partial > 0 || stats.malformed_fields > 0 {
        tracing::warn!(
            dropped = stats.dropped_partial,
            malformed = stats.malformed_fields,
            "incomplete records were dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ITERATION_TRACE: &str = "\
Stage 1
Iteração: 0
Custo inicial: 500.0
Relacionais: 6
Classes-Total 40
Mínimo: 1
Máximo: 5
Média: 1.8
Iteração: 1
Custo atual: 420.5
Relacionais: 5
Classes-Total 52
Mínimo: 1
Máximo: 7
Média: 2.1
Stage 2
Iteração: 0
Custo final: 300
Relacionais: 4
Classes-Total 60
Mínimo: 1
Máximo: 8
Média: 2.4
";

    fn per_iteration(text: &str) -> Vec<MetricRecord> {
        TraceParser::new(RecordShape::PerIteration)
            .parse(text.lines())
            .collect()
    }

    fn stage_scoped(text: &str) -> Vec<MetricRecord> {
        TraceParser::new(RecordShape::StageScoped)
            .parse(text.lines())
            .collect()
    }

    #[test]
    fn abandoned_iteration_counts_as_dropped() {
        let text = "\
Stage 1
Iteração: 0
Custo atual: 50
Relacionais: 2
Iteração: 1
Custo atual: 40
Relacionais: 2
Classes-Total 9
Mínimo: 1
Máximo: 3
Média: 1.5
";
        let parser = TraceParser::new(RecordShape::PerIteration);
        let mut records = parser.parse(text.lines());
        let emitted: Vec<MetricRecord> = records.by_ref().collect();
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].iteration, Some(1));
        assert_eq!(emitted[0].cost, 40.0);
        assert_eq!(records.stats().emitted, 1);
        assert_eq!(records.stats().dropped_partial, 1);
    }

    #[test]
    fn repeated_iteration_marker_is_not_a_drop() {
        let text = "Stage 1\nIteração: 0\nCusto atual: 50\nIteração: 0\nRelacionais: 2\n";
        let parser = TraceParser::new(RecordShape::PerIteration);
        let mut records = parser.parse(text.lines());
        assert!(records.by_ref().next().is_none());
        // Only the unfinished cycle at end of input is dropped.
        assert_eq!(records.stats().dropped_partial, 1);
    }

    #[test]
    fn empty_input_yields_nothing() {
        let parser = TraceParser::new(RecordShape::PerIteration);
        let mut records = parser.parse(Vec::<String>::new());
        assert!(records.next().is_none());
        assert_eq!(records.stats(), &ParseStats::default());
        assert!(stage_scoped("").is_empty());
    }

    #[test]
    fn one_record_per_complete_iteration() {
        let records = per_iteration(ITERATION_TRACE);
        assert_eq!(records.len(), 3);

        assert_eq!(
            records[0],
            MetricRecord {
                stage: 1,
                iteration: Some(0),
                cost: 500.0,
                relational_count: 6,
                classes_total: 40,
                min_expr: 1,
                max_expr: 5,
                mean_expr: 1.8,
            }
        );
        assert_eq!((records[1].stage, records[1].iteration), (1, Some(1)));
        assert_eq!(records[1].cost, 420.5);
        assert_eq!((records[2].stage, records[2].iteration), (2, Some(0)));
        assert_eq!(records[2].cost, 300.0);
    }

    #[test]
    fn parsing_twice_is_identical() {
        let parser = TraceParser::new(RecordShape::PerIteration);
        let first: Vec<_> = parser.parse(ITERATION_TRACE.lines()).collect();
        let second: Vec<_> = parser.parse(ITERATION_TRACE.lines()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn records_are_produced_lazily() {
        let parser = TraceParser::new(RecordShape::PerIteration);
        let mut records = parser.parse(ITERATION_TRACE.lines());
        let first = records.next().unwrap();
        assert_eq!(first.iteration, Some(0));
        // Only the lines of the first cycle have been consumed.
        assert_eq!(records.stats().lines, 8);
        assert_eq!(records.stats().emitted, 1);
    }

    #[test]
    fn last_cost_line_wins_within_a_cycle() {
        let text = "\
Stage 0
Iteração: 3
Custo inicial: 900
Custo atual: 850
Relacionais: 2
Classes-Total 10
Mínimo: 1
Máximo: 2
Custo final: 800
Média: 1.5
";
        let records = per_iteration(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cost, 800.0);
    }

    #[test]
    fn malformed_cost_suppresses_the_cycle() {
        let text = "\
Stage 1
Iteração: 0
Relacionais: 2
Classes-Total 10
Mínimo: 1
Máximo: 2
Média: 1.5
Custo atual: n/a
";
        let parser = TraceParser::new(RecordShape::PerIteration);
        let mut records = parser.parse(text.lines());
        assert!(records.next().is_none());
        assert_eq!(records.stats().malformed_fields, 1);
        assert_eq!(records.stats().dropped_partial, 1);
    }

    #[test]
    fn malformed_value_can_be_corrected_later() {
        let text = "\
Stage 1
Iteração: 0
Custo atual: ??
Relacionais: 2
Classes-Total 10
Mínimo: 1
Máximo: 2
Média: 1.5
Custo atual: 42
";
        let records = per_iteration(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cost, 42.0);
    }

    #[test]
    fn lines_without_tags_are_ignored() {
        let text = format!("COUNTER MERGES: 3\nHC SIZE: 99\n{ITERATION_TRACE}NUM CLASSES: 12\n");
        assert_eq!(per_iteration(&text), per_iteration(ITERATION_TRACE));
    }

    #[test]
    fn stage_marker_does_not_flush_per_iteration() {
        // Values seen before a stage change still count towards the next record.
        let text = "\
Stage 1
Iteração: 0
Custo atual: 10
Relacionais: 1
Stage 2
Iteração: 5
Classes-Total 3
Mínimo: 1
Máximo: 1
Média: 1
";
        let records = per_iteration(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].stage, 2);
        assert_eq!(records[0].iteration, Some(5));
        assert_eq!(records[0].cost, 10.0);
    }

    #[test]
    fn iteration_must_follow_the_latest_stage_marker() {
        let text = "\
Stage 1
Iteração: 0
Stage 2
Custo atual: 10
Relacionais: 1
Classes-Total 3
Mínimo: 1
Máximo: 1
Média: 1
";
        let parser = TraceParser::new(RecordShape::PerIteration);
        let mut records = parser.parse(text.lines());
        assert!(records.next().is_none());
        assert_eq!(records.stats().dropped_partial, 1);
    }

    #[test]
    fn stage_is_kept_after_emission() {
        let text = "\
Stage 3
Iteração: 0
Custo atual: 1
Relacionais: 1
Classes-Total 1
Mínimo: 1
Máximo: 1
Média: 1
Iteração: 1
Custo atual: 2
Relacionais: 1
Classes-Total 1
Mínimo: 1
Máximo: 1
Média: 1
";
        let records = per_iteration(text);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.stage == 3));
        assert_eq!(records[1].iteration, Some(1));
    }

    #[test]
    fn all_fields_on_one_line() {
        let text = "Stage 0 Iteração: 2 Custo atual: 5 Relacionais: 1 Classes-Total 4 Mínimo: 1 Máximo: 3 Média: 2";
        let records = per_iteration(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].max_expr, 3);
    }

    const STAGE_TRACE: &str = "\
Stage 0
Classes-Total 12
Custo inicial: 1000
Relacionais: 4
Mínimo: 1
Máximo: 3
Média: 1.25
Stage 1
Classes-Total 30
Custo atual: 700
Relacionais: 4
Mínimo: 1
Máximo: 6
Média: 2.5
Stage 2
Classes-Total 31
Custo final: 650.25
Relacionais: 3
Mínimo: 1
Máximo: 6
Média: 2.75
";

    #[test]
    fn stage_scoped_flushes_on_next_stage_and_at_end() {
        let records = stage_scoped(STAGE_TRACE);
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|r| r.stage).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(records.iter().all(|r| r.iteration.is_none()));
        assert_eq!(records[0].cost, 1000.0);
        assert_eq!(records[2].cost, 650.25);
        assert_eq!(records[2].mean_expr, 2.75);
    }

    #[test]
    fn stage_scoped_does_not_emit_before_boundary() {
        let parser = TraceParser::new(RecordShape::StageScoped);
        let mut records = parser.parse(STAGE_TRACE.lines());
        let first = records.next().unwrap();
        assert_eq!(first.stage, 0);
        // The stage 0 record only appears once the "Stage 1" line is read.
        assert_eq!(records.stats().lines, 8);
    }

    #[test]
    fn stage_scoped_keeps_last_value_of_a_stage() {
        let text = "\
Stage 0
Custo inicial: 1000
Relacionais: 4
Classes-Total 12
Mínimo: 1
Máximo: 3
Média: 1.25
Custo final: 600
";
        let records = stage_scoped(text);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cost, 600.0);
    }

    #[test]
    fn stage_scoped_drops_incomplete_stage() {
        let text = "\
Stage 0
Custo inicial: 1000
Relacionais: 4
Stage 1
Classes-Total 30
Custo atual: 700
Relacionais: 4
Mínimo: 1
Máximo: 6
Média: 2.5
";
        let parser = TraceParser::new(RecordShape::StageScoped);
        let mut records = parser.parse(text.lines());
        let all: Vec<_> = records.by_ref().collect();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stage, 1);
        assert_eq!(records.stats().dropped_partial, 1);
        assert_eq!(records.stats().emitted, 1);
    }

    #[test]
    fn stage_scoped_ignores_iteration_markers() {
        let text = STAGE_TRACE.replace("Stage 1\n", "Stage 1\nIteração: 9\n");
        let records = stage_scoped(&text);
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.iteration.is_none()));
    }

    #[test]
    fn values_before_first_stage_never_complete() {
        let text = "\
Custo inicial: 1
Relacionais: 1
Classes-Total 1
Mínimo: 1
Máximo: 1
Média: 1
";
        assert!(stage_scoped(text).is_empty());
        assert!(per_iteration(text).is_empty());
    }

    #[test]
    fn parse_file_reads_and_counts() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("q1_data.txt");
        std::fs::write(&path, ITERATION_TRACE).unwrap();

        let parser = TraceParser::new(RecordShape::PerIteration);
        let (records, stats) = parser.parse_file(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(stats.emitted, 3);
        assert_eq!(stats.lines, ITERATION_TRACE.lines().count() as u64);
        assert_eq!(stats.dropped_partial, 0);
    }

    #[test]
    fn parse_file_missing_is_io_error() {
        let parser = TraceParser::new(RecordShape::PerIteration);
        let err = parser
            .parse_file(Path::new("/nonexistent/trace.txt"))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
