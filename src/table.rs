//! CSV tables: the boundary between the extraction core and its consumers.
//!
//! Every table is a header row followed by one row per record. Readers check
//! the header for the columns they need up front and report a missing one as
//! [`TableError::SchemaMismatch`].

use crate::record::{
    MetricRecord, RecordShape, RuleApplicationEntry, RuleFrequency, RulePairCount,
};
use crate::reduction::CostReduction;
use crate::rules::FileCoordinates;
use csv::StringRecord;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const PAIR_HEADERS: &[&str] = &["Rule1", "Rule2", "Count"];
pub const FREQUENCY_HEADERS: &[&str] = &["Rule_Name", "Total_Applications", "Rank"];
pub const REDUCTION_HEADERS: &[&str] = &[
    "Query",
    "Custo_Inicial",
    "Custo_Final",
    "Reducao_Absoluta",
    "Reducao_Percentual",
];

/// A header row plus data rows, with no interpretation of the cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

/// Read any CSV table without interpreting its cells.
pub fn read_raw(path: &Path) -> Result<RawTable, TableError> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| csv_error(path, e))?;
    Ok(RawTable { headers, rows })
}

pub fn write_raw(
    path: &Path,
    headers: &StringRecord,
    rows: &[StringRecord],
) -> Result<(), TableError> {
    let mut writer = create_writer(path)?;
    writer.write_record(headers).map_err(|e| csv_error(path, e))?;
    for row in rows {
        writer.write_record(row).map_err(|e| csv_error(path, e))?;
    }
    finish(path, writer)
}

pub fn write_records(
    path: &Path,
    shape: RecordShape,
    records: &[MetricRecord],
) -> Result<(), TableError> {
    let mut writer = create_writer(path)?;
    writer
        .write_record(shape.headers())
        .map_err(|e| csv_error(path, e))?;
    for record in records {
        writer
            .write_record(record.to_row(shape))
            .map_err(|e| csv_error(path, e))?;
    }
    finish(path, writer)
}

/// Read an extracted metric table of the given shape. Every column of that
/// shape must be present.
pub fn read_records(path: &Path, shape: RecordShape) -> Result<Vec<MetricRecord>, TableError> {
    let table = read_raw(path)?;

    let columns = shape
        .headers()
        .iter()
        .map(|name| require_column(path, &table.headers, name))
        .collect::<Result<Vec<usize>, _>>()?;

    let mut records = Vec::with_capacity(table.rows.len());
    for (i, row) in table.rows.iter().enumerate() {
        let cells = RowCells {
            path,
            row,
            line: i + 2,
            columns: &columns,
            names: shape.headers(),
        };
        let (iteration, offset) = match shape {
            RecordShape::PerIteration => (Some(cells.parse(1)?), 2),
            RecordShape::StageScoped => (None, 1),
        };
        records.push(MetricRecord {
            stage: cells.parse(0)?,
            iteration,
            cost: cells.parse(offset)?,
            relational_count: cells.parse(offset + 1)?,
            classes_total: cells.parse(offset + 2)?,
            min_expr: cells.parse(offset + 3)?,
            max_expr: cells.parse(offset + 4)?,
            mean_expr: cells.parse(offset + 5)?,
        });
    }
    Ok(records)
}

struct RowCells<'a> {
    path: &'a Path,
    row: &'a StringRecord,
    line: usize,
    columns: &'a [usize],
    names: &'a [&'a str],
}

impl RowCells<'_> {
    fn parse<T: std::str::FromStr>(&self, i: usize) -> Result<T, TableError> {
        let text = self.row.get(self.columns[i]).unwrap_or("").trim();
        text.parse().map_err(|_| TableError::InvalidValue {
            path: self.path.to_path_buf(),
            line: self.line,
            column: self.names[i].to_string(),
            value: text.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct RuleRow {
    #[serde(rename = "Stage", default)]
    stage: Option<u32>,
    #[serde(rename = "External_Iteration", default)]
    external_iteration: Option<u32>,
    #[serde(rename = "Internal_Iteration")]
    internal_iteration: u32,
    #[serde(rename = "Rule_Name")]
    rule_name: String,
    #[serde(rename = "Applications")]
    applications: u64,
    #[serde(rename = "Class_Count", default)]
    class_count: u64,
    #[serde(rename = "Node_Count", default)]
    node_count: u64,
}

const RULE_REQUIRED: &[&str] = &["Internal_Iteration", "Rule_Name", "Applications"];

/// Read a rule application log.
///
/// `Stage` and `External_Iteration` fall back to the coordinates encoded in
/// the file name; a log without either is a single external iteration, 0.
pub fn read_rule_entries(
    path: &Path,
    coords: FileCoordinates,
) -> Result<Vec<RuleApplicationEntry>, TableError> {
    let mut reader = open_reader(path)?;
    let headers = reader.headers().map_err(|e| csv_error(path, e))?.clone();
    for column in RULE_REQUIRED {
        require_column(path, &headers, column)?;
    }

    let mut entries = Vec::new();
    for row in reader.deserialize::<RuleRow>() {
        let row = row.map_err(|e| csv_error(path, e))?;
        entries.push(RuleApplicationEntry {
            stage: row.stage.or(coords.stage),
            external_iteration: row
                .external_iteration
                .or(coords.external_iteration)
                .unwrap_or(0),
            internal_iteration: row.internal_iteration,
            rule_name: RuleApplicationEntry::rule_from_cell(&row.rule_name),
            applications: row.applications,
            class_count: row.class_count,
            node_count: row.node_count,
        });
    }
    Ok(entries)
}

pub fn write_pairs(path: &Path, pairs: &[RulePairCount]) -> Result<(), TableError> {
    let mut writer = create_writer(path)?;
    writer
        .write_record(PAIR_HEADERS)
        .map_err(|e| csv_error(path, e))?;
    for pair in pairs {
        let count = pair.count.to_string();
        writer
            .write_record([pair.rule1.as_str(), pair.rule2.as_str(), count.as_str()])
            .map_err(|e| csv_error(path, e))?;
    }
    finish(path, writer)
}

/// Write a rule ranking. A ranking restricted to one stage leads with a
/// `Stage` column.
pub fn write_frequencies(
    path: &Path,
    stage: Option<u32>,
    frequencies: &[RuleFrequency],
) -> Result<(), TableError> {
    let mut writer = create_writer(path)?;
    let stage_cell = stage.map(|s| s.to_string());
    let mut headers = Vec::with_capacity(FREQUENCY_HEADERS.len() + 1);
    if stage_cell.is_some() {
        headers.push("Stage");
    }
    headers.extend_from_slice(FREQUENCY_HEADERS);
    writer
        .write_record(&headers)
        .map_err(|e| csv_error(path, e))?;
    for f in frequencies {
        let mut row = Vec::with_capacity(headers.len());
        row.extend(stage_cell.clone());
        row.extend([
            f.rule.clone(),
            f.total_applications.to_string(),
            f.rank.to_string(),
        ]);
        writer
            .write_record(&row)
            .map_err(|e| csv_error(path, e))?;
    }
    finish(path, writer)
}

/// Write cost reductions to any sink (stdout for the CLI).
pub fn write_reductions<W: std::io::Write>(
    sink: W,
    reductions: &[CostReduction],
) -> Result<(), csv::Error> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(REDUCTION_HEADERS)?;
    for r in reductions {
        writer.write_record([
            r.query.clone(),
            r.initial.to_string(),
            r.final_cost.to_string(),
            r.absolute.to_string(),
            format!("{:.2}", r.percent),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn open_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, TableError> {
    csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| csv_error(path, e))
}

fn create_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, TableError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| TableError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    csv::Writer::from_path(path).map_err(|e| csv_error(path, e))
}

fn finish(path: &Path, mut writer: csv::Writer<std::fs::File>) -> Result<(), TableError> {
    writer.flush().map_err(|e| TableError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn column_index(headers: &StringRecord, column: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == column)
}

fn require_column(path: &Path, headers: &StringRecord, column: &str) -> Result<usize, TableError> {
    column_index(headers, column).ok_or_else(|| TableError::SchemaMismatch {
        path: path.to_path_buf(),
        column: column.to_string(),
    })
}

fn csv_error(path: &Path, e: csv::Error) -> TableError {
    TableError::Csv {
        path: path.to_path_buf(),
        source: e,
    }
}

#[derive(Debug)]
pub enum TableError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Csv {
        path: PathBuf,
        source: csv::Error,
    },
    /// A column the reader depends on is absent.
    SchemaMismatch { path: PathBuf, column: String },
    InvalidValue {
        path: PathBuf,
        line: usize,
        column: String,
        value: String,
    },
}

impl std::fmt::Display for TableError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TableError::Io { path, source } => {
                write!(f, "I/O error on {}: {source}", path.display())
            }
            TableError::Csv { path, source } => {
                write!(f, "CSV error in {}: {source}", path.display())
            }
            TableError::SchemaMismatch { path, column } => {
                write!(f, "{} has no `{column}` column", path.display())
            }
            TableError::InvalidValue {
                path,
                line,
                column,
                value,
            } => write!(
                f,
                "{}:{line}: invalid `{column}` value {value:?}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TableError::Io { source, .. } => Some(source),
            TableError::Csv { source, .. } => Some(source),
            TableError::SchemaMismatch { .. } | TableError::InvalidValue { .. } => None,
        }
    }
}
