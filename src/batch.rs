//! Run one unit of work per source, each isolated from the others.
//!
//! Sources are processed concurrently on the blocking pool and reported in
//! input order. A source that does not exist is skipped; a source whose work
//! fails is reported without affecting the rest of the batch.

use crate::table::TableError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One source and the file it will produce, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub source: PathBuf,
    pub output: Option<PathBuf>,
}

impl Job {
    pub fn new(source: impl Into<PathBuf>, output: Option<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output,
        }
    }
}

/// `<dir>/<stem of source><suffix>`, e.g. `out/q1_data_filtered.csv`.
pub fn output_path(dir: &Path, source: &Path, suffix: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    dir.join(format!("{stem}{suffix}"))
}

#[derive(Debug)]
pub enum SourceOutcome<T> {
    Done { source: PathBuf, value: T },
    Missing { source: PathBuf },
    Failed { source: PathBuf, error: BatchError },
}

impl<T> SourceOutcome<T> {
    pub fn source(&self) -> &Path {
        match self {
            SourceOutcome::Done { source, .. }
            | SourceOutcome::Missing { source }
            | SourceOutcome::Failed { source, .. } => source,
        }
    }
}

#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<SourceOutcome<T>>,
}

impl<T> BatchReport<T> {
    pub fn any_failed(&self) -> bool {
        self.outcomes
            .iter()
            .any(|o| matches!(o, SourceOutcome::Failed { .. }))
    }

    pub fn done(&self) -> impl Iterator<Item = (&Path, &T)> {
        self.outcomes.iter().filter_map(|o| match o {
            SourceOutcome::Done { source, value } => Some((source.as_path(), value)),
            _ => None,
        })
    }

    fn count(&self, pred: impl Fn(&SourceOutcome<T>) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// Reject a batch in which two sources would write the same file.
pub fn check_unique_outputs(jobs: &[Job]) -> Result<(), BatchError> {
    let mut seen: HashMap<&Path, &Path> = HashMap::new();
    for job in jobs {
        let Some(output) = job.output.as_deref() else {
            continue;
        };
        if let Some(first) = seen.insert(output, &job.source) {
            return Err(BatchError::DuplicateOutput {
                output: output.to_path_buf(),
                first: first.to_path_buf(),
                second: job.source.clone(),
            });
        }
    }
    Ok(())
}

/// Run `work` for every job on the blocking pool and collect outcomes in
/// input order.
pub async fn run_batch<T, F>(jobs: Vec<Job>, work: F) -> Result<BatchReport<T>, BatchError>
where
    T: Send + 'static,
    F: Fn(&Job) -> Result<T, TableError> + Send + Sync + 'static,
{
    check_unique_outputs(&jobs)?;
    let work = Arc::new(work);

    let mut pending = Vec::with_capacity(jobs.len());
    for job in jobs {
        if !job.source.exists() {
            tracing::warn!(source = %job.source.display(), "source not found, skipping");
            pending.push((job.source, None));
            continue;
        }
        let work = Arc::clone(&work);
        let source = job.source.clone();
        let handle = tokio::task::spawn_blocking(move || work(&job));
        pending.push((source, Some(handle)));
    }

    let mut outcomes = Vec::with_capacity(pending.len());
    for (source, handle) in pending {
        let Some(handle) = handle else {
            outcomes.push(SourceOutcome::Missing { source });
            continue;
        };
        let outcome = match handle.await {
            Ok(Ok(value)) => SourceOutcome::Done { source, value },
            Ok(Err(e)) => {
                tracing::error!(source = %source.display(), error = %e, "source failed");
                SourceOutcome::Failed {
                    source,
                    error: BatchError::Table(e),
                }
            }
            Err(e) => {
                tracing::error!(source = %source.display(), error = %e, "worker task failed");
                SourceOutcome::Failed {
                    source,
                    error: BatchError::Task(e),
                }
            }
        };
        outcomes.push(outcome);
    }

    let report = BatchReport { outcomes };
    tracing::debug!(
        done = report.count(|o| matches!(o, SourceOutcome::Done { .. })),
        missing = report.count(|o| matches!(o, SourceOutcome::Missing { .. })),
        failed = report.count(|o| matches!(o, SourceOutcome::Failed { .. })),
        "batch finished"
    );
    Ok(report)
}

#[derive(Debug)]
pub enum BatchError {
    DuplicateOutput {
        output: PathBuf,
        first: PathBuf,
        second: PathBuf,
    },
    Table(TableError),
    Task(tokio::task::JoinError),
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchError::DuplicateOutput {
                output,
                first,
                second,
            } => write!(
                f,
                "{} and {} would both write {}",
                first.display(),
                second.display(),
                output.display()
            ),
            BatchError::Table(e) => write!(f, "{e}"),
            BatchError::Task(e) => write!(f, "worker task failed: {e}"),
        }
    }
}

impl std::error::Error for BatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BatchError::DuplicateOutput { .. } => None,
            BatchError::Table(e) => Some(e),
            BatchError::Task(e) => Some(e),
        }
    }
}
