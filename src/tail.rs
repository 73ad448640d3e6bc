//! Tail-window selection over per-query series.
//!
//! Cross-query comparison tables only look at the last few rows of each
//! query's series. Some sources end with trailing total-cost rows that are a
//! different quantity altogether; those sources are listed in
//! [`TrimExceptions`] and have their trailing rows removed before the window
//! is taken.

use std::collections::BTreeSet;
use std::num::NonZeroUsize;

pub const DEFAULT_WINDOW: usize = 4;

/// Query key of a source identifier: its file stem up to the first `_`.
///
/// `outputs/q15_data_filtered.csv` → `q15`.
pub fn query_key(source_id: &str) -> &str {
    let name = source_id
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_id);
    let stem = name.split('.').next().unwrap_or(name);
    stem.split('_').next().unwrap_or(stem)
}

/// Sources whose trailing rows must be trimmed before windowing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrimExceptions {
    keys: BTreeSet<String>,
}

impl TrimExceptions {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `source_id` names a listed source, either exactly or by its query key.
    pub fn matches(&self, source_id: &str) -> bool {
        self.keys.contains(source_id) || self.keys.contains(query_key(source_id))
    }
}

#[derive(Debug, Clone)]
pub struct TailWindow {
    window: NonZeroUsize,
    exceptions: TrimExceptions,
}

impl TailWindow {
    pub fn new(window: NonZeroUsize, exceptions: TrimExceptions) -> Self {
        Self { window, exceptions }
    }

    pub fn window(&self) -> usize {
        self.window.get()
    }

    /// Select the last `window` rows of `rows`, keeping their order.
    ///
    /// For an exceptional source the last `window` rows are dropped first.
    /// Short inputs yield as many rows as are available.
    pub fn select<'a, R>(&self, rows: &'a [R], source_id: &str) -> &'a [R] {
        let window = self.window.get();
        let end = if self.exceptions.matches(source_id) {
            tracing::debug!(
                source = source_id,
                trimmed = window.min(rows.len()),
                "trimming trailing total-cost rows"
            );
            rows.len().saturating_sub(window)
        } else {
            rows.len()
        };
        let start = end.saturating_sub(window);
        &rows[start..end]
    }
}

impl Default for TailWindow {
    fn default() -> Self {
        Self {
            window: NonZeroUsize::new(DEFAULT_WINDOW).unwrap_or(NonZeroUsize::MIN),
            exceptions: TrimExceptions::default(),
        }
    }
}
