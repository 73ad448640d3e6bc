//! Rule application logs: locating them and ranking rules by how often they fired.
//!
//! The optimizer writes one log per stage (`stage_<s>_rules_application.csv`),
//! optionally split per external iteration
//! (`stage_<s>_iter_<e>_rules_application.csv`). Coordinates missing from a
//! log's columns are recovered from its file name.

use crate::record::{RuleApplicationEntry, RuleFrequency};
use crate::table::{self, TableError};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static STAGE_IN_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"stage_(\d+)").unwrap());
static ITER_IN_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_iter_(\d+)").unwrap());

const RULE_LOG_GLOB: &str = "stage_*rules_application.csv";

/// Stage and external iteration encoded in a rule log's file name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileCoordinates {
    pub stage: Option<u32>,
    pub external_iteration: Option<u32>,
}

pub fn file_coordinates(path: &Path) -> FileCoordinates {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let capture = |re: &Regex| {
        re.captures(&name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    };
    FileCoordinates {
        stage: capture(&STAGE_IN_NAME),
        external_iteration: capture(&ITER_IN_NAME),
    }
}

/// Rule logs in `dir`, ordered by stage then external iteration.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>, TableError> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = format!("{escaped}/{RULE_LOG_GLOB}");
    let paths = glob::glob(&pattern).map_err(|e| TableError::Io {
        path: dir.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
    })?;

    let mut found = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => found.push(path),
            Err(e) => {
                let path = e.path().to_path_buf();
                return Err(TableError::Io {
                    path,
                    source: std::io::Error::from(e),
                });
            }
        }
    }
    found.sort_by_cached_key(|p| (file_coordinates(p), p.clone()));
    Ok(found)
}

/// Load every entry from a rule log file, or from all rule logs in a directory.
pub fn load(source: &Path) -> Result<Vec<RuleApplicationEntry>, TableError> {
    let files = if source.is_dir() {
        discover(source)?
    } else {
        vec![source.to_path_buf()]
    };
    if files.is_empty() {
        tracing::warn!(dir = %source.display(), "no rule application logs found");
    }

    let mut entries = Vec::new();
    for file in &files {
        let coords = file_coordinates(file);
        let mut loaded = table::read_rule_entries(file, coords)?;
        tracing::debug!(
            file = %file.display(),
            entries = loaded.len(),
            stage = ?coords.stage,
            "loaded rule log"
        );
        entries.append(&mut loaded);
    }
    Ok(entries)
}

/// Keep only the entries of `stage`, or everything when `stage` is `None`.
pub fn filter_stage(
    entries: Vec<RuleApplicationEntry>,
    stage: Option<u32>,
) -> Vec<RuleApplicationEntry> {
    match stage {
        Some(stage) => entries
            .into_iter()
            .filter(|e| e.stage == Some(stage))
            .collect(),
        None => entries,
    }
}

/// Rank rules by total applications, descending, ties broken by name.
pub fn rank_rules<'a, I>(entries: I) -> Vec<RuleFrequency>
where
    I: IntoIterator<Item = &'a RuleApplicationEntry>,
{
    let mut totals: HashMap<&str, u64> = HashMap::new();
    for entry in entries {
        if let Some(rule) = entry.rule_name.as_deref() {
            *totals.entry(rule).or_insert(0) += entry.applications;
        }
    }

    let mut ranked: Vec<(&str, u64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .enumerate()
        .map(|(i, (rule, total))| RuleFrequency {
            rule: rule.to_string(),
            total_applications: total,
            rank: i + 1,
        })
        .collect()
}
