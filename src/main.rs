mod accumulator;
mod batch;
mod config;
mod cooccurrence;
mod parser;
mod record;
mod reduction;
mod rules;
mod table;
mod tags;
mod tail;

use batch::{BatchReport, Job, SourceOutcome};
use clap::{Parser, Subcommand};
use config::Config;
use cooccurrence::RuleCoOccurrenceMiner;
use parser::{ParseStats, TraceParser};
use record::RecordShape;
use reduction::CostReduction;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use table::TableError;
use tracing_subscriber::EnvFilter;

/// Extract metric tables and rewrite-rule statistics from query optimizer
/// traces and rule application logs.
#[derive(Parser, Debug)]
#[command(name = "optrace", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "optrace.toml", global = true)]
    config: PathBuf,

    /// Per-file parse and load detail
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print the resolved settings and planned outputs, don't run
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract metric records from optimizer traces
    Extract {
        #[arg(required = true, value_name = "TRACE")]
        sources: Vec<PathBuf>,

        /// Record shape (overrides config)
        #[arg(long)]
        shape: Option<RecordShape>,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Keep the last rows of each extracted table
    Tail {
        #[arg(required = true, value_name = "CSV")]
        sources: Vec<PathBuf>,

        /// Rows to keep (overrides config)
        #[arg(long)]
        window: Option<usize>,

        /// Query key whose trailing rows are trimmed first; repeatable (replaces config list)
        #[arg(long = "trim-exception", value_name = "KEY")]
        trim_exceptions: Vec<String>,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Count rule pairs that fire in the same iteration
    Pairs {
        #[arg(required = true, value_name = "RULES_DIR|CSV")]
        sources: Vec<PathBuf>,

        /// Number of pairs to keep (overrides config)
        #[arg(long)]
        top_k: Option<usize>,

        /// Only consider entries of this stage
        #[arg(long)]
        stage: Option<u32>,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Rank rules by total applications
    Rank {
        #[arg(required = true, value_name = "RULES_DIR|CSV")]
        sources: Vec<PathBuf>,

        /// Number of rules to keep, 0 for all (overrides config)
        #[arg(long)]
        top: Option<usize>,

        /// Only consider entries of this stage
        #[arg(long)]
        stage: Option<u32>,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Report cost reduction per query from extracted tables
    Reduce {
        #[arg(required = true, value_name = "CSV")]
        sources: Vec<PathBuf>,

        /// Stage whose first cost is the baseline (overrides config)
        #[arg(long)]
        initial_stage: Option<u32>,

        /// Shape of the extracted tables (overrides config)
        #[arg(long)]
        shape: Option<RecordShape>,

        /// Print JSON instead of CSV
        #[arg(long)]
        json: bool,
    },
}

impl Command {
    fn sources(&self) -> &[PathBuf] {
        match self {
            Command::Extract { sources, .. }
            | Command::Tail { sources, .. }
            | Command::Pairs { sources, .. }
            | Command::Rank { sources, .. }
            | Command::Reduce { sources, .. } => sources,
        }
    }

    /// Fold command-line overrides into `config`.
    fn apply_overrides(&self, config: &mut Config) {
        match self {
            Command::Extract {
                shape, output_dir, ..
            } => {
                if let Some(shape) = shape {
                    config.extract.shape = *shape;
                }
                if let Some(dir) = output_dir {
                    config.extract.output_dir = dir.clone();
                }
            }
            Command::Tail {
                window,
                trim_exceptions,
                output_dir,
                ..
            } => {
                if let Some(window) = window {
                    config.tail.window = *window;
                }
                if !trim_exceptions.is_empty() {
                    config.tail.trim_exceptions = trim_exceptions.clone();
                }
                if let Some(dir) = output_dir {
                    config.tail.output_dir = dir.clone();
                }
            }
            Command::Pairs {
                top_k, output_dir, ..
            } => {
                if let Some(top_k) = top_k {
                    config.pairs.top_k = *top_k;
                }
                if let Some(dir) = output_dir {
                    config.pairs.output_dir = dir.clone();
                }
            }
            Command::Rank {
                top, output_dir, ..
            } => {
                if let Some(top) = top {
                    config.rank.top = *top;
                }
                if let Some(dir) = output_dir {
                    config.rank.output_dir = dir.clone();
                }
            }
            Command::Reduce {
                initial_stage,
                shape,
                ..
            } => {
                if let Some(stage) = initial_stage {
                    config.reduction.initial_stage = *stage;
                }
                if let Some(shape) = shape {
                    config.extract.shape = *shape;
                }
            }
        }
    }

    /// One job per source, with the file it writes.
    fn jobs(&self, config: &Config) -> Vec<Job> {
        let (dir, suffix) = match self {
            Command::Extract { .. } => (&config.extract.output_dir, "_filtered.csv"),
            Command::Tail { .. } => (&config.tail.output_dir, "_tail.csv"),
            Command::Pairs { .. } => (&config.pairs.output_dir, "_rule_pairs.csv"),
            Command::Rank { .. } => (&config.rank.output_dir, "_rule_stats.csv"),
            Command::Reduce { .. } => {
                return self
                    .sources()
                    .iter()
                    .map(|s| Job::new(s, None))
                    .collect()
            }
        };
        self.sources()
            .iter()
            .map(|s| Job::new(s, Some(batch::output_path(dir, s, suffix))))
            .collect()
    }
}

fn init_tracing(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);
    tracing::debug!(?cli, "parsed CLI arguments");

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    cli.command.apply_overrides(&mut config);
    if let Err(e) = config.validate() {
        tracing::error!("{e}");
        return ExitCode::FAILURE;
    }

    let jobs = cli.command.jobs(&config);
    if cli.dry_run {
        print_plan(&config, &jobs);
        return ExitCode::SUCCESS;
    }

    let ok = match &cli.command {
        Command::Extract { .. } => run_extract(&config, jobs).await,
        Command::Tail { .. } => run_tail(&config, jobs).await,
        Command::Pairs { stage, .. } => run_pairs(&config, jobs, *stage).await,
        Command::Rank { stage, .. } => run_rank(&config, jobs, *stage).await,
        Command::Reduce { json, .. } => run_reduce(&config, jobs, *json).await,
    };
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn print_plan(config: &Config, jobs: &[Job]) {
    match toml::to_string_pretty(config) {
        Ok(text) => println!("{text}"),
        Err(e) => tracing::warn!("failed to render config: {e}"),
    }
    for job in jobs {
        match &job.output {
            Some(output) => println!("{} -> {}", job.source.display(), output.display()),
            None => println!("{}", job.source.display()),
        }
    }
    println!("Dry run, nothing written.");
}

/// Log the outcome of a batch and report whether every present source succeeded.
fn finish_batch<T>(report: &Result<BatchReport<T>, batch::BatchError>) -> bool {
    match report {
        Ok(report) => {
            for outcome in &report.outcomes {
                if let SourceOutcome::Failed { source, error } = outcome {
                    tracing::error!(source = %source.display(), "{error}");
                }
            }
            !report.any_failed()
        }
        Err(e) => {
            tracing::error!("{e}");
            false
        }
    }
}

fn output_of(job: &Job) -> Result<&Path, TableError> {
    job.output.as_deref().ok_or_else(|| TableError::Io {
        path: job.source.clone(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no output path"),
    })
}

async fn run_extract(config: &Config, jobs: Vec<Job>) -> bool {
    let parser = TraceParser::new(config.extract.shape);
    let report = batch::run_batch(jobs, move |job| {
        let output = output_of(job)?;
        let (records, stats) = parser.parse_file(&job.source).map_err(|e| TableError::Io {
            path: job.source.clone(),
            source: e,
        })?;
        table::write_records(output, parser.shape(), &records)?;
        tracing::info!(
            source = %job.source.display(),
            output = %output.display(),
            records = records.len(),
            "extracted"
        );
        Ok(stats)
    })
    .await;

    if let Ok(report) = &report {
        let total = report
            .done()
            .fold(ParseStats::default(), |mut total, (_, stats)| {
                total.lines += stats.lines;
                total.emitted += stats.emitted;
                total.dropped_partial += stats.dropped_partial;
                total.malformed_fields += stats.malformed_fields;
                total
            });
        tracing::info!(
            lines = total.lines,
            emitted = total.emitted,
            dropped = total.dropped_partial,
            malformed = total.malformed_fields,
            "extraction finished"
        );
    }
    finish_batch(&report)
}

async fn run_tail(config: &Config, jobs: Vec<Job>) -> bool {
    let selector = match config.tail.selector() {
        Ok(selector) => selector,
        Err(e) => {
            tracing::error!("{e}");
            return false;
        }
    };
    let report = batch::run_batch(jobs, move |job| {
        let output = output_of(job)?;
        let table = table::read_raw(&job.source)?;
        let source_id = job.source.to_string_lossy();
        let rows = selector.select(&table.rows, &source_id);
        table::write_raw(output, &table.headers, rows)?;
        tracing::info!(
            source = %job.source.display(),
            output = %output.display(),
            rows = rows.len(),
            "wrote tail window"
        );
        Ok(())
    })
    .await;
    finish_batch(&report)
}

async fn run_pairs(config: &Config, jobs: Vec<Job>, stage: Option<u32>) -> bool {
    let top_k = config.pairs.top_k;
    let report = batch::run_batch(jobs, move |job| {
        let output = output_of(job)?;
        let entries = rules::filter_stage(rules::load(&job.source)?, stage);
        let pairs = RuleCoOccurrenceMiner::new().mine(&entries, top_k);
        table::write_pairs(output, &pairs)?;
        tracing::info!(
            source = %job.source.display(),
            output = %output.display(),
            entries = entries.len(),
            pairs = pairs.len(),
            "wrote rule pairs"
        );
        Ok(())
    })
    .await;
    finish_batch(&report)
}

async fn run_rank(config: &Config, jobs: Vec<Job>, stage: Option<u32>) -> bool {
    let top = config.rank.top;
    let report = batch::run_batch(jobs, move |job| {
        let output = output_of(job)?;
        let entries = rules::filter_stage(rules::load(&job.source)?, stage);
        let mut ranked = rules::rank_rules(&entries);
        if top > 0 {
            ranked.truncate(top);
        }
        table::write_frequencies(output, stage, &ranked)?;
        tracing::info!(
            source = %job.source.display(),
            output = %output.display(),
            rules = ranked.len(),
            "wrote rule ranking"
        );
        Ok(())
    })
    .await;
    finish_batch(&report)
}

async fn run_reduce(config: &Config, jobs: Vec<Job>, json: bool) -> bool {
    let initial_stage = config.reduction.initial_stage;
    let shape = config.extract.shape;
    let report = batch::run_batch(jobs, move |job| {
        let records = table::read_records(&job.source, shape)?;
        let query = tail::query_key(&job.source.to_string_lossy()).to_string();
        let reduction = reduction::cost_reduction(&query, &records, initial_stage);
        if reduction.is_none() {
            tracing::warn!(
                source = %job.source.display(),
                initial_stage,
                "initial or final cost unavailable"
            );
        }
        Ok(reduction)
    })
    .await;

    let ok = finish_batch(&report);
    let Ok(report) = report else {
        return ok;
    };
    let reductions: Vec<CostReduction> = report
        .done()
        .filter_map(|(_, reduction)| reduction.clone())
        .collect();

    let printed = if json {
        serde_json::to_string_pretty(&reductions)
            .map(|text| println!("{text}"))
            .map_err(|e| e.to_string())
    } else {
        table::write_reductions(std::io::stdout().lock(), &reductions).map_err(|e| e.to_string())
    };
    if let Err(e) = printed {
        tracing::error!("failed to print cost reductions: {e}");
        return false;
    }
    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("optrace").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn overrides_replace_config_values() {
        let cli = parse(&[
            "tail",
            "a.csv",
            "--window",
            "2",
            "--trim-exception",
            "q9",
            "--trim-exception",
            "q10",
        ]);
        let mut config = Config::default();
        cli.command.apply_overrides(&mut config);
        assert_eq!(config.tail.window, 2);
        assert_eq!(config.tail.trim_exceptions, vec!["q9", "q10"]);
        assert_eq!(config.tail.output_dir, PathBuf::from("outputs/tail_window"));
    }

    #[test]
    fn shape_is_parsed_from_the_command_line() {
        let cli = parse(&["extract", "q1.txt", "--shape", "stage-scoped"]);
        let mut config = Config::default();
        cli.command.apply_overrides(&mut config);
        assert_eq!(config.extract.shape, RecordShape::StageScoped);
        assert!(Cli::try_parse_from(["optrace", "extract", "q1.txt", "--shape", "x"]).is_err());
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = parse(&["pairs", "logs", "--dry-run", "-v", "--stage", "2"]);
        assert!(cli.dry_run);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Pairs { stage: Some(2), .. }));
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["optrace", "-v", "-q", "rank", "logs"]).is_err());
    }

    #[test]
    fn jobs_name_outputs_per_command() {
        let config = Config::default();
        let cli = parse(&["extract", "traces/q3_data.txt"]);
        assert_eq!(
            cli.command.jobs(&config),
            vec![Job::new(
                "traces/q3_data.txt",
                Some(PathBuf::from("outputs/filtered_query_data/q3_data_filtered.csv"))
            )]
        );

        let cli = parse(&["rank", "out/q3_data"]);
        assert_eq!(
            cli.command.jobs(&config)[0].output,
            Some(PathBuf::from("outputs/rule_stats/q3_data_rule_stats.csv"))
        );

        let cli = parse(&["reduce", "a.csv", "b.csv"]);
        assert!(cli.command.jobs(&config).iter().all(|j| j.output.is_none()));
    }

    #[tokio::test]
    async fn extract_then_tail_end_to_end() {
        let dir = TempDir::new().unwrap();
        let trace = dir.path().join("q15_data.txt");
        let mut text = String::new();
        for i in 0..6 {
            text.push_str(&format!(
                "Stage 1\nIteração: {i}\nCusto atual: {}\nRelacionais: 3\nClasses-Total 9\n\
                 Mínimo: 1\nMáximo: 4\nMédia: 2.5\n",
                100 - i
            ));
        }
        std::fs::write(&trace, text).unwrap();

        let mut config = Config::default();
        config.extract.output_dir = dir.path().join("filtered");
        config.tail.output_dir = dir.path().join("tail");

        let extract = Command::Extract {
            sources: vec![trace],
            shape: None,
            output_dir: None,
        };
        assert!(run_extract(&config, extract.jobs(&config)).await);
        let filtered = dir.path().join("filtered/q15_data_filtered.csv");
        let records = table::read_records(&filtered, RecordShape::PerIteration).unwrap();
        assert_eq!(records.len(), 6);

        config.tail.window = 2;
        let tail = Command::Tail {
            sources: vec![filtered],
            window: None,
            trim_exceptions: Vec::new(),
            output_dir: None,
        };
        assert!(run_tail(&config, tail.jobs(&config)).await);
        let kept = table::read_records(
            &dir.path().join("tail/q15_data_filtered_tail.csv"),
            RecordShape::PerIteration,
        )
        .unwrap();
        // q15 is a default trim exception: the last two rows are skipped.
        let iterations: Vec<Option<u32>> = kept.iter().map(|r| r.iteration).collect();
        assert_eq!(iterations, vec![Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn failing_source_fails_the_run() {
        let dir = TempDir::new().unwrap();
        let bad = dir.path().join("stage_1_rules_application.csv");
        std::fs::write(&bad, "Stage,Rule_Name\n1,merge\n").unwrap();
        let mut config = Config::default();
        config.pairs.output_dir = dir.path().join("pairs");

        let pairs = Command::Pairs {
            sources: vec![bad, dir.path().join("absent")],
            top_k: None,
            stage: None,
            output_dir: None,
        };
        assert!(!run_pairs(&config, pairs.jobs(&config), None).await);
    }

    #[tokio::test]
    async fn rank_for_one_stage_records_the_stage() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("q2_data");
        std::fs::create_dir(&logs).unwrap();
        let header = "Stage,Internal_Iteration,Class_Count,Node_Count,Rule_Name,Applications\n";
        std::fs::write(
            logs.join("stage_1_rules_application.csv"),
            format!("{header}1,0,1,1,merge,5\n"),
        )
        .unwrap();
        std::fs::write(
            logs.join("stage_2_rules_application.csv"),
            format!("{header}2,0,1,1,split,4\n2,1,1,1,split,1\n"),
        )
        .unwrap();
        let mut config = Config::default();
        config.rank.output_dir = dir.path().join("stats");

        let rank = Command::Rank {
            sources: vec![logs],
            top: None,
            stage: Some(2),
            output_dir: None,
        };
        assert!(run_rank(&config, rank.jobs(&config), Some(2)).await);
        let written =
            std::fs::read_to_string(dir.path().join("stats/q2_data_rule_stats.csv")).unwrap();
        assert_eq!(written, "Stage,Rule_Name,Total_Applications,Rank\n2,split,5,1\n");
    }

    #[test]
    fn reduce_shape_overrides_config() {
        let cli = parse(&["reduce", "a.csv", "--shape", "stage-scoped"]);
        let mut config = Config::default();
        cli.command.apply_overrides(&mut config);
        assert_eq!(config.extract.shape, RecordShape::StageScoped);
    }

    #[tokio::test]
    async fn missing_sources_only_warn() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.rank.output_dir = dir.path().join("stats");
        let rank = Command::Rank {
            sources: vec![dir.path().join("absent")],
            top: None,
            stage: None,
            output_dir: None,
        };
        assert!(run_rank(&config, rank.jobs(&config), None).await);
    }
}
