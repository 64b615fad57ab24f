use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use regscout::{
    config::{SearchConfig, SearchCriteria},
    progress::ProgressFn,
    results::{MatchField, MatchLocation, SearchReport, SearchResult},
    search::SearchEngine,
    store::{KeyStore, MemoryStore, ValueType},
    SearchError,
};
use std::io::{self, IsTerminal, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use tracing::debug;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, SearchError>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a store snapshot for keys, value names and value data
    Search(CliSearchArgs),
    /// List the root keys of a store snapshot
    Roots {
        /// Store snapshot (JSON, or YAML by extension)
        snapshot: PathBuf,
    },
}

#[derive(Args)]
struct CliSearchArgs {
    /// Store snapshot (JSON, or YAML by extension)
    snapshot: PathBuf,

    /// Text, hex bytes, or regular expression to search for
    query: Option<String>,

    /// Match key names (default: keys, names and data)
    #[arg(long)]
    keys: bool,

    /// Match value names
    #[arg(long)]
    names: bool,

    /// Match value data
    #[arg(long)]
    data: bool,

    /// Case-sensitive matching
    #[arg(short = 'c', long)]
    match_case: bool,

    /// The whole name or data must match
    #[arg(short = 'w', long)]
    whole: bool,

    /// Treat the query as a regular expression
    #[arg(short = 'r', long)]
    regex: bool,

    /// Only search the starting keys themselves
    #[arg(long)]
    no_recurse: bool,

    /// Key to start from (repeatable; default: every root key)
    #[arg(short = 's', long = "start")]
    start: Vec<String>,

    /// Skip keys whose path contains this text (repeatable)
    #[arg(short = 'x', long = "exclude")]
    exclude: Vec<String>,

    /// Only match values of this type, e.g. REG_SZ or dword (repeatable)
    #[arg(short = 't', long = "type")]
    types: Vec<ValueType>,

    /// Minimum value data size in bytes
    #[arg(long)]
    min_size: Option<u64>,

    /// Maximum value data size in bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Only keys written at or after this time (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_time)]
    modified_after: Option<DateTime<Utc>>,

    /// Only keys written at or before this time (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_time)]
    modified_before: Option<DateTime<Utc>>,

    /// Stop after the first match
    #[arg(long)]
    first: bool,

    /// Number of worker threads
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    /// Show only statistics
    #[arg(long)]
    stats: bool,

    /// Configuration file layered over the global and local ones
    #[arg(long)]
    config: Option<PathBuf>,
}

impl CliSearchArgs {
    fn to_config(&self, log_level: Option<&str>) -> SearchConfig {
        let any_target = self.keys || self.names || self.data;
        let criteria = SearchCriteria {
            query: self.query.clone().unwrap_or_default(),
            search_keys: !any_target || self.keys,
            search_value_names: !any_target || self.names,
            search_value_data: !any_target || self.data,
            recursive: !self.no_recurse,
            min_size: self.min_size,
            max_size: self.max_size,
            modified_after: self.modified_after,
            modified_before: self.modified_before,
            value_types: self.types.clone(),
            start_paths: self.start.clone(),
            exclude_paths: self.exclude.clone(),
            ..SearchCriteria::default()
        };

        let mut config = SearchConfig {
            criteria,
            thread_count: self.threads,
            ..SearchConfig::default()
        };
        config.criteria.options.match_case = self.match_case;
        config.criteria.options.match_whole = self.whole;
        config.criteria.options.regex = self.regex;
        if let Some(level) = log_level {
            config.log_level = level.to_string();
        }
        config
    }
}

fn parse_time(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(time) = DateTime::parse_from_rfc3339(s) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|midnight| Utc.from_utc_datetime(&midnight))
        .ok_or_else(|| format!("invalid time '{}': expected YYYY-MM-DD or RFC 3339", s))
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    run()
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Search(args) => {
            let cli_config = args.to_config(cli.log_level.as_deref());
            let mut config =
                SearchConfig::load_from(args.config.as_deref())?.merge_with_cli(cli_config);
            init_tracing(&config.log_level);

            let store = MemoryStore::load(&args.snapshot)?;
            debug!("Loaded {} keys from {}", store.len(), args.snapshot.display());
            if config.criteria.start_paths.is_empty() {
                config.criteria.start_paths = store.root_paths();
            }

            let bar = (!args.json && io::stderr().is_terminal()).then(progress_bar);
            let report_progress = |searched: u64, total: u64| {
                if let Some(bar) = &bar {
                    bar.set_length(total);
                    bar.set_position(searched);
                }
            };
            let on_progress: &ProgressFn<'_> = &report_progress;

            let engine = SearchEngine::with_options(&store, config.engine_options());
            let report = engine.collect(
                &config.criteria,
                &AtomicBool::new(false),
                bar.is_some().then_some(on_progress),
                args.first,
            );
            if let Some(bar) = &bar {
                bar.finish_and_clear();
            }
            let report = report.map_err(|e| {
                if e.is_criteria_error() {
                    eprintln!("{} {}", "Search not started:".yellow(), e);
                }
                e
            })?;

            if args.json {
                let mut stdout = io::stdout().lock();
                serde_json::to_writer_pretty(&mut stdout, &report).map_err(io::Error::from)?;
                writeln!(stdout)?;
            } else {
                print_search_results(&report, args.stats);
            }
            Ok(())
        }
        Commands::Roots { snapshot } => {
            init_tracing(cli.log_level.as_deref().unwrap_or("warn"));
            let store = MemoryStore::load(&snapshot)?;
            for root in store.root_paths() {
                println!("{}", root);
            }
            Ok(())
        }
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    let template = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} keys";
    if let Ok(style) = ProgressStyle::default_bar().template(template) {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar
}

/// Renders `text`, highlighting the located match when it lies in `field`.
fn highlight(
    text: &str,
    location: &MatchLocation,
    field: MatchField,
    paint: fn(&str) -> ColoredString,
) -> String {
    if location.field != field || !location.is_positioned() {
        return paint(text).to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let start = location.start.min(chars.len());
    let end = (location.start + location.len).min(chars.len());
    let before: String = chars[..start].iter().collect();
    let matched: String = chars[start..end].iter().collect();
    let after: String = chars[end..].iter().collect();
    format!("{}{}{}", paint(&before), matched.red().bold(), paint(&after))
}

fn print_result(result: &SearchResult) {
    let name = highlight(&result.display_name, &result.location, MatchField::Name, |s| s.green());
    let data = highlight(&result.data_text, &result.location, MatchField::Data, |s| s.normal());
    println!(
        "  {}  {}  {}  {}",
        name,
        result.type_label.dimmed(),
        data,
        format!("({})", result.size_text).dimmed()
    );
}

fn print_search_results(report: &SearchReport, stats_only: bool) {
    let stats = &report.stats;
    if stats_only {
        println!(
            "Found {} matches in {} keys ({} discovered) using {} threads in {:.2?}",
            stats.results, stats.keys_searched, stats.keys_total, stats.threads, stats.elapsed
        );
        return;
    }

    let mut current: Option<&str> = None;
    for result in &report.results {
        if result.is_key {
            println!(
                "\n{} {}",
                highlight(&result.key_path, &result.location, MatchField::Path, |s| s.blue()),
                "[key]".dimmed()
            );
            current = Some(result.key_path.as_str());
            continue;
        }
        if current != Some(result.key_path.as_str()) {
            println!("\n{}", result.key_path.blue());
            current = Some(result.key_path.as_str());
        }
        print_result(result);
    }

    let suffix = if stats.stopped { " (stopped early)" } else { "" };
    println!(
        "\nFound {} matches in {} keys{}",
        stats.results, stats.keys_searched, suffix
    );
}
