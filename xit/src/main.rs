use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use flexi_logger::{Logger, LoggerHandle};
use log::{debug, info};
use xit::summary::{self, StatusCounts};
use xit::{Clock, Document, FixedClock, Status, SystemClock, parse, serialize};

const XIT_EXTENSION: &str = "xit";

#[derive(Debug, Parser)]
#[command(name = "xit", about = "Tooling for xit! task lists", version)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Parse xit! files and print their structure.
    Parse(ParseArgs),

    /// Rewrite xit! files in canonical form.
    Format(FormatArgs),

    /// List items whose due date has passed.
    Overdue(OverdueArgs),

    /// Count items per status.
    Stats(StatsArgs),

    /// Create a new xit! file with a starter group.
    New(NewArgs),
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// xit! files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of a debug representation.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// xit! files or directories to format.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct OverdueArgs {
    /// xit! files or directories to scan.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Reference date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    today: Option<NaiveDate>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    emit: OutputFormat,
}

#[derive(Debug, Args)]
struct StatsArgs {
    /// xit! files or directories to summarise.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    emit: OutputFormat,
}

#[derive(Debug, Args)]
struct NewArgs {
    /// Path of the file to create.
    path: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _logger = init_logging(cli.verbose)?;
    match cli.command {
        Commands::Parse(args) => handle_parse(args),
        Commands::Format(args) => handle_format(args),
        Commands::Overdue(args) => handle_overdue(args),
        Commands::Stats(args) => handle_stats(args),
        Commands::New(args) => handle_new(args),
    }
}

/// Logs go to stderr; `RUST_LOG` overrides the level chosen by `--verbose`.
fn init_logging(verbose: bool) -> Result<LoggerHandle> {
    let level = if verbose { "debug" } else { "warn" };
    Logger::try_with_env_or_str(level)
        .context("configuring logger")?
        .log_to_stderr()
        .start()
        .context("starting logger")
}

fn read_document(path: &Path) -> Result<Document> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    Ok(parse(&text))
}

/// Serialized text with a terminating newline, as written to disk.
fn file_text(doc: &Document) -> String {
    let mut text = serialize(doc);
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

fn load_all(inputs: &[PathBuf]) -> Result<Vec<(PathBuf, Document)>> {
    let expanded = expand_inputs(inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no .xit files found in the provided inputs");
    }
    let mut parsed = Vec::new();
    for path in expanded {
        debug!("Parsing {:?}", path);
        let doc = read_document(&path)?;
        parsed.push((path, doc));
    }
    Ok(parsed)
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let parsed = load_all(&inputs)?;

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            document: &'a Document,
        }

        let payload: Vec<JsonOutput<'_>> = parsed
            .iter()
            .map(|(path, doc)| JsonOutput {
                path: path.display().to_string(),
                document: doc,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, doc)) in parsed.iter().enumerate() {
            if parsed.len() > 1 {
                println!("== {} ==", path.display());
            }
            println!("{:#?}", doc);
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
    }
    Ok(())
}

fn handle_format(args: FormatArgs) -> Result<()> {
    let FormatArgs { inputs, in_place } = args;
    let parsed = load_all(&inputs)?;
    let many = parsed.len() > 1;

    for (idx, (path, doc)) in parsed.iter().enumerate() {
        let formatted = file_text(doc);
        if in_place {
            debug!("Formatting {:?} in place", path);
            fs::write(path, formatted.as_bytes())
                .with_context(|| format!("writing {:?}", path))?;
        } else {
            if many {
                if idx > 0 {
                    println!();
                }
                println!("== {} ==", path.display());
            }
            print!("{formatted}");
        }
    }
    Ok(())
}

fn handle_overdue(args: OverdueArgs) -> Result<()> {
    let OverdueArgs {
        inputs,
        today,
        emit,
    } = args;
    let clock: Box<dyn Clock> = match today {
        Some(date) => Box::new(FixedClock(date)),
        None => Box::new(SystemClock),
    };
    info!("Checking due dates against {}", clock.today());

    let parsed = load_all(&inputs)?;

    match emit {
        OutputFormat::Json => {
            #[derive(serde::Serialize)]
            struct JsonOutput<'a> {
                path: String,
                overdue: Vec<summary::OverdueItem<'a>>,
            }

            let payload: Vec<JsonOutput<'_>> = parsed
                .iter()
                .map(|(path, doc)| JsonOutput {
                    path: path.display().to_string(),
                    overdue: summary::overdue_items(doc, clock.as_ref()),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            let mut found = false;
            for (path, doc) in &parsed {
                for entry in summary::overdue_items(doc, clock.as_ref()) {
                    found = true;
                    println!("{}", overdue_line(path, &entry));
                }
            }
            if !found {
                eprintln!("No overdue items found for the provided inputs.");
            }
        }
    }
    Ok(())
}

fn overdue_line(path: &Path, entry: &summary::OverdueItem<'_>) -> String {
    let group = entry.group_title.unwrap_or("-");
    format!(
        "{:<12} {} {} [{}] {}",
        entry.due.raw,
        path.display(),
        entry.item.status.checkbox(),
        group,
        entry.item.description()
    )
}

fn handle_stats(args: StatsArgs) -> Result<()> {
    let StatsArgs { inputs, emit } = args;
    let parsed = load_all(&inputs)?;

    match emit {
        OutputFormat::Json => {
            #[derive(serde::Serialize)]
            struct JsonOutput {
                path: String,
                counts: StatusCounts,
            }

            let payload: Vec<JsonOutput> = parsed
                .iter()
                .map(|(path, doc)| JsonOutput {
                    path: path.display().to_string(),
                    counts: doc.status_counts(),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        OutputFormat::Text => {
            for (path, doc) in &parsed {
                println!("{}", stats_line(path, &doc.status_counts()));
            }
        }
    }
    Ok(())
}

fn stats_line(path: &Path, counts: &StatusCounts) -> String {
    let parts: Vec<String> = counts
        .iter()
        .map(|(status, n)| format!("{} {}", status_label(status), n))
        .collect();
    format!("{}: {} ({} total)", path.display(), parts.join(", "), counts.total())
}

fn status_label(status: Status) -> String {
    status.display_name().to_lowercase()
}

fn handle_new(args: NewArgs) -> Result<()> {
    let NewArgs { path } = args;
    if path.exists() {
        anyhow::bail!("{:?} already exists", path);
    }
    let text = file_text(&Document::starter());
    fs::write(&path, text.as_bytes()).with_context(|| format!("writing {:?}", path))?;
    println!("Wrote new task list to {:?}", path);
    Ok(())
}

fn has_xit_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext == XIT_EXTENSION)
        .unwrap_or(false)
}

fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let explicit_file = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?
            .is_file();

        let mut found = Vec::new();
        walk(&canonical, &mut found, &mut visited)?;
        found.sort();
        for file in found {
            if has_xit_extension(&file) {
                debug!("Adding xit file {:?}", file);
                out.push(file);
            } else if explicit_file {
                anyhow::bail!("{:?} is not a .xit file", file);
            }
        }
    }
    Ok(out)
}

/// Collects regular files under `path`, skipping symlinks and anything already visited.
fn walk(path: &Path, found: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }

    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        debug!("Scanning directory {:?}", canonical);
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            walk(&entry.path(), found, visited)?;
        }
    } else if metadata.is_file() {
        found.push(canonical);
    }
    Ok(())
}
