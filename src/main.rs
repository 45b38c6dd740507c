//! courier - cancellable, observable file operations from the terminal.
//!
//! Usage:
//!   courier copy -t DIR SOURCES...    Copy into DIR
//!   courier move -t DIR SOURCES...    Move into DIR
//!   courier link -t DIR SOURCES...    Create symlinks in DIR
//!   courier trash PATHS...            Move to the trash
//!   courier delete PATHS...           Delete permanently
//!   courier count PATHS...            Count items and bytes
//!   courier --help                    Show help

use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{bail, Context, Result};
use tokio::sync::{oneshot, Notify};
use tracing_subscriber::EnvFilter;

use courier_core::{JobConfig, LocalFs, TrashBackend};
use courier_ops::{
    Engine, Job, JobEvent, JobState, JobSummary, ProgressSnapshot, Question, QuestionKind,
    Response, ThumbnailCache,
};

#[derive(Parser)]
#[command(
    name = "courier",
    version,
    about = "Cancellable, observable file operations",
    long_about = "courier copies, moves, links, trashes, deletes and counts files as \
                  cancellable jobs.\n\n\
                  Conflicts and errors are asked about on the terminal unless a policy \
                  is given. Press Ctrl-C to cancel a running job cleanly."
)]
struct Cli {
    #[command(flatten)]
    options: Options,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct Options {
    /// What to do when a destination already exists
    #[arg(short = 'c', long, global = true, default_value = "ask")]
    on_conflict: ConflictPolicy,

    /// Give up on an unanswered question after this many seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Copy chunk size (e.g., "64K", "1M")
    #[arg(long, global = true, default_value = "1M")]
    chunk_size: String,

    /// Skip the free-space check before copying
    #[arg(long, global = true)]
    no_space_check: bool,

    /// Keep the thumbnail cache in this directory in sync
    #[arg(long, global = true)]
    thumbnails: Option<PathBuf>,

    /// Trash into this directory instead of the desktop trash
    #[arg(long, global = true)]
    trash_dir: Option<PathBuf>,

    /// Do not render progress
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Copy files and folders into a directory
    Copy(Transfer),

    /// Move files and folders into a directory
    Move(Transfer),

    /// Create symbolic links to files and folders in a directory
    Link(Transfer),

    /// Move files and folders to the trash
    Trash {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Delete files and folders permanently
    Delete {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Count items and bytes below paths
    Count {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Follow symbolic links
        #[arg(short = 'L', long)]
        follow_symlinks: bool,

        /// Print the job summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct Transfer {
    /// Destination directory
    #[arg(short, long)]
    target_dir: PathBuf,

    /// Files and folders to process
    #[arg(required = true)]
    sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum ConflictPolicy {
    #[default]
    Ask,
    Skip,
    Replace,
    Rename,
}

impl ConflictPolicy {
    fn pinned(self) -> Option<Response> {
        match self {
            Self::Ask => None,
            Self::Skip => Some(Response::SkipAll),
            Self::Replace => Some(Response::ReplaceAll),
            Self::Rename => Some(Response::RenameAll),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;
    init_logging();

    let cli = Cli::parse();
    let engine = build_engine(&cli.options, &cli.command)?;

    let (job, json) = match cli.command {
        Command::Copy(args) => (engine.copy(args.sources, args.target_dir)?, false),
        Command::Move(args) => (engine.move_to(args.sources, args.target_dir)?, false),
        Command::Link(args) => (engine.link(args.sources, args.target_dir)?, false),
        Command::Trash { paths } => (engine.trash(paths)?, false),
        Command::Delete { paths, yes } => {
            if !yes && !confirm_delete(&paths)? {
                eprintln!("Nothing deleted.");
                return Ok(ExitCode::SUCCESS);
            }
            (engine.delete(paths)?, false)
        }
        Command::Count { paths, json, .. } => (engine.deep_count(paths)?, json),
    };

    if let Some(response) = cli.options.on_conflict.pinned() {
        job.pin_answer(QuestionKind::Replace, response)?;
    }

    let summary = run(&job, !cli.options.quiet && io::stderr().is_terminal()).await?;
    report(&summary, json)?;

    Ok(match summary.state {
        JobState::Finished if summary.errors.is_empty() => ExitCode::SUCCESS,
        JobState::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    })
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("COURIER_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("courier=info,warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn build_engine(options: &Options, command: &Command) -> Result<Engine> {
    let follow_symlinks = matches!(command, Command::Count { follow_symlinks: true, .. });
    let config = JobConfig::builder()
        .chunk_size(parse_size(&options.chunk_size)?)
        .ask_timeout(options.timeout.map(Duration::from_secs))
        .check_free_space(!options.no_space_check)
        .follow_symlinks(follow_symlinks)
        .build()
        .context("Invalid job configuration")?;

    let trash = match &options.trash_dir {
        Some(dir) => TrashBackend::Directory(dir.clone()),
        None => TrashBackend::System,
    };
    let mut engine = Engine::new(Arc::new(LocalFs::new().with_trash(trash))).with_config(config);

    if let Some(dir) = &options.thumbnails {
        let cache = ThumbnailCache::open(dir)
            .with_context(|| format!("Cannot open thumbnail cache at {}", dir.display()))?;
        engine = engine.with_thumbnails(Arc::new(cache));
    }
    Ok(engine)
}

/// Drive `job` until it finishes, prompting for every question.
async fn run(job: &Job, show_progress: bool) -> Result<JobSummary> {
    let mut events = job.events()?;
    job.start()?;

    let interrupted = Arc::new(Notify::new());
    let listener = tokio::spawn({
        let interrupted = Arc::clone(&interrupted);
        async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupted.notify_one();
            }
        }
    });

    let mut line = ProgressLine::new(show_progress);
    let mut summary = None;
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = interrupted.notified() => {
                line.clear();
                eprintln!("Cancelling...");
                job.cancel();
                continue;
            }
        };
        let Some(event) = event else { break };

        match event {
            JobEvent::Info(_) => {}
            JobEvent::Progress(progress) => line.draw(&progress),
            JobEvent::Error(error) => {
                line.clear();
                eprintln!("error: {error}");
            }
            JobEvent::Question(question) => {
                line.clear();
                let response = tokio::select! {
                    answer = ask(question) => answer,
                    _ = interrupted.notified() => Response::Cancel,
                };
                if response == Response::Cancel {
                    job.cancel();
                } else if let Err(e) = job.respond(response) {
                    tracing::debug!(error = %e, "answer not delivered");
                }
            }
            JobEvent::Finished(done) => {
                line.clear();
                summary = Some(done);
            }
        }
    }
    listener.abort();

    let joined = job.wait();
    match summary.or(joined) {
        Some(summary) => Ok(summary),
        None => bail!("Job {} ended without a summary", job.id()),
    }
}

/// Prompt on the terminal from a detached thread so a pending read never
/// keeps the process alive.
async fn ask(question: Question) -> Response {
    let (tx, rx) = oneshot::channel();
    let spawned = thread::Builder::new()
        .name("courier-prompt".to_string())
        .spawn(move || {
            let _ = tx.send(prompt(&question));
        });
    if spawned.is_err() {
        return Response::Cancel;
    }
    rx.await.unwrap_or(Response::Cancel)
}

fn prompt(question: &Question) -> Response {
    let stdin = io::stdin();
    loop {
        eprintln!("{}", question.message);
        for (i, response) in question.responses.iter().enumerate() {
            eprintln!("  {}) {}", i + 1, response);
        }
        eprint!("> ");
        let _ = io::stderr().flush();

        let mut input = String::new();
        match stdin.lock().read_line(&mut input) {
            Ok(0) | Err(_) => return Response::Cancel,
            Ok(_) => {}
        }
        if let Some(response) = parse_response(input.trim(), &question.responses) {
            return response;
        }
        eprintln!("Please pick one of the listed answers.");
    }
}

/// Accept a listed number or a response name, ignoring case.
fn parse_response(input: &str, offered: &[Response]) -> Option<Response> {
    if let Ok(n) = input.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| offered.get(i)).copied();
    }
    let wanted: String = input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase();
    offered
        .iter()
        .find(|r| r.to_string().to_lowercase() == wanted)
        .copied()
}

fn confirm_delete(paths: &[PathBuf]) -> Result<bool> {
    eprint!(
        "Permanently delete {} item(s)? This cannot be undone. [y/N] ",
        paths.len()
    );
    io::stderr().flush()?;
    let mut input = String::new();
    io::stdin().lock().read_line(&mut input)?;
    Ok(matches!(input.trim(), "y" | "Y" | "yes"))
}

/// Single-line progress display on stderr.
struct ProgressLine {
    enabled: bool,
    drawn: bool,
}

impl ProgressLine {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            drawn: false,
        }
    }

    fn draw(&mut self, progress: &ProgressSnapshot) {
        if !self.enabled {
            return;
        }
        let percent = match progress.percentage() {
            Some(p) => format!("{p:>5.1}%"),
            None => "  ... ".to_string(),
        };
        let bytes = progress.bytes_done + progress.item_bytes_done;
        eprint!(
            "\r\x1b[2K{percent} {}/{} items, {} of {} ({}/s) {}",
            progress.items_processed(),
            progress.items_total,
            format_size(bytes),
            format_size(progress.bytes_total),
            format_size(progress.bytes_per_second() as u64),
            truncate(&progress.current_item, 40),
        );
        let _ = io::stderr().flush();
        self.drawn = true;
    }

    fn clear(&mut self) {
        if self.drawn {
            eprint!("\r\x1b[2K");
            let _ = io::stderr().flush();
            self.drawn = false;
        }
    }
}

fn report(summary: &JobSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    if let Some(count) = &summary.count {
        println!("{}", "─".repeat(50));
        println!(
            " {} files, {} directories, {} symlinks",
            count.files, count.directories, count.symlinks
        );
        println!(" Total size:   {}", format_size(count.total_size));
        println!(" Largest file: {}", format_size(count.largest_file));
        if count.unreadable > 0 {
            println!(" Unreadable:   {}", count.unreadable);
        }
        println!("{}", "─".repeat(50));
    }

    eprintln!("{} ({})", summary.summary(), format_size(summary.bytes_done));
    for record in &summary.trashed {
        eprintln!("Moved to trash: {}", record.original_path.display());
    }
    for path in &summary.new_files {
        println!("{}", path.display());
    }
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

/// Truncate a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 1).collect();
        format!("{head}…")
    }
}

/// Parse a size string (e.g., "64K", "1M", "4096").
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim().to_uppercase();
    let digits = s.trim_end_matches(|c: char| !c.is_ascii_digit() && c != '.');
    let unit = &s[digits.len()..];

    let multiplier: u64 = match unit {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        other => bail!("Unknown size unit: {other}"),
    };
    let num: f64 = digits
        .parse()
        .with_context(|| format!("Invalid size: {s}"))?;
    Ok((num * multiplier as f64) as u64)
}
