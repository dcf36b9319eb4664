//! CLI binary for imgmill.
//!
//! A thin retry-orchestrator harness over the library crate: it loads a
//! batch event (or builds one from `--url` flags), repeatedly calls
//! [`imgmill::advance`] honouring the event's `retryWait`, and stops when
//! the batch completes or the attempt ceiling is reached. The library
//! itself never sleeps and never loops — that is this binary's job.

use anyhow::{bail, Context, Result};
use clap::Parser;
use imgmill::{
    advance, BatchConfig, BatchEvent, BatchProgressCallback, FsStore, ImageOutcome, ImageStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Process a batch of remote images into resized derivatives.
#[derive(Parser, Debug)]
#[command(name = "imgmill", version, about)]
struct Cli {
    /// Path to a batch event JSON file, or '-' for stdin.
    /// Omit when building an ad-hoc event with --url.
    event: Option<PathBuf>,

    /// Add a source URL to an ad-hoc batch (repeatable).
    #[arg(long = "url", value_name = "URL")]
    urls: Vec<String>,

    /// Batch cache key (hash seed) for ad-hoc batches; overrides the
    /// event's cacheKey when given.
    #[arg(long, env = "IMGMILL_CACHE_KEY")]
    cache_key: Option<String>,

    /// Root directory for the filesystem object store.
    #[arg(long, default_value = "./imgmill-store", value_name = "DIR")]
    store_dir: PathBuf,

    /// Override the event's concurrency.
    #[arg(long, short = 'c')]
    concurrency: Option<usize>,

    /// Maximum invocations before the batch is declared failed.
    #[arg(long, default_value_t = 25)]
    max_attempts: u32,

    /// Run a single invocation and exit, printing the returned event.
    #[arg(long)]
    once: bool,

    /// Skip the retryWait sleep between invocations (useful in scripts
    /// that schedule their own retries).
    #[arg(long)]
    no_wait: bool,

    /// Write the final event JSON here instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbose logging (-v: info, -vv: debug).
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar per invocation, a log line per image.
/// Images complete out of order under concurrency; the bar only counts.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::hidden();
        Arc::new(Self { bar })
    }
}

impl BatchProgressCallback for CliProgress {
    fn on_batch_start(&self, total: usize, pending: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.green/238}] {pos:>3}/{len} images  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        self.bar.set_style(style);
        self.bar.set_length(pending as u64);
        self.bar.set_position(0);
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.enable_steady_tick(Duration::from_millis(80));
        if pending < total {
            self.bar.println(dim(&format!(
                "  {} of {total} images already done",
                total - pending
            )));
        }
    }

    fn on_image_done(&self, outcome: &ImageOutcome) {
        let line = match &outcome.status {
            ImageStatus::Done => format!("  {} {}", green("✓"), outcome.url),
            ImageStatus::Skipped => {
                format!("  {} {} {}", green("✓"), outcome.url, dim("(cached)"))
            }
            ImageStatus::Failed(e) => format!("  {} {} — {e}", red("✗"), outcome.url),
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize) {
        self.bar.finish_and_clear();
    }
}

// ── Event loading / writing ──────────────────────────────────────────────────

fn load_event(cli: &Cli) -> Result<BatchEvent> {
    let mut event = match (&cli.event, cli.urls.is_empty()) {
        (Some(path), _) => {
            let raw = if path.as_os_str() == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("reading event from stdin")?;
                buf
            } else {
                std::fs::read_to_string(path)
                    .with_context(|| format!("reading event file '{}'", path.display()))?
            };
            serde_json::from_str(&raw).context("parsing batch event JSON")?
        }
        (None, false) => {
            let cache_key = cli
                .cache_key
                .clone()
                .context("--cache-key is required when building a batch from --url")?;
            BatchEvent::new(cache_key, cli.urls.iter().cloned())
        }
        (None, true) => {
            bail!("nothing to do: pass an event file (or '-') or at least one --url")
        }
    };

    if let Some(key) = &cli.cache_key {
        event.cache_key = key.clone();
    }
    if let Some(c) = cli.concurrency {
        event.concurrency = c.max(1);
    }
    if event.images.is_empty() {
        bail!("batch event contains no images");
    }
    Ok(event)
}

fn write_event(event: &BatchEvent, output: Option<&PathBuf>) -> Result<()> {
    let json = serde_json::to_string_pretty(event).context("serialising event")?;
    match output {
        Some(path) => {
            // Atomic write: temp file + rename, so a watching scheduler
            // never reads a half-written event.
            let tmp = path.with_extension("json.tmp");
            std::fs::write(&tmp, &json)
                .with_context(|| format!("writing '{}'", tmp.display()))?;
            std::fs::rename(&tmp, path)
                .with_context(|| format!("renaming into '{}'", path.display()))?;
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "imgmill=info",
        _ => "imgmill=debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut event = load_event(&cli)?;
    let progress = CliProgress::new();
    let config = BatchConfig::builder()
        .storage(Arc::new(FsStore::new(&cli.store_dir)))
        .progress_callback(progress)
        .build()?;

    eprintln!(
        "{} {} ({} images → {})",
        cyan("◆"),
        bold("imgmill batch"),
        event.images.len(),
        cli.store_dir.display()
    );

    if cli.once {
        // Single harness step: the returned event is the whole output;
        // the caller's scheduler owns the retry decision.
        event = advance(event, &config).await?;
        write_event(&event, cli.output.as_ref())?;
        return Ok(());
    }

    let max_attempts = cli.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        event = advance(event, &config).await?;

        if event.is_complete() {
            eprintln!(
                "{} {}",
                green("✓"),
                bold(&format!(
                    "Batch complete after {attempt} invocation{}",
                    if attempt == 1 { "" } else { "s" }
                ))
            );
            write_event(&event, cli.output.as_ref())?;
            return Ok(());
        }

        let pending = event.pending();
        eprintln!(
            "{} attempt {attempt}/{max_attempts}: {pending} image{} still failing",
            red("✗"),
            if pending == 1 { "" } else { "s" }
        );

        if attempt == max_attempts {
            break;
        }
        if let (false, Some(wait)) = (cli.no_wait, event.retry_wait) {
            eprintln!("{}", dim(&format!("  waiting {wait}s before retry…")));
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }

    // Terminal failure: surface the event (it is the diagnostic record)
    // and the failing URLs, then exit non-zero.
    write_event(&event, cli.output.as_ref())?;
    for job in event.images.iter().filter(|j| !j.success) {
        eprintln!("  {} {}", red("✗"), job.url);
    }
    bail!(
        "batch failed permanently: {} of {} images unsuccessful after {} invocation(s)",
        event.pending(),
        event.images.len(),
        max_attempts
    );
}
