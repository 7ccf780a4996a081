//! blocksync: keep block-level fingerprints of a directory tree up to date
//!
//! - One-shot scan of every regular file
//! - Live watching with per-directory watches
//! - Minimal record rewrites: only changed blocks are written

mod logging;
mod progress;

use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Args, Parser, Subcommand, ValueEnum, builder::Styles};
use color_eyre::Result;
use serde::Serialize;
use tracing::{debug, info};

use blocksync_core::{DigestEncoding, Engine, FingerprintRecord, ScanSummary, TreeConfig, record_name};

use crate::progress::{Status, print_status};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "blocksync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Keep block-level fingerprints of a directory tree up to date")]
#[command(long_about = r#"
blocksync splits every file under a root into fixed-size blocks and keeps a
record of their SHA-256 digests in a reserved metadata directory.

Examples:
  blocksync scan ./project                  Fingerprint every file once
  blocksync watch ./project                 Scan, then follow changes
  blocksync inspect ./project src/main.rs   Show a file's record
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write a detailed trace log to the temp directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Root plus overrides for `.blocksync.toml`
#[derive(Args, Debug)]
struct TreeArgs {
    /// Directory tree to fingerprint
    root: PathBuf,

    /// Block size in bytes
    #[arg(long)]
    block_size: Option<usize>,

    /// Number of scan workers
    #[arg(long)]
    workers: Option<usize>,

    /// Capacity of the scan queue
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Store digests as hex text instead of raw bytes
    #[arg(long)]
    hex: bool,
}

impl TreeArgs {
    fn config(&self) -> Result<TreeConfig> {
        let mut config = TreeConfig::load(&self.root)?;
        if let Some(block_size) = self.block_size {
            config = config.with_block_size(block_size);
        }
        if let Some(workers) = self.workers {
            config = config.with_workers(workers);
        }
        if let Some(capacity) = self.queue_capacity {
            config = config.with_queue_capacity(capacity);
        }
        if self.hex {
            config = config.with_encoding(DigestEncoding::Hex);
        }
        config.validate()?;
        debug!(?config, "configuration");
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fingerprint every file in the tree once
    Scan {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Scan, then keep fingerprints current until Ctrl+C
    Watch {
        #[command(flatten)]
        tree: TreeArgs,
    },

    /// Print the fingerprint record of one file
    Inspect {
        #[command(flatten)]
        tree: TreeArgs,

        /// File to inspect (relative paths resolve against the root)
        file: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Summary)]
        format: Format,
    },

    /// Show version and build info
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Summary,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let session = logging::init(cli.verbose, cli.log_file);
    if let Some(session) = &session {
        print_status(Status::LOGGING, &session.log_path.display().to_string());
    }

    match cli.command {
        Commands::Version => {
            eprintln!("blocksync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Scan { tree } => {
            let engine = Engine::new(tree.config()?)?;
            run_scan(&engine).await?;
        }
        Commands::Watch { tree } => {
            watch_command(&tree).await?;
        }
        Commands::Inspect { tree, file, format } => {
            inspect_command(&tree, &file, format)?;
        }
    }

    Ok(())
}

async fn run_scan(engine: &Engine) -> Result<ScanSummary> {
    let spinner = progress::scan_spinner(engine.config().root());

    let worker = engine.clone();
    let result = tokio::task::spawn_blocking(move || worker.scan()).await;
    spinner.finish_and_clear();

    let summary = result??;
    progress::finish_scan(&summary);
    Ok(summary)
}

async fn watch_command(tree: &TreeArgs) -> Result<()> {
    let engine = Engine::new(tree.config()?)?;
    run_scan(&engine).await?;

    let (started_tx, started_rx) = crossbeam_channel::bounded(1);
    let handle = engine.watch(started_tx)?;
    started_rx.recv()?;

    print_status(
        Status::WATCHING,
        &format!(
            "{} ({} directories, Ctrl+C to stop)",
            engine.config().root().display(),
            handle.watched_dirs().len()
        ),
    );

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping watcher");

    tokio::task::spawn_blocking(move || handle.stop()).await??;
    print_status(Status::STOPPED, &engine.config().root().display().to_string());
    Ok(())
}

fn inspect_command(tree: &TreeArgs, file: &Path, format: Format) -> Result<()> {
    let config = tree.config()?;
    let source = resolve_source(&config, file)?;
    let record = FingerprintRecord::load(config.metadata_dir(), &source, config.encoding())?;
    let view = RecordView::new(&config, &source, &record);

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        Format::Summary => print!("{}", view.render()),
    }
    Ok(())
}

/// Absolute path the record is keyed by
fn resolve_source(config: &TreeConfig, file: &Path) -> Result<PathBuf> {
    let joined = if file.is_absolute() {
        file.to_path_buf()
    } else {
        config.root().join(file)
    };
    Ok(std::path::absolute(joined)?)
}

/// Printable form of one record
#[derive(Debug, Serialize)]
struct RecordView {
    source: PathBuf,
    record: PathBuf,
    block_size: usize,
    encoding: DigestEncoding,
    updated_at: u64,
    blocks: Vec<String>,
}

impl RecordView {
    fn new(config: &TreeConfig, source: &Path, record: &FingerprintRecord) -> Self {
        let encoding = config.encoding();
        let blocks = record
            .entries
            .iter()
            .map(|entry| match encoding {
                DigestEncoding::Raw => hex::encode(entry),
                DigestEncoding::Hex => String::from_utf8_lossy(entry).into_owned(),
            })
            .collect();

        Self {
            source: source.to_path_buf(),
            record: config.metadata_dir().join(record_name(source)),
            block_size: config.block_size(),
            encoding,
            updated_at: record.updated_at,
            blocks,
        }
    }

    fn render(&self) -> String {
        let block_size = humansize::format_size(self.block_size as u64, humansize::BINARY);
        let encoding = match self.encoding {
            DigestEncoding::Raw => "raw",
            DigestEncoding::Hex => "hex",
        };

        let mut out = format!(
            "Source:  {}\nRecord:  {}\nUpdated: {} (unix seconds)\nBlocks:  {} x {block_size} (sha256, {encoding})\n",
            self.source.display(),
            self.record.display(),
            self.updated_at,
            self.blocks.len(),
        );
        for (index, digest) in self.blocks.iter().enumerate() {
            out.push_str(&format!("  {index:>6}  {digest}\n"));
        }
        out
    }
}
