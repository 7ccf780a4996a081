//! Cargo-style progress output for blocksync
//!
//! ```text
//!    Scanning /home/user/project
//!     Scanned 952 files (3 failed), 14 blocks rewritten, 67.44 MiB hashed in 3.2s
//!    Watching /home/user/project (41 directories, Ctrl+C to stop)
//! ```

use std::io::Write as _;
use std::time::Duration;

use blocksync_core::ScanSummary;

/// Status verbs for cargo-style output (right-aligned to 12 chars)
pub struct Status;

impl Status {
    pub const SCANNING: &str = "Scanning";
    pub const SCANNED: &str = "Scanned";
    pub const WATCHING: &str = "Watching";
    pub const STOPPED: &str = "Stopped";
    pub const LOGGING: &str = "Logging";
}

/// Print a cargo-style status line
pub fn print_status(status: &str, message: &str) {
    let mut term = console::Term::stderr();
    let style = console::Style::new().green().bold();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
}

fn format_elapsed(elapsed: Duration) -> String {
    if elapsed.as_secs() >= 1 {
        format!("{:.2}s", elapsed.as_secs_f64())
    } else {
        format!("{}ms", elapsed.as_millis())
    }
}

/// Spinner shown while a scan runs (the total isn't known up front)
pub fn scan_spinner(root: &std::path::Path) -> indicatif::ProgressBar {
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::default_spinner().template("{spinner:.green} {msg:>12} {prefix}") {
        pb.set_style(style);
    }
    pb.set_message(Status::SCANNING);
    pb.set_prefix(format!("{}...", root.display()));
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// One-line summary of a finished scan
pub fn summary_line(summary: &ScanSummary) -> String {
    let hashed = humansize::format_size(summary.bytes_hashed, humansize::BINARY);
    let files = if summary.files_failed == 0 {
        format!("{} files", summary.files_processed)
    } else {
        format!(
            "{} files ({} failed)",
            summary.files_processed, summary.files_failed
        )
    };
    format!(
        "{files}, {} blocks rewritten, {hashed} hashed in {}",
        summary.blocks_written,
        format_elapsed(summary.elapsed)
    )
}

/// Show the final scan summary
pub fn finish_scan(summary: &ScanSummary) {
    if summary.files_failed == 0 {
        print_status(Status::SCANNED, &summary_line(summary));
    } else {
        let mut term = console::Term::stderr();
        let style = console::Style::new().yellow().bold();
        let _ = writeln!(
            term,
            "{:>12} {}",
            style.apply_to("Finished"),
            summary_line(summary)
        );
    }
}
