//! Command handlers, one module per subcommand.

pub mod blip;
pub mod config;
pub mod fewshot;
pub mod models;
pub mod summarize;
pub mod tag;

use std::path::{Path, PathBuf};
use std::time::Duration;

use capforge_core::RunStats;

/// Expand `~` in a user-supplied directory.
pub(crate) fn expand_dir(path: &Path) -> PathBuf {
    capforge_core::config::expand_path(path)
}

/// Resolve a directory flag, logging an error when it does not exist.
///
/// Handled validation failures end the command normally (exit 0).
pub(crate) fn existing_dir(path: &Path, label: &str) -> Option<PathBuf> {
    let dir = expand_dir(path);
    if dir.is_dir() {
        Some(dir)
    } else {
        tracing::error!("{label} does not exist: {}", dir.display());
        None
    }
}

pub(crate) fn create_progress_bar(total: u64) -> indicatif::ProgressBar {
    use indicatif::{ProgressBar, ProgressStyle};

    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    pb.set_style(style);
    pb.set_message("starting...");
    pb
}

/// Print a formatted summary table after a driver run.
pub(crate) fn print_summary(title: &str, stats: &RunStats, elapsed: Duration) {
    let rate = if elapsed.as_secs_f64() > 0.0 {
        stats.written as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    };

    eprintln!();
    eprintln!("  ====================================");
    eprintln!("    {title}");
    eprintln!("  ====================================");
    eprintln!("    Written:      {:>8}", stats.written);
    if stats.failed > 0 {
        eprintln!("    Failed:       {:>8}", stats.failed);
    }
    if stats.skipped > 0 {
        eprintln!("    Skipped:      {:>8}", stats.skipped);
    }
    eprintln!("  ------------------------------------");
    eprintln!("    Total:        {:>8}", stats.total());
    eprintln!("    Duration:     {:>7.1}s", elapsed.as_secs_f64());
    eprintln!("    Rate:         {:>7.1} img/sec", rate);
    eprintln!("  ====================================");
}
