//! Progress reporting for the importer
//!
//! Provides real-time progress display using indicatif progress bars.

use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::fmt;
use std::time::Duration;

/// Stage of an import run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Discovery,
    Accumulation,
    Aggregation,
    Summaries,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImportPhase::Discovery => "Pass 1/3 directories",
            ImportPhase::Accumulation => "Pass 2/3 statistics",
            ImportPhase::Aggregation => "Pass 2/3 recursive totals",
            ImportPhase::Summaries => "Pass 3/3 summaries",
        };
        f.write_str(label)
    }
}

/// Snapshot handed to the reporter while a log pass runs
#[derive(Debug, Clone, Copy)]
pub struct ImportProgress {
    pub phase: ImportPhase,
    pub lines: u64,
    pub directories: u64,
    pub files: u64,
    pub skipped: u64,
    pub elapsed: Duration,
}

impl ImportProgress {
    pub fn lines_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.lines as f64 / secs
        } else {
            0.0
        }
    }
}

/// Progress reporter that displays import status
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .expect("Invalid progress template")
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );

        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &ImportProgress) {
        let mut msg = format!(
            "{} | Lines: {} | Dirs: {} | Files: {} | Rate: {:.0}/s",
            progress.phase,
            format_number(progress.lines),
            format_number(progress.directories),
            format_number(progress.files),
            progress.lines_per_second(),
        );
        if progress.skipped > 0 {
            msg.push_str(&format!(" | Skipped: {}", format_number(progress.skipped)));
        }

        self.bar.set_message(msg);
    }

    /// Set a status message
    pub fn set_status(&self, status: &str) {
        self.bar.set_message(status.to_string());
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| chunk.iter().rev().map(|&b| b as char).collect::<String>())
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Figures shown once the import is complete
#[derive(Debug, Clone)]
pub struct SummaryReport<'a> {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
    pub lines: u64,
    pub skipped: u64,
    pub unresolved: u64,
    pub owners: usize,
    pub max_depth: u32,
    pub transactions: u64,
    pub flushes: u64,
    pub duration: Duration,
    pub db_path: &'a str,
    pub db_size: Option<u64>,
}

/// Print a summary of the import results
pub fn print_summary(report: &SummaryReport<'_>) {
    let duration_secs = report.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        report.lines as f64 / duration_secs
    } else {
        0.0
    };

    println!();
    println!("{}", style("Import Complete").green().bold());
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Directories:").bold(), format_number(report.directories));
    println!("  {} {}", style("Files:").bold(), format_number(report.files));
    println!("  {} {}", style("Total Size:").bold(), format_size(report.bytes, BINARY));
    println!("  {} {}", style("Owners:").bold(), report.owners);
    println!("  {} {}", style("Max depth:").bold(), report.max_depth);
    println!(
        "  {} {} ({} delta flushes)",
        style("Transactions:").bold(),
        format_number(report.transactions),
        format_number(report.flushes)
    );
    println!(
        "  {} {:.1}s ({:.0} lines/sec per pass)",
        style("Duration:").bold(),
        duration_secs,
        rate
    );
    if report.skipped > 0 {
        println!(
            "  {} {}",
            style("Skipped lines:").yellow().bold(),
            format_number(report.skipped)
        );
    }
    if report.unresolved > 0 {
        println!(
            "  {} {}",
            style("Unresolved:").yellow().bold(),
            format_number(report.unresolved)
        );
    }
    match report.db_size {
        Some(size) => println!(
            "  {} {} ({})",
            style("Database:").bold(),
            report.db_path,
            format_size(size, BINARY)
        ),
        None => println!("  {} {}", style("Database:").bold(), report.db_path),
    }
    println!();
}

/// Print a header at the start of the import
pub fn print_header(input: &str, format: &str, workers: usize, output: &str) {
    println!();
    println!(
        "{} {}",
        style("fs-scan-importer").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
    println!("{}", style("─".repeat(50)).dim());
    println!("  {} {}", style("Input:").bold(), input);
    println!("  {} {}", style("Format:").bold(), format);
    println!("  {} {}", style("Workers:").bold(), workers);
    println!("  {} {}", style("Output:").bold(), output);
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_rate() {
        let progress = ImportProgress {
            phase: ImportPhase::Discovery,
            lines: 1000,
            directories: 0,
            files: 0,
            skipped: 0,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(progress.lines_per_second(), 500.0);
        assert_eq!(ImportPhase::Summaries.to_string(), "Pass 3/3 summaries");
    }
}
