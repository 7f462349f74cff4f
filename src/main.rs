//! fs-scan-importer - filesystem scan log importer
//!
//! Entry point for the CLI application.

use anyhow::{Context, Result};
use clap::Parser;
use fs_scan_importer::config::{CliArgs, ImportConfig};
use fs_scan_importer::importer::Importer;
use fs_scan_importer::progress::{print_header, print_summary, ProgressReporter, SummaryReport};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let args = CliArgs::parse();

    setup_logging(args.verbose)?;

    let config = ImportConfig::from_args(args).context("Invalid configuration")?;
    let show_progress = config.show_progress;
    let input = config.input_path.display().to_string();
    let output = config.output_path.display().to_string();
    let workers = config.worker_count;

    let mut importer = Importer::new(config).context("Failed to initialize importer")?;

    if show_progress {
        print_header(&input, importer.format_name(), workers, &output);
        importer = importer.with_progress(ProgressReporter::new());
    }

    // Setup signal handler for graceful shutdown
    let shutdown_flag = importer.shutdown_flag();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, finishing current batch...");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("Failed to set signal handler")?;

    let result = importer.run().context("Import failed")?;

    if show_progress {
        let db_size = std::fs::metadata(&output).ok().map(|m| m.len());
        print_summary(&SummaryReport {
            directories: result.total_dirs,
            files: result.total_files,
            bytes: result.total_bytes,
            lines: result.lines_read,
            skipped: result.skipped_lines,
            unresolved: result.unresolved_entries,
            owners: result.owners,
            max_depth: result.max_depth,
            transactions: result.writer.batches_committed,
            flushes: result.flushes,
            duration: result.duration,
            db_path: &output,
            db_size,
        });
    }

    if result.skipped_lines > 0 {
        info!(skipped = result.skipped_lines, "Import completed with unparseable lines");
    }

    Ok(())
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("fs_scan_importer=debug,warn")
    } else {
        EnvFilter::new("fs_scan_importer=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
