//! Import orchestration - runs the passes of one import
//!
//! The importer is responsible for:
//! - Creating the output database (never overwriting one unless asked)
//! - Driving Pass 1 and Pass 2a through the parallel pipeline
//! - Running the SQL aggregation and the summaries
//! - Recording run status so partial imports are recognizable

use crate::accumulate::{AccumulateWorker, NonRecursiveAccumulator};
use crate::aggregate::aggregate_recursive;
use crate::config::ImportConfig;
use crate::db::{keys, schema, ScanStore, WriterStats};
use crate::error::{ImportError, Result};
use crate::hierarchy::{DirectoryDiscovery, DiscoveryWorker};
use crate::identity::{IdentityResolver, StaticIdentityResolver, SystemIdentityResolver};
use crate::parser::{select_parser, LogParser};
use crate::pipeline::{open_input, Pipeline, PipelineConfig};
use crate::progress::{ImportPhase, ImportProgress, ProgressReporter};
use crate::summary::{build_summaries, ScanProvenance};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Result of a completed import
#[derive(Debug, Clone)]
pub struct ImportResult {
    /// Directories in the hierarchy
    pub total_dirs: u64,

    /// Files under the scan root
    pub total_files: u64,

    /// Allocated bytes under the scan root
    pub total_bytes: u64,

    /// Lines read per pass
    pub lines_read: u64,

    /// Lines no parser rule matched
    pub skipped_lines: u64,

    /// Entries whose parent directory was never discovered
    pub unresolved_entries: u64,

    /// Distinct owners and groups
    pub owners: usize,
    pub groups: usize,

    /// Deepest directory below the scan root
    pub max_depth: u32,

    /// Depth levels folded by the recursive aggregation
    pub levels: u32,

    /// Threshold flushes of accumulated deltas during Pass 2a
    pub flushes: u64,

    /// Rows and transactions written to the store
    pub writer: WriterStats,

    /// Time taken for the whole import
    pub duration: Duration,
}

/// Runs one import from a scan log into a fresh database
pub struct Importer {
    config: Arc<ImportConfig>,
    parser: Arc<dyn LogParser>,
    identity: Box<dyn IdentityResolver>,
    progress: Option<ProgressReporter>,
    shutdown: Arc<AtomicBool>,
}

impl Importer {
    /// Create an importer, selecting the parser for the input
    pub fn new(config: ImportConfig) -> Result<Self> {
        let parser = select_parser(config.format.as_deref(), &config.input_path)?;
        let identity: Box<dyn IdentityResolver> = if config.skip_identity {
            Box::new(StaticIdentityResolver::new())
        } else {
            Box::new(SystemIdentityResolver)
        };

        Ok(Self {
            config: Arc::new(config),
            parser: Arc::from(parser),
            identity,
            progress: None,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Replace the uid/gid name source
    pub fn with_identity_resolver(mut self, resolver: Box<dyn IdentityResolver>) -> Self {
        self.identity = resolver;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn format_name(&self) -> &'static str {
        self.parser.format_name()
    }

    /// Run every pass
    ///
    /// On failure the `import_info` status records why the run stopped and
    /// no `scan_metadata` row exists.
    pub fn run(self) -> Result<ImportResult> {
        let start = Instant::now();
        let started_at = Utc::now();

        info!(
            input = %self.config.input_path.display(),
            output = %self.config.output_path.display(),
            format = self.parser.format_name(),
            workers = self.config.worker_count,
            "Starting import"
        );

        let mut store = ScanStore::create(&self.config.output_path, self.config.replace)?;
        store.set_info(keys::SOURCE_FILE, &self.source_file())?;
        store.set_info(keys::FORMAT, self.parser.format_name())?;
        store.set_info(keys::WORKER_COUNT, &self.config.worker_count.to_string())?;
        store.set_info(keys::START_TIME, &started_at.to_rfc3339())?;
        store.set_info(keys::STATUS, "running")?;

        match self.run_passes(&mut store, start) {
            Ok(result) => {
                store.set_info(keys::END_TIME, &Utc::now().to_rfc3339())?;
                store.set_info(keys::DURATION_SECS, &format!("{:.3}", result.duration.as_secs_f64()))?;
                store.set_info(keys::STATUS, "completed")?;

                if let Some(ref p) = self.progress {
                    p.finish("Import completed");
                }
                info!(
                    directories = result.total_dirs,
                    files = result.total_files,
                    transactions = result.writer.batches_committed,
                    duration_secs = result.duration.as_secs_f64(),
                    "Import complete"
                );
                Ok(result)
            }
            Err(e) => {
                if let Err(mark_err) = store.set_info(keys::STATUS, e.status()) {
                    warn!(error = %mark_err, "Could not record import status");
                }
                if let Err(mark_err) = store.set_info(keys::END_TIME, &Utc::now().to_rfc3339()) {
                    warn!(error = %mark_err, "Could not record import end time");
                }
                if let Some(ref p) = self.progress {
                    p.finish(&format!("Import {}", e.status()));
                }
                Err(e)
            }
        }
    }

    fn run_passes(&self, store: &mut ScanStore, start: Instant) -> Result<ImportResult> {
        let config = &self.config;
        let scan_time = config.scan_time();
        if scan_time.is_none() {
            warn!("No scan date known; every file goes to the oldest access-age bucket");
        }

        let pipeline = Pipeline::new(
            PipelineConfig {
                workers: config.worker_count,
                batch_lines: config.batch_lines,
                queue_factor: config.queue_factor,
            },
            Arc::clone(&self.shutdown),
        );

        // Pass 1: directory hierarchy
        let pass_start = Instant::now();
        let mut discovery = DirectoryDiscovery::new();
        let mut parsed = 0u64;
        let mut lines = 0u64;
        let mut skipped = 0u64;
        let worker = Arc::new(DiscoveryWorker::new(Arc::clone(&self.parser)));
        pipeline.run(worker, open_input(&config.input_path)?, |batch| {
            discovery.absorb(&batch);
            lines += batch.lines;
            parsed += batch.parsed;
            skipped += batch.skipped;
            self.report(ImportProgress {
                phase: ImportPhase::Discovery,
                lines,
                directories: discovery.len() as u64,
                files: parsed,
                skipped,
                elapsed: pass_start.elapsed(),
            });
            Ok(())
        })?;
        info!(
            lines,
            skipped,
            directories = discovery.len(),
            elapsed_ms = pass_start.elapsed().as_millis() as u64,
            "Pass 1 discovery complete"
        );

        let index = discovery.materialize(store, config.flush_batch_size)?;
        schema::create_hierarchy_indexes(store.conn())?;
        let max_depth = index.max_depth();
        let index = Arc::new(index);
        self.check_shutdown()?;

        // Pass 2a: non-recursive statistics
        let pass_start = Instant::now();
        let mut accumulator = NonRecursiveAccumulator::new(config.flush_batch_size);
        let worker = Arc::new(AccumulateWorker::new(
            Arc::clone(&self.parser),
            Arc::clone(&index),
            scan_time,
        ));
        pipeline.run(worker, open_input(&config.input_path)?, |batch| {
            accumulator.absorb(batch, store)?;
            let s = accumulator.summary();
            self.report(ImportProgress {
                phase: ImportPhase::Accumulation,
                lines: s.lines,
                directories: s.directories,
                files: s.files,
                skipped: s.skipped,
                elapsed: pass_start.elapsed(),
            });
            Ok(())
        })?;
        let accumulated = accumulator.finish(store)?;
        drop(index);
        if accumulated.unresolved > 0 {
            warn!(
                unresolved = accumulated.unresolved,
                "Entries whose parent directory is unknown were left out of directory statistics"
            );
        }
        info!(
            files = accumulated.files,
            directories = accumulated.directories,
            flushes = accumulated.flushes,
            elapsed_ms = pass_start.elapsed().as_millis() as u64,
            "Pass 2a accumulation complete"
        );
        self.check_shutdown()?;

        // Pass 2b: recursive statistics
        self.set_status(ImportPhase::Aggregation);
        let aggregation = aggregate_recursive(store)?;
        self.check_shutdown()?;

        // Pass 3: identities, summaries, provenance
        self.set_status(ImportPhase::Summaries);
        let provenance = ScanProvenance {
            source_file: self.source_file(),
            filesystem: config.filesystem.clone(),
            scan_timestamp: config.scan_date,
            parser_format: self.parser.format_name().to_string(),
            worker_count: config.worker_count,
            lines_read: accumulated.lines,
            skipped_lines: accumulated.skipped,
            unresolved_entries: accumulated.unresolved,
        };
        let totals = build_summaries(store, self.identity.as_ref(), &provenance)?;
        store.finalize()?;

        Ok(ImportResult {
            total_dirs: totals.total_directories,
            total_files: totals.total_files,
            total_bytes: totals.total_size,
            lines_read: accumulated.lines,
            skipped_lines: accumulated.skipped,
            unresolved_entries: accumulated.unresolved,
            owners: totals.users,
            groups: totals.groups,
            max_depth,
            levels: aggregation.levels,
            flushes: accumulated.flushes,
            writer: store.stats().clone(),
            duration: start.elapsed(),
        })
    }

    fn source_file(&self) -> String {
        self.config
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.config.input_path.display().to_string())
    }

    fn check_shutdown(&self) -> Result<()> {
        if self.shutdown.load(Ordering::SeqCst) {
            return Err(ImportError::Interrupted);
        }
        Ok(())
    }

    fn report(&self, progress: ImportProgress) {
        if let Some(ref p) = self.progress {
            p.update(&progress);
        }
    }

    fn set_status(&self, phase: ImportPhase) {
        if let Some(ref p) = self.progress {
            p.set_status(&format!("{}...", phase));
        }
    }
}
