//! Parallel read / parse / write pipeline
//!
//! Every full pass over a scan log runs through [`Pipeline::run`]:
//!
//! ```text
//!   ┌──────────────┐  LineBatch   ┌───────────────────────────┐
//!   │ Reader thread│─────────────►│                           │
//!   └──────────────┘   bounded    │        Dispatcher         │
//!                                 │   (calling thread, owns   │
//!   ┌──────────────┐  WorkItem    │    the store; crossbeam   │
//!   │  Worker 1..N │◄─────────────│    Select over channels)  │
//!   │  (parse +    │─────────────►│                           │
//!   │  pre-reduce) │   Output     └─────────────┬─────────────┘
//!   └──────────────┘                            │ consume()
//!                                               ▼
//!                                         SQLite writes
//! ```
//!
//! Workers are pure: a batch of lines in, a typed output out. They never
//! touch the store. The dispatcher forwards batches and drains results from
//! a single `Select`, so a full work queue never stalls result draining and
//! the reverse. Outputs arrive in no particular order; consumers must merge
//! them associatively and commutatively.
//!
//! With a single worker the pipeline runs a plain serial loop on the
//! calling thread. The persisted result is identical.

pub mod reader;

pub use reader::{open_input, BatchReader, LineBatch};

use crate::error::{ImportError, Result, WorkerError};
use crossbeam_channel::{bounded, Receiver, Select, Sender};
use std::any::Any;
use std::io::BufRead;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Pass-specific batch processing run on the worker threads
pub trait BatchWorker: Send + Sync + 'static {
    type Output: Send + 'static;

    fn process(&self, batch: LineBatch) -> Self::Output;
}

/// Message on the work channel
enum WorkItem {
    Batch(LineBatch),
    Stop,
}

/// Message on the result channel
enum WorkerReply<T> {
    Done(T),
    Failed { id: usize, seq: u64, message: String },
}

/// Pipeline tuning
#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Worker threads; 1 selects the serial loop
    pub workers: usize,

    /// Lines per batch
    pub batch_lines: usize,

    /// Channel capacity as a multiple of the worker count
    pub queue_factor: usize,
}

impl PipelineConfig {
    fn queue_depth(&self) -> usize {
        self.workers.max(1) * self.queue_factor.max(1)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            batch_lines: 50_000,
            queue_factor: 4,
        }
    }
}

/// Counters for one pass
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub lines_read: u64,
    pub batches: u64,
    pub elapsed: Duration,
}

/// One full pass over a line source
pub struct Pipeline {
    config: PipelineConfig,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, shutdown: Arc<AtomicBool>) -> Self {
        Self { config, shutdown }
    }

    /// Run `worker` over every batch of `source`, handing each output to
    /// `consume` on the calling thread
    ///
    /// On any error the remaining workers are told to stop and the error is
    /// returned; writes already made by `consume` are kept.
    pub fn run<W, R, F>(&self, worker: Arc<W>, source: R, consume: F) -> Result<PipelineStats>
    where
        W: BatchWorker,
        R: BufRead + Send + 'static,
        F: FnMut(W::Output) -> Result<()>,
    {
        let start = Instant::now();
        let mut stats = if self.config.workers <= 1 {
            self.run_serial(worker.as_ref(), source, consume)?
        } else {
            self.run_parallel(worker, source, consume)?
        };
        stats.elapsed = start.elapsed();
        Ok(stats)
    }

    fn interrupted(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn run_serial<W, R, F>(&self, worker: &W, source: R, mut consume: F) -> Result<PipelineStats>
    where
        W: BatchWorker,
        R: BufRead,
        F: FnMut(W::Output) -> Result<()>,
    {
        let mut stats = PipelineStats::default();

        for batch in BatchReader::new(source, self.config.batch_lines) {
            if self.interrupted() {
                return Err(ImportError::Interrupted);
            }
            let batch = batch?;
            stats.lines_read += batch.lines.len() as u64;
            stats.batches += 1;
            let seq = batch.seq;
            let output = panic::catch_unwind(AssertUnwindSafe(|| worker.process(batch)))
                .map_err(|payload| {
                    let message = panic_message(payload.as_ref());
                    warn!(worker = 0, batch = seq, "Worker failed: {}", message);
                    WorkerError::Panicked { id: 0, message }
                })?;
            consume(output)?;
        }

        if self.interrupted() {
            return Err(ImportError::Interrupted);
        }
        Ok(stats)
    }

    fn run_parallel<W, R, F>(&self, worker: Arc<W>, source: R, mut consume: F) -> Result<PipelineStats>
    where
        W: BatchWorker,
        R: BufRead + Send + 'static,
        F: FnMut(W::Output) -> Result<()>,
    {
        let depth = self.config.queue_depth();
        let (batch_tx, batch_rx) = bounded::<LineBatch>(depth);
        let (work_tx, work_rx) = bounded::<WorkItem>(depth);
        let (result_tx, result_rx) = bounded::<WorkerReply<W::Output>>(depth);

        let reader = spawn_reader(
            source,
            self.config.batch_lines,
            batch_tx,
            Arc::clone(&self.shutdown),
        )?;

        let mut workers = Vec::with_capacity(self.config.workers);
        for id in 0..self.config.workers {
            let handle = spawn_worker(id, Arc::clone(&worker), work_rx.clone(), result_tx.clone());
            match handle {
                Ok(h) => workers.push(h),
                Err(e) => {
                    abort_workers(&work_tx, workers.len());
                    return Err(e.into());
                }
            }
        }
        // Only the workers hold these now
        drop(work_rx);
        drop(result_tx);

        let mut stats = PipelineStats::default();
        let outcome = dispatch(&batch_rx, &work_tx, &result_rx, &mut stats, &mut consume);

        match outcome {
            Ok(()) => {
                for _ in 0..workers.len() {
                    let _ = work_tx.send(WorkItem::Stop);
                }
            }
            Err(_) => {
                warn!("Pipeline aborted, stopping workers");
                abort_workers(&work_tx, workers.len());
            }
        }
        drop(work_tx);
        drop(result_rx);
        drop(batch_rx);

        let mut worker_failure = None;
        for (id, handle) in workers.into_iter().enumerate() {
            if handle.join().is_err() && worker_failure.is_none() {
                worker_failure = Some(WorkerError::Panicked {
                    id,
                    message: "Worker thread panicked outside batch processing".into(),
                });
            }
        }
        let reader_result = reader.join().map_err(|_| WorkerError::ReaderPanicked)?;

        outcome?;
        if let Some(err) = worker_failure {
            return Err(err.into());
        }
        reader_result?;

        if self.interrupted() {
            return Err(ImportError::Interrupted);
        }
        debug!(
            lines = stats.lines_read,
            batches = stats.batches,
            "Pipeline pass complete"
        );
        Ok(stats)
    }
}

/// Forward batches to workers and drain their results until both sides
/// are exhausted
fn dispatch<T, F>(
    batch_rx: &Receiver<LineBatch>,
    work_tx: &Sender<WorkItem>,
    result_rx: &Receiver<WorkerReply<T>>,
    stats: &mut PipelineStats,
    consume: &mut F,
) -> Result<()>
where
    F: FnMut(T) -> Result<()>,
{
    let mut pending: Option<LineBatch> = None;
    let mut reader_done = false;
    let mut in_flight = 0usize;

    loop {
        if reader_done && pending.is_none() && in_flight == 0 {
            return Ok(());
        }

        let outgoing = pending.take();
        let mut sel = Select::new();
        let send_idx = outgoing.as_ref().map(|_| sel.send(work_tx));
        let read_idx = if outgoing.is_none() && !reader_done {
            Some(sel.recv(batch_rx))
        } else {
            None
        };
        let result_idx = sel.recv(result_rx);

        let oper = sel.select();
        let index = oper.index();

        if index == result_idx {
            pending = outgoing;
            match oper.recv(result_rx) {
                Ok(WorkerReply::Done(output)) => {
                    in_flight -= 1;
                    consume(output)?;
                }
                Ok(WorkerReply::Failed { id, seq, message }) => {
                    warn!(worker = id, batch = seq, "Worker failed: {}", message);
                    return Err(WorkerError::Panicked { id, message }.into());
                }
                Err(_) => return Err(WorkerError::AllWorkersDead.into()),
            }
        } else if Some(index) == read_idx {
            match oper.recv(batch_rx) {
                Ok(batch) => {
                    stats.lines_read += batch.lines.len() as u64;
                    stats.batches += 1;
                    pending = Some(batch);
                }
                Err(_) => reader_done = true,
            }
        } else if let Some(batch) = outgoing {
            debug_assert_eq!(Some(index), send_idx);
            oper.send(work_tx, WorkItem::Batch(batch))
                .map_err(|_| WorkerError::AllWorkersDead)?;
            in_flight += 1;
        }
    }
}

/// Best-effort Stop broadcast that never blocks on a full queue
fn abort_workers(work_tx: &Sender<WorkItem>, count: usize) {
    for _ in 0..count {
        let _ = work_tx.try_send(WorkItem::Stop);
    }
}

fn spawn_reader<R>(
    source: R,
    batch_lines: usize,
    batch_tx: Sender<LineBatch>,
    shutdown: Arc<AtomicBool>,
) -> std::result::Result<JoinHandle<std::io::Result<()>>, WorkerError>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new()
        .name("log-reader".into())
        .spawn(move || {
            for batch in BatchReader::new(source, batch_lines) {
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if batch_tx.send(batch?).is_err() {
                    // Dispatcher gave up
                    break;
                }
            }
            Ok(())
        })
        .map_err(|e| WorkerError::SpawnFailed {
            role: "reader".into(),
            reason: e.to_string(),
        })
}

fn spawn_worker<W: BatchWorker>(
    id: usize,
    worker: Arc<W>,
    work_rx: Receiver<WorkItem>,
    result_tx: Sender<WorkerReply<W::Output>>,
) -> std::result::Result<JoinHandle<()>, WorkerError> {
    thread::Builder::new()
        .name(format!("parse-{}", id))
        .spawn(move || worker_loop(id, worker, work_rx, result_tx))
        .map_err(|e| WorkerError::SpawnFailed {
            role: format!("worker {}", id),
            reason: e.to_string(),
        })
}

fn worker_loop<W: BatchWorker>(
    id: usize,
    worker: Arc<W>,
    work_rx: Receiver<WorkItem>,
    result_tx: Sender<WorkerReply<W::Output>>,
) {
    while let Ok(item) = work_rx.recv() {
        let batch = match item {
            WorkItem::Batch(batch) => batch,
            WorkItem::Stop => break,
        };

        let seq = batch.seq;
        let reply = match panic::catch_unwind(AssertUnwindSafe(|| worker.process(batch))) {
            Ok(output) => WorkerReply::Done(output),
            Err(payload) => WorkerReply::Failed {
                id,
                seq,
                message: panic_message(payload.as_ref()),
            },
        };

        let failed = matches!(reply, WorkerReply::Failed { .. });
        if result_tx.send(reply).is_err() || failed {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::AtomicUsize;

    /// Sums the numeric lines of each batch
    struct SumWorker;

    impl BatchWorker for SumWorker {
        type Output = (u64, usize);

        fn process(&self, batch: LineBatch) -> Self::Output {
            let sum = batch.lines.iter().filter_map(|l| l.parse::<u64>().ok()).sum();
            (sum, batch.lines.len())
        }
    }

    struct PanicWorker {
        calls: AtomicUsize,
    }

    impl BatchWorker for PanicWorker {
        type Output = ();

        fn process(&self, _batch: LineBatch) {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 2 {
                panic!("bad batch");
            }
        }
    }

    fn numbers(n: u64) -> Cursor<Vec<u8>> {
        let text: String = (1..=n).map(|i| format!("{}\n", i)).collect();
        Cursor::new(text.into_bytes())
    }

    fn run_sum(workers: usize, n: u64) -> (u64, usize, PipelineStats) {
        let config = PipelineConfig {
            workers,
            batch_lines: 7,
            queue_factor: 4,
        };
        let pipeline = Pipeline::new(config, Arc::new(AtomicBool::new(false)));
        let mut total = 0u64;
        let mut lines = 0usize;
        let stats = pipeline
            .run(Arc::new(SumWorker), numbers(n), |(sum, count)| {
                total += sum;
                lines += count;
                Ok(())
            })
            .unwrap();
        (total, lines, stats)
    }

    #[test]
    fn test_serial_and_parallel_agree() {
        let (serial_sum, serial_lines, serial_stats) = run_sum(1, 1000);
        let (parallel_sum, parallel_lines, parallel_stats) = run_sum(8, 1000);

        assert_eq!(serial_sum, 500_500);
        assert_eq!(parallel_sum, serial_sum);
        assert_eq!(serial_lines, 1000);
        assert_eq!(parallel_lines, 1000);
        assert_eq!(serial_stats.lines_read, 1000);
        assert_eq!(parallel_stats.lines_read, 1000);
        assert_eq!(parallel_stats.batches, 143);
    }

    #[test]
    fn test_empty_source() {
        let (sum, lines, stats) = run_sum(4, 0);
        assert_eq!((sum, lines), (0, 0));
        assert_eq!(stats.batches, 0);
    }

    #[test]
    fn test_worker_panic_is_fatal() {
        for workers in [1, 3] {
            let config = PipelineConfig {
                workers,
                batch_lines: 5,
                queue_factor: 2,
            };
            let pipeline = Pipeline::new(config, Arc::new(AtomicBool::new(false)));
            let worker = Arc::new(PanicWorker {
                calls: AtomicUsize::new(0),
            });

            let result = pipeline.run(worker, numbers(500), |_| Ok(()));
            match result {
                Err(ImportError::Worker(WorkerError::Panicked { message, .. })) => {
                    assert_eq!(message, "bad batch", "workers = {}", workers)
                }
                other => panic!("workers = {}: unexpected {:?}", workers, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_consumer_error_aborts() {
        let config = PipelineConfig {
            workers: 4,
            batch_lines: 3,
            queue_factor: 1,
        };
        let pipeline = Pipeline::new(config, Arc::new(AtomicBool::new(false)));
        let mut seen = 0;

        let result = pipeline.run(Arc::new(SumWorker), numbers(10_000), |_| {
            seen += 1;
            if seen == 5 {
                Err(WorkerError::AllWorkersDead.into())
            } else {
                Ok(())
            }
        });
        assert!(result.is_err());
        assert_eq!(seen, 5);
    }

    #[test]
    fn test_shutdown_flag_interrupts() {
        for workers in [1, 4] {
            let config = PipelineConfig {
                workers,
                batch_lines: 10,
                queue_factor: 4,
            };
            let pipeline = Pipeline::new(config, Arc::new(AtomicBool::new(true)));
            let result = pipeline.run(Arc::new(SumWorker), numbers(100), |_| Ok(()));
            assert!(matches!(result, Err(ImportError::Interrupted)));
        }
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
