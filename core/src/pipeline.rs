//! The producer/consumer loop shared by both pipelines, and the two
//! pipelines themselves.
//!
//! A single thread pulls items from the lazy input, hands them to the worker
//! pool, takes results back in completion order and appends them to the
//! output. Shutdown goes through
//! `Running -> (NormalDrain | Interrupted | Failed) -> Closing -> Stopped`.

use crate::dump::DumpExtractor;
use crate::error::{PipelineError, Result};
use crate::persist::{load_processed_ids, EdgeWriter, ResultSink, TermPaths, TermWriter};
use crate::pool::{CancelToken, WorkerPool};
use crate::progress::{minutes_seconds, Progress};
use crate::records::{DocumentRecord, Edge};
use crate::resolve::{LinkSources, ResolutionMap};
use crate::sql;
use crate::stream::DumpStream;
use crate::termfreq;
use crate::tokenizer::WikiNormalizer;
use crossbeam_channel::Select;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running,
    NormalDrain,
    Interrupted,
    Failed,
    Closing,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Capacity of the work and result channels.
    pub queue_depth: usize,
    /// Records between two throughput reports.
    pub report_every: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { workers: 10, queue_depth: 64, report_every: 1000 }
    }
}

impl PipelineConfig {
    /// Defaults for the link graph: fewer workers, since every worker holds
    /// its own resolution map, and reports counted in edges.
    pub fn links() -> Self {
        Self { workers: 4, queue_depth: 16, report_every: 100_000 }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    Completed,
    Interrupted,
    Failed(PipelineError),
}

#[derive(Debug)]
pub struct RunSummary {
    pub outcome: Outcome,
    /// Records written by this run.
    pub processed: u64,
    /// Records written by this run plus those found at resume time.
    pub total: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn is_completed(&self) -> bool { matches!(self.outcome, Outcome::Completed) }
}

enum Step<O> {
    Submitted,
    Completed(Result<O>),
    ResultsClosed,
    WorkersGone,
    Interrupted,
}

pub struct Orchestrator {
    interrupt: CancelToken,
    state: PipelineState,
    progress: Progress,
    previously_processed: u64,
}

impl Orchestrator {
    pub fn new(config: &PipelineConfig, interrupt: CancelToken, unit: &'static str, previously_processed: u64) -> Self {
        Self {
            interrupt,
            state: PipelineState::Running,
            progress: Progress::new(unit, config.report_every),
            previously_processed,
        }
    }

    pub fn state(&self) -> PipelineState { self.state }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(from = ?self.state, to = ?next, "pipeline state");
        self.state = next;
    }

    /// Feed `input` through `pool` into `sink` until the input is exhausted,
    /// an interrupt arrives or something fails. Always ends in `Stopped`.
    pub fn run<T, O, It, K>(&mut self, mut input: It, mut pool: WorkerPool<T, Result<O>>, sink: &mut K) -> RunSummary
    where
        It: Iterator<Item = T>,
        K: ResultSink<O>,
    {
        self.transition(PipelineState::Running);
        tracing::info!(workers = pool.size(), "pool started, waiting for results");

        let outcome = match catch_unwind(AssertUnwindSafe(|| self.drive(&mut input, &mut pool, sink))) {
            Ok(Ok(())) => Outcome::Completed,
            Ok(Err(PipelineError::Interrupted)) => Outcome::Interrupted,
            Ok(Err(e)) => Outcome::Failed(e),
            Err(_) => Outcome::Failed(PipelineError::Critical("orchestration loop panicked".into())),
        };

        match &outcome {
            Outcome::Completed => {}
            Outcome::Interrupted => {
                self.transition(PipelineState::Interrupted);
                tracing::warn!("interrupt received, terminating worker pool");
                pool.terminate();
                if let Err(e) = pool.join() {
                    tracing::warn!(error = %e, "error while terminating pool");
                }
            }
            Outcome::Failed(e) => {
                self.transition(PipelineState::Failed);
                tracing::error!(error = %e, "a critical error occurred, terminating worker pool");
                pool.terminate();
                if let Err(e) = pool.join() {
                    tracing::warn!(error = %e, "error while terminating pool after critical error");
                }
            }
        }

        self.transition(PipelineState::Closing);
        tracing::info!("telling worker pool to stop");
        pool.close();
        if let Err(e) = pool.join() {
            tracing::debug!(error = %e, "ignoring pool join error during close");
        }
        drop(pool);
        if let Err(e) = sink.flush() {
            tracing::error!(error = %e, "final flush failed");
        }
        self.transition(PipelineState::Stopped);

        let processed = self.progress.count();
        let summary = RunSummary {
            outcome,
            processed,
            total: self.previously_processed + processed,
            elapsed: self.progress.elapsed(),
        };
        let (min, sec) = minutes_seconds(summary.elapsed);
        tracing::info!(
            processed_this_run = summary.processed,
            total_in_index = summary.total,
            "processing finished in {min} min, {sec:.2} sec"
        );
        summary
    }

    fn drive<T, O, It, K>(&mut self, input: &mut It, pool: &mut WorkerPool<T, Result<O>>, sink: &mut K) -> Result<()>
    where
        It: Iterator<Item = T>,
        K: ResultSink<O>,
    {
        let mut pending = input.next();
        if pending.is_none() {
            self.begin_drain(pool);
        }

        loop {
            match Self::step(pool, &mut pending, &self.interrupt) {
                Step::Submitted => {
                    pending = input.next();
                    if pending.is_none() {
                        self.begin_drain(pool);
                    }
                }
                Step::Completed(Ok(out)) => {
                    let written = sink.write(out)?;
                    if self.progress.record(written).is_some() {
                        sink.flush()?;
                    }
                }
                Step::Completed(Err(e)) => tracing::warn!(error = %e, "item skipped"),
                Step::ResultsClosed if self.state == PipelineState::NormalDrain && pool.ready_workers() > 0 => return Ok(()),
                Step::ResultsClosed | Step::WorkersGone => {
                    return Err(if pool.ready_workers() == 0 {
                        PipelineError::NoReadyWorkers
                    } else {
                        PipelineError::Critical("all workers exited before the input was exhausted".into())
                    });
                }
                Step::Interrupted => return Err(PipelineError::Interrupted),
            }
        }
    }

    fn begin_drain<T, O>(&mut self, pool: &mut WorkerPool<T, O>) {
        self.transition(PipelineState::NormalDrain);
        tracing::info!("input exhausted, waiting for in-flight work");
        pool.close();
    }

    /// Block until one of: the pending item was handed to a worker, a result
    /// arrived, the results channel closed, or an interrupt arrived.
    fn step<T, O>(pool: &WorkerPool<T, Result<O>>, pending: &mut Option<T>, interrupt: &CancelToken) -> Step<O> {
        if interrupt.is_cancelled() {
            return Step::Interrupted;
        }
        let Some(results) = pool.results() else { return Step::ResultsClosed };
        let sender = if pending.is_some() { pool.sender() } else { None };

        let mut sel = Select::new();
        let interrupt_idx = sel.recv(interrupt.signal());
        let results_idx = sel.recv(results);
        if let Some(tx) = sender {
            sel.send(tx);
        }

        let oper = sel.select();
        let idx = oper.index();
        if idx == interrupt_idx {
            let _ = oper.recv(interrupt.signal());
            return Step::Interrupted;
        }
        if idx == results_idx {
            return match oper.recv(results) {
                Ok(out) => Step::Completed(out),
                Err(_) => Step::ResultsClosed,
            };
        }
        match (sender, pending.take()) {
            (Some(tx), Some(item)) => match oper.send(tx, item) {
                Ok(()) => Step::Submitted,
                Err(_) => Step::WorkersGone,
            },
            _ => unreachable!("send selected without a pending item"),
        }
    }
}

/// Build `tf_data` and `doc_info` from an article dump, skipping every page
/// already present in `doc_info`.
pub fn build_term_frequencies(dump: &Path, paths: &TermPaths, config: &PipelineConfig, interrupt: CancelToken) -> Result<RunSummary> {
    let stream = DumpStream::open(dump)?;
    let processed = load_processed_ids(&paths.doc_info)?;
    let mut sink = TermWriter::open(paths)?;

    let pool = WorkerPool::spawn(
        "terms",
        config.workers,
        config.queue_depth,
        |_, _| Ok(WikiNormalizer::new()),
        |normalizer: &WikiNormalizer, doc: DocumentRecord| termfreq::process(normalizer, doc),
    )?;

    let docs = DumpExtractor::from_stream(stream, &processed);
    let mut orchestrator = Orchestrator::new(config, interrupt, "pages", processed.len() as u64);
    Ok(orchestrator.run(docs, pool, &mut sink))
}

/// Build the `from,to` edge file from the page-link export. Every worker
/// resolves link targets with its own [`ResolutionMap`].
pub fn build_link_graph(pagelinks: &Path, sources: LinkSources, out: &Path, config: &PipelineConfig, interrupt: CancelToken) -> Result<RunSummary> {
    for input in [pagelinks, sources.linktarget.as_path(), sources.doc_info.as_path()] {
        if !input.exists() {
            return Err(PipelineError::InputNotFound(input.to_path_buf()));
        }
    }
    let stream = DumpStream::open(pagelinks)?;
    let mut sink = EdgeWriter::create(out)?;

    tracing::info!(workers = config.workers, "starting workers, each loads its own resolution map");
    let pool = WorkerPool::spawn(
        "links",
        config.workers,
        config.queue_depth,
        move |worker, cancel| ResolutionMap::build(worker, &sources, cancel),
        |map: &ResolutionMap, chunk: String| -> Result<Vec<Edge>> { Ok(map.edges(&chunk)) },
    )?;

    let chunks = stream.lines().filter_map(sql::take_insert_payload);
    let mut orchestrator = Orchestrator::new(config, interrupt, "edges", 0);
    Ok(orchestrator.run(chunks, pool, &mut sink))
}
