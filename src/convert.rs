//! Concurrent block -> change log conversion.
//!
//! Three stages connected by bounded queues:
//!
//! ```text
//! fetch ──blocks──> extract ──batches──> persist
//! ```
//!
//! A fourth thread reports progress on a fixed interval. A stage that fails
//! drops its queue ends, which stops its neighbours: upstream sends fail and
//! downstream receives drain and end. The first failure wins; the converted
//! marker is only written once every stage has completed.

use crate::change::Change;
use crate::changelog::ChangeLogStore;
use crate::config::ConverterConfig;
use crate::error::{ChainError, Result};
use crate::extract::Extractor;
use crate::ledger::{Block, BlockSource};
use crate::types::Height;
use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Counters shared by the pipeline stages.
#[derive(Debug, Default)]
pub struct PipelineStats {
    blocks_fetched: AtomicU64,
    blocks_processed: AtomicU64,
    batches_saved: AtomicU64,
    changes_saved: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            blocks_fetched: self.blocks_fetched.load(Ordering::Relaxed),
            blocks_processed: self.blocks_processed.load(Ordering::Relaxed),
            batches_saved: self.batches_saved.load(Ordering::Relaxed),
            changes_saved: self.changes_saved.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub blocks_fetched: u64,
    pub blocks_processed: u64,
    pub batches_saved: u64,
    pub changes_saved: u64,
}

/// Result of a completed conversion.
#[derive(Clone, Debug)]
pub struct ConvertSummary {
    /// Last converted height (inclusive).
    pub to_height: Height,
    pub stats: StatsSnapshot,
    pub elapsed: Duration,
}

/// Converts a block range into change batches.
pub struct Converter<'a> {
    source: &'a dyn BlockSource,
    store: &'a dyn ChangeLogStore,
    config: ConverterConfig,
    stats: PipelineStats,
}

impl<'a> Converter<'a> {
    pub fn new(
        source: &'a dyn BlockSource,
        store: &'a dyn ChangeLogStore,
        config: ConverterConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Last height this run will convert: the configured height clamped to
    /// the source tip.
    pub fn target_height(&self) -> Result<Height> {
        let tip = self.source.tip_height()?;
        Ok(match self.config.to_height {
            Some(to) => to.min(tip),
            None => tip,
        })
    }

    /// Convert heights `0..=target_height()`.
    ///
    /// Extraction must see every block from genesis to rebuild the unspent
    /// view, so the range always starts at zero.
    pub fn run(&self) -> Result<ConvertSummary> {
        let to = self.target_height()?;
        let started = Instant::now();
        let capacity = self.config.queue_capacity.max(1);

        info!(to, capacity, "starting conversion");

        let (blocks_tx, blocks_rx) = bounded::<Block>(capacity);
        let (batches_tx, batches_rx) = bounded::<Vec<Change>>(capacity);
        let (done_tx, done_rx) = bounded::<()>(0);

        let source = self.source;
        let store = self.store;
        let stats = &self.stats;
        let interval = self.config.report_interval;

        let outcomes = thread::scope(|s| {
            let reporter = s.spawn(move || report(stats, interval, done_rx));
            let fetcher = s.spawn(move || fetch(source, to, blocks_tx, stats));
            let extractor = s.spawn(move || extract(blocks_rx, batches_tx, stats));
            let persister = s.spawn(move || persist(store, batches_rx, stats));

            let outcomes = [
                join(fetcher, "fetch"),
                join(extractor, "extract"),
                join(persister, "persist"),
            ];

            drop(done_tx);
            if reporter.join().is_err() {
                warn!("progress reporter panicked");
            }
            outcomes
        });

        let mut first = None;
        for outcome in outcomes {
            if let Err(e) = outcome {
                match first {
                    None => first = Some(e),
                    Some(_) => warn!(error = %e, "additional pipeline failure"),
                }
            }
        }
        if let Some(e) = first {
            return Err(e);
        }

        self.store.mark_converted(to)?;
        self.store.flush()?;

        let summary = ConvertSummary {
            to_height: to,
            stats: self.stats.snapshot(),
            elapsed: started.elapsed(),
        };
        info!(
            to,
            blocks = summary.stats.blocks_processed,
            batches = summary.stats.batches_saved,
            changes = summary.stats.changes_saved,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "conversion complete"
        );
        Ok(summary)
    }
}

fn join(handle: ScopedJoinHandle<'_, Result<()>>, stage: &'static str) -> Result<()> {
    handle.join().unwrap_or(Err(ChainError::StagePanicked(stage)))
}

fn fetch(
    source: &dyn BlockSource,
    to: Height,
    blocks: Sender<Block>,
    stats: &PipelineStats,
) -> Result<()> {
    for height in 0..=to {
        let block = source.block_by_height(height)?;
        stats.blocks_fetched.fetch_add(1, Ordering::Relaxed);
        if blocks.send(block).is_err() {
            debug!(height, "fetch stopped, extractor gone");
            return Ok(());
        }
    }
    Ok(())
}

fn extract(
    blocks: Receiver<Block>,
    batches: Sender<Vec<Change>>,
    stats: &PipelineStats,
) -> Result<()> {
    let mut extractor = Extractor::new();
    for block in blocks {
        let changes = extractor.extract(&block)?;
        stats.blocks_processed.fetch_add(1, Ordering::Relaxed);
        if changes.is_empty() {
            continue;
        }
        if batches.send(changes).is_err() {
            debug!(height = block.height(), "extract stopped, persister gone");
            return Ok(());
        }
    }
    Ok(())
}

fn persist(
    store: &dyn ChangeLogStore,
    batches: Receiver<Vec<Change>>,
    stats: &PipelineStats,
) -> Result<()> {
    for changes in batches {
        // Batches are never empty; every change carries the batch height.
        let height = changes[0].height;
        store.save(height, &changes)?;
        stats.batches_saved.fetch_add(1, Ordering::Relaxed);
        stats
            .changes_saved
            .fetch_add(changes.len() as u64, Ordering::Relaxed);
    }
    Ok(())
}

fn report(stats: &PipelineStats, interval: Duration, done: Receiver<()>) {
    let ticker = tick(interval);
    loop {
        select! {
            recv(ticker) -> _ => {
                let snapshot = stats.snapshot();
                info!(
                    fetched = snapshot.blocks_fetched,
                    processed = snapshot.blocks_processed,
                    batches = snapshot.batches_saved,
                    changes = snapshot.changes_saved,
                    "conversion progress"
                );
            }
            recv(done) -> _ => return,
        }
    }
}
