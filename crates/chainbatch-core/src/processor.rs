//! The batch processor: drives ingestion from the stored cursor to the chain tip.
//!
//! # One pass
//! 1. Connect to the database and read the resume cursor.
//! 2. Verify the cursor's block is still canonical on the source.
//! 3. Stream batches from `cursor + 1`; apply each one in a store transaction
//!    together with the cursor move.
//! 4. Update progress metrics and the debounced status line after every batch.
//!
//! # Supervision
//! A failed pass is logged and retried after a fixed delay, from the last
//! committed cursor, until the retry budget is spent.

use futures::StreamExt;
use tokio::time::Instant;

use crate::config::ProcessorConfig;
use crate::cursor::HashAndHeight;
use crate::error::IndexerError;
use crate::handler::BatchHandler;
use crate::metrics::Metrics;
use crate::reporter::StatusReporter;
use crate::source::DataSource;
use crate::store::Database;
use crate::supervisor::{RetryDecision, RetryState};
use crate::throttle::Throttler;
use crate::transact::transact;
use crate::types::{items_count, Block, BlockRange, FinalTxInfo};

/// Batch processor over a source, a database and a handler.
pub struct Processor<S, D, H> {
    source: S,
    database: D,
    handler: H,
    config: ProcessorConfig,
    metrics: Metrics,
    chain_height: Throttler<u64>,
    retry: RetryState,
}

impl<S, D, H> Processor<S, D, H>
where
    S: DataSource,
    D: Database,
    H: BatchHandler<S::Block, D::Store>,
{
    pub fn new(source: S, database: D, handler: H, config: ProcessorConfig) -> Self {
        Self {
            chain_height: Throttler::new(config.height_refresh_interval()),
            retry: RetryState::new(config.max_retries, config.retry_delay()),
            metrics: Metrics::new(),
            source,
            database,
            handler,
            config,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn metrics_mut(&mut self) -> &mut Metrics {
        &mut self.metrics
    }

    /// Run passes until the stream is exhausted or the retry budget is spent.
    pub async fn run(&mut self) -> Result<(), IndexerError> {
        loop {
            let err = match self.process().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            tracing::error!(error = %err, "processing failed");

            match self.retry.on_failure() {
                RetryDecision::Exhausted => {
                    let attempts = self.retry.attempts();
                    tracing::error!(attempts, "max retries reached, exiting");
                    return Err(IndexerError::RetriesExhausted {
                        attempts,
                        last: Box::new(err),
                    });
                }
                RetryDecision::Retry(delay) => {
                    tracing::info!(
                        retry = self.retry.retry_count,
                        max_retries = self.retry.max_retries,
                        "retrying in {:.1} minutes",
                        delay.as_secs_f64() / 60.0
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One pass: connect, check continuity, drain the stream.
    async fn process(&mut self) -> Result<(), IndexerError> {
        let Self {
            source,
            database,
            handler,
            config,
            metrics,
            chain_height,
            ..
        } = self;
        let (source, database, handler) = (&*source, &*database, &*handler);

        let mut state = database.connect().await?;
        if let Some(height) = state.committed_height() {
            tracing::info!(hash = %state.hash, "last processed final block was {height}");
        }

        assert_same_chain(source, &state).await?;

        let height = source.finalized_height().await?;
        update_progress(metrics, source, height, &state, Instant::now())?;

        let reporter = StatusReporter::spawn(config.status_interval());
        let mut stream = source.block_stream(state.next_height());

        while let Some(batch) = stream.next().await {
            let blocks = batch?;
            let Some(last) = blocks.last() else {
                continue;
            };

            let height = chain_height.get(|| source.finalized_height()).await?;
            let info = FinalTxInfo {
                is_on_top: last.header().height >= height,
                next_head: last.header().head()?,
                prev_head: state,
            };

            let start = Instant::now();
            transact(database, &info, handler, &blocks).await?;
            let end = Instant::now();

            state = info.next_head;

            update_progress(metrics, source, height, &state, end)?;
            metrics.register_batch(blocks.len(), items_count(&blocks), start, end);
            reporter.report(metrics.status_line());
        }

        reporter.finish().await;
        tracing::info!(head = %state, "block stream ended");
        Ok(())
    }
}

/// Fail if the cursor's block is no longer on the source's canonical chain.
async fn assert_same_chain<S: DataSource>(
    source: &S,
    state: &HashAndHeight,
) -> Result<(), IndexerError> {
    let Some(height) = state.committed_height() else {
        return Ok(());
    };
    let hash = source.block_hash(height).await?;
    if hash.as_deref() == Some(state.hash.as_str()) {
        return Ok(());
    }
    Err(IndexerError::ContinuityViolation {
        head: state.clone(),
        actual: hash,
    })
}

fn update_progress<S: DataSource>(
    metrics: &mut Metrics,
    source: &S,
    chain_height: u64,
    state: &HashAndHeight,
    at: Instant,
) -> Result<(), IndexerError> {
    let chain = i64::try_from(chain_height).map_err(|_| {
        IndexerError::Source(format!("finalized height {chain_height} out of range"))
    })?;
    metrics.set_chain_height(chain);
    metrics.set_last_processed_block(state.height);

    let pending = BlockRange::new(state.next_height(), chain_height);
    let (processed, left) = match source.blocks_count_in_range(&pending) {
        Some(left) => {
            let total = source
                .blocks_count_in_range(&BlockRange::new(0, chain_height))
                .unwrap_or(left);
            (total.saturating_sub(left), left)
        }
        None => match state.committed_height() {
            Some(last) => (last, chain_height.saturating_sub(last)),
            None => (0, chain_height.saturating_add(1)),
        },
    };
    metrics.update_progress(processed, left, at);
    Ok(())
}

/// Process entry point: serve metrics if configured, run the processor, and
/// terminate the process once the retry budget is exhausted.
pub async fn run<S, D, H>(source: S, database: D, handler: H, config: ProcessorConfig)
where
    S: DataSource,
    D: Database,
    H: BatchHandler<S::Block, D::Store>,
{
    crate::telemetry::init_tracing(&crate::telemetry::LogConfig::from_env());

    let port = config.prometheus_port;
    let mut processor = Processor::new(source, database, handler, config);

    if let Some(port) = port {
        if let Err(err) = start_exporter(&mut processor, port).await {
            tracing::error!(error = %err, "fatal: failed to start metrics exporter");
            std::process::exit(1);
        }
    }

    if let Err(err) = processor.run().await {
        tracing::error!(error = %err, "fatal: processor stopped");
        std::process::exit(1);
    }
}

#[cfg(feature = "exporter")]
async fn start_exporter<S, D, H>(
    processor: &mut Processor<S, D, H>,
    port: u16,
) -> Result<(), IndexerError>
where
    S: DataSource,
    D: Database,
    H: BatchHandler<S::Block, D::Store>,
{
    let registry = crate::exporter::metrics_registry()?;
    processor.metrics_mut().install(&registry)?;
    let addr = crate::exporter::serve_metrics(registry, port).await?;
    tracing::info!("prometheus metrics are served on port {}", addr.port());
    Ok(())
}

#[cfg(not(feature = "exporter"))]
async fn start_exporter<S, D, H>(
    _processor: &mut Processor<S, D, H>,
    port: u16,
) -> Result<(), IndexerError>
where
    S: DataSource,
    D: Database,
    H: BatchHandler<S::Block, D::Store>,
{
    tracing::warn!(port, "metrics port configured but the `exporter` feature is disabled");
    Ok(())
}
