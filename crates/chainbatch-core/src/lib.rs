//! chainbatch-core: resumable, crash-safe batch processing of finalized blocks.
//!
//! # Architecture
//!
//! ```text
//! run() → Processor (supervisor loop, fixed retry delay)
//!            ├── Database::connect    (resume cursor)
//!            ├── continuity guard     (cursor block still canonical?)
//!            ├── DataSource           (finalized height, block stream)
//!            ├── Throttler            (cached finalized height)
//!            ├── transact             (handler writes + cursor move, atomic)
//!            ├── Metrics              (progress, rates, ETA, Prometheus gauges)
//!            └── StatusReporter       (debounced status line)
//! ```

pub mod config;
pub mod cursor;
pub mod error;
#[cfg(feature = "exporter")]
pub mod exporter;
pub mod handler;
pub mod metrics;
pub mod processor;
pub mod reporter;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod telemetry;
pub mod throttle;
pub mod transact;
pub mod types;

pub use config::{ProcessorBuilder, ProcessorConfig};
pub use cursor::{format_head, HashAndHeight};
pub use error::IndexerError;
pub use handler::{handler_fn, BatchHandler, DataHandlerContext, HandlerChain};
pub use metrics::{Metrics, ProgressSnapshot};
pub use processor::{run, Processor};
pub use reporter::StatusReporter;
pub use source::{BlockStream, DataSource};
pub use store::Database;
pub use supervisor::{RetryDecision, RetryState};
pub use telemetry::{init_tracing, LogConfig};
pub use throttle::Throttler;
pub use transact::transact;
pub use types::{items_count, Block, BlockData, BlockHeader, BlockRange, FinalTxInfo};
