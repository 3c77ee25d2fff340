//! Transactional batch apply.
//!
//! The handler's writes and the cursor move from `prev_head` to `next_head`
//! are committed as one unit. A handler error rolls the transaction back and
//! is returned unchanged.

use crate::error::IndexerError;
use crate::handler::{BatchHandler, DataHandlerContext};
use crate::store::Database;
use crate::types::FinalTxInfo;

/// Apply one batch through `handler` inside a store transaction.
pub async fn transact<D, B, H>(
    database: &D,
    info: &FinalTxInfo,
    handler: &H,
    blocks: &[B],
) -> Result<(), IndexerError>
where
    D: Database,
    B: Sync,
    H: BatchHandler<B, D::Store> + ?Sized,
{
    let mut store = database.begin(info).await?;

    let outcome = handler
        .handle(DataHandlerContext {
            store: &mut store,
            blocks,
            is_head: info.is_on_top,
        })
        .await;

    match outcome {
        Ok(()) => database.commit(store, info).await,
        Err(err) => {
            if let Err(rollback_err) = database.rollback(store).await {
                tracing::warn!(
                    error = %rollback_err,
                    next_head = %info.next_head,
                    "rollback after handler failure failed"
                );
            }
            Err(err)
        }
    }
}
