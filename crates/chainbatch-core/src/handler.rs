//! Batch handler trait, closure adapter and handler chain.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

use crate::error::IndexerError;

/// Context passed to a batch handler inside a store transaction.
pub struct DataHandlerContext<'a, B, S> {
    /// Transaction-scoped store handle; writes commit with the cursor.
    pub store: &'a mut S,
    /// The batch, in ascending height order. Never empty.
    pub blocks: &'a [B],
    /// `true` once the batch reaches the source's finalized height.
    pub is_head: bool,
}

impl<B, S> DataHandlerContext<'_, B, S> {
    /// Reborrow the context so it can be handed to another handler.
    pub fn reborrow(&mut self) -> DataHandlerContext<'_, B, S> {
        DataHandlerContext {
            store: &mut *self.store,
            blocks: self.blocks,
            is_head: self.is_head,
        }
    }
}

/// Trait for user-provided batch handlers.
///
/// Called once per batch; returning an error aborts the transaction.
#[async_trait]
pub trait BatchHandler<B: Sync, S: Send>: Send + Sync {
    async fn handle(&self, ctx: DataHandlerContext<'_, B, S>) -> Result<(), IndexerError>;
}

/// Adapter returned by [`handler_fn`].
pub struct HandlerFn<F>(F);

/// Turn an async closure into a [`BatchHandler`].
///
/// ```rust,ignore
/// let handler = handler_fn::<BlockData, MemoryStore, _>(|ctx| {
///     Box::pin(async move {
///         for block in ctx.blocks {
///             ctx.store.insert("block", serde_json::to_value(&block.header).unwrap());
///         }
///         Ok(())
///     })
/// });
/// ```
pub fn handler_fn<B, S, F>(f: F) -> HandlerFn<F>
where
    F: for<'a> Fn(DataHandlerContext<'a, B, S>) -> BoxFuture<'a, Result<(), IndexerError>>
        + Send
        + Sync,
{
    HandlerFn(f)
}

#[async_trait]
impl<B, S, F> BatchHandler<B, S> for HandlerFn<F>
where
    B: Sync,
    S: Send,
    F: for<'a> Fn(DataHandlerContext<'a, B, S>) -> BoxFuture<'a, Result<(), IndexerError>>
        + Send
        + Sync,
{
    async fn handle(&self, ctx: DataHandlerContext<'_, B, S>) -> Result<(), IndexerError> {
        (self.0)(ctx).await
    }
}

/// Runs several handlers, in registration order, inside the same transaction.
pub struct HandlerChain<B: Sync, S: Send> {
    handlers: Vec<Arc<dyn BatchHandler<B, S>>>,
}

impl<B: Sync, S: Send> HandlerChain<B, S> {
    pub fn new() -> Self {
        Self { handlers: vec![] }
    }

    /// Append a handler to the chain.
    pub fn push(&mut self, handler: Arc<dyn BatchHandler<B, S>>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<B: Sync, S: Send> Default for HandlerChain<B, S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<B: Sync, S: Send> BatchHandler<B, S> for HandlerChain<B, S> {
    async fn handle(&self, mut ctx: DataHandlerContext<'_, B, S>) -> Result<(), IndexerError> {
        for handler in &self.handlers {
            handler.handle(ctx.reborrow()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl BatchHandler<u64, Vec<u64>> for Counter {
        async fn handle(&self, ctx: DataHandlerContext<'_, u64, Vec<u64>>) -> Result<(), IndexerError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            ctx.store.extend_from_slice(ctx.blocks);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl BatchHandler<u64, Vec<u64>> for Failing {
        async fn handle(&self, _ctx: DataHandlerContext<'_, u64, Vec<u64>>) -> Result<(), IndexerError> {
            Err(IndexerError::handler("failing", "boom"))
        }
    }

    #[tokio::test]
    async fn handler_fn_sees_blocks_and_head_flag() {
        let handler = handler_fn::<u64, Vec<u64>, _>(|ctx| {
            Box::pin(async move {
                if ctx.is_head {
                    ctx.store.push(u64::MAX);
                }
                ctx.store.extend(ctx.blocks.iter().map(|b| b * 10));
                Ok(())
            })
        });

        let mut store = Vec::new();
        let blocks = [1, 2, 3];
        handler
            .handle(DataHandlerContext {
                store: &mut store,
                blocks: &blocks,
                is_head: true,
            })
            .await
            .unwrap();
        assert_eq!(store, vec![u64::MAX, 10, 20, 30]);
    }

    #[tokio::test]
    async fn chain_runs_in_order_and_stops_on_error() {
        let count = Arc::new(AtomicU32::new(0));
        let mut chain: HandlerChain<u64, Vec<u64>> = HandlerChain::new();
        chain.push(Arc::new(Counter(count.clone())));
        chain.push(Arc::new(Failing));
        chain.push(Arc::new(Counter(count.clone())));
        assert_eq!(chain.len(), 3);

        let mut store = Vec::new();
        let blocks = [7];
        let result = chain
            .handle(DataHandlerContext {
                store: &mut store,
                blocks: &blocks,
                is_head: false,
            })
            .await;

        assert!(matches!(result, Err(IndexerError::Handler { .. })));
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(store, vec![7]);
    }
}
