//! Ordered dispose callbacks

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use warden_utils::WardenError;

type DisposeFn = Box<dyn FnOnce() -> BoxFuture<'static, Vec<WardenError>> + Send>;

/// Cleanup actions run during orderly shutdown.
///
/// Callbacks run in registration order, each awaited to completion. A
/// callback that reports errors does not stop the ones after it.
#[derive(Clone, Default)]
pub struct Disposer {
    callbacks: Arc<Mutex<Vec<DisposeFn>>>,
}

impl Disposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback
    pub async fn on_dispose<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Vec<WardenError>> + Send + 'static,
    {
        let mut callbacks = self.callbacks.lock().await;
        callbacks.push(Box::new(move || callback().boxed()));
    }

    /// Number of callbacks still pending
    #[cfg(test)]
    pub async fn pending(&self) -> usize {
        self.callbacks.lock().await.len()
    }

    /// Run every registered callback and collect their errors.
    ///
    /// Callbacks are drained, so a second call runs nothing.
    pub async fn dispose(&self) -> Vec<WardenError> {
        let callbacks: Vec<DisposeFn> = {
            let mut guard = self.callbacks.lock().await;
            guard.drain(..).collect()
        };

        debug!(count = callbacks.len(), "Running dispose callbacks");

        let mut errors = Vec::new();
        for (index, callback) in callbacks.into_iter().enumerate() {
            for err in callback().await {
                error!(index, error_kind = %err.kind(), "Dispose failed: {}", err);
                errors.push(err);
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn test_callbacks_run_in_order_despite_errors() {
        let disposer = Disposer::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        let seen = order.clone();
        disposer
            .on_dispose(move || async move {
                seen.lock().unwrap().push("A");
                Vec::new()
            })
            .await;

        let seen = order.clone();
        disposer
            .on_dispose(move || async move {
                seen.lock().unwrap().push("B");
                vec![WardenError::internal("listener close failed")]
            })
            .await;

        let seen = order.clone();
        disposer
            .on_dispose(move || async move {
                seen.lock().unwrap().push("C");
                Vec::new()
            })
            .await;

        let errors = disposer.dispose().await;

        assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("listener close failed"));
    }

    #[tokio::test]
    async fn test_dispose_runs_once() {
        let disposer = Disposer::new();
        let count = Arc::new(StdMutex::new(0));

        let seen = count.clone();
        disposer
            .on_dispose(move || async move {
                *seen.lock().unwrap() += 1;
                Vec::new()
            })
            .await;

        assert_eq!(disposer.pending().await, 1);
        disposer.dispose().await;
        disposer.dispose().await;
        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(disposer.pending().await, 0);
    }

    #[tokio::test]
    async fn test_clones_share_callbacks() {
        let disposer = Disposer::new();
        let other = disposer.clone();

        other.on_dispose(|| async { Vec::new() }).await;
        assert_eq!(disposer.pending().await, 1);
    }
}
