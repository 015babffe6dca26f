//! Shutdown pipeline: an ordered middleware chain wrapped around a final
//! handler, composed right-to-left. The event travels through the chain
//! immutably; a middleware that wants different content passes a replacement
//! event to the next handler.

use std::error::Error;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::Future;

use super::config::SdkConfig;
use super::event::ShutdownEvent;

/// Error carried out of the pipeline (usually from the notifier).
pub type PipelineError = Box<dyn Error + Send + Sync>;

/// What a handler decided to do with the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed unchanged.
    Continue,
    /// Proceed with the replacement event in [`ShutdownOutcome::event`].
    Modify,
    /// Stop the pipeline; the shutdown is not notified.
    Cancel,
}

/// Result flowing back out of the pipeline.
#[derive(Debug)]
pub struct ShutdownOutcome {
    pub decision: Decision,
    pub event: Option<ShutdownEvent>,
    pub error: Option<PipelineError>,
}

impl ShutdownOutcome {
    pub fn proceed() -> Self {
        Self {
            decision: Decision::Continue,
            event: None,
            error: None,
        }
    }

    pub fn modified(event: ShutdownEvent) -> Self {
        Self {
            decision: Decision::Modify,
            event: Some(event),
            error: None,
        }
    }

    pub fn cancel() -> Self {
        Self {
            decision: Decision::Cancel,
            event: None,
            error: None,
        }
    }

    pub fn fail(error: impl Error + Send + Sync + 'static) -> Self {
        Self {
            decision: Decision::Continue,
            event: None,
            error: Some(Box::new(error)),
        }
    }
}

/// Context handed to every handler in the chain.
#[derive(Debug, Clone)]
pub struct ShutdownContext {
    pub config: SdkConfig,
    pub event: ShutdownEvent,
}

/// A step of the pipeline; the final handler is the innermost one.
pub type ShutdownHandler =
    Arc<dyn Fn(ShutdownContext) -> BoxFuture<'static, ShutdownOutcome> + Send + Sync>;

/// A decorator around the next handler.
pub type Middleware = Arc<dyn Fn(ShutdownHandler) -> ShutdownHandler + Send + Sync>;

/// Wrap an async closure into a [`ShutdownHandler`].
pub fn handler<F, Fut>(op: F) -> ShutdownHandler
where
    F: Fn(ShutdownContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ShutdownOutcome> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(op(ctx)))
}

/// Wrap a decorator closure into a [`Middleware`].
pub fn middleware<F>(op: F) -> Middleware
where
    F: Fn(ShutdownHandler) -> ShutdownHandler + Send + Sync + 'static,
{
    Arc::new(op)
}

/// Compose the chain so that the first middleware runs outermost.
pub fn compose(middlewares: &[Middleware], terminal: ShutdownHandler) -> ShutdownHandler {
    middlewares
        .iter()
        .rev()
        .fold(terminal, |next, wrap| wrap(next))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::super::event::ShutdownReason;
    use super::*;

    fn recording_terminal(seen: Arc<Mutex<Vec<ShutdownEvent>>>) -> ShutdownHandler {
        handler(move |ctx: ShutdownContext| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(ctx.event);
                ShutdownOutcome::proceed()
            }
        })
    }

    fn tracing_middleware(label: &'static str, order: Arc<Mutex<Vec<&'static str>>>) -> Middleware {
        middleware(move |next: ShutdownHandler| {
            let order = order.clone();
            handler(move |ctx: ShutdownContext| {
                let order = order.clone();
                let next = next.clone();
                async move {
                    order.lock().unwrap().push(label);
                    next(ctx).await
                }
            })
        })
    }

    fn ctx(reason: ShutdownReason) -> ShutdownContext {
        ShutdownContext {
            config: SdkConfig::default(),
            event: ShutdownEvent::new(reason),
        }
    }

    #[tokio::test]
    async fn middlewares_run_in_declaration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let chain = compose(
            &[
                tracing_middleware("first", order.clone()),
                tracing_middleware("second", order.clone()),
            ],
            recording_terminal(seen.clone()),
        );

        chain(ctx(ShutdownReason::NoClients)).await;

        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelling_middleware_short_circuits() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cancel = middleware(|_next: ShutdownHandler| {
            handler(|_ctx: ShutdownContext| async { ShutdownOutcome::cancel() })
        });
        let chain = compose(&[cancel], recording_terminal(seen.clone()));

        let outcome = chain(ctx(ShutdownReason::SignalReceived)).await;

        assert_eq!(outcome.decision, Decision::Cancel);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn modifying_middleware_replaces_the_event_downstream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let reclassify = middleware(|next: ShutdownHandler| {
            handler(move |ctx: ShutdownContext| {
                let next = next.clone();
                async move {
                    let replaced = ShutdownContext {
                        event: ShutdownEvent::new(ShutdownReason::AfkTimeout),
                        ..ctx
                    };
                    next(replaced).await
                }
            })
        });
        let chain = compose(&[reclassify], recording_terminal(seen.clone()));

        chain(ctx(ShutdownReason::ClientDisconnected)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].reason, ShutdownReason::AfkTimeout);
    }
}
