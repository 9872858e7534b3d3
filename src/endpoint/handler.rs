use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::{
    // ---
    BridgeError,
    InboundMessage,
    Result,
};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased async message handler.
///
/// Wrapped in Arc so the pump can clone it into each spawned invocation.
pub(crate) type MessageHandler =
    Arc<dyn Fn(InboundMessage) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Receives every error a consumer cannot return to a caller.
pub(crate) type ExceptionHandler = Arc<dyn Fn(BridgeError) + Send + Sync>;

/// Runs once when a consumer stops.
pub(crate) type EndHandler = Box<dyn FnOnce() + Send>;

/// Wrap a typed async handler into a [`MessageHandler`].
pub(crate) fn wrap_handler<F, Fut>(handler: F) -> MessageHandler
where
    F: Fn(InboundMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    // ---
    Arc::new(move |message: InboundMessage| {
        let fut = handler(message);
        Box::pin(fut) as BoxFuture<'static, Result<()>>
    })
}
