//! Deferred values.
//!
//! A [`Lazy`] stands in for a frame that is only computed when someone asks
//! for it. It occupies exactly one position in whatever stream holds it, so
//! resolving it later never reorders its siblings.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::error::CodecError;
use crate::value::{Frame, Value};

type ProducerFuture = Pin<Box<dyn Future<Output = Result<Frame, CodecError>> + Send>>;
type Producer = Box<dyn Fn() -> ProducerFuture + Send + Sync>;

/// Cloneable handle to a deferred frame.
///
/// The producer runs at most once per successful resolution: every clone of
/// the handle observes the same frame. A failed run is not remembered, the
/// error goes to the caller that triggered it.
#[derive(Clone)]
pub struct Lazy {
    inner: Arc<LazyInner>,
}

struct LazyInner {
    producer: Option<Producer>,
    resolved: OnceCell<Frame>,
}

impl Lazy {
    /// Lazy frame backed by an async producer.
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Frame, CodecError>> + Send + 'static,
    {
        let producer: Producer = Box::new(move || -> ProducerFuture { Box::pin(producer()) });
        Self {
            inner: Arc::new(LazyInner {
                producer: Some(producer),
                resolved: OnceCell::new(),
            }),
        }
    }

    /// Lazy single value, stored as a one-element frame.
    pub fn single<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CodecError>> + Send + 'static,
    {
        Self::new(move || {
            let value = producer();
            async move { Ok(vec![value.await?]) }
        })
    }

    /// Already-resolved lazy. Used when a frame comes back from storage.
    pub fn ready(frame: Frame) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                producer: None,
                resolved: OnceCell::new_with(Some(frame)),
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.initialized()
    }

    pub fn ptr_eq(&self, other: &Lazy) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Run the producer (once) and return the frame.
    pub async fn resolve(&self) -> Result<Frame, CodecError> {
        let inner = &self.inner;
        let frame = inner
            .resolved
            .get_or_try_init(|| async {
                match &inner.producer {
                    Some(producer) => producer().await,
                    None => Err(CodecError::corrupt("lazy value has no producer")),
                }
            })
            .await?;
        Ok(frame.clone())
    }

    /// Resolve a lazy that is expected to hold exactly one value.
    pub async fn resolve_single(&self) -> Result<Value, CodecError> {
        let mut frame = self.resolve().await?;
        if frame.len() != 1 {
            return Err(CodecError::corrupt(format!(
                "lazy value resolved to {} items, expected 1",
                frame.len()
            )));
        }
        Ok(frame.remove(0))
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
