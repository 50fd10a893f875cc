//! Draft chunk sequences
//!
//! A [`Draft`] is a single-pass, finite, cancellable sequence of text chunks
//! offered alongside a tier's final value. It cannot be restarted.

use crate::handler::ChunkStream;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancels a [`Draft`] from elsewhere
#[derive(Debug, Clone, Default)]
pub struct DraftCancel(Arc<AtomicBool>);

impl DraftCancel {
    /// Stop the draft; the next poll yields `None`
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Lazy chunk sequence
pub struct Draft {
    stream: Option<ChunkStream>,
    cancel: DraftCancel,
}

impl Draft {
    /// Wrap a chunk stream
    #[must_use]
    pub fn new(stream: ChunkStream) -> Self {
        Self {
            stream: Some(stream),
            cancel: DraftCancel::default(),
        }
    }

    /// Handle that cancels this draft
    #[inline]
    #[must_use]
    pub fn cancel_handle(&self) -> DraftCancel {
        self.cancel.clone()
    }

    /// Stop iteration now
    #[inline]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether no further chunks will be produced
    #[inline]
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.stream.is_none() || self.cancel.is_cancelled()
    }

    /// Next chunk, `None` once exhausted or cancelled
    pub async fn next_chunk(&mut self) -> Option<anyhow::Result<String>> {
        if self.cancel.is_cancelled() {
            self.stream = None;
            return None;
        }
        let stream = self.stream.as_mut()?;
        let chunk = stream.next().await;
        if chunk.is_none() {
            self.stream = None;
        }
        chunk
    }

    /// Drain the remaining chunks into one string
    ///
    /// # Errors
    /// The first chunk error.
    pub async fn collect_text(mut self) -> anyhow::Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next_chunk().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl std::fmt::Debug for Draft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Draft")
            .field("finished", &self.is_finished())
            .finish()
    }
}
