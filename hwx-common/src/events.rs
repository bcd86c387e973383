//! Progress events for source chain walks
//!
//! A chain walk can take tens of seconds, so callers observe it through a
//! stream of [`ChainEvent`]s rather than waiting on a single return value.
//! Events are broadcast on an [`EventBus`]; every event carries the run id
//! of the walk that produced it so concurrent walks can share one bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Source chain progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
    /// Chain walk started for a candidate
    ChainStarted {
        run_id: Uuid,
        category: String,
        /// Canonical id of the candidate entry
        canonical_id: String,
        /// Number of sources in the chain
        sources: usize,
        timestamp: DateTime<Utc>,
    },

    /// About to fetch from a source
    SourceTrying {
        run_id: Uuid,
        source_id: String,
        target: String,
        timestamp: DateTime<Utc>,
    },

    /// Source not attempted (no locator, tier disabled)
    SourceSkipped {
        run_id: Uuid,
        source_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Source yielded at least one field
    SourceSuccess {
        run_id: Uuid,
        source_id: String,
        fields: usize,
        /// Fetch strategy that produced the content
        strategy: String,
        timestamp: DateTime<Utc>,
    },

    /// Source answered but nothing could be extracted
    SourceEmpty {
        run_id: Uuid,
        source_id: String,
        /// The page looked like a product page, so the parser missed it
        product_page: bool,
        timestamp: DateTime<Utc>,
    },

    /// Source blocked the request or could not be reached
    SourceFailed {
        run_id: Uuid,
        source_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Every source was tried without usable data
    ChainExhausted {
        run_id: Uuid,
        attempted: usize,
        timestamp: DateTime<Utc>,
    },

    /// Caller cancelled the walk; no further sources are attempted
    ChainCancelled {
        run_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl ChainEvent {
    /// Run id of the walk that emitted this event
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::ChainStarted { run_id, .. }
            | Self::SourceTrying { run_id, .. }
            | Self::SourceSkipped { run_id, .. }
            | Self::SourceSuccess { run_id, .. }
            | Self::SourceEmpty { run_id, .. }
            | Self::SourceFailed { run_id, .. }
            | Self::ChainExhausted { run_id, .. }
            | Self::ChainCancelled { run_id, .. } => *run_id,
        }
    }

    /// Wire name of the event kind (matches the serde tag)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChainStarted { .. } => "chain_started",
            Self::SourceTrying { .. } => "source_trying",
            Self::SourceSkipped { .. } => "source_skipped",
            Self::SourceSuccess { .. } => "source_success",
            Self::SourceEmpty { .. } => "source_empty",
            Self::SourceFailed { .. } => "source_failed",
            Self::ChainExhausted { .. } => "chain_exhausted",
            Self::ChainCancelled { .. } => "chain_cancelled",
        }
    }

    /// Source id for per-source events
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Self::SourceTrying { source_id, .. }
            | Self::SourceSkipped { source_id, .. }
            | Self::SourceSuccess { source_id, .. }
            | Self::SourceEmpty { source_id, .. }
            | Self::SourceFailed { source_id, .. } => Some(source_id),
            _ => None,
        }
    }
}

/// Broadcast bus for chain events
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChainEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers that fall more than `capacity` events behind lose
    /// the oldest events.
    ///
    /// # Examples
    ///
    /// ```
    /// use hwx_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChainEvent,
    ) -> Result<usize, broadcast::error::SendError<ChainEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChainEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for chain event");
        }
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
