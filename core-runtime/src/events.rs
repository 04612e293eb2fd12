//! # Event Bus
//!
//! Typed transition events on a `tokio::sync::broadcast` channel. Download
//! jobs and the library stores announce what happened; hosts subscribe to
//! drive notifications without polling.
//!
//! Events describe transitions. Current state (the live track list, per-job
//! progress) lives in the state cells of `core-library`, which replay their
//! latest value to new subscribers. The bus does not replay, and a
//! subscriber that falls more than the channel capacity behind gets
//! `RecvError::Lagged` and carries on from the oldest retained event.
//!
//! ```rust
//! use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(16);
//! let mut subscriber = bus.subscribe();
//!
//! bus.emit(CoreEvent::Download(DownloadEvent::Cancelled {
//!     job_id: "job-1".to_string(),
//! }))
//! .ok();
//!
//! assert!(matches!(subscriber.recv().await, Ok(CoreEvent::Download(_))));
//! # }
//! ```
//!
//! Publishers ignore the "no subscribers" error from [`EventBus::emit`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

// Re-export commonly used types
pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Subscribers that can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 100;

// ============================================================================
// Core Event Types
// ============================================================================

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Download job lifecycle events
    Download(DownloadEvent),
    /// Catalog and playlist changes
    Library(LibraryEvent),
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted by the download orchestrator, one stream per job.
///
/// Every job that is not cancelled ends with exactly one `Completed` or
/// `Failed`; a cancelled job ends with `Cancelled` and nothing else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    /// Job accepted and waiting to connect.
    Queued {
        job_id: String,
        /// Source URL with query string and fragment removed.
        url: String,
    },
    /// An attempt opened its connection.
    Started {
        job_id: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// An attempt failed with a transient error and will be retried.
    Retrying {
        job_id: String,
        /// The attempt that failed.
        attempt: u32,
        message: String,
    },
    /// File written and committed to the catalog.
    Completed {
        job_id: String,
        /// File name inside the media directory.
        file_name: String,
        bytes: u64,
    },
    /// Job gave up.
    Failed { job_id: String, message: String },
    /// Job was cancelled before producing a result.
    Cancelled { job_id: String },
}

impl DownloadEvent {
    /// The job this event belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            DownloadEvent::Queued { job_id, .. }
            | DownloadEvent::Started { job_id, .. }
            | DownloadEvent::Retrying { job_id, .. }
            | DownloadEvent::Completed { job_id, .. }
            | DownloadEvent::Failed { job_id, .. }
            | DownloadEvent::Cancelled { job_id } => job_id,
        }
    }
}

// ============================================================================
// Library Events
// ============================================================================

/// Events related to catalog and playlist changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum LibraryEvent {
    /// A completed track entered the catalog.
    TrackAdded { track_id: String, title: String },
    /// Track record changed.
    TrackUpdated {
        track_id: String,
        /// Fields that were updated.
        updated_fields: Vec<String>,
    },
    /// Track removed from the catalog.
    TrackDeleted { track_id: String },
    /// Every completed track was removed.
    CatalogCleared { removed: u64 },
    /// New playlist created.
    PlaylistCreated { playlist_id: String, name: String },
    /// Playlist modified.
    PlaylistUpdated {
        playlist_id: String,
        /// What changed (e.g., "renamed", "track_added", "reordered").
        change_type: String,
    },
    /// Playlist and its entries removed.
    PlaylistDeleted { playlist_id: String },
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to core events.
///
/// Cloning is cheap; all clones share one channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum number of events to buffer per subscriber.
    ///   When a subscriber falls behind by more than this amount, it will
    ///   receive a `RecvError::Lagged` error.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers. Never blocks.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with filtering.
///
/// # Example
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let event_bus = EventBus::new(100);
/// let downloads = EventStream::new(event_bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn matches(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter (if any).
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
