//! Event system for Scribe services
//!
//! Provides shared event definitions and EventBus for job lifecycle
//! notifications (SSE stream, diagnostics).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::status::{JobId, JobStatus};

/// Scribe event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ScribeEvent {
    /// Upload accepted and job record created
    JobCreated {
        job_id: JobId,
        filename: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job entered a new stage or reached a stage checkpoint
    JobUpdated {
        job_id: JobId,
        status: JobStatus,
        progress: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Results are ready
    JobProcessed {
        job_id: JobId,
        num_segments: usize,
        /// Wall-clock seconds across all stages
        total_time: f64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Job stopped with an error (includes cancellation)
    JobFailed {
        job_id: JobId,
        error_message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ScribeEvent {
    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            ScribeEvent::JobCreated { .. } => "JobCreated",
            ScribeEvent::JobUpdated { .. } => "JobUpdated",
            ScribeEvent::JobProcessed { .. } => "JobProcessed",
            ScribeEvent::JobFailed { .. } => "JobFailed",
        }
    }

    /// Job the event refers to
    pub fn job_id(&self) -> &JobId {
        match self {
            ScribeEvent::JobCreated { job_id, .. }
            | ScribeEvent::JobUpdated { job_id, .. }
            | ScribeEvent::JobProcessed { job_id, .. }
            | ScribeEvent::JobFailed { job_id, .. } => job_id,
        }
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for application-wide events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Lagged message detection for slow subscribers
///
/// # Examples
///
/// ```
/// use scribe_common::events::{EventBus, ScribeEvent};
/// use scribe_common::{JobId, JobStatus};
///
/// let event_bus = EventBus::new(100);
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(ScribeEvent::JobUpdated {
///     job_id: JobId::from("job-1"),
///     status: JobStatus::Transcribing,
///     progress: 25,
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert!(rx.try_recv().is_ok());
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ScribeEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ScribeEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ScribeEvent,
    ) -> Result<usize, broadcast::error::SendError<ScribeEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ScribeEvent) {
        let _ = self.tx.send(event);
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
