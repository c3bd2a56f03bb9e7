//! Event types and the in-process event bus
//!
//! Services announce state changes on a `tokio::sync::broadcast` channel;
//! the HTTP layer relays them to SSE clients. Events carry the tenant so
//! that subscribers can filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// LMS event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LmsEvent {
    /// A user enrolled in a program
    EnrollmentCreated {
        tenant_id: i64,
        enrollment_id: i64,
        user_id: i64,
        program_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Program progress changed for an enrollment
    ProgressUpdated {
        tenant_id: i64,
        enrollment_id: i64,
        progress_percent: i64,
        timestamp: DateTime<Utc>,
    },

    /// A test attempt was scored
    AttemptSubmitted {
        tenant_id: i64,
        attempt_id: i64,
        test_id: i64,
        user_id: i64,
        score_percent: i64,
        passed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A certificate was issued
    CertificateIssued {
        tenant_id: i64,
        certificate_id: i64,
        number: String,
        timestamp: DateTime<Utc>,
    },

    /// A payment changed status
    PaymentStatusChanged {
        tenant_id: i64,
        payment_id: i64,
        status: String,
        timestamp: DateTime<Utc>,
    },

    /// An import batch finished (committed or dry run)
    ImportCompleted {
        tenant_id: i64,
        run_id: i64,
        entity: String,
        added: usize,
        updated: usize,
        skipped: usize,
        failed: usize,
        dry_run: bool,
        timestamp: DateTime<Utc>,
    },
}

impl LmsEvent {
    /// Tenant the event belongs to
    pub fn tenant_id(&self) -> i64 {
        match self {
            LmsEvent::EnrollmentCreated { tenant_id, .. }
            | LmsEvent::ProgressUpdated { tenant_id, .. }
            | LmsEvent::AttemptSubmitted { tenant_id, .. }
            | LmsEvent::CertificateIssued { tenant_id, .. }
            | LmsEvent::PaymentStatusChanged { tenant_id, .. }
            | LmsEvent::ImportCompleted { tenant_id, .. } => *tenant_id,
        }
    }

    /// SSE event name
    pub fn event_type(&self) -> &'static str {
        match self {
            LmsEvent::EnrollmentCreated { .. } => "EnrollmentCreated",
            LmsEvent::ProgressUpdated { .. } => "ProgressUpdated",
            LmsEvent::AttemptSubmitted { .. } => "AttemptSubmitted",
            LmsEvent::CertificateIssued { .. } => "CertificateIssued",
            LmsEvent::PaymentStatusChanged { .. } => "PaymentStatusChanged",
            LmsEvent::ImportCompleted { .. } => "ImportCompleted",
        }
    }
}

/// Broadcast bus for [`LmsEvent`]s
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LmsEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// Lagging receivers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<LmsEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: LmsEvent) -> Result<usize, broadcast::error::SendError<LmsEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: LmsEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
