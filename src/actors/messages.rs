//! Command types of the pipeline actors
//!
//! Every actor owns an mpsc command receiver; request/response commands carry
//! a oneshot sender for the reply.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::AggregateRecord;

/// Commands that can be sent to the DispatcherActor
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Current dispatch counters
    GetStats {
        respond_to: oneshot::Sender<DispatchStats>,
    },

    /// Stop pulling; deliveries in flight are finished first
    Shutdown {
        respond_to: oneshot::Sender<DispatchStats>,
    },
}

/// Counters of one dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub pulled: u64,
    pub acked: u64,
    pub nacked: u64,
    pub broker_errors: u64,
}

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Aggregate the last complete window of every source immediately
    RunNow {
        respond_to: oneshot::Sender<Vec<WindowRun>>,
    },

    Shutdown,
}

/// Result of aggregating one source for one window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowRun {
    pub source_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub result: Result<AggregateRecord, String>,
}

/// Commands that can be sent to the RetentionActor
#[derive(Debug)]
pub enum RetentionCommand {
    /// Run a cleanup pass now, replying with the number of deleted readings
    CleanupNow {
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    Shutdown,
}
