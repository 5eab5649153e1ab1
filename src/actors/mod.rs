//! Long-running pipeline tasks
//!
//! Each actor runs as an independent tokio task owning its state, controlled
//! through a cloneable `*Handle` that sends commands over an mpsc channel.
//!
//! ```text
//!  Subscription ──pull──► DispatcherActor ──task per delivery──► StreamProcessor
//!                                ▲
//!                      ack/nack ─┘
//!
//!  timer ──► SchedulerActor ──► MetricsAggregator ──► aggregates
//!  timer ──► RetentionActor ──► cleanup_old_readings
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for queries such as `stats` or `run_now`

pub mod dispatcher;
pub mod messages;
pub mod retention;
pub mod scheduler;

pub use dispatcher::DispatcherHandle;
pub use retention::RetentionHandle;
pub use scheduler::SchedulerHandle;
