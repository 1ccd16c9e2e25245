//! Loop pacing for colonylink nodes.
//!
//! A node is a cooperative polling loop: every tick it drains the
//! transport, dispatches packets, pumps outbound transfers and flushes
//! batches. This crate provides the two timing pieces around that loop:
//!
//! - [`TickScheduler`]: fires at a fixed rate (tokio time), logs slow steps
//!   and lost slots. Rate 0 is manual mode for callers that step the node
//!   themselves, as the integration tests do.
//! - [`Continuations`]: a queue of staged work that becomes due a given
//!   number of ticks later.

mod continuation;
mod scheduler;

pub use continuation::Continuations;
pub use scheduler::{TickConfig, TickInfo, TickMetrics, TickPolicy, TickScheduler};
