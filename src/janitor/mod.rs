//! Out-of-band cleanup of the bucket and the counter store.
//!
//! The janitor runs on its own timer and from the manual trigger endpoint. It
//! talks to the same backends as the request path and nothing else.

mod job;

pub use job::{CounterSweepReport, Janitor, JanitorReport, ObjectSweepReport, SweepOutcome};
