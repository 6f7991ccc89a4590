//! Rate limiting logic over a pluggable counter store.

mod fingerprint;
mod limiter;
mod window;

pub use fingerprint::{Fingerprint, UNKNOWN_ADDRESS};
pub use limiter::{FailurePolicy, RateLimiter};
pub use window::{Decision, DenyKind, Quota, Tier, WindowSpec};
