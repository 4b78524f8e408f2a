//! Rate limiting logic and state management.

mod backend;
mod clock;
mod counter;
mod key;
mod limiter;
mod policy;

pub use backend::RateLimitBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::RateLimitEntry;
pub use key::RateLimitKey;
pub use limiter::{RateLimitDecision, RateLimiter};
pub use policy::{ClassPolicies, PolicyConfig, RateLimitPolicy, TrafficClass};
