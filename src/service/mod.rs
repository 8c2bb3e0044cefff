//! Built-in routes.
//!
//! [`HealthSampler`] serves the `health` route: an infinite stream of
//! nondeterministic liveness samples, one per tick. [`GreetingService`]
//! serves the `greetings` route: a bounded stream of timestamped greetings
//! addressed to the authenticated principal, gated on the requester staying
//! healthy.

mod greeting;
mod health;

pub use greeting::{GreetingRequest, GreetingResponse, GreetingService, GREETINGS_ROUTE};
pub use health::{HealthSample, HealthSampler, HEALTH_ROUTE};
