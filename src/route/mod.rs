//! Route registration and dispatch.
//!
//! Both peers carry the same machinery: a [`RouteRegistry`] mapping route
//! names to typed handlers, and a [`RequestContext`] handed to each handler
//! for responding, issuing reverse invocations, and observing cancellation.

mod context;
mod registry;

pub use context::RequestContext;
pub use registry::{Cardinality, Handler, HandlerResult, RouteRegistry, TypedHandler};
